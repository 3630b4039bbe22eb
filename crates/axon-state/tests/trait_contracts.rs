//! Trait contract tests for SnapshotStore.
//!
//! These tests verify the behavioral contract of the persistence port against
//! both the in-memory fake and the filesystem adapter. Any conforming
//! implementation must pass these.

use std::sync::Arc;

use axon_state::fakes::MemorySnapshotStore;
use axon_state::storage_traits::*;
use axon_state::{FsSnapshotStore, StorageError};
use chrono::Utc;
use serde_json::json;

fn pending(request_id: &str) -> Snapshot {
    Snapshot::pending(
        request_id,
        "review_pipeline",
        "v1",
        json!({"files_changed": 12}),
        serde_json::Map::new(),
    )
}

fn audit(step: &str) -> StepAudit {
    let now = Utc::now();
    StepAudit {
        step_id: step.to_string(),
        action: "noop".to_string(),
        status: StepStatus::Ok,
        attempts: 1,
        started_at: now,
        finished_at: now,
        duration_ms: 0,
        error: None,
    }
}

/// Run `check` against a fresh instance of every backend.
async fn for_each_backend<F, Fut>(check: F)
where
    F: Fn(Arc<dyn SnapshotStore>) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    check(Arc::new(MemorySnapshotStore::new())).await;

    let dir = tempfile::tempdir().unwrap();
    check(Arc::new(FsSnapshotStore::new(dir.path()).unwrap())).await;
}

// ===========================================================================
// SnapshotStore contract tests
// ===========================================================================

#[tokio::test]
async fn upsert_then_get_round_trip() {
    for_each_backend(|store| async move {
        store
            .upsert_snapshot(pending("req-1"), UpsertOptions::default())
            .await
            .unwrap();
        let got = store.get_snapshot("req-1").await.unwrap();

        assert_eq!(got.request_id, "req-1");
        assert_eq!(got.status, SnapshotStatus::Pending);
        assert_eq!(got.input, json!({"files_changed": 12}));
    })
    .await;
}

#[tokio::test]
async fn get_not_found() {
    for_each_backend(|store| async move {
        let err = store.get_snapshot("nope").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    })
    .await;
}

#[tokio::test]
async fn upsert_replaces_previous_progress() {
    for_each_backend(|store| async move {
        store
            .upsert_snapshot(pending("req-2"), UpsertOptions::default())
            .await
            .unwrap();

        let mut running = pending("req-2");
        running.status = SnapshotStatus::Running;
        running.results.insert("lint".to_string(), json!({"ok": true}));
        running.audit_trail.push(audit("lint"));
        running.last_step_id = Some("lint".to_string());
        running.last_attempt = Some(1);
        store
            .upsert_snapshot(running, UpsertOptions::default())
            .await
            .unwrap();

        let got = store.get_snapshot("req-2").await.unwrap();
        assert_eq!(got.status, SnapshotStatus::Running);
        assert_eq!(got.results["lint"], json!({"ok": true}));
        assert_eq!(got.audit_trail.len(), 1);
        assert_eq!(got.last_step_id.as_deref(), Some("lint"));
    })
    .await;
}

#[tokio::test]
async fn terminal_snapshot_is_immutable_by_default() {
    for_each_backend(|store| async move {
        let mut done = pending("req-3");
        done.status = SnapshotStatus::Completed;
        store
            .upsert_snapshot(done, UpsertOptions::default())
            .await
            .unwrap();

        let mut again = pending("req-3");
        again.status = SnapshotStatus::Running;
        let err = store
            .upsert_snapshot(again, UpsertOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::TerminalSnapshot { .. }));

        let got = store.get_snapshot("req-3").await.unwrap();
        assert_eq!(got.status, SnapshotStatus::Completed);
    })
    .await;
}

#[tokio::test]
async fn replace_terminal_allows_fresh_run_under_same_id() {
    for_each_backend(|store| async move {
        let mut failed = pending("req-4");
        failed.status = SnapshotStatus::Failed;
        failed.error = Some("boom".to_string());
        store
            .upsert_snapshot(failed, UpsertOptions::default())
            .await
            .unwrap();

        store
            .upsert_snapshot(pending("req-4"), UpsertOptions::replacing_terminal())
            .await
            .unwrap();

        let got = store.get_snapshot("req-4").await.unwrap();
        assert_eq!(got.status, SnapshotStatus::Pending);
        assert!(got.error.is_none());
    })
    .await;
}

#[tokio::test]
async fn delete_removes_and_is_idempotent() {
    for_each_backend(|store| async move {
        store
            .upsert_snapshot(pending("req-5"), UpsertOptions::default())
            .await
            .unwrap();
        store.delete_snapshot("req-5").await.unwrap();
        store.delete_snapshot("req-5").await.unwrap();
        store.delete_snapshot("never-existed").await.unwrap();

        assert!(matches!(
            store.get_snapshot("req-5").await.unwrap_err(),
            StorageError::NotFound { .. }
        ));
    })
    .await;
}

#[tokio::test]
async fn list_filters_by_status_and_orders_by_request_id() {
    for_each_backend(|store| async move {
        for (id, status) in [
            ("b", SnapshotStatus::Completed),
            ("a", SnapshotStatus::Completed),
            ("c", SnapshotStatus::Failed),
        ] {
            let mut snap = pending(id);
            snap.status = status;
            store
                .upsert_snapshot(snap, UpsertOptions::default())
                .await
                .unwrap();
        }

        let all = store.list_snapshots(None).await.unwrap();
        let ids: Vec<_> = all.iter().map(|s| s.request_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        let completed = store
            .list_snapshots(Some(SnapshotStatus::Completed))
            .await
            .unwrap();
        assert_eq!(completed.len(), 2);
        assert!(completed.iter().all(|s| s.status == SnapshotStatus::Completed));
    })
    .await;
}
