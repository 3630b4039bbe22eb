//! In-memory fake for the snapshot store (testing and single-process use)
//!
//! `MemorySnapshotStore` satisfies the `SnapshotStore` contract without any
//! external dependencies.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StorageError;
use crate::storage_traits::*;

/// In-memory snapshot store backed by a `HashMap<request_id, Snapshot>`.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    snapshots: Mutex<HashMap<String, Snapshot>>,
    writes: Mutex<Vec<(String, SnapshotStatus)>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every accepted upsert as `(request_id, status)`, in write order.
    ///
    /// Lets tests assert the pending → running → terminal progression.
    pub fn write_log(&self) -> Vec<(String, SnapshotStatus)> {
        match self.writes.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, HashMap<String, Snapshot>>> {
        self.snapshots
            .lock()
            .map_err(|_| StorageError::Backend("snapshot map lock poisoned".to_string()))
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn upsert_snapshot(
        &self,
        mut snapshot: Snapshot,
        options: UpsertOptions,
    ) -> StorageResult<()> {
        snapshot.check()?;
        let mut snapshots = self.lock()?;
        guard_terminal(snapshots.get(&snapshot.request_id), options)?;

        snapshot.updated_at = Utc::now();
        let entry = (snapshot.request_id.clone(), snapshot.status);
        snapshots.insert(snapshot.request_id.clone(), snapshot);
        drop(snapshots);

        if let Ok(mut writes) = self.writes.lock() {
            writes.push(entry);
        }
        Ok(())
    }

    async fn get_snapshot(&self, request_id: &str) -> StorageResult<Snapshot> {
        let snapshots = self.lock()?;
        snapshots
            .get(request_id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                request_id: request_id.to_string(),
            })
    }

    async fn delete_snapshot(&self, request_id: &str) -> StorageResult<()> {
        let mut snapshots = self.lock()?;
        snapshots.remove(request_id);
        Ok(())
    }

    async fn list_snapshots(
        &self,
        status: Option<SnapshotStatus>,
    ) -> StorageResult<Vec<Snapshot>> {
        let snapshots = self.lock()?;
        let mut records: Vec<Snapshot> = snapshots
            .values()
            .filter(|s| status.map(|st| s.status == st).unwrap_or(true))
            .cloned()
            .collect();
        records.sort_by(|a, b| a.request_id.cmp(&b.request_id));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(id: &str, status: SnapshotStatus) -> Snapshot {
        let mut snap = Snapshot::pending(id, "spec", "v1", serde_json::json!({}), Default::default());
        snap.status = status;
        snap
    }

    #[tokio::test]
    async fn write_log_records_each_accepted_upsert() {
        let store = MemorySnapshotStore::new();
        store
            .upsert_snapshot(snapshot("a", SnapshotStatus::Pending), UpsertOptions::default())
            .await
            .unwrap();
        store
            .upsert_snapshot(snapshot("a", SnapshotStatus::Completed), UpsertOptions::default())
            .await
            .unwrap();
        // rejected: terminal
        let _ = store
            .upsert_snapshot(snapshot("a", SnapshotStatus::Running), UpsertOptions::default())
            .await;

        assert_eq!(
            store.write_log(),
            vec![
                ("a".to_string(), SnapshotStatus::Pending),
                ("a".to_string(), SnapshotStatus::Completed),
            ]
        );
    }

    #[tokio::test]
    async fn empty_request_id_is_rejected() {
        let store = MemorySnapshotStore::new();
        let err = store
            .upsert_snapshot(snapshot("  ", SnapshotStatus::Pending), UpsertOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidSnapshot { .. }));
    }
}
