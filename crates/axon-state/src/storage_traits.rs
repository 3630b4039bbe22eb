//! Storage trait definitions for Axon
//!
//! These types define the persistence port consumed by the workflow engine:
//! - `Snapshot`: durable, resumable record of one workflow run
//! - `SnapshotStore`: upsert / get / delete by request id
//!
//! The trait is async and backend-agnostic. An in-memory fake lives in the
//! `fakes` module and a filesystem adapter in `fs_store`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// ContentDigest
// ---------------------------------------------------------------------------

/// Content digest (SHA-256 hex string).
///
/// Used for workflow spec versions and for mapping request ids onto
/// filesystem-safe names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentDigest(hex::encode(hasher.finalize()))
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Snapshot model
// ---------------------------------------------------------------------------

/// Lifecycle status of a workflow run snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl SnapshotStatus {
    /// `true` for `Completed` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SnapshotStatus::Completed | SnapshotStatus::Failed)
    }
}

impl std::fmt::Display for SnapshotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SnapshotStatus::Pending => "pending",
            SnapshotStatus::Running => "running",
            SnapshotStatus::Completed => "completed",
            SnapshotStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for SnapshotStatus {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SnapshotStatus::Pending),
            "running" => Ok(SnapshotStatus::Running),
            "completed" => Ok(SnapshotStatus::Completed),
            "failed" => Ok(SnapshotStatus::Failed),
            other => Err(StorageError::InvalidSnapshot {
                reason: format!("unknown snapshot status '{other}'"),
            }),
        }
    }
}

/// Outcome of one step in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Ok,
    Error,
}

/// One audit trail entry, recorded once per executed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepAudit {
    pub step_id: String,
    /// Identity of the action that ran the step.
    pub action: String,
    pub status: StepStatus,
    /// Number of attempts made (1 = no retries used).
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Terminal error message when `status` is `Error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Durable record of a workflow run's progress.
///
/// One snapshot exists per `request_id`; the engine upserts it at every step
/// boundary and the terminal write sets `status` to `Completed` or `Failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub request_id: String,
    pub spec_name: String,
    pub spec_version: String,
    pub status: SnapshotStatus,
    pub input: serde_json::Value,
    pub context: serde_json::Map<String, serde_json::Value>,
    pub results: BTreeMap<String, serde_json::Value>,
    pub audit_trail: Vec<StepAudit>,
    pub last_step_id: Option<String>,
    pub last_attempt: Option<u32>,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Snapshot {
    /// Create a `Pending` snapshot with no progress recorded.
    pub fn pending(
        request_id: impl Into<String>,
        spec_name: impl Into<String>,
        spec_version: impl Into<String>,
        input: serde_json::Value,
        context: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            spec_name: spec_name.into(),
            spec_version: spec_version.into(),
            status: SnapshotStatus::Pending,
            input,
            context,
            results: BTreeMap::new(),
            audit_trail: Vec::new(),
            last_step_id: None,
            last_attempt: None,
            error: None,
            updated_at: Utc::now(),
        }
    }

    pub(crate) fn check(&self) -> StorageResult<()> {
        if self.request_id.trim().is_empty() {
            return Err(StorageError::InvalidSnapshot {
                reason: "request_id must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Options for [`SnapshotStore::upsert_snapshot`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertOptions {
    /// Allow overwriting a snapshot that is already `Completed` / `Failed`.
    ///
    /// Only a fresh run starting under a reused request id sets this.
    pub replace_terminal: bool,
}

impl UpsertOptions {
    pub fn replacing_terminal() -> Self {
        Self {
            replace_terminal: true,
        }
    }
}

/// Snapshot persistence port.
///
/// Guarantees:
/// - At most one snapshot per `request_id`; `upsert_snapshot` replaces it.
/// - A terminal snapshot is immutable unless `replace_terminal` is set.
/// - `delete_snapshot` is a no-op for an unknown id.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Insert or replace the snapshot keyed by `snapshot.request_id`.
    async fn upsert_snapshot(&self, snapshot: Snapshot, options: UpsertOptions)
        -> StorageResult<()>;

    /// Fetch a snapshot. Returns `StorageError::NotFound` if absent.
    async fn get_snapshot(&self, request_id: &str) -> StorageResult<Snapshot>;

    /// Remove a snapshot.
    async fn delete_snapshot(&self, request_id: &str) -> StorageResult<()>;

    /// List snapshots, optionally filtered by status, ordered by request id.
    async fn list_snapshots(&self, status: Option<SnapshotStatus>)
        -> StorageResult<Vec<Snapshot>>;
}

/// Shared terminal-overwrite guard used by every adapter.
pub(crate) fn guard_terminal(
    existing: Option<&Snapshot>,
    options: UpsertOptions,
) -> StorageResult<()> {
    match existing {
        Some(prev) if prev.status.is_terminal() && !options.replace_terminal => {
            Err(StorageError::TerminalSnapshot {
                request_id: prev.request_id.clone(),
                status: prev.status.to_string(),
            })
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_stable_and_short_form_is_prefix() {
        let a = ContentDigest::from_bytes(b"workflow");
        let b = ContentDigest::from_bytes(b"workflow");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert!(a.as_str().starts_with(a.short()));
    }

    #[test]
    fn status_terminality() {
        assert!(!SnapshotStatus::Pending.is_terminal());
        assert!(!SnapshotStatus::Running.is_terminal());
        assert!(SnapshotStatus::Completed.is_terminal());
        assert!(SnapshotStatus::Failed.is_terminal());
    }

    #[test]
    fn status_parses_from_display_form() {
        for status in [
            SnapshotStatus::Pending,
            SnapshotStatus::Running,
            SnapshotStatus::Completed,
            SnapshotStatus::Failed,
        ] {
            let parsed: SnapshotStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("paused".parse::<SnapshotStatus>().is_err());
    }

    #[test]
    fn snapshot_serializes_status_in_snake_case() {
        let snap = Snapshot::pending(
            "req-1",
            "review",
            "v1",
            serde_json::json!({"files_changed": 3}),
            serde_json::Map::new(),
        );
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["status"], "pending");
        assert_eq!(json["request_id"], "req-1");
    }

    #[test]
    fn guard_rejects_terminal_overwrite_without_flag() {
        let mut snap = Snapshot::pending("r", "s", "v", serde_json::Value::Null, Default::default());
        snap.status = SnapshotStatus::Completed;
        assert!(guard_terminal(Some(&snap), UpsertOptions::default()).is_err());
        assert!(guard_terminal(Some(&snap), UpsertOptions::replacing_terminal()).is_ok());
        assert!(guard_terminal(None, UpsertOptions::default()).is_ok());
    }
}
