use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::StorageError;
use crate::storage_traits::*;

/// Filesystem-backed snapshot store, one JSON document per request id.
///
/// Layout: `<root>/snapshots/<first 2 hex chars>/<remaining hex chars>.json`,
/// where the hex is the SHA-256 of the request id, so arbitrary ids map to
/// safe file names.
pub struct FsSnapshotStore {
    snapshots_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FsSnapshotStore {
    /// Create a new `FsSnapshotStore` rooted at `root`. Creates `root/snapshots/` if needed.
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let snapshots_dir = root.as_ref().join("snapshots");
        fs::create_dir_all(&snapshots_dir)?;
        Ok(Self {
            snapshots_dir,
            write_lock: Mutex::new(()),
        })
    }

    fn snapshot_path(&self, request_id: &str) -> PathBuf {
        let digest = ContentDigest::from_bytes(request_id.as_bytes());
        let hex = digest.as_str();
        self.snapshots_dir
            .join(&hex[..2])
            .join(format!("{}.json", &hex[2..]))
    }

    fn read(&self, path: &Path) -> StorageResult<Option<Snapshot>> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}

#[async_trait]
impl SnapshotStore for FsSnapshotStore {
    async fn upsert_snapshot(
        &self,
        mut snapshot: Snapshot,
        options: UpsertOptions,
    ) -> StorageResult<()> {
        snapshot.check()?;
        let _guard = self.write_lock.lock().await;

        let path = self.snapshot_path(&snapshot.request_id);
        let existing = self.read(&path)?;
        guard_terminal(existing.as_ref(), options)?;

        snapshot.updated_at = Utc::now();
        let bytes = serde_json::to_vec_pretty(&snapshot)?;

        let shard_dir = path.parent().ok_or_else(|| {
            StorageError::Backend(format!("snapshot path {} has no parent", path.display()))
        })?;
        fs::create_dir_all(shard_dir)?;

        // Atomic write: temp file in the same directory, then rename.
        let mut tmp = NamedTempFile::new_in(shard_dir)?;
        tmp.write_all(&bytes)?;
        tmp.persist(&path).map_err(|e| StorageError::Io(e.error))?;
        Ok(())
    }

    async fn get_snapshot(&self, request_id: &str) -> StorageResult<Snapshot> {
        self.read(&self.snapshot_path(request_id))?
            .ok_or_else(|| StorageError::NotFound {
                request_id: request_id.to_string(),
            })
    }

    async fn delete_snapshot(&self, request_id: &str) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        match fs::remove_file(self.snapshot_path(request_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn list_snapshots(
        &self,
        status: Option<SnapshotStatus>,
    ) -> StorageResult<Vec<Snapshot>> {
        let mut records = Vec::new();
        for shard in fs::read_dir(&self.snapshots_dir)? {
            let shard = shard?;
            if !shard.file_type()?.is_dir() {
                continue;
            }
            for entry in fs::read_dir(shard.path())? {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                match self.read(&path) {
                    Ok(Some(snap)) => {
                        if status.map(|st| snap.status == st).unwrap_or(true) {
                            records.push(snap);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "skipping unreadable snapshot");
                    }
                }
            }
        }
        records.sort_by(|a, b| a.request_id.cmp(&b.request_id));
        Ok(records)
    }
}
