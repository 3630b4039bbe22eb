//! Axon-State: snapshot persistence for Axon workflow runs
//!
//! This crate provides the persistence port the workflow engine writes
//! progress snapshots through, plus two adapters.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: one durable record per request id, upserted at every step boundary.
//!
//! ## Key Components
//!
//! - `SnapshotStore`: the three-operation port (upsert / get / delete) plus listing
//! - `Snapshot`: run status, input, context, results, audit trail
//! - `MemorySnapshotStore`: in-memory fake
//! - `FsSnapshotStore`: JSON documents on disk, written atomically

mod error;
pub mod fakes;
pub mod fs_store;
pub mod storage_traits;

pub use error::StorageError;
pub use fakes::MemorySnapshotStore;
pub use fs_store::FsSnapshotStore;
pub use storage_traits::{
    ContentDigest, Snapshot, SnapshotStatus, SnapshotStore, StepAudit, StepStatus, StorageResult,
    UpsertOptions,
};
