//! Error types for axon-state

use thiserror::Error;

/// Errors that can occur in the snapshot persistence layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// No snapshot stored under the request id
    #[error("snapshot not found: {request_id}")]
    NotFound { request_id: String },

    /// Attempt to overwrite a completed or failed snapshot
    #[error("snapshot {request_id} is {status} and cannot be overwritten")]
    TerminalSnapshot { request_id: String, status: String },

    /// Snapshot failed a structural check before being written
    #[error("invalid snapshot: {reason}")]
    InvalidSnapshot { reason: String },

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Backend-specific failure (lock poisoning, adapter errors)
    #[error("storage backend error: {0}")]
    Backend(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_snapshot_error_names_request_and_status() {
        let err = StorageError::TerminalSnapshot {
            request_id: "req-42".to_string(),
            status: "completed".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("req-42"));
        assert!(msg.contains("completed"));
    }

    #[test]
    fn not_found_error_displays_request_id() {
        let err = StorageError::NotFound {
            request_id: "missing".to_string(),
        };
        assert!(err.to_string().contains("missing"));
    }
}
