//! Error types for the topic registry and signal bus.

use std::fmt;

/// One field that failed schema validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldViolation {
    pub field: String,
    pub reason: String,
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

/// A payload failed its topic's schema. Carries every violation, not just the first.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("payload for topic {topic} is invalid: {}", render(.violations))]
pub struct SchemaError {
    pub topic: String,
    pub violations: Vec<FieldViolation>,
}

fn render(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors produced by the registry and bus.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    #[error("topic not found: {topic}")]
    UnknownTopic { topic: String },

    #[error("no topic registered for wire type {wire_type}")]
    UnknownWireType { wire_type: String },

    #[error("topic already registered: {topic}")]
    AlreadyRegistered { topic: String },

    #[error("wire type {wire_type} is already used by topic {topic}")]
    WireTypeTaken { wire_type: String, topic: String },

    #[error(transparent)]
    Validation(#[from] SchemaError),

    #[error("malformed wire signal: {0}")]
    InvalidWire(#[from] serde_json::Error),

    #[error("failed to load topic definitions from {path}: {reason}")]
    StaticConfig { path: String, reason: String },
}

/// Result type for registry and bus operations.
pub type SignalResult<T> = std::result::Result<T, SignalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_error_lists_every_violation() {
        let err = SchemaError {
            topic: "review.request".to_string(),
            violations: vec![
                FieldViolation {
                    field: "files_changed".to_string(),
                    reason: "required field missing".to_string(),
                },
                FieldViolation {
                    field: "labels".to_string(),
                    reason: "expected array".to_string(),
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("files_changed: required field missing"));
        assert!(msg.contains("labels: expected array"));
    }
}
