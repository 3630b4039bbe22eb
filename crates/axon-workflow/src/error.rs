//! Error types for workflow specs and runs.

use std::collections::BTreeMap;

use axon_state::{StepAudit, StorageError};

/// Errors raised while building a [`crate::spec::WorkflowSpec`].
///
/// These are configuration errors: they are reported at build time and never
/// retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpecError {
    #[error("workflow name must not be empty")]
    EmptyName,

    #[error("workflow {workflow} declares no steps")]
    EmptySteps { workflow: String },

    #[error("duplicate step id '{step}' in workflow {workflow}")]
    DuplicateStep { workflow: String, step: String },

    #[error("step '{step}' requires unknown step '{missing}'")]
    UnknownDependency { step: String, missing: String },

    #[error("output '{key}' projects from unknown step '{from}'")]
    UnknownOutputSource { key: String, from: String },

    #[error("duplicate output key '{key}'")]
    DuplicateOutput { key: String },

    #[error("step '{step}' has invalid retry policy: {reason}")]
    InvalidRetry { step: String, reason: String },

    #[error("unknown action '{action}'")]
    UnknownAction { action: String },

    #[error("action '{action}' is already registered")]
    DuplicateAction { action: String },
}

/// Failure reported by an [`crate::action::Action`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct ActionError {
    pub reason: String,
}

impl ActionError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for ActionError {
    fn from(err: serde_json::Error) -> Self {
        ActionError::new(format!("payload error: {err}"))
    }
}

/// Structured failure of a halting step.
#[derive(Debug, Clone)]
pub struct RunFailure {
    pub failed_step: String,
    pub error: String,
    pub attempts: u32,
    /// Results accumulated before the failing step.
    pub results: BTreeMap<String, serde_json::Value>,
    pub audit_trail: Vec<StepAudit>,
}

/// Errors produced by [`crate::engine::WorkflowEngine::execute`].
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// A step with `on_error: halt` exhausted its attempts.
    #[error("step '{}' failed after {} attempt(s): {}", .0.failed_step, .0.attempts, .0.error)]
    StepFailed(Box<RunFailure>),

    /// No remaining step can ever become ready (cycle or unsatisfiable requires).
    #[error("workflow {workflow} has an unsatisfiable dependency graph; blocked steps: {blocked:?}")]
    UnsatisfiableGraph {
        workflow: String,
        blocked: Vec<String>,
        /// Results of the steps that ran before the graph stalled.
        results: BTreeMap<String, serde_json::Value>,
        audit_trail: Vec<StepAudit>,
    },

    #[error("persistence is enabled but no request_id was supplied")]
    MissingRequestId,

    #[error("snapshot persistence failed: {0}")]
    Persistence(#[from] StorageError),
}

impl WorkflowError {
    /// The structured step failure, when this error is one.
    pub fn as_failure(&self) -> Option<&RunFailure> {
        match self {
            WorkflowError::StepFailed(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Result type for spec construction.
pub type SpecResult<T> = std::result::Result<T, SpecError>;

/// Result type for workflow runs.
pub type WorkflowResult<T> = std::result::Result<T, WorkflowError>;
