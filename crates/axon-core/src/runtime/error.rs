//! Error types for agent configuration and the runtime.

use axon_workflow::{SpecError, WorkflowError};

use crate::signal::SignalError;

/// Agent configuration errors. Reported at load time and never retried.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read agent config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse agent config {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("duplicate agent id: {agent}")]
    DuplicateAgent { agent: String },

    #[error("agent {agent}: {field} must not be empty")]
    MissingField { agent: String, field: &'static str },

    #[error("agent {agent} references unknown topic {topic}")]
    UnknownTopic { agent: String, topic: String },

    #[error("agent {agent}: role {role} topic {topic} is neither subscribed nor emitted")]
    RoleNotDeclared {
        agent: String,
        role: String,
        topic: String,
    },

    #[error("agent {agent} is missing required role {role}")]
    MissingRole { agent: String, role: &'static str },

    #[error("agent {agent}: {source}")]
    Action {
        agent: String,
        #[source]
        source: SpecError,
    },

    #[error("agent {agent} references unknown {kind} hook {name}")]
    UnknownHook {
        agent: String,
        kind: &'static str,
        name: String,
    },

    #[error("orchestrator {agent} spawns unknown specialist {specialist}")]
    UnknownSpecialist { agent: String, specialist: String },

    #[error("orchestrator {agent} has no orchestration block")]
    MissingOrchestration { agent: String },
}

/// Errors surfaced by [`crate::runtime::AgentRuntime`].
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Signal(#[from] SignalError),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;
