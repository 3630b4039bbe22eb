//! Axon-Workflow - declarative workflow execution
//!
//! Provides the workflow layer Axon agents run their behaviour through:
//! - Validated, immutable step DAGs (`WorkflowSpec`)
//! - A generic `Action` contract and a name-keyed `ActionRegistry`
//! - A dependency-ordered engine with retries, continue/halt error policy
//!   and an audit trail
//! - Progress snapshots written through the `axon-state` persistence port

pub mod action;
pub mod engine;
pub mod error;
pub mod spec;
pub mod telemetry;

// Re-export key types
pub use action::{action_fn, Action, ActionRegistry, ActionResult, FnAction, JsonMap};
pub use engine::{Persistence, RunReport, WorkflowEngine};
pub use error::{ActionError, RunFailure, SpecError, SpecResult, WorkflowError, WorkflowResult};
pub use spec::{OnError, Output, OutputEnv, Params, RetryPolicy, Step, StepEnv, WorkflowSpec};
pub use telemetry::{NoopTelemetry, StepEvent, TracingTelemetry, WorkflowTelemetry};
