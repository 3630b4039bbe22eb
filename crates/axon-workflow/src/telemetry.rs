//! Step telemetry hooks.
//!
//! This is the engine's only coupling to an observability backend. The
//! default [`TracingTelemetry`] emits structured `tracing` events.

use std::time::Duration;

use tracing::{info, warn};

/// Identity of one step attempt.
#[derive(Debug, Clone, Copy)]
pub struct StepEvent<'a> {
    pub workflow: &'a str,
    pub step_id: &'a str,
    pub action: &'a str,
    pub attempt: u32,
}

pub trait WorkflowTelemetry: Send + Sync {
    fn step_start(&self, event: &StepEvent<'_>);

    fn step_stop(&self, event: &StepEvent<'_>, duration: Duration);

    fn step_exception(&self, event: &StepEvent<'_>, error: &str);
}

/// Emits `workflow.step.*` tracing events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetry;

impl WorkflowTelemetry for TracingTelemetry {
    fn step_start(&self, event: &StepEvent<'_>) {
        info!(
            event = "workflow.step.start",
            workflow = %event.workflow,
            step_id = %event.step_id,
            action = %event.action,
            attempt = event.attempt,
        );
    }

    fn step_stop(&self, event: &StepEvent<'_>, duration: Duration) {
        info!(
            event = "workflow.step.stop",
            workflow = %event.workflow,
            step_id = %event.step_id,
            action = %event.action,
            attempt = event.attempt,
            duration_ms = duration.as_millis() as u64,
        );
    }

    fn step_exception(&self, event: &StepEvent<'_>, error: &str) {
        warn!(
            event = "workflow.step.exception",
            workflow = %event.workflow,
            step_id = %event.step_id,
            action = %event.action,
            attempt = event.attempt,
            error = %error,
        );
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl WorkflowTelemetry for NoopTelemetry {
    fn step_start(&self, _event: &StepEvent<'_>) {}

    fn step_stop(&self, _event: &StepEvent<'_>, _duration: Duration) {}

    fn step_exception(&self, _event: &StepEvent<'_>, _error: &str) {}
}
