//! Workflow engine: dependency-ordered execution with retries, audit trail
//! and snapshot persistence.

use std::any::Any;
use std::collections::{BTreeMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use axon_state::{
    Snapshot, SnapshotStatus, SnapshotStore, StepAudit, StepStatus, UpsertOptions,
};
use chrono::Utc;
use futures::FutureExt;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::action::JsonMap;
use crate::error::{ActionError, RunFailure, WorkflowError, WorkflowResult};
use crate::spec::{OnError, OutputEnv, Step, StepEnv, WorkflowSpec};
use crate::telemetry::{StepEvent, TracingTelemetry, WorkflowTelemetry};

/// Where and under which id a run's snapshots are written.
#[derive(Clone)]
pub struct Persistence {
    pub store: Arc<dyn SnapshotStore>,
    pub request_id: String,
}

impl Persistence {
    pub fn new(store: Arc<dyn SnapshotStore>, request_id: impl Into<String>) -> Self {
        Self {
            store,
            request_id: request_id.into(),
        }
    }
}

impl std::fmt::Debug for Persistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Persistence")
            .field("request_id", &self.request_id)
            .finish()
    }
}

/// Successful run payload.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub workflow: String,
    pub request_id: Option<String>,
    pub results: BTreeMap<String, Value>,
    pub outputs: JsonMap,
    pub audit_trail: Vec<StepAudit>,
}

impl RunReport {
    /// Steps whose result is error-tagged (continued past).
    pub fn continued_errors(&self) -> Vec<&str> {
        self.audit_trail
            .iter()
            .filter(|a| a.status == StepStatus::Error)
            .map(|a| a.step_id.as_str())
            .collect()
    }
}

/// Executes [`WorkflowSpec`]s.
///
/// The engine is stateless between runs; each call to [`execute`](Self::execute)
/// owns its execution state exclusively.
#[derive(Clone)]
pub struct WorkflowEngine {
    telemetry: Arc<dyn WorkflowTelemetry>,
}

impl Default for WorkflowEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowEngine {
    pub fn new() -> Self {
        Self {
            telemetry: Arc::new(TracingTelemetry),
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn WorkflowTelemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Run `spec` to completion or to its first halting failure.
    ///
    /// Ready steps execute one at a time in declaration order. With
    /// `persistence`, a `pending` snapshot is written first, a `running`
    /// snapshot after every step and a terminal one at the end.
    pub async fn execute(
        &self,
        spec: &WorkflowSpec,
        input: Value,
        context: JsonMap,
        persistence: Option<&Persistence>,
    ) -> WorkflowResult<RunReport> {
        if let Some(p) = persistence {
            if p.request_id.trim().is_empty() {
                return Err(WorkflowError::MissingRequestId);
            }
        }

        let mut run = Run {
            spec,
            input,
            context,
            persistence,
            results: BTreeMap::new(),
            audit_trail: Vec::new(),
        };

        info!(
            workflow = %spec.name(),
            version = %spec.version(),
            request_id = ?persistence.map(|p| p.request_id.as_str()),
            "Starting workflow run"
        );
        run.checkpoint(SnapshotStatus::Pending, None, None).await?;

        let mut completed: HashSet<String> = HashSet::new();
        let mut remaining: Vec<&Step> = spec.steps().iter().collect();

        while !remaining.is_empty() {
            let (ready, blocked): (Vec<&Step>, Vec<&Step>) = remaining
                .into_iter()
                .partition(|s| s.requires.iter().all(|r| completed.contains(r)));

            if ready.is_empty() {
                let blocked: Vec<String> = blocked.iter().map(|s| s.id.clone()).collect();
                let reason = format!("unsatisfiable dependency graph; blocked steps: {blocked:?}");
                warn!(workflow = %spec.name(), blocked = ?blocked, "Workflow graph cannot make progress");
                run.checkpoint(SnapshotStatus::Failed, None, Some(reason))
                    .await?;
                return Err(WorkflowError::UnsatisfiableGraph {
                    workflow: spec.name().to_string(),
                    blocked,
                    results: run.results,
                    audit_trail: run.audit_trail,
                });
            }
            remaining = blocked;

            for step in ready {
                let outcome = self.run_step(&run, step).await;
                let attempts = outcome.audit.attempts;
                run.audit_trail.push(outcome.audit);

                match outcome.result {
                    Ok(value) => {
                        run.results.insert(step.id.clone(), value);
                    }
                    Err(err) if step.on_error == OnError::Continue => {
                        debug!(step_id = %step.id, error = %err.reason, "Continuing past failed step");
                        run.results.insert(
                            step.id.clone(),
                            json!({"status": "error", "error": err.reason}),
                        );
                    }
                    Err(err) => {
                        run.checkpoint(
                            SnapshotStatus::Failed,
                            Some((step.id.as_str(), attempts)),
                            Some(err.reason.clone()),
                        )
                        .await?;
                        warn!(
                            workflow = %spec.name(),
                            step_id = %step.id,
                            attempts,
                            error = %err.reason,
                            "Workflow halted"
                        );
                        return Err(WorkflowError::StepFailed(Box::new(RunFailure {
                            failed_step: step.id.clone(),
                            error: err.reason,
                            attempts,
                            results: run.results,
                            audit_trail: run.audit_trail,
                        })));
                    }
                }

                completed.insert(step.id.clone());
                run.checkpoint(
                    SnapshotStatus::Running,
                    Some((step.id.as_str(), attempts)),
                    None,
                )
                .await?;
            }
        }

        let outputs = run.project_outputs();
        run.checkpoint(SnapshotStatus::Completed, None, None).await?;
        info!(
            workflow = %spec.name(),
            steps = run.audit_trail.len(),
            "Workflow completed"
        );

        Ok(RunReport {
            workflow: spec.name().to_string(),
            request_id: persistence.map(|p| p.request_id.clone()),
            results: run.results,
            outputs,
            audit_trail: run.audit_trail,
        })
    }

    async fn run_step(&self, run: &Run<'_>, step: &Step) -> StepOutcome {
        let started_at = Utc::now();
        let clock = Instant::now();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let event = StepEvent {
                workflow: run.spec.name(),
                step_id: &step.id,
                action: step.action_name(),
                attempt,
            };

            let params = step.params.resolve(&StepEnv {
                input: &run.input,
                results: &run.results,
                context: &run.context,
                step,
                spec: run.spec,
            });

            self.telemetry.step_start(&event);
            let attempt_clock = Instant::now();
            let result = AssertUnwindSafe(step.action.run(&params, &run.context))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(ActionError::new(panic_reason(panic))));

            match result {
                Ok(value) => {
                    self.telemetry.step_stop(&event, attempt_clock.elapsed());
                    return StepOutcome::finish(step, attempt, started_at, clock, Ok(value));
                }
                Err(err) => {
                    self.telemetry.step_exception(&event, &err.reason);
                    if attempt >= step.retry.max_attempts {
                        return StepOutcome::finish(step, attempt, started_at, clock, Err(err));
                    }
                    debug!(step_id = %step.id, attempt, error = %err.reason, "Retrying step");
                    if !step.retry.backoff.is_zero() {
                        tokio::time::sleep(step.retry.backoff).await;
                    }
                }
            }
        }
    }
}

/// Execution state owned by one run.
struct Run<'a> {
    spec: &'a WorkflowSpec,
    input: Value,
    context: JsonMap,
    persistence: Option<&'a Persistence>,
    results: BTreeMap<String, Value>,
    audit_trail: Vec<StepAudit>,
}

impl Run<'_> {
    async fn checkpoint(
        &self,
        status: SnapshotStatus,
        last: Option<(&str, u32)>,
        error: Option<String>,
    ) -> WorkflowResult<()> {
        let Some(persistence) = self.persistence else {
            return Ok(());
        };

        let mut snapshot = Snapshot::pending(
            persistence.request_id.clone(),
            self.spec.name(),
            self.spec.version(),
            self.input.clone(),
            self.context.clone(),
        );
        snapshot.status = status;
        snapshot.results = self.results.clone();
        snapshot.audit_trail = self.audit_trail.clone();
        snapshot.last_step_id = last.map(|(id, _)| id.to_string());
        snapshot.last_attempt = last.map(|(_, n)| n);
        snapshot.error = error;

        // A fresh run may reuse the id of a finished one.
        let options = if status == SnapshotStatus::Pending {
            UpsertOptions::replacing_terminal()
        } else {
            UpsertOptions::default()
        };
        persistence.store.upsert_snapshot(snapshot, options).await?;
        Ok(())
    }

    fn project_outputs(&self) -> JsonMap {
        let env = OutputEnv {
            input: &self.input,
            results: &self.results,
            context: &self.context,
        };
        self.spec
            .outputs()
            .iter()
            .map(|output| {
                let source = self.results.get(&output.from).unwrap_or(&Value::Null);
                (output.key.clone(), output.project(source, &env))
            })
            .collect()
    }
}

struct StepOutcome {
    result: Result<Value, ActionError>,
    audit: StepAudit,
}

impl StepOutcome {
    fn finish(
        step: &Step,
        attempts: u32,
        started_at: chrono::DateTime<Utc>,
        clock: Instant,
        result: Result<Value, ActionError>,
    ) -> Self {
        let audit = StepAudit {
            step_id: step.id.clone(),
            action: step.action_name().to_string(),
            status: if result.is_ok() {
                StepStatus::Ok
            } else {
                StepStatus::Error
            },
            attempts,
            started_at,
            finished_at: Utc::now(),
            duration_ms: clock.elapsed().as_millis() as u64,
            error: result.as_ref().err().map(|e| e.reason.clone()),
        };
        Self { result, audit }
    }
}

fn panic_reason(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("action panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("action panicked: {s}")
    } else {
        "action panicked".to_string()
    }
}
