//! Specialist agent loop: run the action set on each request, publish a report.

use std::sync::Arc;

use axon_state::{SnapshotStore, StepStatus};
use axon_workflow::{JsonMap, Persistence, WorkflowEngine};
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use super::config::SpecialistPlan;
use super::finding::{sort_findings, ActionOutput, Finding, Severity, SpecialistReport};
use crate::signal::{PublishOptions, Signal, SignalBus};

/// Concern used for findings synthesized from failed actions.
pub const ACTION_ERROR: &str = "action_error";

struct Job {
    request_id: String,
    payload: JsonMap,
}

pub(crate) struct SpecialistWorker {
    pub agent_id: String,
    pub plan: SpecialistPlan,
    pub bus: Arc<SignalBus>,
    pub engine: WorkflowEngine,
    pub store: Option<Arc<dyn SnapshotStore>>,
}

impl SpecialistWorker {
    /// Process signals one at a time until shutdown or until every
    /// subscription feeding the mailbox is gone.
    pub async fn run(
        self,
        mut mailbox: mpsc::UnboundedReceiver<Signal>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                next = mailbox.recv() => match next {
                    Some(signal) => self.handle(signal).await,
                    None => break,
                },
            }
        }
        debug!(agent_id = %self.agent_id, "Specialist loop exited");
    }

    async fn handle(&self, signal: Signal) {
        let Some(job) = self.accept(&signal) else {
            return;
        };
        let report = self.evaluate(&job).await;

        let payload = match serde_json::to_value(&report) {
            Ok(v) => v,
            Err(err) => {
                warn!(agent_id = %self.agent_id, error = %err, "Failed to encode report");
                return;
            }
        };
        if let Err(err) = self.bus.publish(
            &self.plan.result_topic,
            payload,
            PublishOptions::from_source(&self.agent_id),
        ) {
            warn!(agent_id = %self.agent_id, request_id = %job.request_id, error = %err, "Failed to publish result");
        }
    }

    /// Unwrap a dispatch envelope addressed to this agent, or take a raw request.
    fn accept(&self, signal: &Signal) -> Option<Job> {
        if signal.wire_type != self.plan.request_wire_type {
            return None;
        }
        let data = &signal.data;
        let request_id = data
            .get("request_id")
            .and_then(Value::as_str)
            .unwrap_or(&signal.id)
            .to_string();

        if let Some(Value::Object(payload)) = data.get("payload") {
            if let Some(Value::Array(targets)) = data.get("specialists") {
                if !targets.iter().any(|t| t.as_str() == Some(self.agent_id.as_str())) {
                    return None;
                }
            }
            return Some(Job {
                request_id,
                payload: payload.clone(),
            });
        }

        Some(Job {
            request_id,
            payload: data.clone(),
        })
    }

    async fn evaluate(&self, job: &Job) -> SpecialistReport {
        let mut context = JsonMap::new();
        context.insert("agent_id".to_string(), json!(self.agent_id));
        context.insert("request_id".to_string(), json!(job.request_id));

        let persistence = self.store.as_ref().map(|store| {
            Persistence::new(
                Arc::clone(store),
                format!("{}:{}", self.agent_id, job.request_id),
            )
        });

        let mut findings = Vec::new();
        let mut recommendations: Vec<String> = Vec::new();
        let mut degraded = false;

        match self
            .engine
            .execute(
                &self.plan.workflow,
                Value::Object(job.payload.clone()),
                context,
                persistence.as_ref(),
            )
            .await
        {
            Ok(run) => {
                for audit in &run.audit_trail {
                    if audit.status == StepStatus::Error {
                        degraded = true;
                        findings.push(action_error(
                            &audit.action,
                            audit.error.as_deref().unwrap_or("unknown error"),
                        ));
                        continue;
                    }
                    let value = run.results.get(&audit.step_id).cloned().unwrap_or(Value::Null);
                    if value.is_null() {
                        continue;
                    }
                    match serde_json::from_value::<ActionOutput>(value) {
                        Ok(out) => {
                            findings.extend(out.findings);
                            recommendations.extend(out.recommendations);
                        }
                        Err(err) => {
                            degraded = true;
                            findings.push(action_error(
                                &audit.action,
                                &format!("unreadable result: {err}"),
                            ));
                        }
                    }
                }
            }
            Err(err) => {
                warn!(agent_id = %self.agent_id, request_id = %job.request_id, error = %err, "Action set failed");
                degraded = true;
                findings.push(action_error(self.plan.workflow.name(), &err.to_string()));
            }
        }

        for finding in &mut findings {
            finding.agent = self.agent_id.clone();
        }
        sort_findings(&mut findings);
        let mut unique = Vec::with_capacity(recommendations.len());
        for rec in recommendations {
            if !unique.contains(&rec) {
                unique.push(rec);
            }
        }

        SpecialistReport {
            request_id: job.request_id.clone(),
            agent: self.agent_id.clone(),
            status: if degraded { "degraded" } else { "ok" }.to_string(),
            findings,
            recommendations: unique,
        }
    }
}

fn action_error(action: &str, reason: &str) -> Finding {
    Finding::new(
        ACTION_ERROR,
        Severity::Medium,
        format!("action {action} failed: {reason}"),
    )
}
