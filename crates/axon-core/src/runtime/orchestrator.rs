//! Orchestrator agent loop: classify, dispatch, collect, negotiate, summarize.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::config::OrchestratorPlan;
use super::finding::{sort_findings, Finding, Severity, SpecialistReport};
use super::negotiation::{negotiate, NegotiationRecord};
use crate::metrics::METRICS;
use crate::obs;
use crate::signal::{PublishOptions, Signal, SignalBus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryStatus {
    /// Every expected specialist responded.
    Complete,
    /// Some, but not all, responded before the deadline.
    Partial,
    /// None responded.
    Failed,
}

impl SummaryStatus {
    pub fn from_counts(responded: usize, expected: usize) -> Self {
        if responded >= expected {
            SummaryStatus::Complete
        } else if responded == 0 {
            SummaryStatus::Failed
        } else {
            SummaryStatus::Partial
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SummaryStatus::Complete => "complete",
            SummaryStatus::Partial => "partial",
            SummaryStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for SummaryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryMetadata {
    #[serde(default)]
    pub negotiation: Vec<NegotiationRecord>,
    #[serde(default)]
    pub timed_out: bool,
    #[serde(default)]
    pub missing: Vec<String>,
    #[serde(default)]
    pub duration_ms: u64,
}

/// Payload of the summary signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub request_id: String,
    pub path: String,
    pub status: SummaryStatus,
    #[serde(default)]
    pub max_severity: Option<Severity>,
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub escalations: Vec<String>,
    #[serde(default)]
    pub responded: Vec<String>,
    #[serde(default)]
    pub expected: Vec<String>,
    #[serde(default)]
    pub metadata: SummaryMetadata,
}

impl Summary {
    /// Read a summary back from a signal's data.
    pub fn from_signal(signal: &Signal) -> Result<Self, serde_json::Error> {
        serde_json::from_value(Value::Object(signal.data.clone()))
    }
}

struct PendingRequest {
    path: String,
    expected: Vec<String>,
    reports: BTreeMap<String, SpecialistReport>,
    started: Instant,
    deadline: Instant,
}

pub(crate) struct OrchestratorWorker {
    pub agent_id: String,
    pub plan: OrchestratorPlan,
    pub bus: Arc<SignalBus>,
}

impl OrchestratorWorker {
    pub async fn run(
        self,
        mut mailbox: mpsc::UnboundedReceiver<Signal>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut pending: HashMap<String, PendingRequest> = HashMap::new();

        loop {
            let deadline = pending.values().map(|p| p.deadline).min();
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                next = mailbox.recv() => match next {
                    Some(signal) => self.on_signal(signal, &mut pending),
                    None => break,
                },
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.expire(&mut pending);
                }
            }
        }

        if !pending.is_empty() {
            warn!(agent_id = %self.agent_id, pending = pending.len(), "Orchestrator stopped with requests in flight");
        }
        debug!(agent_id = %self.agent_id, "Orchestrator loop exited");
    }

    fn on_signal(&self, signal: Signal, pending: &mut HashMap<String, PendingRequest>) {
        if signal.wire_type == self.plan.request_wire_type {
            self.on_request(signal, pending);
        } else if signal.wire_type == self.plan.result_wire_type {
            self.on_result(signal, pending);
        }
    }

    fn on_request(&self, signal: Signal, pending: &mut HashMap<String, PendingRequest>) {
        let request_id = signal
            .data
            .get("request_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| signal.id.clone());
        if pending.contains_key(&request_id) {
            warn!(agent_id = %self.agent_id, request_id = %request_id, "Duplicate request ignored");
            return;
        }

        let mut classification = (self.plan.classify)(&signal.data, &self.plan.specialists);
        classification.specialists =
            routable_specialists(&classification.specialists, &self.plan.specialists);
        info!(
            agent_id = %self.agent_id,
            request_id = %request_id,
            path = %classification.path,
            specialists = ?classification.specialists,
            "Classified request"
        );

        let now = Instant::now();
        let request = PendingRequest {
            path: classification.path.clone(),
            expected: classification.specialists.clone(),
            reports: BTreeMap::new(),
            started: now,
            deadline: now + self.plan.collect_timeout,
        };

        if request.expected.is_empty() {
            self.finalize(&request_id, request, false);
            return;
        }

        let dispatch = json!({
            "request_id": request_id,
            "path": classification.path,
            "specialists": classification.specialists,
            "payload": signal.data,
        });
        if let Err(err) = self.bus.publish(
            &self.plan.dispatch_topic,
            dispatch,
            PublishOptions::from_source(&self.agent_id),
        ) {
            warn!(agent_id = %self.agent_id, request_id = %request_id, error = %err, "Dispatch failed");
        }
        pending.insert(request_id, request);
    }

    fn on_result(&self, signal: Signal, pending: &mut HashMap<String, PendingRequest>) {
        let report: SpecialistReport = match serde_json::from_value(Value::Object(signal.data)) {
            Ok(r) => r,
            Err(err) => {
                warn!(agent_id = %self.agent_id, error = %err, "Unreadable specialist result");
                return;
            }
        };

        let Some(request) = pending.get_mut(&report.request_id) else {
            debug!(request_id = %report.request_id, agent = %report.agent, "Result for unknown or finished request");
            return;
        };
        if !request.expected.contains(&report.agent) {
            debug!(request_id = %report.request_id, agent = %report.agent, "Result from unexpected specialist");
            return;
        }
        request
            .reports
            .entry(report.agent.clone())
            .or_insert(report.clone());

        if request.reports.len() >= request.expected.len() {
            if let Some(done) = pending.remove(&report.request_id) {
                self.finalize(&report.request_id, done, false);
            }
        }
    }

    fn expire(&self, pending: &mut HashMap<String, PendingRequest>) {
        let now = Instant::now();
        let expired: Vec<String> = pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for request_id in expired {
            if let Some(request) = pending.remove(&request_id) {
                warn!(
                    agent_id = %self.agent_id,
                    request_id = %request_id,
                    responded = request.reports.len(),
                    expected = request.expected.len(),
                    "Specialist collection timed out"
                );
                self.finalize(&request_id, request, true);
            }
        }
    }

    fn finalize(&self, request_id: &str, request: PendingRequest, timed_out: bool) {
        let reports: Vec<SpecialistReport> = request
            .expected
            .iter()
            .filter_map(|agent| request.reports.get(agent).cloned())
            .collect();

        let negotiated = negotiate(&reports, self.plan.policy, &self.plan.specialists);
        for record in &negotiated.records {
            info!(
                agent_id = %self.agent_id,
                request_id = %request_id,
                concern = %record.concern,
                winning_agent = %record.winning_agent,
                policy = %record.resolution_policy,
                "Negotiated conflicting findings"
            );
        }

        let mut aggregate = (self.plan.aggregate)(&negotiated.reports);
        sort_findings(&mut aggregate.findings);
        dedupe_in_order(&mut aggregate.recommendations);
        let max_severity = aggregate.findings.iter().map(|f| f.severity).max();

        let responded: Vec<String> = reports.iter().map(|r| r.agent.clone()).collect();
        let missing: Vec<String> = request
            .expected
            .iter()
            .filter(|a| !request.reports.contains_key(*a))
            .cloned()
            .collect();
        let status = SummaryStatus::from_counts(responded.len(), request.expected.len());

        let mut escalations = Vec::new();
        if let Some(severity) = max_severity.filter(|s| *s >= self.plan.escalate_at) {
            let count = aggregate
                .findings
                .iter()
                .filter(|f| f.severity >= self.plan.escalate_at)
                .count();
            escalations.push(format!(
                "{count} finding(s) at or above {} (max {severity}) need human review",
                self.plan.escalate_at
            ));
        }
        if responded.is_empty() && !request.expected.is_empty() {
            escalations.push(format!(
                "no specialist responded for request {request_id} on path {}",
                request.path
            ));
        }

        let summary = Summary {
            request_id: request_id.to_string(),
            path: request.path,
            status,
            max_severity,
            findings: aggregate.findings,
            recommendations: aggregate.recommendations,
            escalations,
            responded,
            expected: request.expected,
            metadata: SummaryMetadata {
                negotiation: negotiated.records,
                timed_out,
                missing,
                duration_ms: request.started.elapsed().as_millis() as u64,
            },
        };

        let data = match serde_json::to_value(&summary) {
            Ok(v) => v,
            Err(err) => {
                warn!(agent_id = %self.agent_id, error = %err, "Failed to encode summary");
                return;
            }
        };
        match self.bus.publish(
            &self.plan.summary_topic,
            data,
            PublishOptions::from_source(&self.agent_id),
        ) {
            Ok(_) => {
                METRICS.inc_summaries_emitted();
                obs::emit_summary_emitted(
                    &self.agent_id,
                    request_id,
                    summary.status.as_str(),
                    summary.responded.len(),
                    summary.expected.len(),
                );
            }
            Err(err) => {
                warn!(agent_id = %self.agent_id, request_id = %request_id, error = %err, "Failed to publish summary");
            }
        }
    }
}

/// Classifier picks, in order, without repeats and limited to configured specialists.
fn routable_specialists(picked: &[String], configured: &[String]) -> Vec<String> {
    let mut routed: Vec<String> = Vec::with_capacity(picked.len());
    for agent in picked {
        if !configured.contains(agent) {
            warn!(agent = %agent, "Classifier picked an unconfigured specialist; skipping");
            continue;
        }
        if !routed.contains(agent) {
            routed.push(agent.clone());
        }
    }
    routed
}

fn dedupe_in_order(items: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    items.retain(|item| seen.insert(item.clone()));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn routable_specialists_drops_repeats_and_strangers() {
        let configured = names(&["security", "performance"]);
        assert_eq!(
            routable_specialists(&names(&["security", "ghost", "security", "performance"]), &configured),
            names(&["security", "performance"])
        );
        assert!(routable_specialists(&names(&["ghost"]), &configured).is_empty());
    }

    #[test]
    fn dedupe_keeps_first_occurrence() {
        let mut recs = names(&["x", "y", "x", "z", "y"]);
        dedupe_in_order(&mut recs);
        assert_eq!(recs, names(&["x", "y", "z"]));
    }

    #[test]
    fn status_from_counts() {
        assert_eq!(SummaryStatus::from_counts(2, 2), SummaryStatus::Complete);
        assert_eq!(SummaryStatus::from_counts(1, 2), SummaryStatus::Partial);
        assert_eq!(SummaryStatus::from_counts(0, 2), SummaryStatus::Failed);
        assert_eq!(SummaryStatus::from_counts(0, 0), SummaryStatus::Complete);
    }

    #[test]
    fn summary_reads_back_from_wire() {
        let summary: Summary = serde_json::from_value(json!({
            "request_id": "r1",
            "path": "fast_path",
            "status": "partial",
            "metadata": {"timed_out": true}
        }))
        .unwrap();
        assert_eq!(summary.status, SummaryStatus::Partial);
        assert!(summary.metadata.timed_out);
        assert!(summary.max_severity.is_none());
    }
}
