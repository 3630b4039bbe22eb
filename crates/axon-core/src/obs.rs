//! Structured observability hooks for bus and agent lifecycle events.
//!
//! Every emitter logs a single event carrying an `event = "..."` field so
//! that JSON log pipelines can filter on it.

use tracing::{info, warn};

/// RAII guard that enters an agent-scoped tracing span.
///
/// ```ignore
/// let _span = AgentSpan::enter("security", "specialist");
/// // tracing calls below carry agent_id = "security"
/// ```
pub struct AgentSpan {
    _span: tracing::span::EnteredSpan,
}

impl AgentSpan {
    pub fn enter(agent_id: &str, kind: &str) -> Self {
        let span = tracing::info_span!("axon.agent", agent_id = %agent_id, kind = %kind);
        Self {
            _span: span.entered(),
        }
    }
}

pub fn emit_signal_published(topic: &str, signal_id: &str, source: &str, delivered: usize) {
    info!(
        event = "signal.published",
        topic = %topic,
        signal_id = %signal_id,
        source = %source,
        delivered = delivered,
    );
}

pub fn emit_signal_rejected(topic: &str, error: &dyn std::fmt::Display) {
    warn!(event = "signal.rejected", topic = %topic, error = %error);
}

pub fn emit_agent_spawned(agent_id: &str, kind: &str, subscriptions: usize) {
    info!(
        event = "agent.spawned",
        agent_id = %agent_id,
        kind = %kind,
        subscriptions = subscriptions,
    );
}

pub fn emit_agent_stopped(agent_id: &str, reason: &str) {
    info!(event = "agent.stopped", agent_id = %agent_id, reason = %reason);
}

pub fn emit_agent_restarted(agent_id: &str, restarts: u32) {
    warn!(event = "agent.restarted", agent_id = %agent_id, restarts = restarts);
}

/// Emit event: an orchestrator published its summary.
pub fn emit_summary_emitted(
    agent_id: &str,
    request_id: &str,
    status: &str,
    responded: usize,
    expected: usize,
) {
    info!(
        event = "summary.emitted",
        agent_id = %agent_id,
        request_id = %request_id,
        status = %status,
        responded = responded,
        expected = expected,
    );
}
