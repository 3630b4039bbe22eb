//! Global atomic counters for Axon observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. on runtime shutdown).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters: no allocations, no locking.
pub struct Metrics {
    signals_published: AtomicU64,
    signals_rejected: AtomicU64,
    agents_spawned: AtomicU64,
    agents_restarted: AtomicU64,
    summaries_emitted: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            signals_published: AtomicU64::new(0),
            signals_rejected: AtomicU64::new(0),
            agents_spawned: AtomicU64::new(0),
            agents_restarted: AtomicU64::new(0),
            summaries_emitted: AtomicU64::new(0),
        }
    }

    pub fn inc_signals_published(&self) {
        self.signals_published.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "signals_published", "counter incremented");
    }

    pub fn inc_signals_rejected(&self) {
        self.signals_rejected.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "signals_rejected", "counter incremented");
    }

    pub fn inc_agents_spawned(&self) {
        self.agents_spawned.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "agents_spawned", "counter incremented");
    }

    pub fn inc_agents_restarted(&self) {
        self.agents_restarted.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "agents_restarted", "counter incremented");
    }

    pub fn inc_summaries_emitted(&self) {
        self.summaries_emitted.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "summaries_emitted", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            signals_published = self.signals_published(),
            signals_rejected = self.signals_rejected(),
            agents_spawned = self.agents_spawned(),
            agents_restarted = self.agents_restarted(),
            summaries_emitted = self.summaries_emitted(),
        );
    }

    pub fn signals_published(&self) -> u64 {
        self.signals_published.load(Ordering::Relaxed)
    }

    pub fn signals_rejected(&self) -> u64 {
        self.signals_rejected.load(Ordering::Relaxed)
    }

    pub fn agents_spawned(&self) -> u64 {
        self.agents_spawned.load(Ordering::Relaxed)
    }

    pub fn agents_restarted(&self) -> u64 {
        self.agents_restarted.load(Ordering::Relaxed)
    }

    pub fn summaries_emitted(&self) -> u64 {
        self.summaries_emitted.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.signals_published.store(0, Ordering::Relaxed);
        self.signals_rejected.store(0, Ordering::Relaxed);
        self.agents_spawned.store(0, Ordering::Relaxed);
        self.agents_restarted.store(0, Ordering::Relaxed);
        self.summaries_emitted.store(0, Ordering::Relaxed);
    }
}
