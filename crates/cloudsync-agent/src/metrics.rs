//! Metrics for synchronization pipelines.
//!
//! Emitted through the `metrics` facade; install any recorder (Prometheus,
//! statsd) in the binary to export them.
//!
//! - Cycle counters and durations per agent
//! - Entities loaded per namespace
//! - On-demand stored / kept / evicted

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge, histogram};

/// Metrics handle shared by the pipelines of one process.
#[derive(Debug, Clone, Default)]
pub struct AgentMetrics {
    inner: Arc<AgentMetricsInner>,
}

#[derive(Debug, Default)]
struct AgentMetricsInner {
    cycles: AtomicU64,
    failed_cycles: AtomicU64,
}

impl AgentMetrics {
    /// Create a new metrics handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed load for one agent.
    pub fn cycle_completed(&self, agent: &str, duration: Duration) {
        self.inner.cycles.fetch_add(1, Ordering::Relaxed);
        counter!("cloudsync_cycles_total", "agent" => agent.to_string()).increment(1);
        histogram!("cloudsync_cycle_duration_seconds", "agent" => agent.to_string())
            .record(duration.as_secs_f64());
    }

    /// Record a failed load for one agent.
    pub fn cycle_failed(&self, agent: &str) {
        self.inner.failed_cycles.fetch_add(1, Ordering::Relaxed);
        counter!("cloudsync_cycles_failed_total", "agent" => agent.to_string()).increment(1);
    }

    /// Record how many entities were installed into a namespace.
    pub fn entities_loaded(&self, namespace: &str, count: usize) {
        gauge!("cloudsync_entities", "namespace" => namespace.to_string()).set(count as f64);
    }

    /// Record an on-demand entry written.
    pub fn on_demand_stored(&self, namespace: &str) {
        counter!("cloudsync_on_demand_stored_total", "namespace" => namespace.to_string())
            .increment(1);
    }

    /// Record the outcome of a reconcile pass.
    pub fn on_demand_reconciled(&self, agent: &str, kept: usize, evicted: usize) {
        counter!("cloudsync_on_demand_kept_total", "agent" => agent.to_string())
            .increment(kept as u64);
        counter!("cloudsync_on_demand_evicted_total", "agent" => agent.to_string())
            .increment(evicted as u64);
    }

    /// Completed loads since start.
    pub fn cycles(&self) -> u64 {
        self.inner.cycles.load(Ordering::Relaxed)
    }

    /// Failed loads since start.
    pub fn failed_cycles(&self) -> u64 {
        self.inner.failed_cycles.load(Ordering::Relaxed)
    }
}
