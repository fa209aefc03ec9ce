//! Metrics collector for the simulation dispatch engine
//!
//! Handles are registered once and shared by the dispatcher, the recovery
//! protocol and the coordinator. Without an installed recorder every call
//! is a no-op.

use std::time::Duration;

use metrics::{counter, gauge, histogram, Counter, Gauge, Histogram};
use tracing::debug;

/// Metrics collector for the simulation dispatch engine
#[derive(Clone)]
pub struct MetricsCollector {
    batches_dispatched_total: Counter,
    tasks_completed_total: Counter,
    tasks_requeued_total: Counter,
    worker_recoveries_total: Counter,
    workers_removed_total: Counter,

    active_workers: Gauge,
    pending_tasks: Gauge,

    round_trip_seconds: Histogram,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            batches_dispatched_total: counter!("simfarm_batches_dispatched_total"),
            tasks_completed_total: counter!("simfarm_tasks_completed_total"),
            tasks_requeued_total: counter!("simfarm_tasks_requeued_total"),
            worker_recoveries_total: counter!("simfarm_worker_recoveries_total"),
            workers_removed_total: counter!("simfarm_workers_removed_total"),
            active_workers: gauge!("simfarm_active_workers"),
            pending_tasks: gauge!("simfarm_pending_tasks"),
            round_trip_seconds: histogram!("simfarm_round_trip_seconds"),
        }
    }

    /// Record a batch handed to a worker
    pub fn record_batch_dispatched(&self, batch_size: usize) {
        self.batches_dispatched_total.increment(1);
        debug!(batch_size = batch_size, "Batch dispatched");
    }

    /// Record a successful round trip and the tasks it completed
    pub fn record_batch_completed(&self, completed: usize, round_trip: Duration) {
        self.tasks_completed_total.increment(completed as u64);
        self.round_trip_seconds.record(round_trip.as_secs_f64());
    }

    pub fn record_tasks_requeued(&self, count: usize) {
        self.tasks_requeued_total.increment(count as u64);
    }

    pub fn record_worker_recovered(&self) {
        self.worker_recoveries_total.increment(1);
    }

    pub fn record_worker_removed(&self) {
        self.workers_removed_total.increment(1);
    }

    pub fn update_active_workers(&self, count: usize) {
        self.active_workers.set(count as f64);
    }

    pub fn update_pending_tasks(&self, count: usize) {
        self.pending_tasks.set(count as f64);
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsCollector").finish_non_exhaustive()
    }
}
