//! Structured logging utilities
//!
//! One function per lifecycle event so that field names stay stable across
//! the dispatcher, the recovery protocol and the coordinator.

use std::net::SocketAddr;
use std::time::Duration;

use tracing::{error, info, warn};

/// Structured logging utilities
pub struct StructuredLogger;

impl StructuredLogger {
    /// Log a batch handed to a worker
    pub fn log_batch_dispatched(worker: SocketAddr, batch_size: usize, window: usize) {
        info!(
            event = "batch_dispatched",
            worker.endpoint = %worker,
            batch.size = batch_size,
            worker.window = window,
            "Batch dispatched to worker"
        );
    }

    /// Log a batch whose results arrived intact
    pub fn log_batch_completed(
        worker: SocketAddr,
        batch_size: usize,
        round_trip: Duration,
        timeout: Duration,
    ) {
        info!(
            event = "batch_completed",
            worker.endpoint = %worker,
            batch.size = batch_size,
            round_trip_ms = round_trip.as_millis() as u64,
            worker.timeout_ms = timeout.as_millis() as u64,
            "Batch completed"
        );
    }

    /// Log a failed round trip
    pub fn log_batch_failed(worker: SocketAddr, batch_size: usize, reason: &str) {
        warn!(
            event = "batch_failed",
            worker.endpoint = %worker,
            batch.size = batch_size,
            reason = reason,
            "Batch failed, tasks will be requeued"
        );
    }

    pub fn log_worker_probing(worker: SocketAddr, recoveries: u32) {
        warn!(
            event = "worker_probing",
            worker.endpoint = %worker,
            worker.recoveries = recoveries,
            "Probing unresponsive worker"
        );
    }

    pub fn log_worker_recovered(worker: SocketAddr, window: usize) {
        info!(
            event = "worker_recovered",
            worker.endpoint = %worker,
            worker.window = window,
            "Worker answered probe and rejoined the pool"
        );
    }

    pub fn log_worker_removed(worker: SocketAddr, reason: &str) {
        error!(
            event = "worker_removed",
            worker.endpoint = %worker,
            reason = reason,
            "Worker removed from the pool"
        );
    }

    /// Log the end of a run
    pub fn log_run_concluded(submitted: usize, completed: usize, abandoned: usize, removed: usize) {
        if abandoned == 0 {
            info!(
                event = "run_concluded",
                run.submitted = submitted,
                run.completed = completed,
                run.removed_workers = removed,
                "Run completed"
            );
        } else {
            error!(
                event = "run_concluded",
                run.submitted = submitted,
                run.completed = completed,
                run.abandoned = abandoned,
                run.removed_workers = removed,
                "Run ended with unfinished tasks"
            );
        }
    }
}
