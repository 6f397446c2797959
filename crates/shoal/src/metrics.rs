//! Worker counters.
//!
//! Lock-free atomics shared between the worker task and whoever holds the
//! handle; readers take a consistent-enough [`snapshot`](WorkerMetrics::snapshot)
//! without stopping the worker.

use std::sync::atomic::{AtomicU64, Ordering};

/// Shared counters for one worker.
#[derive(Debug, Default)]
pub struct WorkerMetrics {
    records_emitted: AtomicU64,
    records_retried: AtomicU64,
    records_acked: AtomicU64,
    records_failed: AtomicU64,
    poison_records: AtomicU64,
    checkpoints_committed: AtomicU64,
    checkpoint_write_failures: AtomicU64,
    rebalances: AtomicU64,
}

impl WorkerMetrics {
    pub(crate) fn record_emit(&self, is_retry: bool) {
        self.records_emitted.fetch_add(1, Ordering::Relaxed);
        if is_retry {
            self.records_retried.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_ack(&self) {
        self.records_acked.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fail(&self) {
        self.records_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_poison(&self) {
        self.poison_records.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_checkpoint_commit(&self) {
        self.checkpoints_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_checkpoint_failure(&self) {
        self.checkpoint_write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rebalance(&self) {
        self.rebalances.fetch_add(1, Ordering::Relaxed);
    }

    /// Reads all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            records_emitted: self.records_emitted.load(Ordering::Relaxed),
            records_retried: self.records_retried.load(Ordering::Relaxed),
            records_acked: self.records_acked.load(Ordering::Relaxed),
            records_failed: self.records_failed.load(Ordering::Relaxed),
            poison_records: self.poison_records.load(Ordering::Relaxed),
            checkpoints_committed: self.checkpoints_committed.load(Ordering::Relaxed),
            checkpoint_write_failures: self.checkpoint_write_failures.load(Ordering::Relaxed),
            rebalances: self.rebalances.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of [`WorkerMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Records handed to the emitter, retries included.
    pub records_emitted: u64,
    /// Re-emissions of previously failed records.
    pub records_retried: u64,
    /// Acknowledgements routed to a live tracker.
    pub records_acked: u64,
    /// Failures that queued a retry.
    pub records_failed: u64,
    /// Records evicted after exhausting their retry budget.
    pub poison_records: u64,
    /// Checkpoints durably committed to the store.
    pub checkpoints_committed: u64,
    /// Checkpoint writes that failed and will be retried.
    pub checkpoint_write_failures: u64,
    /// Completed rebalances.
    pub rebalances: u64,
}
