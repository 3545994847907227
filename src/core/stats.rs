//! Pool-wide admission statistics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Statistics about pool utilization and latency.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Workers currently executing a task.
    pub active_workers: u64,
    /// Tasks waiting in the external queue, as supplied by the caller.
    pub queued_tasks: u64,
    /// Total tasks completed successfully.
    pub completed_tasks: u64,
    /// Total tasks rejected at admission.
    pub rejected_tasks: u64,
    /// Total tasks that failed after admission.
    pub failed_tasks: u64,
    /// Mean latency of completed tasks.
    pub average_latency: Duration,
    /// Time since the collector was created.
    pub uptime: Duration,
}

/// Lock-free counters for pool statistics.
#[derive(Debug)]
pub struct StatsCollector {
    active_workers: AtomicU64,
    completed_tasks: AtomicU64,
    rejected_tasks: AtomicU64,
    failed_tasks: AtomicU64,
    total_latency_us: AtomicU64,
    started_at: Instant,
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsCollector {
    /// Start collecting; uptime counts from now.
    pub fn new() -> Self {
        Self {
            active_workers: AtomicU64::new(0),
            completed_tasks: AtomicU64::new(0),
            rejected_tasks: AtomicU64::new(0),
            failed_tasks: AtomicU64::new(0),
            total_latency_us: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    /// A worker picked up a task.
    pub fn worker_started(&self) {
        self.active_workers.fetch_add(1, Ordering::Relaxed);
    }

    /// A worker finished a task. Saturates at zero.
    pub fn worker_finished(&self) {
        let _ = self
            .active_workers
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    /// Raise the active-worker gauge until the returned guard is dropped.
    pub fn track_worker(&self) -> ActiveWorker<'_> {
        self.worker_started();
        ActiveWorker { stats: self }
    }

    /// Count a completion and add its latency.
    pub fn record_task_completion(&self, latency: Duration) {
        let us = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.total_latency_us.fetch_add(us, Ordering::Relaxed);
        self.completed_tasks.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an admission rejection.
    pub fn record_task_rejection(&self) {
        self.rejected_tasks.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a failure after admission.
    pub fn record_task_failure(&self) {
        self.failed_tasks.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot with the caller's current queue length.
    pub fn snapshot(&self, queue_len: usize) -> PoolStats {
        let completed = self.completed_tasks.load(Ordering::Relaxed);
        let total_us = self.total_latency_us.load(Ordering::Relaxed);
        let average_latency = if completed == 0 {
            Duration::ZERO
        } else {
            Duration::from_micros(total_us / completed)
        };
        PoolStats {
            active_workers: self.active_workers.load(Ordering::Relaxed),
            queued_tasks: queue_len as u64,
            completed_tasks: completed,
            rejected_tasks: self.rejected_tasks.load(Ordering::Relaxed),
            failed_tasks: self.failed_tasks.load(Ordering::Relaxed),
            average_latency,
            uptime: self.started_at.elapsed(),
        }
    }
}

/// One running task in [`StatsCollector`]'s active-worker gauge.
///
/// Dropping the guard, including dropping the future that owns it, lowers
/// the gauge.
#[derive(Debug)]
#[must_use = "the gauge is lowered as soon as the guard is dropped"]
pub struct ActiveWorker<'a> {
    stats: &'a StatsCollector,
}

impl Drop for ActiveWorker<'_> {
    fn drop(&mut self) {
        self.stats.worker_finished();
    }
}
