//! Per-tenant resource quota with lock-free reservation.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Point-in-time view of a quota's limits and counters.
///
/// Each field is read atomically, but the struct as a whole is not a single
/// atomic snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaUsage {
    /// CPU time budget in milliseconds (0 = unlimited).
    pub cpu_limit_ms: u64,
    /// Cumulative CPU time in milliseconds.
    pub cpu_used_ms: u64,
    /// Memory budget in bytes (0 = unlimited).
    pub memory_limit_bytes: u64,
    /// Last reported memory usage in bytes.
    pub memory_used_bytes: u64,
    /// Concurrent task limit (0 = unlimited).
    pub tasks_limit: u32,
    /// Tasks currently holding a reservation.
    pub tasks_used: u32,
}

/// Counters for one tenant against its configured limits.
///
/// Uses `AtomicU32`/`AtomicU64` throughout; nothing here takes a lock.
#[derive(Debug)]
pub struct ResourceQuota {
    cpu_limit_ms: u64,
    memory_limit_bytes: u64,
    tasks_limit: u32,
    cpu_used_ms: AtomicU64,
    memory_used_bytes: AtomicU64,
    tasks_used: AtomicU32,
}

impl ResourceQuota {
    /// Create a quota. A `tasks_limit` of 0 means unlimited.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn new(cpu_limit: Duration, memory_limit_bytes: u64, tasks_limit: u32) -> Self {
        Self {
            cpu_limit_ms: cpu_limit.as_millis() as u64,
            memory_limit_bytes,
            tasks_limit,
            cpu_used_ms: AtomicU64::new(0),
            memory_used_bytes: AtomicU64::new(0),
            tasks_used: AtomicU32::new(0),
        }
    }

    /// Try to reserve one task slot using a CAS loop.
    /// Returns true if the slot was reserved. An unlimited quota still
    /// refuses once the counter would overflow.
    pub fn check_and_reserve(&self) -> bool {
        if self.tasks_limit == 0 {
            return self
                .tasks_used
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_add(1))
                .is_ok();
        }
        let mut current = self.tasks_used.load(Ordering::Acquire);
        loop {
            if current >= self.tasks_limit {
                return false;
            }
            match self.tasks_used.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Release one task slot. Saturates at zero.
    pub fn release(&self) {
        let _ = self
            .tasks_used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    /// Add to cumulative CPU usage.
    pub fn record_cpu(&self, delta: Duration) {
        #[allow(clippy::cast_possible_truncation)]
        let ms = delta.as_millis() as u64;
        self.cpu_used_ms.fetch_add(ms, Ordering::Relaxed);
    }

    /// Replace the memory usage snapshot (last write wins).
    pub fn record_memory(&self, bytes: u64) {
        self.memory_used_bytes.store(bytes, Ordering::Relaxed);
    }

    /// Tasks currently holding a reservation.
    pub fn tasks_in_flight(&self) -> u32 {
        self.tasks_used.load(Ordering::Acquire)
    }

    /// True when a nonzero CPU or memory limit has been passed.
    pub fn over_resource_limits(&self) -> bool {
        let usage = self.usage();
        (usage.cpu_limit_ms > 0 && usage.cpu_used_ms > usage.cpu_limit_ms)
            || (usage.memory_limit_bytes > 0 && usage.memory_used_bytes > usage.memory_limit_bytes)
    }

    /// Read all limits and counters.
    pub fn usage(&self) -> QuotaUsage {
        QuotaUsage {
            cpu_limit_ms: self.cpu_limit_ms,
            cpu_used_ms: self.cpu_used_ms.load(Ordering::Relaxed),
            memory_limit_bytes: self.memory_limit_bytes,
            memory_used_bytes: self.memory_used_bytes.load(Ordering::Relaxed),
            tasks_limit: self.tasks_limit,
            tasks_used: self.tasks_used.load(Ordering::Acquire),
        }
    }
}
