//! Lock manager statistics collection.
//!
//! Scoped to the counters this lock manager can actually produce: it has no
//! timeout mechanism and no deadlock *detector* (only wait-die prevention),
//! so the equivalent counters here are grants, waits, wait-die kills, and
//! in-place upgrades rather than timeouts/detected-deadlocks/escalations.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Common trait for statistics components in the transaction layer.
pub trait ComponentStats: Send + Sync {
    type Summary: Clone + Send + Sync;

    fn get_summary(&self) -> Self::Summary;
    fn reset(&self);
    fn component_name(&self) -> &'static str;
}

/// Thread-safe counters for one `LockManager`.
pub struct LockStatistics {
    lock_requests: Arc<Mutex<u64>>,
    lock_grants: Arc<Mutex<u64>>,
    lock_waits: Arc<Mutex<u64>>,
    wait_die_kills: Arc<Mutex<u64>>,
    upgrades: Arc<Mutex<u64>>,
}

impl LockStatistics {
    pub fn new() -> Self {
        Self {
            lock_requests: Arc::new(Mutex::new(0)),
            lock_grants: Arc::new(Mutex::new(0)),
            lock_waits: Arc::new(Mutex::new(0)),
            wait_die_kills: Arc::new(Mutex::new(0)),
            upgrades: Arc::new(Mutex::new(0)),
        }
    }

    pub(crate) fn record_request(&self) {
        *self.lock_requests.lock() += 1;
    }

    pub(crate) fn record_grant(&self) {
        *self.lock_grants.lock() += 1;
    }

    pub(crate) fn record_wait(&self) {
        *self.lock_waits.lock() += 1;
    }

    pub(crate) fn record_die(&self) {
        *self.wait_die_kills.lock() += 1;
    }

    pub(crate) fn record_upgrade(&self) {
        *self.upgrades.lock() += 1;
    }

    pub fn get_summary(&self) -> LockStatisticsSummary {
        LockStatisticsSummary {
            total_requests: *self.lock_requests.lock(),
            total_grants: *self.lock_grants.lock(),
            total_waits: *self.lock_waits.lock(),
            total_wait_die_kills: *self.wait_die_kills.lock(),
            total_upgrades: *self.upgrades.lock(),
        }
    }
}

impl Default for LockStatistics {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentStats for LockStatistics {
    type Summary = LockStatisticsSummary;

    fn get_summary(&self) -> Self::Summary {
        self.get_summary()
    }

    fn reset(&self) {
        *self.lock_requests.lock() = 0;
        *self.lock_grants.lock() = 0;
        *self.lock_waits.lock() = 0;
        *self.wait_die_kills.lock() = 0;
        *self.upgrades.lock() = 0;
    }

    fn component_name(&self) -> &'static str {
        "LockStatistics"
    }
}

/// Point-in-time snapshot of [`LockStatistics`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockStatisticsSummary {
    pub total_requests: u64,
    pub total_grants: u64,
    pub total_waits: u64,
    pub total_wait_die_kills: u64,
    pub total_upgrades: u64,
}

impl LockStatisticsSummary {
    /// Fraction of requests that had to block at least once.
    pub fn contention_rate(&self) -> f64 {
        if self.total_requests > 0 {
            self.total_waits as f64 / self.total_requests as f64
        } else {
            0.0
        }
    }

    /// Fraction of requests killed outright by wait-die rather than granted.
    pub fn kill_rate(&self) -> f64 {
        if self.total_requests > 0 {
            self.total_wait_die_kills as f64 / self.total_requests as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_reflects_recorded_events() {
        let stats = LockStatistics::new();
        stats.record_request();
        stats.record_grant();
        stats.record_request();
        stats.record_wait();
        stats.record_die();

        let summary = stats.get_summary();
        assert_eq!(summary.total_requests, 2);
        assert_eq!(summary.total_grants, 1);
        assert_eq!(summary.total_waits, 1);
        assert_eq!(summary.total_wait_die_kills, 1);
        assert!((summary.contention_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn reset_zeroes_all_counters() {
        let stats = LockStatistics::new();
        stats.record_request();
        stats.record_grant();
        stats.reset();
        let summary = stats.get_summary();
        assert_eq!(summary.total_requests, 0);
        assert_eq!(summary.total_grants, 0);
    }
}
