//! Pool statistics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of pool activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Tasks dispatched to the substrate.
    pub submitted: u64,
    /// Tasks that produced a value.
    pub completed: u64,
    /// Tasks that failed.
    pub failed: u64,
    /// Values dropped because no sink applied or the pool was stopping.
    pub discarded: u64,
    /// Tasks dispatched but not yet reconciled.
    pub pending: usize,
    /// Sum of all tag capacities.
    pub total_capacity: usize,
}

/// Internal counters for pool statistics (thread-safe).
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub submitted: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
    pub discarded: AtomicU64,
}

impl PoolCounters {
    /// Get a snapshot of current statistics.
    pub fn snapshot(&self, pending: usize, total_capacity: usize) -> PoolStats {
        PoolStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            pending,
            total_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_counters_snapshot() {
        let counters = PoolCounters::default();
        counters.submitted.fetch_add(10, Ordering::Relaxed);
        counters.completed.fetch_add(7, Ordering::Relaxed);
        counters.failed.fetch_add(2, Ordering::Relaxed);

        let stats = counters.snapshot(1, 8);
        assert_eq!(stats.submitted, 10);
        assert_eq!(stats.completed, 7);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.discarded, 0);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.total_capacity, 8);
    }
}
