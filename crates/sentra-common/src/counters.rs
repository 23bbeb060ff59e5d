//! Process-wide drop and error accounting

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Engine counters, shared across every stage.
///
/// Every drop the pipeline takes instead of blocking is recorded
/// here and surfaced through the statistics query.
#[derive(Debug, Default)]
pub struct EngineCounters {
    pub packets_captured: AtomicU64,
    pub packets_dropped: AtomicU64,
    pub parse_failures: AtomicU64,
    pub flows_created: AtomicU64,
    pub flows_evicted: AtomicU64,
    pub scores_completed: AtomicU64,
    pub scoring_queue_drops: AtomicU64,
    pub inference_errors: AtomicU64,
    pub inference_timeouts: AtomicU64,
    pub store_drops: AtomicU64,
    pub store_write_failures: AtomicU64,
    pub subscriber_drops: AtomicU64,
    pub shutdown_drops: AtomicU64,
}

/// Point-in-time copy of [`EngineCounters`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct CounterSnapshot {
    pub packets_captured: u64,
    pub packets_dropped: u64,
    pub parse_failures: u64,
    pub flows_created: u64,
    pub flows_evicted: u64,
    pub scores_completed: u64,
    pub scoring_queue_drops: u64,
    pub inference_errors: u64,
    pub inference_timeouts: u64,
    pub store_drops: u64,
    pub store_write_failures: u64,
    pub subscriber_drops: u64,
    pub shutdown_drops: u64,
}

impl EngineCounters {
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            packets_captured: self.packets_captured.load(Ordering::Relaxed),
            packets_dropped: self.packets_dropped.load(Ordering::Relaxed),
            parse_failures: self.parse_failures.load(Ordering::Relaxed),
            flows_created: self.flows_created.load(Ordering::Relaxed),
            flows_evicted: self.flows_evicted.load(Ordering::Relaxed),
            scores_completed: self.scores_completed.load(Ordering::Relaxed),
            scoring_queue_drops: self.scoring_queue_drops.load(Ordering::Relaxed),
            inference_errors: self.inference_errors.load(Ordering::Relaxed),
            inference_timeouts: self.inference_timeouts.load(Ordering::Relaxed),
            store_drops: self.store_drops.load(Ordering::Relaxed),
            store_write_failures: self.store_write_failures.load(Ordering::Relaxed),
            subscriber_drops: self.subscriber_drops.load(Ordering::Relaxed),
            shutdown_drops: self.shutdown_drops.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_increments() {
        let counters = EngineCounters::default();
        counters.packets_captured.fetch_add(1, Ordering::Relaxed);
        counters.packets_captured.fetch_add(1, Ordering::Relaxed);
        counters.store_drops.fetch_add(1, Ordering::Relaxed);
        let snap = counters.snapshot();
        assert_eq!(snap.packets_captured, 2);
        assert_eq!(snap.store_drops, 1);
        assert_eq!(snap.parse_failures, 0);
    }
}
