//! Engine counters.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Running totals since the engine was created. Shared across subscriptions.
#[derive(Debug, Default)]
pub struct EngineStats {
    /// Individual resource changes run through the pipeline
    pub events_processed: AtomicU64,
    pub significant: AtomicU64,
    pub noise: AtomicU64,
    /// Changes classified as noise because the discriminant could not be read
    pub malformed: AtomicU64,
    pub deletions: AtomicU64,
    /// Callbacks that arrived after their subscription was cancelled
    pub stale_callbacks_dropped: AtomicU64,
    pub scope_mismatches: AtomicU64,
    /// Query entries flipped from fresh to stale
    pub entries_invalidated: AtomicU64,
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, amount: usize) {
        counter.fetch_add(amount as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            events_processed: self.events_processed.load(Ordering::Relaxed),
            significant: self.significant.load(Ordering::Relaxed),
            noise: self.noise.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            deletions: self.deletions.load(Ordering::Relaxed),
            stale_callbacks_dropped: self.stale_callbacks_dropped.load(Ordering::Relaxed),
            scope_mismatches: self.scope_mismatches.load(Ordering::Relaxed),
            entries_invalidated: self.entries_invalidated.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of engine counters at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineStatsSnapshot {
    pub events_processed: u64,
    pub significant: u64,
    pub noise: u64,
    pub malformed: u64,
    pub deletions: u64,
    pub stale_callbacks_dropped: u64,
    pub scope_mismatches: u64,
    pub entries_invalidated: u64,
}
