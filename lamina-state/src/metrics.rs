//! Collection metrics
//!
//! Counters describing how much structural work a collection reconciler
//! has done. The state layer is single-threaded, so plain cells suffice.

use std::cell::Cell;
use std::fmt;

/// Running counters for one collection
#[derive(Debug, Default)]
pub struct CollectionMetrics {
    /// Number of snapshots emitted
    pub snapshots: Cell<u64>,

    /// Number of child instances created
    pub instantiated: Cell<u64>,

    /// Number of child instances disposed
    pub removed: Cell<u64>,

    /// Number of index changes on surviving instances
    pub reindexed: Cell<u64>,

    /// Number of new item values pushed into surviving instances
    pub item_updates: Cell<u64>,

    /// Number of array items ignored because a later item had the same key
    pub duplicate_keys: Cell<u64>,
}

fn bump(counter: &Cell<u64>, by: usize) {
    counter.set(counter.get() + by as u64);
}

impl CollectionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one reconciliation cycle
    pub fn record_snapshot(&self, added: usize, removed: usize, reindexed: usize) {
        bump(&self.snapshots, 1);
        bump(&self.instantiated, added);
        bump(&self.removed, removed);
        bump(&self.reindexed, reindexed);
    }

    /// Record item values pushed into existing instances
    pub fn record_item_updates(&self, count: usize) {
        bump(&self.item_updates, count);
    }

    /// Record items shadowed by a later item with the same key
    pub fn record_duplicates(&self, count: usize) {
        bump(&self.duplicate_keys, count);
    }

    /// Number of instances currently alive
    pub fn live(&self) -> u64 {
        self.instantiated.get().saturating_sub(self.removed.get())
    }

    /// Reset all counters
    pub fn reset(&self) {
        self.snapshots.set(0);
        self.instantiated.set(0);
        self.removed.set(0);
        self.reindexed.set(0);
        self.item_updates.set(0);
        self.duplicate_keys.set(0);
    }

    /// Get a snapshot of current counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            snapshots: self.snapshots.get(),
            instantiated: self.instantiated.get(),
            removed: self.removed.get(),
            reindexed: self.reindexed.get(),
            item_updates: self.item_updates.get(),
            duplicate_keys: self.duplicate_keys.get(),
        }
    }
}

/// A point-in-time copy of collection metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub snapshots: u64,
    pub instantiated: u64,
    pub removed: u64,
    pub reindexed: u64,
    pub item_updates: u64,
    pub duplicate_keys: u64,
}

impl MetricsSnapshot {
    /// Average number of instances created or disposed per snapshot
    pub fn churn(&self) -> f64 {
        if self.snapshots == 0 {
            0.0
        } else {
            (self.instantiated + self.removed) as f64 / self.snapshots as f64
        }
    }
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "snapshots: {}, instantiated: {}, removed: {}, reindexed: {}, item updates: {}, duplicate keys: {}",
            self.snapshots,
            self.instantiated,
            self.removed,
            self.reindexed,
            self.item_updates,
            self.duplicate_keys
        )
    }
}
