//! Memory-pressure accounting for untracked native bytes
//!
//! A wrapper pins native resources the collector cannot see. The
//! accumulator reports a per-wrapper cost, chosen by locality tier, as
//! artificial pressure so collections trigger earlier than managed-heap
//! growth alone would, and requests a collection itself once enough
//! pressure accumulates without one happening.

use crate::collector::Collector;
use crate::native::Locality;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Per-tier byte cost of one wrapper.
///
/// Policy constants: rough estimates of the native-side footprint behind a
/// wrapper of each locality class.
pub const fn tier_bytes(locality: Locality) -> usize {
    match locality {
        Locality::ProcessLocal => 3_400,
        Locality::MachineLocal => 4_900,
        Locality::Remote => 9_800,
        Locality::ExternalLow => 12_000,
        Locality::ExternalMedium => 120_000,
        Locality::ExternalHigh => 1_200_000,
    }
}

/// Tunable knobs for pressure accounting.
#[derive(Clone, Debug)]
pub struct PressurePolicy {
    /// Accounting granule; every addition is rounded up to a multiple.
    pub granule: usize,
    /// Bytes added without an intervening collection before the
    /// accumulator requests one.
    pub collect_threshold: usize,
}

impl Default for PressurePolicy {
    fn default() -> Self {
        PressurePolicy {
            granule: 64,
            collect_threshold: 96 * 1024,
        }
    }
}

/// Tracks untracked native byte cost and requests collections.
pub struct MemoryPressureAccumulator {
    collector: Arc<dyn Collector>,
    policy: PressurePolicy,
    /// Currently reported pressure.
    total: AtomicUsize,
    /// Pressure added since the last observed collection.
    added_since_collect: AtomicUsize,
    /// Collection count at the last trigger check.
    last_collection: AtomicU64,
}

impl MemoryPressureAccumulator {
    /// Create an accumulator reporting to `collector`.
    pub fn new(collector: Arc<dyn Collector>, policy: PressurePolicy) -> Self {
        let last_collection = AtomicU64::new(collector.collection_count());
        MemoryPressureAccumulator {
            collector,
            policy,
            total: AtomicUsize::new(0),
            added_since_collect: AtomicUsize::new(0),
            last_collection,
        }
    }

    /// Currently reported pressure in bytes.
    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    /// Bytes added since the accumulator last saw a collection.
    pub fn pending(&self) -> usize {
        self.added_since_collect.load(Ordering::SeqCst)
    }

    /// Report `bytes` of new native cost.
    ///
    /// Rounded up to the accounting granule. May request a collection when
    /// the accumulated additions cross the threshold and the collector has
    /// not run on its own in the meantime.
    pub fn add(&self, bytes: usize) {
        let rounded = self.round_up(bytes);
        self.collector.add_memory_pressure(rounded);
        self.total.fetch_add(rounded, Ordering::SeqCst);
        let pending = self.added_since_collect.fetch_add(rounded, Ordering::SeqCst) + rounded;
        if pending >= self.policy.collect_threshold {
            self.maybe_collect();
        }
    }

    /// Retract `bytes` of previously reported cost.
    ///
    /// Uses the same rounding as [`add`](Self::add), so a matched
    /// add/remove pair restores the accumulator exactly. Never underflows.
    pub fn remove(&self, bytes: usize) {
        let rounded = self.round_up(bytes);
        self.collector.remove_memory_pressure(rounded);
        saturating_sub(&self.total, rounded);
        saturating_sub(&self.added_since_collect, rounded);
    }

    fn maybe_collect(&self) {
        let seen = self.collector.collection_count();
        // Only trigger when nothing collected since we last looked; a
        // collection that already happened pays the debt.
        if seen == self.last_collection.load(Ordering::SeqCst) {
            self.collector.collect();
        }
        self.last_collection
            .store(self.collector.collection_count(), Ordering::SeqCst);
        self.added_since_collect.store(0, Ordering::SeqCst);
    }

    fn round_up(&self, bytes: usize) -> usize {
        let granule = self.policy.granule.max(1);
        bytes.div_ceil(granule) * granule
    }
}

fn saturating_sub(cell: &AtomicUsize, amount: usize) {
    let mut current = cell.load(Ordering::SeqCst);
    loop {
        let next = current.saturating_sub(amount);
        match cell.compare_exchange_weak(current, next, Ordering::SeqCst, Ordering::SeqCst) {
            Ok(_) => return,
            Err(observed) => current = observed,
        }
    }
}
