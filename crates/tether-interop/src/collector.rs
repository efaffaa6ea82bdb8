//! The collector collaborator boundary
//!
//! The bridge never walks the managed heap itself. It reports artificial
//! memory pressure for untracked native bytes, observes collection counts,
//! and can request a collection; the collector in turn notifies the bridge
//! of unreachable wrappers through [`crate::Domain::on_unreachable`].

/// Hooks into the managed runtime's garbage collector.
pub trait Collector: Send + Sync {
    /// Report `bytes` of untracked native memory kept alive by managed
    /// references.
    fn add_memory_pressure(&self, bytes: usize);

    /// Retract previously reported pressure.
    fn remove_memory_pressure(&self, bytes: usize);

    /// Monotonic count of completed collections.
    fn collection_count(&self) -> u64;

    /// Request an on-demand collection.
    fn collect(&self);
}

/// Collector that ignores everything, for embedders without a GC hook.
pub struct NullCollector;

impl Collector for NullCollector {
    fn add_memory_pressure(&self, _bytes: usize) {}

    fn remove_memory_pressure(&self, _bytes: usize) {}

    fn collection_count(&self) -> u64 {
        0
    }

    fn collect(&self) {}
}
