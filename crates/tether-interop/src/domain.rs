//! Per-domain interop state
//!
//! A [`Domain`] owns one wrapper cache, one deferred-release list, and one
//! pressure accumulator; its lifecycle is tied to the managed domain it
//! serves. Nothing here is process-global — every operation goes through
//! an explicit domain.

use crate::cache::WrapperCache;
use crate::cleanup::DeferredReleaseList;
use crate::collector::Collector;
use crate::context::{current_context, ContextRegistry};
use crate::native::{NativeIdentity, NativeObject};
use crate::pressure::{MemoryPressureAccumulator, PressurePolicy};
use crate::wrapper::Wrapper;
use crate::Result;
use std::cell::Cell;
use std::sync::Arc;

/// Policy knobs for a domain.
#[derive(Clone, Debug, Default)]
pub struct DomainOptions {
    /// Memory-pressure accounting policy.
    pub pressure: PressurePolicy,
}

/// One managed domain's view of the interop bridge.
pub struct Domain {
    cache: WrapperCache,
    cleanup: DeferredReleaseList,
    pressure: Arc<MemoryPressureAccumulator>,
    contexts: Arc<ContextRegistry>,
}

impl Domain {
    /// Create a domain reporting pressure to `collector` and relaying
    /// cross-context work through `contexts`.
    pub fn new(
        contexts: Arc<ContextRegistry>,
        collector: Arc<dyn Collector>,
        options: DomainOptions,
    ) -> Self {
        Domain {
            cache: WrapperCache::new(),
            cleanup: DeferredReleaseList::new(),
            pressure: Arc::new(MemoryPressureAccumulator::new(collector, options.pressure)),
            contexts,
        }
    }

    /// The domain's wrapper cache.
    pub fn cache(&self) -> &WrapperCache {
        &self.cache
    }

    /// The domain's context registry.
    pub fn contexts(&self) -> &Arc<ContextRegistry> {
        &self.contexts
    }

    /// The domain's pressure accumulator.
    pub fn pressure(&self) -> &MemoryPressureAccumulator {
        &self.pressure
    }

    /// Return the unique wrapper for `native`, creating it on first sight.
    ///
    /// A new wrapper is owned by the calling thread's context, holds the
    /// identity reference, and reports memory pressure for its locality
    /// tier. A hit takes one managed reference instead.
    pub fn wrap(&self, native: Arc<dyn NativeObject>) -> Result<Arc<Wrapper>> {
        let identity = native.identity();
        let context = current_context();
        let created = Cell::new(false);
        let wrapper = self.cache.find_or_insert(identity, || {
            created.set(true);
            Ok(Arc::new(Wrapper::new(native.clone(), context)))
        })?;
        if created.get() {
            // Outside the cache lock: the pressure path can call into the
            // collector.
            wrapper.apply_memory_pressure(&self.pressure);
        }
        Ok(wrapper)
    }

    /// Drop one managed reference to `wrapper`.
    ///
    /// At zero the wrapper is unlinked from the cache and queued on the
    /// deferred-release list; its native references are returned on the
    /// next [`flush_releases`](Self::flush_releases) (or opportunistic
    /// drain). Returns the remaining count.
    pub fn release(&self, wrapper: &Arc<Wrapper>) -> Result<u32> {
        self.cache.release(wrapper, &self.cleanup)
    }

    /// Drain the deferred-release list, one context transition per bucket.
    ///
    /// Returns the number of wrappers processed.
    pub fn flush_releases(&self) -> usize {
        self.cleanup.cleanup_all(&self.contexts, &self.pressure)
    }

    /// Drain only the deferred releases the calling thread can perform
    /// without a context transition.
    pub fn flush_releases_here(&self) -> usize {
        self.cleanup.cleanup_current_context(&self.pressure)
    }

    /// Number of wrappers waiting on the deferred-release list.
    pub fn pending_releases(&self) -> usize {
        self.cleanup.pending_len()
    }

    /// Collector callback: the managed side of `identity` was found
    /// unreachable before finalization. Detaches the wrapper so a racing
    /// lookup creates a fresh one. Returns whether a wrapper was found.
    pub fn on_unreachable(&self, identity: NativeIdentity) -> bool {
        match self.cache.find(identity) {
            Some(wrapper) => {
                wrapper.mark_detached();
                true
            }
            None => false,
        }
    }

    /// Collector scan hook: detach every cached wrapper the predicate
    /// reports unreachable. Returns how many were detached.
    pub fn detach_unreachable<F>(&self, is_reachable: F) -> usize
    where
        F: FnMut(&Arc<Wrapper>) -> bool,
    {
        self.cache.detach_unreachable(is_reachable)
    }

    /// Release every wrapper belonging to `context`, then flush.
    ///
    /// Returns how many wrappers were drained.
    pub fn release_context(&self, context: crate::context::ContextId) -> usize {
        let drained = self.cache.drain_context(context, &self.cleanup);
        self.flush_releases();
        drained
    }

    /// Domain teardown: release everything regardless of reference
    /// counts. Returns how many wrappers were drained.
    pub fn teardown(&self) -> usize {
        let drained = self.cache.drain_all(&self.cleanup);
        self.flush_releases();
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::NullCollector;
    use crate::native::testing::FakeNative;
    use crate::native::Locality;
    use crate::wrapper::WrapperState;

    fn domain() -> Domain {
        Domain::new(
            Arc::new(ContextRegistry::new()),
            Arc::new(NullCollector),
            DomainOptions::default(),
        )
    }

    #[test]
    fn test_wrap_is_identity_unique() {
        let domain = domain();
        let native = Arc::new(FakeNative::new(0x10));
        let first = domain.wrap(native.clone()).unwrap();
        let second = domain.wrap(native.clone()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.ref_count(), 2);
        assert_eq!(domain.cache().len(), 1);
        // Only the creation took a native reference.
        assert_eq!(native.refs(), 1);
    }

    #[test]
    fn test_wrap_applies_pressure_once() {
        let domain = domain();
        let native = Arc::new(FakeNative::with_locality(0x10, Locality::ExternalLow));
        domain.wrap(native.clone()).unwrap();
        let after_first = domain.pressure().total();
        assert!(after_first > 0);
        domain.wrap(native).unwrap();
        assert_eq!(domain.pressure().total(), after_first);
    }

    #[test]
    fn test_release_to_zero_defers_and_flush_completes() {
        let domain = domain();
        let native = Arc::new(FakeNative::new(0x10));
        let wrapper = domain.wrap(native.clone()).unwrap();

        assert_eq!(domain.release(&wrapper).unwrap(), 0);
        assert!(domain.cache().is_empty());
        assert_eq!(domain.pending_releases(), 1);
        // Native references are still held until the flush.
        assert_eq!(native.refs(), 1);

        assert_eq!(domain.flush_releases(), 1);
        assert_eq!(native.refs(), 0);
        assert_eq!(wrapper.state(), WrapperState::Released);
        assert_eq!(domain.pressure().total(), 0);
    }

    #[test]
    fn test_on_unreachable_detaches_and_lookup_refreshes() {
        let domain = domain();
        let native = Arc::new(FakeNative::new(0x10));
        let stale = domain.wrap(native.clone()).unwrap();

        assert!(domain.on_unreachable(native.identity()));
        assert_eq!(stale.state(), WrapperState::Detached);

        // A lookup racing with finalization gets a fresh wrapper.
        let fresh = domain.wrap(native.clone()).unwrap();
        assert!(!Arc::ptr_eq(&stale, &fresh));
        assert_eq!(fresh.state(), WrapperState::Valid);

        assert!(!domain.on_unreachable(FakeNative::new(0x99).identity()));
    }

    #[test]
    fn test_teardown_releases_everything() {
        let domain = domain();
        let natives: Vec<Arc<FakeNative>> = (1..=3)
            .map(|raw| Arc::new(FakeNative::new(raw * 0x10)))
            .collect();
        for native in &natives {
            domain.wrap(native.clone()).unwrap();
        }

        assert_eq!(domain.teardown(), 3);
        assert!(domain.cache().is_empty());
        assert_eq!(domain.pending_releases(), 0);
        for native in &natives {
            assert_eq!(native.refs(), 0);
        }
    }
}
