//! Per-domain identity → wrapper table
//!
//! The cache guarantees at most one live wrapper per native identity. All
//! structural mutation happens under one lock, which is only ever held for
//! map bookkeeping — never across a native call, a context transition, or
//! a collector request — so a holder can never block against the
//! collector's own cache walk.

use crate::cleanup::DeferredReleaseList;
use crate::context::ContextId;
use crate::native::NativeIdentity;
use crate::wrapper::Wrapper;
use crate::{InteropError, Result};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Identity → wrapper table with find-or-insert uniqueness.
pub struct WrapperCache {
    map: Mutex<FxHashMap<NativeIdentity, Arc<Wrapper>>>,
}

impl WrapperCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        WrapperCache {
            map: Mutex::new(FxHashMap::default()),
        }
    }

    /// Number of cached wrappers (detached entries included).
    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    /// Whether the cache holds no wrappers.
    pub fn is_empty(&self) -> bool {
        self.map.lock().is_empty()
    }

    /// Look up a wrapper without touching its reference count.
    ///
    /// Detached wrappers are not returned. Callers that dereference the
    /// result on a fast path must pin it with [`Wrapper::try_use`] first.
    pub fn find(&self, identity: NativeIdentity) -> Option<Arc<Wrapper>> {
        let map = self.map.lock();
        map.get(&identity)
            .filter(|wrapper| !wrapper.is_detached())
            .cloned()
    }

    /// Return the unique wrapper for `identity`, building it on a miss.
    ///
    /// A hit takes one managed reference on the existing wrapper. A hit on
    /// a detached wrapper counts as a miss: the factory runs and its
    /// result replaces the detached entry, so a lookup racing with
    /// finalization never resurrects a dying wrapper. If the factory
    /// fails, nothing is inserted.
    ///
    /// The factory runs under the cache lock and must restrict itself to
    /// allocation and reference bookkeeping.
    pub fn find_or_insert<F>(&self, identity: NativeIdentity, factory: F) -> Result<Arc<Wrapper>>
    where
        F: FnOnce() -> Result<Arc<Wrapper>>,
    {
        let mut map = self.map.lock();
        if let Some(existing) = map.get(&identity) {
            if !existing.is_detached() {
                existing.add_ref()?;
                return Ok(existing.clone());
            }
        }
        let fresh = factory()?;
        debug_assert_eq!(fresh.identity(), identity);
        map.insert(identity, fresh.clone());
        Ok(fresh)
    }

    /// Unlink `wrapper` from the cache.
    ///
    /// Fails with [`InteropError::ObjectAlreadyReleased`] when the entry
    /// for this identity no longer refers to `wrapper` — the caller lost a
    /// race with a removal (and possibly a replacement) it did not expect.
    pub fn remove(&self, wrapper: &Arc<Wrapper>) -> Result<()> {
        let mut map = self.map.lock();
        match map.get(&wrapper.identity()) {
            Some(current) if Arc::ptr_eq(current, wrapper) => {
                map.remove(&wrapper.identity());
                Ok(())
            }
            _ => Err(InteropError::ObjectAlreadyReleased),
        }
    }

    /// Drop one managed reference, unlinking and deferring the wrapper's
    /// native release when the count reaches zero.
    ///
    /// The decrement happens under the cache lock, so the count can only
    /// reach zero while the wrapper is simultaneously unlinked — no lookup
    /// can return a wrapper whose native references are being torn down.
    pub fn release(&self, wrapper: &Arc<Wrapper>, cleanup: &DeferredReleaseList) -> Result<u32> {
        let deferred;
        let remaining;
        {
            let mut map = self.map.lock();
            remaining = wrapper.dec_ref()?;
            if remaining > 0 {
                return Ok(remaining);
            }
            // Unlink before any native release can happen. A detached
            // wrapper may already have been replaced by a fresh one; leave
            // a non-matching entry alone.
            if let Some(current) = map.get(&wrapper.identity()) {
                if Arc::ptr_eq(current, wrapper) {
                    map.remove(&wrapper.identity());
                }
            }
            deferred = wrapper.clone();
        }
        cleanup.add_wrapper(deferred);
        Ok(remaining)
    }

    /// Mark every wrapper the predicate reports unreachable as detached.
    ///
    /// Collector scan hook; returns how many wrappers were detached.
    pub fn detach_unreachable<F>(&self, mut is_reachable: F) -> usize
    where
        F: FnMut(&Arc<Wrapper>) -> bool,
    {
        let map = self.map.lock();
        let mut detached = 0;
        for wrapper in map.values() {
            if !wrapper.is_detached() && !is_reachable(wrapper) {
                wrapper.mark_detached();
                detached += 1;
            }
        }
        detached
    }

    /// Unlink every wrapper belonging to `context` and queue it for
    /// deferred release. Returns how many were drained.
    pub fn drain_context(&self, context: ContextId, cleanup: &DeferredReleaseList) -> usize {
        let drained: Vec<Arc<Wrapper>> = {
            let mut map = self.map.lock();
            let identities: Vec<NativeIdentity> = map
                .iter()
                .filter(|(_, wrapper)| wrapper.context() == context)
                .map(|(identity, _)| *identity)
                .collect();
            identities
                .iter()
                .filter_map(|identity| map.remove(identity))
                .collect()
        };
        let count = drained.len();
        for wrapper in drained {
            cleanup.add_wrapper(wrapper);
        }
        count
    }

    /// Unlink everything and queue it for deferred release; domain
    /// teardown. Returns how many wrappers were drained.
    pub fn drain_all(&self, cleanup: &DeferredReleaseList) -> usize {
        let drained: Vec<Arc<Wrapper>> = {
            let mut map = self.map.lock();
            map.drain().map(|(_, wrapper)| wrapper).collect()
        };
        let count = drained.len();
        for wrapper in drained {
            cleanup.add_wrapper(wrapper);
        }
        count
    }
}

impl Default for WrapperCache {
    fn default() -> Self {
        Self::new()
    }
}
