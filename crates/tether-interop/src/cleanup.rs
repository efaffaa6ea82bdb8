//! Deferred, context-batched wrapper release
//!
//! Returning a wrapper's native references may require a cross-context
//! transition, which is expensive. Instead of paying it per wrapper, the
//! release list groups wrappers into buckets of identical
//! context-compatibility signatures and releases each bucket with a single
//! transition. Wrappers chain into buckets through their own intrusive
//! link, so enqueueing never allocates per wrapper.

use crate::context::{current_context, ContextId, ContextRegistry};
use crate::pressure::MemoryPressureAccumulator;
use crate::wrapper::Wrapper;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

/// Context-compatibility signature: wrappers with equal keys can be
/// released under one transition.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub(crate) struct BucketKey {
    pub(crate) free_threaded: bool,
    pub(crate) thread: Option<ThreadId>,
    pub(crate) context: ContextId,
}

impl BucketKey {
    /// Whether the calling thread can release this bucket without a
    /// transition.
    fn releasable_here(&self) -> bool {
        self.free_threaded
            || self.context.is_ambient()
            || self.context == current_context()
            || self.thread == Some(std::thread::current().id())
    }
}

/// A singly linked group of wrappers sharing one bucket key.
struct CleanupBucket {
    key: BucketKey,
    head: Option<Arc<Wrapper>>,
    len: usize,
}

/// Batches wrapper release by context-compatibility bucket.
pub struct DeferredReleaseList {
    buckets: Mutex<Vec<CleanupBucket>>,
    /// Whether any wrappers are queued; consulted by the opportunistic
    /// current-context drain.
    pending: AtomicBool,
}

impl DeferredReleaseList {
    /// Create an empty release list.
    pub fn new() -> Self {
        DeferredReleaseList {
            buckets: Mutex::new(Vec::new()),
            pending: AtomicBool::new(false),
        }
    }

    /// Whether no wrappers are queued.
    pub fn is_empty(&self) -> bool {
        self.buckets.lock().is_empty()
    }

    /// Number of queued wrappers across all buckets.
    pub fn pending_len(&self) -> usize {
        self.buckets.lock().iter().map(|b| b.len).sum()
    }

    /// Number of buckets currently queued.
    pub fn bucket_count(&self) -> usize {
        self.buckets.lock().len()
    }

    /// Queue `wrapper` for deferred release.
    ///
    /// The wrapper joins the bucket matching its context-compatibility
    /// signature, chained through its own intrusive link; only a bucket
    /// for a never-before-seen signature allocates.
    pub fn add_wrapper(&self, wrapper: Arc<Wrapper>) {
        let key = wrapper.bucket_key();
        let mut buckets = self.buckets.lock();
        if let Some(bucket) = buckets.iter_mut().find(|b| b.key == key) {
            *wrapper.next_in_bucket.lock() = bucket.head.take();
            bucket.head = Some(wrapper);
            bucket.len += 1;
        } else {
            *wrapper.next_in_bucket.lock() = None;
            buckets.push(CleanupBucket {
                key,
                head: Some(wrapper),
                len: 1,
            });
        }
        self.pending.store(true, Ordering::SeqCst);
    }

    /// Release every queued wrapper, one context transition per bucket.
    ///
    /// Buckets drain in unspecified order. A bucket whose owning context
    /// is gone is released from the calling thread instead — the owner can
    /// never do it, and a dead context has no affinity left to violate. A
    /// single wrapper's release failure is swallowed so one misbehaving
    /// native object cannot block the rest of its bucket.
    ///
    /// Returns the number of wrappers processed.
    pub fn cleanup_all(
        &self,
        registry: &ContextRegistry,
        pressure: &Arc<MemoryPressureAccumulator>,
    ) -> usize {
        let drained: Vec<CleanupBucket> = std::mem::take(&mut *self.buckets.lock());
        let mut processed = 0;

        for bucket in drained {
            // Snapshot the chain up front: the links are consumed as the
            // bucket is walked, so a relay that dies partway through must
            // not be the only holder of the remaining members. The
            // RELEASED flag makes a repeated attempt on any individual
            // wrapper a no-op.
            let members = Self::collect_chain(bucket.head);
            if bucket.key.releasable_here() {
                processed += Self::release_all(&members, pressure);
                continue;
            }
            let relayed = members.clone();
            let relayed_pressure = pressure.clone();
            match registry.invoke(bucket.key.context, move || {
                Self::release_all(&relayed, &relayed_pressure)
            }) {
                Ok(count) => processed += count,
                Err(_) => processed += Self::release_all(&members, pressure),
            }
        }

        if self.buckets.lock().is_empty() {
            self.pending.store(false, Ordering::SeqCst);
        }
        processed
    }

    /// Release only the buckets the calling thread can drain without a
    /// transition.
    ///
    /// A thread already paying a context-transition cost calls this to
    /// drain pending cleanup for free; it is a no-op while nothing is
    /// queued. Returns the number of wrappers processed.
    pub fn cleanup_current_context(&self, pressure: &MemoryPressureAccumulator) -> usize {
        if !self.pending.load(Ordering::SeqCst) {
            return 0;
        }

        let mine: Vec<CleanupBucket> = {
            let mut buckets = self.buckets.lock();
            let mut kept = Vec::with_capacity(buckets.len());
            let mut mine = Vec::new();
            for bucket in buckets.drain(..) {
                if bucket.key.releasable_here() {
                    mine.push(bucket);
                } else {
                    kept.push(bucket);
                }
            }
            *buckets = kept;
            mine
        };

        let mut processed = 0;
        for bucket in mine {
            let members = Self::collect_chain(bucket.head);
            processed += Self::release_all(&members, pressure);
        }
        if self.buckets.lock().is_empty() {
            self.pending.store(false, Ordering::SeqCst);
        }
        processed
    }

    /// Detach one bucket chain into a vector, consuming the links.
    fn collect_chain(mut head: Option<Arc<Wrapper>>) -> Vec<Arc<Wrapper>> {
        let mut members = Vec::new();
        while let Some(wrapper) = head {
            head = wrapper.next_in_bucket.lock().take();
            members.push(wrapper);
        }
        members
    }

    /// Release every member of one bucket.
    fn release_all(members: &[Arc<Wrapper>], pressure: &MemoryPressureAccumulator) -> usize {
        for wrapper in members {
            // Swallowed: a misbehaving object must not abort the bucket.
            let _ = wrapper.release_native(pressure);
        }
        members.len()
    }
}

impl Default for DeferredReleaseList {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::NullCollector;
    use crate::native::testing::FakeNative;
    use crate::pressure::PressurePolicy;
    use crate::wrapper::WrapperState;

    fn pressure() -> Arc<MemoryPressureAccumulator> {
        Arc::new(MemoryPressureAccumulator::new(
            Arc::new(NullCollector),
            PressurePolicy::default(),
        ))
    }

    fn ambient_wrapper(raw: usize) -> (Arc<FakeNative>, Arc<Wrapper>) {
        let native = Arc::new(FakeNative::new(raw));
        let wrapper = Arc::new(Wrapper::new(native.clone(), ContextId::AMBIENT));
        (native, wrapper)
    }

    #[test]
    fn test_compatible_wrappers_share_a_bucket() {
        let list = DeferredReleaseList::new();
        let (_, a) = ambient_wrapper(0x10);
        let (_, b) = ambient_wrapper(0x20);
        list.add_wrapper(a);
        list.add_wrapper(b);
        assert_eq!(list.bucket_count(), 1);
        assert_eq!(list.pending_len(), 2);
    }

    #[test]
    fn test_incompatible_wrappers_get_separate_buckets() {
        let list = DeferredReleaseList::new();
        let (_, ambient) = ambient_wrapper(0x10);
        let free = Arc::new(FakeNative::free_threaded(0x20));
        let free_wrapper = Arc::new(Wrapper::new(free, ContextId::AMBIENT));
        list.add_wrapper(ambient);
        list.add_wrapper(free_wrapper);
        assert_eq!(list.bucket_count(), 2);
    }

    #[test]
    fn test_cleanup_all_releases_everything() {
        let registry = Arc::new(ContextRegistry::new());
        let list = DeferredReleaseList::new();
        let acc = pressure();

        let (native_a, a) = ambient_wrapper(0x10);
        let (native_b, b) = ambient_wrapper(0x20);
        list.add_wrapper(a.clone());
        list.add_wrapper(b.clone());

        assert_eq!(list.cleanup_all(&registry, &acc), 2);
        assert!(list.is_empty());
        assert_eq!(a.state(), WrapperState::Released);
        assert_eq!(b.state(), WrapperState::Released);
        assert_eq!(native_a.refs(), 0);
        assert_eq!(native_b.refs(), 0);
    }

    #[test]
    fn test_release_failure_does_not_abort_the_bucket() {
        let registry = Arc::new(ContextRegistry::new());
        let list = DeferredReleaseList::new();
        let acc = pressure();

        let (bad_native, bad) = ambient_wrapper(0x10);
        bad_native
            .fail_release
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let (good_native, good) = ambient_wrapper(0x20);

        list.add_wrapper(bad.clone());
        list.add_wrapper(good.clone());
        assert_eq!(list.cleanup_all(&registry, &acc), 2);
        assert_eq!(good.state(), WrapperState::Released);
        assert_eq!(good_native.refs(), 0);
        // The misbehaving wrapper was still processed and marked.
        assert_eq!(bad.state(), WrapperState::Released);
    }

    #[test]
    fn test_cleanup_current_context_skips_foreign_buckets() {
        let list = DeferredReleaseList::new();
        let acc = pressure();

        let (_, ambient) = ambient_wrapper(0x10);
        list.add_wrapper(ambient);

        // A wrapper created on another thread, affined to a context this
        // thread does not own.
        let foreign_ctx = ContextId::new();
        let foreign = std::thread::spawn(move || {
            let native = Arc::new(FakeNative::new(0x20));
            Arc::new(Wrapper::new(native, foreign_ctx))
        })
        .join()
        .unwrap();
        list.add_wrapper(foreign);

        let drained = list.cleanup_current_context(&acc);
        assert_eq!(drained, 1);
        assert_eq!(list.pending_len(), 1);
    }

    #[test]
    fn test_cleanup_current_context_noop_when_nothing_pending() {
        let list = DeferredReleaseList::new();
        assert_eq!(list.cleanup_current_context(&pressure()), 0);
    }
}
