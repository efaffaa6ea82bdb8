//! Managed-side wrappers for native objects
//!
//! A [`Wrapper`] is the single managed proxy for one native identity. It
//! caches queried interface pointers per context, carries a reference
//! count (managed handles) and a use count (threads currently inside the
//! wrapper), and reports memory pressure proportional to the native
//! object's locality tier.
//!
//! Lifecycle: `Valid → Detached → Released`. The collector marks a wrapper
//! detached when its managed side is found unreachable before finalization,
//! which forces later cache lookups of the same identity to build a fresh
//! wrapper instead of resurrecting this one. Released wrappers refuse all
//! operations.

use crate::cleanup::BucketKey;
use crate::context::{current_context, ContextId, ContextRegistry};
use crate::native::{Locality, NativeIdentity, NativeObject, NativePointer};
use crate::pressure::{tier_bytes, MemoryPressureAccumulator};
use crate::signature::Identifier;
use crate::{InteropError, Result};
use parking_lot::Mutex;
use std::ops::Deref;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

/// Inline interface-cache slots before lookups spill to the overflow list.
pub const INLINE_CACHE_SLOTS: usize = 8;

mod flags {
    pub const FREE_THREADED: u32 = 1 << 0;
    pub const AGGREGATED: u32 = 1 << 1;
    pub const BRIDGE: u32 = 1 << 2;
    pub const DETACHED: u32 = 1 << 3;
    pub const RELEASED: u32 = 1 << 4;
}

/// Lifecycle state of a wrapper.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum WrapperState {
    /// Live and usable.
    Valid,
    /// Found unreachable by the collector; awaiting final release.
    Detached,
    /// Native references returned; all operations fail.
    Released,
}

/// One cached capability pointer.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct InterfaceEntry {
    /// Interface the pointer was queried for.
    pub interface: Identifier,
    /// The cached pointer value.
    pub pointer: NativePointer,
    /// Context the pointer is valid in.
    pub context: ContextId,
}

/// Fixed inline slots plus overflow storage for cached interface pointers.
struct InterfaceTable {
    inline: [Option<InterfaceEntry>; INLINE_CACHE_SLOTS],
    overflow: Vec<InterfaceEntry>,
}

impl InterfaceTable {
    fn new() -> Self {
        InterfaceTable {
            inline: [None; INLINE_CACHE_SLOTS],
            overflow: Vec::new(),
        }
    }

    fn lookup(&self, interface: Identifier, context: Option<ContextId>) -> Option<NativePointer> {
        let matches = |entry: &InterfaceEntry| {
            entry.interface == interface && context.map_or(true, |c| entry.context == c)
        };
        self.inline
            .iter()
            .flatten()
            .chain(self.overflow.iter())
            .find(|entry| matches(entry))
            .map(|entry| entry.pointer)
    }

    fn insert(&mut self, entry: InterfaceEntry) {
        for slot in self.inline.iter_mut() {
            if slot.is_none() {
                *slot = Some(entry);
                return;
            }
        }
        self.overflow.push(entry);
    }

    fn len(&self) -> usize {
        self.inline.iter().flatten().count() + self.overflow.len()
    }

    fn drain(&mut self) -> Vec<InterfaceEntry> {
        let mut entries: Vec<InterfaceEntry> =
            self.inline.iter_mut().filter_map(Option::take).collect();
        entries.append(&mut self.overflow);
        entries
    }
}

/// The managed proxy for one native identity.
pub struct Wrapper {
    identity: NativeIdentity,
    native: Arc<dyn NativeObject>,
    /// Context the wrapper was created in.
    context: ContextId,
    /// Owning thread for affinity-bound wrappers.
    thread: Option<ThreadId>,
    flags: AtomicU32,
    /// Managed handles to this wrapper.
    ref_count: AtomicU32,
    /// Threads currently dereferencing this wrapper.
    use_count: AtomicU32,
    /// Pressure tier applied at creation, present until removed.
    applied_tier: Mutex<Option<Locality>>,
    entries: Mutex<InterfaceTable>,
    /// Intrusive link for deferred-release buckets. Owned by the wrapper
    /// so enqueueing never allocates.
    pub(crate) next_in_bucket: Mutex<Option<Arc<Wrapper>>>,
}

impl std::fmt::Debug for Wrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wrapper")
            .field("identity", &self.identity)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl Wrapper {
    /// Wrap `native`, owned by `context`.
    ///
    /// Takes the identity reference on the native object; the initial
    /// managed ref count is 1.
    pub(crate) fn new(native: Arc<dyn NativeObject>, context: ContextId) -> Self {
        let free_threaded = native.is_free_threaded();
        let mut initial_flags = 0;
        if free_threaded {
            initial_flags |= flags::FREE_THREADED;
        }
        if native.is_bridge() {
            initial_flags |= flags::BRIDGE;
        }
        // Ambient-context wrappers have no thread affinity.
        let thread = if free_threaded || context.is_ambient() {
            None
        } else {
            Some(std::thread::current().id())
        };
        native.add_ref();
        Wrapper {
            identity: native.identity(),
            native,
            context,
            thread,
            flags: AtomicU32::new(initial_flags),
            ref_count: AtomicU32::new(1),
            use_count: AtomicU32::new(0),
            applied_tier: Mutex::new(None),
            entries: Mutex::new(InterfaceTable::new()),
            next_in_bucket: Mutex::new(None),
        }
    }

    /// The native identity this wrapper proxies.
    pub fn identity(&self) -> NativeIdentity {
        self.identity
    }

    /// The context this wrapper belongs to.
    pub fn context(&self) -> ContextId {
        self.context
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WrapperState {
        let bits = self.flags.load(Ordering::SeqCst);
        if bits & flags::RELEASED != 0 {
            WrapperState::Released
        } else if bits & flags::DETACHED != 0 {
            WrapperState::Detached
        } else {
            WrapperState::Valid
        }
    }

    /// Whether the native object may be called from any context.
    pub fn is_free_threaded(&self) -> bool {
        self.flags.load(Ordering::SeqCst) & flags::FREE_THREADED != 0
    }

    /// Whether the managed side aggregates the native object.
    pub fn is_aggregated(&self) -> bool {
        self.flags.load(Ordering::SeqCst) & flags::AGGREGATED != 0
    }

    /// Whether this wrapper fronts a lifetime-tracked bridge object.
    ///
    /// Bridge wrappers report no memory pressure; the tracking layer owns
    /// their native cost.
    pub fn is_bridge(&self) -> bool {
        self.flags.load(Ordering::SeqCst) & flags::BRIDGE != 0
    }

    /// Whether the collector has detached this wrapper.
    pub fn is_detached(&self) -> bool {
        self.flags.load(Ordering::SeqCst) & flags::DETACHED != 0
    }

    /// Whether the wrapper's native references have been returned.
    pub fn is_released(&self) -> bool {
        self.flags.load(Ordering::SeqCst) & flags::RELEASED != 0
    }

    /// Mark the managed side as aggregating the native object.
    ///
    /// Aggregated wrappers do not return the identity reference on
    /// release; the managed aggregate owns it.
    pub fn mark_aggregated(&self) {
        self.flags.fetch_or(flags::AGGREGATED, Ordering::SeqCst);
    }

    /// Called by the collector when the wrapper's managed side is found
    /// unreachable before finalizers run. A detached wrapper is skipped by
    /// cache lookups, so a racing lookup of the same identity creates a
    /// fresh wrapper instead of resurrecting this one.
    pub fn mark_detached(&self) {
        self.flags.fetch_or(flags::DETACHED, Ordering::SeqCst);
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.is_released() {
            return Err(InteropError::UseAfterRelease);
        }
        Ok(())
    }

    /// Current managed reference count.
    pub fn ref_count(&self) -> u32 {
        self.ref_count.load(Ordering::SeqCst)
    }

    /// Current use count.
    pub fn use_count(&self) -> u32 {
        self.use_count.load(Ordering::SeqCst)
    }

    /// Take a managed reference; returns the new count. Lock-free.
    pub fn add_ref(&self) -> Result<u32> {
        self.ensure_usable()?;
        Ok(self.ref_count.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Drop one managed reference; returns the remaining count.
    ///
    /// Only [`crate::cache::WrapperCache::release`] may call this: the
    /// count must reach zero under the cache lock so the wrapper can be
    /// unlinked before anyone re-observes its identity.
    pub(crate) fn dec_ref(&self) -> Result<u32> {
        self.ref_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                count.checked_sub(1)
            })
            .map(|previous| previous - 1)
            .map_err(|_| InteropError::ObjectAlreadyReleased)
    }

    /// Pin the wrapper for the duration of a dereference.
    ///
    /// Returns `None` once the wrapper is released. While the guard lives,
    /// the wrapper is not recycled; the guard decrements on drop no matter
    /// how the protected operation ends.
    pub fn try_use(self: &Arc<Self>) -> Option<UseGuard> {
        if self.is_released() {
            return None;
        }
        self.use_count.fetch_add(1, Ordering::SeqCst);
        if self.is_released() {
            // Release raced ahead of us; back out.
            self.use_count.fetch_sub(1, Ordering::SeqCst);
            return None;
        }
        Some(UseGuard {
            wrapper: self.clone(),
        })
    }

    /// Return a capability pointer valid in the caller's context.
    ///
    /// Hits the per-context cache first. On a miss the query runs inline
    /// when the caller shares the wrapper's context or the object is
    /// free-threaded, and is relayed through `registry` otherwise; the
    /// result is cached on success.
    pub fn acquire_interface(
        &self,
        interface: Identifier,
        registry: &ContextRegistry,
    ) -> Result<NativePointer> {
        self.ensure_usable()?;
        let free_threaded = self.is_free_threaded();
        let caller = current_context();
        // Free-threaded pointers are valid everywhere; ignore context.
        let context_filter = if free_threaded { None } else { Some(caller) };

        if let Some(pointer) = self.entries.lock().lookup(interface, context_filter) {
            return Ok(pointer);
        }

        let pointer = if free_threaded || caller == self.context {
            self.native.query_capability(interface)?
        } else {
            let native = self.native.clone();
            registry.invoke(self.context, move || native.query_capability(interface))??
        };

        let mut table = self.entries.lock();
        if let Some(existing) = table.lookup(interface, context_filter) {
            // Lost the race with a concurrent query; return the duplicate
            // native reference and hand back the cached pointer.
            let _ = self.native.release();
            return Ok(existing);
        }
        table.insert(InterfaceEntry {
            interface,
            pointer,
            context: if free_threaded { self.context } else { caller },
        });
        Ok(pointer)
    }

    /// Number of cached interface pointers.
    pub fn cached_interfaces(&self) -> usize {
        self.entries.lock().len()
    }

    /// Report this wrapper's native cost to the accumulator.
    ///
    /// Idempotent until removed; the applied tier is remembered so the
    /// matching remove retracts exactly what was added.
    pub fn apply_memory_pressure(&self, pressure: &MemoryPressureAccumulator) {
        if self.is_bridge() {
            return;
        }
        let mut applied = self.applied_tier.lock();
        if applied.is_some() {
            return;
        }
        let tier = self.native.locality();
        pressure.add(tier_bytes(tier));
        *applied = Some(tier);
    }

    /// Retract the pressure applied at creation, if any.
    pub fn remove_memory_pressure(&self, pressure: &MemoryPressureAccumulator) {
        if let Some(tier) = self.applied_tier.lock().take() {
            pressure.remove(tier_bytes(tier));
        }
    }

    /// Return every native reference this wrapper holds and mark it
    /// released.
    ///
    /// Releases one reference per cached interface entry plus the identity
    /// reference (unless aggregated), and retracts memory pressure. A
    /// failing native release does not stop the remaining entries from
    /// being returned; the first failure is reported to the caller, which
    /// swallows it during batch cleanup.
    pub(crate) fn release_native(&self, pressure: &MemoryPressureAccumulator) -> Result<()> {
        let previous = self.flags.fetch_or(flags::RELEASED, Ordering::SeqCst);
        if previous & flags::RELEASED != 0 {
            return Err(InteropError::UseAfterRelease);
        }
        self.remove_memory_pressure(pressure);

        let entries = self.entries.lock().drain();
        let mut first_failure = None;
        for _entry in entries {
            if let Err(err) = self.native.release() {
                first_failure.get_or_insert(err);
            }
        }
        if !self.is_aggregated() {
            if let Err(err) = self.native.release() {
                first_failure.get_or_insert(err);
            }
        }
        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Context-compatibility signature for deferred-release batching.
    pub(crate) fn bucket_key(&self) -> BucketKey {
        BucketKey {
            free_threaded: self.is_free_threaded(),
            thread: self.thread,
            context: self.context,
        }
    }
}

/// Pin on a wrapper obtained from a cache hit.
///
/// Holding the guard keeps the wrapper's storage alive and its use count
/// nonzero for the duration of a dereference.
pub struct UseGuard {
    wrapper: Arc<Wrapper>,
}

impl Deref for UseGuard {
    type Target = Wrapper;

    fn deref(&self) -> &Wrapper {
        &self.wrapper
    }
}

impl Drop for UseGuard {
    fn drop(&mut self) {
        let previous = self.wrapper.use_count.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "use count underflow");
    }
}
