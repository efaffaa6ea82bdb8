//! The native object boundary
//!
//! Everything the bridge knows about an externally managed object goes
//! through [`NativeObject`]: reference counting, capability queries, and a
//! stable identity pointer returned consistently across queries.

use crate::signature::Identifier;
use crate::Result;

/// Opaque stable value identifying a native object.
///
/// Two capability queries against the same underlying object always report
/// the same identity. Non-owning: holding a `NativeIdentity` confers no
/// reference.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct NativeIdentity(usize);

impl NativeIdentity {
    /// Wrap a raw identity value.
    pub const fn from_raw(raw: usize) -> Self {
        NativeIdentity(raw)
    }

    /// The raw identity value.
    pub const fn as_raw(self) -> usize {
        self.0
    }
}

/// Opaque non-owning pointer value for one cached capability.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct NativePointer(usize);

impl NativePointer {
    /// Wrap a raw pointer value.
    pub const fn from_raw(raw: usize) -> Self {
        NativePointer(raw)
    }

    /// The raw pointer value.
    pub const fn as_raw(self) -> usize {
        self.0
    }
}

/// Threading/locality classification of a native object.
///
/// Selects the memory-pressure tier reported to the collector: a remote
/// proxy pins far more untracked resources than a same-process object,
/// and external-framework objects carry their own weight tiers.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Locality {
    /// Same-process, same-machine object.
    ProcessLocal,
    /// Out-of-process object on the same machine.
    MachineLocal,
    /// Cross-machine proxy.
    Remote,
    /// External-framework object, light weight tier.
    ExternalLow,
    /// External-framework object, medium weight tier.
    ExternalMedium,
    /// External-framework object, heavy weight tier.
    ExternalHigh,
}

/// A reference-counted native object reachable through capability queries.
///
/// `add_ref`/`release` follow the usual conventions: every successful
/// `query_capability` takes one reference that the caller returns with
/// `release`. `release` is fallible because a misbehaving object can fail
/// its own teardown; batch cleanup swallows such failures per object.
pub trait NativeObject: Send + Sync {
    /// Stable identity of this object.
    fn identity(&self) -> NativeIdentity;

    /// Take one reference; returns the new count.
    fn add_ref(&self) -> u32;

    /// Return one reference; returns the remaining count.
    fn release(&self) -> Result<u32>;

    /// Query for a capability, taking a reference on success.
    ///
    /// Fails with [`crate::InteropError::InterfaceNotSupported`] when the
    /// object refuses the interface.
    fn query_capability(&self, interface: Identifier) -> Result<NativePointer>;

    /// Locality classification, used for memory-pressure accounting.
    fn locality(&self) -> Locality {
        Locality::ProcessLocal
    }

    /// Whether this object may be called from any context without
    /// marshaling.
    fn is_free_threaded(&self) -> bool {
        false
    }

    /// Whether this object participates in an external lifetime-tracking
    /// bridge. Bridge objects are exempt from memory-pressure accounting;
    /// the tracking layer owns their cost.
    fn is_bridge(&self) -> bool {
        false
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Shared native-object double for unit tests.

    use super::*;
    use crate::InteropError;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    /// Scriptable in-memory native object.
    pub(crate) struct FakeNative {
        identity: NativeIdentity,
        refs: AtomicU32,
        queries: AtomicU32,
        releases: AtomicU32,
        free_threaded: bool,
        bridge: bool,
        locality: Locality,
        pub(crate) refuse_queries: AtomicBool,
        pub(crate) fail_release: AtomicBool,
    }

    impl FakeNative {
        pub(crate) fn new(identity: usize) -> Self {
            FakeNative {
                identity: NativeIdentity::from_raw(identity),
                refs: AtomicU32::new(0),
                queries: AtomicU32::new(0),
                releases: AtomicU32::new(0),
                free_threaded: false,
                bridge: false,
                locality: Locality::ProcessLocal,
                refuse_queries: AtomicBool::new(false),
                fail_release: AtomicBool::new(false),
            }
        }

        pub(crate) fn free_threaded(identity: usize) -> Self {
            FakeNative {
                free_threaded: true,
                ..FakeNative::new(identity)
            }
        }

        pub(crate) fn with_locality(identity: usize, locality: Locality) -> Self {
            FakeNative {
                locality,
                ..FakeNative::new(identity)
            }
        }

        pub(crate) fn bridge(identity: usize) -> Self {
            FakeNative {
                bridge: true,
                ..FakeNative::new(identity)
            }
        }

        pub(crate) fn refs(&self) -> u32 {
            self.refs.load(Ordering::SeqCst)
        }

        pub(crate) fn queries(&self) -> u32 {
            self.queries.load(Ordering::SeqCst)
        }

        pub(crate) fn releases(&self) -> u32 {
            self.releases.load(Ordering::SeqCst)
        }
    }

    impl NativeObject for FakeNative {
        fn identity(&self) -> NativeIdentity {
            self.identity
        }

        fn add_ref(&self) -> u32 {
            self.refs.fetch_add(1, Ordering::SeqCst) + 1
        }

        fn release(&self) -> Result<u32> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            if self.fail_release.load(Ordering::SeqCst) {
                return Err(InteropError::NotFound);
            }
            let prev = self.refs.fetch_sub(1, Ordering::SeqCst);
            assert!(prev > 0, "native refcount underflow");
            Ok(prev - 1)
        }

        fn query_capability(&self, interface: Identifier) -> Result<NativePointer> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            if self.refuse_queries.load(Ordering::SeqCst) {
                return Err(InteropError::InterfaceNotSupported(interface));
            }
            self.refs.fetch_add(1, Ordering::SeqCst);
            // Derive a distinct pointer value per interface.
            let raw = self.identity.as_raw() ^ (interface.as_bytes()[0] as usize) << 8;
            Ok(NativePointer::from_raw(raw))
        }

        fn locality(&self) -> Locality {
            self.locality
        }

        fn is_free_threaded(&self) -> bool {
            self.free_threaded
        }

        fn is_bridge(&self) -> bool {
            self.bridge
        }
    }
}
