//! Shared test doubles for integration tests
#![allow(dead_code)]

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::thread::ThreadId;
use tether_interop::{
    Collector, Identifier, InteropError, Locality, NativeIdentity, NativeObject, NativePointer,
    Result,
};

/// Scriptable native object recording how it is used.
pub struct TestObject {
    identity: NativeIdentity,
    refs: AtomicU32,
    queries: AtomicU32,
    free_threaded: bool,
    locality: Locality,
    pub refuse_queries: AtomicBool,
    pub fail_release: AtomicBool,
    /// Panic on the next release call, then behave again.
    pub panic_release_once: AtomicBool,
    /// Thread each release call ran on, in order.
    pub release_threads: Mutex<Vec<ThreadId>>,
}

impl TestObject {
    pub fn new(identity: usize) -> Self {
        TestObject {
            identity: NativeIdentity::from_raw(identity),
            refs: AtomicU32::new(0),
            queries: AtomicU32::new(0),
            free_threaded: false,
            locality: Locality::ProcessLocal,
            refuse_queries: AtomicBool::new(false),
            fail_release: AtomicBool::new(false),
            panic_release_once: AtomicBool::new(false),
            release_threads: Mutex::new(Vec::new()),
        }
    }

    pub fn free_threaded(identity: usize) -> Self {
        TestObject {
            free_threaded: true,
            ..TestObject::new(identity)
        }
    }

    pub fn with_locality(identity: usize, locality: Locality) -> Self {
        TestObject {
            locality,
            ..TestObject::new(identity)
        }
    }

    pub fn refs(&self) -> u32 {
        self.refs.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> u32 {
        self.queries.load(Ordering::SeqCst)
    }
}

impl NativeObject for TestObject {
    fn identity(&self) -> NativeIdentity {
        self.identity
    }

    fn add_ref(&self) -> u32 {
        self.refs.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn release(&self) -> Result<u32> {
        self.release_threads.lock().push(std::thread::current().id());
        if self.panic_release_once.swap(false, Ordering::SeqCst) {
            panic!("native object fault during release");
        }
        if self.fail_release.load(Ordering::SeqCst) {
            return Err(InteropError::NotFound);
        }
        let previous = self.refs.fetch_sub(1, Ordering::SeqCst);
        assert!(previous > 0, "native refcount underflow");
        Ok(previous - 1)
    }

    fn query_capability(&self, interface: Identifier) -> Result<NativePointer> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.refuse_queries.load(Ordering::SeqCst) {
            return Err(InteropError::InterfaceNotSupported(interface));
        }
        self.refs.fetch_add(1, Ordering::SeqCst);
        Ok(NativePointer::from_raw(
            self.identity.as_raw() ^ ((interface.as_bytes()[0] as usize) << 8),
        ))
    }

    fn locality(&self) -> Locality {
        self.locality
    }

    fn is_free_threaded(&self) -> bool {
        self.free_threaded
    }
}

/// Collector counting what the bridge reports.
#[derive(Default)]
pub struct RecordingCollector {
    pub added: AtomicU64,
    pub removed: AtomicU64,
    pub collections: AtomicU64,
}

impl Collector for RecordingCollector {
    fn add_memory_pressure(&self, bytes: usize) {
        self.added.fetch_add(bytes as u64, Ordering::SeqCst);
    }

    fn remove_memory_pressure(&self, bytes: usize) {
        self.removed.fetch_add(bytes as u64, Ordering::SeqCst);
    }

    fn collection_count(&self) -> u64 {
        self.collections.load(Ordering::SeqCst)
    }

    fn collect(&self) {
        self.collections.fetch_add(1, Ordering::SeqCst);
    }
}

/// Interface identifier with a distinguishing first byte.
pub fn interface(tag: u8) -> Identifier {
    let mut bytes = [0u8; 16];
    bytes[0] = tag;
    Identifier::from_bytes(bytes)
}
