//! Tether native-object interop bridge
//!
//! This crate is the bridge a managed runtime uses to hold, cache, and
//! safely release handles to reference-counted objects living outside the
//! managed heap:
//! - Wrapper cache with at-most-one-wrapper-per-identity semantics
//! - Deferred, context-batched native release
//! - Memory-pressure accounting toward the collector
//! - Deterministic 128-bit identifiers for parameterized interface
//!   instantiations
//!
//! Collaborators — the native objects themselves, the collector, and the
//! metadata resolver — are consumed through traits; this crate produces no
//! marshaling, parsing, or logging of its own.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod cache;
pub mod cleanup;
pub mod collector;
pub mod context;
pub mod domain;
pub mod native;
pub mod pressure;
pub mod signature;
pub mod wrapper;

pub use cache::WrapperCache;
pub use cleanup::DeferredReleaseList;
pub use collector::{Collector, NullCollector};
pub use context::{current_context, ContextGuard, ContextId, ContextRegistry};
pub use domain::{Domain, DomainOptions};
pub use native::{Locality, NativeIdentity, NativeObject, NativePointer};
pub use pressure::{tier_bytes, MemoryPressureAccumulator, PressurePolicy};
pub use signature::{
    compute_identifier, compute_signature, Identifier, MetadataResolver, SignatureBuilder,
    CYCLE_SENTINEL, MAX_RESOLUTION_DEPTH, PARAMETERIZED_NAMESPACE,
};
pub use wrapper::{InterfaceEntry, UseGuard, Wrapper, WrapperState, INLINE_CACHE_SLOTS};

/// Interop bridge errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InteropError {
    /// The requested item does not exist.
    #[error("Not found")]
    NotFound,

    /// Wrapper or bookkeeping allocation failed.
    #[error("Allocation failure")]
    AllocationFailure,

    /// The native object refused a capability query.
    #[error("Interface not supported: {0}")]
    InterfaceNotSupported(signature::Identifier),

    /// The target execution context no longer exists.
    #[error("Context gone: {0:?}")]
    ContextGone(context::ContextId),

    /// Signature construction exceeded the recursion ceiling.
    #[error("Recursion limit exceeded")]
    RecursionLimitExceeded,

    /// Type metadata contradicted itself during signature construction.
    #[error("Inconsistent metadata: {0}")]
    InconsistentMetadata(String),

    /// Operation on a wrapper whose native references were already
    /// returned.
    #[error("Use after release")]
    UseAfterRelease,

    /// The cache entry no longer matches the wrapper being de-registered.
    #[error("Object already released")]
    ObjectAlreadyReleased,
}

/// Result type for interop operations
pub type Result<T> = std::result::Result<T, InteropError>;
