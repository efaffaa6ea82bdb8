//! Type signatures and stable interface identifiers
//!
//! Parameterized (generic) interface instantiations are identified by a
//! deterministic 128-bit identifier derived from a canonical signature of
//! the instantiation. The signature is built by recursively classifying
//! type names through a [`MetadataResolver`], with bounded recursion and a
//! cycle guard for self-referential default-interface chains.

mod builder;
mod generator;
mod identifier;

pub use builder::{primitive_code, SignatureBuilder, CYCLE_SENTINEL, MAX_RESOLUTION_DEPTH};
pub use generator::{compute_identifier, compute_signature, MetadataResolver};
pub use identifier::{Identifier, PARAMETERIZED_NAMESPACE};
