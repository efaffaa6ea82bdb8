//! Identifier derivation for parameterized interface instantiations
//!
//! A parameterized interface instantiation is named by the preorder
//! flattening of its type tree: the compound type first, then each type
//! argument in declaration order. [`compute_identifier`] turns that name
//! list plus a [`MetadataResolver`] into a canonical signature and hashes
//! it into a stable [`Identifier`].

use super::builder::SignatureBuilder;
use super::identifier::{Identifier, PARAMETERIZED_NAMESPACE};
use crate::{InteropError, Result};

/// Classifies type names for signature construction.
///
/// `locate` must call exactly one `set_*` shape method on the builder per
/// invocation. The builder, not the resolver, bounds recursion: a resolver
/// may freely describe self-referential metadata and the builder will cut
/// cycles and enforce the depth ceiling.
pub trait MetadataResolver {
    /// Describe the shape of `name` by calling back into `builder`.
    fn locate(&self, name: &str, builder: &mut SignatureBuilder<'_>) -> Result<()>;
}

/// Build the canonical signature for a flattened instantiation.
///
/// `names` must describe exactly one top-level type; a compound type's
/// declared arguments are consumed from the elements that follow it.
/// Supplying fewer or more elements than the declared counts is an
/// [`InteropError::InconsistentMetadata`] failure.
pub fn compute_signature(names: &[&str], resolver: &dyn MetadataResolver) -> Result<String> {
    if names.is_empty() {
        return Err(InteropError::InconsistentMetadata(
            "no type name elements supplied".into(),
        ));
    }
    let mut builder = SignatureBuilder::new(resolver);
    for name in names {
        builder.resolve(name)?;
    }
    builder.finish()
}

/// Derive the stable identifier for a flattened instantiation.
///
/// Returns the identifier together with the signature text it was derived
/// from; the text is useful for diagnostics and owned by the caller.
pub fn compute_identifier(
    names: &[&str],
    resolver: &dyn MetadataResolver,
) -> Result<(Identifier, String)> {
    let signature = compute_signature(names, resolver)?;
    let id = Identifier::derive(&PARAMETERIZED_NAMESPACE, &signature);
    Ok((id, signature))
}
