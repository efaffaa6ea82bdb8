//! Canonical type-signature construction
//!
//! [`SignatureBuilder`] writes the canonical ASCII signature of a type as a
//! metadata resolver classifies it. Compound types declare how many child
//! signatures follow; the builder keeps the pending-child counts on an
//! explicit stack and emits each closing delimiter exactly when a compound's
//! counted children have been consumed, so arbitrarily deep nesting balances
//! without a parse tree.
//!
//! A resolution path of in-flight runtime-class / interface-group names
//! guards against self-referential default-interface chains: a name already
//! on the path emits the [`CYCLE_SENTINEL`] token instead of recursing.

use super::generator::MetadataResolver;
use super::identifier::Identifier;
use crate::{InteropError, Result};
use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;

/// Ceiling on `recursion depth + nesting depth` during signature
/// construction. Resolver metadata is author-controlled and must not be
/// able to exhaust the call stack.
pub const MAX_RESOLUTION_DEPTH: usize = 64;

/// Token emitted in place of a default-interface signature when the
/// owning class is already being resolved.
pub const CYCLE_SENTINEL: &str = "cycle";

/// Short codes for the primitive type names a resolver never sees.
static PRIMITIVE_CODES: Lazy<FxHashMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut m = FxHashMap::default();
    m.insert("UInt8", "u1");
    m.insert("Int16", "i2");
    m.insert("UInt16", "u2");
    m.insert("Int32", "i4");
    m.insert("UInt32", "u4");
    m.insert("Int64", "i8");
    m.insert("UInt64", "u8");
    m.insert("Single", "f4");
    m.insert("Double", "f8");
    m.insert("Boolean", "b1");
    m.insert("Char16", "c2");
    m.insert("String", "string");
    m.insert("Guid", "g16");
    m.insert("Object", "cinterface(IInspectable)");
    m
});

/// Look up the canonical short code for a primitive type name.
pub fn primitive_code(name: &str) -> Option<&'static str> {
    PRIMITIVE_CODES.get(name).copied()
}

/// Incremental writer for canonical type signatures.
///
/// Handed to [`MetadataResolver::locate`], which must call exactly one of
/// the `set_*` shape methods per invocation.
pub struct SignatureBuilder<'a> {
    resolver: &'a dyn MetadataResolver,
    text: String,
    /// Pending-child counts of open compound types, innermost last.
    frames: Vec<usize>,
    /// Runtime-class / interface-group names currently being resolved.
    path: Vec<String>,
    /// Depth of in-flight resolver invocations.
    depth: usize,
    /// Whether the current `locate` call has emitted its shape yet.
    shape_set: bool,
    /// Whether the single top-level type has been fully consumed.
    complete: bool,
}

impl<'a> SignatureBuilder<'a> {
    pub(crate) fn new(resolver: &'a dyn MetadataResolver) -> Self {
        SignatureBuilder {
            resolver,
            text: String::new(),
            frames: Vec::new(),
            path: Vec::new(),
            depth: 0,
            shape_set: false,
            complete: false,
        }
    }

    /// Resolve one type name into the signature.
    ///
    /// Primitives are appended directly; anything else is classified by the
    /// resolver, which calls back into exactly one `set_*` method.
    pub(crate) fn resolve(&mut self, name: &str) -> Result<()> {
        if self.complete {
            return Err(InteropError::InconsistentMetadata(format!(
                "argument `{name}` supplied after the top-level type was complete"
            )));
        }
        if let Some(code) = primitive_code(name) {
            self.write_leaf(code);
            return Ok(());
        }

        self.depth += 1;
        if self.depth + self.frames.len() > MAX_RESOLUTION_DEPTH {
            self.depth -= 1;
            return Err(InteropError::RecursionLimitExceeded);
        }
        let outer_shape = std::mem::replace(&mut self.shape_set, false);
        let resolver = self.resolver;
        let outcome = resolver.locate(name, self);
        let emitted = self.shape_set;
        self.shape_set = outer_shape;
        self.depth -= 1;
        outcome?;
        if !emitted {
            return Err(InteropError::InconsistentMetadata(format!(
                "resolver classified `{name}` without emitting a shape"
            )));
        }
        Ok(())
    }

    /// Verify balance and hand back the finished signature text.
    pub(crate) fn finish(self) -> Result<String> {
        if !self.frames.is_empty() {
            return Err(InteropError::InconsistentMetadata(format!(
                "{} compound type(s) left with unconsumed arguments",
                self.frames.len()
            )));
        }
        if !self.complete {
            return Err(InteropError::InconsistentMetadata(
                "no top-level type was supplied".into(),
            ));
        }
        Ok(self.text)
    }

    /// A plain interface, written as its identifier text.
    pub fn set_interface(&mut self, id: Identifier) -> Result<()> {
        self.claim_shape()?;
        self.write_leaf(&id.to_string());
        Ok(())
    }

    /// A delegate, written as `delegate({identifier})`.
    pub fn set_delegate(&mut self, id: Identifier) -> Result<()> {
        self.claim_shape()?;
        self.write_leaf(&format!("delegate({id})"));
        Ok(())
    }

    /// An enum with a primitive backing type: `enum(Name;code)`.
    pub fn set_enum(&mut self, name: &str, backing: &str) -> Result<()> {
        self.claim_shape()?;
        let code = primitive_code(backing).ok_or_else(|| {
            InteropError::InconsistentMetadata(format!(
                "enum `{name}` backed by non-primitive `{backing}`"
            ))
        })?;
        self.open_compound(&format!("enum({name}"), 1)?;
        self.write_leaf(code);
        Ok(())
    }

    /// A struct whose fields resolve recursively: `struct(Name;f1;f2;…)`.
    pub fn set_struct(&mut self, name: &str, field_types: &[&str]) -> Result<()> {
        self.claim_shape()?;
        if field_types.is_empty() {
            return Err(InteropError::InconsistentMetadata(format!(
                "struct `{name}` declared no fields"
            )));
        }
        self.open_compound(&format!("struct({name}"), field_types.len())?;
        for field in field_types {
            self.resolve(field)?;
        }
        Ok(())
    }

    /// A parameterized interface instantiation: `pinterface({id};args…)`.
    ///
    /// The `arity` arguments follow as further top-level name elements.
    pub fn set_parameterized_interface(&mut self, id: Identifier, arity: usize) -> Result<()> {
        self.claim_shape()?;
        if arity == 0 {
            return Err(InteropError::InconsistentMetadata(format!(
                "parameterized interface {id} declared zero type arguments"
            )));
        }
        self.open_compound(&format!("pinterface({id}"), arity)
    }

    /// A runtime class with a default interface: `rc(Name;default)`.
    pub fn set_runtime_class(&mut self, name: &str, default_interface: &str) -> Result<()> {
        self.claim_shape()?;
        self.compound_with_default("rc", name, default_interface)
    }

    /// An interface group with a default interface: `ig(Name;default)`.
    pub fn set_interface_group(&mut self, name: &str, default_interface: &str) -> Result<()> {
        self.claim_shape()?;
        self.compound_with_default("ig", name, default_interface)
    }

    fn compound_with_default(
        &mut self,
        tag: &str,
        name: &str,
        default_interface: &str,
    ) -> Result<()> {
        self.open_compound(&format!("{tag}({name}"), 1)?;
        if self.path.iter().any(|n| n == name) {
            // Already resolving this name further up the chain; cut the
            // cycle here instead of recursing.
            self.write_leaf(CYCLE_SENTINEL);
            return Ok(());
        }
        self.path.push(name.to_owned());
        let outcome = self.resolve(default_interface);
        self.path.pop();
        outcome
    }

    fn claim_shape(&mut self) -> Result<()> {
        if self.shape_set {
            return Err(InteropError::InconsistentMetadata(
                "resolver emitted more than one shape for a single type".into(),
            ));
        }
        self.shape_set = true;
        Ok(())
    }

    /// Open a compound expecting `children` nested signatures.
    fn open_compound(&mut self, prefix: &str, children: usize) -> Result<()> {
        if self.depth + self.frames.len() + 1 > MAX_RESOLUTION_DEPTH {
            return Err(InteropError::RecursionLimitExceeded);
        }
        if !self.frames.is_empty() {
            self.text.push(';');
        }
        self.text.push_str(prefix);
        self.frames.push(children);
        Ok(())
    }

    /// Append a complete (childless) signature element.
    fn write_leaf(&mut self, element: &str) {
        if !self.frames.is_empty() {
            self.text.push(';');
        }
        self.text.push_str(element);
        self.element_done();
    }

    /// Account for one finished element, closing any compounds whose child
    /// counts reach zero. Closing a compound completes an element of its
    /// parent in turn, so the close cascades outward.
    fn element_done(&mut self) {
        while let Some(pending) = self.frames.last_mut() {
            *pending -= 1;
            if *pending > 0 {
                return;
            }
            self.text.push(')');
            self.frames.pop();
        }
        self.complete = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_codes() {
        assert_eq!(primitive_code("Int32"), Some("i4"));
        assert_eq!(primitive_code("String"), Some("string"));
        assert_eq!(primitive_code("Object"), Some("cinterface(IInspectable)"));
        assert_eq!(primitive_code("NotAPrimitive"), None);
    }
}
