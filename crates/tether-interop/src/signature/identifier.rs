//! Stable 128-bit interface identifiers
//!
//! An [`Identifier`] names one native capability. Identifiers for
//! parameterized interface instantiations are derived deterministically
//! from the canonical signature text (see [`super::generator`]) using a
//! name-based digest: SHA-1 over the namespace identifier followed by the
//! signature bytes, truncated to 128 bits with fixed version and variant
//! bits patched in.

use sha1::{Digest, Sha1};
use std::fmt;

/// A stable 128-bit identifier for a native interface.
///
/// Stored and displayed in canonical byte order. The textual form is the
/// braced, lowercase, hyphenated rendering:
/// `{11223344-5566-7788-99aa-bbccddeeff00}`.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier([u8; 16]);

/// Namespace under which parameterized-interface identifiers are derived.
///
/// Fixed by the identifier derivation scheme; changing it would change
/// every derived identifier.
pub const PARAMETERIZED_NAMESPACE: Identifier = Identifier([
    0x11, 0xf4, 0x7a, 0xd5, 0x7b, 0x73, 0x42, 0xc0, 0xab, 0xae, 0x87, 0x8b, 0x1e, 0x16, 0xad,
    0xee,
]);

impl Identifier {
    /// Create an identifier from its 16 canonical bytes.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Identifier(bytes)
    }

    /// The canonical bytes of this identifier.
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Parse the canonical 8-4-4-4-12 hyphenated form, with or without
    /// the surrounding braces. Hyphens anywhere else are rejected.
    pub fn parse(text: &str) -> Option<Self> {
        let inner = text
            .strip_prefix('{')
            .and_then(|t| t.strip_suffix('}'))
            .unwrap_or(text);
        let raw = inner.as_bytes();
        if raw.len() != 36 {
            return None;
        }
        let mut bytes = [0u8; 16];
        let mut idx = 0;
        let mut pos = 0;
        while idx < 16 {
            if matches!(pos, 8 | 13 | 18 | 23) {
                if raw[pos] != b'-' {
                    return None;
                }
                pos += 1;
                continue;
            }
            let hi = hex_val(raw[pos])?;
            let lo = hex_val(raw[pos + 1])?;
            bytes[idx] = (hi << 4) | lo;
            idx += 1;
            pos += 2;
        }
        Some(Identifier(bytes))
    }

    /// Derive an identifier from a canonical signature under `namespace`.
    ///
    /// Deterministic: equal inputs always produce equal bytes.
    pub fn derive(namespace: &Identifier, signature: &str) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(namespace.as_bytes());
        hasher.update(signature.as_bytes());
        let digest = hasher.finalize();

        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        // Name-based (v5) identifier: patch the version nibble and the
        // variant bits so derived identifiers are recognizable as such.
        bytes[6] = (bytes[6] & 0x0f) | 0x50;
        bytes[8] = (bytes[8] & 0x3f) | 0x80;
        Identifier(bytes)
    }

    /// The version nibble (5 for derived identifiers).
    pub fn version(&self) -> u8 {
        self.0[6] >> 4
    }
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{{{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}}}",
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7], b[8], b[9], b[10], b[11], b[12],
            b[13], b[14], b[15],
        )
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: [u8; 16] = [
        0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd, 0xee,
        0xff, 0x00,
    ];

    #[test]
    fn test_display_is_braced_lowercase() {
        let id = Identifier::from_bytes(SAMPLE);
        assert_eq!(id.to_string(), "{11223344-5566-7788-99aa-bbccddeeff00}");
    }

    #[test]
    fn test_parse_round_trip() {
        let id = Identifier::from_bytes(SAMPLE);
        assert_eq!(Identifier::parse(&id.to_string()), Some(id));
        // Bare (unbraced) form is accepted too.
        assert_eq!(
            Identifier::parse("11223344-5566-7788-99aa-bbccddeeff00"),
            Some(id)
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(Identifier::parse(""), None);
        assert_eq!(Identifier::parse("{11223344}"), None);
        assert_eq!(
            Identifier::parse("{zz223344-5566-7788-99aa-bbccddeeff00}"),
            None
        );
        // Trailing junk after 16 bytes.
        assert_eq!(
            Identifier::parse("11223344-5566-7788-99aa-bbccddeeff0000"),
            None
        );
    }

    #[test]
    fn test_parse_requires_canonical_grouping() {
        // Hyphens off the 8-4-4-4-12 boundaries.
        assert_eq!(
            Identifier::parse("1122334-45566-7788-99aa-bbccddeeff00"),
            None
        );
        assert_eq!(
            Identifier::parse("{11-22-3344-5566-7788-99aabbccddeeff00}"),
            None
        );
        // No hyphens at all.
        assert_eq!(
            Identifier::parse("112233445566778899aabbccddeeff00"),
            None
        );
    }

    #[test]
    fn test_derive_is_deterministic() {
        let a = Identifier::derive(&PARAMETERIZED_NAMESPACE, "pinterface({x};i4)");
        let b = Identifier::derive(&PARAMETERIZED_NAMESPACE, "pinterface({x};i4)");
        assert_eq!(a, b);
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_derive_distinguishes_signatures() {
        let a = Identifier::derive(&PARAMETERIZED_NAMESPACE, "pinterface({x};i4)");
        let b = Identifier::derive(&PARAMETERIZED_NAMESPACE, "pinterface({x};u4)");
        assert_ne!(a, b);
    }

    #[test]
    fn test_derive_patches_version_and_variant() {
        let id = Identifier::derive(&PARAMETERIZED_NAMESPACE, "anything");
        assert_eq!(id.version(), 5);
        assert_eq!(id.as_bytes()[8] & 0xc0, 0x80);
    }
}
