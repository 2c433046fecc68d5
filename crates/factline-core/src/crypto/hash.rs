//! SHA-256 hashing for anchors, blocks, and Merkle nodes.
//!
//! Every hash in the ledger is a 64-character lower-hex SHA-256 digest.
//! Digests arriving from callers may carry an optional `0x` prefix or
//! upper-case characters; [`normalize_digest`] is the single normalization
//! path every backend key goes through.

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Length of a SHA-256 digest in hex characters.
pub const DIGEST_HEX_LEN: usize = 64;

/// The all-zero digest used as the genesis sentinel.
pub const ZERO_DIGEST: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Errors produced when normalizing a caller-supplied digest.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum HashError {
    /// The digest has the wrong number of hex characters.
    #[error("invalid digest length: expected {expected} hex characters, got {actual}")]
    InvalidLength {
        /// Expected hex length.
        expected: usize,
        /// Actual hex length after stripping any `0x` prefix.
        actual: usize,
    },

    /// The digest contains a non-hex character.
    #[error("invalid digest: non-hex character at position {position}")]
    InvalidCharacter {
        /// Zero-based position of the offending character.
        position: usize,
    },
}

/// Hasher for ledger content using SHA-256.
///
/// All hashing in the ledger goes through this facade so the digest and
/// encoding rules stay in one place.
pub struct AnchorHasher;

impl AnchorHasher {
    /// Hashes raw bytes to a lower-hex digest.
    #[must_use]
    pub fn hash_bytes(content: &[u8]) -> String {
        hex::encode(Sha256::digest(content))
    }

    /// Hashes a UTF-8 string to a lower-hex digest.
    #[must_use]
    pub fn hash_str(content: &str) -> String {
        Self::hash_bytes(content.as_bytes())
    }

    /// Hashes two hex digests into their parent node digest.
    ///
    /// The combine rule concatenates the hex strings, so both sides of a
    /// Merkle proof must agree on the hex (not raw byte) domain.
    #[must_use]
    pub fn hash_pair(left: &str, right: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(left.as_bytes());
        hasher.update(right.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Normalizes a caller-supplied digest: strips an optional `0x` prefix,
/// lower-cases, and enforces the 64-hex shape.
///
/// # Errors
///
/// Returns [`HashError`] if the digest has the wrong length or contains a
/// non-hex character.
pub fn normalize_digest(input: &str) -> Result<String, HashError> {
    let stripped = input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
        .unwrap_or(input);

    if stripped.len() != DIGEST_HEX_LEN {
        return Err(HashError::InvalidLength {
            expected: DIGEST_HEX_LEN,
            actual: stripped.len(),
        });
    }

    for (position, c) in stripped.char_indices() {
        if !c.is_ascii_hexdigit() {
            return Err(HashError::InvalidCharacter { position });
        }
    }

    Ok(stripped.to_ascii_lowercase())
}

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn test_hash_bytes_deterministic() {
        let h1 = AnchorHasher::hash_bytes(b"hello");
        let h2 = AnchorHasher::hash_bytes(b"hello");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), DIGEST_HEX_LEN);
        assert_ne!(h1, AnchorHasher::hash_bytes(b"other"));
    }

    #[test]
    fn test_hash_known_vector() {
        // sha256("hello")
        assert_eq!(
            AnchorHasher::hash_str("hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_hash_pair_is_order_sensitive() {
        let a = AnchorHasher::hash_str("a");
        let b = AnchorHasher::hash_str("b");
        assert_ne!(
            AnchorHasher::hash_pair(&a, &b),
            AnchorHasher::hash_pair(&b, &a)
        );
    }

    #[test]
    fn test_normalize_strips_prefix_and_lowercases() {
        let upper = format!("0x{}", "A".repeat(DIGEST_HEX_LEN));
        let normalized = normalize_digest(&upper).unwrap();
        assert_eq!(normalized, "a".repeat(DIGEST_HEX_LEN));
    }

    #[test]
    fn test_normalize_already_canonical() {
        let digest = AnchorHasher::hash_str("payload");
        assert_eq!(normalize_digest(&digest).unwrap(), digest);
    }

    #[test]
    fn test_normalize_rejects_bad_length() {
        let result = normalize_digest("abc123");
        assert!(matches!(
            result,
            Err(HashError::InvalidLength { actual: 6, .. })
        ));
    }

    #[test]
    fn test_normalize_rejects_non_hex() {
        let bad = format!("{}zz", "a".repeat(DIGEST_HEX_LEN - 2));
        let result = normalize_digest(&bad);
        assert!(matches!(result, Err(HashError::InvalidCharacter { .. })));
    }

    #[test]
    fn test_zero_digest_shape() {
        assert_eq!(ZERO_DIGEST.len(), DIGEST_HEX_LEN);
        assert!(normalize_digest(ZERO_DIGEST).is_ok());
    }
}
