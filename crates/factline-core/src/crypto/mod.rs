//! SHA-256 hashing and digest-normalization primitives.

mod hash;

pub use hash::{AnchorHasher, HashError, DIGEST_HEX_LEN, ZERO_DIGEST, normalize_digest};
