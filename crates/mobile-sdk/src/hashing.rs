//! Truncated SHA-256 digests used to build downstream identifiers.

use sha2::{Digest, Sha256};

/// Lowercase hex of the first `bytes` bytes of SHA-256(`input`). `bytes` is clamped to the
/// digest length.
pub fn sha256_hex(input: &str, bytes: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..bytes.min(digest.len())])
}

/// 10 hex characters (40 bits).
pub fn hash10(input: &str) -> String {
    sha256_hex(input, 5)
}

/// 50 hex characters (200 bits).
pub fn hash50(input: &str) -> String {
    sha256_hex(input, 25)
}
