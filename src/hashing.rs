//! Content hashing for uploaded assets.
//!
//! Every stored object is identified by the SHA-256 of the exact bytes that
//! were uploaded (`storedSha256` in the manifest). Downstream renderers use the
//! digest to verify what they fetched; nothing here enforces security policy.
//!
//! The same digest also feeds short fragments used to keep truncated object
//! names unique (see [`crate::naming`]).

use sha2::{Digest, Sha256};

/// SHA-256 of a byte buffer as 64 lowercase hex characters.
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// First `len` hex characters of the SHA-256 of `text` (max 64).
pub fn short_digest(text: &str, len: usize) -> String {
    let mut hex = sha256_hex(text.as_bytes());
    hex.truncate(len.min(64));
    hex
}
