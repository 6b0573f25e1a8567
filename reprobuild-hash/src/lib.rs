//! SHA-256 helpers shared by the packaging codec and the build pipeline.
//!
//! Digests are computed over raw bytes only. File metadata (mtime,
//! permissions, path) never participates, so the same content hashes the
//! same on every machine.

use sha2::{Digest, Sha256};

/// Name recorded in manifests next to every digest produced here.
pub const HASH_ALGORITHM: &str = "sha256";

/// Lowercase hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
