//! Drift-detection fingerprint over the three policy-bearing config files.

use sha2::{Digest, Sha256};

const HASH_PREFIX_LEN: usize = 16;

/// First 16 hex characters of `sha256(policy_bytes || signals_bytes || universe_bytes)`.
///
/// Concatenation order is fixed so the hash is stable under byte-identical
/// inputs and changes whenever any byte of any of the three files changes
/// (spec §8).
pub fn config_hash(policy_bytes: &[u8], signals_bytes: &[u8], universe_bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(policy_bytes);
    hasher.update(signals_bytes);
    hasher.update(universe_bytes);
    let digest = hasher.finalize();
    hex::encode(digest)[..HASH_PREFIX_LEN].to_string()
}
