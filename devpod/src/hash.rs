use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::DevPodResult;

/// Returns the lowercase hex SHA-256 digest of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Hashes the JSON serialization of `value`.
///
/// Maps are ordered in every type hashed here, so equal values always hash equally.
pub fn hash_json<T: Serialize>(value: &T) -> DevPodResult<String> {
    let bytes = serde_json::to_vec(value)?;

    Ok(sha256_hex(&bytes))
}
