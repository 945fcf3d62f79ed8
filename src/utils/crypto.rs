// src/utils/crypto.rs
//! Digest utilities.
//!
//! SHA-256 is the engine's identity hash: key ids, object ids and the
//! timestamp's snapshot digest all use it. Target files additionally record a
//! SHA-512 digest.

use ring::digest::{digest, SHA256, SHA512};

/// Name under which SHA-256 digests are stored in target hash tables.
pub const SHA256_NAME: &str = "sha256";
/// Name under which SHA-512 digests are stored in target hash tables.
pub const SHA512_NAME: &str = "sha512";

/// Computes the SHA-256 hash of the input data.
///
/// # Arguments
/// * `data` - Binary data to hash
///
/// # Returns
/// Fixed-size 32-byte array containing the hash.
pub fn hash_data(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(digest(&SHA256, data).as_ref());
    out
}

/// Lowercase hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(hash_data(data))
}

/// Lowercase hex SHA-512 of `data`.
pub fn sha512_hex(data: &[u8]) -> String {
    hex::encode(digest(&SHA512, data).as_ref())
}
