// src/models/target.rs
//! Authenticated target file entries.

use crate::utils::crypto::{sha256_hex, sha512_hex, SHA256_NAME, SHA512_NAME};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Digest record of one target file as listed in a targets document.
///
/// `custom` carries free-form data attached by the caller (for example the
/// commit a target repository is expected to be at).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetFile {
    pub length: u64,
    pub hashes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<serde_json::Value>,
}

impl TargetFile {
    /// Computes length and SHA-256/SHA-512 digests of `content`.
    pub fn from_bytes(content: &[u8], custom: Option<serde_json::Value>) -> Self {
        let mut hashes = BTreeMap::new();
        hashes.insert(SHA256_NAME.to_string(), sha256_hex(content));
        hashes.insert(SHA512_NAME.to_string(), sha512_hex(content));
        TargetFile {
            length: content.len() as u64,
            hashes,
            custom,
        }
    }

    /// Compares `content` against this entry.
    ///
    /// # Returns
    /// `None` when length and every recorded digest match, otherwise a short
    /// description of the first mismatch.
    pub fn mismatch(&self, content: &[u8]) -> Option<String> {
        if content.len() as u64 != self.length {
            return Some(format!(
                "length {} does not match signed length {}",
                content.len(),
                self.length
            ));
        }
        if self.hashes.is_empty() {
            return Some("entry has no digests".to_string());
        }
        for (name, expected) in &self.hashes {
            let actual = match name.as_str() {
                SHA256_NAME => sha256_hex(content),
                SHA512_NAME => sha512_hex(content),
                other => return Some(format!("unsupported digest {}", other)),
            };
            if &actual != expected {
                return Some(format!("{} digest mismatch", name));
            }
        }
        None
    }
}
