// src/models/key.rs
//! Public key records and signatures.
//!
//! A [`Key`] is immutable once created. Its identity is the [`KeyId`], the
//! SHA-256 of the canonical serialization of its scheme and public bytes, so
//! the same public key always gets the same id no matter where it is stored.

use crate::error::{TrustError, TrustResult};
use crate::utils::crypto::sha256_hex;
use crate::utils::serialization::{base64_bytes, canonical_json};
use k256::ecdsa::signature::Verifier;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;

/// Content-derived identifier of a public key (lowercase hex SHA-256).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyId(String);

impl KeyId {
    /// Wraps an existing hex identifier.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        KeyId(hex.into().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, for log lines.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(8);
        &self.0[..end]
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Signature scheme of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyScheme {
    #[serde(rename = "ed25519")]
    Ed25519,
    #[serde(rename = "ecdsa-secp256k1")]
    EcdsaSecp256k1,
}

impl KeyScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyScheme::Ed25519 => "ed25519",
            KeyScheme::EcdsaSecp256k1 => "ecdsa-secp256k1",
        }
    }
}

impl std::str::FromStr for KeyScheme {
    type Err = TrustError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ed25519" => Ok(KeyScheme::Ed25519),
            "ecdsa-secp256k1" | "ecdsa" => Ok(KeyScheme::EcdsaSecp256k1),
            other => Err(TrustError::KeyFormat(format!("unsupported scheme {}", other))),
        }
    }
}

/// Where the private half of a key lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyOrigin {
    File,
    HardwareToken,
}

/// A public verification key.
///
/// # Fields
/// - `key_id`: content hash of `{scheme, public}`
/// - `scheme`: signature algorithm
/// - `public_key`: raw public key bytes (32-byte Ed25519 key or SEC1 point)
/// - `origin`: file-backed or hardware-backed private half
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
    pub key_id: KeyId,
    pub scheme: KeyScheme,
    #[serde(rename = "public", with = "base64_bytes")]
    pub public_key: Vec<u8>,
    pub origin: KeyOrigin,
}

impl Key {
    /// Creates a key record and derives its id.
    ///
    /// # Errors
    /// Returns `KeyFormat` if the public bytes do not parse for `scheme`.
    pub fn new(scheme: KeyScheme, public_key: Vec<u8>, origin: KeyOrigin) -> TrustResult<Self> {
        check_public_key(scheme, &public_key)?;
        let key_id = derive_key_id(scheme, &public_key)?;
        Ok(Key {
            key_id,
            scheme,
            public_key,
            origin,
        })
    }

    /// Recomputes the id from the key material and compares it to `key_id`.
    ///
    /// Keys read from untrusted documents go through this before use so a
    /// document cannot pair a known id with foreign key material.
    pub fn has_consistent_id(&self) -> bool {
        derive_key_id(self.scheme, &self.public_key)
            .map(|id| id == self.key_id)
            .unwrap_or(false)
    }

    /// Verifies `signature` over `payload` with this key.
    ///
    /// # Returns
    /// `true` only for a well-formed signature that verifies; malformed keys
    /// or signatures yield `false`.
    pub fn verify(&self, payload: &[u8], signature: &[u8]) -> bool {
        match self.scheme {
            KeyScheme::Ed25519 => {
                ring::signature::UnparsedPublicKey::new(&ring::signature::ED25519, &self.public_key)
                    .verify(payload, signature)
                    .is_ok()
            }
            KeyScheme::EcdsaSecp256k1 => {
                let Ok(verifying_key) = k256::ecdsa::VerifyingKey::from_sec1_bytes(&self.public_key)
                else {
                    return false;
                };
                let Ok(signature) = k256::ecdsa::Signature::from_slice(signature) else {
                    return false;
                };
                verifying_key.verify(payload, &signature).is_ok()
            }
        }
    }
}

fn derive_key_id(scheme: KeyScheme, public_key: &[u8]) -> TrustResult<KeyId> {
    let canonical = canonical_json(&json!({
        "scheme": scheme.as_str(),
        "public": base64::encode(public_key),
    }))?;
    Ok(KeyId(sha256_hex(&canonical)))
}

fn check_public_key(scheme: KeyScheme, public_key: &[u8]) -> TrustResult<()> {
    match scheme {
        KeyScheme::Ed25519 if public_key.len() != 32 => Err(TrustError::KeyFormat(format!(
            "expected 32 byte ed25519 key, got {} bytes",
            public_key.len()
        ))),
        KeyScheme::Ed25519 => Ok(()),
        KeyScheme::EcdsaSecp256k1 => k256::ecdsa::VerifyingKey::from_sec1_bytes(public_key)
            .map(|_| ())
            .map_err(|e| TrustError::KeyFormat(format!("invalid secp256k1 key: {}", e))),
    }
}

/// One signature attached to a metadata document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySignature {
    pub key_id: KeyId,
    #[serde(rename = "sig", with = "base64_bytes")]
    pub signature: Vec<u8>,
}
