// src/wallet/key_management.rs
//! Key management for the trust engine.
//!
//! The [`KeyRing`] collects every signer available to the current process and
//! every public key it knows about. It holds no trust state: which keys are
//! *authorized* for a role is decided by metadata, never by the ring.

use crate::error::{TrustError, TrustResult};
use crate::models::key::{Key, KeyId, KeySignature};
use crate::models::metadata::{attach_signature, canonical_bytes, RoleMetadata};
use crate::models::role::RoleKeys;
use crate::wallet::signer::Signer;
use log::{debug, warn};
use std::collections::BTreeMap;

/// Signing and verification key collection.
///
/// This struct provides:
/// - Signing through injected [`Signer`] capabilities
/// - Public key lookup for every signer plus verification-only keys
/// - Whole-document signing over canonical bytes
#[derive(Default)]
pub struct KeyRing {
    signers: BTreeMap<KeyId, Box<dyn Signer>>,
    verification_keys: BTreeMap<KeyId, Key>,
}

impl KeyRing {
    pub fn new() -> Self {
        KeyRing::default()
    }

    /// Adds a signer. Returns its key id.
    pub fn add_signer(&mut self, signer: Box<dyn Signer>) -> KeyId {
        let key = signer.public_key().clone();
        let key_id = key.key_id.clone();
        self.verification_keys.insert(key_id.clone(), key);
        self.signers.insert(key_id.clone(), signer);
        key_id
    }

    /// Registers a public key whose private half is not available here,
    /// e.g. a maintainer's token key exported earlier.
    pub fn add_verification_key(&mut self, key: Key) -> KeyId {
        let key_id = key.key_id.clone();
        self.verification_keys.insert(key_id.clone(), key);
        key_id
    }

    pub fn can_sign(&self, key_id: &KeyId) -> bool {
        self.signers.contains_key(key_id)
    }

    /// Public key for `key_id`.
    ///
    /// # Errors
    /// `UnknownKey` if the ring has never seen the key.
    pub fn public_key(&self, key_id: &KeyId) -> TrustResult<Key> {
        self.verification_keys
            .get(key_id)
            .cloned()
            .ok_or_else(|| TrustError::UnknownKey(key_id.clone()))
    }

    /// Signs `payload` with `key_id`.
    ///
    /// # Errors
    /// - `KeyUnavailable` if no signer for the key is loaded
    /// - whatever environment error the signer reports
    pub fn sign(&self, key_id: &KeyId, payload: &[u8]) -> TrustResult<KeySignature> {
        let signer = self
            .signers
            .get(key_id)
            .ok_or_else(|| TrustError::KeyUnavailable(key_id.to_string()))?;
        let signature = signer.sign(payload)?;
        Ok(KeySignature {
            key_id: key_id.clone(),
            signature,
        })
    }

    /// Checks `signature` over `payload` against the known public key.
    /// Unknown keys never verify.
    pub fn verify(&self, key_id: &KeyId, payload: &[u8], signature: &[u8]) -> bool {
        self.verification_keys
            .get(key_id)
            .map(|key| key.verify(payload, signature))
            .unwrap_or(false)
    }

    /// Signs `document` with each of `key_ids`.
    ///
    /// # Errors
    /// The first signing failure aborts; no partially signed document is
    /// returned.
    pub fn sign_document(&self, document: RoleMetadata, key_ids: &[KeyId]) -> TrustResult<RoleMetadata> {
        let payload = canonical_bytes(&document)?;
        let mut document = document;
        for key_id in key_ids {
            let signature = self.sign(key_id, &payload)?;
            debug!(
                "signed {} v{} with key {}",
                document.role,
                document.version,
                key_id.short()
            );
            document = attach_signature(document, signature.key_id, signature.signature);
        }
        Ok(document)
    }

    /// Signs `document` with every locally available key of `authority`.
    ///
    /// Keys whose signer is absent (e.g. an unplugged token) are skipped with
    /// a warning as long as the present ones can still meet the threshold.
    ///
    /// # Errors
    /// `HardwareNotPresent` for the first absent authorized key when the
    /// present signers alone fall short of the threshold.
    pub fn sign_with_available(&self, document: RoleMetadata, authority: &RoleKeys) -> TrustResult<RoleMetadata> {
        let mut available = Vec::new();
        let mut absent = Vec::new();
        for key_id in &authority.key_ids {
            match self.signers.get(key_id) {
                Some(signer) if signer.is_present() => available.push(key_id.clone()),
                Some(_) => {
                    warn!("signer for key {} is not present, skipping", key_id.short());
                    absent.push(key_id.clone());
                }
                None => {}
            }
        }
        if (available.len() as u32) < authority.threshold {
            if let Some(missing) = absent.into_iter().next() {
                return Err(TrustError::HardwareNotPresent(missing));
            }
        }
        self.sign_document(document, &available)
    }

    pub fn signer_ids(&self) -> impl Iterator<Item = &KeyId> {
        self.signers.keys()
    }
}
