// src/services/verifier.rs
//! Threshold signature verification.
//!
//! Verification is a pure function of a document, a key table and an
//! authority (`RoleKeys`). Signatures from keys outside the authority are
//! ignored rather than rejected, so old and new keys may co-sign during a
//! rotation without breaking verifiers that only know one generation.

use crate::error::TrustError;
use crate::models::key::{Key, KeyId};
use crate::models::metadata::{canonical_bytes, RoleMetadata};
use crate::models::role::{RoleKeys, RoleName};
use log::debug;
use std::collections::{BTreeMap, BTreeSet};

/// Why a document failed verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnverifiedReason {
    ThresholdNotMet { required: u32, valid: u32 },
    BadSignature(KeyId),
    UnknownKey(KeyId),
    /// The signed portion could not be serialized.
    Malformed(String),
}

/// Outcome of [`SignatureVerifier::verify_document`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// Distinct authorized keys with a valid signature.
    Verified { signers: BTreeSet<KeyId> },
    Unverified(UnverifiedReason),
}

impl Verification {
    pub fn is_verified(&self) -> bool {
        matches!(self, Verification::Verified { .. })
    }

    /// Converts into a result, naming `role` in threshold errors.
    pub fn into_result(self, role: &RoleName) -> Result<BTreeSet<KeyId>, TrustError> {
        match self {
            Verification::Verified { signers } => Ok(signers),
            Verification::Unverified(UnverifiedReason::ThresholdNotMet { required, valid }) => {
                Err(TrustError::ThresholdNotMet {
                    role: role.clone(),
                    required,
                    valid,
                })
            }
            Verification::Unverified(UnverifiedReason::BadSignature(key_id)) => {
                Err(TrustError::BadSignature(key_id))
            }
            Verification::Unverified(UnverifiedReason::UnknownKey(key_id)) => {
                Err(TrustError::UnknownKey(key_id))
            }
            Verification::Unverified(UnverifiedReason::Malformed(reason)) => {
                Err(TrustError::Storage(format!("malformed {} document: {}", role, reason)))
            }
        }
    }
}

/// Verifies documents against one key table.
pub struct SignatureVerifier<'a> {
    keys: &'a BTreeMap<KeyId, Key>,
}

impl<'a> SignatureVerifier<'a> {
    /// # Arguments
    /// * `keys` - Key table of the delegating document (root's key table for
    ///   top-level roles, the parent's delegation keys for delegated roles)
    pub fn new(keys: &'a BTreeMap<KeyId, Key>) -> Self {
        SignatureVerifier { keys }
    }

    /// Verifies `document` against `authority`.
    ///
    /// # Algorithm
    /// 1. Recompute the canonical bytes
    /// 2. Check each signature whose key is in `authority`
    /// 3. Count distinct keys with a valid signature
    /// 4. Succeed iff the count reaches the threshold
    ///
    /// When the threshold is missed the reason is the first authorized bad
    /// signature, else the first authorized key missing from the table, else
    /// `ThresholdNotMet`.
    pub fn verify_document(&self, document: &RoleMetadata, authority: &RoleKeys) -> Verification {
        let payload = match canonical_bytes(document) {
            Ok(payload) => payload,
            Err(e) => return Verification::Unverified(UnverifiedReason::Malformed(e.to_string())),
        };

        let mut valid = BTreeSet::new();
        let mut bad = None;
        let mut unknown = None;
        for signature in &document.signatures {
            if !authority.contains(&signature.key_id) {
                continue;
            }
            match self.keys.get(&signature.key_id) {
                Some(key) if key.key_id == signature.key_id && key.has_consistent_id() => {
                    if key.verify(&payload, &signature.signature) {
                        valid.insert(signature.key_id.clone());
                    } else if bad.is_none() {
                        bad = Some(signature.key_id.clone());
                    }
                }
                _ => {
                    if unknown.is_none() {
                        unknown = Some(signature.key_id.clone());
                    }
                }
            }
        }

        let count = valid.len() as u32;
        debug!(
            "{} v{}: {} of {} required signatures valid",
            document.role, document.version, count, authority.threshold
        );
        if authority.threshold > 0 && count >= authority.threshold {
            return Verification::Verified { signers: valid };
        }
        // A bad signature from a key that also signed validly (a duplicate
        // entry) is not the reason the threshold was missed.
        let bad = bad.filter(|key_id| !valid.contains(key_id));
        let reason = match (bad, unknown) {
            (Some(key_id), _) => UnverifiedReason::BadSignature(key_id),
            (None, Some(key_id)) => UnverifiedReason::UnknownKey(key_id),
            (None, None) => UnverifiedReason::ThresholdNotMet {
                required: authority.threshold,
                valid: count,
            },
        };
        Verification::Unverified(reason)
    }
}

/// Convenience wrapper around [`SignatureVerifier::verify_document`].
pub fn verify_document(document: &RoleMetadata, keys: &BTreeMap<KeyId, Key>, authority: &RoleKeys) -> Verification {
    SignatureVerifier::new(keys).verify_document(document, authority)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::key::KeyScheme;
    use crate::models::metadata::{attach_signature, issue, Body, TargetsBody, ValidityPolicy};
    use crate::wallet::file_key::FileSigner;
    use crate::wallet::signer::Signer;
    use chrono::{Duration, Utc};

    struct Fixture {
        signers: Vec<FileSigner>,
        table: BTreeMap<KeyId, Key>,
    }

    impl Fixture {
        fn new(count: usize) -> Self {
            let signers: Vec<FileSigner> = (0..count)
                .map(|i| FileSigner::generate(&format!("k{}", i), KeyScheme::Ed25519).unwrap())
                .collect();
            let table = signers
                .iter()
                .map(|s| (s.public_key().key_id.clone(), s.public_key().clone()))
                .collect();
            Fixture { signers, table }
        }

        fn id(&self, i: usize) -> KeyId {
            self.signers[i].public_key().key_id.clone()
        }

        fn authority(&self, ids: &[usize], threshold: u32) -> RoleKeys {
            RoleKeys::new(ids.iter().map(|i| self.id(*i)), threshold).unwrap()
        }

        fn sign(&self, mut doc: RoleMetadata, ids: &[usize]) -> RoleMetadata {
            let payload = canonical_bytes(&doc).unwrap();
            for i in ids {
                let signature = self.signers[*i].sign(&payload).unwrap();
                doc = attach_signature(doc, self.id(*i), signature);
            }
            doc
        }
    }

    fn doc() -> RoleMetadata {
        let now = Utc::now();
        issue(
            RoleName::Targets,
            Body::Targets(TargetsBody::default()),
            1,
            now + Duration::days(30),
            0,
            &ValidityPolicy::default(),
            now,
        )
        .unwrap()
    }

    #[test]
    fn test_threshold_met_with_distinct_keys() {
        let fx = Fixture::new(3);
        let signed = fx.sign(doc(), &[0, 1]);
        let result = verify_document(&signed, &fx.table, &fx.authority(&[0, 1, 2], 2));
        assert!(result.is_verified());
    }

    #[test]
    fn test_verification_is_monotonic_in_signers() {
        let fx = Fixture::new(3);
        let authority = fx.authority(&[0, 1, 2], 2);
        let outcomes: Vec<bool> = [vec![], vec![0], vec![0, 1], vec![0, 1, 2]]
            .iter()
            .map(|ids| verify_document(&fx.sign(doc(), ids), &fx.table, &authority).is_verified())
            .collect();
        assert_eq!(outcomes, vec![false, false, true, true]);
    }

    #[test]
    fn test_unsigned_document_misses_threshold() {
        let fx = Fixture::new(1);
        let result = verify_document(&doc(), &fx.table, &fx.authority(&[0], 1));
        assert_eq!(
            result,
            Verification::Unverified(UnverifiedReason::ThresholdNotMet { required: 1, valid: 0 })
        );
    }

    #[test]
    fn test_duplicate_signatures_count_once() {
        let fx = Fixture::new(2);
        let mut signed = fx.sign(doc(), &[0]);
        let duplicate = signed.signatures[0].clone();
        signed.signatures.push(duplicate);

        let result = verify_document(&signed, &fx.table, &fx.authority(&[0, 1], 2));
        assert_eq!(
            result,
            Verification::Unverified(UnverifiedReason::ThresholdNotMet { required: 2, valid: 1 })
        );
    }

    #[test]
    fn test_unauthorized_signatures_are_ignored() {
        let fx = Fixture::new(3);
        let signed = fx.sign(doc(), &[0, 2]);
        let result = verify_document(&signed, &fx.table, &fx.authority(&[0, 1], 1));
        assert_eq!(
            result,
            Verification::Verified {
                signers: [fx.id(0)].into_iter().collect()
            }
        );
    }

    #[test]
    fn test_bad_signature_is_named() {
        let fx = Fixture::new(2);
        let mut signed = fx.sign(doc(), &[0]);
        signed.signatures[0].signature[0] ^= 0xff;

        let result = verify_document(&signed, &fx.table, &fx.authority(&[0, 1], 1));
        assert_eq!(result, Verification::Unverified(UnverifiedReason::BadSignature(fx.id(0))));
    }

    #[test]
    fn test_tampered_body_breaks_signatures() {
        let fx = Fixture::new(1);
        let mut signed = fx.sign(doc(), &[0]);
        signed.version = 2;
        let result = verify_document(&signed, &fx.table, &fx.authority(&[0], 1));
        assert!(!result.is_verified());
    }

    #[test]
    fn test_authorized_key_missing_from_table_is_unknown() {
        let fx = Fixture::new(2);
        let signed = fx.sign(doc(), &[1]);
        let mut table = fx.table.clone();
        table.remove(&fx.id(1));

        let result = verify_document(&signed, &table, &fx.authority(&[0, 1], 1));
        assert_eq!(result, Verification::Unverified(UnverifiedReason::UnknownKey(fx.id(1))));
    }

    #[test]
    fn test_signature_order_is_irrelevant() {
        let fx = Fixture::new(2);
        let signed = fx.sign(doc(), &[0, 1]);
        let mut reversed = signed.clone();
        reversed.signatures.reverse();
        let authority = fx.authority(&[0, 1], 2);

        assert_eq!(
            verify_document(&signed, &fx.table, &authority),
            verify_document(&reversed, &fx.table, &authority)
        );
    }

    #[test]
    fn test_into_result_maps_threshold_error() {
        let fx = Fixture::new(1);
        let err = verify_document(&doc(), &fx.table, &fx.authority(&[0], 1))
            .into_result(&RoleName::Targets)
            .unwrap_err();
        assert!(matches!(err, TrustError::ThresholdNotMet { required: 1, valid: 0, .. }));
    }
}
