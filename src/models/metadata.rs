// src/models/metadata.rs
//! Signed role metadata documents.
//!
//! A [`RoleMetadata`] is the unit that gets signed, stored and superseded.
//! Its payload is a [`Body`] whose variant is fixed by the role: root carries
//! the key table, targets-kind roles carry target entries and delegations,
//! snapshot records role versions and timestamp pins the snapshot.
//!
//! Signatures cover [`canonical_bytes`], which serializes the whole signed
//! portion `(format, role, version, expires, body)` and nothing else.

use crate::error::{TrustError, TrustResult};
use crate::models::delegation::Delegations;
use crate::models::key::{Key, KeyId, KeySignature};
use crate::models::role::{RoleKeys, RoleName};
use crate::models::target::TargetFile;
use crate::utils::serialization::canonical_json;
use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Versioned name of the canonical serialization. Part of every signed
/// payload, so a change of format can never be confused with the old one.
pub const CANONICAL_FORMAT: &str = "taf-canonical-json/v1";

/// Payload of the root role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootBody {
    /// Every key referenced by `roles`.
    pub keys: BTreeMap<KeyId, Key>,
    /// Authority of root, targets, snapshot and timestamp.
    pub roles: BTreeMap<RoleName, RoleKeys>,
}

impl RootBody {
    pub fn role_keys(&self, role: &RoleName) -> Option<&RoleKeys> {
        self.roles.get(role)
    }

    /// Drops key table entries that no role refers to any more.
    pub fn prune_keys(&mut self) {
        let roles = &self.roles;
        self.keys
            .retain(|key_id, _| roles.values().any(|r| r.contains(key_id)));
    }
}

/// Payload of `targets` and of every delegated targets role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetsBody {
    pub targets: BTreeMap<String, TargetFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegations: Option<Delegations>,
}

/// Payload of the snapshot role: the version of every other non-timestamp role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotBody {
    pub meta: BTreeMap<RoleName, u64>,
}

/// Payload of the timestamp role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampBody {
    pub snapshot_version: u64,
    /// Hex SHA-256 of the snapshot document's canonical bytes.
    pub snapshot_hash: String,
}

/// Role-specific payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Body {
    Root(RootBody),
    Targets(TargetsBody),
    Snapshot(SnapshotBody),
    Timestamp(TimestampBody),
}

impl Body {
    pub fn kind(&self) -> &'static str {
        match self {
            Body::Root(_) => "root",
            Body::Targets(_) => "targets",
            Body::Snapshot(_) => "snapshot",
            Body::Timestamp(_) => "timestamp",
        }
    }

    fn fits(&self, role: &RoleName) -> bool {
        match self {
            Body::Root(_) => *role == RoleName::Root,
            Body::Targets(_) => role.is_targets_kind(),
            Body::Snapshot(_) => *role == RoleName::Snapshot,
            Body::Timestamp(_) => *role == RoleName::Timestamp,
        }
    }
}

/// A role document with its signatures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleMetadata {
    pub role: RoleName,
    pub version: u64,
    pub expires: DateTime<Utc>,
    pub body: Body,
    #[serde(default)]
    pub signatures: Vec<KeySignature>,
}

#[derive(Serialize)]
struct SignedPortion<'a> {
    format: &'static str,
    role: &'a RoleName,
    version: u64,
    expires: String,
    body: &'a Body,
}

impl RoleMetadata {
    pub fn root_body(&self) -> Option<&RootBody> {
        match &self.body {
            Body::Root(body) => Some(body),
            _ => None,
        }
    }

    pub fn targets_body(&self) -> Option<&TargetsBody> {
        match &self.body {
            Body::Targets(body) => Some(body),
            _ => None,
        }
    }

    pub fn snapshot_body(&self) -> Option<&SnapshotBody> {
        match &self.body {
            Body::Snapshot(body) => Some(body),
            _ => None,
        }
    }

    pub fn timestamp_body(&self) -> Option<&TimestampBody> {
        match &self.body {
            Body::Timestamp(body) => Some(body),
            _ => None,
        }
    }

    /// Delegations declared by this document, if it is a targets-kind role.
    pub fn delegations(&self) -> Option<&Delegations> {
        self.targets_body().and_then(|b| b.delegations.as_ref())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires <= now
    }

    /// Key ids that have attached a signature, without verifying them.
    pub fn signer_ids(&self) -> impl Iterator<Item = &KeyId> {
        self.signatures.iter().map(|s| &s.key_id)
    }
}

/// Issuance policy: how far in the future an expiry must lie.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidityPolicy {
    pub min_validity: Duration,
}

impl Default for ValidityPolicy {
    fn default() -> Self {
        ValidityPolicy {
            min_validity: Duration::hours(1),
        }
    }
}

/// Creates a new, unsigned document.
///
/// # Arguments
/// * `role` - Role the document is issued for
/// * `body` - Payload; its kind must fit the role
/// * `version` - Version of the new document
/// * `expires` - Expiry; truncated to whole seconds
/// * `previous_version` - Current version of `role` (0 if it has none)
/// * `policy` - Minimum validity window
/// * `now` - Issue time
///
/// # Errors
/// - `VersionConflict` unless `version == previous_version + 1`
/// - `InvalidExpiry` unless `expires >= now + policy.min_validity`
/// - `RoleBodyMismatch` if the body kind does not fit the role
pub fn issue(
    role: RoleName,
    body: Body,
    version: u64,
    expires: DateTime<Utc>,
    previous_version: u64,
    policy: &ValidityPolicy,
    now: DateTime<Utc>,
) -> TrustResult<RoleMetadata> {
    if !body.fits(&role) {
        return Err(TrustError::RoleBodyMismatch {
            role,
            kind: body.kind(),
        });
    }
    let expected = previous_version + 1;
    if version != expected {
        return Err(TrustError::VersionConflict {
            role,
            expected,
            got: version,
        });
    }
    let expires = truncate_to_seconds(expires);
    let earliest = now + policy.min_validity;
    if expires < earliest {
        return Err(TrustError::InvalidExpiry {
            role,
            expires,
            earliest,
        });
    }
    Ok(RoleMetadata {
        role,
        version,
        expires,
        body,
        signatures: Vec::new(),
    })
}

/// Deterministic serialization of the signed portion of `document`.
///
/// Signatures are excluded, so attaching or reordering them never changes
/// the bytes.
pub fn canonical_bytes(document: &RoleMetadata) -> TrustResult<Vec<u8>> {
    let signed = SignedPortion {
        format: CANONICAL_FORMAT,
        role: &document.role,
        version: document.version,
        expires: document.expires.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        body: &document.body,
    };
    Ok(canonical_json(&signed)?)
}

/// Returns `document` with `signature` from `key_id` attached.
///
/// An earlier signature from the same key is replaced, so a document never
/// carries two entries for one key.
pub fn attach_signature(mut document: RoleMetadata, key_id: KeyId, signature: Vec<u8>) -> RoleMetadata {
    document.signatures.retain(|s| s.key_id != key_id);
    document.signatures.push(KeySignature { key_id, signature });
    document
}

fn truncate_to_seconds(time: DateTime<Utc>) -> DateTime<Utc> {
    time.with_nanosecond(0).unwrap_or(time)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn targets_doc(version: u64) -> RoleMetadata {
        issue(
            RoleName::Targets,
            Body::Targets(TargetsBody::default()),
            version,
            now() + Duration::days(90),
            version - 1,
            &ValidityPolicy::default(),
            now(),
        )
        .unwrap()
    }

    #[test]
    fn test_issue_requires_next_version() {
        let err = issue(
            RoleName::Targets,
            Body::Targets(TargetsBody::default()),
            3,
            now() + Duration::days(1),
            1,
            &ValidityPolicy::default(),
            now(),
        )
        .unwrap_err();
        assert!(matches!(err, TrustError::VersionConflict { expected: 2, got: 3, .. }));
    }

    #[test]
    fn test_issue_enforces_minimum_validity() {
        let err = issue(
            RoleName::Timestamp,
            Body::Timestamp(TimestampBody {
                snapshot_version: 1,
                snapshot_hash: String::new(),
            }),
            1,
            now() + Duration::minutes(30),
            0,
            &ValidityPolicy::default(),
            now(),
        )
        .unwrap_err();
        assert!(matches!(err, TrustError::InvalidExpiry { .. }));
    }

    #[test]
    fn test_issue_rejects_body_of_other_role() {
        let err = issue(
            RoleName::Root,
            Body::Targets(TargetsBody::default()),
            1,
            now() + Duration::days(1),
            0,
            &ValidityPolicy::default(),
            now(),
        )
        .unwrap_err();
        assert!(matches!(err, TrustError::RoleBodyMismatch { .. }));
    }

    #[test]
    fn test_canonical_bytes_are_deterministic() {
        let first = canonical_bytes(&targets_doc(1)).unwrap();
        let second = canonical_bytes(&targets_doc(1)).unwrap();
        assert_eq!(first, second);
        assert!(String::from_utf8(first).unwrap().contains(CANONICAL_FORMAT));
    }

    #[test]
    fn test_signatures_do_not_change_canonical_bytes() {
        let doc = targets_doc(1);
        let unsigned = canonical_bytes(&doc).unwrap();
        let signed = attach_signature(doc, KeyId::from_hex("aa"), vec![1, 2, 3]);
        assert_eq!(canonical_bytes(&signed).unwrap(), unsigned);
    }

    #[test]
    fn test_attach_signature_replaces_same_key() {
        let doc = attach_signature(targets_doc(1), KeyId::from_hex("aa"), vec![1]);
        let doc = attach_signature(doc, KeyId::from_hex("aa"), vec![2]);
        let doc = attach_signature(doc, KeyId::from_hex("bb"), vec![3]);
        assert_eq!(doc.signatures.len(), 2);
        assert_eq!(doc.signatures[0].signature, vec![2]);
    }

    #[test]
    fn test_document_survives_storage_serialization() {
        let doc = attach_signature(targets_doc(1), KeyId::from_hex("aa"), vec![1, 2]);
        let json = serde_json::to_vec(&doc).unwrap();
        let back: RoleMetadata = serde_json::from_slice(&json).unwrap();
        assert_eq!(back, doc);
        assert_eq!(canonical_bytes(&back).unwrap(), canonical_bytes(&doc).unwrap());
    }
}
