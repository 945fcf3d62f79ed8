// src/services/rotation.rs
//! Key rotation state machine.
//!
//! A rotation drafts the next version of the document that holds a role's
//! key set, collects signatures on it and activates it by saving it through
//! the metadata store:
//!
//! ```text
//! Proposed --(all requirements met)--> CoSigned --(save)--> Activated
//!     \___________________________________/
//!                    | cancel / deadline
//!                    v
//!                 Aborted
//! ```
//!
//! Root rotation is dual-threshold: the draft root must satisfy the outgoing
//! root authority (old key table) and the incoming one (new key table).
//! Rotating any other role re-issues its delegator: root for top-level roles,
//! the parent targets document for delegated roles. A delegated rotation
//! needs only the delegator's current threshold; when the delegator is root
//! the dual check still runs, with old and new root authority identical.

use crate::error::{TrustError, TrustResult};
use crate::models::key::{Key, KeyId};
use crate::models::metadata::{attach_signature, canonical_bytes, issue, Body, RoleMetadata, RootBody, ValidityPolicy};
use crate::models::role::{RoleKeys, RoleName};
use crate::services::trust_graph::TrustSnapshot;
use crate::services::verifier::SignatureVerifier;
use crate::storage::content_store::ContentStore;
use crate::storage::metadata_store::MetadataStore;
use crate::wallet::key_management::KeyRing;
use chrono::{DateTime, Duration, Utc};
use log::{info, warn};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationState {
    Proposed,
    CoSigned,
    Activated,
    Aborted,
}

impl RotationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RotationState::Activated | RotationState::Aborted)
    }
}

/// One authority the draft must satisfy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    /// Human readable name, e.g. "old root".
    pub label: String,
    pub keys: RoleKeys,
    pub key_table: BTreeMap<KeyId, Key>,
}

impl Requirement {
    fn check(&self, draft: &RoleMetadata) -> TrustResult<()> {
        SignatureVerifier::new(&self.key_table)
            .verify_document(draft, &self.keys)
            .into_result(&draft.role)
            .map(|_| ())
    }
}

/// New key set for a role other than root.
#[derive(Debug, Clone)]
pub struct RotationRequest {
    pub role: RoleName,
    pub keys: RoleKeys,
    /// Public keys for ids in `keys` missing from the delegator's key table.
    pub new_keys: Vec<Key>,
    /// Expiry of the re-issued delegator document.
    pub expires: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Rotation {
    role: RoleName,
    draft: RoleMetadata,
    requirements: Vec<Requirement>,
    state: RotationState,
    deadline: DateTime<Utc>,
}

impl Rotation {
    /// Drafts root `current.version + 1` with body `new_body`.
    ///
    /// # Arguments
    /// * `current` - The trusted current root
    /// * `new_body` - Key table and role authorities of the next root
    /// * `expires` - Expiry of the next root
    /// * `policy` - Minimum validity window
    /// * `now` - Proposal time
    /// * `timeout` - How long the proposal stays open
    ///
    /// # Errors
    /// - `InvalidThreshold` if a role authority in `new_body` is malformed
    /// - `UnknownKey` if an authority names a key missing from the new table
    /// - whatever [`issue`] reports
    pub fn propose_root(
        current: &RoleMetadata,
        new_body: RootBody,
        expires: DateTime<Utc>,
        policy: &ValidityPolicy,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> TrustResult<Self> {
        let old_body = current.root_body().ok_or(TrustError::RoleBodyMismatch {
            role: RoleName::Root,
            kind: current.body.kind(),
        })?;
        let old_keys = old_body
            .role_keys(&RoleName::Root)
            .ok_or_else(|| TrustError::InvalidRole("current root names no root keys".to_string()))?
            .clone();
        let new_keys = new_body
            .role_keys(&RoleName::Root)
            .ok_or_else(|| TrustError::InvalidRole("new root names no root keys".to_string()))?
            .clone();
        for keys in new_body.roles.values() {
            keys.validate()?;
            if let Some(missing) = keys.key_ids.iter().find(|id| !new_body.keys.contains_key(*id)) {
                return Err(TrustError::UnknownKey(missing.clone()));
            }
        }

        let requirements = vec![
            Requirement {
                label: "old root".to_string(),
                keys: old_keys,
                key_table: old_body.keys.clone(),
            },
            Requirement {
                label: "new root".to_string(),
                keys: new_keys,
                key_table: new_body.keys.clone(),
            },
        ];
        let draft = issue(
            RoleName::Root,
            Body::Root(new_body),
            current.version + 1,
            expires,
            current.version,
            policy,
            now,
        )?;
        info!("proposed root v{}", draft.version);
        Ok(Rotation {
            role: RoleName::Root,
            draft,
            requirements,
            state: RotationState::Proposed,
            deadline: now + timeout,
        })
    }

    /// Drafts the re-issued delegator of `request.role` with the role's key
    /// set replaced.
    ///
    /// # Errors
    /// - `InvalidRole` for root (use [`Rotation::propose_root`]) or a role the
    ///   delegator does not declare
    /// - `UntrustedRole` if no trusted document declares the role
    /// - `UnknownKey` if a new key id has no key material
    pub fn propose_role(
        snapshot: &TrustSnapshot,
        request: RotationRequest,
        policy: &ValidityPolicy,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> TrustResult<Self> {
        let RotationRequest {
            role,
            keys,
            new_keys,
            expires,
        } = request;
        if role == RoleName::Root {
            return Err(TrustError::InvalidRole(
                "root keys are rotated with a root proposal".to_string(),
            ));
        }
        keys.validate()?;
        let delegator = snapshot
            .declaring_role(&role)
            .cloned()
            .ok_or_else(|| TrustError::UntrustedRole(role.clone()))?;
        let current = snapshot.trusted_document(&delegator)?;

        if delegator == RoleName::Root {
            let mut body = snapshot
                .root_body()
                .cloned()
                .ok_or_else(|| TrustError::UntrustedRole(RoleName::Root))?;
            for key in new_keys {
                body.keys.insert(key.key_id.clone(), key);
            }
            body.roles.insert(role.clone(), keys);
            body.prune_keys();
            let mut rotation = Self::propose_root(current, body, expires, policy, now, timeout)?;
            rotation.role = role;
            return Ok(rotation);
        }

        let mut body = current
            .targets_body()
            .cloned()
            .ok_or_else(|| TrustError::UntrustedRole(delegator.clone()))?;
        let delegations = body
            .delegations
            .as_mut()
            .ok_or_else(|| TrustError::InvalidRole(format!("{} declares no delegations", delegator)))?;
        for key in new_keys {
            delegations.keys.insert(key.key_id.clone(), key);
        }
        if let Some(missing) = keys.key_ids.iter().find(|id| !delegations.keys.contains_key(*id)) {
            return Err(TrustError::UnknownKey(missing.clone()));
        }
        delegations
            .role_mut(&role)
            .ok_or_else(|| TrustError::InvalidRole(format!("{} does not delegate to {}", delegator, role)))?
            .keys = keys;
        delegations.prune_keys();

        let authority = snapshot
            .effective(&delegator)
            .ok_or_else(|| TrustError::UntrustedRole(delegator.clone()))?;
        let requirements = vec![Requirement {
            label: delegator.to_string(),
            keys: authority.keys.clone(),
            key_table: authority.key_table.clone(),
        }];
        let draft = issue(
            delegator.clone(),
            Body::Targets(body),
            current.version + 1,
            expires,
            current.version,
            policy,
            now,
        )?;
        info!("proposed {} v{} rotating keys of {}", delegator, draft.version, role);
        Ok(Rotation {
            role,
            draft,
            requirements,
            state: RotationState::Proposed,
            deadline: now + timeout,
        })
    }

    /// Role whose keys are being rotated.
    pub fn role(&self) -> &RoleName {
        &self.role
    }

    /// The document being signed; for non-root rotations this is the
    /// delegator's next version.
    pub fn draft(&self) -> &RoleMetadata {
        &self.draft
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    pub fn deadline(&self) -> DateTime<Utc> {
        self.deadline
    }

    pub fn state(&self) -> RotationState {
        self.state
    }

    /// Current state, aborting an open proposal whose deadline has passed.
    pub fn status(&mut self, now: DateTime<Utc>) -> RotationState {
        if !self.state.is_terminal() && now > self.deadline {
            warn!("rotation of {} timed out at {}", self.role, self.deadline);
            self.state = RotationState::Aborted;
        }
        self.state
    }

    fn ensure_open(&mut self, now: DateTime<Utc>) -> TrustResult<()> {
        match self.status(now) {
            RotationState::Aborted => Err(TrustError::RotationAborted(format!(
                "rotation of {} is aborted",
                self.role
            ))),
            RotationState::Activated => Err(TrustError::RotationAborted(format!(
                "rotation of {} is already activated",
                self.role
            ))),
            _ => Ok(()),
        }
    }

    /// Checks every requirement against the draft.
    ///
    /// # Errors
    /// The first unmet requirement's verification error.
    pub fn check(&self) -> TrustResult<()> {
        for requirement in &self.requirements {
            requirement.check(&self.draft).map_err(|e| {
                warn!("{} requirement unmet: {}", requirement.label, e);
                e
            })?;
        }
        Ok(())
    }

    fn refresh(&mut self) {
        self.state = if self.check().is_ok() {
            RotationState::CoSigned
        } else {
            RotationState::Proposed
        };
    }

    /// Attaches a signature collected elsewhere.
    ///
    /// # Errors
    /// - `RotationAborted` if the rotation is closed
    /// - `UnknownKey` if no requirement knows the key
    /// - `BadSignature` if the signature does not verify
    pub fn add_signature(&mut self, key_id: KeyId, signature: Vec<u8>, now: DateTime<Utc>) -> TrustResult<RotationState> {
        self.ensure_open(now)?;
        let key = self
            .requirements
            .iter()
            .find_map(|r| r.key_table.get(&key_id))
            .ok_or_else(|| TrustError::UnknownKey(key_id.clone()))?;
        if !key.verify(&canonical_bytes(&self.draft)?, &signature) {
            return Err(TrustError::BadSignature(key_id));
        }
        self.draft = attach_signature(self.draft.clone(), key_id, signature);
        self.refresh();
        Ok(self.state)
    }

    /// Signs the draft with `key_ids` from `ring`.
    pub fn sign_with(&mut self, ring: &KeyRing, key_ids: &[KeyId], now: DateTime<Utc>) -> TrustResult<RotationState> {
        self.ensure_open(now)?;
        let payload = canonical_bytes(&self.draft)?;
        for key_id in key_ids {
            let signature = ring.sign(key_id, &payload)?;
            self.add_signature(signature.key_id, signature.signature, now)?;
        }
        Ok(self.state)
    }

    /// Signs the draft with every key of every requirement the ring holds.
    pub fn sign_with_available(&mut self, ring: &KeyRing, now: DateTime<Utc>) -> TrustResult<RotationState> {
        let mut key_ids: Vec<KeyId> = self
            .requirements
            .iter()
            .flat_map(|r| r.keys.key_ids.iter())
            .filter(|id| ring.can_sign(id))
            .cloned()
            .collect();
        key_ids.sort();
        key_ids.dedup();
        self.sign_with(ring, &key_ids, now)
    }

    /// Persists the draft.
    ///
    /// # Errors
    /// - `RotationAborted` if the rotation is closed
    /// - the unmet requirement's error while still `Proposed`
    /// - store errors (`StaleWrite`); the rotation stays `CoSigned`
    pub fn activate<S: ContentStore>(&mut self, store: &mut MetadataStore<S>, now: DateTime<Utc>) -> TrustResult<RoleMetadata> {
        self.ensure_open(now)?;
        self.check()?;
        self.state = RotationState::CoSigned;
        store.save(&self.draft)?;
        self.state = RotationState::Activated;
        info!(
            "activated rotation of {}: {} v{}",
            self.role, self.draft.role, self.draft.version
        );
        Ok(self.draft.clone())
    }

    /// Cancels an open rotation.
    pub fn abort(&mut self, now: DateTime<Utc>) -> TrustResult<()> {
        self.ensure_open(now)?;
        self.state = RotationState::Aborted;
        info!("rotation of {} cancelled", self.role);
        Ok(())
    }
}
