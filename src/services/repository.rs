// src/services/repository.rs
//! Trust repository workflows.
//!
//! [`TrustRepository`] ties the engine together for callers such as the
//! command line front end. Each workflow follows the same pattern:
//! 1. Load the current documents and resolve the trust graph
//! 2. Compute and sign the next version of the affected role
//! 3. Save it through the metadata store (retrying on `StaleWrite`)
//! 4. Re-issue snapshot and timestamp so they name the new versions

use crate::error::{ErrorClass, TrustError, TrustResult};
use crate::models::delegation::{DelegatedRole, Delegations};
use crate::models::key::{Key, KeyId};
use crate::models::metadata::{
    canonical_bytes, issue, Body, RoleMetadata, RootBody, SnapshotBody, TargetsBody, TimestampBody, ValidityPolicy,
};
use crate::models::role::{RoleKeys, RoleName, MAIN_ROLES};
use crate::models::target::TargetFile;
use crate::services::rotation::{Rotation, RotationRequest};
use crate::services::trust_graph::{resolve, verify_root_update, TrustSnapshot};
use crate::services::verifier::SignatureVerifier;
use crate::storage::content_store::ContentStore;
use crate::storage::metadata_store::MetadataStore;
use crate::utils::crypto::sha256_hex;
use crate::wallet::key_management::KeyRing;
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Default validity of newly issued documents, per role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpirationIntervals {
    pub root: Duration,
    pub targets: Duration,
    pub snapshot: Duration,
    pub timestamp: Duration,
}

impl Default for ExpirationIntervals {
    fn default() -> Self {
        ExpirationIntervals {
            root: Duration::days(365),
            targets: Duration::days(90),
            snapshot: Duration::days(7),
            timestamp: Duration::days(1),
        }
    }
}

impl ExpirationIntervals {
    /// Delegated roles use the targets interval.
    pub fn for_role(&self, role: &RoleName) -> Duration {
        match role {
            RoleName::Root => self.root,
            RoleName::Targets | RoleName::Delegated(_) => self.targets,
            RoleName::Snapshot => self.snapshot,
            RoleName::Timestamp => self.timestamp,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RepositorySettings {
    pub validity: ValidityPolicy,
    pub expiration: ExpirationIntervals,
    /// How long a rotation proposal stays open.
    pub rotation_timeout: Duration,
    /// Attempts per write before `StaleWrite` is surfaced.
    pub retry_attempts: u32,
}

impl Default for RepositorySettings {
    fn default() -> Self {
        RepositorySettings {
            validity: ValidityPolicy::default(),
            expiration: ExpirationIntervals::default(),
            rotation_timeout: Duration::hours(24),
            retry_attempts: 3,
        }
    }
}

/// Keys and threshold of one role at creation time.
#[derive(Debug, Clone)]
pub struct RoleSetup {
    pub keys: Vec<Key>,
    pub threshold: u32,
}

impl RoleSetup {
    fn role_keys(&self) -> TrustResult<RoleKeys> {
        RoleKeys::new(self.keys.iter().map(|k| k.key_id.clone()), self.threshold)
    }

    fn key_table(&self) -> BTreeMap<KeyId, Key> {
        self.keys.iter().map(|k| (k.key_id.clone(), k.clone())).collect()
    }
}

/// A delegated role to create, declared by `parent`.
#[derive(Debug, Clone)]
pub struct DelegationSetup {
    pub parent: RoleName,
    pub name: RoleName,
    pub role: RoleSetup,
    pub paths: Vec<String>,
    pub terminating: bool,
}

/// Everything needed to create a repository. Delegations are listed parents
/// first.
#[derive(Debug, Clone)]
pub struct RolesSetup {
    pub root: RoleSetup,
    pub targets: RoleSetup,
    pub snapshot: RoleSetup,
    pub timestamp: RoleSetup,
    pub delegations: Vec<DelegationSetup>,
}

/// Outcome of an activated rotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RotationReport {
    /// Role whose keys changed.
    pub role: RoleName,
    /// Document that was re-issued to change them, and its new version.
    pub reissued: RoleName,
    pub version: u64,
    /// Roles whose documents no longer verify after the rotation.
    pub invalidated: Vec<RoleName>,
}

/// Roles that are expired or about to expire, soonest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExpirationReport {
    pub expired: Vec<(RoleName, DateTime<Utc>)>,
    pub will_expire: Vec<(RoleName, DateTime<Utc>)>,
}

impl ExpirationReport {
    pub fn is_clean(&self) -> bool {
        self.expired.is_empty() && self.will_expire.is_empty()
    }
}

/// Signs `document` with every key of `keys` the ring holds and checks the
/// result meets the threshold.
fn sign_for(
    ring: &KeyRing,
    document: RoleMetadata,
    keys: &RoleKeys,
    key_table: &BTreeMap<KeyId, Key>,
) -> TrustResult<RoleMetadata> {
    let role = document.role.clone();
    let signed = ring.sign_with_available(document, keys)?;
    SignatureVerifier::new(key_table)
        .verify_document(&signed, keys)
        .into_result(&role)?;
    Ok(signed)
}

fn timestamp_body_for(snapshot: &RoleMetadata) -> TrustResult<TimestampBody> {
    Ok(TimestampBody {
        snapshot_version: snapshot.version,
        snapshot_hash: sha256_hex(&canonical_bytes(snapshot)?),
    })
}

fn delegated_names(document: &RoleMetadata) -> Vec<RoleName> {
    document
        .delegations()
        .map(|d| d.roles.iter().map(|r| r.name.clone()).collect())
        .unwrap_or_default()
}

/// Normalizes a target path: no leading slash, no empty or `..` components.
pub fn normalize_target_path(path: &str) -> TrustResult<String> {
    let trimmed = path.trim().trim_start_matches('/');
    if trimmed.is_empty() || trimmed.split('/').any(|c| c.is_empty() || c == "..") {
        return Err(TrustError::Targets(format!("invalid target path {:?}", path)));
    }
    Ok(trimmed.to_string())
}

pub struct TrustRepository<S: ContentStore> {
    store: MetadataStore<S>,
    ring: KeyRing,
    settings: RepositorySettings,
}

impl<S: ContentStore> TrustRepository<S> {
    pub fn new(store: MetadataStore<S>, ring: KeyRing, settings: RepositorySettings) -> Self {
        TrustRepository { store, ring, settings }
    }

    pub fn store(&self) -> &MetadataStore<S> {
        &self.store
    }

    pub fn ring(&self) -> &KeyRing {
        &self.ring
    }

    pub fn ring_mut(&mut self) -> &mut KeyRing {
        &mut self.ring
    }

    pub fn settings(&self) -> &RepositorySettings {
        &self.settings
    }

    /// Creates version 1 of every role described by `setup`.
    ///
    /// All documents are built, signed and resolved before anything is
    /// written; root is written last, so a failed creation leaves no root.
    ///
    /// # Errors
    /// - `Storage` if the store already holds a root
    /// - `ThresholdNotMet` if the ring lacks enough keys for a role
    /// - `InvalidRole`/`InvalidThreshold` for a malformed setup
    pub fn create(&mut self, setup: &RolesSetup, now: DateTime<Utc>) -> TrustResult<TrustSnapshot> {
        if self.store.current_version(&RoleName::Root)? > 0 {
            return Err(TrustError::Storage("repository is already initialized".to_string()));
        }

        let mut root_body = RootBody {
            keys: BTreeMap::new(),
            roles: BTreeMap::new(),
        };
        for (role, role_setup) in [
            (RoleName::Root, &setup.root),
            (RoleName::Targets, &setup.targets),
            (RoleName::Snapshot, &setup.snapshot),
            (RoleName::Timestamp, &setup.timestamp),
        ] {
            root_body.roles.insert(role, role_setup.role_keys()?);
            root_body.keys.extend(role_setup.key_table());
        }

        let mut authorities: BTreeMap<RoleName, (RoleKeys, BTreeMap<KeyId, Key>)> = BTreeMap::new();
        authorities.insert(RoleName::Targets, (setup.targets.role_keys()?, root_body.keys.clone()));
        let mut bodies = vec![(RoleName::Targets, TargetsBody::default())];
        for delegation in &setup.delegations {
            if authorities.contains_key(&delegation.name) {
                return Err(TrustError::InvalidRole(format!("{} is declared twice", delegation.name)));
            }
            let parent = bodies
                .iter_mut()
                .find(|(role, _)| role == &delegation.parent)
                .ok_or_else(|| {
                    TrustError::InvalidRole(format!(
                        "{} is delegated from unknown role {}",
                        delegation.name, delegation.parent
                    ))
                })?;
            let keys = delegation.role.role_keys()?;
            let table = delegation.role.key_table();
            let declared = DelegatedRole::new(
                delegation.name.clone(),
                keys.clone(),
                delegation.paths.clone(),
                delegation.terminating,
            )?;
            let delegations = parent.1.delegations.get_or_insert_with(Delegations::default);
            delegations.keys.extend(table.clone());
            delegations.roles.push(declared);
            authorities.insert(delegation.name.clone(), (keys, table));
            bodies.push((delegation.name.clone(), TargetsBody::default()));
        }

        let policy = self.settings.validity;
        let intervals = self.settings.expiration;
        let first = |role: RoleName, body: Body| issue(role.clone(), body, 1, now + intervals.for_role(&role), 0, &policy, now);

        let root_keys = setup.root.role_keys()?;
        let root = first(RoleName::Root, Body::Root(root_body.clone()))?;
        let mut documents = vec![sign_for(&self.ring, root, &root_keys, &root_body.keys)?];
        for (role, body) in bodies {
            let (keys, table) = authorities
                .get(&role)
                .ok_or_else(|| TrustError::InvalidRole(role.to_string()))?;
            let document = first(role, Body::Targets(body))?;
            documents.push(sign_for(&self.ring, document, keys, table)?);
        }

        let meta = documents.iter().map(|d| (d.role.clone(), d.version)).collect();
        let snapshot = first(RoleName::Snapshot, Body::Snapshot(SnapshotBody { meta }))?;
        let snapshot = sign_for(&self.ring, snapshot, &setup.snapshot.role_keys()?, &root_body.keys)?;
        let timestamp = first(RoleName::Timestamp, Body::Timestamp(timestamp_body_for(&snapshot)?))?;
        let timestamp = sign_for(&self.ring, timestamp, &setup.timestamp.role_keys()?, &root_body.keys)?;
        documents.push(snapshot);
        documents.push(timestamp);

        let state = resolve(documents.clone())?;
        if let Some(role) = state.untrusted_roles().into_iter().next() {
            return Err(TrustError::UntrustedRole(role));
        }
        for document in documents.iter().rev() {
            self.store.save(document)?;
        }
        info!("created repository with {} roles", documents.len());
        Ok(state)
    }

    fn load_role(&mut self, role: &RoleName, now: Option<DateTime<Utc>>) -> TrustResult<RoleMetadata> {
        match now {
            Some(now) => self.store.load(role, now),
            None => self.store.load_for_update(role),
        }
    }

    /// Loads the newest root and checks the chain leading to it.
    ///
    /// Starting at the pinned root (version 1 for a client with no pin),
    /// every following version must be cross-signed by its predecessor's
    /// root keys and meet its own. Only the newest version is checked for
    /// expiry.
    fn load_root(&mut self, now: Option<DateTime<Utc>>) -> TrustResult<RoleMetadata> {
        let latest = self.load_role(&RoleName::Root, now)?;
        let start = self.store.pinned(&RoleName::Root).unwrap_or(1).max(1);
        if latest.version <= start {
            return Ok(latest);
        }
        let mut trusted = self.store.load_version(&RoleName::Root, start)?;
        for version in start + 1..latest.version {
            let next = self.store.load_version(&RoleName::Root, version)?;
            verify_root_update(&trusted, &next)?;
            trusted = next;
        }
        verify_root_update(&trusted, &latest)?;
        debug!("root chain v{}..v{} verified", start, latest.version);
        Ok(latest)
    }

    /// Loads the top-level roles and every delegated role reachable from
    /// targets. With `now` set, expired documents are rejected.
    fn load_documents(&mut self, now: Option<DateTime<Utc>>) -> TrustResult<Vec<RoleMetadata>> {
        let mut documents = vec![self.load_root(now)?];
        for role in MAIN_ROLES.iter().filter(|r| **r != RoleName::Root) {
            documents.push(self.load_role(role, now)?);
        }
        let mut queue: VecDeque<RoleName> = documents.iter().flat_map(delegated_names).collect();
        let mut seen = BTreeSet::new();
        while let Some(role) = queue.pop_front() {
            if !role.is_delegated() || !seen.insert(role.clone()) {
                continue;
            }
            match self.load_role(&role, now) {
                Ok(document) => {
                    queue.extend(delegated_names(&document));
                    documents.push(document);
                }
                // resolve() reports it as a dangling delegation
                Err(TrustError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(documents)
    }

    /// Resolves the stored documents without expiry checks, as the base for
    /// computing new versions.
    fn working_state(&mut self) -> TrustResult<TrustSnapshot> {
        resolve(self.load_documents(None)?)
    }

    /// Loads and verifies the current repository. Pins are raised only for
    /// the documents of a fully verified state.
    ///
    /// # Errors
    /// - `Expired`/`Rollback` from loading
    /// - graph errors from [`resolve`]
    /// - `UntrustedRole` if a top-level role does not verify
    /// - `SnapshotMismatch` if snapshot and timestamp disagree with the
    ///   loaded versions
    pub fn trusted_state(&mut self, now: DateTime<Utc>) -> TrustResult<TrustSnapshot> {
        let state = resolve(self.load_documents(Some(now))?)?;
        for role in MAIN_ROLES.iter() {
            if !state.is_trusted(role) {
                warn!("top-level role {} does not verify", role);
                return Err(TrustError::UntrustedRole(role.clone()));
            }
        }
        check_consistency(&state)?;
        let trusted: Vec<&RoleMetadata> = state.documents().filter(|d| state.is_trusted(&d.role)).collect();
        self.store.commit_pins(trusted);
        Ok(state)
    }

    /// Re-issues `role` with its body passed through `change`, signed with the
    /// authority its delegator declares.
    fn reissue<F>(
        &mut self,
        state: &TrustSnapshot,
        role: &RoleName,
        now: DateTime<Utc>,
        expires: Option<DateTime<Utc>>,
        mut change: F,
    ) -> TrustResult<RoleMetadata>
    where
        F: FnMut(&mut Body) -> TrustResult<()>,
    {
        let (keys, table) = state
            .declared_authority(role)
            .map(|(keys, table)| (keys.clone(), table.clone()))
            .ok_or_else(|| TrustError::UntrustedRole(role.clone()))?;
        let policy = self.settings.validity;
        let expires = expires.unwrap_or_else(|| now + self.settings.expiration.for_role(role));
        let ring = &self.ring;
        self.store
            .update_with_retry(role, self.settings.retry_attempts, |current| {
                let current = current.ok_or_else(|| TrustError::NotFound(role.to_string()))?;
                let mut body = current.body.clone();
                change(&mut body)?;
                let next = issue(role.clone(), body, current.version + 1, expires, current.version, &policy, now)?;
                sign_for(ring, next, &keys, &table)
            })
    }

    fn refresh_snapshot_and_timestamp(&mut self, now: DateTime<Utc>, include_snapshot: bool) -> TrustResult<()> {
        let state = self.working_state()?;
        if include_snapshot {
            let meta: BTreeMap<RoleName, u64> = state
                .documents()
                .filter(|d| !matches!(d.role, RoleName::Snapshot | RoleName::Timestamp))
                .map(|d| (d.role.clone(), d.version))
                .collect();
            self.reissue(&state, &RoleName::Snapshot, now, None, |body| {
                *body = Body::Snapshot(SnapshotBody { meta: meta.clone() });
                Ok(())
            })?;
        }
        let snapshot = self.store.load_for_update(&RoleName::Snapshot)?;
        let timestamp = timestamp_body_for(&snapshot)?;
        self.reissue(&state, &RoleName::Timestamp, now, None, |body| {
            *body = Body::Timestamp(timestamp.clone());
            Ok(())
        })?;
        Ok(())
    }

    /// Brings snapshot and timestamp up to date after `changed` was re-issued.
    fn refresh_after(&mut self, changed: &RoleName, now: DateTime<Utc>) -> TrustResult<()> {
        match changed {
            RoleName::Timestamp => Ok(()),
            RoleName::Snapshot => self.refresh_snapshot_and_timestamp(now, false),
            _ => self.refresh_snapshot_and_timestamp(now, true),
        }
    }

    /// Re-issues snapshot (listing current versions) and timestamp.
    pub fn update_snapshot_and_timestamp(&mut self, now: DateTime<Utc>) -> TrustResult<()> {
        self.refresh_snapshot_and_timestamp(now, true)
    }

    /// Role all `paths` route to.
    ///
    /// # Errors
    /// `Targets` if the paths route to different roles.
    fn common_role<'a>(state: &TrustSnapshot, paths: impl IntoIterator<Item = &'a String>) -> TrustResult<RoleName> {
        let mut chosen: Option<(RoleName, &String)> = None;
        for path in paths {
            let role = state.authorize(path)?;
            match &chosen {
                Some((first_role, first_path)) if first_role != &role => {
                    return Err(TrustError::Targets(format!(
                        "{} belongs to {} but {} belongs to {}; add them separately",
                        first_path, first_role, path, role
                    )));
                }
                Some(_) => {}
                None => chosen = Some((role, path)),
            }
        }
        chosen
            .map(|(role, _)| role)
            .ok_or_else(|| TrustError::Targets("no target paths given".to_string()))
    }

    /// Adds or replaces target entries.
    ///
    /// # Returns
    /// The role that now lists the targets.
    pub fn add_targets(&mut self, files: BTreeMap<String, TargetFile>, now: DateTime<Utc>) -> TrustResult<RoleName> {
        let files = files
            .into_iter()
            .map(|(path, file)| Ok((normalize_target_path(&path)?, file)))
            .collect::<TrustResult<BTreeMap<_, _>>>()?;
        let state = self.working_state()?;
        let role = Self::common_role(&state, files.keys())?;
        self.reissue(&state, &role, now, None, |body| match body {
            Body::Targets(targets) => {
                targets.targets.extend(files.clone());
                Ok(())
            }
            other => Err(TrustError::RoleBodyMismatch {
                role: role.clone(),
                kind: other.kind(),
            }),
        })?;
        self.refresh_after(&role, now)?;
        info!("added {} target(s) to {}", files.len(), role);
        Ok(role)
    }

    /// Removes target entries.
    ///
    /// # Returns
    /// The role that listed them and the paths actually removed.
    ///
    /// # Errors
    /// `TargetNotFound` if none of the paths is listed.
    pub fn remove_targets(&mut self, paths: &[String], now: DateTime<Utc>) -> TrustResult<(RoleName, Vec<String>)> {
        let paths = paths
            .iter()
            .map(|p| normalize_target_path(p))
            .collect::<TrustResult<Vec<_>>>()?;
        let state = self.working_state()?;
        let role = Self::common_role(&state, paths.iter())?;
        let listed = state
            .document(&role)
            .and_then(|d| d.targets_body())
            .map(|b| &b.targets);
        let removed: Vec<String> = paths
            .iter()
            .filter(|p| listed.map(|t| t.contains_key(*p)).unwrap_or(false))
            .cloned()
            .collect();
        if removed.is_empty() {
            return Err(TrustError::TargetNotFound(paths.join(", ")));
        }
        self.reissue(&state, &role, now, None, |body| {
            if let Body::Targets(targets) = body {
                for path in &removed {
                    targets.targets.remove(path);
                }
            }
            Ok(())
        })?;
        self.refresh_after(&role, now)?;
        info!("removed {} target(s) from {}", removed.len(), role);
        Ok((role, removed))
    }

    /// Declares a new delegated role under `parent` and issues its first,
    /// empty version.
    ///
    /// # Errors
    /// - `InvalidRole` if the role already exists or `parent` cannot delegate
    /// - `UnknownKey` if `keys` lacks material for a key id of the role
    /// - `ThresholdNotMet` if the ring cannot sign the new role
    pub fn add_delegation(
        &mut self,
        parent: &RoleName,
        delegated: DelegatedRole,
        keys: Vec<Key>,
        now: DateTime<Utc>,
    ) -> TrustResult<()> {
        if !parent.is_targets_kind() {
            return Err(TrustError::InvalidRole(format!("{} cannot delegate targets", parent)));
        }
        let state = self.working_state()?;
        state.trusted_document(parent)?;
        if state.document(&delegated.name).is_some() || self.store.current_version(&delegated.name)? > 0 {
            return Err(TrustError::InvalidRole(format!("{} already exists", delegated.name)));
        }
        let table: BTreeMap<KeyId, Key> = keys.into_iter().map(|k| (k.key_id.clone(), k)).collect();
        if let Some(missing) = delegated.keys.key_ids.iter().find(|id| !table.contains_key(*id)) {
            return Err(TrustError::UnknownKey(missing.clone()));
        }

        let first = issue(
            delegated.name.clone(),
            Body::Targets(TargetsBody::default()),
            1,
            now + self.settings.expiration.for_role(&delegated.name),
            0,
            &self.settings.validity,
            now,
        )?;
        let first = sign_for(&self.ring, first, &delegated.keys, &table)?;
        // the child is written before the parent names it
        self.store.save(&first)?;

        self.reissue(&state, parent, now, None, |body| match body {
            Body::Targets(targets) => {
                let delegations = targets.delegations.get_or_insert_with(Delegations::default);
                delegations.keys.extend(table.clone());
                delegations.roles.push(delegated.clone());
                Ok(())
            }
            other => Err(TrustError::RoleBodyMismatch {
                role: parent.clone(),
                kind: other.kind(),
            }),
        })?;
        self.refresh_after(parent, now)?;
        info!("{} now delegates to {}", parent, delegated.name);
        Ok(())
    }

    /// Drafts a rotation giving `role` the key set `keys`.
    ///
    /// The returned rotation is unsigned; pass it to
    /// [`TrustRepository::complete_rotation`] once co-signers have added
    /// their signatures.
    pub fn propose_rotation(
        &mut self,
        role: &RoleName,
        keys: RoleKeys,
        new_keys: Vec<Key>,
        now: DateTime<Utc>,
    ) -> TrustResult<Rotation> {
        let state = self.working_state()?;
        let timeout = self.settings.rotation_timeout;
        if *role == RoleName::Root {
            let mut body = state
                .root_body()
                .cloned()
                .ok_or_else(|| TrustError::UntrustedRole(RoleName::Root))?;
            for key in new_keys {
                body.keys.insert(key.key_id.clone(), key);
            }
            body.roles.insert(RoleName::Root, keys);
            body.prune_keys();
            let expires = now + self.settings.expiration.root;
            return Rotation::propose_root(state.root(), body, expires, &self.settings.validity, now, timeout);
        }
        let delegator = state
            .declaring_role(role)
            .cloned()
            .ok_or_else(|| TrustError::UntrustedRole(role.clone()))?;
        let request = RotationRequest {
            role: role.clone(),
            keys,
            new_keys,
            expires: now + self.settings.expiration.for_role(&delegator),
        };
        Rotation::propose_role(&state, request, &self.settings.validity, now, timeout)
    }

    /// Signs `rotation` with the ring's keys, activates it and brings the
    /// rest of the repository up to date.
    ///
    /// A rotated targets-kind role is re-signed with its new keys when the
    /// ring holds them. Roles that still fail to verify are reported, not
    /// treated as errors.
    pub fn complete_rotation(&mut self, mut rotation: Rotation, now: DateTime<Utc>) -> TrustResult<RotationReport> {
        rotation.sign_with_available(&self.ring, now)?;
        let activated = rotation.activate(&mut self.store, now)?;
        let role = rotation.role().clone();

        if role.is_targets_kind() {
            let state = self.working_state()?;
            if !state.is_trusted(&role) {
                match self.reissue(&state, &role, now, None, |_| Ok(())) {
                    Ok(_) => {}
                    Err(e) if matches!(e.class(), ErrorClass::Environment | ErrorClass::Integrity) => {
                        warn!("{} could not be re-signed with its new keys: {}", role, e)
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        self.refresh_after(&activated.role, now)?;

        let invalidated = self.working_state()?.untrusted_roles();
        for untrusted in &invalidated {
            warn!("{} no longer verifies after rotating {}", untrusted, role);
        }
        Ok(RotationReport {
            role,
            reissued: activated.role,
            version: activated.version,
            invalidated,
        })
    }

    fn rotate_role_keys(
        &mut self,
        role: &RoleName,
        keys: RoleKeys,
        new_keys: Vec<Key>,
        now: DateTime<Utc>,
    ) -> TrustResult<RotationReport> {
        let rotation = self.propose_rotation(role, keys, new_keys, now)?;
        self.complete_rotation(rotation, now)
    }

    /// Rotates root to `keys`, signing with every old and new root key the
    /// ring holds.
    pub fn rotate_root(&mut self, keys: RoleKeys, new_keys: Vec<Key>, now: DateTime<Utc>) -> TrustResult<RotationReport> {
        self.rotate_role_keys(&RoleName::Root, keys, new_keys, now)
    }

    /// Adds `key` to `role`, keeping the threshold.
    ///
    /// # Returns
    /// `None` if the key was already authorized for the role.
    pub fn add_role_key(&mut self, role: &RoleName, key: Key, now: DateTime<Utc>) -> TrustResult<Option<RotationReport>> {
        let state = self.working_state()?;
        let (current, _) = state
            .declared_authority(role)
            .ok_or_else(|| TrustError::UntrustedRole(role.clone()))?;
        if current.contains(&key.key_id) {
            info!("key {} is already authorized for {}", key.key_id.short(), role);
            return Ok(None);
        }
        let mut keys = current.clone();
        keys.key_ids.insert(key.key_id.clone());
        self.rotate_role_keys(role, keys, vec![key], now).map(Some)
    }

    /// Removes `key_id` from `role`, keeping the threshold.
    ///
    /// # Errors
    /// - `UnknownKey` if the key is not authorized for the role
    /// - `InvalidThreshold` if fewer keys than the threshold would remain
    pub fn revoke_role_key(&mut self, role: &RoleName, key_id: &KeyId, now: DateTime<Utc>) -> TrustResult<RotationReport> {
        let state = self.working_state()?;
        let (current, _) = state
            .declared_authority(role)
            .ok_or_else(|| TrustError::UntrustedRole(role.clone()))?;
        if !current.contains(key_id) {
            return Err(TrustError::UnknownKey(key_id.clone()));
        }
        let remaining = current.key_ids.len() - 1;
        if (remaining as u32) < current.threshold {
            return Err(TrustError::InvalidThreshold {
                threshold: current.threshold,
                keys: remaining,
            });
        }
        let mut keys = current.clone();
        keys.key_ids.remove(key_id);
        self.rotate_role_keys(role, keys, Vec::new(), now)
    }

    /// Re-issues `role` unchanged with a new expiry.
    pub fn set_expiration(&mut self, role: &RoleName, expires: DateTime<Utc>, now: DateTime<Utc>) -> TrustResult<RoleMetadata> {
        let state = self.working_state()?;
        let document = self.reissue(&state, role, now, Some(expires), |_| Ok(()))?;
        self.refresh_after(role, now)?;
        info!("{} v{} now expires at {}", role, document.version, document.expires);
        Ok(document)
    }

    /// Checks `content` against the trusted entry for `path`.
    ///
    /// # Returns
    /// The role listing the target and its entry.
    ///
    /// # Errors
    /// - any [`TrustRepository::trusted_state`] error
    /// - `TargetNotFound` if no trusted role lists the path
    /// - `TargetMismatch` if length or a digest differs
    pub fn verify_target(&mut self, path: &str, content: &[u8], now: DateTime<Utc>) -> TrustResult<(RoleName, TargetFile)> {
        let path = normalize_target_path(path)?;
        let state = self.trusted_state(now)?;
        let (role, entry) = state
            .lookup_target(&path)
            .ok_or_else(|| TrustError::TargetNotFound(path.clone()))?;
        if let Some(reason) = entry.mismatch(content) {
            return Err(TrustError::TargetMismatch { path, reason });
        }
        Ok((role.clone(), entry.clone()))
    }

    /// Lists roles that have expired or expire within `interval` of `now`.
    pub fn check_expiration(&mut self, interval: Duration, now: DateTime<Utc>) -> TrustResult<ExpirationReport> {
        let mut report = ExpirationReport::default();
        for document in self.load_documents(None)? {
            if document.expires <= now {
                report.expired.push((document.role, document.expires));
            } else if document.expires <= now + interval {
                report.will_expire.push((document.role, document.expires));
            }
        }
        report.expired.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        report.will_expire.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        Ok(report)
    }
}

/// Checks that timestamp names the loaded snapshot and snapshot names every
/// loaded role version.
fn check_consistency(state: &TrustSnapshot) -> TrustResult<()> {
    let snapshot = state.trusted_document(&RoleName::Snapshot)?;
    let timestamp = state.trusted_document(&RoleName::Timestamp)?;
    let pinned = timestamp
        .timestamp_body()
        .ok_or_else(|| TrustError::SnapshotMismatch("timestamp has no timestamp body".to_string()))?;
    if pinned.snapshot_version != snapshot.version {
        return Err(TrustError::SnapshotMismatch(format!(
            "timestamp names snapshot v{}, store holds v{}",
            pinned.snapshot_version, snapshot.version
        )));
    }
    if pinned.snapshot_hash != sha256_hex(&canonical_bytes(snapshot)?) {
        return Err(TrustError::SnapshotMismatch(
            "snapshot digest differs from the one in timestamp".to_string(),
        ));
    }
    let meta = &snapshot
        .snapshot_body()
        .ok_or_else(|| TrustError::SnapshotMismatch("snapshot has no snapshot body".to_string()))?
        .meta;
    for document in state.documents() {
        if matches!(document.role, RoleName::Snapshot | RoleName::Timestamp) {
            continue;
        }
        match meta.get(&document.role) {
            Some(&version) if version == document.version => {}
            Some(&version) => {
                return Err(TrustError::SnapshotMismatch(format!(
                    "snapshot lists {} v{}, store holds v{}",
                    document.role, version, document.version
                )))
            }
            None => {
                return Err(TrustError::SnapshotMismatch(format!(
                    "{} is missing from snapshot",
                    document.role
                )))
            }
        }
    }
    Ok(())
}
