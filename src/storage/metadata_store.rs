// src/storage/metadata_store.rs
//! Versioned role metadata on top of a [`ContentStore`].
//!
//! The store enforces two client-side guarantees:
//! - **No rollback**: a role is never loaded at a version below its pin.
//!   Pins move only on [`MetadataStore::commit_pins`] (after the caller has
//!   verified what it loaded) and on this client's own saves.
//! - **No lost update**: a document is only saved if it builds on the
//!   version this client read and the store still holds that version.
//!
//! Concurrent writers are not locked out; the loser of a race gets
//! `StaleWrite` and is expected to reload and re-apply its change
//! ([`MetadataStore::update_with_retry`]).

use crate::error::{TrustError, TrustResult};
use crate::models::metadata::RoleMetadata;
use crate::models::role::RoleName;
use crate::storage::content_store::{load_json, store_json, ContentStore, ObjectId};
use crate::storage::pins::PinFile;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::collections::BTreeMap;

pub struct MetadataStore<S: ContentStore> {
    store: S,
    pins: PinFile,
    /// Version of each role as seen by the last load or save.
    observed: BTreeMap<RoleName, u64>,
}

impl<S: ContentStore> MetadataStore<S> {
    pub fn new(store: S) -> Self {
        Self::with_pins(store, PinFile::new())
    }

    /// Creates a store that starts from previously persisted pins.
    pub fn with_pins(store: S, pins: PinFile) -> Self {
        MetadataStore {
            store,
            pins,
            observed: BTreeMap::new(),
        }
    }

    pub fn content_store(&self) -> &S {
        &self.store
    }

    pub fn pins(&self) -> &PinFile {
        &self.pins
    }

    pub fn pinned(&self, role: &RoleName) -> Option<u64> {
        self.pins.get(role)
    }

    /// Pins `role` at `version` (e.g. from an out-of-band trusted root).
    pub fn pin(&mut self, role: &RoleName, version: u64) {
        self.pins.raise(role, version);
    }

    /// Latest version of `role` in the store, 0 if it has none.
    pub fn current_version(&self, role: &RoleName) -> TrustResult<u64> {
        self.store.latest_version(role)
    }

    /// Loads the newest version of `role`.
    ///
    /// # Errors
    /// - `NotFound` if the role has no versions
    /// - `Rollback` if the newest version is below the pin
    /// - `Expired` if the document's expiry is not after `now`
    ///
    /// On success the observed version is raised; the pin is not.
    pub fn load(&mut self, role: &RoleName, now: DateTime<Utc>) -> TrustResult<RoleMetadata> {
        let document = self.fetch_latest(role)?;
        if document.is_expired(now) {
            warn!("{} v{} expired at {}", role, document.version, document.expires);
            return Err(TrustError::Expired {
                role: role.clone(),
                expires: document.expires,
            });
        }
        self.observe(&document);
        Ok(document)
    }

    /// Like [`MetadataStore::load`] but accepts expired documents. Used to
    /// build the next version of a role whose current one has lapsed.
    pub fn load_for_update(&mut self, role: &RoleName) -> TrustResult<RoleMetadata> {
        let document = self.fetch_latest(role)?;
        self.observe(&document);
        Ok(document)
    }

    /// Reads a specific historical version for audit. Pins and observed
    /// versions are left alone.
    pub fn load_version(&self, role: &RoleName, version: u64) -> TrustResult<RoleMetadata> {
        let id = self
            .store
            .version_object(role, version)?
            .ok_or_else(|| TrustError::NotFound(format!("{} version {}", role, version)))?;
        let document: RoleMetadata = load_json(&self.store, &id)?;
        if &document.role != role || document.version != version {
            return Err(TrustError::Storage(format!(
                "object {} recorded as {} v{} holds {} v{}",
                id, role, version, document.role, document.version
            )));
        }
        Ok(document)
    }

    fn fetch_latest(&self, role: &RoleName) -> TrustResult<RoleMetadata> {
        let latest = self.current_version(role)?;
        if latest == 0 {
            return Err(TrustError::NotFound(role.to_string()));
        }
        if let Some(pinned) = self.pinned(role) {
            if latest < pinned {
                warn!("refusing {} v{}: pinned at v{}", role, latest, pinned);
                return Err(TrustError::Rollback {
                    role: role.clone(),
                    pinned,
                    received: latest,
                });
            }
        }
        self.load_version(role, latest)
    }

    fn observe(&mut self, document: &RoleMetadata) {
        self.observed.insert(document.role.clone(), document.version);
    }

    /// Raises the pins of `documents` once the caller has verified them.
    pub fn commit_pins<'a>(&mut self, documents: impl IntoIterator<Item = &'a RoleMetadata>) {
        for document in documents {
            if self.pins.raise(&document.role, document.version) {
                debug!("pinned {} at v{}", document.role, document.version);
            }
        }
    }

    /// Persists `document` as the next version of its role.
    ///
    /// # Errors
    /// - `VersionConflict` for version 0
    /// - `StaleWrite` if this client observed a different base version, or
    ///   the store has moved past `document.version - 1`
    pub fn save(&mut self, document: &RoleMetadata) -> TrustResult<ObjectId> {
        let role = &document.role;
        if document.version == 0 {
            return Err(TrustError::VersionConflict {
                role: role.clone(),
                expected: 1,
                got: 0,
            });
        }
        let base = document.version - 1;
        if let Some(&observed) = self.observed.get(role) {
            if observed != base {
                return Err(TrustError::StaleWrite {
                    role: role.clone(),
                    expected: base,
                    found: observed,
                });
            }
        }
        let latest = self.current_version(role)?;
        if latest != base {
            return Err(TrustError::StaleWrite {
                role: role.clone(),
                expected: base,
                found: latest,
            });
        }

        let id = store_json(&self.store, document)?;
        self.store.record_version(role, document.version, &id)?;
        self.observe(document);
        self.pins.raise(role, document.version);
        info!("saved {} v{} as object {}", role, document.version, id);
        Ok(id)
    }

    /// Read-compute-write loop.
    ///
    /// `compute` receives the current document of `role` (or `None` if the
    /// role has none yet) and returns the next version. On `StaleWrite` the
    /// role is reloaded and `compute` runs again, up to `attempts` times in
    /// total. Every other error is returned immediately.
    pub fn update_with_retry<F>(&mut self, role: &RoleName, attempts: u32, mut compute: F) -> TrustResult<RoleMetadata>
    where
        F: FnMut(Option<&RoleMetadata>) -> TrustResult<RoleMetadata>,
    {
        let attempts = attempts.max(1);
        let mut attempt = 1;
        loop {
            let current = match self.load_for_update(role) {
                Ok(document) => Some(document),
                Err(TrustError::NotFound(_)) => {
                    self.observed.remove(role);
                    None
                }
                Err(e) => return Err(e),
            };
            let next = compute(current.as_ref())?;
            match self.save(&next) {
                Ok(_) => return Ok(next),
                Err(e @ TrustError::StaleWrite { .. }) if attempt < attempts => {
                    warn!("{} (attempt {} of {}), reloading", e, attempt, attempts);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
