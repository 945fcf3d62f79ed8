// src/storage/memory.rs
//! In-memory content store.
//!
//! Holds objects and version lists in hash maps behind mutexes, so one
//! instance can be shared (via `Arc`) by several metadata stores to model
//! independent writers. Nothing is persisted.

use crate::error::{TrustError, TrustResult};
use crate::models::role::RoleName;
use crate::storage::content_store::{ContentStore, ObjectId};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<ObjectId, Vec<u8>>>,
    versions: Mutex<HashMap<RoleName, BTreeMap<u64, ObjectId>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Number of stored objects.
    pub fn count_objects(&self) -> usize {
        lock(&self.objects).map(|objects| objects.len()).unwrap_or(0)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> TrustResult<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| TrustError::Storage("memory store lock poisoned".to_string()))
}

impl ContentStore for MemoryStore {
    fn read_object(&self, id: &ObjectId) -> TrustResult<Vec<u8>> {
        lock(&self.objects)?
            .get(id)
            .cloned()
            .ok_or_else(|| TrustError::NotFound(format!("object {}", id)))
    }

    fn write_object(&self, bytes: &[u8]) -> TrustResult<ObjectId> {
        let id = ObjectId::for_bytes(bytes);
        lock(&self.objects)?
            .entry(id.clone())
            .or_insert_with(|| bytes.to_vec());
        Ok(id)
    }

    fn list_versions(&self, role: &RoleName) -> TrustResult<Vec<u64>> {
        Ok(lock(&self.versions)?
            .get(role)
            .map(|versions| versions.keys().copied().collect())
            .unwrap_or_default())
    }

    fn version_object(&self, role: &RoleName, version: u64) -> TrustResult<Option<ObjectId>> {
        Ok(lock(&self.versions)?
            .get(role)
            .and_then(|versions| versions.get(&version).cloned()))
    }

    fn record_version(&self, role: &RoleName, version: u64, id: &ObjectId) -> TrustResult<()> {
        let mut all = lock(&self.versions)?;
        let versions = all.entry(role.clone()).or_default();
        let latest = versions.keys().next_back().copied().unwrap_or(0);
        if version != latest + 1 {
            return Err(TrustError::StaleWrite {
                role: role.clone(),
                expected: version.saturating_sub(1),
                found: latest,
            });
        }
        versions.insert(version, id.clone());
        Ok(())
    }
}
