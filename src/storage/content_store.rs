// src/storage/content_store.rs
//! Content-addressed object storage with per-role version lists.
//!
//! Role documents are written once as immutable objects addressed by the
//! SHA-256 of their bytes. A separate version list maps `(role, version)` to
//! an object id; appending to it is the single atomic commit point of a
//! metadata update.

use crate::error::{TrustError, TrustResult};
use crate::models::role::RoleName;
use crate::utils::crypto::sha256_hex;
use crate::utils::serialization::{deserialize, serialize};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Address of a stored object: lowercase hex SHA-256 of its bytes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(String);

impl ObjectId {
    pub fn for_bytes(bytes: &[u8]) -> Self {
        ObjectId(sha256_hex(bytes))
    }

    /// Parses a stored id, rejecting anything that is not 64 hex digits.
    pub fn parse(id: &str) -> TrustResult<Self> {
        let id = id.trim();
        if id.len() != 64 || !id.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(TrustError::Storage(format!("malformed object id {:?}", id)));
        }
        Ok(ObjectId(id.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Storage collaborator of the metadata store.
pub trait ContentStore: Send + Sync {
    /// Reads an object. `NotFound` if it was never written.
    fn read_object(&self, id: &ObjectId) -> TrustResult<Vec<u8>>;

    /// Writes an object whole and returns its address. Writing the same bytes
    /// twice is a no-op.
    fn write_object(&self, bytes: &[u8]) -> TrustResult<ObjectId>;

    /// Recorded versions of `role`, ascending.
    fn list_versions(&self, role: &RoleName) -> TrustResult<Vec<u64>>;

    /// Object recorded for `role` at `version`, if any.
    fn version_object(&self, role: &RoleName, version: u64) -> TrustResult<Option<ObjectId>>;

    /// Records `id` as `version` of `role`.
    ///
    /// # Errors
    /// `StaleWrite` unless `version` is exactly one past the latest recorded
    /// version. Two writers racing for the same version see exactly one
    /// success.
    fn record_version(&self, role: &RoleName, version: u64, id: &ObjectId) -> TrustResult<()>;

    /// Latest recorded version of `role`, 0 if none.
    fn latest_version(&self, role: &RoleName) -> TrustResult<u64> {
        Ok(self.list_versions(role)?.last().copied().unwrap_or(0))
    }
}

impl<S: ContentStore + ?Sized> ContentStore for Arc<S> {
    fn read_object(&self, id: &ObjectId) -> TrustResult<Vec<u8>> {
        (**self).read_object(id)
    }

    fn write_object(&self, bytes: &[u8]) -> TrustResult<ObjectId> {
        (**self).write_object(bytes)
    }

    fn list_versions(&self, role: &RoleName) -> TrustResult<Vec<u64>> {
        (**self).list_versions(role)
    }

    fn version_object(&self, role: &RoleName, version: u64) -> TrustResult<Option<ObjectId>> {
        (**self).version_object(role, version)
    }

    fn record_version(&self, role: &RoleName, version: u64, id: &ObjectId) -> TrustResult<()> {
        (**self).record_version(role, version, id)
    }
}

/// Serializes `data` to JSON and stores it.
pub fn store_json<S, T>(store: &S, data: &T) -> TrustResult<ObjectId>
where
    S: ContentStore + ?Sized,
    T: Serialize,
{
    let bytes = serialize(data)?;
    store.write_object(&bytes)
}

/// Reads an object and deserializes it from JSON. The bytes are checked
/// against the address before parsing.
pub fn load_json<S, T>(store: &S, id: &ObjectId) -> TrustResult<T>
where
    S: ContentStore + ?Sized,
    T: DeserializeOwned,
{
    let bytes = store.read_object(id)?;
    if &ObjectId::for_bytes(&bytes) != id {
        return Err(TrustError::Storage(format!("object {} is corrupted", id)));
    }
    Ok(deserialize(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_id_is_content_hash() {
        let id = ObjectId::for_bytes(b"hello");
        assert_eq!(
            id.as_str(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(ObjectId::parse(&id.as_str().to_uppercase()).unwrap(), id);
    }

    #[test]
    fn test_object_id_rejects_path_like_input() {
        assert!(ObjectId::parse("../../etc/passwd").is_err());
        assert!(ObjectId::parse("abc").is_err());
    }
}
