// src/storage/filesystem.rs
//! Filesystem content store.
//!
//! Layout under the store root:
//! ```text
//! objects/<sha256>          immutable documents
//! roles/<role>/<version>    file holding the object id of that version
//! ```
//! Objects are written to a temporary file, synced and renamed into place, so
//! readers never see a partial document. Version entries are published with
//! `hard_link`, which fails if the entry already exists; that exclusive
//! create is what turns a lost race into `StaleWrite`.

use crate::error::{TrustError, TrustResult};
use crate::models::role::RoleName;
use crate::storage::content_store::{ContentStore, ObjectId};
use log::debug;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

pub struct FilesystemStore {
    root: PathBuf,
}

impl FilesystemStore {
    /// Opens (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> TrustResult<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("objects"))?;
        fs::create_dir_all(root.join("roles"))?;
        Ok(FilesystemStore { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, id: &ObjectId) -> PathBuf {
        self.root.join("objects").join(id.as_str())
    }

    fn role_dir(&self, role: &RoleName) -> PathBuf {
        self.root.join("roles").join(role.as_str())
    }
}

/// Writes `data` to a fresh temporary file next to `target` and syncs it.
fn write_temp(target: &Path, data: &[u8]) -> TrustResult<PathBuf> {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = target.with_file_name(format!(".tmp.{}.{:016x}", name, rand::random::<u64>()));
    let mut file = fs::File::create(&temp_path)?;
    file.write_all(data)?;
    file.sync_all()?;
    Ok(temp_path)
}

impl ContentStore for FilesystemStore {
    fn read_object(&self, id: &ObjectId) -> TrustResult<Vec<u8>> {
        match fs::read(self.object_path(id)) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(TrustError::NotFound(format!("object {}", id)))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn write_object(&self, bytes: &[u8]) -> TrustResult<ObjectId> {
        let id = ObjectId::for_bytes(bytes);
        let path = self.object_path(&id);
        if path.exists() {
            return Ok(id);
        }
        let temp_path = write_temp(&path, bytes)?;
        if let Err(e) = fs::rename(&temp_path, &path) {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }
        debug!("wrote object {} ({} bytes)", id, bytes.len());
        Ok(id)
    }

    fn list_versions(&self, role: &RoleName) -> TrustResult<Vec<u64>> {
        let entries = match fs::read_dir(self.role_dir(role)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut versions = Vec::new();
        for entry in entries {
            let entry = entry?;
            // temporary files start with a dot and never parse
            if let Some(version) = entry.file_name().to_str().and_then(|n| n.parse::<u64>().ok()) {
                versions.push(version);
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }

    fn version_object(&self, role: &RoleName, version: u64) -> TrustResult<Option<ObjectId>> {
        match fs::read_to_string(self.role_dir(role).join(version.to_string())) {
            Ok(id) => Ok(Some(ObjectId::parse(&id)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn record_version(&self, role: &RoleName, version: u64, id: &ObjectId) -> TrustResult<()> {
        let stale = |found: u64| TrustError::StaleWrite {
            role: role.clone(),
            expected: version.saturating_sub(1),
            found,
        };
        let latest = self.latest_version(role)?;
        if version != latest + 1 {
            return Err(stale(latest));
        }

        let dir = self.role_dir(role);
        fs::create_dir_all(&dir)?;
        let entry = dir.join(version.to_string());
        let temp_path = write_temp(&entry, id.as_str().as_bytes())?;
        let linked = fs::hard_link(&temp_path, &entry);
        let _ = fs::remove_file(&temp_path);
        match linked {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                let found = self.latest_version(role)?;
                Err(stale(found))
            }
            Err(e) => Err(e.into()),
        }
    }
}
