// src/storage/pins.rs
//! Client-side version pins.
//!
//! A pin is the highest version of a role this client has accepted. Pins
//! only move forward; persisting them between runs is what makes rollback
//! protection survive a restart.

use crate::error::TrustResult;
use crate::models::role::RoleName;
use crate::utils::serialization::{deserialize, serialize};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinFile {
    pins: BTreeMap<RoleName, u64>,
}

impl PinFile {
    pub fn new() -> Self {
        PinFile::default()
    }

    /// Reads pins from `path`; a missing file means no pins yet.
    pub fn load(path: &Path) -> TrustResult<Self> {
        if !path.exists() {
            return Ok(PinFile::default());
        }
        Ok(deserialize(&fs::read(path)?)?)
    }

    /// Writes pins to `path` via a temporary file and rename.
    pub fn save(&self, path: &Path) -> TrustResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, serialize(self)?)?;
        fs::rename(&temp_path, path)?;
        Ok(())
    }

    pub fn get(&self, role: &RoleName) -> Option<u64> {
        self.pins.get(role).copied()
    }

    /// Raises the pin of `role` to `version`. Lower versions are ignored.
    /// Returns whether the pin moved.
    pub fn raise(&mut self, role: &RoleName, version: u64) -> bool {
        let pin = self.pins.entry(role.clone()).or_insert(0);
        if version > *pin {
            *pin = version;
            true
        } else {
            false
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RoleName, &u64)> {
        self.pins.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pins_only_move_forward() {
        let mut pins = PinFile::new();
        assert!(pins.raise(&RoleName::Root, 3));
        assert!(!pins.raise(&RoleName::Root, 2));
        assert_eq!(pins.get(&RoleName::Root), Some(3));
        assert_eq!(pins.get(&RoleName::Targets), None);
    }

    #[test]
    fn test_pins_survive_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("pins.json");
        assert_eq!(PinFile::load(&path).unwrap(), PinFile::new());

        let mut pins = PinFile::new();
        pins.raise(&RoleName::Root, 2);
        pins.raise(&RoleName::delegated("delegated-1").unwrap(), 5);
        pins.save(&path).unwrap();

        assert_eq!(PinFile::load(&path).unwrap(), pins);
    }
}
