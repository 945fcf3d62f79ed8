// src/config.rs
//! Runtime configuration.
//!
//! Sources, later ones overriding earlier ones:
//! 1. Built-in defaults
//! 2. An optional `taf.toml` / `taf.json` in the working directory (or the
//!    file given explicitly)
//! 3. `TAF_*` environment variables, with `__` separating nested keys
//!    (`TAF_EXPIRATION__ROOT=730`)

use crate::error::TrustResult;
use crate::models::metadata::ValidityPolicy;
use crate::services::repository::{ExpirationIntervals, RepositorySettings};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;

/// Default validity per role, in days.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExpirationDays {
    pub root: i64,
    pub targets: i64,
    pub snapshot: i64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TrustConfig {
    /// Root directory of the filesystem content store.
    pub store_path: PathBuf,
    /// Directory holding `<name>.json` keystores.
    pub keystore_path: PathBuf,
    /// File persisting this client's version pins.
    pub pins_path: PathBuf,
    pub min_validity_hours: i64,
    pub expiration: ExpirationDays,
    pub rotation_timeout_hours: i64,
    pub signing_timeout_secs: u64,
    pub retry_attempts: u32,
    pub log_level: String,
}

impl TrustConfig {
    /// Loads configuration from defaults, `taf.*` and the environment.
    pub fn load() -> TrustResult<Self> {
        Self::build(File::with_name("taf").required(false))
    }

    /// Like [`TrustConfig::load`] but reads the given file, which must exist.
    pub fn load_from(path: &str) -> TrustResult<Self> {
        Self::build(File::with_name(path).required(true))
    }

    fn build<S>(file: S) -> TrustResult<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let settings = Config::builder()
            .set_default("store_path", ".taf/store")?
            .set_default("keystore_path", ".taf/keystore")?
            .set_default("pins_path", ".taf/pins.json")?
            .set_default("min_validity_hours", 1)?
            .set_default("expiration.root", 365)?
            .set_default("expiration.targets", 90)?
            .set_default("expiration.snapshot", 7)?
            .set_default("expiration.timestamp", 1)?
            .set_default("rotation_timeout_hours", 24)?
            .set_default("signing_timeout_secs", 120)?
            .set_default("retry_attempts", 3)?
            .set_default("log_level", "info")?
            .add_source(file)
            .add_source(
                Environment::with_prefix("TAF")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn validity_policy(&self) -> ValidityPolicy {
        ValidityPolicy {
            min_validity: chrono::Duration::hours(self.min_validity_hours),
        }
    }

    pub fn expiration_intervals(&self) -> ExpirationIntervals {
        ExpirationIntervals {
            root: chrono::Duration::days(self.expiration.root),
            targets: chrono::Duration::days(self.expiration.targets),
            snapshot: chrono::Duration::days(self.expiration.snapshot),
            timestamp: chrono::Duration::days(self.expiration.timestamp),
        }
    }

    pub fn repository_settings(&self) -> RepositorySettings {
        RepositorySettings {
            validity: self.validity_policy(),
            expiration: self.expiration_intervals(),
            rotation_timeout: chrono::Duration::hours(self.rotation_timeout_hours),
            retry_attempts: self.retry_attempts,
        }
    }

    pub fn signing_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.signing_timeout_secs)
    }
}
