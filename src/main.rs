// src/main.rs

//! # taf - command line front end
//!
//! Thin wrapper over [`TrustRepository`]: every command loads configuration,
//! opens the filesystem store and keystores, runs one workflow and persists
//! the client's version pins.
//!
//! ## Exit codes
//! - `0` success
//! - `1` other failures (I/O, configuration, malformed input)
//! - `10` integrity or verification failure
//! - `20` stale write or version conflict
//! - `30` hardware or key unavailable
//! - `40` policy violation
//!
//! ## Environment
//! - `TAF_*`: configuration overrides (see [`TrustConfig`])
//! - `TAF_PASSPHRASE`: passphrase for sealed keystores
//! - `RUST_LOG`: overrides the configured log level

use anyhow::Context;
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use log::debug;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use taf_trust::config::TrustConfig;
use taf_trust::models::target::TargetFile;
use taf_trust::services::repository::{DelegationSetup, RoleSetup, RolesSetup, TrustRepository};
use taf_trust::storage::{FilesystemStore, MetadataStore, PinFile};
use taf_trust::wallet::file_key::{FileSigner, Keystore};
use taf_trust::wallet::hardware_key::with_signing_deadline;
use taf_trust::{Key, KeyId, KeyRing, KeyScheme, RoleKeys, RoleName, TrustError, TrustResult};

#[derive(Parser, Debug)]
#[command(name = "taf", version, about = "Manage signed trust metadata of a repository")]
struct Cli {
    /// Configuration file (defaults to ./taf.toml or ./taf.json when present)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Passphrase of sealed keystores
    #[arg(long, env = "TAF_PASSPHRASE", global = true, hide_env_values = true)]
    passphrase: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Key management
    #[command(subcommand)]
    Key(KeyCommand),
    /// Create version 1 of every role from a roles description
    Init {
        /// JSON file naming the keystores and threshold of each role
        #[arg(long)]
        roles: PathBuf,
    },
    /// Root maintenance
    #[command(subcommand)]
    Root(RootCommand),
    /// Target maintenance
    #[command(subcommand)]
    Target(TargetCommand),
    /// Expiration maintenance
    #[command(subcommand)]
    Expiration(ExpirationCommand),
}

#[derive(Subcommand, Debug)]
enum KeyCommand {
    /// Generate a keystore in the configured keystore directory
    Generate {
        name: String,
        #[arg(long, default_value = "ed25519")]
        scheme: String,
    },
    /// Authorize a keystore's key for a role
    Add {
        #[arg(long)]
        role: String,
        /// Keystore name
        #[arg(long)]
        key: String,
    },
    /// Remove a key from a role
    Revoke {
        #[arg(long)]
        role: String,
        /// Keystore name or hex key id
        #[arg(long)]
        key: String,
    },
}

#[derive(Subcommand, Debug)]
enum RootCommand {
    /// Replace the root key set; old and new thresholds must both sign
    Rotate {
        /// Keystore names of the new root keys
        #[arg(long, value_delimiter = ',', required = true)]
        keys: Vec<String>,
        #[arg(long)]
        threshold: u32,
    },
}

#[derive(Subcommand, Debug)]
enum TargetCommand {
    /// Sign a target entry for `path` describing `file`
    Add {
        path: String,
        #[arg(long)]
        file: PathBuf,
        /// Custom metadata as a JSON value
        #[arg(long)]
        custom: Option<String>,
    },
    /// Remove target entries
    Remove {
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Check a file against the trusted entry for `path`
    Verify {
        path: String,
        #[arg(long)]
        file: PathBuf,
    },
    /// Print every trusted target entry with the role that signed it
    List,
}

#[derive(Subcommand, Debug)]
enum ExpirationCommand {
    /// List roles expired or expiring within `days`
    Check {
        #[arg(long, default_value_t = 30)]
        days: i64,
    },
}

/// One role in the `init` roles description.
#[derive(Deserialize, Debug)]
struct RoleSpec {
    /// Keystore names
    keys: Vec<String>,
    #[serde(default = "default_threshold")]
    threshold: u32,
}

fn default_threshold() -> u32 {
    1
}

#[derive(Deserialize, Debug)]
struct DelegationSpec {
    #[serde(default = "default_parent")]
    parent: String,
    name: String,
    #[serde(flatten)]
    role: RoleSpec,
    paths: Vec<String>,
    #[serde(default)]
    terminating: bool,
}

fn default_parent() -> String {
    "targets".to_string()
}

/// Roles description consumed by `taf init`.
#[derive(Deserialize, Debug)]
struct RolesFile {
    root: RoleSpec,
    targets: RoleSpec,
    snapshot: RoleSpec,
    timestamp: RoleSpec,
    #[serde(default)]
    delegations: Vec<DelegationSpec>,
}

fn keystore_file(config: &TrustConfig, name: &str) -> PathBuf {
    config.keystore_path.join(format!("{}.json", name))
}

fn public_key(config: &TrustConfig, name: &str) -> TrustResult<Key> {
    Keystore::load(&keystore_file(config, name))?.public_key()
}

/// Loads every keystore in the keystore directory into a ring.
fn load_ring(config: &TrustConfig, passphrase: Option<&str>) -> TrustResult<KeyRing> {
    let mut ring = KeyRing::new();
    let pattern = config.keystore_path.join("*.json");
    let entries = glob::glob(&pattern.to_string_lossy())
        .map_err(|e| TrustError::Storage(format!("bad keystore pattern: {}", e)))?;
    for entry in entries {
        let path = entry.map_err(|e| TrustError::Storage(e.to_string()))?;
        let keystore = Keystore::load(&path)?;
        let signer = FileSigner::new(keystore, passphrase.map(str::to_string))?;
        let key_id = ring.add_signer(Box::new(signer));
        debug!("loaded key {} from {}", key_id.short(), path.display());
    }
    Ok(ring)
}

fn role_setup(config: &TrustConfig, spec: &RoleSpec) -> TrustResult<RoleSetup> {
    let keys = spec
        .keys
        .iter()
        .map(|name| public_key(config, name))
        .collect::<TrustResult<Vec<_>>>()?;
    Ok(RoleSetup {
        keys,
        threshold: spec.threshold,
    })
}

fn roles_setup(config: &TrustConfig, path: &Path) -> TrustResult<RolesSetup> {
    let description: RolesFile = serde_json::from_slice(&std::fs::read(path)?)?;
    let delegations = description
        .delegations
        .iter()
        .map(|d| {
            Ok(DelegationSetup {
                parent: d.parent.parse()?,
                name: RoleName::delegated(d.name.clone())?,
                role: role_setup(config, &d.role)?,
                paths: d.paths.clone(),
                terminating: d.terminating,
            })
        })
        .collect::<TrustResult<Vec<_>>>()?;
    Ok(RolesSetup {
        root: role_setup(config, &description.root)?,
        targets: role_setup(config, &description.targets)?,
        snapshot: role_setup(config, &description.snapshot)?,
        timestamp: role_setup(config, &description.timestamp)?,
        delegations,
    })
}

fn open_repository(config: &TrustConfig, passphrase: Option<&str>) -> TrustResult<TrustRepository<FilesystemStore>> {
    let store = FilesystemStore::open(&config.store_path)?;
    let pins = PinFile::load(&config.pins_path)?;
    let ring = load_ring(config, passphrase)?;
    Ok(TrustRepository::new(
        MetadataStore::with_pins(store, pins),
        ring,
        config.repository_settings(),
    ))
}

fn generate_key(config: &TrustConfig, name: &str, scheme: &str, passphrase: Option<&str>) -> TrustResult<String> {
    let path = keystore_file(config, name);
    if path.exists() {
        return Err(TrustError::Storage(format!("{} already exists", path.display())));
    }
    let scheme: KeyScheme = scheme.parse()?;
    let keystore = Keystore::generate(name, scheme, passphrase)?;
    keystore.save(&path)?;
    Ok(format!("{} {}", keystore.public_key()?.key_id, path.display()))
}

/// Opens the repository, runs `operation` and persists the pins it raised.
fn in_repository<T, F>(config: &TrustConfig, passphrase: Option<&str>, operation: F) -> TrustResult<T>
where
    F: FnOnce(&mut TrustRepository<FilesystemStore>) -> TrustResult<T>,
{
    let mut repo = open_repository(config, passphrase)?;
    let result = operation(&mut repo)?;
    repo.store().pins().save(&config.pins_path)?;
    Ok(result)
}

/// Runs `command` and returns what to print.
fn execute(command: Command, config: &TrustConfig, passphrase: Option<String>) -> TrustResult<String> {
    let now = Utc::now();
    let passphrase = passphrase.as_deref();
    match command {
        Command::Key(KeyCommand::Generate { name, scheme }) => generate_key(config, &name, &scheme, passphrase),
        Command::Init { roles } => {
            let setup = roles_setup(config, &roles)?;
            in_repository(config, passphrase, |repo| {
                let state = repo.create(&setup, now)?;
                Ok(serde_json::to_string_pretty(&state.roles_description())?)
            })
        }
        Command::Key(KeyCommand::Add { role, key }) => {
            let role: RoleName = role.parse()?;
            let public = public_key(config, &key)?;
            in_repository(config, passphrase, |repo| match repo.add_role_key(&role, public, now)? {
                Some(report) => Ok(serde_json::to_string_pretty(&report)?),
                None => Ok(format!("{} is already authorized for {}", key, role)),
            })
        }
        Command::Key(KeyCommand::Revoke { role, key }) => {
            let role: RoleName = role.parse()?;
            let key_id = if keystore_file(config, &key).exists() {
                public_key(config, &key)?.key_id
            } else {
                KeyId::from_hex(key)
            };
            in_repository(config, passphrase, |repo| {
                Ok(serde_json::to_string_pretty(&repo.revoke_role_key(&role, &key_id, now)?)?)
            })
        }
        Command::Root(RootCommand::Rotate { keys, threshold }) => {
            let new_keys = keys
                .iter()
                .map(|name| public_key(config, name))
                .collect::<TrustResult<Vec<_>>>()?;
            let authority = RoleKeys::new(new_keys.iter().map(|k| k.key_id.clone()), threshold)?;
            in_repository(config, passphrase, |repo| {
                Ok(serde_json::to_string_pretty(&repo.rotate_root(authority, new_keys, now)?)?)
            })
        }
        Command::Target(TargetCommand::Add { path, file, custom }) => {
            let custom = custom.map(|c| serde_json::from_str(&c)).transpose()?;
            let mut files = BTreeMap::new();
            files.insert(path.clone(), TargetFile::from_bytes(&std::fs::read(&file)?, custom));
            in_repository(config, passphrase, |repo| {
                let role = repo.add_targets(files, now)?;
                Ok(format!("{} signed by {}", path, role))
            })
        }
        Command::Target(TargetCommand::Remove { paths }) => in_repository(config, passphrase, |repo| {
            let (role, removed) = repo.remove_targets(&paths, now)?;
            Ok(format!("removed {} from {}", removed.join(", "), role))
        }),
        Command::Target(TargetCommand::Verify { path, file }) => {
            let content = std::fs::read(&file)?;
            in_repository(config, passphrase, |repo| {
                let (role, entry) = repo.verify_target(&path, &content, now)?;
                Ok(format!("{} verified against {} ({} bytes)", path, role, entry.length))
            })
        }
        Command::Target(TargetCommand::List) => in_repository(config, passphrase, |repo| {
            let state = repo.trusted_state(now)?;
            Ok(serde_json::to_string_pretty(&state.signed_targets())?)
        }),
        Command::Expiration(ExpirationCommand::Check { days }) => in_repository(config, passphrase, |repo| {
            let report = repo.check_expiration(Duration::days(days), now)?;
            Ok(serde_json::to_string_pretty(&report)?)
        }),
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => TrustConfig::load_from(path),
        None => TrustConfig::load(),
    }
    .context("failed to load configuration")?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(config.log_level.as_str())).init();

    let timeout = config.signing_timeout();
    let Cli {
        passphrase, command, ..
    } = cli;
    let output = with_signing_deadline(timeout, move || execute(command, &config, passphrase)).await?;
    println!("{}", output);
    Ok(())
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        let code = err.downcast_ref::<TrustError>().map(TrustError::exit_code).unwrap_or(1);
        eprintln!("error: {:#}", err);
        std::process::exit(code);
    }
}

// Unit tests for argument parsing
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_root_rotate() {
        let cli = Cli::try_parse_from(["taf", "root", "rotate", "--keys", "r1,r2,r5", "--threshold", "2"]).unwrap();
        match cli.command {
            Command::Root(RootCommand::Rotate { keys, threshold }) => {
                assert_eq!(keys, vec!["r1", "r2", "r5"]);
                assert_eq!(threshold, 2);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_roles_file_defaults() {
        let description: RolesFile = serde_json::from_str(
            r#"{
                "root": {"keys": ["r1", "r2", "r3"], "threshold": 2},
                "targets": {"keys": ["t1"]},
                "snapshot": {"keys": ["s1"]},
                "timestamp": {"keys": ["s1"]},
                "delegations": [{"name": "delegated-1", "keys": ["d1"], "paths": ["namespace/*"]}]
            }"#,
        )
        .unwrap();
        assert_eq!(description.root.threshold, 2);
        assert_eq!(description.targets.threshold, 1);
        assert_eq!(description.delegations[0].parent, "targets");
        assert!(!description.delegations[0].terminating);
    }

    #[test]
    fn test_ring_loads_every_keystore() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = TrustConfig::load().unwrap();
        config.keystore_path = dir.path().to_path_buf();
        for name in ["a", "b"] {
            Keystore::generate(name, KeyScheme::Ed25519, None)
                .unwrap()
                .save(&keystore_file(&config, name))
                .unwrap();
        }
        let ring = load_ring(&config, None).unwrap();
        assert_eq!(ring.signer_ids().count(), 2);
        assert!(ring.can_sign(&public_key(&config, "a").unwrap().key_id));
    }
}
