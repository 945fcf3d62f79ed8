// src/error.rs
//! Error taxonomy for the trust engine.
//!
//! Every failure the engine can report is a [`TrustError`] variant, and every
//! variant belongs to exactly one [`ErrorClass`]. Callers use the class to
//! decide how to react:
//! - **Integrity** errors are never retried; the operation is abandoned.
//! - **Concurrency** errors are recovered by reloading and re-applying.
//! - **Environment** errors need user interaction (reconnect a token,
//!   re-enter a passphrase).
//! - **Policy** errors name the violated rule.

use crate::models::key::KeyId;
use crate::models::role::RoleName;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors produced by the trust metadata engine.
#[derive(Debug, Error)]
pub enum TrustError {
    // ----- integrity -----
    #[error("bad signature from key {0}")]
    BadSignature(KeyId),

    #[error("threshold not met for {role}: need {required}, got {valid}")]
    ThresholdNotMet {
        role: RoleName,
        required: u32,
        valid: u32,
    },

    #[error("unknown key {0}")]
    UnknownKey(KeyId),

    #[error("delegation cycle detected at role {0}")]
    CycleDetected(RoleName),

    #[error("role {parent} delegates to {role}, which has no metadata")]
    DanglingDelegation { parent: RoleName, role: RoleName },

    #[error("role {0} is not reachable from root through verified delegations")]
    UntrustedRole(RoleName),

    #[error("rollback detected for {role}: pinned version {pinned}, got {received}")]
    Rollback {
        role: RoleName,
        pinned: u64,
        received: u64,
    },

    #[error("metadata of {role} expired at {expires}")]
    Expired {
        role: RoleName,
        expires: DateTime<Utc>,
    },

    #[error("snapshot mismatch: {0}")]
    SnapshotMismatch(String),

    #[error("target {path} does not match its signed entry: {reason}")]
    TargetMismatch { path: String, reason: String },

    #[error("target {0} is not listed in trusted metadata")]
    TargetNotFound(String),

    // ----- concurrency -----
    #[error("stale write for {role}: expected base version {expected}, store is at {found}")]
    StaleWrite {
        role: RoleName,
        expected: u64,
        found: u64,
    },

    #[error("version conflict for {role}: expected version {expected}, got {got}")]
    VersionConflict {
        role: RoleName,
        expected: u64,
        got: u64,
    },

    // ----- environment -----
    #[error("key {0} is not available for signing")]
    KeyUnavailable(String),

    #[error("hardware token holding key {0} is not present")]
    HardwareNotPresent(KeyId),

    #[error("hardware token denied signing with key {0}")]
    AuthenticationDenied(KeyId),

    #[error("could not decrypt key: {0}")]
    DecryptionFailed(String),

    // ----- policy -----
    #[error("invalid expiry for {role}: {expires} is earlier than {earliest}")]
    InvalidExpiry {
        role: RoleName,
        expires: DateTime<Utc>,
        earliest: DateTime<Utc>,
    },

    #[error("rotation aborted: {0}")]
    RotationAborted(String),

    #[error("invalid threshold {threshold} for {keys} key(s)")]
    InvalidThreshold { threshold: u32, keys: usize },

    #[error("body of kind {kind} cannot be issued for role {role}")]
    RoleBodyMismatch { role: RoleName, kind: &'static str },

    #[error("invalid role name: {0}")]
    InvalidRole(String),

    #[error("targets error: {0}")]
    Targets(String),

    // ----- storage and plumbing -----
    #[error("metadata for {0} not found")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("invalid key material: {0}")]
    KeyFormat(String),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Broad category of a [`TrustError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Integrity,
    Concurrency,
    Environment,
    Policy,
    Storage,
}

impl ErrorClass {
    /// Process exit code used by the command line front end.
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorClass::Storage => 1,
            ErrorClass::Integrity => 10,
            ErrorClass::Concurrency => 20,
            ErrorClass::Environment => 30,
            ErrorClass::Policy => 40,
        }
    }
}

impl TrustError {
    /// Returns the class this error belongs to.
    pub fn class(&self) -> ErrorClass {
        use TrustError::*;
        match self {
            BadSignature(_)
            | ThresholdNotMet { .. }
            | UnknownKey(_)
            | CycleDetected(_)
            | DanglingDelegation { .. }
            | UntrustedRole(_)
            | Rollback { .. }
            | Expired { .. }
            | SnapshotMismatch(_)
            | TargetMismatch { .. }
            | TargetNotFound(_) => ErrorClass::Integrity,
            StaleWrite { .. } | VersionConflict { .. } => ErrorClass::Concurrency,
            KeyUnavailable(_)
            | HardwareNotPresent(_)
            | AuthenticationDenied(_)
            | DecryptionFailed(_) => ErrorClass::Environment,
            InvalidExpiry { .. }
            | RotationAborted(_)
            | InvalidThreshold { .. }
            | RoleBodyMismatch { .. }
            | InvalidRole(_)
            | Targets(_) => ErrorClass::Policy,
            NotFound(_) | Storage(_) | KeyFormat(_) | Config(_) | Serialization(_) | Io(_) => {
                ErrorClass::Storage
            }
        }
    }

    /// True for errors a caller should answer with reload-and-retry.
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Concurrency
    }

    pub fn exit_code(&self) -> i32 {
        self.class().exit_code()
    }
}

/// Result type used throughout the crate.
pub type TrustResult<T> = std::result::Result<T, TrustError>;
