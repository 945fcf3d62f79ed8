// src/lib.rs
//! # TAF trust metadata engine
//!
//! Maintains signed, versioned, expiring role metadata for a repository
//! authentication framework and decides, from that metadata alone, whether
//! a target is authentic.
//!
//! ## Layers
//! 1. **Models**: keys, roles, role metadata and its canonical form
//! 2. **Wallet**: signers (key files, hardware tokens) and the key ring
//! 3. **Services**: signature verification, trust graph, rotation, workflows
//! 4. **Storage**: content-addressed stores and the versioned metadata store

pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod storage;
pub mod utils;
pub mod wallet;

pub use error::{ErrorClass, TrustError, TrustResult};
pub use models::key::{Key, KeyId, KeyScheme};
pub use models::metadata::RoleMetadata;
pub use models::role::{RoleKeys, RoleName};
pub use services::repository::TrustRepository;
pub use services::trust_graph::{resolve, TrustSnapshot};
pub use wallet::key_management::KeyRing;
