// src/wallet/mod.rs
//! Key material: the signing capability, its file and token
//! implementations, and the key ring that holds them.

pub mod file_key;
pub mod hardware_key;
pub mod key_management;
pub mod signer;
