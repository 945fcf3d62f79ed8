// src/models/mod.rs
//! Data structures of the trust engine.

pub mod delegation;
pub mod key;
pub mod metadata;
pub mod role;
pub mod target;
