// src/services/mod.rs
//! Trust logic on top of the data model: signature verification, the
//! delegation graph, key rotation and the repository workflows.

pub mod repository;
pub mod rotation;
pub mod trust_graph;
pub mod verifier;
