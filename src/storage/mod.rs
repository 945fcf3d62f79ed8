// src/storage/mod.rs
//! Persistence of role metadata: content stores, client pins and the
//! versioned metadata store built on them.

pub mod content_store;
pub mod filesystem;
pub mod memory;
pub mod metadata_store;
pub mod pins;

pub use content_store::{ContentStore, ObjectId};
pub use filesystem::FilesystemStore;
pub use memory::MemoryStore;
pub use metadata_store::MetadataStore;
pub use pins::PinFile;
