//! # mcs-storage
//!
//! Storage layer for the MCS push client.
//!
//! This crate provides:
//! - The persistent-id set used for delivery dedup and login resumption
//! - Device credential persistence
//! - An in-memory store and a JSON file store

pub mod credentials;
pub mod error;
pub mod file;
pub mod memory;
pub mod store;

pub use credentials::Credentials;
pub use error::StorageError;
pub use file::FileStore;
pub use memory::MemoryStore;
pub use store::{CredentialStore, PersistentIdStore};
