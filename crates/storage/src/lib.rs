//! Storage abstraction and implementations for Lectern.
//!
//! This crate provides a trait-based storage interface with JSON-file,
//! in-memory and optional SQLite implementations.

#![warn(missing_docs)]

pub mod trait_;

pub mod json_storage;
pub mod memory_storage;
#[cfg(feature = "sqlite")]
pub mod sqlite_storage;

pub use trait_::Storage;

pub use json_storage::JsonStorage;
pub use memory_storage::InMemoryStorage;
#[cfg(feature = "sqlite")]
pub use sqlite_storage::SqliteStorage;

pub use lectern_core::{Error, Result};
