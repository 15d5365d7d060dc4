//! Append-only results stores for check outcomes.
//!
//! This crate provides a trait-based results interface with a JSON-lines
//! reference implementation, an in-memory store, and an optional SQLite
//! backend.

#![warn(missing_docs)]

pub mod trait_;
pub mod json_storage;
pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite_storage;

pub use trait_::{ResultFilter, ResultStore, StorageError, Result};
pub use json_storage::JsonLinesStorage;
pub use memory::MemoryStorage;
#[cfg(feature = "sqlite")]
pub use sqlite_storage::SqliteStorage;
