//! # Ferry Storage
//!
//! Durable key/value record stores for Ferry.
//!
//! This crate provides the lowest-level persistence abstraction. Stores
//! are **opaque byte stores** addressed by string keys; they do not
//! interpret the records they hold.
//!
//! ## Design Principles
//!
//! - Whole-record `put` is atomic (write-then-rename on disk)
//! - One writer per store directory, enforced with an advisory lock
//! - Keys are namespaced by callers (`checkpoint/`, `outbox/`, `meta/`)
//! - Must be `Send + Sync` for sharing between workers
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - For testing and ephemeral state
//! - [`FileStore`] - For durable state using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use ferry_storage::{InMemoryStore, RecordStore};
//!
//! let store = InMemoryStore::new();
//! store.put("meta/mode", b"local").unwrap();
//! assert!(store.contains("meta/mode").unwrap());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod memory;
mod store;

pub use error::{StorageError, StorageResult};
pub use file::{FileStore, StoreConfig};
pub use memory::InMemoryStore;
pub use store::{validate_key, RecordStore, MAX_KEY_LEN};
