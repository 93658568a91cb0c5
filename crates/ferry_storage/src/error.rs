//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The key cannot be stored by this backend.
    #[error("invalid record key {key:?}: {reason}")]
    InvalidKey {
        /// The rejected key.
        key: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// Another process holds the store directory.
    #[error("store locked: another process has exclusive access to {path}")]
    Locked {
        /// Path of the locked directory.
        path: String,
    },

    /// The store directory is missing and creation was not requested.
    #[error("store directory does not exist: {path}")]
    Missing {
        /// Path that was expected to exist.
        path: String,
    },

    /// The store rejected the write (used by fault-injecting stores).
    #[error("write rejected: {0}")]
    WriteRejected(String),
}

impl StorageError {
    /// Creates an invalid key error.
    pub fn invalid_key(key: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidKey {
            key: key.into(),
            reason,
        }
    }
}
