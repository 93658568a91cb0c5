//! Error types for the sync outbox.

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while queueing or delivering mutations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the send can be retried.
        retryable: bool,
    },

    /// The remote backend rejected the mutation.
    #[error("remote rejected operation: {0}")]
    Rejected(String),

    /// Not connected to the remote backend.
    #[error("not connected")]
    NotConnected,

    /// A send or drain exceeded its deadline.
    #[error("timed out after {elapsed_ms} ms")]
    Timeout {
        /// Time spent before giving up.
        elapsed_ms: u64,
    },

    /// A queue entry failed validation on load.
    #[error("corrupt outbox entry {key}: {message}")]
    CorruptEntry {
        /// Storage key of the entry.
        key: String,
        /// What was wrong with it.
        message: String,
    },

    /// The auto-sync task could not be joined.
    #[error("auto-sync task failed: {0}")]
    Task(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] ferry_storage::StorageError),

    /// Codec error.
    #[error("codec error: {0}")]
    Codec(#[from] ferry_codec::CodecError),
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::NotConnected => true,
            SyncError::Timeout { .. } => true,
            _ => false,
        }
    }
}
