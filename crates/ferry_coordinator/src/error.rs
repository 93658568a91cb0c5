//! Error types for backend switching.

use ferry_sync::SyncMode;
use thiserror::Error;

/// Result type for coordinator operations.
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

/// Errors that can occur while switching backends.
#[derive(Error, Debug)]
pub enum CoordinatorError {
    /// A destructive operation targeted a backend that is not active.
    #[error("refusing operation on {intended} backend while {active} is active")]
    WrongBackend {
        /// Backend currently active.
        active: SyncMode,
        /// Backend the caller meant to act on.
        intended: SyncMode,
    },

    /// A migration for a switch is still running or parked.
    #[error("migration {0} is in progress")]
    MigrationInProgress(String),

    /// Another switch or bulk operation is running.
    #[error("another backend switch is in progress")]
    SwitchInProgress,

    /// The outbox holds entries and the caller gave no resolution.
    #[error("outbox has {pending} pending and {failed} failed entries; choose sync, discard or cancel")]
    ResolutionRequired {
        /// Entries waiting to be sent.
        pending: usize,
        /// Entries whose last send failed.
        failed: usize,
    },

    /// Syncing the outbox before a switch left entries behind.
    #[error("outbox still has {pending} pending and {failed} failed entries after sync")]
    OutboxNotEmpty {
        /// Entries waiting to be sent.
        pending: usize,
        /// Entries whose last send failed.
        failed: usize,
    },

    /// The persisted mode record could not be read.
    #[error("corrupt mode record: {0}")]
    CorruptMode(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migrate(#[from] ferry_migrate::MigrateError),

    /// Outbox error.
    #[error("sync error: {0}")]
    Sync(#[from] ferry_sync::SyncError),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] ferry_storage::StorageError),

    /// Codec error.
    #[error("codec error: {0}")]
    Codec(#[from] ferry_codec::CodecError),
}

impl CoordinatorError {
    /// Returns true if retrying the switch later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            CoordinatorError::OutboxNotEmpty { .. } => true,
            CoordinatorError::MigrationInProgress(_) | CoordinatorError::SwitchInProgress => true,
            CoordinatorError::Migrate(e) => e.is_retryable(),
            CoordinatorError::Sync(e) => e.is_retryable(),
            CoordinatorError::Storage(_) => true,
            _ => false,
        }
    }
}
