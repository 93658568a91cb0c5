//! Error types for the migration engine.

use crate::control::MigrationState;
use thiserror::Error;

/// Result type for migration operations.
pub type MigrateResult<T> = Result<T, MigrateError>;

/// Errors that can occur while estimating, checkpointing or migrating.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// The estimator was given an empty sample.
    #[error("insufficient sample: at least one item is required")]
    InsufficientSample,

    /// Persisting a checkpoint failed; the batch was not committed.
    #[error("checkpoint write failed for {checkpoint_id}: {message}")]
    CheckpointWrite {
        /// Checkpoint being written.
        checkpoint_id: String,
        /// Underlying failure.
        message: String,
    },

    /// No checkpoint exists under the given id.
    #[error("checkpoint not found: {0}")]
    CheckpointNotFound(String),

    /// A stored checkpoint failed validation.
    #[error("corrupt checkpoint {checkpoint_id}: {message}")]
    CorruptCheckpoint {
        /// Checkpoint that failed to load.
        checkpoint_id: String,
        /// What was wrong with it.
        message: String,
    },

    /// A single destination write attempt failed.
    #[error("destination error: {message}")]
    Destination {
        /// Error message.
        message: String,
        /// Whether the write can be retried.
        retryable: bool,
    },

    /// Destination writes kept failing after every retry.
    #[error("destination write failed after {attempts} attempt(s): {message}")]
    DestinationWrite {
        /// Attempts made, including the first.
        attempts: u32,
        /// Last error message.
        message: String,
    },

    /// Reading from the source failed.
    #[error("source error: {0}")]
    Source(String),

    /// A collaborator call exceeded its deadline.
    #[error("operation timed out after {elapsed_ms} ms")]
    Timeout {
        /// Time spent before giving up.
        elapsed_ms: u64,
    },

    /// Invalid state transition.
    #[error("invalid migration transition from {from:?} to {to}")]
    InvalidTransition {
        /// Current state.
        from: MigrationState,
        /// Attempted action.
        to: &'static str,
    },

    /// A migration for this job is already in flight.
    #[error("migration already running for job {0}")]
    AlreadyRunning(String),

    /// A job identifier was rejected.
    #[error("invalid job id {id:?}: {reason}")]
    InvalidJobId {
        /// The rejected id.
        id: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// The session's bookkeeping is inconsistent.
    #[error("session invariant violated: {0}")]
    InvalidSession(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] ferry_storage::StorageError),

    /// Codec error.
    #[error("codec error: {0}")]
    Codec(#[from] ferry_codec::CodecError),

    /// I/O error (worker spawn).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MigrateError {
    /// Creates a retryable destination error.
    pub fn destination_retryable(message: impl Into<String>) -> Self {
        Self::Destination {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable destination error.
    pub fn destination_fatal(message: impl Into<String>) -> Self {
        Self::Destination {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a checkpoint write error.
    pub fn checkpoint_write(checkpoint_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CheckpointWrite {
            checkpoint_id: checkpoint_id.into(),
            message: message.into(),
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            MigrateError::Destination { retryable, .. } => *retryable,
            MigrateError::Timeout { .. } => true,
            MigrateError::Storage(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(MigrateError::destination_retryable("connection reset").is_retryable());
        assert!(!MigrateError::destination_fatal("schema rejected").is_retryable());
        assert!(MigrateError::Timeout { elapsed_ms: 10 }.is_retryable());
        assert!(!MigrateError::InsufficientSample.is_retryable());
        assert!(!MigrateError::checkpoint_write("job", "disk full").is_retryable());
    }

    #[test]
    fn error_display() {
        let err = MigrateError::DestinationWrite {
            attempts: 3,
            message: "503".into(),
        };
        assert_eq!(
            err.to_string(),
            "destination write failed after 3 attempt(s): 503"
        );

        let err = MigrateError::InvalidTransition {
            from: MigrationState::Running,
            to: "resume",
        };
        assert!(err.to_string().contains("Running"));
    }
}
