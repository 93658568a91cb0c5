//! Durable checkpoint persistence.

use crate::error::{MigrateError, MigrateResult};
use crate::session::{CheckpointId, MigrationSession};
use ferry_codec::Envelope;
use ferry_storage::RecordStore;
use parking_lot::Mutex;
use std::sync::Arc;

/// Key prefix under which checkpoints are stored.
pub const CHECKPOINT_PREFIX: &str = "checkpoint/";

/// Persists migration sessions so a job can resume after pause or crash.
///
/// # Invariants
///
/// - After `save` returns `Ok`, a later `load` (in this or a future
///   process) returns an equal session
/// - Writes for the same id are serialized; a reader never observes a
///   partially written checkpoint
/// - `delete` is idempotent
pub trait CheckpointStore: Send + Sync {
    /// Durably stores `session` under its checkpoint id.
    fn save(&self, session: &MigrationSession) -> MigrateResult<()>;

    /// Loads the session stored under `id`.
    ///
    /// # Errors
    ///
    /// Returns [`MigrateError::CheckpointNotFound`] if no checkpoint exists
    /// and [`MigrateError::CorruptCheckpoint`] if it fails validation.
    fn load(&self, id: &CheckpointId) -> MigrateResult<MigrationSession>;

    /// Removes the checkpoint. Returns `true` if one was removed.
    fn delete(&self, id: &CheckpointId) -> MigrateResult<bool>;

    /// Lists stored checkpoint ids in ascending order.
    fn list(&self) -> MigrateResult<Vec<CheckpointId>>;

    /// Loads the session if one exists.
    fn find(&self, id: &CheckpointId) -> MigrateResult<Option<MigrationSession>> {
        match self.load(id) {
            Ok(session) => Ok(Some(session)),
            Err(MigrateError::CheckpointNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl<C: CheckpointStore + ?Sized> CheckpointStore for Arc<C> {
    fn save(&self, session: &MigrationSession) -> MigrateResult<()> {
        (**self).save(session)
    }

    fn load(&self, id: &CheckpointId) -> MigrateResult<MigrationSession> {
        (**self).load(id)
    }

    fn delete(&self, id: &CheckpointId) -> MigrateResult<bool> {
        (**self).delete(id)
    }

    fn list(&self) -> MigrateResult<Vec<CheckpointId>> {
        (**self).list()
    }
}

/// Checkpoint store backed by a [`RecordStore`].
///
/// Each checkpoint is one enveloped record under `checkpoint/<id>`.
pub struct StoreCheckpoints<S> {
    store: S,
    write_lock: Mutex<()>,
}

impl<S: RecordStore> StoreCheckpoints<S> {
    /// Creates a checkpoint store over `store`.
    pub fn new(store: S) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    /// Returns the underlying record store.
    pub fn store(&self) -> &S {
        &self.store
    }

    fn key(id: &CheckpointId) -> String {
        format!("{CHECKPOINT_PREFIX}{}", id.as_str())
    }
}

impl<S: RecordStore> CheckpointStore for StoreCheckpoints<S> {
    fn save(&self, session: &MigrationSession) -> MigrateResult<()> {
        let id = session.checkpoint_id.as_str();
        session
            .validate()
            .map_err(|e| MigrateError::checkpoint_write(id, e.to_string()))?;
        let bytes = session
            .to_envelope()
            .map_err(|e| MigrateError::checkpoint_write(id, e.to_string()))?;

        let _guard = self.write_lock.lock();
        self.store
            .put(&Self::key(&session.checkpoint_id), &bytes)
            .map_err(|e| MigrateError::checkpoint_write(id, e.to_string()))?;

        tracing::trace!(
            checkpoint = id,
            processed = session.items_processed,
            remaining = session.remaining(),
            "checkpoint saved"
        );
        Ok(())
    }

    fn load(&self, id: &CheckpointId) -> MigrateResult<MigrationSession> {
        let bytes = self
            .store
            .get(&Self::key(id))?
            .ok_or_else(|| MigrateError::CheckpointNotFound(id.to_string()))?;

        let corrupt = |message: String| MigrateError::CorruptCheckpoint {
            checkpoint_id: id.to_string(),
            message,
        };
        let session = MigrationSession::from_envelope(&bytes).map_err(|e| corrupt(e.to_string()))?;
        if &session.checkpoint_id != id {
            return Err(corrupt(format!(
                "stored under {id} but records id {}",
                session.checkpoint_id
            )));
        }
        session.validate().map_err(|e| corrupt(e.to_string()))?;
        Ok(session)
    }

    fn delete(&self, id: &CheckpointId) -> MigrateResult<bool> {
        let _guard = self.write_lock.lock();
        let removed = self.store.delete(&Self::key(id))?;
        if removed {
            tracing::debug!(checkpoint = %id, "checkpoint deleted");
        }
        Ok(removed)
    }

    fn list(&self) -> MigrateResult<Vec<CheckpointId>> {
        self.store
            .keys_with_prefix(CHECKPOINT_PREFIX)?
            .iter()
            .filter_map(|key| key.strip_prefix(CHECKPOINT_PREFIX))
            .map(CheckpointId::parse)
            .collect()
    }
}
