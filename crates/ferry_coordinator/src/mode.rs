//! Persistence of the active backend.

use crate::error::{CoordinatorError, CoordinatorResult};
use ferry_codec::{Envelope, RecordKind};
use ferry_storage::RecordStore;
use ferry_sync::SyncMode;
use serde::{Deserialize, Serialize};

/// Key of the active-mode record.
pub const MODE_KEY: &str = "meta/mode";

/// Persisted active backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeRecord {
    /// Active backend.
    pub mode: SyncMode,
    /// When the backend was last switched (Unix millis).
    pub switched_at: u64,
}

impl Envelope for ModeRecord {
    const KIND: RecordKind = RecordKind::ModeState;
}

/// Loads the persisted mode record, if one was ever written.
pub fn load_mode(store: &dyn RecordStore) -> CoordinatorResult<Option<ModeRecord>> {
    let Some(bytes) = store.get(MODE_KEY)? else {
        return Ok(None);
    };
    ModeRecord::from_envelope(&bytes)
        .map(Some)
        .map_err(|e| CoordinatorError::CorruptMode(e.to_string()))
}

/// Persists `record` and flushes it.
pub fn save_mode(store: &dyn RecordStore, record: &ModeRecord) -> CoordinatorResult<()> {
    store.put(MODE_KEY, &record.to_envelope()?)?;
    store.sync()?;
    Ok(())
}
