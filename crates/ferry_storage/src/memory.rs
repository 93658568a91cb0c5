//! In-memory record store for testing.

use crate::error::StorageResult;
use crate::store::{validate_key, RecordStore};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// An in-memory record store.
///
/// This store keeps all records in a sorted map and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral state that doesn't need to survive a restart
///
/// # Example
///
/// ```rust
/// use ferry_storage::{InMemoryStore, RecordStore};
///
/// let store = InMemoryStore::new();
/// store.put("checkpoint/a", b"state").unwrap();
/// assert_eq!(store.get("checkpoint/a").unwrap().as_deref(), Some(&b"state"[..]));
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of records held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Removes every record.
    pub fn clear(&self) {
        self.records.write().clear();
    }
}

impl RecordStore for InMemoryStore {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.records.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        validate_key(key)?;
        self.records.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        Ok(self.records.write().remove(key).is_some())
    }

    fn keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .records
            .read()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    fn sync(&self) -> StorageResult<()> {
        Ok(())
    }
}
