//! Record store trait definition.

use crate::error::{StorageError, StorageResult};
use std::sync::Arc;

/// Maximum key length accepted by every store, in bytes.
///
/// File-backed stores hex-encode keys into file names, so this keeps the
/// resulting name under common filesystem limits.
pub const MAX_KEY_LEN: usize = 120;

/// A durable key/value store for whole records.
///
/// Record stores are **opaque byte stores** addressed by string keys. They
/// do not interpret the values they hold; the codec layer owns encoding.
///
/// # Invariants
///
/// - `put` is atomic: after a crash, `get` returns either the previous
///   value or the new one, never a torn mix of the two
/// - `keys_with_prefix` returns keys in ascending byte order
/// - Stores must be `Send + Sync`; writes are serialized internally
///
/// # Implementors
///
/// - [`super::InMemoryStore`] - For testing and ephemeral state
/// - [`super::FileStore`] - For durable state, one file per record
pub trait RecordStore: Send + Sync {
    /// Reads the value stored under `key`.
    ///
    /// Returns `None` if the key is absent.
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Stores `value` under `key`, replacing any previous value atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or the write fails. On error
    /// the previous value (if any) is still in place.
    fn put(&self, key: &str, value: &[u8]) -> StorageResult<()>;

    /// Removes `key`. Returns `true` if a value was removed.
    fn delete(&self, key: &str) -> StorageResult<bool>;

    /// Lists all keys starting with `prefix`, in ascending order.
    fn keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// Flushes any buffered state to durable storage.
    fn sync(&self) -> StorageResult<()>;

    /// Returns true if `key` is present.
    fn contains(&self, key: &str) -> StorageResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Counts keys starting with `prefix`.
    fn count_prefix(&self, prefix: &str) -> StorageResult<usize> {
        Ok(self.keys_with_prefix(prefix)?.len())
    }
}

impl<S: RecordStore + ?Sized> RecordStore for Arc<S> {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn put(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        (**self).put(key, value)
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        (**self).delete(key)
    }

    fn keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        (**self).keys_with_prefix(prefix)
    }

    fn sync(&self) -> StorageResult<()> {
        (**self).sync()
    }
}

/// Validates a record key against the limits shared by all stores.
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() {
        return Err(StorageError::invalid_key(key, "key is empty"));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(StorageError::invalid_key(key, "key exceeds 120 bytes"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_key_rejected() {
        assert!(matches!(
            validate_key(""),
            Err(StorageError::InvalidKey { .. })
        ));
    }

    #[test]
    fn long_key_rejected() {
        let key = "k".repeat(MAX_KEY_LEN + 1);
        assert!(validate_key(&key).is_err());
        assert!(validate_key(&key[..MAX_KEY_LEN]).is_ok());
    }
}
