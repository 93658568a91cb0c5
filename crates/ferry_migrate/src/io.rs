//! Source and destination seams, plus adapters over record stores.

use crate::error::{MigrateError, MigrateResult};
use crate::session::RecordKey;
use ferry_codec::{Envelope, RecordKind};
use ferry_storage::RecordStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Key prefix for user records held in a [`RecordStore`].
pub const RECORD_PREFIX: &str = "record/";

/// A record moved by the migration engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Record key.
    pub key: RecordKey,
    /// Opaque payload.
    pub payload: Vec<u8>,
}

impl Record {
    /// Creates a record.
    pub fn new(key: impl Into<RecordKey>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            payload: payload.into(),
        }
    }

    /// Size used for byte accounting.
    pub fn size(&self) -> u64 {
        (self.key.len() + self.payload.len()) as u64
    }
}

impl Envelope for Record {
    const KIND: RecordKind = RecordKind::UserRecord;
}

/// Where migrated records come from.
pub trait RecordSource: Send + Sync {
    /// Enumerates every key to migrate, in migration order.
    fn keys(&self) -> MigrateResult<Vec<RecordKey>>;

    /// Reads the records for `keys`.
    ///
    /// Keys deleted since enumeration are left out of the result.
    fn read_batch(&self, keys: &[RecordKey]) -> MigrateResult<Vec<Record>>;

    /// Total size of all records, if the source knows it cheaply.
    fn total_bytes_hint(&self) -> Option<u64> {
        None
    }
}

/// Where migrated records go.
///
/// Writes must be idempotent per key: a batch may be written twice if the
/// process stops between the write and its checkpoint.
pub trait RecordSink: Send + Sync {
    /// Writes `records`, giving up after `timeout`.
    fn write_batch(&self, records: &[Record], timeout: Duration) -> MigrateResult<()>;
}

impl<T: RecordSource + ?Sized> RecordSource for Arc<T> {
    fn keys(&self) -> MigrateResult<Vec<RecordKey>> {
        (**self).keys()
    }

    fn read_batch(&self, keys: &[RecordKey]) -> MigrateResult<Vec<Record>> {
        (**self).read_batch(keys)
    }

    fn total_bytes_hint(&self) -> Option<u64> {
        (**self).total_bytes_hint()
    }
}

impl<T: RecordSink + ?Sized> RecordSink for Arc<T> {
    fn write_batch(&self, records: &[Record], timeout: Duration) -> MigrateResult<()> {
        (**self).write_batch(records, timeout)
    }
}

/// Reads user records from a [`RecordStore`].
pub struct StoreSource<S> {
    store: S,
}

impl<S: RecordStore> StoreSource<S> {
    /// Creates a source over `store`.
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: RecordStore> RecordSource for StoreSource<S> {
    fn keys(&self) -> MigrateResult<Vec<RecordKey>> {
        Ok(self
            .store
            .keys_with_prefix(RECORD_PREFIX)?
            .into_iter()
            .filter_map(|key| key.strip_prefix(RECORD_PREFIX).map(str::to_string))
            .collect())
    }

    fn read_batch(&self, keys: &[RecordKey]) -> MigrateResult<Vec<Record>> {
        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            match self.store.get(&record_key(key))? {
                Some(bytes) => records.push(Record::from_envelope(&bytes)?),
                None => tracing::debug!(key = %key, "record vanished since enumeration"),
            }
        }
        Ok(records)
    }
}

/// Writes user records into a [`RecordStore`].
pub struct StoreSink<S> {
    store: S,
}

impl<S: RecordStore> StoreSink<S> {
    /// Creates a sink over `store`.
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: RecordStore> RecordSink for StoreSink<S> {
    fn write_batch(&self, records: &[Record], timeout: Duration) -> MigrateResult<()> {
        let started = Instant::now();
        for record in records {
            if started.elapsed() > timeout {
                return Err(MigrateError::Timeout {
                    elapsed_ms: started.elapsed().as_millis() as u64,
                });
            }
            self.store
                .put(&record_key(&record.key), &record.to_envelope()?)?;
        }
        Ok(())
    }
}

/// Stores `record` under its key in `store`.
pub fn put_record<S: RecordStore + ?Sized>(store: &S, record: &Record) -> MigrateResult<()> {
    store.put(&record_key(&record.key), &record.to_envelope()?)?;
    Ok(())
}

/// Reads the record stored under `key` in `store`.
pub fn get_record<S: RecordStore + ?Sized>(store: &S, key: &str) -> MigrateResult<Option<Record>> {
    store
        .get(&record_key(key))?
        .map(|bytes| Record::from_envelope(&bytes).map_err(MigrateError::from))
        .transpose()
}

fn record_key(key: &str) -> String {
    format!("{RECORD_PREFIX}{key}")
}
