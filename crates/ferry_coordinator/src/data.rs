//! Data stores the coordinator switches between.

use ferry_migrate::{
    MigrateResult, Record, RecordKey, RecordSink, RecordSource, StoreSink, StoreSource,
    RECORD_PREFIX,
};
use ferry_storage::RecordStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// A backend holding user records: readable as a migration source,
/// writable as a migration sink, and countable and clearable as a whole.
pub trait DataStore: RecordSource + RecordSink {
    /// Number of user records held.
    fn record_count(&self) -> MigrateResult<usize>;

    /// Deletes every user record. Returns how many were deleted.
    fn clear(&self) -> MigrateResult<usize>;
}

impl<T: DataStore + ?Sized> DataStore for Arc<T> {
    fn record_count(&self) -> MigrateResult<usize> {
        (**self).record_count()
    }

    fn clear(&self) -> MigrateResult<usize> {
        (**self).clear()
    }
}

/// [`DataStore`] over the `record/` namespace of a [`RecordStore`].
pub struct StoreData<S: ?Sized> {
    store: Arc<S>,
    source: StoreSource<Arc<S>>,
    sink: StoreSink<Arc<S>>,
}

impl<S: RecordStore + ?Sized> StoreData<S> {
    /// Wraps `store`.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            source: StoreSource::new(Arc::clone(&store)),
            sink: StoreSink::new(Arc::clone(&store)),
            store,
        }
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}

impl<S: RecordStore + ?Sized> RecordSource for StoreData<S> {
    fn keys(&self) -> MigrateResult<Vec<RecordKey>> {
        self.source.keys()
    }

    fn read_batch(&self, keys: &[RecordKey]) -> MigrateResult<Vec<Record>> {
        self.source.read_batch(keys)
    }
}

impl<S: RecordStore + ?Sized> RecordSink for StoreData<S> {
    fn write_batch(&self, records: &[Record], timeout: Duration) -> MigrateResult<()> {
        self.sink.write_batch(records, timeout)
    }
}

impl<S: RecordStore + ?Sized> DataStore for StoreData<S> {
    fn record_count(&self) -> MigrateResult<usize> {
        Ok(self.store.count_prefix(RECORD_PREFIX)?)
    }

    fn clear(&self) -> MigrateResult<usize> {
        let keys = self.store.keys_with_prefix(RECORD_PREFIX)?;
        let mut removed = 0;
        for key in &keys {
            if self.store.delete(key)? {
                removed += 1;
            }
        }
        self.store.sync()?;
        if removed > 0 {
            warn!(count = removed, "records cleared");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_migrate::{get_record, put_record};
    use ferry_storage::InMemoryStore;

    #[test]
    fn count_and_clear() {
        let store = Arc::new(InMemoryStore::new());
        for i in 0..3 {
            put_record(store.as_ref(), &Record::new(format!("k{i}"), vec![i as u8])).unwrap();
        }
        store.put("meta/other", b"x").unwrap();

        let data = StoreData::new(Arc::clone(&store));
        assert_eq!(data.record_count().unwrap(), 3);
        assert_eq!(data.keys().unwrap(), vec!["k0", "k1", "k2"]);
        assert_eq!(data.clear().unwrap(), 3);
        assert_eq!(data.record_count().unwrap(), 0);
        assert!(store.contains("meta/other").unwrap());
        assert_eq!(data.clear().unwrap(), 0);
    }

    #[test]
    fn sink_writes_are_readable() {
        let data = StoreData::new(Arc::new(InMemoryStore::new()));
        data.write_batch(&[Record::new("a", vec![1])], Duration::from_secs(1))
            .unwrap();
        assert_eq!(
            get_record(data.store().as_ref(), "a").unwrap(),
            Some(Record::new("a", vec![1]))
        );
    }
}
