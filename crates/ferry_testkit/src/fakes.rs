//! In-memory sources, sinks and data stores with fault injection.

use ferry_coordinator::DataStore;
use ferry_migrate::{
    MigrateError, MigrateResult, MigrationHandle, Record, RecordKey, RecordSink, RecordSource,
};
use ferry_storage::{InMemoryStore, RecordStore, StorageError, StorageResult};
use parking_lot::{Condvar, Mutex};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

/// A source over a fixed set of records, enumerated in key order.
#[derive(Debug, Default)]
pub struct VecSource {
    records: Mutex<BTreeMap<RecordKey, Record>>,
}

impl VecSource {
    /// Creates a source holding `records`.
    pub fn new(records: impl IntoIterator<Item = Record>) -> Self {
        Self {
            records: Mutex::new(
                records
                    .into_iter()
                    .map(|record| (record.key.clone(), record))
                    .collect(),
            ),
        }
    }

    /// Deletes a record, as if a user removed it mid-migration.
    pub fn remove(&self, key: &str) -> Option<Record> {
        self.records.lock().remove(key)
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns true if the source holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl RecordSource for VecSource {
    fn keys(&self) -> MigrateResult<Vec<RecordKey>> {
        Ok(self.records.lock().keys().cloned().collect())
    }

    fn read_batch(&self, keys: &[RecordKey]) -> MigrateResult<Vec<Record>> {
        let records = self.records.lock();
        Ok(keys.iter().filter_map(|key| records.get(key).cloned()).collect())
    }

    fn total_bytes_hint(&self) -> Option<u64> {
        Some(self.records.lock().values().map(Record::size).sum())
    }
}

/// Action a [`FaultySink`] triggers on a migration after a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerAction {
    /// Request a pause.
    Pause,
    /// Request cancellation.
    Cancel,
}

struct Trigger {
    after_batches: usize,
    action: TriggerAction,
    handle: MigrationHandle,
}

/// A sink that records writes and misbehaves on demand.
///
/// Writes can be held behind a gate, fail transiently or fatally, be
/// slowed down, and trigger pause or cancel on the migration after a given
/// number of batches (the batch still succeeds).
pub struct FaultySink {
    written: Mutex<BTreeMap<RecordKey, Vec<u8>>>,
    batch_sizes: Mutex<Vec<usize>>,
    record_writes: AtomicUsize,
    fail_next: AtomicU32,
    fatal: AtomicBool,
    delay: Mutex<Option<Duration>>,
    gate: Mutex<bool>,
    gate_changed: Condvar,
    trigger: Mutex<Option<Trigger>>,
}

impl Default for FaultySink {
    fn default() -> Self {
        Self::new()
    }
}

impl FaultySink {
    /// Creates a sink that accepts writes immediately.
    pub fn new() -> Self {
        let sink = Self::gated();
        sink.open_gate();
        sink
    }

    /// Creates a sink whose writes block until [`FaultySink::open_gate`].
    pub fn gated() -> Self {
        Self {
            written: Mutex::new(BTreeMap::new()),
            batch_sizes: Mutex::new(Vec::new()),
            record_writes: AtomicUsize::new(0),
            fail_next: AtomicU32::new(0),
            fatal: AtomicBool::new(false),
            delay: Mutex::new(None),
            gate: Mutex::new(false),
            gate_changed: Condvar::new(),
            trigger: Mutex::new(None),
        }
    }

    /// Lets blocked and future writes through.
    pub fn open_gate(&self) {
        *self.gate.lock() = true;
        self.gate_changed.notify_all();
    }

    /// Holds future writes until the gate is opened again.
    pub fn close_gate(&self) {
        *self.gate.lock() = false;
    }

    /// Fails the next `count` writes with a retryable error.
    pub fn fail_next(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Fails every write with a non-retryable error while set.
    pub fn set_fatal(&self, fatal: bool) {
        self.fatal.store(fatal, Ordering::SeqCst);
    }

    /// Sleeps this long inside every write.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    /// Pauses `handle` once `batches` batches have been written.
    pub fn pause_after(&self, batches: usize, handle: MigrationHandle) {
        self.set_trigger(batches, TriggerAction::Pause, handle);
    }

    /// Cancels `handle` once `batches` batches have been written.
    pub fn cancel_after(&self, batches: usize, handle: MigrationHandle) {
        self.set_trigger(batches, TriggerAction::Cancel, handle);
    }

    /// Removes any pending pause or cancel trigger.
    pub fn clear_trigger(&self) {
        *self.trigger.lock() = None;
    }

    fn set_trigger(&self, after_batches: usize, action: TriggerAction, handle: MigrationHandle) {
        *self.trigger.lock() = Some(Trigger {
            after_batches,
            action,
            handle,
        });
    }

    /// Stores a record directly, bypassing faults.
    pub fn insert(&self, record: Record) {
        self.written.lock().insert(record.key, record.payload);
    }

    /// Deletes every stored record. Returns how many were deleted.
    pub fn clear(&self) -> usize {
        let mut written = self.written.lock();
        let removed = written.len();
        written.clear();
        removed
    }

    /// Snapshot of stored records.
    pub fn written(&self) -> BTreeMap<RecordKey, Vec<u8>> {
        self.written.lock().clone()
    }

    /// Number of distinct records stored.
    pub fn len(&self) -> usize {
        self.written.lock().len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.written.lock().is_empty()
    }

    /// Number of successful batch writes.
    pub fn batches(&self) -> usize {
        self.batch_sizes.lock().len()
    }

    /// Sizes of successful batch writes, in order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().clone()
    }

    /// Records written including rewrites of the same key.
    pub fn record_writes(&self) -> usize {
        self.record_writes.load(Ordering::SeqCst)
    }

    fn wait_for_gate(&self) {
        let mut open = self.gate.lock();
        while !*open {
            self.gate_changed.wait(&mut open);
        }
    }
}

impl RecordSink for FaultySink {
    fn write_batch(&self, records: &[Record], _timeout: Duration) -> MigrateResult<()> {
        self.wait_for_gate();
        if let Some(delay) = *self.delay.lock() {
            std::thread::sleep(delay);
        }
        if self.fatal.load(Ordering::SeqCst) {
            return Err(MigrateError::destination_fatal("injected fatal write failure"));
        }
        if self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(MigrateError::destination_retryable("injected write failure"));
        }

        {
            let mut written = self.written.lock();
            for record in records {
                written.insert(record.key.clone(), record.payload.clone());
            }
        }
        self.record_writes.fetch_add(records.len(), Ordering::SeqCst);
        let batches = {
            let mut sizes = self.batch_sizes.lock();
            sizes.push(records.len());
            sizes.len()
        };

        let trigger = self.trigger.lock();
        if let Some(trigger) = trigger.as_ref() {
            if trigger.after_batches == batches {
                let result = match trigger.action {
                    TriggerAction::Pause => trigger.handle.pause(),
                    TriggerAction::Cancel => trigger.handle.cancel(),
                };
                result.expect("trigger fired on a migration that was not running");
            }
        }
        Ok(())
    }
}

/// A record store over memory whose writes can be made to fail.
///
/// Reads always succeed. Puts and deletes fail while writes are rejected,
/// and a single put can be scheduled to fail.
#[derive(Debug, Default)]
pub struct FaultyStore {
    inner: InMemoryStore,
    puts: AtomicUsize,
    fail_put_at: Mutex<Option<usize>>,
    reject_writes: AtomicBool,
}

impl FaultyStore {
    /// Creates an empty store that accepts writes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the `n`th put from now (`1` is the next one).
    pub fn fail_nth_put(&self, n: usize) {
        let done = self.puts.load(Ordering::SeqCst);
        *self.fail_put_at.lock() = Some(done + n.max(1));
    }

    /// Rejects every put and delete while set.
    pub fn reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    /// Number of puts attempted, failed ones included.
    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

impl RecordStore for FaultyStore {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.inner.get(key)
    }

    fn put(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        let attempt = self.puts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(StorageError::WriteRejected(format!("put {key}")));
        }
        {
            let mut fail_at = self.fail_put_at.lock();
            if *fail_at == Some(attempt) {
                *fail_at = None;
                return Err(StorageError::WriteRejected(format!("put {key}")));
            }
        }
        self.inner.put(key, value)
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(StorageError::WriteRejected(format!("delete {key}")));
        }
        self.inner.delete(key)
    }

    fn keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.inner.keys_with_prefix(prefix)
    }

    fn sync(&self) -> StorageResult<()> {
        self.inner.sync()
    }
}

/// A [`DataStore`] held entirely in memory, with the faults of
/// [`FaultySink`] on its write path.
#[derive(Default)]
pub struct MemoryDataStore {
    sink: FaultySink,
}

impl MemoryDataStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding `records`.
    pub fn with_records(records: impl IntoIterator<Item = Record>) -> Self {
        let store = Self::new();
        for record in records {
            store.sink.insert(record);
        }
        store
    }

    /// Fault controls and write statistics.
    pub fn faults(&self) -> &FaultySink {
        &self.sink
    }

    /// Snapshot of stored records.
    pub fn records(&self) -> BTreeMap<RecordKey, Vec<u8>> {
        self.sink.written()
    }
}

impl RecordSource for MemoryDataStore {
    fn keys(&self) -> MigrateResult<Vec<RecordKey>> {
        Ok(self.sink.written.lock().keys().cloned().collect())
    }

    fn read_batch(&self, keys: &[RecordKey]) -> MigrateResult<Vec<Record>> {
        let written = self.sink.written.lock();
        Ok(keys
            .iter()
            .filter_map(|key| {
                written
                    .get(key)
                    .map(|payload| Record::new(key.clone(), payload.clone()))
            })
            .collect())
    }
}

impl RecordSink for MemoryDataStore {
    fn write_batch(&self, records: &[Record], timeout: Duration) -> MigrateResult<()> {
        self.sink.write_batch(records, timeout)
    }
}

impl DataStore for MemoryDataStore {
    fn record_count(&self) -> MigrateResult<usize> {
        Ok(self.sink.len())
    }

    fn clear(&self) -> MigrateResult<usize> {
        Ok(self.sink.clear())
    }
}
