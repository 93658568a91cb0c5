//! Durable, ordered storage for outbox entries.
//!
//! Entries live in memory keyed by sequence number and are written through
//! to a [`RecordStore`] under `outbox/<sequence>` on every change.

use crate::error::{SyncError, SyncResult};
use crate::item::{ItemStatus, Mutation, OperationId, SyncQueueItem};
use ferry_codec::Envelope;
use ferry_storage::RecordStore;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Key prefix under which outbox entries are stored.
pub const OUTBOX_PREFIX: &str = "outbox/";

/// Counts of entries per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    /// Entries waiting to be sent.
    pub pending: usize,
    /// Entries with a send in flight.
    pub syncing: usize,
    /// Entries whose last send failed.
    pub failed: usize,
}

impl QueueCounts {
    /// Total entries in the queue.
    pub fn total(&self) -> usize {
        self.pending + self.syncing + self.failed
    }
}

/// Write-through queue of outbox entries.
pub struct OutboxQueue {
    store: Arc<dyn RecordStore>,
    items: BTreeMap<u64, SyncQueueItem>,
    next_sequence: u64,
}

impl OutboxQueue {
    /// Loads the queue from `store`.
    ///
    /// Entries left `syncing` by a crash are reset to `pending`; their send
    /// may or may not have reached the remote, which deduplicates by
    /// operation id.
    pub fn open(store: Arc<dyn RecordStore>) -> SyncResult<Self> {
        let items: BTreeMap<u64, SyncQueueItem> = Self::load(store.as_ref())?
            .into_iter()
            .map(|item| (item.sequence, item))
            .collect();

        let next_sequence = items.keys().next_back().map_or(1, |last| last + 1);
        let mut queue = Self {
            store,
            items,
            next_sequence,
        };

        let interrupted: Vec<u64> = queue
            .items
            .values()
            .filter(|item| item.status == ItemStatus::Syncing)
            .map(|item| item.sequence)
            .collect();
        for sequence in &interrupted {
            queue.update(*sequence, |item| item.status = ItemStatus::Pending)?;
        }
        if !interrupted.is_empty() {
            info!(count = interrupted.len(), "reset interrupted outbox sends to pending");
        }

        debug!(entries = queue.items.len(), "outbox loaded");
        Ok(queue)
    }

    /// Reads the stored entries in enqueue order without changing them.
    ///
    /// Unlike [`OutboxQueue::open`], interrupted sends keep their `syncing`
    /// status.
    pub fn load(store: &dyn RecordStore) -> SyncResult<Vec<SyncQueueItem>> {
        let mut items = Vec::new();
        for key in store.keys_with_prefix(OUTBOX_PREFIX)? {
            let Some(bytes) = store.get(&key)? else {
                continue;
            };
            let item = SyncQueueItem::from_envelope(&bytes).map_err(|e| SyncError::CorruptEntry {
                key: key.clone(),
                message: e.to_string(),
            })?;
            if sequence_key(item.sequence) != key {
                return Err(SyncError::CorruptEntry {
                    key,
                    message: format!("entry records sequence {}", item.sequence),
                });
            }
            items.push(item);
        }
        Ok(items)
    }

    /// Appends a mutation. An entry with the same operation id is returned
    /// unchanged instead of being queued twice.
    pub fn push(&mut self, mutation: Mutation, now_ms: u64) -> SyncResult<SyncQueueItem> {
        if let Some(id) = mutation.operation_id {
            if let Some(existing) = self.find(id) {
                return Ok(existing.clone());
            }
        }

        let item = SyncQueueItem::from_mutation(mutation, self.next_sequence, now_ms);
        self.persist(&item)?;
        self.next_sequence += 1;
        self.items.insert(item.sequence, item.clone());
        Ok(item)
    }

    /// Returns the entry with `sequence`.
    pub fn get(&self, sequence: u64) -> Option<&SyncQueueItem> {
        self.items.get(&sequence)
    }

    /// Returns the entry with operation id `id`.
    pub fn find(&self, id: OperationId) -> Option<&SyncQueueItem> {
        self.items.values().find(|item| item.operation_id == id)
    }

    /// Applies `change` to an entry and persists it. Returns the updated
    /// entry, or `None` if it is no longer queued.
    pub fn update<F>(&mut self, sequence: u64, change: F) -> SyncResult<Option<SyncQueueItem>>
    where
        F: FnOnce(&mut SyncQueueItem),
    {
        let Some(current) = self.items.get(&sequence) else {
            return Ok(None);
        };
        let mut updated = current.clone();
        change(&mut updated);
        self.persist(&updated)?;
        self.items.insert(sequence, updated.clone());
        Ok(Some(updated))
    }

    /// Marks an entry failed in memory only.
    ///
    /// Used when the durable update after a send could not be written. The
    /// stored copy stays `syncing` and is reset to `pending` on reopen.
    pub fn fail_unpersisted(&mut self, sequence: u64, message: String) {
        if let Some(item) = self.items.get_mut(&sequence) {
            item.status = ItemStatus::Failed;
            item.last_error = Some(message);
        }
    }

    /// Removes an entry. Returns it if it was queued.
    pub fn remove(&mut self, sequence: u64) -> SyncResult<Option<SyncQueueItem>> {
        if !self.items.contains_key(&sequence) {
            return Ok(None);
        }
        self.store.delete(&sequence_key(sequence))?;
        Ok(self.items.remove(&sequence))
    }

    /// Removes every entry matching `predicate`. Returns how many were removed.
    pub fn remove_where<P>(&mut self, predicate: P) -> SyncResult<usize>
    where
        P: Fn(&SyncQueueItem) -> bool,
    {
        let doomed: Vec<u64> = self
            .items
            .values()
            .filter(|item| predicate(*item))
            .map(|item| item.sequence)
            .collect();
        for sequence in &doomed {
            self.remove(*sequence)?;
        }
        Ok(doomed.len())
    }

    /// Entries in enqueue order.
    pub fn items(&self) -> impl Iterator<Item = &SyncQueueItem> {
        self.items.values()
    }

    /// Sequence numbers of pending entries, in enqueue order.
    pub fn pending_sequences(&self) -> Vec<u64> {
        self.items
            .values()
            .filter(|item| item.is_pending())
            .map(|item| item.sequence)
            .collect()
    }

    /// Counts entries per status.
    pub fn counts(&self) -> QueueCounts {
        let mut counts = QueueCounts::default();
        for item in self.items.values() {
            match item.status {
                ItemStatus::Pending => counts.pending += 1,
                ItemStatus::Syncing => counts.syncing += 1,
                ItemStatus::Failed => counts.failed += 1,
                ItemStatus::Synced => {}
            }
        }
        counts
    }

    /// Number of queued entries.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn persist(&self, item: &SyncQueueItem) -> SyncResult<()> {
        self.store
            .put(&sequence_key(item.sequence), &item.to_envelope()?)?;
        Ok(())
    }
}

/// Zero-padded so lexical key order matches sequence order.
fn sequence_key(sequence: u64) -> String {
    format!("{OUTBOX_PREFIX}{sequence:020}")
}
