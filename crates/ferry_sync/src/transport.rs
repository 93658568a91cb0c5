//! Remote delivery abstraction.

use crate::error::{SyncError, SyncResult};
use crate::item::{OperationId, SyncQueueItem};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Acknowledgment of a delivered mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    /// Operation that was applied.
    pub operation_id: OperationId,
    /// The remote had already applied this operation.
    pub duplicate: bool,
}

/// Sends queued mutations to the remote backend.
///
/// The remote must treat a repeated `operation_id` as a no-op; the outbox
/// delivers at least once.
pub trait RemoteSender: Send + Sync {
    /// Delivers one mutation, giving up after `timeout`.
    fn send(&self, item: &SyncQueueItem, timeout: Duration) -> SyncResult<Ack>;
}

impl<R: RemoteSender + ?Sized> RemoteSender for std::sync::Arc<R> {
    fn send(&self, item: &SyncQueueItem, timeout: Duration) -> SyncResult<Ack> {
        (**self).send(item, timeout)
    }
}

/// A mock remote for testing.
///
/// Applies operations in memory, deduplicating by operation id, and can be
/// told to fail sends for particular entities.
#[derive(Debug)]
pub struct MockRemote {
    connected: AtomicBool,
    applied: Mutex<Vec<SyncQueueItem>>,
    seen: Mutex<HashSet<OperationId>>,
    failures: Mutex<HashMap<String, u32>>,
    fail_all: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl Default for MockRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRemote {
    /// Creates a connected mock remote.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            applied: Mutex::new(Vec::new()),
            seen: Mutex::new(HashSet::new()),
            failures: Mutex::new(HashMap::new()),
            fail_all: AtomicBool::new(false),
            delay: Mutex::new(None),
        }
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Fails the next `times` sends for `entity_id`.
    pub fn fail_entity(&self, entity_id: impl Into<String>, times: u32) {
        self.failures.lock().insert(entity_id.into(), times);
    }

    /// Fails every send until turned off.
    pub fn set_fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    /// Sleeps this long inside every send.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    /// Operations applied so far, in arrival order, without duplicates.
    pub fn applied(&self) -> Vec<SyncQueueItem> {
        self.applied.lock().clone()
    }

    /// Entity ids of applied operations, in arrival order.
    pub fn applied_entities(&self) -> Vec<String> {
        self.applied
            .lock()
            .iter()
            .map(|item| item.entity_id.clone())
            .collect()
    }
}

impl RemoteSender for MockRemote {
    fn send(&self, item: &SyncQueueItem, timeout: Duration) -> SyncResult<Ack> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(SyncError::NotConnected);
        }

        if let Some(delay) = *self.delay.lock() {
            if delay > timeout {
                std::thread::sleep(timeout);
                return Err(SyncError::Timeout {
                    elapsed_ms: timeout.as_millis() as u64,
                });
            }
            std::thread::sleep(delay);
        }

        if self.fail_all.load(Ordering::SeqCst) {
            return Err(SyncError::transport_retryable("remote unavailable"));
        }
        {
            let mut failures = self.failures.lock();
            if let Some(remaining) = failures.get_mut(&item.entity_id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(SyncError::transport_retryable(format!(
                        "injected failure for {}",
                        item.entity_id
                    )));
                }
            }
        }

        let duplicate = !self.seen.lock().insert(item.operation_id);
        if !duplicate {
            self.applied.lock().push(item.clone());
        }
        Ok(Ack {
            operation_id: item.operation_id,
            duplicate,
        })
    }
}
