//! The sync outbox: at-least-once delivery of local mutations.
//!
//! # Ordering
//!
//! Entries for the same entity are delivered in enqueue order. Once an
//! entry fails, later entries for its entity are held `pending` until the
//! failed one is retried and acknowledged or discarded. Entries for
//! different entities have no relative ordering guarantee, and one failing
//! entity never blocks the others.

use crate::config::OutboxConfig;
use crate::connectivity::Connectivity;
use crate::error::{SyncError, SyncResult};
use crate::item::{ItemStatus, Mutation, SyncQueueItem};
use crate::queue::OutboxQueue;
use crate::status::{OutboxSnapshot, SyncMode, SyncStatus};
use crate::transport::RemoteSender;
use ferry_storage::RecordStore;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Why a drain did not run, or stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainStop {
    /// No connectivity.
    Offline,
    /// Draining is paused.
    Paused,
    /// Another drain was already running.
    InFlight,
    /// The caller's deadline passed before the next send.
    Deadline,
}

/// Result of one drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Entries acknowledged and removed.
    pub sent: usize,
    /// Entries whose send failed.
    pub failed: usize,
    /// Pending entries held behind a failed entry of the same entity.
    pub held: usize,
    /// Entries left in the queue afterwards (any status).
    pub remaining: usize,
    /// Set if the drain was skipped or stopped before the end.
    pub stopped: Option<DrainStop>,
}

impl DrainReport {
    fn skipped(reason: DrainStop, remaining: usize) -> Self {
        Self {
            remaining,
            stopped: Some(reason),
            ..Self::default()
        }
    }

    fn absorb(&mut self, other: DrainReport) {
        self.sent += other.sent;
        self.failed += other.failed;
        self.held = other.held;
        self.remaining = other.remaining;
        self.stopped = other.stopped;
    }
}

/// Durable outbox of mutations destined for the remote backend.
pub struct SyncOutbox {
    queue: Mutex<OutboxQueue>,
    remote: Arc<dyn RemoteSender>,
    config: OutboxConfig,
    connectivity: Connectivity,
    paused: AtomicBool,
    draining: AtomicBool,
    last_synced_at: Mutex<Option<u64>>,
}

impl SyncOutbox {
    /// Opens the outbox persisted in `store`.
    ///
    /// Entries interrupted mid-send by a crash are reset to `pending`.
    pub fn open(
        store: Arc<dyn RecordStore>,
        remote: Arc<dyn RemoteSender>,
        config: OutboxConfig,
    ) -> SyncResult<Self> {
        let queue = OutboxQueue::open(store)?;
        let connectivity = Connectivity::new(config.start_online);
        Ok(Self {
            queue: Mutex::new(queue),
            remote,
            config,
            connectivity,
            paused: AtomicBool::new(false),
            draining: AtomicBool::new(false),
            last_synced_at: Mutex::new(None),
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &OutboxConfig {
        &self.config
    }

    /// Returns the connectivity signal gating drains.
    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    /// Updates connectivity. Returns true if it changed.
    ///
    /// Going online does not drain by itself; the [`crate::AutoSync`]
    /// driver reacts to the transition.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.connectivity.set_online(online);
        if changed {
            info!(online, "connectivity changed");
        }
        changed
    }

    /// Queues a mutation. Works offline and while paused.
    pub fn enqueue(&self, mutation: Mutation) -> SyncResult<SyncQueueItem> {
        let item = self.queue.lock().push(mutation, now_millis())?;
        debug!(
            operation = %item.operation_id,
            entity = %item.entity_id,
            sequence = item.sequence,
            "mutation queued"
        );
        Ok(item)
    }

    /// Sends pending entries ("sync now").
    ///
    /// Skipped while offline, paused, or when another drain is running.
    pub fn drain(&self) -> SyncResult<DrainReport> {
        self.drain_before(None)
    }

    fn drain_before(&self, deadline: Option<Instant>) -> SyncResult<DrainReport> {
        if self.paused.load(Ordering::SeqCst) {
            return Ok(DrainReport::skipped(DrainStop::Paused, self.len()));
        }
        if !self.connectivity.is_online() {
            return Ok(DrainReport::skipped(DrainStop::Offline, self.len()));
        }
        if self.draining.swap(true, Ordering::SeqCst) {
            return Ok(DrainReport::skipped(DrainStop::InFlight, self.len()));
        }
        let _guard = DrainGuard(&self.draining);

        let report = self.drain_pending(deadline)?;
        if report.sent > 0 || report.failed > 0 {
            info!(
                sent = report.sent,
                failed = report.failed,
                held = report.held,
                remaining = report.remaining,
                "outbox drained"
            );
        }
        Ok(report)
    }

    fn drain_pending(&self, deadline: Option<Instant>) -> SyncResult<DrainReport> {
        let (sequences, mut blocked) = {
            let queue = self.queue.lock();
            let blocked: HashSet<String> = queue
                .items()
                .filter(|item| item.is_failed())
                .map(|item| item.entity_id.clone())
                .collect();
            (queue.pending_sequences(), blocked)
        };

        let mut report = DrainReport::default();
        let limit = self.config.max_items_per_drain.unwrap_or(usize::MAX);

        for sequence in sequences {
            if report.sent + report.failed >= limit {
                break;
            }
            if self.paused.load(Ordering::SeqCst) {
                report.stopped = Some(DrainStop::Paused);
                break;
            }
            if !self.connectivity.is_online() {
                report.stopped = Some(DrainStop::Offline);
                break;
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                report.stopped = Some(DrainStop::Deadline);
                break;
            }

            let item = {
                let mut queue = self.queue.lock();
                match queue.get(sequence) {
                    Some(item) if !item.is_pending() => continue,
                    Some(item) if blocked.contains(&item.entity_id) => {
                        report.held += 1;
                        continue;
                    }
                    Some(_) => {}
                    // Discarded since the snapshot.
                    None => continue,
                }
                let now = now_millis();
                match queue.update(sequence, |item| {
                    item.status = ItemStatus::Syncing;
                    item.attempt_count += 1;
                    item.last_attempt_at = Some(now);
                })? {
                    Some(item) => item,
                    None => continue,
                }
            };

            let started = Instant::now();
            let result = self.remote.send(&item, self.config.send_timeout);
            let elapsed = started.elapsed();

            let mut queue = self.queue.lock();
            match result {
                Ok(ack) => {
                    if let Err(e) = queue.remove(sequence) {
                        queue.fail_unpersisted(sequence, e.to_string());
                        warn!(
                            operation = %item.operation_id,
                            error = %e,
                            "acknowledged mutation could not be removed"
                        );
                        return Err(e);
                    }
                    *self.last_synced_at.lock() = Some(now_millis());
                    report.sent += 1;
                    debug!(
                        operation = %item.operation_id,
                        entity = %item.entity_id,
                        duplicate = ack.duplicate,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "mutation acknowledged"
                    );
                }
                Err(e) => {
                    let message = e.to_string();
                    if let Err(store_error) = queue.update(sequence, |item| {
                        item.status = ItemStatus::Failed;
                        item.last_error = Some(message.clone());
                    }) {
                        queue.fail_unpersisted(sequence, message);
                        return Err(store_error);
                    }
                    blocked.insert(item.entity_id.clone());
                    report.failed += 1;
                    warn!(
                        operation = %item.operation_id,
                        entity = %item.entity_id,
                        attempt = item.attempt_count,
                        error = %e,
                        "mutation send failed"
                    );
                }
            }
        }

        report.remaining = self.len();
        Ok(report)
    }

    /// Drains repeatedly until the queue is empty, a drain makes no
    /// progress, or `timeout` elapses.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Timeout`] if entries remain when the deadline
    /// passes.
    pub fn drain_until_empty(&self, timeout: Duration) -> SyncResult<DrainReport> {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut total = DrainReport::default();
        loop {
            let report = self.drain_before(Some(deadline))?;
            total.absorb(report);

            if total.remaining == 0 {
                return Ok(total);
            }
            if Instant::now() >= deadline {
                return Err(SyncError::Timeout {
                    elapsed_ms: started.elapsed().as_millis() as u64,
                });
            }
            match report.stopped {
                Some(DrainStop::InFlight) => std::thread::sleep(self.config.drain_poll_interval),
                Some(DrainStop::Offline | DrainStop::Paused) => return Ok(total),
                Some(DrainStop::Deadline) => {
                    return Err(SyncError::Timeout {
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    })
                }
                None if report.sent == 0 => return Ok(total),
                None => {}
            }
        }
    }

    /// Moves every failed entry back to pending and drains.
    pub fn retry_failed(&self) -> SyncResult<DrainReport> {
        let reset = {
            let mut queue = self.queue.lock();
            let failed: Vec<u64> = queue
                .items()
                .filter(|item| item.is_failed())
                .map(|item| item.sequence)
                .collect();
            for sequence in &failed {
                queue.update(*sequence, |item| item.status = ItemStatus::Pending)?;
            }
            failed.len()
        };
        if reset > 0 {
            info!(count = reset, "failed mutations reset to pending");
        }
        self.drain()
    }

    /// Permanently drops every failed entry without sending it.
    ///
    /// Returns how many entries were dropped. Calling it again is a no-op.
    pub fn clear_failed(&self) -> SyncResult<usize> {
        let removed = self.queue.lock().remove_where(SyncQueueItem::is_failed)?;
        if removed > 0 {
            warn!(count = removed, "failed mutations discarded");
        }
        Ok(removed)
    }

    /// Permanently drops every queued entry, pending and failed alike.
    pub fn discard_all(&self) -> SyncResult<usize> {
        let removed = self.queue.lock().remove_where(|_| true)?;
        if removed > 0 {
            warn!(count = removed, "all queued mutations discarded");
        }
        Ok(removed)
    }

    /// Suspends draining, manual drains included.
    pub fn pause(&self) {
        if !self.paused.swap(true, Ordering::SeqCst) {
            info!("outbox paused");
        }
    }

    /// Allows draining again.
    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::SeqCst) {
            info!("outbox resumed");
        }
    }

    /// Returns true while draining is suspended.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Returns true while a drain is running.
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Number of queued entries.
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Queued entries in enqueue order.
    pub fn items(&self) -> Vec<SyncQueueItem> {
        self.queue.lock().items().cloned().collect()
    }

    /// Inputs for the status projection.
    pub fn snapshot(&self) -> OutboxSnapshot {
        let counts = self.queue.lock().counts();
        OutboxSnapshot {
            pending_count: counts.pending + counts.syncing,
            failed_count: counts.failed,
            last_synced_at: *self.last_synced_at.lock(),
            is_online: self.connectivity.is_online(),
            is_syncing: self.is_draining(),
            is_paused: self.is_paused(),
        }
    }

    /// Projects the sync status for the active `mode`.
    pub fn status(&self, mode: SyncMode) -> SyncStatus {
        SyncStatus::project(mode, &self.snapshot())
    }
}

/// Clears the in-flight flag when a drain ends, including on error.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::SyncStateKind;
    use crate::transport::MockRemote;
    use ferry_storage::InMemoryStore;

    fn outbox() -> (SyncOutbox, Arc<MockRemote>, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let remote = Arc::new(MockRemote::new());
        let outbox = SyncOutbox::open(store.clone(), remote.clone(), OutboxConfig::default()).unwrap();
        (outbox, remote, store)
    }

    fn enqueue(outbox: &SyncOutbox, entity: &str, payload: u8) {
        outbox
            .enqueue(Mutation::new("note", entity, vec![payload]))
            .unwrap();
    }

    #[test]
    fn drain_sends_everything_in_order() {
        let (outbox, remote, _) = outbox();
        enqueue(&outbox, "a", 1);
        enqueue(&outbox, "b", 1);
        enqueue(&outbox, "a", 2);

        let report = outbox.drain().unwrap();
        assert_eq!(report.sent, 3);
        assert_eq!(report.remaining, 0);
        assert!(report.stopped.is_none());
        assert_eq!(remote.applied_entities(), vec!["a", "b", "a"]);
        assert_eq!(outbox.status(SyncMode::Cloud).state, SyncStateKind::Synced);
        assert!(outbox.snapshot().last_synced_at.is_some());
    }

    #[test]
    fn offline_enqueue_and_skip() {
        let (outbox, remote, _) = outbox();
        outbox.set_online(false);
        enqueue(&outbox, "a", 1);

        let report = outbox.drain().unwrap();
        assert_eq!(report.stopped, Some(DrainStop::Offline));
        assert_eq!(report.remaining, 1);
        assert!(remote.applied().is_empty());
        assert_eq!(outbox.status(SyncMode::Cloud).state, SyncStateKind::Offline);

        outbox.set_online(true);
        assert_eq!(outbox.drain().unwrap().sent, 1);
    }

    #[test]
    fn pause_blocks_manual_drain() {
        let (outbox, remote, _) = outbox();
        enqueue(&outbox, "a", 1);
        outbox.pause();
        assert_eq!(outbox.drain().unwrap().stopped, Some(DrainStop::Paused));
        assert!(remote.applied().is_empty());
        assert!(outbox.status(SyncMode::Cloud).is_paused);

        outbox.resume();
        assert_eq!(outbox.drain().unwrap().sent, 1);
    }

    #[test]
    fn failure_holds_later_items_for_same_entity_only() {
        let (outbox, remote, _) = outbox();
        remote.fail_entity("a", 1);
        enqueue(&outbox, "a", 1);
        enqueue(&outbox, "b", 1);
        enqueue(&outbox, "a", 2);

        let report = outbox.drain().unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.sent, 1);
        assert_eq!(report.held, 1);
        assert_eq!(remote.applied_entities(), vec!["b"]);

        let status = outbox.status(SyncMode::Cloud);
        assert_eq!(status.state, SyncStateKind::Error);
        assert_eq!(status.failed_count, 1);
        assert_eq!(status.pending_count, 1);

        // A plain drain keeps holding the entity behind its failure.
        let report = outbox.drain().unwrap();
        assert_eq!(report.sent, 0);
        assert_eq!(report.held, 1);

        let report = outbox.retry_failed().unwrap();
        assert_eq!(report.sent, 2);
        let applied: Vec<(String, Vec<u8>)> = remote
            .applied()
            .into_iter()
            .map(|item| (item.entity_id, item.payload))
            .collect();
        assert_eq!(
            applied,
            vec![
                ("b".to_string(), vec![1]),
                ("a".to_string(), vec![1]),
                ("a".to_string(), vec![2]),
            ]
        );
    }

    #[test]
    fn failed_item_records_error_and_attempts() {
        let (outbox, remote, _) = outbox();
        remote.set_fail_all(true);
        enqueue(&outbox, "a", 1);
        outbox.drain().unwrap();
        outbox.retry_failed().unwrap();

        let items = outbox.items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].status, ItemStatus::Failed);
        assert_eq!(items[0].attempt_count, 2);
        assert!(items[0].last_error.as_deref().unwrap().contains("unavailable"));
        assert!(items[0].last_attempt_at.is_some());
    }

    #[test]
    fn clear_failed_is_idempotent() {
        let (outbox, remote, _) = outbox();
        remote.set_fail_all(true);
        enqueue(&outbox, "a", 1);
        enqueue(&outbox, "b", 1);
        enqueue(&outbox, "c", 1);
        assert_eq!(outbox.drain().unwrap().failed, 3);
        remote.set_fail_all(false);

        assert_eq!(outbox.clear_failed().unwrap(), 3);
        assert_eq!(outbox.clear_failed().unwrap(), 0);
        assert!(outbox.is_empty());
        assert!(remote.applied().is_empty());
    }

    #[test]
    fn discard_all_drops_pending_and_failed() {
        let (outbox, remote, _) = outbox();
        remote.fail_entity("a", 1);
        enqueue(&outbox, "a", 1);
        outbox.drain().unwrap();
        enqueue(&outbox, "b", 1);

        assert_eq!(outbox.discard_all().unwrap(), 2);
        assert!(outbox.is_empty());
        assert_eq!(outbox.status(SyncMode::Cloud).state, SyncStateKind::Synced);
    }

    #[test]
    fn drain_until_empty_succeeds_when_remote_recovers() {
        let (outbox, _, _) = outbox();
        for i in 0..5 {
            enqueue(&outbox, &format!("e{i}"), 0);
        }
        let report = outbox.drain_until_empty(Duration::from_secs(5)).unwrap();
        assert_eq!(report.sent, 5);
        assert_eq!(report.remaining, 0);
    }

    #[test]
    fn drain_until_empty_stops_without_progress() {
        let (outbox, remote, _) = outbox();
        remote.set_fail_all(true);
        enqueue(&outbox, "a", 0);
        let report = outbox.drain_until_empty(Duration::from_secs(5)).unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.remaining, 1);
    }

    #[test]
    fn drain_until_empty_times_out() {
        let store = Arc::new(InMemoryStore::new());
        let remote = Arc::new(MockRemote::new());
        remote.set_delay(Some(Duration::from_millis(30)));
        let outbox = SyncOutbox::open(
            store,
            remote,
            OutboxConfig::default().with_max_items_per_drain(1),
        )
        .unwrap();
        for i in 0..10 {
            enqueue(&outbox, &format!("e{i}"), 0);
        }
        assert!(matches!(
            outbox.drain_until_empty(Duration::from_millis(50)),
            Err(SyncError::Timeout { .. })
        ));
    }

    #[test]
    fn drain_until_empty_stops_mid_drain_at_deadline() {
        let (outbox, remote, _) = outbox();
        remote.set_delay(Some(Duration::from_millis(20)));
        for i in 0..25 {
            enqueue(&outbox, &format!("e{i}"), 0);
        }

        let started = Instant::now();
        let result = outbox.drain_until_empty(Duration::from_millis(50));
        let elapsed = started.elapsed();

        assert!(matches!(result, Err(SyncError::Timeout { .. })));
        // At most one send may overrun the deadline.
        assert!(elapsed < Duration::from_millis(250), "took {elapsed:?}");
        assert!(!outbox.is_empty());
        assert!(outbox.items().iter().all(|item| item.is_pending()));

        remote.set_delay(None);
        assert_eq!(outbox.drain().unwrap().remaining, 0);
        assert_eq!(remote.applied().len(), 25);
    }

    #[test]
    fn reopen_keeps_queue_and_order() {
        let store = Arc::new(InMemoryStore::new());
        let remote = Arc::new(MockRemote::new());
        {
            let outbox = SyncOutbox::open(
                store.clone(),
                remote.clone(),
                OutboxConfig::default().with_start_online(false),
            )
            .unwrap();
            enqueue(&outbox, "a", 1);
            enqueue(&outbox, "a", 2);
        }

        let outbox = SyncOutbox::open(store, remote.clone(), OutboxConfig::default()).unwrap();
        assert_eq!(outbox.len(), 2);
        outbox.drain().unwrap();
        let payloads: Vec<Vec<u8>> = remote.applied().into_iter().map(|i| i.payload).collect();
        assert_eq!(payloads, vec![vec![1], vec![2]]);
    }

    #[test]
    fn local_mode_status() {
        let (outbox, _, _) = outbox();
        enqueue(&outbox, "a", 1);
        let status = outbox.status(SyncMode::Local);
        assert_eq!(status.state, SyncStateKind::Local);
        assert_eq!(status.pending_count, 1);
    }
}
