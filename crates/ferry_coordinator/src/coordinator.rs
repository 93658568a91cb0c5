//! The mode transition coordinator.
//!
//! Switching backends follows a fixed order:
//!
//! 1. Refuse while a switch migration is actively running
//! 2. When leaving the cloud, make the caller resolve a non-empty outbox
//! 3. Migrate records toward the target (resuming an earlier attempt)
//! 4. Persist and flip the active backend
//!
//! The backend only flips after the migration reports `completed`.

use crate::config::CoordinatorConfig;
use crate::data::DataStore;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::mode::{load_mode, save_mode, ModeRecord};
use crate::plan::{Resolution, SwitchOutcome, SwitchPlan};
use ferry_migrate::{
    MigrationDirection, MigrationEngine, MigrationHandle, MigrationOutcome, MigrationState,
    ProgressObserver,
};
use ferry_storage::RecordStore;
use ferry_sync::{SyncMode, SyncOutbox, SyncStatus};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

/// Gates switching the active backend between local and cloud.
pub struct ModeCoordinator {
    meta: Arc<dyn RecordStore>,
    local: Arc<dyn DataStore>,
    remote: Arc<dyn DataStore>,
    outbox: Arc<SyncOutbox>,
    engine: Arc<MigrationEngine>,
    config: CoordinatorConfig,
    mode: Mutex<SyncMode>,
    switching: Mutex<()>,
}

impl ModeCoordinator {
    /// Opens the coordinator, restoring the persisted mode.
    ///
    /// A store that never recorded a mode starts out local.
    pub fn open(
        meta: Arc<dyn RecordStore>,
        local: Arc<dyn DataStore>,
        remote: Arc<dyn DataStore>,
        outbox: Arc<SyncOutbox>,
        engine: Arc<MigrationEngine>,
        config: CoordinatorConfig,
    ) -> CoordinatorResult<Self> {
        let mode = load_mode(meta.as_ref())?.map_or(SyncMode::Local, |record| record.mode);
        info!(mode = %mode, "mode coordinator opened");
        Ok(Self {
            meta,
            local,
            remote,
            outbox,
            engine,
            config,
            mode: Mutex::new(mode),
            switching: Mutex::new(()),
        })
    }

    /// Active backend.
    pub fn mode(&self) -> SyncMode {
        *self.mode.lock()
    }

    /// Sync status for the active backend.
    pub fn status(&self) -> SyncStatus {
        self.outbox.status(self.mode())
    }

    /// The outbox consulted before leaving the cloud.
    pub fn outbox(&self) -> &Arc<SyncOutbox> {
        &self.outbox
    }

    /// The engine running switch migrations.
    pub fn engine(&self) -> &Arc<MigrationEngine> {
        &self.engine
    }

    /// Handle of a switch migration that is running or paused.
    pub fn active_migration(&self) -> CoordinatorResult<Option<MigrationHandle>> {
        for direction in [MigrationDirection::LocalToCloud, MigrationDirection::CloudToLocal] {
            let job = CoordinatorConfig::job_id(direction)?;
            if let Some(handle) = self.engine.running(&job) {
                return Ok(Some(handle));
            }
        }
        Ok(None)
    }

    /// Inspects what switching to `target` requires, without changing
    /// anything.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::MigrationInProgress`] while a switch
    /// migration runs, or while a paused one belongs to the other direction.
    /// Asking for the active mode always plans [`SwitchPlan::AlreadyActive`].
    pub fn request_switch(&self, target: SyncMode) -> CoordinatorResult<SwitchPlan> {
        self.plan(self.mode(), target)
    }

    /// Switches to `target`.
    ///
    /// `resolution` is required when the plan is
    /// [`SwitchPlan::ResolveOutbox`] and ignored otherwise. Blocks while
    /// records are migrated.
    pub fn switch(
        &self,
        target: SyncMode,
        resolution: Option<Resolution>,
    ) -> CoordinatorResult<SwitchOutcome> {
        self.switch_with_observer(target, resolution, None)
    }

    /// Like [`ModeCoordinator::switch`], reporting migration progress to
    /// `observer`.
    pub fn switch_with_observer(
        &self,
        target: SyncMode,
        resolution: Option<Resolution>,
        observer: Option<Arc<dyn ProgressObserver>>,
    ) -> CoordinatorResult<SwitchOutcome> {
        let _switching = self
            .switching
            .try_lock()
            .ok_or(CoordinatorError::SwitchInProgress)?;
        let from = self.mode();

        let mut plan = self.plan(from, target)?;
        let mut discarded = 0;
        if let SwitchPlan::ResolveOutbox {
            pending_count,
            failed_count,
            ..
        } = plan
        {
            match resolution {
                None => {
                    return Err(CoordinatorError::ResolutionRequired {
                        pending: pending_count,
                        failed: failed_count,
                    })
                }
                Some(Resolution::Cancel) => {
                    info!(from = %from, to = %target, "switch cancelled by caller");
                    return Ok(SwitchOutcome::Cancelled);
                }
                Some(Resolution::Sync) => self.sync_outbox()?,
                Some(Resolution::Discard) => discarded = self.discard_outbox()?,
            }
            plan = self.plan(from, target)?;
        }

        let migration = match plan {
            SwitchPlan::AlreadyActive { mode } => return Ok(SwitchOutcome::AlreadyActive(mode)),
            SwitchPlan::ResolveOutbox {
                pending_count,
                failed_count,
                ..
            } => {
                return Err(CoordinatorError::OutboxNotEmpty {
                    pending: pending_count,
                    failed: failed_count,
                })
            }
            SwitchPlan::Ready { .. } => None,
            SwitchPlan::Migrate { direction, .. } => match self.migrate(direction, observer)? {
                MigrationOutcome::Completed(summary) => Some(summary),
                MigrationOutcome::Cancelled { items_migrated } => {
                    info!(
                        from = %from,
                        to = %target,
                        items_migrated,
                        "switch migration cancelled"
                    );
                    return Ok(SwitchOutcome::Cancelled);
                }
                outcome => {
                    warn!(from = %from, to = %target, "switch migration did not complete");
                    return Ok(SwitchOutcome::Incomplete(outcome));
                }
            },
        };

        self.flip(from, target)?;
        Ok(SwitchOutcome::Switched {
            from,
            to: target,
            migration,
            discarded,
        })
    }

    /// Deletes every record in the `intended` backend.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::WrongBackend`] without touching anything
    /// if `intended` is not the active backend.
    pub fn clear_all_data(&self, intended: SyncMode) -> CoordinatorResult<usize> {
        let _switching = self
            .switching
            .try_lock()
            .ok_or(CoordinatorError::SwitchInProgress)?;
        let active = self.mode();
        if active != intended {
            warn!(active = %active, intended = %intended, "refusing to clear inactive backend");
            return Err(CoordinatorError::WrongBackend { active, intended });
        }
        if let Some(handle) = self.active_migration()? {
            return Err(CoordinatorError::MigrationInProgress(
                handle.job_id().to_string(),
            ));
        }

        let removed = self.store_for(intended).clear()?;
        warn!(backend = %intended, count = removed, "all data cleared");
        Ok(removed)
    }

    fn plan(&self, from: SyncMode, to: SyncMode) -> CoordinatorResult<SwitchPlan> {
        if from == to {
            return Ok(SwitchPlan::AlreadyActive { mode: to });
        }

        let direction = direction_to(to);
        if let Some(handle) = self.active_migration()? {
            let resumable_here = handle.state() == MigrationState::Paused
                && *handle.job_id() == CoordinatorConfig::job_id(direction)?;
            if !resumable_here {
                return Err(CoordinatorError::MigrationInProgress(
                    handle.job_id().to_string(),
                ));
            }
        }

        if to == SyncMode::Local {
            let snapshot = self.outbox.snapshot();
            if snapshot.pending_count > 0 || snapshot.failed_count > 0 {
                return Ok(SwitchPlan::ResolveOutbox {
                    from,
                    to,
                    pending_count: snapshot.pending_count,
                    failed_count: snapshot.failed_count,
                });
            }
            if !self.config.copy_remote_on_switch {
                return Ok(SwitchPlan::Ready { from, to });
            }
        }

        let resume = self
            .engine
            .resumable(&CoordinatorConfig::job_id(direction)?)?;
        let record_count = self.store_for(from).record_count()?;
        if record_count == 0 && resume.is_none() {
            return Ok(SwitchPlan::Ready { from, to });
        }
        Ok(SwitchPlan::Migrate {
            from,
            to,
            direction,
            record_count,
            resume,
        })
    }

    fn sync_outbox(&self) -> CoordinatorResult<()> {
        info!("syncing outbox before switch");
        self.outbox.retry_failed()?;
        self.outbox.drain_until_empty(self.config.sync_timeout)?;
        Ok(())
    }

    fn discard_outbox(&self) -> CoordinatorResult<usize> {
        let failed = self.outbox.clear_failed()?;
        let pending = self.outbox.discard_all()?;
        warn!(failed, pending, "outbox discarded before switch");
        Ok(failed + pending)
    }

    fn migrate(
        &self,
        direction: MigrationDirection,
        observer: Option<Arc<dyn ProgressObserver>>,
    ) -> CoordinatorResult<MigrationOutcome> {
        let options = self.config.migration_options(direction)?;
        let handle = match self.engine.running(&options.job_id) {
            Some(handle) => {
                handle.resume()?;
                handle
            }
            None => {
                let (source, sink) = match direction {
                    MigrationDirection::CloudToLocal => (&self.remote, &self.local),
                    _ => (&self.local, &self.remote),
                };
                self.engine.start_with_observer(
                    Arc::clone(source),
                    Arc::clone(sink),
                    options,
                    observer,
                )?
            }
        };
        Ok(handle.wait())
    }

    fn flip(&self, from: SyncMode, to: SyncMode) -> CoordinatorResult<()> {
        if let Some(handle) = self.active_migration()? {
            return Err(CoordinatorError::MigrationInProgress(
                handle.job_id().to_string(),
            ));
        }
        save_mode(
            self.meta.as_ref(),
            &ModeRecord {
                mode: to,
                switched_at: now_millis(),
            },
        )?;
        *self.mode.lock() = to;
        info!(from = %from, to = %to, "backend switched");
        Ok(())
    }

    fn store_for(&self, mode: SyncMode) -> &dyn DataStore {
        match mode {
            SyncMode::Local => self.local.as_ref(),
            SyncMode::Cloud => self.remote.as_ref(),
        }
    }
}

fn direction_to(target: SyncMode) -> MigrationDirection {
    match target {
        SyncMode::Cloud => MigrationDirection::LocalToCloud,
        SyncMode::Local => MigrationDirection::CloudToLocal,
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
    use crate::data::StoreData;
    use ferry_migrate::{
        put_record, MigrateError, MigrateResult, Record, RecordKey, RecordSink, RecordSource,
        RetryConfig, StoreCheckpoints,
    };
    use ferry_storage::InMemoryStore;
    use ferry_sync::{MockRemote, Mutation, OutboxConfig, SyncStateKind};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// Cloud data store whose writes can be switched off.
    struct FlakyData {
        inner: StoreData<InMemoryStore>,
        failing: AtomicBool,
    }

    impl RecordSource for FlakyData {
        fn keys(&self) -> MigrateResult<Vec<RecordKey>> {
            self.inner.keys()
        }

        fn read_batch(&self, keys: &[RecordKey]) -> MigrateResult<Vec<Record>> {
            self.inner.read_batch(keys)
        }
    }

    impl RecordSink for FlakyData {
        fn write_batch(&self, records: &[Record], timeout: Duration) -> MigrateResult<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(MigrateError::destination_fatal("backend rejected batch"));
            }
            self.inner.write_batch(records, timeout)
        }
    }

    impl DataStore for FlakyData {
        fn record_count(&self) -> MigrateResult<usize> {
            self.inner.record_count()
        }

        fn clear(&self) -> MigrateResult<usize> {
            self.inner.clear()
        }
    }

    struct Fixture {
        meta: Arc<InMemoryStore>,
        local: Arc<InMemoryStore>,
        cloud: Arc<FlakyData>,
        sender: Arc<MockRemote>,
        outbox: Arc<SyncOutbox>,
        engine: Arc<MigrationEngine>,
        coordinator: ModeCoordinator,
    }

    impl Fixture {
        fn new() -> Self {
            let meta = Arc::new(InMemoryStore::new());
            let local = Arc::new(InMemoryStore::new());
            let cloud = Arc::new(FlakyData {
                inner: StoreData::new(Arc::new(InMemoryStore::new())),
                failing: AtomicBool::new(false),
            });
            let sender = Arc::new(MockRemote::new());
            let outbox = Arc::new(
                SyncOutbox::open(meta.clone(), sender.clone(), OutboxConfig::default()).unwrap(),
            );
            let engine = Arc::new(MigrationEngine::new(Arc::new(StoreCheckpoints::new(
                Arc::clone(&meta),
            ))));
            let coordinator = Self::coordinator(&meta, &local, &cloud, &outbox, &engine);
            Self {
                meta,
                local,
                cloud,
                sender,
                outbox,
                engine,
                coordinator,
            }
        }

        fn coordinator(
            meta: &Arc<InMemoryStore>,
            local: &Arc<InMemoryStore>,
            cloud: &Arc<FlakyData>,
            outbox: &Arc<SyncOutbox>,
            engine: &Arc<MigrationEngine>,
        ) -> ModeCoordinator {
            ModeCoordinator::open(
                meta.clone(),
                Arc::new(StoreData::new(Arc::clone(local))),
                cloud.clone(),
                Arc::clone(outbox),
                Arc::clone(engine),
                CoordinatorConfig::new()
                    .with_batch_size(50)
                    .with_retry(RetryConfig::no_retry())
                    .with_sync_timeout(Duration::from_secs(5)),
            )
            .unwrap()
        }

        fn reopen(&self) -> ModeCoordinator {
            Self::coordinator(&self.meta, &self.local, &self.cloud, &self.outbox, &self.engine)
        }

        fn seed_local(&self, count: usize) {
            for i in 0..count {
                put_record(
                    self.local.as_ref(),
                    &Record::new(format!("r{i:04}"), vec![1; 16]),
                )
                .unwrap();
            }
        }

        fn seed_cloud(&self, count: usize) {
            for i in 0..count {
                put_record(
                    self.cloud.inner.store().as_ref(),
                    &Record::new(format!("c{i:04}"), vec![2; 16]),
                )
                .unwrap();
            }
        }

        fn go_cloud(&self) {
            let outcome = self.coordinator.switch(SyncMode::Cloud, None).unwrap();
            assert!(outcome.is_switched());
        }
    }

    #[test]
    fn starts_local_with_local_status() {
        let fx = Fixture::new();
        assert_eq!(fx.coordinator.mode(), SyncMode::Local);
        assert_eq!(fx.coordinator.status().state, SyncStateKind::Local);
        assert_eq!(
            fx.coordinator.request_switch(SyncMode::Local).unwrap(),
            SwitchPlan::AlreadyActive {
                mode: SyncMode::Local
            }
        );
    }

    #[test]
    fn empty_local_switches_without_migration() {
        let fx = Fixture::new();
        assert_eq!(
            fx.coordinator.request_switch(SyncMode::Cloud).unwrap(),
            SwitchPlan::Ready {
                from: SyncMode::Local,
                to: SyncMode::Cloud
            }
        );
        match fx.coordinator.switch(SyncMode::Cloud, None).unwrap() {
            SwitchOutcome::Switched { migration, .. } => assert!(migration.is_none()),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(fx.coordinator.mode(), SyncMode::Cloud);
        assert_eq!(fx.reopen().mode(), SyncMode::Cloud);
    }

    #[test]
    fn local_data_migrates_before_flip() {
        let fx = Fixture::new();
        fx.seed_local(120);

        match fx.coordinator.request_switch(SyncMode::Cloud).unwrap() {
            SwitchPlan::Migrate {
                direction,
                record_count,
                resume,
                ..
            } => {
                assert_eq!(direction, MigrationDirection::LocalToCloud);
                assert_eq!(record_count, 120);
                assert!(resume.is_none());
            }
            other => panic!("unexpected plan: {other:?}"),
        }

        match fx.coordinator.switch(SyncMode::Cloud, None).unwrap() {
            SwitchOutcome::Switched { migration, .. } => {
                assert_eq!(migration.unwrap().items_migrated, 120);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(fx.cloud.record_count().unwrap(), 120);
        let job = CoordinatorConfig::job_id(MigrationDirection::LocalToCloud).unwrap();
        assert!(fx.engine.resumable(&job).unwrap().is_none());
    }

    #[test]
    fn failed_migration_keeps_mode_and_resumes_later() {
        let fx = Fixture::new();
        fx.seed_local(100);
        fx.cloud.failing.store(true, Ordering::SeqCst);

        match fx.coordinator.switch(SyncMode::Cloud, None).unwrap() {
            SwitchOutcome::Incomplete(MigrationOutcome::Failed { .. }) => {}
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(fx.coordinator.mode(), SyncMode::Local);

        match fx.coordinator.request_switch(SyncMode::Cloud).unwrap() {
            SwitchPlan::Migrate { resume, .. } => assert!(resume.is_some()),
            other => panic!("unexpected plan: {other:?}"),
        }

        fx.cloud.failing.store(false, Ordering::SeqCst);
        match fx.coordinator.switch(SyncMode::Cloud, None).unwrap() {
            SwitchOutcome::Switched { migration, .. } => {
                let summary = migration.unwrap();
                assert!(summary.resumed);
                assert_eq!(summary.items_migrated, 100);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(fx.coordinator.mode(), SyncMode::Cloud);
    }

    #[test]
    fn unsynced_outbox_requires_resolution() {
        let fx = Fixture::new();
        fx.go_cloud();

        // One failed entry and two pending ones.
        fx.sender.fail_entity("a", 1);
        fx.outbox.enqueue(Mutation::new("note", "a", vec![1])).unwrap();
        fx.outbox.drain().unwrap();
        fx.outbox.set_online(false);
        fx.outbox.enqueue(Mutation::new("note", "b", vec![1])).unwrap();
        fx.outbox.enqueue(Mutation::new("note", "c", vec![1])).unwrap();

        assert_eq!(
            fx.coordinator.request_switch(SyncMode::Local).unwrap(),
            SwitchPlan::ResolveOutbox {
                from: SyncMode::Cloud,
                to: SyncMode::Local,
                pending_count: 2,
                failed_count: 1,
            }
        );
        assert!(matches!(
            fx.coordinator.switch(SyncMode::Local, None),
            Err(CoordinatorError::ResolutionRequired {
                pending: 2,
                failed: 1
            })
        ));

        assert_eq!(
            fx.coordinator
                .switch(SyncMode::Local, Some(Resolution::Cancel))
                .unwrap(),
            SwitchOutcome::Cancelled
        );
        assert_eq!(fx.coordinator.mode(), SyncMode::Cloud);
        assert_eq!(fx.outbox.len(), 3);

        match fx
            .coordinator
            .switch(SyncMode::Local, Some(Resolution::Discard))
            .unwrap()
        {
            SwitchOutcome::Switched { discarded, .. } => assert_eq!(discarded, 3),
            other => panic!("unexpected outcome: {other:?}"),
        }
        let status = fx.coordinator.status();
        assert_eq!(status.pending_count, 0);
        assert_eq!(status.failed_count, 0);
        assert_eq!(fx.coordinator.mode(), SyncMode::Local);
        assert!(fx.sender.applied().is_empty());
    }

    #[test]
    fn sync_resolution_delivers_before_switching() {
        let fx = Fixture::new();
        fx.go_cloud();
        fx.outbox.set_online(false);
        fx.outbox.enqueue(Mutation::new("note", "a", vec![1])).unwrap();
        fx.outbox.enqueue(Mutation::new("note", "b", vec![1])).unwrap();

        // Still offline: syncing cannot empty the queue.
        assert!(matches!(
            fx.coordinator.switch(SyncMode::Local, Some(Resolution::Sync)),
            Err(CoordinatorError::OutboxNotEmpty { pending: 2, .. })
        ));
        assert_eq!(fx.coordinator.mode(), SyncMode::Cloud);

        fx.outbox.set_online(true);
        let outcome = fx
            .coordinator
            .switch(SyncMode::Local, Some(Resolution::Sync))
            .unwrap();
        assert!(outcome.is_switched());
        assert_eq!(fx.sender.applied().len(), 2);
    }

    #[test]
    fn switching_to_local_copies_cloud_records() {
        let fx = Fixture::new();
        fx.go_cloud();
        fx.seed_cloud(30);

        match fx.coordinator.request_switch(SyncMode::Local).unwrap() {
            SwitchPlan::Migrate {
                direction,
                record_count,
                ..
            } => {
                assert_eq!(direction, MigrationDirection::CloudToLocal);
                assert_eq!(record_count, 30);
            }
            other => panic!("unexpected plan: {other:?}"),
        }
        assert!(fx.coordinator.switch(SyncMode::Local, None).unwrap().is_switched());
        assert_eq!(
            StoreData::new(Arc::clone(&fx.local)).record_count().unwrap(),
            30
        );
    }

    #[test]
    fn clear_all_data_checks_backend() {
        let fx = Fixture::new();
        fx.seed_local(5);

        assert!(matches!(
            fx.coordinator.clear_all_data(SyncMode::Cloud),
            Err(CoordinatorError::WrongBackend {
                active: SyncMode::Local,
                intended: SyncMode::Cloud
            })
        ));
        let local = StoreData::new(Arc::clone(&fx.local));
        assert_eq!(local.record_count().unwrap(), 5);

        assert_eq!(fx.coordinator.clear_all_data(SyncMode::Local).unwrap(), 5);
        assert_eq!(local.record_count().unwrap(), 0);
    }
}
