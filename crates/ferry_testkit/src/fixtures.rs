//! Test fixtures and environment helpers.
//!
//! Provides record generators, preconfigured engines and a full
//! coordinator stack wired to in-memory fakes.

use crate::fakes::MemoryDataStore;
use ferry_coordinator::{CoordinatorConfig, ModeCoordinator};
use ferry_migrate::{
    JobId, MigrationDirection, MigrationEngine, MigrationOptions, Record, RetryConfig,
    StoreCheckpoints,
};
use ferry_storage::{FileStore, InMemoryStore, RecordStore, StoreConfig};
use ferry_sync::{MockRemote, OutboxConfig, SyncOutbox};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Creates `count` records keyed `rec-00000`, `rec-00001`, ... with
/// `payload_size` bytes each.
pub fn sample_records(count: usize, payload_size: usize) -> Vec<Record> {
    (0..count)
        .map(|i| Record::new(format!("rec-{i:05}"), vec![(i % 251) as u8; payload_size]))
        .collect()
}

/// Retry configuration with millisecond delays, for fast tests.
pub fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig::new(max_attempts)
        .with_initial_delay(Duration::from_millis(1))
        .with_max_delay(Duration::from_millis(5))
        .without_jitter()
}

/// Options for a standalone job with a fixed batch size and fast retries.
pub fn test_options(job: &str, batch_size: usize) -> MigrationOptions {
    MigrationOptions::new(
        JobId::new(job).expect("invalid test job id"),
        MigrationDirection::Standalone,
    )
    .with_batch_size(batch_size)
    .with_retry(fast_retry(3))
}

/// A migration engine over an in-memory checkpoint store.
pub struct TestEngine {
    /// The engine.
    pub engine: MigrationEngine,
    /// Its checkpoint store.
    pub checkpoints: Arc<StoreCheckpoints<Arc<InMemoryStore>>>,
    /// The store backing the checkpoints.
    pub store: Arc<InMemoryStore>,
}

impl TestEngine {
    /// Creates an engine with empty checkpoints.
    pub fn new() -> Self {
        let store = Arc::new(InMemoryStore::new());
        let checkpoints = Arc::new(StoreCheckpoints::new(Arc::clone(&store)));
        Self {
            engine: MigrationEngine::new(checkpoints.clone()),
            checkpoints,
            store,
        }
    }

    /// Creates a second engine over the same checkpoints, as after a
    /// process restart.
    pub fn restarted(&self) -> Self {
        let checkpoints = Arc::new(StoreCheckpoints::new(Arc::clone(&self.store)));
        Self {
            engine: MigrationEngine::new(checkpoints.clone()),
            checkpoints,
            store: Arc::clone(&self.store),
        }
    }
}

impl Default for TestEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestEngine {
    type Target = MigrationEngine;

    fn deref(&self) -> &Self::Target {
        &self.engine
    }
}

/// The whole local/cloud stack over in-memory fakes.
pub struct TestEnv {
    /// Store holding checkpoints, outbox entries and the mode.
    pub meta: Arc<dyn RecordStore>,
    /// Local backend.
    pub local: Arc<MemoryDataStore>,
    /// Cloud backend.
    pub cloud: Arc<MemoryDataStore>,
    /// Remote receiving outbox sends.
    pub remote: Arc<MockRemote>,
    /// The outbox.
    pub outbox: Arc<SyncOutbox>,
    /// The migration engine.
    pub engine: Arc<MigrationEngine>,
    /// The coordinator.
    pub coordinator: ModeCoordinator,
    config: CoordinatorConfig,
    _temp_dir: Option<TempDir>,
}

impl TestEnv {
    /// Creates a stack with in-memory metadata.
    pub fn memory() -> Self {
        Self::memory_with_config(default_config())
    }

    /// Creates a stack with in-memory metadata and `config`.
    pub fn memory_with_config(config: CoordinatorConfig) -> Self {
        Self::build(Arc::new(InMemoryStore::new()), config, None)
    }

    /// Creates a stack whose metadata lives in a temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let meta = FileStore::open(&temp_dir.path().join("meta"), StoreConfig::default())
            .expect("failed to open metadata store");
        Self::build(Arc::new(meta), default_config(), Some(temp_dir))
    }

    fn build(
        meta: Arc<dyn RecordStore>,
        config: CoordinatorConfig,
        temp_dir: Option<TempDir>,
    ) -> Self {
        let local = Arc::new(MemoryDataStore::new());
        let cloud = Arc::new(MemoryDataStore::new());
        let remote = Arc::new(MockRemote::new());
        let outbox = Arc::new(
            SyncOutbox::open(Arc::clone(&meta), remote.clone(), OutboxConfig::default())
                .expect("failed to open outbox"),
        );
        let engine = Arc::new(MigrationEngine::new(Arc::new(StoreCheckpoints::new(
            Arc::clone(&meta),
        ))));
        let coordinator = ModeCoordinator::open(
            Arc::clone(&meta),
            local.clone(),
            cloud.clone(),
            Arc::clone(&outbox),
            Arc::clone(&engine),
            config.clone(),
        )
        .expect("failed to open coordinator");

        Self {
            meta,
            local,
            cloud,
            remote,
            outbox,
            engine,
            coordinator,
            config,
            _temp_dir: temp_dir,
        }
    }

    /// Reopens the coordinator over the same stores, as after a restart.
    pub fn reopen_coordinator(&self) -> ModeCoordinator {
        ModeCoordinator::open(
            Arc::clone(&self.meta),
            self.local.clone(),
            self.cloud.clone(),
            Arc::clone(&self.outbox),
            Arc::clone(&self.engine),
            self.config.clone(),
        )
        .expect("failed to reopen coordinator")
    }
}

fn default_config() -> CoordinatorConfig {
    CoordinatorConfig::new()
        .with_batch_size(100)
        .with_retry(fast_retry(2))
        .with_sync_timeout(Duration::from_secs(5))
}
