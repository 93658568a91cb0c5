//! Configuration for the mode coordinator.

use ferry_migrate::{
    EstimatorConfig, JobId, MigrateResult, MigrationDirection, MigrationOptions, RetryConfig,
};
use std::time::Duration;

/// Configuration for backend switches.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Fixed migration batch size. `None` lets the estimator tune it.
    pub batch_size: Option<usize>,
    /// Deadline for each destination write during a switch migration.
    pub write_timeout: Duration,
    /// Retry configuration for destination writes.
    pub retry: RetryConfig,
    /// Estimator configuration for switch migrations.
    pub estimator: EstimatorConfig,
    /// How long a `sync` resolution may spend draining the outbox.
    pub sync_timeout: Duration,
    /// Copy cloud records back into the local store when switching to local.
    pub copy_remote_on_switch: bool,
}

impl CoordinatorConfig {
    /// Creates a configuration with defaults.
    pub fn new() -> Self {
        Self {
            batch_size: None,
            write_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
            estimator: EstimatorConfig::default(),
            sync_timeout: Duration::from_secs(60),
            copy_remote_on_switch: true,
        }
    }

    /// Sets a fixed migration batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size.max(1));
        self
    }

    /// Sets the destination write timeout.
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the estimator configuration.
    pub fn with_estimator(mut self, estimator: EstimatorConfig) -> Self {
        self.estimator = estimator;
        self
    }

    /// Sets the outbox sync timeout.
    pub fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = timeout;
        self
    }

    /// Sets whether cloud records are copied back on a switch to local.
    pub fn with_copy_remote_on_switch(mut self, copy: bool) -> Self {
        self.copy_remote_on_switch = copy;
        self
    }

    /// Job that migrates records for a switch in `direction`.
    ///
    /// The job is named after the direction, so each direction has exactly
    /// one resumable checkpoint.
    pub fn job_id(direction: MigrationDirection) -> MigrateResult<JobId> {
        JobId::new(direction.to_string())
    }

    /// Migration options for a switch in `direction`.
    pub fn migration_options(&self, direction: MigrationDirection) -> MigrateResult<MigrationOptions> {
        let mut options = MigrationOptions::new(Self::job_id(direction)?, direction)
            .with_write_timeout(self.write_timeout)
            .with_retry(self.retry.clone())
            .with_estimator(self.estimator.clone());
        if let Some(size) = self.batch_size {
            options = options.with_batch_size(size);
        }
        Ok(options)
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self::new()
    }
}
