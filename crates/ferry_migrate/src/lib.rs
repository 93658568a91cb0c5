//! # Ferry Migrate
//!
//! Checkpointed, resumable bulk migration of records between stores.
//!
//! This crate provides:
//! - [`SampleEstimator`] - duration, size and confidence projections from a sample
//! - [`CheckpointStore`] - durable persistence of [`MigrationSession`]s
//! - [`MigrationEngine`] - the batch loop with pause, resume and cancel
//!
//! ## Guarantees
//!
//! - A batch reaches the destination before the checkpoint advances, so a
//!   resume never skips a record (it may rewrite one idempotently)
//! - A checkpoint write failure leaves the batch uncommitted and the run
//!   paused, never ahead of the destination
//! - Cancellation takes effect at the next batch boundary; records already
//!   written are kept and the checkpoint is deleted
//!
//! ## Example
//!
//! ```rust,no_run
//! use ferry_migrate::{
//!     JobId, MigrationDirection, MigrationEngine, MigrationOptions, StoreCheckpoints,
//!     StoreSink, StoreSource,
//! };
//! use ferry_storage::InMemoryStore;
//! use std::sync::Arc;
//!
//! let engine = MigrationEngine::new(Arc::new(StoreCheckpoints::new(InMemoryStore::new())));
//! let source = Arc::new(StoreSource::new(InMemoryStore::new()));
//! let sink = Arc::new(StoreSink::new(InMemoryStore::new()));
//!
//! let options = MigrationOptions::new(JobId::new("copy").unwrap(), MigrationDirection::Standalone);
//! let handle = engine.start(source, sink, options).unwrap();
//! println!("{:?}", handle.wait());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod checkpoint;
mod config;
mod control;
mod engine;
mod error;
mod estimator;
mod io;
mod session;

pub use checkpoint::{CheckpointStore, StoreCheckpoints, CHECKPOINT_PREFIX};
pub use config::{MigrationOptions, RetryConfig, DEFAULT_BATCH_SIZE};
pub use control::{
    MigrationControl, MigrationOutcome, MigrationState, MigrationSummary, ResumeData,
};
pub use engine::{MigrationEngine, MigrationHandle, ProgressObserver};
pub use error::{MigrateError, MigrateResult};
pub use estimator::{
    ConfidenceLevel, EstimationTarget, EstimatorConfig, MigrationEstimation, SampleEstimator,
    SampleItem, HIGH_CONFIDENCE_SAMPLES, MEDIUM_CONFIDENCE_SAMPLES,
};
pub use io::{
    get_record, put_record, Record, RecordSink, RecordSource, StoreSink, StoreSource,
    RECORD_PREFIX,
};
pub use session::{
    CheckpointId, CommittedBatch, JobId, MigrationDirection, MigrationSession, RecordKey,
    SessionId, MAX_JOB_ID_LEN,
};
