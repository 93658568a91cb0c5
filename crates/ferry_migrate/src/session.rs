//! Migration session: the resumable unit of work.
//!
//! A session partitions the keys of a job into `processed_keys` and
//! `remaining_keys`. Batches are taken from the front of the remaining
//! queue and moved into the processed set only after the destination
//! write succeeded; the partition therefore never loses or duplicates a
//! key, and `items_processed` always equals `processed_keys.len()`.

use crate::error::{MigrateError, MigrateResult};
use ferry_codec::{Envelope, RecordKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::fmt;
use uuid::Uuid;

/// Identifier of a record being migrated.
pub type RecordKey = String;

/// Maximum length of a job id.
pub const MAX_JOB_ID_LEN: usize = 64;

/// Identifier of a logical migration job.
///
/// One checkpoint exists per job, so restarting a job resumes it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    /// Creates a job id, validating its characters.
    pub fn new(id: impl Into<String>) -> MigrateResult<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(MigrateError::InvalidJobId {
                id,
                reason: "job id is empty",
            });
        }
        if id.len() > MAX_JOB_ID_LEN {
            return Err(MigrateError::InvalidJobId {
                id,
                reason: "job id is too long",
            });
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(MigrateError::InvalidJobId {
                id,
                reason: "only ASCII letters, digits, '-', '_' and '.' are allowed",
            });
        }
        Ok(Self(id))
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a persisted checkpoint. Derived from the job id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CheckpointId(String);

impl CheckpointId {
    /// Returns the checkpoint id for a job.
    pub fn for_job(job: &JobId) -> Self {
        Self(job.0.clone())
    }

    /// Parses a checkpoint id read back from storage.
    pub fn parse(raw: &str) -> MigrateResult<Self> {
        JobId::new(raw).map(|job| Self(job.0))
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique identifier of one session (one fresh start of a job).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generates a new random session id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which way records flow in a migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MigrationDirection {
    /// Local store to cloud backend.
    LocalToCloud,
    /// Cloud backend to local store.
    CloudToLocal,
    /// Store-to-store copy outside of a mode switch.
    Standalone,
}

impl fmt::Display for MigrationDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MigrationDirection::LocalToCloud => "local-to-cloud",
            MigrationDirection::CloudToLocal => "cloud-to-local",
            MigrationDirection::Standalone => "standalone",
        };
        f.write_str(name)
    }
}

/// Resumable state of one migration job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationSession {
    /// Unique id of this session.
    pub session_id: SessionId,
    /// Job this session belongs to.
    pub job_id: JobId,
    /// Checkpoint the session persists under.
    pub checkpoint_id: CheckpointId,
    /// Direction of the migration.
    pub direction: MigrationDirection,
    /// Batch size in effect when the checkpoint was written.
    pub batch_size: usize,
    /// When the session was created (Unix millis).
    pub start_time: u64,
    /// When the session was last paused (Unix millis).
    pub pause_time: Option<u64>,
    /// Number of keys in the job.
    pub total_items: u64,
    /// Number of keys migrated so far.
    pub items_processed: u64,
    /// Total size of the job in bytes, as reported by the source.
    pub total_bytes: u64,
    /// Bytes migrated so far.
    pub bytes_processed: u64,
    /// Last key of the last committed batch.
    pub last_processed_key: Option<RecordKey>,
    /// Keys already migrated.
    pub processed_keys: BTreeSet<RecordKey>,
    /// Keys still to migrate, in migration order.
    pub remaining_keys: VecDeque<RecordKey>,
    /// When the checkpoint was last written (Unix millis).
    pub checkpoint_timestamp: Option<u64>,
}

impl Envelope for MigrationSession {
    const KIND: RecordKind = RecordKind::Checkpoint;
}

/// Undo record for a batch moved into the processed set.
#[derive(Debug, Clone)]
pub struct CommittedBatch {
    keys: Vec<RecordKey>,
    bytes: u64,
    previous_last_key: Option<RecordKey>,
    previous_timestamp: Option<u64>,
}

impl CommittedBatch {
    /// Number of keys in the batch.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns true if the batch was empty.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Bytes written by the batch.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

impl MigrationSession {
    /// Creates a fresh session over `keys`.
    ///
    /// Duplicate keys are dropped, keeping the first occurrence.
    pub fn new(
        job_id: JobId,
        direction: MigrationDirection,
        keys: Vec<RecordKey>,
        total_bytes: u64,
        batch_size: usize,
        now_ms: u64,
    ) -> Self {
        let mut seen = HashSet::with_capacity(keys.len());
        let remaining_keys: VecDeque<RecordKey> = keys
            .into_iter()
            .filter(|key| seen.insert(key.clone()))
            .collect();

        Self {
            session_id: SessionId::new(),
            checkpoint_id: CheckpointId::for_job(&job_id),
            job_id,
            direction,
            batch_size: batch_size.max(1),
            start_time: now_ms,
            pause_time: None,
            total_items: remaining_keys.len() as u64,
            items_processed: 0,
            total_bytes,
            bytes_processed: 0,
            last_processed_key: None,
            processed_keys: BTreeSet::new(),
            remaining_keys,
            checkpoint_timestamp: None,
        }
    }

    /// Returns true when no keys remain.
    pub fn is_complete(&self) -> bool {
        self.remaining_keys.is_empty()
    }

    /// Number of keys still to migrate.
    pub fn remaining(&self) -> u64 {
        self.remaining_keys.len() as u64
    }

    /// Percentage of keys migrated, in `[0, 100]`.
    pub fn percent_complete(&self) -> f64 {
        if self.total_items == 0 {
            return 100.0;
        }
        (self.items_processed as f64 / self.total_items as f64) * 100.0
    }

    /// Returns the next `size` keys without removing them.
    pub fn next_batch(&self, size: usize) -> Vec<RecordKey> {
        self.remaining_keys.iter().take(size).cloned().collect()
    }

    /// Moves `keys` from the front of the remaining queue into the
    /// processed set.
    ///
    /// `keys` must be exactly the front of the remaining queue, in order.
    pub fn commit_batch(
        &mut self,
        keys: &[RecordKey],
        bytes: u64,
        now_ms: u64,
    ) -> MigrateResult<CommittedBatch> {
        if keys.len() > self.remaining_keys.len()
            || !keys.iter().zip(self.remaining_keys.iter()).all(|(a, b)| a == b)
        {
            return Err(MigrateError::InvalidSession(
                "batch is not the front of the remaining keys".into(),
            ));
        }

        let committed = CommittedBatch {
            keys: keys.to_vec(),
            bytes,
            previous_last_key: self.last_processed_key.clone(),
            previous_timestamp: self.checkpoint_timestamp,
        };

        for key in keys {
            self.remaining_keys.pop_front();
            self.processed_keys.insert(key.clone());
        }
        self.items_processed += keys.len() as u64;
        self.bytes_processed += bytes;
        if let Some(last) = keys.last() {
            self.last_processed_key = Some(last.clone());
        }
        self.checkpoint_timestamp = Some(now_ms);

        Ok(committed)
    }

    /// Undoes a batch whose checkpoint could not be persisted.
    pub fn revert_batch(&mut self, batch: CommittedBatch) {
        for key in batch.keys.iter().rev() {
            self.processed_keys.remove(key);
            self.remaining_keys.push_front(key.clone());
        }
        self.items_processed -= batch.keys.len() as u64;
        self.bytes_processed -= batch.bytes;
        self.last_processed_key = batch.previous_last_key;
        self.checkpoint_timestamp = batch.previous_timestamp;
    }

    /// Checks the bookkeeping invariants.
    pub fn validate(&self) -> MigrateResult<()> {
        if self.items_processed != self.processed_keys.len() as u64 {
            return Err(MigrateError::InvalidSession(format!(
                "items_processed is {} but {} keys are marked processed",
                self.items_processed,
                self.processed_keys.len()
            )));
        }
        if self.items_processed > self.total_items {
            return Err(MigrateError::InvalidSession(format!(
                "items_processed {} exceeds total_items {}",
                self.items_processed, self.total_items
            )));
        }
        if self.items_processed + self.remaining() != self.total_items {
            return Err(MigrateError::InvalidSession(format!(
                "{} processed + {} remaining != {} total",
                self.items_processed,
                self.remaining(),
                self.total_items
            )));
        }
        if let Some(key) = self
            .remaining_keys
            .iter()
            .find(|key| self.processed_keys.contains(*key))
        {
            return Err(MigrateError::InvalidSession(format!(
                "key {key:?} is both processed and remaining"
            )));
        }
        if self.checkpoint_id != CheckpointId::for_job(&self.job_id) {
            return Err(MigrateError::InvalidSession(format!(
                "checkpoint id {} does not belong to job {}",
                self.checkpoint_id, self.job_id
            )));
        }
        Ok(())
    }
}
