//! Outbox entries.

use ferry_codec::{Envelope, RecordKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Idempotency key of a mutation. The remote deduplicates on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Generates a new random operation id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A local change to deliver to the remote backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    /// Idempotency key; generated when not supplied.
    pub operation_id: Option<OperationId>,
    /// Kind of entity, e.g. `"note"`.
    pub entity_type: String,
    /// Entity the change applies to.
    pub entity_id: String,
    /// Opaque serialized change.
    pub payload: Vec<u8>,
}

impl Mutation {
    /// Creates a mutation with a fresh operation id.
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            operation_id: None,
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            payload: payload.into(),
        }
    }

    /// Uses a caller-chosen operation id.
    pub fn with_operation_id(mut self, id: OperationId) -> Self {
        self.operation_id = Some(id);
        self
    }
}

/// Delivery state of an outbox entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    /// Waiting to be sent.
    Pending,
    /// Send in flight.
    Syncing,
    /// Acknowledged by the remote; about to leave the queue.
    Synced,
    /// Last send failed; waits for retry or discard.
    Failed,
}

/// One queued mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncQueueItem {
    /// Idempotency key.
    pub operation_id: OperationId,
    /// Enqueue order across restarts.
    pub sequence: u64,
    /// Kind of entity.
    pub entity_type: String,
    /// Entity the change applies to.
    pub entity_id: String,
    /// Opaque serialized change.
    pub payload: Vec<u8>,
    /// When the entry was enqueued (Unix millis).
    pub created_at: u64,
    /// Delivery state.
    pub status: ItemStatus,
    /// Sends attempted so far.
    pub attempt_count: u32,
    /// Error of the last failed send.
    pub last_error: Option<String>,
    /// When the last send started (Unix millis).
    pub last_attempt_at: Option<u64>,
}

impl Envelope for SyncQueueItem {
    const KIND: RecordKind = RecordKind::OutboxItem;
}

impl SyncQueueItem {
    /// Builds a pending entry from a mutation.
    pub fn from_mutation(mutation: Mutation, sequence: u64, now_ms: u64) -> Self {
        Self {
            operation_id: mutation.operation_id.unwrap_or_default(),
            sequence,
            entity_type: mutation.entity_type,
            entity_id: mutation.entity_id,
            payload: mutation.payload,
            created_at: now_ms,
            status: ItemStatus::Pending,
            attempt_count: 0,
            last_error: None,
            last_attempt_at: None,
        }
    }

    /// Returns true while the entry is waiting to be sent.
    pub fn is_pending(&self) -> bool {
        self.status == ItemStatus::Pending
    }

    /// Returns true if the last send failed.
    pub fn is_failed(&self) -> bool {
        self.status == ItemStatus::Failed
    }
}
