//! # Ferry Sync
//!
//! Durable outbox for local mutations bound for a cloud backend.
//!
//! This crate provides:
//! - [`SyncOutbox`] - enqueue, drain, retry and discard of queued mutations
//! - [`AutoSync`] - drains when connectivity returns and on an interval
//! - [`SyncStatus`] - a read-only projection for UI and tooling
//! - [`RemoteSender`] - the transport seam, with [`MockRemote`] for tests
//!
//! ## Key Invariants
//!
//! - Enqueue always succeeds locally, online or not
//! - An entry leaves the queue only after the remote acknowledged it or the
//!   user discarded it
//! - Entries for one entity are delivered in enqueue order; a failed entry
//!   holds the entity's later entries
//! - Delivery is at least once; operation ids make redelivery harmless

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod connectivity;
mod error;
mod item;
mod outbox;
mod queue;
mod status;
mod transport;

pub use config::OutboxConfig;
pub use connectivity::{AutoSync, Connectivity};
pub use error::{SyncError, SyncResult};
pub use item::{ItemStatus, Mutation, OperationId, SyncQueueItem};
pub use outbox::{DrainReport, DrainStop, SyncOutbox};
pub use queue::{OutboxQueue, QueueCounts, OUTBOX_PREFIX};
pub use status::{OutboxSnapshot, SyncMode, SyncStateKind, SyncStatus};
pub use transport::{Ack, MockRemote, RemoteSender};
