//! # Ferry Coordinator
//!
//! Guards switching the active backend between the local store and the
//! cloud.
//!
//! This crate provides:
//! - [`ModeCoordinator`] - plans and performs backend switches
//! - [`SwitchPlan`] - what a switch requires, including a three-way
//!   [`Resolution`] choice when the outbox is not empty
//! - [`DataStore`] - the seam over each backend's records
//!
//! ## Key Invariants
//!
//! - The backend never flips while a switch migration is running or paused
//! - Leaving the cloud with unsynced outbox entries needs an explicit
//!   resolution from the caller; nothing is discarded implicitly
//! - Bulk deletion is refused unless it targets the active backend
//! - The active mode is persisted and survives restarts

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod coordinator;
mod data;
mod error;
mod mode;
mod plan;

pub use config::CoordinatorConfig;
pub use coordinator::ModeCoordinator;
pub use data::{DataStore, StoreData};
pub use error::{CoordinatorError, CoordinatorResult};
pub use mode::{load_mode, save_mode, ModeRecord, MODE_KEY};
pub use plan::{Resolution, SwitchOutcome, SwitchPlan};
