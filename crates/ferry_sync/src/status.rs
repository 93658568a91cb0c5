//! Read-only sync status projection.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which backend is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Local store only; nothing is synced.
    Local,
    /// Cloud backend with a local outbox.
    Cloud,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncMode::Local => "local",
            SyncMode::Cloud => "cloud",
        })
    }
}

impl FromStr for SyncMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(SyncMode::Local),
            "cloud" => Ok(SyncMode::Cloud),
            other => Err(format!("unknown mode: {other}")),
        }
    }
}

/// Aggregate sync state shown to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStateKind {
    /// Everything delivered.
    Synced,
    /// A drain is running.
    Syncing,
    /// Entries wait to be sent.
    Pending,
    /// Some entries failed.
    Error,
    /// No connectivity.
    Offline,
    /// Local mode; sync does not apply.
    Local,
}

/// Point-in-time inputs of the status projection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutboxSnapshot {
    /// Entries waiting to be sent (including in-flight).
    pub pending_count: usize,
    /// Entries whose last send failed.
    pub failed_count: usize,
    /// Last successful delivery (Unix millis).
    pub last_synced_at: Option<u64>,
    /// Connectivity signal.
    pub is_online: bool,
    /// A drain is running.
    pub is_syncing: bool,
    /// Draining is suspended.
    pub is_paused: bool,
}

/// Derived sync status. Owns no state of its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    /// Active backend.
    pub mode: SyncMode,
    /// Aggregate state.
    pub state: SyncStateKind,
    /// Entries waiting to be sent.
    pub pending_count: usize,
    /// Entries whose last send failed.
    pub failed_count: usize,
    /// Last successful delivery (Unix millis).
    pub last_synced_at: Option<u64>,
    /// Connectivity signal.
    pub is_online: bool,
    /// A drain is running.
    pub is_syncing: bool,
    /// Draining is suspended.
    pub is_paused: bool,
    /// Cloud mode and online.
    pub cloud_connected: bool,
}

impl SyncStatus {
    /// Projects the status for `mode` from an outbox snapshot.
    ///
    /// Precedence: local, offline, syncing, error, pending, synced.
    pub fn project(mode: SyncMode, snapshot: &OutboxSnapshot) -> Self {
        let state = if mode == SyncMode::Local {
            SyncStateKind::Local
        } else if !snapshot.is_online {
            SyncStateKind::Offline
        } else if snapshot.is_syncing {
            SyncStateKind::Syncing
        } else if snapshot.failed_count > 0 {
            SyncStateKind::Error
        } else if snapshot.pending_count > 0 {
            SyncStateKind::Pending
        } else {
            SyncStateKind::Synced
        };

        Self {
            mode,
            state,
            pending_count: snapshot.pending_count,
            failed_count: snapshot.failed_count,
            last_synced_at: snapshot.last_synced_at,
            is_online: snapshot.is_online,
            is_syncing: snapshot.is_syncing,
            is_paused: snapshot.is_paused,
            cloud_connected: mode == SyncMode::Cloud && snapshot.is_online,
        }
    }

    /// Returns true if anything is left to deliver or resolve.
    pub fn has_unsynced(&self) -> bool {
        self.pending_count > 0 || self.failed_count > 0
    }
}
