//! Switch plans, resolutions and outcomes.

use ferry_migrate::{MigrationDirection, MigrationOutcome, MigrationSummary, ResumeData};
use ferry_sync::SyncMode;
use std::fmt;
use std::str::FromStr;

/// What a requested backend switch requires before it can happen.
#[derive(Debug, Clone, PartialEq)]
pub enum SwitchPlan {
    /// The target backend is already active.
    AlreadyActive {
        /// Active backend.
        mode: SyncMode,
    },
    /// Nothing stands in the way; the switch only flips the backend.
    Ready {
        /// Backend active now.
        from: SyncMode,
        /// Requested backend.
        to: SyncMode,
    },
    /// Records must be migrated before the backend flips.
    Migrate {
        /// Backend active now.
        from: SyncMode,
        /// Requested backend.
        to: SyncMode,
        /// Which way records flow.
        direction: MigrationDirection,
        /// Records in the source store.
        record_count: usize,
        /// Checkpoint of an earlier, unfinished attempt.
        resume: Option<ResumeData>,
    },
    /// The outbox must be synced or discarded first. The caller decides,
    /// usually by asking the user.
    ResolveOutbox {
        /// Backend active now.
        from: SyncMode,
        /// Requested backend.
        to: SyncMode,
        /// Entries waiting to be sent.
        pending_count: usize,
        /// Entries whose last send failed.
        failed_count: usize,
    },
}

impl SwitchPlan {
    /// Returns true if the caller must pick a [`Resolution`].
    pub fn needs_resolution(&self) -> bool {
        matches!(self, SwitchPlan::ResolveOutbox { .. })
    }

    /// Backend the plan leads to.
    pub fn target(&self) -> SyncMode {
        match self {
            SwitchPlan::AlreadyActive { mode } => *mode,
            SwitchPlan::Ready { to, .. }
            | SwitchPlan::Migrate { to, .. }
            | SwitchPlan::ResolveOutbox { to, .. } => *to,
        }
    }
}

/// How to deal with a non-empty outbox before switching to local.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resolution {
    /// Deliver everything first; the switch waits for an empty queue.
    Sync,
    /// Drop pending and failed entries, accepting the data loss.
    Discard,
    /// Abandon the switch without changing anything.
    Cancel,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Resolution::Sync => "sync",
            Resolution::Discard => "discard",
            Resolution::Cancel => "cancel",
        })
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sync" => Ok(Resolution::Sync),
            "discard" => Ok(Resolution::Discard),
            "cancel" => Ok(Resolution::Cancel),
            other => Err(format!("unknown resolution: {other}")),
        }
    }
}

/// How a switch attempt ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SwitchOutcome {
    /// The target backend was already active.
    AlreadyActive(SyncMode),
    /// The backend flipped.
    Switched {
        /// Previous backend.
        from: SyncMode,
        /// New backend.
        to: SyncMode,
        /// Migration that ran as part of the switch.
        migration: Option<MigrationSummary>,
        /// Outbox entries dropped by a discard resolution.
        discarded: usize,
    },
    /// The caller cancelled, or the switch migration was cancelled.
    Cancelled,
    /// The switch migration paused or failed; the backend did not flip and
    /// the checkpoint is kept for the next attempt.
    Incomplete(MigrationOutcome),
}

impl SwitchOutcome {
    /// Returns true if the backend flipped.
    pub fn is_switched(&self) -> bool {
        matches!(self, SwitchOutcome::Switched { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_target_and_resolution() {
        let plan = SwitchPlan::ResolveOutbox {
            from: SyncMode::Cloud,
            to: SyncMode::Local,
            pending_count: 2,
            failed_count: 1,
        };
        assert!(plan.needs_resolution());
        assert_eq!(plan.target(), SyncMode::Local);

        let plan = SwitchPlan::AlreadyActive {
            mode: SyncMode::Cloud,
        };
        assert!(!plan.needs_resolution());
        assert_eq!(plan.target(), SyncMode::Cloud);
    }

    #[test]
    fn resolution_parsing() {
        assert_eq!("Discard".parse::<Resolution>().unwrap(), Resolution::Discard);
        assert_eq!(Resolution::Sync.to_string(), "sync");
        assert!("ignore".parse::<Resolution>().is_err());
    }
}
