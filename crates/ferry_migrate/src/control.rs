//! Observable migration state and control flags.

use crate::estimator::MigrationEstimation;
use crate::session::{CheckpointId, JobId, MigrationSession, RecordKey, SessionId};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lifecycle state of a migration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationState {
    /// Not started.
    Idle,
    /// Batches are being processed.
    Running,
    /// Stopped at a batch boundary with a checkpoint on disk.
    Paused,
    /// Cancellation requested; finishing the in-flight batch.
    Cancelling,
    /// Every key was migrated.
    Completed,
    /// Cancelled; the checkpoint was deleted.
    Cancelled,
    /// Stopped by an error; the checkpoint was kept.
    Failed,
}

impl MigrationState {
    /// Returns true if the run is over.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MigrationState::Completed | MigrationState::Cancelled | MigrationState::Failed
        )
    }

    /// Returns true when nothing is in flight: never started or finished.
    pub fn is_idle(&self) -> bool {
        *self == MigrationState::Idle || self.is_terminal()
    }

    /// Returns true if the run is still in flight, paused included.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            MigrationState::Running | MigrationState::Paused | MigrationState::Cancelling
        )
    }
}

/// Snapshot of the last persisted checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeData {
    /// Session the checkpoint belongs to.
    pub session_id: SessionId,
    /// Job the checkpoint belongs to.
    pub job_id: JobId,
    /// Checkpoint id.
    pub checkpoint_id: CheckpointId,
    /// Keys migrated.
    pub items_processed: u64,
    /// Keys in the job.
    pub total_items: u64,
    /// Bytes migrated.
    pub bytes_processed: u64,
    /// Total job size in bytes.
    pub total_bytes: u64,
    /// Last key of the last committed batch.
    pub last_processed_key: Option<RecordKey>,
    /// When the checkpoint was written (Unix millis).
    pub checkpoint_timestamp: Option<u64>,
    /// When the session was paused (Unix millis).
    pub pause_time: Option<u64>,
}

impl ResumeData {
    /// Percentage of keys migrated.
    pub fn percent_complete(&self) -> f64 {
        if self.total_items == 0 {
            return 100.0;
        }
        (self.items_processed as f64 / self.total_items as f64) * 100.0
    }
}

impl From<&MigrationSession> for ResumeData {
    fn from(session: &MigrationSession) -> Self {
        Self {
            session_id: session.session_id,
            job_id: session.job_id.clone(),
            checkpoint_id: session.checkpoint_id.clone(),
            items_processed: session.items_processed,
            total_items: session.total_items,
            bytes_processed: session.bytes_processed,
            total_bytes: session.total_bytes,
            last_processed_key: session.last_processed_key.clone(),
            checkpoint_timestamp: session.checkpoint_timestamp,
            pause_time: session.pause_time,
        }
    }
}

/// Point-in-time view of a migration for callers and UIs.
///
/// The flags are derived from `state` and `resume_data`, so they are
/// always mutually consistent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationControl {
    /// Current lifecycle state.
    pub state: MigrationState,
    /// `pause()` would be accepted.
    pub can_pause: bool,
    /// `resume()` would be accepted.
    pub can_resume: bool,
    /// `cancel()` would be accepted.
    pub can_cancel: bool,
    /// The run is paused.
    pub is_paused: bool,
    /// The run is being cancelled.
    pub is_cancelling: bool,
    /// Last persisted checkpoint.
    pub resume_data: Option<ResumeData>,
    /// Latest estimation from observed throughput.
    pub estimation: Option<MigrationEstimation>,
    /// Last error seen by the run.
    pub last_error: Option<String>,
    /// Keys migrated so far.
    pub items_processed: u64,
    /// Keys in the job.
    pub total_items: u64,
}

impl MigrationControl {
    /// Builds a control view from the state and checkpoint snapshot.
    pub fn new(
        state: MigrationState,
        resume_data: Option<ResumeData>,
        estimation: Option<MigrationEstimation>,
        last_error: Option<String>,
    ) -> Self {
        let (items_processed, total_items) = resume_data
            .as_ref()
            .map_or((0, 0), |r| (r.items_processed, r.total_items));
        Self {
            state,
            can_pause: state == MigrationState::Running,
            can_resume: state == MigrationState::Paused && resume_data.is_some(),
            can_cancel: matches!(state, MigrationState::Running | MigrationState::Paused),
            is_paused: state == MigrationState::Paused,
            is_cancelling: state == MigrationState::Cancelling,
            resume_data,
            estimation,
            last_error,
            items_processed,
            total_items,
        }
    }

    /// View of a run that has not started.
    pub fn idle() -> Self {
        Self::new(MigrationState::Idle, None, None, None)
    }

    /// Percentage of keys migrated.
    pub fn percent_complete(&self) -> f64 {
        if self.total_items == 0 {
            return if self.state == MigrationState::Completed {
                100.0
            } else {
                0.0
            };
        }
        (self.items_processed as f64 / self.total_items as f64) * 100.0
    }
}

/// Result of a completed migration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationSummary {
    /// Job that completed.
    pub job_id: JobId,
    /// Session that completed.
    pub session_id: SessionId,
    /// Keys migrated over the whole session, across resumes.
    pub items_migrated: u64,
    /// Keys migrated by this run.
    pub items_this_run: u64,
    /// Bytes migrated over the whole session.
    pub bytes_migrated: u64,
    /// Wall time of this run.
    pub duration: Duration,
    /// Whether this run resumed an existing checkpoint.
    pub resumed: bool,
}

/// How a run ended (or parked).
#[derive(Debug, Clone, PartialEq)]
pub enum MigrationOutcome {
    /// All keys migrated; checkpoint deleted.
    Completed(MigrationSummary),
    /// Parked at a batch boundary; resumable.
    Paused(ResumeData),
    /// Cancelled; checkpoint deleted.
    Cancelled {
        /// Keys that reached the destination before cancellation.
        items_migrated: u64,
    },
    /// Stopped by an error; checkpoint kept for a later resume.
    Failed {
        /// Error description.
        error: String,
        /// Checkpoint left behind, if any.
        resume_data: Option<ResumeData>,
    },
}

impl MigrationOutcome {
    /// Returns true for [`MigrationOutcome::Completed`].
    pub fn is_completed(&self) -> bool {
        matches!(self, MigrationOutcome::Completed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MigrationDirection;

    fn resume_data() -> ResumeData {
        let session = MigrationSession::new(
            JobId::new("job").unwrap(),
            MigrationDirection::LocalToCloud,
            vec!["a".into(), "b".into()],
            0,
            1,
            0,
        );
        ResumeData::from(&session)
    }

    #[test]
    fn flags_follow_state() {
        let running = MigrationControl::new(MigrationState::Running, Some(resume_data()), None, None);
        assert!(running.can_pause);
        assert!(running.can_cancel);
        assert!(!running.can_resume);
        assert!(!running.is_paused);

        let paused = MigrationControl::new(MigrationState::Paused, Some(resume_data()), None, None);
        assert!(paused.is_paused);
        assert!(paused.can_resume);
        assert!(paused.can_cancel);
        assert!(!paused.can_pause);

        let cancelling =
            MigrationControl::new(MigrationState::Cancelling, Some(resume_data()), None, None);
        assert!(cancelling.is_cancelling);
        assert!(!cancelling.can_cancel);
        assert!(!cancelling.can_resume);
    }

    #[test]
    fn cannot_resume_without_checkpoint() {
        let paused = MigrationControl::new(MigrationState::Paused, None, None, None);
        assert!(paused.is_paused);
        assert!(!paused.can_resume);
    }

    #[test]
    fn terminal_states() {
        assert!(MigrationState::Completed.is_terminal());
        assert!(MigrationState::Cancelled.is_terminal());
        assert!(MigrationState::Failed.is_terminal());
        assert!(!MigrationState::Paused.is_terminal());
        assert!(MigrationState::Paused.is_active());
        assert!(!MigrationState::Idle.is_active());
        assert!(MigrationState::Cancelled.is_idle());
        assert!(!MigrationState::Cancelling.is_idle());
    }

    #[test]
    fn idle_view() {
        let idle = MigrationControl::idle();
        assert_eq!(idle.state, MigrationState::Idle);
        assert!(!idle.can_pause && !idle.can_resume && !idle.can_cancel);
        assert_eq!(idle.percent_complete(), 0.0);
    }
}
