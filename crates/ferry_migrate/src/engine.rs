//! Migration engine.
//!
//! A migration runs on a dedicated worker thread that processes the
//! session's remaining keys batch by batch:
//!
//! 1. Read the batch from the source
//! 2. Write it to the destination (with retry)
//! 3. Commit it to the session and persist the checkpoint
//!
//! Pause, resume and cancel are signals the worker observes between
//! batches, so a batch is never interrupted halfway through.

use crate::checkpoint::CheckpointStore;
use crate::config::MigrationOptions;
use crate::control::{
    MigrationControl, MigrationOutcome, MigrationState, MigrationSummary, ResumeData,
};
use crate::error::{MigrateError, MigrateResult};
use crate::estimator::{EstimationTarget, MigrationEstimation, SampleEstimator, SampleItem};
use crate::io::{Record, RecordSink, RecordSource};
use crate::session::{CheckpointId, JobId, MigrationSession};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

/// Receives a control snapshot after every committed batch and state change.
pub trait ProgressObserver: Send + Sync {
    /// Called from the worker thread.
    fn on_progress(&self, control: &MigrationControl);
}

impl<F> ProgressObserver for F
where
    F: Fn(&MigrationControl) + Send + Sync,
{
    fn on_progress(&self, control: &MigrationControl) {
        self(control)
    }
}

/// Starts and tracks migrations over a shared checkpoint store.
pub struct MigrationEngine {
    checkpoints: Arc<dyn CheckpointStore>,
    active: Mutex<HashMap<JobId, MigrationHandle>>,
}

impl MigrationEngine {
    /// Creates an engine persisting checkpoints into `checkpoints`.
    pub fn new(checkpoints: Arc<dyn CheckpointStore>) -> Self {
        Self {
            checkpoints,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the checkpoint store.
    pub fn checkpoints(&self) -> &Arc<dyn CheckpointStore> {
        &self.checkpoints
    }

    /// Returns the resumable checkpoint for `job`, if any.
    pub fn resumable(&self, job: &JobId) -> MigrateResult<Option<ResumeData>> {
        Ok(self
            .checkpoints
            .find(&CheckpointId::for_job(job))?
            .as_ref()
            .map(ResumeData::from))
    }

    /// Deletes the checkpoint of a job that is not running.
    pub fn discard(&self, job: &JobId) -> MigrateResult<bool> {
        if let Some(handle) = self.running(job) {
            return Err(MigrateError::InvalidTransition {
                from: handle.state(),
                to: "discard",
            });
        }
        self.checkpoints.delete(&CheckpointId::for_job(job))
    }

    /// Returns the handle of an in-flight migration for `job`.
    pub fn running(&self, job: &JobId) -> Option<MigrationHandle> {
        let mut active = self.active.lock();
        active.retain(|_, handle| !handle.state().is_terminal());
        active.get(job).cloned()
    }

    /// Starts or resumes the migration described by `options`.
    pub fn start<S, D>(
        &self,
        source: Arc<S>,
        sink: Arc<D>,
        options: MigrationOptions,
    ) -> MigrateResult<MigrationHandle>
    where
        S: RecordSource + ?Sized + 'static,
        D: RecordSink + ?Sized + 'static,
    {
        self.start_with_observer(source, sink, options, None)
    }

    /// Like [`MigrationEngine::start`], reporting progress to `observer`.
    ///
    /// If a checkpoint exists for the job, the run resumes from it instead
    /// of enumerating the source again.
    pub fn start_with_observer<S, D>(
        &self,
        source: Arc<S>,
        sink: Arc<D>,
        options: MigrationOptions,
        observer: Option<Arc<dyn ProgressObserver>>,
    ) -> MigrateResult<MigrationHandle>
    where
        S: RecordSource + ?Sized + 'static,
        D: RecordSink + ?Sized + 'static,
    {
        let job = options.job_id.clone();
        let mut active = self.active.lock();
        active.retain(|_, handle| !handle.state().is_terminal());
        if active.contains_key(&job) {
            return Err(MigrateError::AlreadyRunning(job.to_string()));
        }

        let checkpoint_id = CheckpointId::for_job(&job);
        let (session, resumed) = match self.checkpoints.find(&checkpoint_id)? {
            Some(mut session) => {
                info!(
                    job = %job,
                    processed = session.items_processed,
                    total = session.total_items,
                    "resuming migration from checkpoint"
                );
                session.pause_time = None;
                (session, true)
            }
            None => {
                let keys = source.keys()?;
                let total_bytes = source.total_bytes_hint().unwrap_or(0);
                let session = MigrationSession::new(
                    job.clone(),
                    options.direction,
                    keys,
                    total_bytes,
                    options.initial_batch_size(),
                    now_millis(),
                );
                // Persist before the first batch so the job is resumable at once.
                self.checkpoints.save(&session)?;
                info!(
                    job = %job,
                    direction = %options.direction,
                    total = session.total_items,
                    "starting migration"
                );
                (session, false)
            }
        };

        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                state: MigrationState::Running,
                parked: false,
                resume_data: Some(ResumeData::from(&session)),
                estimation: None,
                last_error: None,
                items_processed: session.items_processed,
                total_items: session.total_items,
                outcome: None,
            }),
            changed: Condvar::new(),
            worker: Mutex::new(None),
        });

        let worker = Worker {
            shared: Arc::clone(&shared),
            source,
            sink,
            checkpoints: Arc::clone(&self.checkpoints),
            observer,
            estimator: SampleEstimator::new(options.estimator.clone()),
            batch_size: options.initial_batch_size(),
            options,
            session,
            resumed,
            started: Instant::now(),
            items_this_run: 0,
            samples: VecDeque::new(),
        };

        let join = std::thread::Builder::new()
            .name(format!("ferry-migrate-{job}"))
            .spawn(move || worker.run())?;
        *shared.worker.lock() = Some(join);

        let handle = MigrationHandle { job, shared };
        active.insert(handle.job.clone(), handle.clone());
        Ok(handle)
    }
}

struct Shared {
    inner: Mutex<Inner>,
    changed: Condvar,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct Inner {
    state: MigrationState,
    /// The worker is blocked at a batch boundary waiting for resume/cancel.
    parked: bool,
    resume_data: Option<ResumeData>,
    estimation: Option<MigrationEstimation>,
    last_error: Option<String>,
    items_processed: u64,
    total_items: u64,
    outcome: Option<MigrationOutcome>,
}

impl Inner {
    fn control(&self) -> MigrationControl {
        let mut control = MigrationControl::new(
            self.state,
            self.resume_data.clone(),
            self.estimation.clone(),
            self.last_error.clone(),
        );
        // Progress outlives the checkpoint once the run is over.
        control.items_processed = self.items_processed;
        control.total_items = self.total_items;
        control
    }
}

/// Handle to a running (or finished) migration.
///
/// Cloning a handle is cheap; all clones control the same run.
#[derive(Clone)]
pub struct MigrationHandle {
    job: JobId,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for MigrationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationHandle")
            .field("job", &self.job)
            .field("state", &self.state())
            .finish()
    }
}

impl MigrationHandle {
    /// Job this handle controls.
    pub fn job_id(&self) -> &JobId {
        &self.job
    }

    /// Current lifecycle state.
    pub fn state(&self) -> MigrationState {
        self.shared.inner.lock().state
    }

    /// Current control snapshot.
    pub fn control(&self) -> MigrationControl {
        self.shared.inner.lock().control()
    }

    /// Requests a pause at the next batch boundary.
    ///
    /// The in-flight batch finishes and the checkpoint is persisted before
    /// the worker parks.
    pub fn pause(&self) -> MigrateResult<()> {
        let mut inner = self.shared.inner.lock();
        match inner.state {
            MigrationState::Running => {
                inner.state = MigrationState::Paused;
                drop(inner);
                self.shared.changed.notify_all();
                info!(job = %self.job, "migration pause requested");
                Ok(())
            }
            from => Err(MigrateError::InvalidTransition { from, to: "pause" }),
        }
    }

    /// Resumes a paused migration from its checkpoint.
    pub fn resume(&self) -> MigrateResult<()> {
        let mut inner = self.shared.inner.lock();
        match inner.state {
            MigrationState::Paused if inner.resume_data.is_some() => {
                inner.state = MigrationState::Running;
                inner.last_error = None;
                drop(inner);
                self.shared.changed.notify_all();
                info!(job = %self.job, "migration resume requested");
                Ok(())
            }
            from => Err(MigrateError::InvalidTransition { from, to: "resume" }),
        }
    }

    /// Requests cancellation at the next batch boundary.
    ///
    /// Records already written to the destination stay there; the
    /// checkpoint is deleted.
    pub fn cancel(&self) -> MigrateResult<()> {
        let mut inner = self.shared.inner.lock();
        match inner.state {
            MigrationState::Running | MigrationState::Paused => {
                inner.state = MigrationState::Cancelling;
                drop(inner);
                self.shared.changed.notify_all();
                info!(job = %self.job, "migration cancel requested");
                Ok(())
            }
            from => Err(MigrateError::InvalidTransition { from, to: "cancel" }),
        }
    }

    /// Blocks until the run finishes or parks in the paused state.
    pub fn wait(&self) -> MigrationOutcome {
        let mut inner = self.shared.inner.lock();
        loop {
            if let Some(outcome) = settled(&inner) {
                drop(inner);
                self.join_if_finished();
                return outcome;
            }
            self.shared.changed.wait(&mut inner);
        }
    }

    /// Like [`MigrationHandle::wait`], giving up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<MigrationOutcome> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.shared.inner.lock();
        loop {
            if let Some(outcome) = settled(&inner) {
                drop(inner);
                self.join_if_finished();
                return Some(outcome);
            }
            if self
                .shared
                .changed
                .wait_until(&mut inner, deadline)
                .timed_out()
            {
                return settled(&inner);
            }
        }
    }

    fn join_if_finished(&self) {
        if !self.state().is_terminal() {
            return;
        }
        if let Some(join) = self.shared.worker.lock().take() {
            if join.join().is_err() {
                warn!(job = %self.job, "migration worker panicked");
            }
        }
    }
}

fn settled(inner: &Inner) -> Option<MigrationOutcome> {
    if inner.state.is_terminal() {
        return inner.outcome.clone();
    }
    match (&inner.resume_data, inner.state, inner.parked) {
        (Some(resume), MigrationState::Paused, true) => {
            Some(MigrationOutcome::Paused(resume.clone()))
        }
        _ => None,
    }
}

struct Worker<S: ?Sized, D: ?Sized> {
    shared: Arc<Shared>,
    source: Arc<S>,
    sink: Arc<D>,
    checkpoints: Arc<dyn CheckpointStore>,
    observer: Option<Arc<dyn ProgressObserver>>,
    estimator: SampleEstimator,
    options: MigrationOptions,
    session: MigrationSession,
    resumed: bool,
    started: Instant,
    items_this_run: u64,
    batch_size: usize,
    samples: VecDeque<SampleItem>,
}

/// What the worker should do after a batch boundary.
enum Step {
    Continue,
    Cancel,
}

impl<S: RecordSource + ?Sized, D: RecordSink + ?Sized> Worker<S, D> {
    fn run(mut self) {
        let _guard = PanicGuard(Arc::clone(&self.shared));
        let outcome = self.drive();
        self.finish(outcome);
    }

    fn drive(&mut self) -> MigrationOutcome {
        loop {
            match self.boundary() {
                Ok(Step::Continue) => {}
                Ok(Step::Cancel) => return self.cancelled(),
                Err(e) => return self.failed(e),
            }

            if self.session.is_complete() {
                return self.completed();
            }

            match self.run_batch() {
                Ok(()) => {}
                Err(e @ MigrateError::CheckpointWrite { .. }) => self.halt_resumable(e),
                Err(e) => return self.failed(e),
            }
        }
    }

    /// Handles pause, resume and cancel requests between batches.
    fn boundary(&mut self) -> MigrateResult<Step> {
        let shared = Arc::clone(&self.shared);
        let mut inner = shared.inner.lock();
        loop {
            match inner.state {
                MigrationState::Running => {
                    if inner.parked {
                        inner.parked = false;
                        MutexGuard::unlocked(&mut inner, || self.reload())?;
                        inner.items_processed = self.session.items_processed;
                        inner.resume_data = Some(ResumeData::from(&self.session));
                    }
                    return Ok(Step::Continue);
                }
                MigrationState::Paused if !inner.parked => {
                    let resume = MutexGuard::unlocked(&mut inner, || self.persist_pause());
                    inner.resume_data = Some(resume);
                    inner.parked = true;
                    let control = inner.control();
                    shared.changed.notify_all();
                    MutexGuard::unlocked(&mut inner, || self.notify(&control));
                }
                MigrationState::Paused => shared.changed.wait(&mut inner),
                _ => return Ok(Step::Cancel),
            }
        }
    }

    fn persist_pause(&mut self) -> ResumeData {
        self.session.pause_time = Some(now_millis());
        if let Err(e) = self.checkpoints.save(&self.session) {
            // The previous checkpoint is still valid; only the pause time is lost.
            warn!(job = %self.session.job_id, error = %e, "failed to record pause in checkpoint");
        }
        info!(
            job = %self.session.job_id,
            processed = self.session.items_processed,
            total = self.session.total_items,
            "migration paused"
        );
        ResumeData::from(&self.session)
    }

    fn reload(&mut self) -> MigrateResult<()> {
        let mut session = self.checkpoints.load(&self.session.checkpoint_id)?;
        session.pause_time = None;
        info!(
            job = %session.job_id,
            processed = session.items_processed,
            remaining = session.remaining(),
            "migration resumed from checkpoint"
        );
        self.session = session;
        Ok(())
    }

    fn run_batch(&mut self) -> MigrateResult<()> {
        let keys = self.session.next_batch(self.batch_size);
        let started = Instant::now();

        let records = self.source.read_batch(&keys)?;
        if !records.is_empty() {
            self.write_with_retry(&records)?;
        }
        let elapsed = started.elapsed();

        let bytes = records.iter().map(Record::size).sum();
        self.session.batch_size = self.batch_size;
        let committed = self.session.commit_batch(&keys, bytes, now_millis())?;
        if let Err(e) = self.checkpoints.save(&self.session) {
            self.session.revert_batch(committed);
            return Err(match e {
                e @ MigrateError::CheckpointWrite { .. } => e,
                other => MigrateError::checkpoint_write(
                    self.session.checkpoint_id.as_str(),
                    other.to_string(),
                ),
            });
        }

        self.items_this_run += keys.len() as u64;
        debug!(
            job = %self.session.job_id,
            batch = keys.len(),
            processed = self.session.items_processed,
            remaining = self.session.remaining(),
            elapsed_ms = elapsed.as_millis() as u64,
            "batch committed"
        );

        self.record_samples(&records, elapsed);
        let estimation = self.reestimate();
        self.publish(estimation);
        Ok(())
    }

    fn write_with_retry(&self, records: &[Record]) -> MigrateResult<()> {
        let retry = &self.options.retry;
        let mut attempt = 0;
        loop {
            if attempt > 0 {
                std::thread::sleep(retry.delay_for_attempt(attempt));
            }
            attempt += 1;

            match self.sink.write_batch(records, self.options.write_timeout) {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < retry.max_attempts => {
                    warn!(
                        job = %self.session.job_id,
                        attempt,
                        error = %e,
                        "destination write failed, retrying"
                    );
                }
                Err(e) => {
                    return Err(MigrateError::DestinationWrite {
                        attempts: attempt,
                        message: e.to_string(),
                    })
                }
            }
        }
    }

    fn record_samples(&mut self, records: &[Record], elapsed: Duration) {
        if records.is_empty() {
            return;
        }
        let per_item = elapsed / records.len() as u32;
        for record in records {
            self.samples.push_back(SampleItem::new(record.size(), per_item));
        }
        while self.samples.len() > self.options.sample_window.max(1) {
            self.samples.pop_front();
        }
    }

    fn reestimate(&mut self) -> Option<MigrationEstimation> {
        let sample: Vec<SampleItem> = self.samples.iter().copied().collect();
        let duration = sample.iter().map(|item| item.elapsed).sum();

        let mut target = EstimationTarget::new(self.session.total_items)
            .with_completed(self.session.items_processed);
        if self.session.total_bytes > 0 {
            target = target.with_total_bytes(self.session.total_bytes);
        }

        let estimation = self.estimator.estimate(target, &sample, duration).ok()?;
        if self.options.batch_size.is_none() && estimation.recommended_batch_size != self.batch_size
        {
            debug!(
                job = %self.session.job_id,
                from = self.batch_size,
                to = estimation.recommended_batch_size,
                "adjusting batch size"
            );
            self.batch_size = estimation.recommended_batch_size;
        }
        Some(estimation)
    }

    fn publish(&self, estimation: Option<MigrationEstimation>) {
        let control = {
            let mut inner = self.shared.inner.lock();
            inner.resume_data = Some(ResumeData::from(&self.session));
            inner.items_processed = self.session.items_processed;
            if estimation.is_some() {
                inner.estimation = estimation;
            }
            inner.control()
        };
        self.notify(&control);
    }

    fn notify(&self, control: &MigrationControl) {
        if let Some(observer) = &self.observer {
            observer.on_progress(control);
        }
    }

    /// Stops in a resumable paused state after a checkpoint write failure.
    fn halt_resumable(&self, e: MigrateError) {
        error!(job = %self.session.job_id, error = %e, "checkpoint write failed, pausing");
        let mut inner = self.shared.inner.lock();
        inner.last_error = Some(e.to_string());
        if inner.state == MigrationState::Running {
            inner.state = MigrationState::Paused;
        }
    }

    fn completed(&self) -> MigrationOutcome {
        if let Err(e) = self.checkpoints.delete(&self.session.checkpoint_id) {
            warn!(job = %self.session.job_id, error = %e, "failed to delete checkpoint after completion");
        }
        let summary = MigrationSummary {
            job_id: self.session.job_id.clone(),
            session_id: self.session.session_id,
            items_migrated: self.session.items_processed,
            items_this_run: self.items_this_run,
            bytes_migrated: self.session.bytes_processed,
            duration: self.started.elapsed(),
            resumed: self.resumed,
        };
        info!(
            job = %summary.job_id,
            items = summary.items_migrated,
            bytes = summary.bytes_migrated,
            duration_ms = summary.duration.as_millis() as u64,
            "migration completed"
        );
        MigrationOutcome::Completed(summary)
    }

    fn cancelled(&self) -> MigrationOutcome {
        if let Err(e) = self.checkpoints.delete(&self.session.checkpoint_id) {
            return self.failed(e);
        }
        info!(
            job = %self.session.job_id,
            items = self.session.items_processed,
            "migration cancelled; migrated records were kept at the destination"
        );
        MigrationOutcome::Cancelled {
            items_migrated: self.session.items_processed,
        }
    }

    fn failed(&self, e: MigrateError) -> MigrationOutcome {
        error!(job = %self.session.job_id, error = %e, "migration failed; checkpoint kept");
        let resume_data = self.shared.inner.lock().resume_data.clone();
        MigrationOutcome::Failed {
            error: e.to_string(),
            resume_data,
        }
    }

    fn finish(&self, outcome: MigrationOutcome) {
        let control = {
            let mut inner = self.shared.inner.lock();
            inner.parked = false;
            inner.state = match &outcome {
                MigrationOutcome::Completed(_) => MigrationState::Completed,
                MigrationOutcome::Cancelled { .. } => MigrationState::Cancelled,
                MigrationOutcome::Failed { .. } | MigrationOutcome::Paused(_) => {
                    MigrationState::Failed
                }
            };
            match &outcome {
                MigrationOutcome::Completed(_) | MigrationOutcome::Cancelled { .. } => {
                    inner.resume_data = None;
                }
                MigrationOutcome::Failed { error, .. } => {
                    inner.last_error = Some(error.clone());
                }
                MigrationOutcome::Paused(_) => {}
            }
            inner.outcome = Some(outcome);
            inner.control()
        };
        self.shared.changed.notify_all();
        self.notify(&control);
    }
}

/// Marks the run failed if the worker unwinds, so waiters never hang.
struct PanicGuard(Arc<Shared>);

impl Drop for PanicGuard {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            return;
        }
        let mut inner = self.0.inner.lock();
        if !inner.state.is_terminal() {
            inner.state = MigrationState::Failed;
            inner.last_error = Some("migration worker panicked".to_string());
            inner.outcome = Some(MigrationOutcome::Failed {
                error: "migration worker panicked".to_string(),
                resume_data: inner.resume_data.clone(),
            });
        }
        drop(inner);
        self.0.changed.notify_all();
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
