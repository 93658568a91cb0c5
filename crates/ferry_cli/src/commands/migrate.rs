//! Migrate command.

use super::{format_size, open_existing};
use ferry_migrate::{
    JobId, MigrationControl, MigrationDirection, MigrationEngine, MigrationOptions,
    MigrationOutcome, ProgressObserver, StoreCheckpoints, StoreSink, StoreSource,
};
use ferry_storage::{FileStore, StoreConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Arguments of a migration run.
#[derive(Debug, Clone)]
pub struct MigrateRequest {
    /// State directory holding checkpoints.
    pub state: PathBuf,
    /// Source store directory.
    pub from: PathBuf,
    /// Destination store directory.
    pub to: PathBuf,
    /// Job id.
    pub job: String,
    /// Fixed batch size.
    pub batch_size: Option<usize>,
    /// Direction recorded in the checkpoint.
    pub direction: MigrationDirection,
}

/// Runs (or resumes) a migration to completion.
///
/// Checkpoints are written to the state directory after every batch, so an
/// interrupted run continues where it stopped when started again with the
/// same job id.
pub fn run(request: &MigrateRequest, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let outcome = execute(request)?;

    match format {
        "json" => match &outcome {
            MigrationOutcome::Completed(summary) => {
                println!("{}", serde_json::to_string_pretty(summary)?)
            }
            MigrationOutcome::Paused(resume)
            | MigrationOutcome::Failed {
                resume_data: Some(resume),
                ..
            } => println!("{}", serde_json::to_string_pretty(resume)?),
            _ => {}
        },
        _ => print_text_output(&outcome),
    }

    match outcome {
        MigrationOutcome::Completed(_) => Ok(()),
        MigrationOutcome::Failed { error, .. } => Err(format!("Migration failed: {error}").into()),
        MigrationOutcome::Cancelled { .. } => Err("Migration cancelled".into()),
        MigrationOutcome::Paused(_) => Err("Migration paused".into()),
    }
}

/// Runs the migration and returns how it ended.
pub fn execute(request: &MigrateRequest) -> Result<MigrationOutcome, Box<dyn std::error::Error>> {
    let state = open_or_create(&request.state)?;
    let source = Arc::new(StoreSource::new(open_existing(&request.from)?));
    let sink = Arc::new(StoreSink::new(open_or_create(&request.to)?));

    let engine = MigrationEngine::new(Arc::new(StoreCheckpoints::new(state)));
    let job = JobId::new(request.job.as_str())?;
    if let Some(resume) = engine.resumable(&job)? {
        info!(
            job = %job,
            processed = resume.items_processed,
            total = resume.total_items,
            "found checkpoint; resuming"
        );
    }

    let mut options = MigrationOptions::new(job, request.direction);
    if let Some(size) = request.batch_size {
        options = options.with_batch_size(size);
    }

    let observer: Arc<dyn ProgressObserver> = Arc::new(|control: &MigrationControl| {
        if control.state.is_active() {
            info!(
                processed = control.items_processed,
                total = control.total_items,
                percent = control.percent_complete(),
                "progress"
            );
        }
    });
    let handle = engine.start_with_observer(source, sink, options, Some(observer))?;
    Ok(handle.wait())
}

fn open_or_create(path: &Path) -> Result<FileStore, Box<dyn std::error::Error>> {
    Ok(FileStore::open(path, StoreConfig::default())?)
}

fn print_text_output(outcome: &MigrationOutcome) {
    match outcome {
        MigrationOutcome::Completed(summary) => {
            println!("✓ Migration {} completed", summary.job_id);
            println!("  Records:  {}", summary.items_migrated);
            println!("  This run: {}", summary.items_this_run);
            println!("  Size:     {}", format_size(summary.bytes_migrated));
            println!("  Duration: {:.2}s", summary.duration.as_secs_f64());
            if summary.resumed {
                println!("  Resumed from an earlier checkpoint");
            }
        }
        MigrationOutcome::Paused(resume) => {
            println!(
                "Migration paused at {}/{}",
                resume.items_processed, resume.total_items
            );
        }
        MigrationOutcome::Cancelled { items_migrated } => {
            println!("Migration cancelled after {items_migrated} record(s)");
        }
        MigrationOutcome::Failed { error, resume_data } => {
            println!("⚠ Migration failed: {error}");
            if let Some(resume) = resume_data {
                println!(
                    "  Checkpoint kept at {}/{}; run again to resume",
                    resume.items_processed, resume.total_items
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_migrate::{put_record, Record, RecordSource};
    use tempfile::tempdir;

    #[test]
    fn copies_between_store_directories() {
        let dir = tempdir().unwrap();
        let from = dir.path().join("from");
        {
            let store = FileStore::open(&from, StoreConfig::default()).unwrap();
            for i in 0..30u8 {
                put_record(&store, &Record::new(format!("item-{i:02}"), vec![i; 4])).unwrap();
            }
        }

        let request = MigrateRequest {
            state: dir.path().join("state"),
            from,
            to: dir.path().join("to"),
            job: "copy".to_string(),
            batch_size: Some(7),
            direction: MigrationDirection::Standalone,
        };
        match execute(&request).unwrap() {
            MigrationOutcome::Completed(summary) => assert_eq!(summary.items_migrated, 30),
            other => panic!("expected completion, got {other:?}"),
        }

        let copied =
            StoreSource::new(FileStore::open(&request.to, StoreConfig::default()).unwrap());
        assert_eq!(copied.keys().unwrap().len(), 30);
    }
}
