//! Checkpoint commands.

use super::{format_size, format_timestamp, open_existing};
use ferry_migrate::{CheckpointId, CheckpointStore, JobId, MigrationSession, StoreCheckpoints};
use serde::Serialize;
use std::path::Path;
use tracing::info;

/// One stored checkpoint.
#[derive(Debug, Serialize)]
pub struct CheckpointRow {
    /// Checkpoint id.
    pub checkpoint_id: String,
    /// Job id.
    pub job_id: String,
    /// Session id.
    pub session_id: String,
    /// Migration direction.
    pub direction: String,
    /// Keys migrated.
    pub items_processed: u64,
    /// Keys in the job.
    pub total_items: u64,
    /// Bytes migrated.
    pub bytes_processed: u64,
    /// Last key of the last committed batch.
    pub last_processed_key: Option<String>,
    /// When the checkpoint was written (Unix millis).
    pub checkpoint_timestamp: Option<u64>,
    /// When the session was paused (Unix millis).
    pub pause_time: Option<u64>,
    /// Percentage of keys migrated.
    pub percent_complete: f64,
}

impl From<&MigrationSession> for CheckpointRow {
    fn from(session: &MigrationSession) -> Self {
        Self {
            checkpoint_id: session.checkpoint_id.to_string(),
            job_id: session.job_id.to_string(),
            session_id: session.session_id.to_string(),
            direction: session.direction.to_string(),
            items_processed: session.items_processed,
            total_items: session.total_items,
            bytes_processed: session.bytes_processed,
            last_processed_key: session.last_processed_key.clone(),
            checkpoint_timestamp: session.checkpoint_timestamp,
            pause_time: session.pause_time,
            percent_complete: session.percent_complete(),
        }
    }
}

/// Loads every checkpoint in `checkpoints`.
pub fn collect<C: CheckpointStore + ?Sized>(
    checkpoints: &C,
) -> Result<Vec<CheckpointRow>, Box<dyn std::error::Error>> {
    let mut rows = Vec::new();
    for id in checkpoints.list()? {
        let session = checkpoints.load(&id)?;
        rows.push(CheckpointRow::from(&session));
    }
    Ok(rows)
}

/// Lists stored checkpoints.
pub fn list(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let checkpoints = StoreCheckpoints::new(open_existing(path)?);
    let rows = collect(&checkpoints)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&rows)?),
        _ => {
            if rows.is_empty() {
                println!("No checkpoints.");
            }
            for row in &rows {
                println!(
                    "{}  {}  {}/{} ({:.1}%)",
                    row.job_id,
                    row.direction,
                    row.items_processed,
                    row.total_items,
                    row.percent_complete
                );
            }
        }
    }
    Ok(())
}

/// Shows one job's checkpoint.
pub fn show(path: &Path, job: &str, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let checkpoints = StoreCheckpoints::new(open_existing(path)?);
    let id = CheckpointId::for_job(&JobId::new(job)?);
    let session = checkpoints
        .find(&id)?
        .ok_or_else(|| format!("No checkpoint for job {job}"))?;
    let row = CheckpointRow::from(&session);

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&row)?),
        _ => print_text_output(&row),
    }
    Ok(())
}

/// Deletes one job's checkpoint so the next run starts over.
pub fn discard(path: &Path, job: &str) -> Result<(), Box<dyn std::error::Error>> {
    let checkpoints = StoreCheckpoints::new(open_existing(path)?);
    let id = CheckpointId::for_job(&JobId::new(job)?);
    if checkpoints.delete(&id)? {
        info!(job, "checkpoint discarded");
        println!("✓ Discarded checkpoint for job {job}");
    } else {
        println!("No checkpoint for job {job}");
    }
    Ok(())
}

fn print_text_output(row: &CheckpointRow) {
    println!("Checkpoint {}", row.checkpoint_id);
    println!("==========================");
    println!("  Job:        {}", row.job_id);
    println!("  Session:    {}", row.session_id);
    println!("  Direction:  {}", row.direction);
    println!(
        "  Progress:   {}/{} ({:.1}%)",
        row.items_processed, row.total_items, row.percent_complete
    );
    println!("  Migrated:   {}", format_size(row.bytes_processed));
    println!(
        "  Last key:   {}",
        row.last_processed_key.as_deref().unwrap_or("-")
    );
    println!("  Written:    {}", format_timestamp(row.checkpoint_timestamp));
    println!("  Paused:     {}", format_timestamp(row.pause_time));
}
