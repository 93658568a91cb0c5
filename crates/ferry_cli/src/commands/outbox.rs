//! Outbox commands.
//!
//! These read the queue directly; no remote is contacted. `status` and
//! `list` never write, so entries a crashed process left mid-send still
//! show as syncing.

use super::{format_timestamp, open_existing};
use ferry_storage::RecordStore;
use ferry_sync::{ItemStatus, OutboxQueue, SyncQueueItem};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Queue counts.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct OutboxStatus {
    /// Entries waiting to be sent.
    pub pending: usize,
    /// Entries left mid-send.
    pub syncing: usize,
    /// Entries whose last send failed.
    pub failed: usize,
    /// All entries.
    pub total: usize,
    /// Sequence of the oldest entry.
    pub oldest_sequence: Option<u64>,
}

fn load_items(path: &Path) -> Result<Vec<SyncQueueItem>, Box<dyn std::error::Error>> {
    let store = open_existing(path)?;
    Ok(OutboxQueue::load(&store)?)
}

/// Summarizes `items`, given in send order.
pub fn summarize(items: &[SyncQueueItem]) -> OutboxStatus {
    let mut status = OutboxStatus {
        pending: 0,
        syncing: 0,
        failed: 0,
        total: items.len(),
        oldest_sequence: items.first().map(|item| item.sequence),
    };
    for item in items {
        match item.status {
            ItemStatus::Pending => status.pending += 1,
            ItemStatus::Syncing => status.syncing += 1,
            ItemStatus::Failed => status.failed += 1,
            ItemStatus::Synced => {}
        }
    }
    status
}

/// Shows queue counts.
pub fn status(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let status = summarize(&load_items(path)?);

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&status)?),
        _ => {
            println!("Outbox");
            println!("======");
            println!("  Pending: {}", status.pending);
            println!("  Syncing: {}", status.syncing);
            println!("  Failed:  {}", status.failed);
            println!("  Total:   {}", status.total);
        }
    }
    Ok(())
}

/// Lists entries in send order.
pub fn list(
    path: &Path,
    limit: Option<usize>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut items = load_items(path)?;
    items.truncate(limit.unwrap_or(usize::MAX));

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&items)?),
        _ => {
            if items.is_empty() {
                println!("Outbox is empty.");
            }
            for item in &items {
                println!(
                    "#{:<6} {:<8} {}/{}  attempts={} last={}",
                    item.sequence,
                    status_label(item.status),
                    item.entity_type,
                    item.entity_id,
                    item.attempt_count,
                    format_timestamp(item.last_attempt_at)
                );
                if let Some(error) = &item.last_error {
                    println!("        error: {error}");
                }
            }
        }
    }
    Ok(())
}

/// Removes entries whose last send failed.
pub fn clear_failed(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let store: Arc<dyn RecordStore> = Arc::new(open_existing(path)?);
    let mut queue = OutboxQueue::open(store)?;
    let removed = queue.remove_where(SyncQueueItem::is_failed)?;
    info!(removed, "failed outbox entries cleared");
    let noun = if removed == 1 { "entry" } else { "entries" };
    println!("✓ Removed {removed} failed {noun}");
    Ok(())
}

fn status_label(status: ItemStatus) -> &'static str {
    match status {
        ItemStatus::Pending => "pending",
        ItemStatus::Syncing => "syncing",
        ItemStatus::Synced => "synced",
        ItemStatus::Failed => "failed",
    }
}
