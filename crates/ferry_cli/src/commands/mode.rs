//! Mode command.

use super::{format_timestamp, open_existing};
use ferry_coordinator::{load_mode, ModeRecord};
use ferry_sync::SyncMode;
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Serialize)]
struct ModeOutput {
    mode: SyncMode,
    switched_at: Option<u64>,
}

/// Shows the persisted active backend. A store that never switched is local.
pub fn show(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_existing(path)?;
    let record: Option<ModeRecord> = load_mode(&store)?;
    let output = ModeOutput {
        mode: record.map_or(SyncMode::Local, |r| r.mode),
        switched_at: record.map(|r| r.switched_at),
    };

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&output)?),
        _ => {
            println!("Mode:     {}", output.mode);
            println!("Switched: {}", format_timestamp(output.switched_at));
        }
    }
    Ok(())
}
