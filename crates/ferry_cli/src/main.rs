//! Ferry CLI
//!
//! Command-line tools for inspecting and driving Ferry state directories.
//!
//! # Commands
//!
//! - `checkpoint` - List, show or discard migration checkpoints
//! - `outbox` - Inspect the sync outbox and clear failed entries
//! - `migrate` - Run (or resume) a checkpointed migration between stores
//! - `estimate` - Estimate a migration from a sample of records
//! - `mode` - Show the active backend

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use ferry_migrate::MigrationDirection;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Ferry command-line tools.
#[derive(Parser)]
#[command(name = "ferry")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the state directory (checkpoints, outbox, mode)
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(global = true, short, long, default_value = "text")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect migration checkpoints
    Checkpoint {
        #[command(subcommand)]
        command: CheckpointCommand,
    },

    /// Inspect the sync outbox
    Outbox {
        #[command(subcommand)]
        command: OutboxCommand,
    },

    /// Migrate records between two store directories
    Migrate {
        /// Source store directory
        #[arg(long)]
        from: PathBuf,

        /// Destination store directory
        #[arg(long)]
        to: PathBuf,

        /// Job id; an existing checkpoint for it is resumed
        #[arg(short, long)]
        job: String,

        /// Fixed batch size (tuned from throughput when omitted)
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Direction recorded in the checkpoint
        #[arg(short, long, value_enum, default_value = "standalone")]
        direction: Direction,
    },

    /// Estimate a migration from a sample of the source
    Estimate {
        /// Source store directory
        #[arg(long)]
        from: PathBuf,

        /// Number of records to sample
        #[arg(short, long, default_value = "20")]
        sample: usize,
    },

    /// Show the active backend
    Mode,

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum CheckpointCommand {
    /// List stored checkpoints
    List,
    /// Show one job's checkpoint
    Show {
        /// Job id
        job: String,
    },
    /// Delete one job's checkpoint
    Discard {
        /// Job id
        job: String,
    },
}

#[derive(Subcommand)]
enum OutboxCommand {
    /// Show queue counts
    Status,
    /// List queued entries in send order
    List {
        /// Maximum number of entries to show
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Remove entries whose last send failed
    ClearFailed,
}

#[derive(Clone, Copy, ValueEnum)]
enum Direction {
    LocalToCloud,
    CloudToLocal,
    Standalone,
}

impl From<Direction> for MigrationDirection {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::LocalToCloud => MigrationDirection::LocalToCloud,
            Direction::CloudToLocal => MigrationDirection::CloudToLocal,
            Direction::Standalone => MigrationDirection::Standalone,
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let format = cli.format.as_str();
    match cli.command {
        Commands::Checkpoint { command } => {
            let path = cli.path.ok_or("State path required for checkpoint")?;
            match command {
                CheckpointCommand::List => commands::checkpoint::list(&path, format)?,
                CheckpointCommand::Show { job } => commands::checkpoint::show(&path, &job, format)?,
                CheckpointCommand::Discard { job } => commands::checkpoint::discard(&path, &job)?,
            }
        }
        Commands::Outbox { command } => {
            let path = cli.path.ok_or("State path required for outbox")?;
            match command {
                OutboxCommand::Status => commands::outbox::status(&path, format)?,
                OutboxCommand::List { limit } => commands::outbox::list(&path, limit, format)?,
                OutboxCommand::ClearFailed => commands::outbox::clear_failed(&path)?,
            }
        }
        Commands::Migrate {
            from,
            to,
            job,
            batch_size,
            direction,
        } => {
            let path = cli.path.ok_or("State path required for migrate")?;
            let request = commands::migrate::MigrateRequest {
                state: path,
                from,
                to,
                job,
                batch_size,
                direction: direction.into(),
            };
            commands::migrate::run(&request, format)?;
        }
        Commands::Estimate { from, sample } => {
            commands::estimate::run(&from, sample, format)?;
        }
        Commands::Mode => {
            let path = cli.path.ok_or("State path required for mode")?;
            commands::mode::show(&path, format)?;
        }
        Commands::Version => {
            println!("Ferry CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
