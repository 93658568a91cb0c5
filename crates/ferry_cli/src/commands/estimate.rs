//! Estimate command.

use super::{format_size, open_existing};
use ferry_migrate::{MigrationEstimation, SampleEstimator, StoreSource};
use std::path::Path;

/// Samples `sample` records from the store at `from` and prints the
/// projection for the whole store.
pub fn run(from: &Path, sample: usize, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let source = StoreSource::new(open_existing(from)?);
    let estimation = SampleEstimator::default().estimate_source(&source, sample.max(1))?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&estimation)?),
        _ => print_text_output(&estimation),
    }
    Ok(())
}

fn print_text_output(estimation: &MigrationEstimation) {
    println!("Migration Estimate");
    println!("==================");
    println!("  Sample:      {} record(s)", estimation.sample_size);
    println!("  Confidence:  {:?}", estimation.confidence_level);
    println!("  Data size:   {}", format_size(estimation.total_data_size));
    println!("  Compressed:  {}", format_size(estimation.compressed_size));
    println!(
        "  Duration:    {:.2}s",
        estimation.estimated_duration.as_secs_f64()
    );
    println!("  Throughput:  {:.1} records/s", estimation.throughput);
    println!("  Batch size:  {}", estimation.recommended_batch_size);
    if !estimation.memory_available {
        println!("  Memory:      constrained");
    }
    for warning in &estimation.warnings {
        println!("  ⚠ {warning}");
    }
}
