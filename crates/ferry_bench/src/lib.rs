//! Benchmark utilities.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use ferry_migrate::{Record, SampleItem};
use rand::Rng;
use std::time::Duration;

/// Generate random data of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Generate records with random payloads of the specified size.
pub fn random_records(count: usize, payload_size: usize) -> Vec<Record> {
    (0..count)
        .map(|i| Record::new(format!("rec-{i:07}"), random_data(payload_size)))
        .collect()
}

/// Generate a sample with jittered per-item timings around `mean`.
pub fn jittered_sample(count: usize, size_bytes: u64, mean: Duration) -> Vec<SampleItem> {
    let mut rng = rand::thread_rng();
    let mean_us = mean.as_micros().max(1) as u64;
    (0..count)
        .map(|_| {
            let jitter = rng.gen_range(0..=mean_us / 2);
            SampleItem::new(size_bytes, Duration::from_micros(mean_us - mean_us / 4 + jitter))
        })
        .collect()
}
