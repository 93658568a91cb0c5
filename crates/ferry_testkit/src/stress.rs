//! Stress helpers for the outbox.
//!
//! These drive concurrent enqueues against a running drain loop.

use ferry_sync::{Mutation, SyncOutbox};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Mutations enqueued.
    pub enqueued: usize,
    /// Mutations acknowledged by the remote.
    pub sent: usize,
    /// Sends that failed.
    pub failed: usize,
    /// Total duration.
    pub duration: Duration,
    /// Acknowledged mutations per second.
    pub sends_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(enqueued: usize, sent: usize, failed: usize, duration: Duration) -> Self {
        let sends_per_second = if duration.as_secs_f64() > 0.0 {
            sent as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            enqueued,
            sent,
            failed,
            duration,
            sends_per_second,
        }
    }
}

/// Configuration for stress runs.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Mutations enqueued per producer thread.
    pub mutations_per_thread: usize,
    /// Number of producer threads.
    pub threads: usize,
    /// Number of distinct entities mutated.
    pub entities: usize,
    /// Size of each payload in bytes.
    pub payload_size: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            mutations_per_thread: 250,
            threads: 4,
            entities: 16,
            payload_size: 64,
        }
    }
}

/// Enqueues from `config.threads` producers while one thread drains
/// continuously, then drains whatever is left.
///
/// Payloads carry the producer and its per-producer counter as two
/// little-endian `u32`s, so callers can check per-producer order.
pub fn stress_concurrent_enqueue(outbox: &Arc<SyncOutbox>, config: &StressConfig) -> StressTestResult {
    let start = Instant::now();
    let producing = Arc::new(AtomicBool::new(true));
    let enqueued = Arc::new(AtomicUsize::new(0));

    let drainer = {
        let outbox = Arc::clone(outbox);
        let producing = Arc::clone(&producing);
        thread::spawn(move || {
            let mut sent = 0;
            let mut failed = 0;
            while producing.load(Ordering::SeqCst) {
                let report = outbox.drain().expect("drain failed");
                sent += report.sent;
                failed += report.failed;
                if report.sent == 0 {
                    thread::yield_now();
                }
            }
            (sent, failed)
        })
    };

    let producers: Vec<_> = (0..config.threads)
        .map(|producer| {
            let outbox = Arc::clone(outbox);
            let enqueued = Arc::clone(&enqueued);
            let config = config.clone();
            thread::spawn(move || {
                for i in 0..config.mutations_per_thread {
                    let mut payload = Vec::with_capacity(config.payload_size.max(8));
                    payload.extend_from_slice(&(producer as u32).to_le_bytes());
                    payload.extend_from_slice(&(i as u32).to_le_bytes());
                    payload.resize(config.payload_size.max(8), 0);
                    let entity = format!("entity-{}", (producer + i) % config.entities.max(1));
                    outbox
                        .enqueue(Mutation::new("stress", entity, payload))
                        .expect("enqueue failed");
                    enqueued.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();

    for producer in producers {
        producer.join().expect("producer panicked");
    }
    producing.store(false, Ordering::SeqCst);
    let (mut sent, mut failed) = drainer.join().expect("drainer panicked");

    let report = outbox
        .drain_until_empty(Duration::from_secs(30))
        .expect("final drain failed");
    sent += report.sent;
    failed += report.failed;

    StressTestResult::new(enqueued.load(Ordering::SeqCst), sent, failed, start.elapsed())
}
