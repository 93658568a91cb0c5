//! Record store and envelope benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ferry_bench::random_data;
use ferry_codec::Envelope;
use ferry_migrate::{JobId, MigrationDirection, MigrationSession};
use ferry_storage::{FileStore, InMemoryStore, RecordStore, StoreConfig};
use tempfile::TempDir;

/// Benchmark InMemoryStore puts.
fn bench_inmemory_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("inmemory_put");

    for size in [64, 1024, 4096].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let store = InMemoryStore::new();
            let data = random_data(size);

            b.iter(|| {
                store.put(black_box("record/bench"), black_box(&data)).unwrap();
            });
        });
    }

    group.finish();
}

/// Benchmark FileStore puts with and without fsync.
fn bench_file_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("file_put");
    // File operations are slow
    group.sample_size(20);

    for sync in [false, true].iter() {
        group.bench_with_input(BenchmarkId::new("sync", sync), sync, |b, &sync| {
            let temp_dir = TempDir::new().unwrap();
            let store = FileStore::open(
                temp_dir.path(),
                StoreConfig::new().sync_on_write(sync),
            )
            .unwrap();
            let data = random_data(1024);

            b.iter(|| {
                store.put("record/bench", black_box(&data)).unwrap();
            });
        });
    }

    group.finish();
}

fn session(keys: usize) -> MigrationSession {
    let mut session = MigrationSession::new(
        JobId::new("bench").unwrap(),
        MigrationDirection::LocalToCloud,
        (0..keys).map(|i| format!("rec-{i:07}")).collect(),
        0,
        100,
        0,
    );
    let half: Vec<_> = session.next_batch(keys / 2);
    session.commit_batch(&half, 0, 0).unwrap();
    session
}

/// Benchmark checkpoint envelope encoding and decoding.
fn bench_checkpoint_envelope(c: &mut Criterion) {
    let mut group = c.benchmark_group("checkpoint_envelope");

    for keys in [100, 10_000].iter() {
        let session = session(*keys);
        let bytes = session.to_envelope().unwrap();

        group.throughput(Throughput::Bytes(bytes.len() as u64));
        group.bench_with_input(BenchmarkId::new("encode", keys), &session, |b, session| {
            b.iter(|| black_box(session.to_envelope().unwrap()));
        });
        group.bench_with_input(BenchmarkId::new("decode", keys), &bytes, |b, bytes| {
            b.iter(|| black_box(MigrationSession::from_envelope(black_box(bytes)).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_inmemory_put,
    bench_file_put,
    bench_checkpoint_envelope
);
criterion_main!(benches);
