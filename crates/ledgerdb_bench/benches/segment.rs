//! Segment store benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ledgerdb_bench::random_data;
use ledgerdb_core::{Config, Location, RecordParser, SegmentStore};
use tempfile::TempDir;

fn open_store(dir: &TempDir) -> SegmentStore {
    let config = Config::new()
        .max_segment_size(4 * 1024 * 1024)
        .lock_directory(false);
    SegmentStore::open(dir.path(), &config).unwrap()
}

/// Benchmark appending blocks, including rotation.
fn bench_segment_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("segment_write");

    for size in [256, 1024, 16 * 1024].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let dir = TempDir::new().unwrap();
            let store = open_store(&dir);
            let data = random_data(size);

            b.iter(|| {
                let location = store.write(black_box(&data)).unwrap();
                black_box(location);
            });
        });
    }

    group.finish();
}

/// Benchmark point reads spread over several segments, exercising the
/// handle pool.
fn bench_segment_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("segment_read");

    for size in [256, 4096].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let dir = TempDir::new().unwrap();
            let config = Config::new().max_segment_size(64 * 1024).lock_directory(false);
            let store = SegmentStore::open(dir.path(), &config).unwrap();
            let data = random_data(size);
            let locations: Vec<Location> = (0..1_000).map(|_| store.write(&data).unwrap()).collect();

            let mut i = 0;
            b.iter(|| {
                let location = locations[i % locations.len()];
                i = i.wrapping_add(7919);
                black_box(store.read(black_box(location)).unwrap());
            });
        });
    }

    group.finish();
}

/// Benchmark streaming a run of blocks through a record parser.
fn bench_segment_read_range(c: &mut Criterion) {
    let mut group = c.benchmark_group("segment_read_range");

    for count in [100, 1_000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let dir = TempDir::new().unwrap();
            let store = open_store(&dir);
            let data = random_data(1024);
            let locations: Vec<Location> = (0..count).map(|_| store.write(&data).unwrap()).collect();
            let (first, last) = (locations[0], locations[count - 1]);

            b.iter(|| {
                let mut parser = RecordParser::new();
                store.read_range(first, last, &mut parser).unwrap();
                black_box(parser.finish().unwrap());
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_segment_write,
    bench_segment_read,
    bench_segment_read_range,
);

criterion_main!(benches);
