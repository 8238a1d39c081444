//! Copy and version store benchmarks

use backwatch_core::{RetryPolicy, RetryingCopier, VersionStore};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

fn bench_copy(c: &mut Criterion) {
    let temp_dir = TempDir::new().unwrap();
    let copier = RetryingCopier::new(RetryPolicy::default());
    let mut group = c.benchmark_group("copy");

    for size in [4 * 1024, 1024 * 1024, 16 * 1024 * 1024] {
        let src = temp_dir.path().join(format!("src_{size}"));
        let dst = temp_dir.path().join(format!("dst_{size}"));
        fs::write(&src, vec![0xA5u8; size]).unwrap();

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| copier.copy(black_box(&src), black_box(&dst)).unwrap());
        });
    }

    group.finish();
}

fn bench_backup_with_eviction(c: &mut Criterion) {
    let temp_dir = TempDir::new().unwrap();
    let source_root = temp_dir.path().join("src");
    fs::create_dir_all(&source_root).unwrap();
    let file = source_root.join("notes.txt");
    fs::write(&file, b"some notes worth keeping").unwrap();

    let store = VersionStore::new(
        temp_dir.path().join("backup"),
        5,
        RetryingCopier::new(RetryPolicy::new(3, Duration::from_millis(1))),
    );

    c.bench_function("backup_small_file_cap_5", |b| {
        b.iter(|| store.create_backup(black_box(&file), &source_root).unwrap());
    });
}

criterion_group!(benches, bench_copy, bench_backup_with_eviction);
criterion_main!(benches);
