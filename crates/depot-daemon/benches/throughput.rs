//! Lock and transfer benchmarks
//!
//! Benchmarks for measuring:
//! - Registry lookup cost (hit and first-use paths)
//! - Uncontended read/write lock acquisition
//! - Staged upload and locked download through `Storage`
//!
//! Run with: cargo bench --bench throughput -p depot-daemon

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tokio::runtime::Runtime;

use depot_core::{LockConfig, StorageConfig};
use depot_daemon::{LockRegistry, Storage};

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to build runtime")
}

/// Benchmark name → lock resolution
fn bench_registry(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry");

    let registry = LockRegistry::default();
    let _held = registry.resolve("hot.bin");

    group.bench_function("resolve_existing", |b| {
        b.iter(|| black_box(registry.resolve(black_box("hot.bin"))))
    });

    let mut counter = 0u64;
    group.bench_function("resolve_and_evict", |b| {
        b.iter(|| {
            counter += 1;
            let name = format!("cold-{}", counter);
            drop(registry.resolve(&name));
            black_box(registry.evict_if_idle(&name))
        })
    });

    group.finish();
}

/// Benchmark uncontended lock acquire/release
fn bench_lock(c: &mut Criterion) {
    let mut group = c.benchmark_group("file_lock");
    let rt = runtime();
    let registry = LockRegistry::default();
    let lock = registry.resolve("file.txt");

    group.bench_function("read_release", |b| {
        b.iter(|| rt.block_on(async { drop(black_box(lock.read().await)) }))
    });

    group.bench_function("write_release", |b| {
        b.iter(|| rt.block_on(async { drop(black_box(lock.write().await)) }))
    });

    group.finish();
}

/// Benchmark a full staged upload followed by a locked download
fn bench_storage(c: &mut Criterion) {
    let mut group = c.benchmark_group("storage");
    let rt = runtime();
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let config = StorageConfig {
        root: dir.path().to_path_buf(),
        ..StorageConfig::default()
    };
    let storage = Storage::open(&config, LockConfig::default()).expect("failed to open storage");

    for (label, size) in [("4KB", 4 * 1024), ("1MB", 1024 * 1024)] {
        let data: Vec<u8> = (0..size).map(|i| (i % 256) as u8).collect();
        let chunk = storage.chunk_size();

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("upload_download", label), &data, |b, data| {
            b.iter(|| {
                rt.block_on(async {
                    let mut upload = storage
                        .begin_upload("bench.bin", data.len() as u64)
                        .await
                        .expect("begin upload");
                    for piece in data.chunks(chunk) {
                        upload.write(piece).await.expect("write");
                    }
                    upload.commit().await.expect("commit");

                    let mut download = storage.open_read("bench.bin").await.expect("open");
                    let mut buf = vec![0u8; chunk];
                    let mut total = 0usize;
                    loop {
                        let n = download.read(&mut buf).await.expect("read");
                        if n == 0 {
                            break;
                        }
                        total += n;
                    }
                    black_box(total)
                })
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_registry, bench_lock, bench_storage);
criterion_main!(benches);
