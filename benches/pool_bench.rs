//! Benchmarks for the request router.
//!
//! Covers the hot paths a front end exercises per request:
//! - no-op gets against an existing group
//! - session bind/release against an idle worker
//! - pool snapshots under a populated registry

use std::hint::black_box;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};

use procpool::config::PoolConfig;
use procpool::core::{GetOptions, Pool, SpawnError, SpawnedProcess, Spawner, SpawnerFactory};
use procpool::infra::LocalGroupFactory;

struct BenchSpawner {
    pids: AtomicU32,
}

impl Spawner for BenchSpawner {
    fn spawn_process(&self) -> Result<SpawnedProcess, SpawnError> {
        let pid = self.pids.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SpawnedProcess {
            pid,
            gupid: format!("{pid}-bench"),
        })
    }
}

struct BenchSpawnerFactory;

impl SpawnerFactory for BenchSpawnerFactory {
    fn create(&self, _options: &GetOptions) -> Arc<dyn Spawner> {
        Arc::new(BenchSpawner {
            pids: AtomicU32::new(0),
        })
    }
}

fn build_pool(max: u32) -> Arc<Pool> {
    let pool = Pool::new(
        PoolConfig::new().with_max(max),
        Arc::new(LocalGroupFactory),
        Arc::new(BenchSpawnerFactory),
    )
    .expect("valid configuration");
    pool.initialize();
    pool
}

fn bench_noop_get(c: &mut Criterion) {
    let pool = build_pool(8);
    let options = GetOptions::new("app").with_min_processes(0).with_noop(true);
    // First call creates the group; the loop measures the hit path.
    drop(pool.get(&options).unwrap());

    c.bench_function("noop_get_existing_group", |b| {
        b.iter(|| {
            let session = pool.get(black_box(&options)).unwrap();
            black_box(&session);
        });
    });

    pool.destroy();
}

fn bench_session_roundtrip(c: &mut Criterion) {
    let pool = build_pool(8);
    let options = GetOptions::new("app");
    // Warm one worker so every iteration reuses it.
    drop(pool.get(&options).unwrap());

    c.bench_function("get_reuse_idle_worker", |b| {
        b.iter(|| {
            let session = pool.get(black_box(&options)).unwrap();
            black_box(&session);
        });
    });

    pool.destroy();
}

fn bench_snapshot(c: &mut Criterion) {
    let pool = build_pool(32);
    for i in 0..16 {
        drop(pool.get(&GetOptions::new(format!("app-{i}"))).unwrap());
    }

    c.bench_function("snapshot_16_groups", |b| {
        b.iter(|| black_box(pool.snapshot()));
    });

    pool.destroy();
}

criterion_group!(
    benches,
    bench_noop_get,
    bench_session_roundtrip,
    bench_snapshot
);
criterion_main!(benches);
