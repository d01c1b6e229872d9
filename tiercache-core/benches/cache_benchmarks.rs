//! Cache operation benchmarks for both backends

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;
use tiercache_core::{BackendKind, Cache, CacheSettings, ScoredMember};

fn open_cache(kind: BackendKind, dir: &TempDir) -> Cache {
    let settings = CacheSettings {
        backend: kind,
        prefix: "bench:".to_string(),
        file_path: dir.path().join("bench.db"),
        ..CacheSettings::default()
    };
    Cache::open(&settings).unwrap()
}

fn bench_scalar_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("scalar_operations");

    for kind in [BackendKind::Memory, BackendKind::File] {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(kind, &dir);

        group.bench_function(BenchmarkId::new("set_small", kind), |b| {
            b.iter(|| cache.set(black_box("key"), "small_value", None).unwrap());
        });

        group.bench_function(BenchmarkId::new("set_compressed", kind), |b| {
            let value = "x".repeat(8 * 1024);
            b.iter(|| cache.set(black_box("large"), value.as_str(), None).unwrap());
        });

        for i in 0..1000 {
            cache.set(&format!("get_key_{}", i), format!("value_{}", i), None).unwrap();
        }

        // Served from the overlay after the first read on the file backend
        group.bench_function(BenchmarkId::new("get_existing", kind), |b| {
            b.iter(|| cache.get(black_box("get_key_42")).unwrap());
        });

        group.bench_function(BenchmarkId::new("get_missing", kind), |b| {
            b.iter(|| cache.get(black_box("nonexistent")).is_err());
        });

        group.bench_function(BenchmarkId::new("incr", kind), |b| {
            b.iter(|| cache.incr(black_box("counter")).unwrap());
        });
    }

    group.finish();
}

fn bench_structures(c: &mut Criterion) {
    let mut group = c.benchmark_group("structures");

    for kind in [BackendKind::Memory, BackendKind::File] {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(kind, &dir);

        let mut field = 0u64;
        group.bench_function(BenchmarkId::new("hset", kind), |b| {
            b.iter(|| {
                field += 1;
                cache.hset("hash", [(format!("f{}", field % 512), "v")]).unwrap()
            });
        });

        group.bench_function(BenchmarkId::new("rpush_lpop", kind), |b| {
            b.iter(|| {
                cache.rpush("queue", ["job"]).unwrap();
                cache.lpop("queue").unwrap()
            });
        });

        let members: Vec<ScoredMember> = (0..500)
            .map(|i| ScoredMember::new(i as f64, format!("m{}", i)))
            .collect();
        cache.zadd("board", &members).unwrap();

        group.bench_function(BenchmarkId::new("zrange_top10", kind), |b| {
            b.iter(|| cache.zrange(black_box("board"), 0, 9).unwrap());
        });
    }

    group.finish();
}

fn bench_concurrent(c: &mut Criterion) {
    let mut group = c.benchmark_group("concurrent");
    group.sample_size(20);

    for kind in [BackendKind::Memory, BackendKind::File] {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(open_cache(kind, &dir));

        for i in 0..1000 {
            cache.set(&format!("mixed_key_{}", i), format!("value_{}", i), None).unwrap();
        }

        group.bench_function(BenchmarkId::new("mixed_workload", kind), |b| {
            b.iter(|| {
                let mut handles = Vec::new();

                // 70% GET, 30% SET
                for thread_id in 0..4 {
                    let cache = cache.clone();
                    handles.push(thread::spawn(move || {
                        for i in 0..100 {
                            if i % 10 < 7 {
                                let key = format!("mixed_key_{}", (thread_id * 100 + i) % 1000);
                                let _ = cache.get(&key);
                            } else {
                                let key = format!("thread_{}_key_{}", thread_id, i);
                                cache.set(&key, "new_value", None).unwrap();
                            }
                        }
                    }));
                }

                for handle in handles {
                    handle.join().unwrap();
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_scalar_operations, bench_structures, bench_concurrent);
criterion_main!(benches);
