//! Benchmarks for the tagged pool.
//!
//! Benchmarks cover:
//! - Token acquire/release on a single tag pool
//! - Submit-and-join throughput through the gate and result monitor
//! - Ingest streams drained through the result iterator
//! - Elastic transfers between a tag and the general pool

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

use tagged_pool::config::PollIntervals;
use tagged_pool::core::{Tag, TagPool, TokenPool};

fn bench_intervals() -> PollIntervals {
    PollIntervals {
        monitor_ms: 1,
        admission_ms: 5,
        iterator_ms: 5,
        join_ms: 1,
    }
}

// ============================================================================
// Token Benchmarks
// ============================================================================

fn bench_token_acquire_release(c: &mut Criterion) {
    let mut group = c.benchmark_group("token_acquire_release");

    for capacity in [1usize, 16, 256] {
        let pool = Arc::new(TokenPool::new(Tag::named("bench"), capacity));
        group.throughput(Throughput::Elements(capacity as u64));
        group.bench_with_input(BenchmarkId::from_parameter(capacity), &capacity, |b, &capacity| {
            b.iter(|| {
                let permits: Vec<_> = (0..capacity)
                    .filter_map(|_| pool.try_acquire_for(Duration::ZERO))
                    .collect();
                black_box(permits.len());
            });
        });
    }
    group.finish();
}

// ============================================================================
// Pool Benchmarks
// ============================================================================

fn bench_put_and_join(c: &mut Criterion) {
    let mut group = c.benchmark_group("put_and_join");
    group.sample_size(20);

    for task_count in [10u64, 100] {
        let pool = TagPool::<u64>::builder()
            .tag("bench", 4)
            .limit(8)
            .intervals(bench_intervals())
            .build()
            .expect("pool should build");

        group.throughput(Throughput::Elements(task_count));
        group.bench_with_input(
            BenchmarkId::from_parameter(task_count),
            &task_count,
            |b, &task_count| {
                b.iter(|| {
                    for i in 0..task_count {
                        pool.put("bench", move || Ok(black_box(i * 2)))
                            .expect("put should succeed");
                    }
                    pool.join().expect("join should succeed");
                });
            },
        );
    }
    group.finish();
}

fn bench_ingest_iterate(c: &mut Criterion) {
    let mut group = c.benchmark_group("ingest_iterate");
    group.sample_size(10);

    group.bench_function("ingest_1000_sum", |b| {
        b.iter(|| {
            let pool = TagPool::<u64>::builder()
                .tag("test", 2)
                .limit(4)
                .iteration(true)
                .intervals(bench_intervals())
                .build()
                .expect("pool should build");
            pool.ingest(0..1_000u64, "test", |n| Ok(n))
                .expect("ingest should start");
            let sum: u64 = pool.iter().expect("iteration enabled").sum();
            black_box(sum);
        });
    });
    group.finish();
}

fn bench_adjust_transfer(c: &mut Criterion) {
    let pool = TagPool::<()>::builder()
        .tag("gpu", 1)
        .limit(16)
        .intervals(bench_intervals())
        .build()
        .expect("pool should build");

    c.bench_function("adjust_transfer_round_trip", |b| {
        b.iter(|| {
            pool.adjust("gpu", 8, true).expect("grow should succeed");
            pool.adjust("gpu", 1, true).expect("shrink should succeed");
        });
    });
}

criterion_group!(token_benches, bench_token_acquire_release);

criterion_group!(
    pool_benches,
    bench_put_and_join,
    bench_ingest_iterate,
    bench_adjust_transfer
);

criterion_main!(token_benches, pool_benches);
