//! Job queue throughput benchmarks.

use std::hint::black_box;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use strata_jobs::{PoolConfig, ThreadPool, WorkQueue};

fn bench_push_pop_single_thread(c: &mut Criterion) {
    let queue = WorkQueue::default();
    c.bench_function("push_pop_single_thread", |b| {
        b.iter(|| {
            queue.push(|| {
                black_box(0u32);
            });
            queue.pop().unwrap()();
        });
    });
}

fn bench_push_flush(c: &mut Criterion) {
    let mut group = c.benchmark_group("push_flush_256");

    for threads in [1, 2, 4] {
        let mut pool = ThreadPool::new(PoolConfig::hot().with_threads(threads), None).unwrap();
        let sum = Arc::new(AtomicU64::new(0));

        group.bench_with_input(BenchmarkId::from_parameter(threads), &threads, |b, _| {
            b.iter(|| {
                for i in 0..256u64 {
                    let sum = Arc::clone(&sum);
                    pool.push(move || {
                        sum.fetch_add(black_box(i), Ordering::Relaxed);
                    });
                }
                pool.flush();
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_push_pop_single_thread, bench_push_flush);
criterion_main!(benches);
