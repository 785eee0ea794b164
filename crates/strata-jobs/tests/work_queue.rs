//! Multi-threaded scenarios for the job queue and worker pools.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use strata_jobs::{PoolConfig, ThreadPool};

/// Bit set with one bit per job tag, used to catch duplicate execution.
struct VisitedSet {
    words: Vec<AtomicU64>,
}

impl VisitedSet {
    fn new(bits: usize) -> Self {
        Self {
            words: (0..bits.div_ceil(64)).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    /// Mark `tag` visited, returning `false` if it already was.
    fn visit(&self, tag: usize) -> bool {
        let mask = 1u64 << (tag % 64);
        self.words[tag / 64].fetch_or(mask, Ordering::AcqRel) & mask == 0
    }

    fn count(&self) -> u32 {
        self.words
            .iter()
            .map(|w| w.load(Ordering::Acquire).count_ones())
            .sum()
    }
}

#[test]
fn capacity_jobs_on_four_consumers_run_exactly_once() {
    let mut pool = ThreadPool::new(PoolConfig::hot().with_threads(4), None).unwrap();
    let counter = Arc::new(AtomicU32::new(0));
    let visited = Arc::new(VisitedSet::new(256));
    let duplicates = Arc::new(AtomicU32::new(0));

    for tag in 0..256 {
        let counter = Arc::clone(&counter);
        let visited = Arc::clone(&visited);
        let duplicates = Arc::clone(&duplicates);
        pool.push(move || {
            counter.fetch_add(1, Ordering::Relaxed);
            if !visited.visit(tag) {
                duplicates.fetch_add(1, Ordering::Relaxed);
            }
        });
    }
    pool.flush();

    assert_eq!(counter.load(Ordering::Relaxed), 256);
    assert_eq!(visited.count(), 256);
    assert_eq!(duplicates.load(Ordering::Relaxed), 0);
}

#[test]
fn no_job_is_lost_for_any_consumer_count() {
    const JOBS: usize = 2_000;

    for threads in 1..=6 {
        let mut pool = ThreadPool::new(PoolConfig::hot().with_threads(threads), None).unwrap();
        let visited = Arc::new(VisitedSet::new(JOBS));

        // Far more jobs than slots, so the producer hits back-pressure
        for tag in 0..JOBS {
            let visited = Arc::clone(&visited);
            pool.push(move || {
                assert!(visited.visit(tag), "job {tag} ran twice");
            });
        }
        pool.flush();

        assert_eq!(visited.count() as usize, JOBS, "threads = {threads}");
        assert!(pool.queue().is_empty());
    }
}

#[test]
fn phases_gated_by_in_flight_counter() {
    let mut pool = ThreadPool::new(PoolConfig::hot().with_threads(3), None).unwrap();
    let in_flight = Arc::new(AtomicU32::new(0));
    let phase_one_done = Arc::new(AtomicU32::new(0));
    let violations = Arc::new(AtomicU32::new(0));

    in_flight.store(8, Ordering::Release);
    for _ in 0..8 {
        let in_flight = Arc::clone(&in_flight);
        let phase_one_done = Arc::clone(&phase_one_done);
        pool.push(move || {
            phase_one_done.fetch_add(1, Ordering::AcqRel);
            in_flight.fetch_sub(1, Ordering::AcqRel);
        });
    }

    // Only start phase two once every phase one job has reported back
    while in_flight.load(Ordering::Acquire) != 0 {
        std::thread::yield_now();
    }

    for _ in 0..8 {
        let phase_one_done = Arc::clone(&phase_one_done);
        let violations = Arc::clone(&violations);
        pool.push(move || {
            if phase_one_done.load(Ordering::Acquire) != 8 {
                violations.fetch_add(1, Ordering::Relaxed);
            }
        });
    }
    pool.flush();

    assert_eq!(violations.load(Ordering::Relaxed), 0);
}

#[test]
fn repeated_flushes_are_idempotent() {
    let mut pool = ThreadPool::new(PoolConfig::cold().with_threads(2), None).unwrap();
    let counter = Arc::new(AtomicU32::new(0));
    {
        let counter = Arc::clone(&counter);
        pool.push(move || {
            counter.fetch_add(1, Ordering::Relaxed);
        });
    }

    pool.flush();
    pool.flush();
    pool.flush();

    assert_eq!(counter.load(Ordering::Relaxed), 1);
    assert_eq!(pool.queue().working_count(), 0);
}
