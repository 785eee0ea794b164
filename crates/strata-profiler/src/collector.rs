//! Event collection and aggregation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::queue::ArrayQueue;
use parking_lot::Mutex;

use crate::events::{CategoryStats, EventCategory, ProfilerSnapshot, TimingEvent};

/// Capacity of the pending event queue.
const BUFFER_SIZE: usize = 4096;

/// Number of recent samples to keep for percentile calculations.
const SAMPLE_HISTORY_SIZE: usize = 100;

#[derive(Default)]
struct Aggregate {
    stats: HashMap<EventCategory, CategoryStats>,
    samples: HashMap<EventCategory, Vec<u64>>,
}

/// Collects and aggregates profiling events.
///
/// Recording is lock-free and may happen from any thread; aggregation takes
/// a lock and runs on whichever thread drains the collector.
pub struct Collector {
    buffer: ArrayQueue<TimingEvent>,
    dropped: AtomicU64,
    aggregate: Mutex<Aggregate>,
}

impl Default for Collector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector {
    /// Create a new collector.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: ArrayQueue::new(BUFFER_SIZE),
            dropped: AtomicU64::new(0),
            aggregate: Mutex::new(Aggregate::default()),
        }
    }

    /// Record a timing event.
    pub fn record(&self, event: TimingEvent) {
        // Losing samples under pressure is acceptable for profiling
        if self.buffer.push(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Fold all pending events into the statistics and return them.
    pub fn drain(&self) -> Vec<TimingEvent> {
        let mut events = Vec::with_capacity(self.buffer.len());
        while let Some(event) = self.buffer.pop() {
            events.push(event);
        }

        let mut aggregate = self.aggregate.lock();
        let Aggregate { stats, samples } = &mut *aggregate;
        for event in &events {
            let stats = stats
                .entry(event.category)
                .or_insert_with(|| CategoryStats::new(event.category));
            stats.record(event);

            let history = samples
                .entry(event.category)
                .or_insert_with(|| Vec::with_capacity(SAMPLE_HISTORY_SIZE));
            if history.len() >= SAMPLE_HISTORY_SIZE {
                history.remove(0);
            }
            history.push(event.per_hit_ns());

            if history.len() >= 10 {
                let mut sorted = history.clone();
                sorted.sort_unstable();
                stats.p95_ns = sorted[(sorted.len() * 95) / 100];
            }
        }

        events
    }

    /// Reset all statistics. Pending events are discarded.
    pub fn reset(&self) {
        while self.buffer.pop().is_some() {}
        let mut aggregate = self.aggregate.lock();
        aggregate.stats.clear();
        aggregate.samples.clear();
        self.dropped.store(0, Ordering::Relaxed);
    }

    /// Get a snapshot of the aggregated statistics.
    #[must_use]
    pub fn snapshot(&self) -> ProfilerSnapshot {
        let aggregate = self.aggregate.lock();
        let mut categories: Vec<CategoryStats> = aggregate.stats.values().copied().collect();
        categories.sort_by_key(|s| s.category.sort_key());

        ProfilerSnapshot {
            categories,
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}
