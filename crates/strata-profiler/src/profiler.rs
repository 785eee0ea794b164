//! Shareable profiler handle.

use std::sync::Arc;
use std::time::Duration;

use crate::collector::Collector;
use crate::events::{EventCategory, ProfilerSnapshot, TimingEvent};
use crate::macros::ScopeTimer;

/// Cloneable handle to a timing sink.
///
/// All clones feed the same collector. The sink lives as long as its last
/// handle.
#[derive(Clone, Default)]
pub struct Profiler {
    collector: Arc<Collector>,
}

impl std::fmt::Debug for Profiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Profiler").finish_non_exhaustive()
    }
}

impl Profiler {
    /// Create a new, empty profiler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a timing event.
    #[inline]
    pub fn record(&self, event: TimingEvent) {
        self.collector.record(event);
    }

    /// Record a duration for a category.
    #[inline]
    pub fn record_duration(&self, category: EventCategory, duration: Duration) {
        self.record(TimingEvent::new(category, duration_ns(duration)));
    }

    /// Start a timer that records into this profiler when dropped.
    #[inline]
    #[must_use]
    pub fn scope(&self, category: EventCategory) -> ScopeTimer {
        ScopeTimer::new(self.clone(), category)
    }

    /// Fold pending samples into the statistics and return the raw samples.
    pub fn drain(&self) -> Vec<TimingEvent> {
        self.collector.drain()
    }

    /// Aggregated statistics of everything drained so far.
    #[must_use]
    pub fn snapshot(&self) -> ProfilerSnapshot {
        self.collector.snapshot()
    }

    /// Reset all profiling statistics.
    pub fn reset(&self) {
        self.collector.reset();
    }

    /// Emit one `debug` line per category.
    pub fn log_summary(&self) {
        self.drain();
        for stats in self.snapshot().categories {
            tracing::debug!(
                "Timer {:<20} {:>8} hits, avg {:.3} ms, max {:.3} ms, p95 {:.3} ms",
                stats.category.name(),
                stats.hits,
                stats.avg_ms(),
                stats.max_ms(),
                stats.p95_ns as f64 / 1_000_000.0
            );
        }
    }
}

pub(crate) fn duration_ns(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}
