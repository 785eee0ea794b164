//! Profiler event types and statistics.

/// Categories for profiling events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCategory {
    /// CPU blocked on an execution fence.
    FenceWait,
    /// Copy engine moved to the next staging slot.
    RingAdvance,
    /// Staging upload recorded and submitted.
    Upload,
    /// Job producer stalled on a full queue.
    QueueBackpressure,
    /// Draining a job queue on the calling thread.
    QueueFlush,
    /// One phase of a procedural generation job.
    JobPhase,
    /// Custom event with ID.
    Custom(u32),
}

impl EventCategory {
    /// Get a display name for this category.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::FenceWait => "Fence Wait",
            Self::RingAdvance => "Ring Advance",
            Self::Upload => "Upload",
            Self::QueueBackpressure => "Queue Backpressure",
            Self::QueueFlush => "Queue Flush",
            Self::JobPhase => "Job Phase",
            Self::Custom(_) => "Custom",
        }
    }

    pub(crate) const fn sort_key(&self) -> u32 {
        match self {
            Self::FenceWait => 0,
            Self::RingAdvance => 1,
            Self::Upload => 2,
            Self::QueueBackpressure => 3,
            Self::QueueFlush => 4,
            Self::JobPhase => 5,
            Self::Custom(id) => 100 + *id,
        }
    }
}

/// A single timing sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingEvent {
    /// Event category.
    pub category: EventCategory,
    /// Duration in nanoseconds.
    pub duration_ns: u64,
    /// Number of logical hits covered by this sample.
    pub hit_count: u32,
}

impl TimingEvent {
    /// Create a new timing event covering one hit.
    #[must_use]
    pub const fn new(category: EventCategory, duration_ns: u64) -> Self {
        Self {
            category,
            duration_ns,
            hit_count: 1,
        }
    }

    /// Create a timing event covering `hit_count` hits.
    #[must_use]
    pub const fn with_hits(category: EventCategory, duration_ns: u64, hit_count: u32) -> Self {
        Self {
            category,
            duration_ns,
            hit_count,
        }
    }

    /// Average duration per hit.
    #[must_use]
    pub const fn per_hit_ns(&self) -> u64 {
        if self.hit_count == 0 {
            self.duration_ns
        } else {
            self.duration_ns / self.hit_count as u64
        }
    }
}

/// Aggregated statistics for a category.
#[derive(Debug, Clone, Copy)]
pub struct CategoryStats {
    /// Event category.
    pub category: EventCategory,
    /// Number of samples.
    pub count: u32,
    /// Total hits across all samples.
    pub hits: u64,
    /// Total duration in nanoseconds.
    pub total_ns: u64,
    /// Minimum per-hit duration in nanoseconds.
    pub min_ns: u64,
    /// Maximum per-hit duration in nanoseconds.
    pub max_ns: u64,
    /// Average per-hit duration in nanoseconds.
    pub avg_ns: u64,
    /// 95th percentile per-hit duration (approximate).
    pub p95_ns: u64,
}

impl CategoryStats {
    /// Create new empty stats for a category.
    #[must_use]
    pub const fn new(category: EventCategory) -> Self {
        Self {
            category,
            count: 0,
            hits: 0,
            total_ns: 0,
            min_ns: u64::MAX,
            max_ns: 0,
            avg_ns: 0,
            p95_ns: 0,
        }
    }

    /// Record a new sample.
    pub fn record(&mut self, event: &TimingEvent) {
        let per_hit = event.per_hit_ns();
        self.count += 1;
        self.hits += u64::from(event.hit_count.max(1));
        self.total_ns += event.duration_ns;
        self.min_ns = self.min_ns.min(per_hit);
        self.max_ns = self.max_ns.max(per_hit);
        self.avg_ns = self.total_ns / self.hits;
    }

    /// Get average in milliseconds.
    #[must_use]
    pub fn avg_ms(&self) -> f64 {
        self.avg_ns as f64 / 1_000_000.0
    }

    /// Get maximum in milliseconds.
    #[must_use]
    pub fn max_ms(&self) -> f64 {
        self.max_ns as f64 / 1_000_000.0
    }

    /// Get total in milliseconds.
    #[must_use]
    pub fn total_ms(&self) -> f64 {
        self.total_ns as f64 / 1_000_000.0
    }
}

/// Aggregated statistics for every category seen so far.
#[derive(Debug, Clone, Default)]
pub struct ProfilerSnapshot {
    /// Per-category statistics, sorted by category.
    pub categories: Vec<CategoryStats>,
    /// Samples dropped because the sink was full.
    pub dropped: u64,
}

impl ProfilerSnapshot {
    /// Get stats for a specific category.
    #[must_use]
    pub fn get(&self, category: EventCategory) -> Option<&CategoryStats> {
        self.categories.iter().find(|s| s.category == category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_average_per_hit() {
        let mut stats = CategoryStats::new(EventCategory::Upload);
        stats.record(&TimingEvent::with_hits(EventCategory::Upload, 1000, 4));
        stats.record(&TimingEvent::new(EventCategory::Upload, 500));

        assert_eq!(stats.count, 2);
        assert_eq!(stats.hits, 5);
        assert_eq!(stats.min_ns, 250);
        assert_eq!(stats.max_ns, 500);
        assert_eq!(stats.avg_ns, 300);
    }
}
