//! Profiling macros and scope timers.

use std::time::Instant;

use crate::events::{EventCategory, TimingEvent};
use crate::profiler::{duration_ns, Profiler};

/// RAII timer that records into a [`Profiler`] on drop.
#[must_use = "a scope timer records when it is dropped"]
pub struct ScopeTimer {
    profiler: Option<Profiler>,
    category: EventCategory,
    start: Instant,
}

impl ScopeTimer {
    #[inline]
    pub(crate) fn new(profiler: Profiler, category: EventCategory) -> Self {
        Self {
            profiler: Some(profiler),
            category,
            start: Instant::now(),
        }
    }

    /// Stop the timer now, attributing the elapsed time to `hit_count` hits.
    pub fn end(mut self, hit_count: u32) {
        debug_assert!(hit_count > 0);
        self.finish(hit_count);
    }

    fn finish(&mut self, hit_count: u32) {
        if let Some(profiler) = self.profiler.take() {
            let elapsed = duration_ns(self.start.elapsed());
            profiler.record(TimingEvent::with_hits(self.category, elapsed, hit_count));
        }
    }
}

impl Drop for ScopeTimer {
    #[inline]
    fn drop(&mut self) {
        self.finish(1);
    }
}

/// Time the rest of the enclosing scope into an `Option<Profiler>`.
///
/// Expands to nothing observable when the option is `None`.
///
/// ```ignore
/// profile_scope!(self.profiler, EventCategory::RingAdvance);
/// ```
#[macro_export]
macro_rules! profile_scope {
    ($profiler:expr, $category:expr) => {
        let _profile_scope_guard = $profiler.as_ref().map(|p| p.scope($category));
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_timer_records_on_drop() {
        let profiler = Profiler::new();
        {
            let _timer = profiler.scope(EventCategory::QueueFlush);
            std::thread::sleep(std::time::Duration::from_millis(1));
        }

        let samples = profiler.drain();
        assert_eq!(samples.len(), 1);
        assert!(samples[0].duration_ns >= 1_000_000);
    }

    #[test]
    fn explicit_end_records_once_with_hits() {
        let profiler = Profiler::new();
        let timer = profiler.scope(EventCategory::JobPhase);
        timer.end(8);

        let samples = profiler.drain();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].hit_count, 8);
    }

    #[test]
    fn macro_tolerates_missing_profiler() {
        let profiler: Option<Profiler> = None;
        profile_scope!(profiler, EventCategory::Upload);
    }
}
