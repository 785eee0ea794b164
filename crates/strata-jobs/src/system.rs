//! Hot and cold worker pools.

use strata_core::Result;
use strata_profiler::Profiler;

use crate::pool::{PoolConfig, ThreadPool};

/// Configuration for both pools of a [`JobSystem`].
#[derive(Debug, Clone)]
pub struct JobSystemConfig {
    /// Pool for latency-sensitive jobs.
    pub hot: PoolConfig,
    /// Pool for background jobs.
    pub cold: PoolConfig,
}

impl Default for JobSystemConfig {
    fn default() -> Self {
        Self {
            hot: PoolConfig::hot(),
            cold: PoolConfig::cold(),
        }
    }
}

/// The two worker pools the renderer schedules onto.
pub struct JobSystem {
    hot: ThreadPool,
    cold: ThreadPool,
}

impl JobSystem {
    /// Start both pools. Both feed the same optional profiler.
    pub fn new(config: JobSystemConfig, profiler: Option<Profiler>) -> Result<Self> {
        Ok(Self {
            hot: ThreadPool::new(config.hot, profiler.clone())?,
            cold: ThreadPool::new(config.cold, profiler)?,
        })
    }

    /// The latency-sensitive pool.
    pub fn hot(&mut self) -> &mut ThreadPool {
        &mut self.hot
    }

    /// The background pool.
    pub fn cold(&mut self) -> &mut ThreadPool {
        &mut self.cold
    }

    /// Flush both pools, hot first.
    pub fn flush_all(&self) {
        self.hot.flush();
        self.cold.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn pools_are_independent() {
        let config = JobSystemConfig {
            hot: PoolConfig::hot().with_threads(2),
            cold: PoolConfig::cold().with_threads(1),
        };
        let mut jobs = JobSystem::new(config, None).unwrap();
        assert_eq!(jobs.hot().thread_count(), 2);
        assert_eq!(jobs.cold().thread_count(), 1);

        let hot_count = Arc::new(AtomicU32::new(0));
        let cold_count = Arc::new(AtomicU32::new(0));
        for _ in 0..10 {
            let hot_count = Arc::clone(&hot_count);
            jobs.hot().push(move || {
                hot_count.fetch_add(1, Ordering::Relaxed);
            });
            let cold_count = Arc::clone(&cold_count);
            jobs.cold().push(move || {
                cold_count.fetch_add(1, Ordering::Relaxed);
            });
        }
        jobs.flush_all();

        assert_eq!(hot_count.load(Ordering::Relaxed), 10);
        assert_eq!(cold_count.load(Ordering::Relaxed), 10);
    }
}
