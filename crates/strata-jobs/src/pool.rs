//! Worker thread pool draining a [`WorkQueue`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use strata_core::{Error, Result};
use strata_profiler::Profiler;

use crate::queue::WorkQueue;

/// Scheduling class of a pool.
///
/// Both classes run the same design; they differ only in how many threads
/// they get and in the thread names the OS reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolPriority {
    /// Latency-sensitive jobs the current frame is waiting on.
    Hot,
    /// Background jobs that may take several frames.
    Cold,
}

impl PoolPriority {
    const fn label(self) -> &'static str {
        match self {
            Self::Hot => "hot",
            Self::Cold => "cold",
        }
    }
}

/// Configuration for a single worker pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Name used for worker threads and log lines.
    pub name: String,
    /// Number of worker threads.
    pub thread_count: usize,
    /// Scheduling class.
    pub priority: PoolPriority,
}

impl PoolConfig {
    /// Pool for latency-sensitive work, sized to leave one core for the
    /// producing thread.
    #[must_use]
    pub fn hot() -> Self {
        let cores = thread::available_parallelism().map_or(2, std::num::NonZeroUsize::get);
        Self {
            name: "strata-hot".to_string(),
            thread_count: cores
                .saturating_sub(1)
                .max(strata_core::constants::MIN_HOT_POOL_THREADS),
            priority: PoolPriority::Hot,
        }
    }

    /// Pool for background work.
    #[must_use]
    pub fn cold() -> Self {
        Self {
            name: "strata-cold".to_string(),
            thread_count: strata_core::constants::COLD_POOL_THREADS,
            priority: PoolPriority::Cold,
        }
    }

    /// Override the thread count.
    #[must_use]
    pub fn with_threads(mut self, thread_count: usize) -> Self {
        self.thread_count = thread_count;
        self
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::hot()
    }
}

struct Shared {
    queue: WorkQueue,
    shutdown: AtomicBool,
}

/// A fixed set of OS threads executing jobs from one [`WorkQueue`].
///
/// The pool owner is the queue's only producer, which is why [`push`] takes
/// `&mut self`. Dropping the pool runs every queued job to completion before
/// joining the workers.
///
/// [`push`]: ThreadPool::push
pub struct ThreadPool {
    shared: Arc<Shared>,
    threads: Vec<JoinHandle<()>>,
    config: PoolConfig,
}

impl ThreadPool {
    /// Spawn the pool's worker threads.
    pub fn new(config: PoolConfig, profiler: Option<Profiler>) -> Result<Self> {
        if config.thread_count == 0 {
            return Err(Error::InvalidConfig(format!(
                "pool '{}' needs at least one thread",
                config.name
            )));
        }

        let shared = Arc::new(Shared {
            queue: WorkQueue::new(profiler),
            shutdown: AtomicBool::new(false),
        });

        let mut pool = Self {
            shared,
            threads: Vec::with_capacity(config.thread_count),
            config,
        };

        for index in 0..pool.config.thread_count {
            pool.shared.queue.register_worker();
            let shared = Arc::clone(&pool.shared);
            let spawned = thread::Builder::new()
                .name(format!("{}-{index}", pool.config.name))
                .spawn(move || worker_loop(&shared));
            match spawned {
                Ok(handle) => pool.threads.push(handle),
                Err(e) => {
                    pool.shared.queue.retire_worker();
                    return Err(Error::Thread(e.to_string()));
                }
            }
        }

        tracing::info!(
            "Started {} pool '{}' with {} threads",
            pool.config.priority.label(),
            pool.config.name,
            pool.config.thread_count
        );

        Ok(pool)
    }

    /// Queue a job for execution on a worker thread.
    pub fn push<F>(&mut self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.queue.push(job);
    }

    /// Run remaining jobs on the calling thread and wait for all workers to
    /// go idle.
    pub fn flush(&self) {
        self.shared.queue.flush();
    }

    /// The queue this pool drains.
    #[must_use]
    pub fn queue(&self) -> &WorkQueue {
        &self.shared.queue
    }

    /// Number of worker threads.
    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    /// The pool's configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    fn shutdown(&mut self) {
        if self.threads.is_empty() {
            return;
        }

        self.flush();
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.queue.wake(self.threads.len());

        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                tracing::error!("Worker thread of pool '{}' panicked", self.config.name);
            }
        }
        tracing::info!("Stopped pool '{}'", self.config.name);
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        shared.queue.acquire_or_park();
        if shared.shutdown.load(Ordering::Acquire) {
            return;
        }
        shared.queue.run_claimed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    #[test]
    fn zero_threads_is_rejected() {
        let result = ThreadPool::new(PoolConfig::cold().with_threads(0), None);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn flush_on_idle_pool_returns_immediately() {
        let pool = ThreadPool::new(PoolConfig::cold().with_threads(2), None).unwrap();
        // Give the workers time to park
        thread::sleep(Duration::from_millis(20));
        pool.flush();
        pool.flush();
        assert_eq!(pool.queue().working_count(), 0);
    }

    #[test]
    fn workers_execute_jobs() {
        let mut pool = ThreadPool::new(PoolConfig::hot().with_threads(3), None).unwrap();
        let counter = Arc::new(AtomicU32::new(0));

        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            pool.push(move || {
                counter.fetch_add(1, Ordering::Relaxed);
            });
        }
        pool.flush();

        assert_eq!(counter.load(Ordering::Relaxed), 100);
        assert_eq!(pool.queue().working_count(), 0);
    }

    #[test]
    fn jobs_run_off_the_producer_thread() {
        let mut pool = ThreadPool::new(PoolConfig::cold().with_threads(1), None).unwrap();
        let (tx, rx) = std::sync::mpsc::channel();
        pool.push(move || {
            tx.send(thread::current().name().map(str::to_owned)).unwrap();
        });

        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("strata-cold-0"));
    }

    #[test]
    fn drop_completes_queued_work() {
        let counter = Arc::new(AtomicU32::new(0));
        {
            let mut pool = ThreadPool::new(PoolConfig::cold().with_threads(2), None).unwrap();
            for _ in 0..50 {
                let counter = Arc::clone(&counter);
                pool.push(move || {
                    thread::sleep(Duration::from_micros(100));
                    counter.fetch_add(1, Ordering::Relaxed);
                });
            }
        }
        assert_eq!(counter.load(Ordering::Relaxed), 50);
    }
}
