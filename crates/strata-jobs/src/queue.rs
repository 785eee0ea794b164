//! Lock-free single-producer / multi-consumer job queue.
//!
//! The queue is a fixed ring of [`JOB_QUEUE_CAPACITY`] slots indexed by two
//! monotonically increasing counters. The producer publishes a slot by
//! advancing `next_write`; consumers race to claim slots by compare-and-swap
//! on `next_read`. Because the counters never wrap within the lifetime of the
//! process, a successful CAS can never claim a slot from an older generation.
//!
//! A counting semaphore mirrors the number of published, unclaimed jobs so
//! idle workers can sleep instead of polling.

use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};

use crossbeam::utils::{Backoff, CachePadded};
use parking_lot::{Condvar, Mutex};
use strata_core::constants::JOB_QUEUE_CAPACITY;
use strata_profiler::{profile_scope, EventCategory, Profiler};

use crate::semaphore::Semaphore;

/// A unit of background work.
///
/// The closure owns everything it captures; there is no separate cleanup
/// step for job input.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-capacity job ring with one producer and many consumers.
pub struct WorkQueue {
    slots: Box<[AtomicPtr<Job>]>,
    next_write: CachePadded<AtomicUsize>,
    next_read: CachePadded<AtomicUsize>,
    /// Workers that are not parked on the semaphore.
    working: AtomicUsize,
    semaphore: Semaphore,

    producer_active: AtomicBool,
    producer_waiting: AtomicBool,
    space_lock: Mutex<()>,
    space_freed: Condvar,

    idle_lock: Mutex<()>,
    all_idle: Condvar,

    profiler: Option<Profiler>,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new(None)
    }
}

impl WorkQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new(profiler: Option<Profiler>) -> Self {
        let slots = (0..JOB_QUEUE_CAPACITY)
            .map(|_| AtomicPtr::new(ptr::null_mut()))
            .collect();

        Self {
            slots,
            next_write: CachePadded::new(AtomicUsize::new(0)),
            next_read: CachePadded::new(AtomicUsize::new(0)),
            working: AtomicUsize::new(0),
            semaphore: Semaphore::new(0),
            producer_active: AtomicBool::new(false),
            producer_waiting: AtomicBool::new(false),
            space_lock: Mutex::new(()),
            space_freed: Condvar::new(),
            idle_lock: Mutex::new(()),
            all_idle: Condvar::new(),
            profiler,
        }
    }

    /// Number of slots in the ring.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of published jobs not yet claimed by a consumer.
    #[must_use]
    pub fn len(&self) -> usize {
        let write = self.next_write.load(Ordering::Acquire);
        let read = self.next_read.load(Ordering::Acquire);
        write.wrapping_sub(read)
    }

    /// Whether every published job has been claimed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of registered workers that are not parked.
    #[must_use]
    pub fn working_count(&self) -> usize {
        self.working.load(Ordering::Acquire)
    }

    /// Publish a job.
    ///
    /// Only one thread may push at a time. When the ring is full the producer
    /// waits for a consumer to claim a slot instead of dropping the job.
    pub fn push<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let was_active = self.producer_active.swap(true, Ordering::Acquire);
        debug_assert!(!was_active, "WorkQueue::push called from two threads");

        let write = self.next_write.load(Ordering::Relaxed);
        if self.is_full(write) {
            profile_scope!(self.profiler, EventCategory::QueueBackpressure);
            tracing::trace!("Job queue full, waiting for a consumer");
            self.wait_for_space(write);
        }

        let boxed: Box<Job> = Box::new(Box::new(job));
        let slot = &self.slots[write % self.capacity()];
        slot.store(Box::into_raw(boxed), Ordering::Release);

        // The slot store must be visible before the index that publishes it
        self.next_write.store(write.wrapping_add(1), Ordering::Release);
        self.producer_active.store(false, Ordering::Release);

        self.semaphore.release(1);
    }

    /// Claim the oldest unclaimed job.
    ///
    /// Returns `None` if the queue is empty, which can happen when several
    /// consumers raced for the same semaphore signal.
    pub fn pop(&self) -> Option<Job> {
        loop {
            let read = self.next_read.load(Ordering::SeqCst);
            let write = self.next_write.load(Ordering::Acquire);
            if read == write {
                return None;
            }

            let job = self.slots[read % self.capacity()].load(Ordering::Acquire);
            if self
                .next_read
                .compare_exchange_weak(
                    read,
                    read.wrapping_add(1),
                    Ordering::SeqCst,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                self.notify_space();
                // SAFETY: the successful CAS gave this thread sole ownership of
                // index `read`, whose slot was written before `next_write`
                // passed it and is not rewritten until `next_read` moves on.
                let job = unsafe { Box::from_raw(job) };
                return Some(*job);
            }
        }
    }

    /// Run queued jobs on the calling thread until the queue is empty, then
    /// wait until no worker is still executing a job.
    ///
    /// Returns immediately when there is nothing queued or running.
    pub fn flush(&self) {
        if self.is_empty() && self.working_count() == 0 {
            return;
        }
        profile_scope!(self.profiler, EventCategory::QueueFlush);

        let backoff = Backoff::new();
        while !self.is_empty() {
            if self.semaphore.try_acquire() {
                self.run_claimed();
                backoff.reset();
            } else {
                // The remaining permits belong to workers about to pop
                backoff.snooze();
            }
        }

        if self.working_count() != 0 {
            let mut guard = self.idle_lock.lock();
            while self.working_count() != 0 {
                self.all_idle.wait(&mut guard);
            }
        }
    }

    /// Count a new worker as active. Called before its thread starts.
    pub(crate) fn register_worker(&self) {
        self.working.fetch_add(1, Ordering::AcqRel);
    }

    /// Stop counting a worker as active, waking flushers if it was the last.
    pub(crate) fn retire_worker(&self) {
        if self.working.fetch_sub(1, Ordering::AcqRel) == 1 {
            let _guard = self.idle_lock.lock();
            self.all_idle.notify_all();
        }
    }

    /// Take a semaphore permit, spinning briefly and then parking the worker
    /// if none shows up.
    pub(crate) fn acquire_or_park(&self) {
        let backoff = Backoff::new();
        while !backoff.is_completed() {
            if self.semaphore.try_acquire() {
                return;
            }
            backoff.snooze();
        }

        // Queue looks empty, go to sleep
        self.retire_worker();
        self.semaphore.acquire();
        self.working.fetch_add(1, Ordering::AcqRel);
    }

    /// Wake `count` parked workers without publishing work.
    pub(crate) fn wake(&self, count: usize) {
        self.semaphore.release(count);
    }

    /// Pop and run one job whose semaphore permit the caller already holds.
    pub(crate) fn run_claimed(&self) {
        match self.pop() {
            Some(job) => run_job(job),
            None => {
                // A held permit guarantees a published job
                debug_assert!(false, "semaphore signalled with an empty job queue");
                tracing::error!("Semaphore signalled with an empty job queue");
            }
        }
    }

    fn is_full(&self, write: usize) -> bool {
        write.wrapping_sub(self.next_read.load(Ordering::SeqCst)) >= self.capacity()
    }

    fn wait_for_space(&self, write: usize) {
        let backoff = Backoff::new();
        while self.is_full(write) {
            if backoff.is_completed() {
                let mut guard = self.space_lock.lock();
                self.producer_waiting.store(true, Ordering::SeqCst);
                while self.is_full(write) {
                    self.space_freed.wait(&mut guard);
                }
                self.producer_waiting.store(false, Ordering::SeqCst);
                return;
            }
            backoff.snooze();
        }
    }

    fn notify_space(&self) {
        if self.producer_waiting.load(Ordering::SeqCst) {
            let _guard = self.space_lock.lock();
            self.space_freed.notify_one();
        }
    }
}

impl Drop for WorkQueue {
    fn drop(&mut self) {
        let read = *self.next_read.get_mut();
        let write = *self.next_write.get_mut();
        let capacity = self.slots.len();

        let mut index = read;
        while index != write {
            let job = self.slots[index % capacity].swap(ptr::null_mut(), Ordering::Relaxed);
            if !job.is_null() {
                // SAFETY: published but never claimed, so still owned by the queue.
                drop(unsafe { Box::from_raw(job) });
            }
            index = index.wrapping_add(1);
        }
    }
}

/// Run a job, containing any panic so the worker keeps its bookkeeping.
pub(crate) fn run_job(job: Job) {
    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
        tracing::error!("Job panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    #[test]
    fn idle_worker_parks_after_spinning_and_wakes_on_release() {
        let queue = Arc::new(WorkQueue::default());
        queue.register_worker();

        let worker = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || queue.acquire_or_park())
        };

        // Still counted as working while it spins; retired once parked.
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while queue.working_count() != 0 {
            assert!(std::time::Instant::now() < deadline, "worker never parked");
            std::thread::yield_now();
        }

        queue.wake(1);
        worker.join().unwrap();
        assert_eq!(queue.working_count(), 1);
    }

    #[test]
    fn pending_permit_is_taken_without_parking() {
        let queue = WorkQueue::default();
        queue.register_worker();
        queue.wake(1);

        queue.acquire_or_park();
        assert_eq!(queue.working_count(), 1);
    }

    #[test]
    fn pop_empty_returns_none() {
        let queue = WorkQueue::default();
        assert!(queue.pop().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn single_consumer_is_fifo() {
        let queue = WorkQueue::default();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..10 {
            let order = Arc::clone(&order);
            queue.push(move || order.lock().push(i));
        }
        assert_eq!(queue.len(), 10);

        while let Some(job) = queue.pop() {
            job();
        }
        assert_eq!(*order.lock(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn indices_keep_working_past_capacity() {
        let queue = WorkQueue::default();
        let counter = Arc::new(AtomicU32::new(0));

        for _ in 0..(queue.capacity() * 3 + 7) {
            let counter = Arc::clone(&counter);
            queue.push(move || {
                counter.fetch_add(1, Ordering::Relaxed);
            });
            queue.pop().unwrap()();
        }

        assert_eq!(counter.load(Ordering::Relaxed), 3 * 256 + 7);
        assert!(queue.is_empty());
    }

    #[test]
    fn full_ring_holds_capacity_jobs() {
        let queue = WorkQueue::default();
        for _ in 0..queue.capacity() {
            queue.push(|| {});
        }
        assert_eq!(queue.len(), queue.capacity());
        assert!(queue.is_full(queue.next_write.load(Ordering::Relaxed)));
    }

    #[test]
    fn flush_on_empty_queue_returns_immediately() {
        let queue = WorkQueue::default();
        queue.flush();
        queue.flush();
        assert!(queue.is_empty());
    }

    #[test]
    fn flush_runs_pending_jobs_on_caller() {
        let queue = WorkQueue::default();
        let counter = Arc::new(AtomicU32::new(0));
        for _ in 0..5 {
            let counter = Arc::clone(&counter);
            queue.push(move || {
                counter.fetch_add(1, Ordering::Relaxed);
            });
        }

        queue.flush();
        assert_eq!(counter.load(Ordering::Relaxed), 5);
        assert_eq!(queue.semaphore.available_permits(), 0);
    }

    #[test]
    fn dropping_queue_releases_unclaimed_jobs() {
        let payload = Arc::new(());
        {
            let queue = WorkQueue::default();
            for _ in 0..3 {
                let payload = Arc::clone(&payload);
                queue.push(move || drop(payload));
            }
            assert_eq!(Arc::strong_count(&payload), 4);
        }
        assert_eq!(Arc::strong_count(&payload), 1);
    }

    #[test]
    fn panicking_job_is_contained() {
        let queue = WorkQueue::default();
        queue.push(|| panic!("job failure"));
        queue.flush();
        assert!(queue.is_empty());
    }

    #[test]
    fn backpressure_records_profile_sample() {
        let profiler = Profiler::new();
        let queue = Arc::new(WorkQueue::new(Some(profiler.clone())));
        for _ in 0..queue.capacity() {
            queue.push(|| {});
        }

        let consumer = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || {
                std::thread::sleep(std::time::Duration::from_millis(20));
                queue.pop().unwrap()();
            })
        };

        // Blocks until the consumer frees a slot
        queue.push(|| {});
        consumer.join().unwrap();

        let samples = profiler.drain();
        assert!(samples
            .iter()
            .any(|s| s.category == EventCategory::QueueBackpressure));
    }
}
