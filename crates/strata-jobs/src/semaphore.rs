//! Counting semaphore.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// A counting semaphore.
///
/// `std` has no semaphore; this one pairs a permit counter with a condition
/// variable so blocked waiters sleep instead of spinning.
#[derive(Default)]
pub struct Semaphore {
    permits: Mutex<usize>,
    available: Condvar,
}

impl Semaphore {
    /// Create a semaphore holding `permits` permits.
    #[must_use]
    pub const fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits),
            available: Condvar::new(),
        }
    }

    /// Take a permit if one is available, without blocking.
    pub fn try_acquire(&self) -> bool {
        let mut permits = self.permits.lock();
        if *permits > 0 {
            *permits -= 1;
            true
        } else {
            false
        }
    }

    /// Block until a permit is available and take it.
    pub fn acquire(&self) {
        let mut permits = self.permits.lock();
        while *permits == 0 {
            self.available.wait(&mut permits);
        }
        *permits -= 1;
    }

    /// Block for at most `timeout` waiting for a permit.
    ///
    /// Returns `false` if the timeout elapsed without a permit.
    pub fn acquire_timeout(&self, timeout: Duration) -> bool {
        let mut permits = self.permits.lock();
        while *permits == 0 {
            if self.available.wait_for(&mut permits, timeout).timed_out() {
                if *permits == 0 {
                    return false;
                }
                break;
            }
        }
        *permits -= 1;
        true
    }

    /// Return `count` permits, waking up to `count` waiters.
    pub fn release(&self, count: usize) {
        let mut permits = self.permits.lock();
        *permits += count;
        drop(permits);
        for _ in 0..count {
            self.available.notify_one();
        }
    }

    /// Number of permits currently available.
    #[must_use]
    pub fn available_permits(&self) -> usize {
        *self.permits.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn try_acquire_respects_count() {
        let semaphore = Semaphore::new(2);
        assert!(semaphore.try_acquire());
        assert!(semaphore.try_acquire());
        assert!(!semaphore.try_acquire());

        semaphore.release(1);
        assert!(semaphore.try_acquire());
    }

    #[test]
    fn acquire_timeout_expires() {
        let semaphore = Semaphore::new(0);
        assert!(!semaphore.acquire_timeout(Duration::from_millis(5)));
        assert_eq!(semaphore.available_permits(), 0);
    }

    #[test]
    fn release_wakes_blocked_waiter() {
        let semaphore = Arc::new(Semaphore::new(0));
        let waiter = {
            let semaphore = Arc::clone(&semaphore);
            thread::spawn(move || semaphore.acquire())
        };

        thread::sleep(Duration::from_millis(10));
        semaphore.release(1);
        waiter.join().unwrap();
        assert_eq!(semaphore.available_permits(), 0);
    }
}
