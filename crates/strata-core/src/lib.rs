//! Core constants and error types for the Strata streaming core.
//!
//! This crate provides the pieces shared by every other Strata crate:
//! - Fixed sizing constants for the synchronization layer
//! - The engine-level error type

pub mod error;

pub use error::{Error, Result};

/// Engine-wide constants.
///
/// These are fixed parameters of the system, not runtime tunables.
pub mod constants {
    /// Number of staging slots cycled by the copy engine.
    pub const UPLOAD_RING_SIZE: usize = 3;
    /// Default capacity of a single staging slot in bytes (256 MiB).
    pub const UPLOAD_SLOT_SIZE: usize = 256 * 1024 * 1024;
    /// Maximum number of distinct queues that may read a resource concurrently.
    pub const MAX_CONCURRENT_READERS: usize = 4;
    /// Number of entries in a job queue ring.
    pub const JOB_QUEUE_CAPACITY: usize = 256;
    /// Default alignment of a raw staging allocation.
    pub const DEFAULT_STAGING_ALIGNMENT: usize = 4;
    /// Minimum number of threads in the latency-sensitive pool.
    pub const MIN_HOT_POOL_THREADS: usize = 1;
    /// Number of threads in the background pool.
    pub const COLD_POOL_THREADS: usize = 1;
}

/// Round `value` up to the next multiple of `alignment` (a power of two).
#[inline]
#[must_use]
pub const fn align_up(value: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}
