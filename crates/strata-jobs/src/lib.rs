//! Background job execution for the Strata streaming core.
//!
//! This crate provides:
//! - A counting [`Semaphore`] built on `parking_lot`
//! - A fixed-capacity, single-producer / multi-consumer [`WorkQueue`]
//! - A [`ThreadPool`] whose workers park when the queue looks empty
//! - A [`JobSystem`] holding the latency-sensitive and background pools

pub mod pool;
pub mod queue;
pub mod semaphore;
pub mod system;

pub use pool::{PoolConfig, PoolPriority, ThreadPool};
pub use queue::{Job, WorkQueue};
pub use semaphore::Semaphore;
pub use system::{JobSystem, JobSystemConfig};
