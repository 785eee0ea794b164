//! Timing instrumentation for the Strata streaming core.
//!
//! Unlike a process-wide timer table, a [`Profiler`] is an explicitly owned
//! handle. Components that want to be timed take an `Option<Profiler>` at
//! construction; cloning the handle shares the same sink.
//!
//! # Usage
//!
//! ```ignore
//! use strata_profiler::{profile_scope, EventCategory, Profiler};
//!
//! let profiler = Some(Profiler::new());
//! {
//!     profile_scope!(profiler, EventCategory::RingAdvance);
//!     // ... timed work
//! }
//! let samples = profiler.as_ref().unwrap().drain();
//! ```

mod collector;
mod events;
mod macros;
mod profiler;

pub use events::{CategoryStats, EventCategory, ProfilerSnapshot, TimingEvent};
pub use macros::ScopeTimer;
pub use profiler::Profiler;
