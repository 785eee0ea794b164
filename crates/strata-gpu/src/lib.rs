//! GPU execution synchronization for the Strata streaming core.
//!
//! This crate provides:
//! - Execution fences and submission queues with CPU-side signal bookkeeping
//! - Per-resource access tracking that inserts cross-queue waits only on real
//!   hazards
//! - A ring-buffered copy engine for streaming CPU data into GPU resources
//! - A headless software device for tests and tooling
//! - A Vulkan device built on timeline semaphores

pub mod copy_engine;
pub mod device;
pub mod error;
pub mod fence;
pub mod headless;
pub mod queue;
pub mod ring;
pub mod tracker;
pub mod vulkan;

pub use copy_engine::{CopyEngine, CopyEngineConfig, ImageData, ImageRegion};
pub use device::{BufferCopy, Device, FenceWait, ImageCopy, ResourceLayout};
pub use error::{GpuError, Result};
pub use fence::{ExecutionFence, QueueId};
pub use headless::HeadlessDevice;
pub use queue::SubmissionQueue;
pub use ring::{RingAllocator, StagingAllocation};
pub use tracker::{AccessSlot, AccessTracker, LayoutTransition, TrackedResource};
pub use vulkan::context::{VulkanContext, VulkanContextBuilder};
pub use vulkan::VulkanDevice;
