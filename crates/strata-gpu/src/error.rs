//! GPU error types.

use ash::vk;
use thiserror::Error;

/// GPU-related errors.
#[derive(Error, Debug)]
pub enum GpuError {
    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// No Vulkan loader, or no device with timeline semaphores.
    #[error("No suitable GPU: {0}")]
    NoSuitableDevice(String),

    /// Memory allocation failed.
    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    /// Every read slot of a resource is held by a distinct, still-running queue.
    #[error("All {capacity} read slots are held by queues still in flight")]
    ReadSlotsExhausted {
        /// Number of read slots per resource.
        capacity: usize,
    },

    /// An access was recorded with a fence value older than one already
    /// recorded for the same queue.
    #[error("Fence value {requested} is older than recorded value {recorded}")]
    StaleFenceValue {
        /// Value the caller asked for.
        requested: u64,
        /// Value already recorded for that queue.
        recorded: u64,
    },

    /// A staging request larger than one ring slot.
    #[error("Staging request of {requested} bytes exceeds slot capacity of {capacity} bytes")]
    StagingOverflow {
        /// Bytes requested, including alignment padding.
        requested: usize,
        /// Capacity of a single ring slot.
        capacity: usize,
    },

    /// Recycling a ring slot would wait on a fence value that was never
    /// signalled, which can only deadlock.
    #[error("Ring slot {slot} needs fence value {required} but only {signaled} was signalled")]
    RingStall {
        /// Slot that could not be recycled.
        slot: usize,
        /// Fence value guarding the slot.
        required: u64,
        /// Last value signalled on the copy queue.
        signaled: u64,
    },

    /// A staging allocation was used after its slot was recycled.
    #[error("Staging allocation from slot {slot} is stale")]
    StaleAllocation {
        /// Slot the allocation came from.
        slot: usize,
    },

    /// Image description or region is inconsistent.
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;
