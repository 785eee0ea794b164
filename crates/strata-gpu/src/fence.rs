//! Execution fences.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::device::{Device, FenceWait};
use crate::error::Result;

static NEXT_QUEUE_ID: AtomicU32 = AtomicU32::new(0);

/// Identity of a submission queue and the fence it signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueueId(u32);

impl QueueId {
    pub(crate) fn next() -> Self {
        Self(NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric id.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "queue#{}", self.0)
    }
}

/// A monotonically increasing counter owned by one submission queue.
///
/// Shared with [`Arc`] by every access slot that references it, so the fence
/// lives as long as any resource still needs to wait on it.
pub struct ExecutionFence<D: Device> {
    queue: QueueId,
    raw: D::Fence,
    device: Arc<D>,
}

impl<D: Device> ExecutionFence<D> {
    pub(crate) fn new(device: Arc<D>, queue: QueueId) -> Result<Self> {
        let raw = device.create_fence(0)?;
        Ok(Self { queue, raw, device })
    }

    /// The queue that signals this fence.
    #[must_use]
    pub const fn queue_id(&self) -> QueueId {
        self.queue
    }

    /// The backend fence.
    #[must_use]
    pub const fn raw(&self) -> &D::Fence {
        &self.raw
    }

    /// The highest value the GPU has reached.
    #[must_use]
    pub fn completed_value(&self) -> u64 {
        self.device.completed_value(&self.raw)
    }

    /// Whether the GPU has reached `value`.
    #[must_use]
    pub fn is_reached(&self, value: u64) -> bool {
        self.completed_value() >= value
    }

    /// Block until the fence reaches `value` or `timeout` elapses.
    ///
    /// Returns immediately when the value was already reached. `None` waits
    /// indefinitely.
    pub fn wait_for_value(&self, value: u64, timeout: Option<Duration>) -> Result<FenceWait> {
        if self.is_reached(value) {
            return Ok(FenceWait::Reached);
        }
        let outcome = self.device.wait_for_value(&self.raw, value, timeout)?;
        if outcome == FenceWait::TimedOut {
            tracing::debug!("Wait for {} value {value} timed out", self.queue);
        }
        Ok(outcome)
    }
}

impl<D: Device> fmt::Debug for ExecutionFence<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionFence")
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}
