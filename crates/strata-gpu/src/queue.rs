//! Submission queues.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::device::{Device, FenceWait};
use crate::error::Result;
use crate::fence::{ExecutionFence, QueueId};

/// A GPU queue paired with the execution fence it signals.
///
/// The queue keeps the CPU-side record of the last value it signalled. Values
/// start at 1 and increase by one per [`signal_next`](Self::signal_next).
pub struct SubmissionQueue<D: Device> {
    name: String,
    device: Arc<D>,
    raw: D::Queue,
    fence: Arc<ExecutionFence<D>>,
    last_signaled_value: u64,
}

impl<D: Device> SubmissionQueue<D> {
    /// Wrap a backend queue and create its fence.
    pub fn new(device: Arc<D>, raw: D::Queue, name: impl Into<String>) -> Result<Self> {
        let id = QueueId::next();
        let fence = Arc::new(ExecutionFence::new(Arc::clone(&device), id)?);
        let name = name.into();
        tracing::debug!("Created submission queue '{name}' as {id}");
        Ok(Self {
            name,
            device,
            raw,
            fence,
            last_signaled_value: 0,
        })
    }

    /// Queue identity, shared with its fence.
    #[must_use]
    pub fn id(&self) -> QueueId {
        self.fence.queue_id()
    }

    /// Debug name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The device the queue belongs to.
    #[must_use]
    pub const fn device(&self) -> &Arc<D> {
        &self.device
    }

    /// The fence this queue signals.
    #[must_use]
    pub const fn fence(&self) -> &Arc<ExecutionFence<D>> {
        &self.fence
    }

    /// The backend queue.
    #[must_use]
    pub const fn raw(&self) -> &D::Queue {
        &self.raw
    }

    /// Mutable access to the backend queue.
    pub fn raw_mut(&mut self) -> &mut D::Queue {
        &mut self.raw
    }

    /// The last value signalled from the CPU side.
    #[must_use]
    pub const fn last_signaled_value(&self) -> u64 {
        self.last_signaled_value
    }

    /// The value the next [`signal_next`](Self::signal_next) will use.
    ///
    /// Work recorded now completes at this value.
    #[must_use]
    pub const fn next_value(&self) -> u64 {
        self.last_signaled_value + 1
    }

    /// Enqueue a signal of the next fence value and return it.
    pub fn signal_next(&mut self) -> Result<u64> {
        let value = self.next_value();
        self.device.queue_signal(&mut self.raw, self.fence.raw(), value)?;
        self.last_signaled_value = value;
        tracing::trace!("{} signalled value {value}", self.name);
        Ok(value)
    }

    /// Make the next submission wait until `fence` reaches `value`.
    ///
    /// Waits on this queue's own fence and on values the GPU already reached
    /// are dropped.
    pub fn wait_on(&mut self, fence: &ExecutionFence<D>, value: u64) -> Result<()> {
        if fence.queue_id() == self.id() || fence.is_reached(value) {
            return Ok(());
        }
        tracing::trace!(
            "{} waits on {} value {value}",
            self.name,
            fence.queue_id()
        );
        self.device.queue_wait(&mut self.raw, fence.raw(), value)
    }

    /// Submit the commands in `recorder`.
    pub fn submit(&mut self, recorder: &mut D::Recorder) -> Result<()> {
        self.device.submit(&mut self.raw, recorder)
    }

    /// Block until this queue's fence reaches `value`.
    pub fn wait_for_value(&self, value: u64, timeout: Option<Duration>) -> Result<FenceWait> {
        self.fence.wait_for_value(value, timeout)
    }

    /// Signal and wait until every submission made so far has executed.
    pub fn flush(&mut self) -> Result<()> {
        let value = self.signal_next()?;
        let _ = self.fence.wait_for_value(value, None)?;
        tracing::debug!("Flushed {} through value {value}", self.name);
        Ok(())
    }
}

impl<D: Device> fmt::Debug for SubmissionQueue<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubmissionQueue")
            .field("name", &self.name)
            .field("id", &self.id())
            .field("last_signaled_value", &self.last_signaled_value)
            .finish_non_exhaustive()
    }
}
