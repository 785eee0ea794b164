//! Per-resource access tracking.
//!
//! Every GPU resource shared between queues carries an [`AccessTracker`]
//! recording the last write and up to [`MAX_CONCURRENT_READERS`] outstanding
//! reads, each as a `(fence, value)` pair. Recording a new access compares it
//! against those slots and inserts a queue-level wait only where a hazard
//! exists:
//!
//! - read after write on another queue waits for the write
//! - write after read on another queue waits for every such read
//! - write after write on another queue waits for the previous write
//!
//! Accesses on the same queue are ordered by the queue itself and never wait.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use strata_core::constants::MAX_CONCURRENT_READERS;

use crate::device::{Device, ResourceLayout};
use crate::error::{GpuError, Result};
use crate::fence::{ExecutionFence, QueueId};
use crate::queue::SubmissionQueue;

/// One recorded access: the fence value at which it completes.
///
/// An empty slot has no fence. A slot whose value was reached is treated as
/// empty and cleared the next time it is inspected.
pub struct AccessSlot<D: Device> {
    fence: Option<Arc<ExecutionFence<D>>>,
    required_value: u64,
}

impl<D: Device> AccessSlot<D> {
    const fn empty() -> Self {
        Self {
            fence: None,
            required_value: 0,
        }
    }

    fn occupy(&mut self, fence: &Arc<ExecutionFence<D>>, value: u64) {
        self.fence = Some(Arc::clone(fence));
        self.required_value = value;
    }

    fn clear(&mut self) {
        *self = Self::empty();
    }

    /// Queue whose fence this slot waits on, if any.
    #[must_use]
    pub fn queue_id(&self) -> Option<QueueId> {
        self.fence.as_ref().map(|fence| fence.queue_id())
    }

    /// The fence value the access completes at.
    #[must_use]
    pub const fn required_value(&self) -> u64 {
        self.required_value
    }

    fn is_on(&self, queue: QueueId) -> bool {
        self.queue_id() == Some(queue)
    }

    /// Whether the access may still be executing, clearing the slot if not.
    fn pending(&mut self) -> bool {
        match &self.fence {
            Some(fence) if !fence.is_reached(self.required_value) => true,
            Some(_) => {
                self.clear();
                false
            }
            None => false,
        }
    }

    /// Insert a wait for this access into `queue` and forget it.
    fn wait_and_clear(&mut self, queue: &mut SubmissionQueue<D>) -> Result<()> {
        if let Some(fence) = self.fence.take() {
            queue.wait_on(&fence, self.required_value)?;
        }
        self.required_value = 0;
        Ok(())
    }

    fn check_not_older(&self, queue: QueueId, value: u64) -> Result<()> {
        if self.is_on(queue) && value < self.required_value {
            return Err(GpuError::StaleFenceValue {
                requested: value,
                recorded: self.required_value,
            });
        }
        Ok(())
    }
}

impl<D: Device> fmt::Debug for AccessSlot<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessSlot")
            .field("queue", &self.queue_id())
            .field("required_value", &self.required_value)
            .finish()
    }
}

/// A layout change the caller must record before the access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutTransition {
    /// Layout the resource was in.
    pub from: ResourceLayout,
    /// Layout the access needs.
    pub to: ResourceLayout,
}

/// Read/write hazard state of one resource.
pub struct AccessTracker<D: Device> {
    write: AccessSlot<D>,
    reads: [AccessSlot<D>; MAX_CONCURRENT_READERS],
    layout: ResourceLayout,
}

impl<D: Device> AccessTracker<D> {
    /// A tracker for a resource with no recorded accesses.
    #[must_use]
    pub fn new(layout: ResourceLayout) -> Self {
        Self {
            write: AccessSlot::empty(),
            reads: std::array::from_fn(|_| AccessSlot::empty()),
            layout,
        }
    }

    /// Current layout.
    #[must_use]
    pub const fn layout(&self) -> ResourceLayout {
        self.layout
    }

    /// The write slot.
    #[must_use]
    pub const fn write_slot(&self) -> &AccessSlot<D> {
        &self.write
    }

    /// The read slots.
    #[must_use]
    pub const fn read_slots(&self) -> &[AccessSlot<D>; MAX_CONCURRENT_READERS] {
        &self.reads
    }

    /// Number of read slots still holding an access.
    #[must_use]
    pub fn occupied_read_slots(&self) -> usize {
        self.reads.iter().filter(|slot| slot.fence.is_some()).count()
    }

    /// Record a read on `queue` completing at `value`.
    ///
    /// Inserts a wait on the pending write if it was recorded on another
    /// queue. A read on the same queue and value as the pending write is part
    /// of that submission and is not recorded separately.
    pub fn mark_read(&mut self, queue: &mut SubmissionQueue<D>, value: u64) -> Result<()> {
        let id = queue.id();
        self.write.check_not_older(id, value)?;

        if self.write.is_on(id) {
            if value == self.write.required_value {
                return Ok(());
            }
        } else if self.write.pending() {
            let fence = self.write.fence.as_ref().map(Arc::clone);
            if let Some(fence) = fence {
                queue.wait_on(&fence, self.write.required_value)?;
            }
        }

        let mut free = None;
        for (index, slot) in self.reads.iter_mut().enumerate() {
            if slot.is_on(id) {
                slot.required_value = slot.required_value.max(value);
                return Ok(());
            }
            if free.is_none() && !slot.pending() {
                free = Some(index);
            }
        }

        let Some(index) = free else {
            tracing::error!("Read slots exhausted while recording a read on {id}");
            return Err(GpuError::ReadSlotsExhausted {
                capacity: MAX_CONCURRENT_READERS,
            });
        };
        self.reads[index].occupy(queue.fence(), value);
        Ok(())
    }

    /// Record a write on `queue` completing at `value`, in `layout`.
    ///
    /// Inserts waits on the previous write and on every pending read from
    /// other queues, then clears those reads. Returns the transition to record
    /// when `layout` differs from the current one.
    pub fn mark_write(
        &mut self,
        queue: &mut SubmissionQueue<D>,
        value: u64,
        layout: ResourceLayout,
    ) -> Result<Option<LayoutTransition>> {
        let id = queue.id();
        self.write.check_not_older(id, value)?;
        for slot in &self.reads {
            slot.check_not_older(id, value)?;
        }

        if !self.write.is_on(id) && self.write.pending() {
            let fence = self.write.fence.as_ref().map(Arc::clone);
            if let Some(fence) = fence {
                queue.wait_on(&fence, self.write.required_value)?;
            }
        }

        for slot in &mut self.reads {
            if slot.is_on(id) {
                // Ordered before this write by the queue itself.
                slot.clear();
            } else if slot.pending() {
                slot.wait_and_clear(queue)?;
            }
        }

        self.write.occupy(queue.fence(), value);

        if layout == self.layout {
            return Ok(None);
        }
        let transition = LayoutTransition {
            from: self.layout,
            to: layout,
        };
        self.layout = layout;
        Ok(Some(transition))
    }

    /// Whether the resource can be used without waiting.
    ///
    /// True when no write is pending, or when the pending write was recorded
    /// on `queue` at or before its next value, since the queue orders it.
    pub fn is_ready(&mut self, queue: Option<&SubmissionQueue<D>>) -> bool {
        if !self.write.pending() {
            return true;
        }
        queue.is_some_and(|queue| {
            self.write.is_on(queue.id()) && self.write.required_value <= queue.next_value()
        })
    }
}

impl<D: Device> Default for AccessTracker<D> {
    fn default() -> Self {
        Self::new(ResourceLayout::Undefined)
    }
}

impl<D: Device> fmt::Debug for AccessTracker<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessTracker")
            .field("write", &self.write)
            .field("reads", &self.reads)
            .field("layout", &self.layout)
            .finish()
    }
}

/// A device resource guarded by an [`AccessTracker`].
///
/// Every access from any queue goes through [`mark_read`](Self::mark_read)
/// or [`mark_write`](Self::mark_write).
pub struct TrackedResource<D: Device> {
    name: String,
    raw: D::Resource,
    tracker: Mutex<AccessTracker<D>>,
}

impl<D: Device> TrackedResource<D> {
    /// Track a resource starting in `layout`.
    pub fn new(name: impl Into<String>, raw: D::Resource, layout: ResourceLayout) -> Self {
        Self {
            name: name.into(),
            raw,
            tracker: Mutex::new(AccessTracker::new(layout)),
        }
    }

    /// Debug name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The backend resource.
    #[must_use]
    pub const fn raw(&self) -> &D::Resource {
        &self.raw
    }

    /// Current layout.
    #[must_use]
    pub fn layout(&self) -> ResourceLayout {
        self.tracker.lock().layout()
    }

    /// Run `f` with the tracker locked.
    pub fn with_tracker<R>(&self, f: impl FnOnce(&mut AccessTracker<D>) -> R) -> R {
        f(&mut self.tracker.lock())
    }

    /// Record a read completing at `value`.
    pub fn mark_read(&self, queue: &mut SubmissionQueue<D>, value: u64) -> Result<()> {
        self.tracker.lock().mark_read(queue, value)
    }

    /// Record a read by the next submission on `queue`.
    pub fn mark_read_next(&self, queue: &mut SubmissionQueue<D>) -> Result<()> {
        let value = queue.next_value();
        self.mark_read(queue, value)
    }

    /// Record a write completing at `value` and emit any layout transition
    /// into `recorder`.
    pub fn mark_write(
        &self,
        queue: &mut SubmissionQueue<D>,
        value: u64,
        layout: ResourceLayout,
        recorder: &mut D::Recorder,
    ) -> Result<()> {
        let transition = self.tracker.lock().mark_write(queue, value, layout)?;
        if let Some(LayoutTransition { from, to }) = transition {
            tracing::trace!("{}: {from:?} -> {to:?}", self.name);
            queue
                .device()
                .transition(recorder, &self.raw, from, to);
        }
        Ok(())
    }

    /// Record a write by the next submission on `queue`.
    pub fn mark_write_next(
        &self,
        queue: &mut SubmissionQueue<D>,
        layout: ResourceLayout,
        recorder: &mut D::Recorder,
    ) -> Result<()> {
        let value = queue.next_value();
        self.mark_write(queue, value, layout, recorder)
    }

    /// Whether the resource can be used on `queue` without waiting.
    #[must_use]
    pub fn is_ready(&self, queue: Option<&SubmissionQueue<D>>) -> bool {
        self.tracker.lock().is_ready(queue)
    }
}

impl<D: Device> fmt::Debug for TrackedResource<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedResource")
            .field("name", &self.name)
            .field("tracker", &*self.tracker.lock())
            .finish_non_exhaustive()
    }
}
