//! Software device for tests and tooling.
//!
//! Submissions execute on the CPU at submit time: copies write into resource
//! memory and every queue operation is appended to the queue's op log. Fences
//! are signalled by queues but only complete when told to, so tests decide
//! exactly when the "GPU" catches up. [`HeadlessDevice::auto_completing`]
//! completes every signal immediately instead.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::device::{BufferCopy, Device, FenceWait, ImageCopy, ResourceLayout};
use crate::error::{GpuError, Result};

static NEXT_OBJECT_ID: AtomicU32 = AtomicU32::new(1);

fn next_id() -> u32 {
    NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed)
}

/// One operation observed on a headless queue, in execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueOp {
    /// The next submission waits for `fence` to reach `value`.
    Wait {
        /// Fence id.
        fence: u32,
        /// Value waited for.
        value: u64,
    },
    /// A recorded layout transition.
    Transition {
        /// Resource id.
        resource: u32,
        /// Previous layout.
        from: ResourceLayout,
        /// New layout.
        to: ResourceLayout,
    },
    /// A recorded buffer copy.
    CopyBuffer {
        /// Destination resource id.
        resource: u32,
        /// Copy description.
        copy: BufferCopy,
    },
    /// A recorded image copy.
    CopyImage {
        /// Destination resource id.
        resource: u32,
        /// Copy description.
        copy: ImageCopy,
    },
    /// End of a submitted batch.
    Submit,
    /// `fence` signalled to `value`.
    Signal {
        /// Fence id.
        fence: u32,
        /// Signalled value.
        value: u64,
    },
}

#[derive(Debug, Default)]
struct FenceState {
    completed: u64,
    signaled: u64,
}

/// A fence that completes on demand.
#[derive(Debug)]
pub struct HeadlessFence {
    id: u32,
    state: Mutex<FenceState>,
    changed: Condvar,
}

impl HeadlessFence {
    fn new(initial: u64) -> Self {
        Self {
            id: next_id(),
            state: Mutex::new(FenceState {
                completed: initial,
                signaled: initial,
            }),
            changed: Condvar::new(),
        }
    }

    /// Id used in [`QueueOp`] entries.
    #[must_use]
    pub const fn id(&self) -> u32 {
        self.id
    }

    /// Highest value signalled by a queue.
    #[must_use]
    pub fn signaled_value(&self) -> u64 {
        self.state.lock().signaled
    }

    /// Highest value completed.
    #[must_use]
    pub fn completed_value(&self) -> u64 {
        self.state.lock().completed
    }

    /// Complete the fence through `value` and wake waiters.
    pub fn complete(&self, value: u64) {
        let mut state = self.state.lock();
        if value > state.completed {
            state.completed = value;
            self.changed.notify_all();
        }
    }

    /// Complete everything signalled so far.
    pub fn complete_signaled(&self) {
        let signaled = self.signaled_value();
        self.complete(signaled);
    }

    fn signal(&self, value: u64) {
        let mut state = self.state.lock();
        state.signaled = state.signaled.max(value);
    }

    fn wait(&self, value: u64, timeout: Option<Duration>) -> FenceWait {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut state = self.state.lock();
        while state.completed < value {
            match deadline {
                Some(deadline) => {
                    if self.changed.wait_until(&mut state, deadline).timed_out() {
                        return if state.completed >= value {
                            FenceWait::Reached
                        } else {
                            FenceWait::TimedOut
                        };
                    }
                }
                None => self.changed.wait(&mut state),
            }
        }
        FenceWait::Reached
    }
}

/// A headless queue and its op log.
#[derive(Debug)]
pub struct HeadlessQueue {
    name: String,
    log: Vec<QueueOp>,
}

impl HeadlessQueue {
    /// Debug name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Every operation executed on this queue.
    #[must_use]
    pub fn log(&self) -> &[QueueOp] {
        &self.log
    }

    /// Forget the op log.
    pub fn clear_log(&mut self) {
        self.log.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Buffer,
    Image {
        width: u32,
        height: u32,
        texel_size: usize,
        mip_levels: u32,
    },
}

/// A buffer or image backed by CPU memory.
#[derive(Debug)]
pub struct HeadlessResource {
    id: u32,
    shape: Shape,
    memory: Arc<Mutex<Vec<u8>>>,
}

impl HeadlessResource {
    /// Id used in [`QueueOp`] entries.
    #[must_use]
    pub const fn id(&self) -> u32 {
        self.id
    }

    /// Snapshot of the whole backing memory.
    #[must_use]
    pub fn contents(&self) -> Vec<u8> {
        self.memory.lock().clone()
    }

    /// Snapshot of one mip level of an image, rows tightly packed.
    #[must_use]
    pub fn mip_contents(&self, level: u32) -> Option<Vec<u8>> {
        let range = mip_range(self.shape, level)?;
        Some(self.memory.lock()[range].to_vec())
    }
}

const fn mip_extent(size: u32, level: u32) -> u32 {
    let extent = size >> level;
    if extent == 0 {
        1
    } else {
        extent
    }
}

fn mip_range(shape: Shape, level: u32) -> Option<std::ops::Range<usize>> {
    let Shape::Image {
        width,
        height,
        texel_size,
        mip_levels,
    } = shape
    else {
        return None;
    };
    if level >= mip_levels {
        return None;
    }
    let level_size = |l: u32| mip_extent(width, l) as usize * mip_extent(height, l) as usize * texel_size;
    let start: usize = (0..level).map(level_size).sum();
    Some(start..start + level_size(level))
}

enum Command {
    Transition {
        resource: u32,
        from: ResourceLayout,
        to: ResourceLayout,
    },
    CopyBuffer {
        resource: u32,
        memory: Arc<Mutex<Vec<u8>>>,
        copy: BufferCopy,
        data: Vec<u8>,
    },
    CopyImage {
        resource: u32,
        memory: Arc<Mutex<Vec<u8>>>,
        shape: Shape,
        copy: ImageCopy,
        data: Vec<u8>,
    },
}

impl Command {
    fn op(&self) -> QueueOp {
        match self {
            Self::Transition { resource, from, to } => QueueOp::Transition {
                resource: *resource,
                from: *from,
                to: *to,
            },
            Self::CopyBuffer { resource, copy, .. } => QueueOp::CopyBuffer {
                resource: *resource,
                copy: *copy,
            },
            Self::CopyImage { resource, copy, .. } => QueueOp::CopyImage {
                resource: *resource,
                copy: *copy,
            },
        }
    }

    fn execute(&self) -> Result<()> {
        match self {
            Self::Transition { .. } => Ok(()),
            Self::CopyBuffer {
                memory, copy, data, ..
            } => {
                let mut memory = memory.lock();
                let start = usize::try_from(copy.dst_offset)
                    .map_err(|_| GpuError::InvalidState("copy offset overflows".to_string()))?;
                let dst = memory.get_mut(start..start + copy.size).ok_or_else(|| {
                    GpuError::InvalidState(format!("buffer copy {copy:?} out of bounds"))
                })?;
                dst.copy_from_slice(data);
                Ok(())
            }
            Self::CopyImage {
                memory,
                shape,
                copy,
                data,
                ..
            } => {
                let Shape::Image {
                    width, texel_size, ..
                } = *shape
                else {
                    return Err(GpuError::InvalidState(
                        "image copy into a buffer".to_string(),
                    ));
                };
                let range = mip_range(*shape, copy.mip_level).ok_or_else(|| {
                    GpuError::InvalidState(format!("mip level {} missing", copy.mip_level))
                })?;
                let mip_width = mip_extent(width, copy.mip_level) as usize;
                let row_bytes = copy.width as usize * texel_size;
                let mut memory = memory.lock();
                let mip = &mut memory[range];
                for row in 0..copy.height as usize {
                    let dst = ((copy.y as usize + row) * mip_width + copy.x as usize) * texel_size;
                    let src = row * copy.src_row_pitch;
                    let dst = mip.get_mut(dst..dst + row_bytes).ok_or_else(|| {
                        GpuError::InvalidState(format!("image copy {copy:?} out of bounds"))
                    })?;
                    dst.copy_from_slice(&data[src..src + row_bytes]);
                }
                Ok(())
            }
        }
    }
}

/// Command recorder for a headless queue.
#[derive(Default)]
pub struct HeadlessRecorder {
    commands: Vec<Command>,
    open: bool,
    submitted_batches: usize,
    deferred_error: Option<GpuError>,
}

impl HeadlessRecorder {
    /// Batches submitted since the last reset.
    #[must_use]
    pub const fn submitted_batches(&self) -> usize {
        self.submitted_batches
    }

    fn defer(&mut self, error: GpuError) {
        if self.deferred_error.is_none() {
            self.deferred_error = Some(error);
        }
    }
}

/// Upload memory of a headless device.
#[derive(Debug)]
pub struct HeadlessStaging {
    bytes: Vec<u8>,
}

/// A device that executes on the CPU.
#[derive(Debug, Default)]
pub struct HeadlessDevice {
    auto_complete: bool,
}

impl HeadlessDevice {
    /// Device whose fences complete only on demand.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            auto_complete: false,
        }
    }

    /// Device whose fences complete as soon as they are signalled.
    #[must_use]
    pub const fn auto_completing() -> Self {
        Self {
            auto_complete: true,
        }
    }

    /// Create a queue.
    #[must_use]
    pub fn create_queue(&self, name: impl Into<String>) -> HeadlessQueue {
        HeadlessQueue {
            name: name.into(),
            log: Vec::new(),
        }
    }

    /// Create a zeroed buffer of `size` bytes.
    #[must_use]
    pub fn create_buffer(&self, size: usize) -> HeadlessResource {
        HeadlessResource {
            id: next_id(),
            shape: Shape::Buffer,
            memory: Arc::new(Mutex::new(vec![0; size])),
        }
    }

    /// Create a zeroed image with a full chain of `mip_levels` levels.
    #[must_use]
    pub fn create_image(
        &self,
        width: u32,
        height: u32,
        texel_size: usize,
        mip_levels: u32,
    ) -> HeadlessResource {
        let shape = Shape::Image {
            width,
            height,
            texel_size,
            mip_levels: mip_levels.max(1),
        };
        let size = mip_range(shape, mip_levels.max(1) - 1).map_or(0, |range| range.end);
        HeadlessResource {
            id: next_id(),
            shape,
            memory: Arc::new(Mutex::new(vec![0; size])),
        }
    }
}

impl Device for HeadlessDevice {
    type Fence = HeadlessFence;
    type Queue = HeadlessQueue;
    type Recorder = HeadlessRecorder;
    type Resource = HeadlessResource;
    type Staging = HeadlessStaging;

    const ROW_PITCH_ALIGNMENT: usize = 256;
    const PLACEMENT_ALIGNMENT: usize = 512;

    fn create_fence(&self, initial: u64) -> Result<HeadlessFence> {
        Ok(HeadlessFence::new(initial))
    }

    fn completed_value(&self, fence: &HeadlessFence) -> u64 {
        fence.completed_value()
    }

    fn wait_for_value(
        &self,
        fence: &HeadlessFence,
        value: u64,
        timeout: Option<Duration>,
    ) -> Result<FenceWait> {
        Ok(fence.wait(value, timeout))
    }

    fn queue_wait(&self, queue: &mut HeadlessQueue, fence: &HeadlessFence, value: u64) -> Result<()> {
        queue.log.push(QueueOp::Wait {
            fence: fence.id,
            value,
        });
        Ok(())
    }

    fn queue_signal(
        &self,
        queue: &mut HeadlessQueue,
        fence: &HeadlessFence,
        value: u64,
    ) -> Result<()> {
        queue.log.push(QueueOp::Signal {
            fence: fence.id,
            value,
        });
        fence.signal(value);
        if self.auto_complete {
            fence.complete(value);
        }
        Ok(())
    }

    fn submit(&self, queue: &mut HeadlessQueue, recorder: &mut HeadlessRecorder) -> Result<()> {
        if !recorder.open {
            return Err(GpuError::InvalidState(format!(
                "submit to '{}' without an open batch",
                queue.name
            )));
        }
        recorder.open = false;
        if let Some(error) = recorder.deferred_error.take() {
            recorder.commands.clear();
            return Err(error);
        }

        for command in recorder.commands.drain(..) {
            queue.log.push(command.op());
            command.execute()?;
        }
        queue.log.push(QueueOp::Submit);
        recorder.submitted_batches += 1;
        Ok(())
    }

    fn create_recorder(&self, _queue: &HeadlessQueue) -> Result<HeadlessRecorder> {
        Ok(HeadlessRecorder::default())
    }

    fn begin_recording(&self, recorder: &mut HeadlessRecorder) -> Result<()> {
        recorder.open = true;
        Ok(())
    }

    fn reset_recorder(&self, recorder: &mut HeadlessRecorder) -> Result<()> {
        recorder.commands.clear();
        recorder.open = false;
        recorder.submitted_batches = 0;
        recorder.deferred_error = None;
        Ok(())
    }

    fn transition(
        &self,
        recorder: &mut HeadlessRecorder,
        resource: &HeadlessResource,
        from: ResourceLayout,
        to: ResourceLayout,
    ) {
        recorder.commands.push(Command::Transition {
            resource: resource.id,
            from,
            to,
        });
    }

    fn copy_buffer(
        &self,
        recorder: &mut HeadlessRecorder,
        src: &HeadlessStaging,
        dst: &HeadlessResource,
        copy: BufferCopy,
    ) {
        let Some(data) = src.bytes.get(copy.src_offset..copy.src_offset + copy.size) else {
            recorder.defer(GpuError::InvalidState(format!(
                "buffer copy {copy:?} reads past staging memory"
            )));
            return;
        };
        recorder.commands.push(Command::CopyBuffer {
            resource: dst.id,
            memory: Arc::clone(&dst.memory),
            copy,
            data: data.to_vec(),
        });
    }

    fn copy_buffer_to_image(
        &self,
        recorder: &mut HeadlessRecorder,
        src: &HeadlessStaging,
        dst: &HeadlessResource,
        copy: ImageCopy,
    ) {
        let span = match copy.height as usize {
            0 => 0,
            rows => (rows - 1) * copy.src_row_pitch + copy.width as usize * copy.texel_size,
        };
        let Some(data) = src.bytes.get(copy.src_offset..copy.src_offset + span) else {
            recorder.defer(GpuError::InvalidState(format!(
                "image copy {copy:?} reads past staging memory"
            )));
            return;
        };
        recorder.commands.push(Command::CopyImage {
            resource: dst.id,
            memory: Arc::clone(&dst.memory),
            shape: dst.shape,
            copy,
            data: data.to_vec(),
        });
    }

    fn create_staging(&self, size: usize) -> Result<HeadlessStaging> {
        Ok(HeadlessStaging {
            bytes: vec![0; size],
        })
    }

    fn staging_bytes<'a>(&self, staging: &'a mut HeadlessStaging) -> Result<&'a mut [u8]> {
        Ok(&mut staging.bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn fence_wait_times_out_then_succeeds() {
        let device = HeadlessDevice::new();
        let fence = device.create_fence(0).unwrap();
        assert_eq!(
            device
                .wait_for_value(&fence, 1, Some(Duration::from_millis(10)))
                .unwrap(),
            FenceWait::TimedOut
        );

        fence.complete(1);
        assert_eq!(
            device
                .wait_for_value(&fence, 1, Some(Duration::from_millis(10)))
                .unwrap(),
            FenceWait::Reached
        );
    }

    #[test]
    fn fence_wakes_waiter_on_other_thread() {
        let fence = Arc::new(HeadlessFence::new(0));
        let waiter = {
            let fence = Arc::clone(&fence);
            thread::spawn(move || fence.wait(3, None))
        };
        thread::sleep(Duration::from_millis(10));
        fence.complete(3);
        assert_eq!(waiter.join().unwrap(), FenceWait::Reached);
    }

    #[test]
    fn completion_never_goes_backwards() {
        let fence = HeadlessFence::new(0);
        fence.complete(5);
        fence.complete(2);
        assert_eq!(fence.completed_value(), 5);
    }

    #[test]
    fn auto_completing_device_completes_on_signal() {
        let device = HeadlessDevice::auto_completing();
        let mut queue = device.create_queue("copy");
        let fence = device.create_fence(0).unwrap();
        device.queue_signal(&mut queue, &fence, 4).unwrap();
        assert_eq!(device.completed_value(&fence), 4);
        assert_eq!(
            queue.log(),
            &[QueueOp::Signal {
                fence: fence.id(),
                value: 4
            }]
        );
    }

    #[test]
    fn submit_without_begin_is_an_error() {
        let device = HeadlessDevice::new();
        let mut queue = device.create_queue("copy");
        let mut recorder = device.create_recorder(&queue).unwrap();
        assert!(device.submit(&mut queue, &mut recorder).is_err());
    }

    #[test]
    fn image_mips_are_packed_back_to_back() {
        let device = HeadlessDevice::new();
        let image = device.create_image(4, 4, 2, 3);
        assert_eq!(image.contents().len(), (16 + 4 + 1) * 2);
        assert_eq!(image.mip_contents(1).map(|m| m.len()), Some(8));
        assert_eq!(image.mip_contents(3), None);
    }
}
