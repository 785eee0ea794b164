//! Device capability trait.
//!
//! Everything above this module is generic over a [`Device`]: fences, queues,
//! access tracking and the copy engine only ever talk to the GPU through the
//! operations declared here. The crate ships a Vulkan implementation and a
//! headless software implementation used by tests.

use std::time::Duration;

use crate::error::Result;

/// Outcome of a CPU wait on an execution fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum FenceWait {
    /// The fence reached the requested value.
    Reached,
    /// The timeout elapsed first.
    TimedOut,
}

impl FenceWait {
    /// Whether the wait succeeded.
    #[must_use]
    pub const fn is_reached(self) -> bool {
        matches!(self, Self::Reached)
    }
}

/// Layout / usage state a resource is in for the next access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResourceLayout {
    /// Contents undefined; the state of a freshly created resource.
    #[default]
    Undefined,
    /// Destination of a copy.
    CopyDest,
    /// Source of a copy.
    CopySource,
    /// Read by shaders.
    ShaderRead,
    /// Read and written by shaders.
    General,
    /// Bound as vertex or index input.
    VertexInput,
    /// Color render target.
    RenderTarget,
}

/// A buffer-to-buffer copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferCopy {
    /// Byte offset into the staging buffer.
    pub src_offset: usize,
    /// Byte offset into the destination resource.
    pub dst_offset: u64,
    /// Bytes to copy.
    pub size: usize,
}

/// A staging-buffer-to-image copy of a rectangle of texels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageCopy {
    /// Byte offset of the first row in the staging buffer.
    pub src_offset: usize,
    /// Distance in bytes between consecutive rows in the staging buffer.
    pub src_row_pitch: usize,
    /// Bytes per texel.
    pub texel_size: usize,
    /// Destination mip level.
    pub mip_level: u32,
    /// Left edge of the destination rectangle, in texels.
    pub x: u32,
    /// Top edge of the destination rectangle, in texels.
    pub y: u32,
    /// Width of the rectangle, in texels.
    pub width: u32,
    /// Height of the rectangle, in texels.
    pub height: u32,
}

/// The operations a GPU backend provides to the synchronization layer.
///
/// Recording functions cannot fail: backends either record the command or
/// defer any error to [`Device::submit`].
pub trait Device: Send + Sync + Sized + 'static {
    /// A monotonically increasing 64-bit counter signalled by a queue.
    type Fence: Send + Sync + 'static;
    /// A queue that executes submissions in order.
    type Queue: Send + 'static;
    /// Records commands for a single submission.
    type Recorder: Send + 'static;
    /// A buffer or image that commands read from or write to.
    type Resource: Send + Sync + 'static;
    /// CPU-writable upload memory.
    type Staging: Send + 'static;

    /// Required alignment of the row pitch of image data in staging memory.
    const ROW_PITCH_ALIGNMENT: usize;
    /// Required alignment of the start of image data in staging memory.
    const PLACEMENT_ALIGNMENT: usize;

    /// Create a fence whose completed value starts at `initial`.
    fn create_fence(&self, initial: u64) -> Result<Self::Fence>;

    /// The highest value the GPU has signalled so far.
    fn completed_value(&self, fence: &Self::Fence) -> u64;

    /// Block the calling thread until `fence` reaches `value`.
    ///
    /// `None` waits without a timeout.
    fn wait_for_value(
        &self,
        fence: &Self::Fence,
        value: u64,
        timeout: Option<Duration>,
    ) -> Result<FenceWait>;

    /// Make the next submission on `queue` wait until `fence` reaches `value`.
    fn queue_wait(&self, queue: &mut Self::Queue, fence: &Self::Fence, value: u64) -> Result<()>;

    /// Signal `fence` to `value` once all prior work on `queue` finished.
    fn queue_signal(&self, queue: &mut Self::Queue, fence: &Self::Fence, value: u64)
        -> Result<()>;

    /// Finish recording and submit the recorded commands.
    fn submit(&self, queue: &mut Self::Queue, recorder: &mut Self::Recorder) -> Result<()>;

    /// Create a recorder for commands submitted to `queue`.
    fn create_recorder(&self, queue: &Self::Queue) -> Result<Self::Recorder>;

    /// Start a new batch of commands.
    ///
    /// Calling this while a batch is open is a no-op.
    fn begin_recording(&self, recorder: &mut Self::Recorder) -> Result<()>;

    /// Release every batch recorded so far.
    ///
    /// The caller guarantees that the GPU finished executing them.
    fn reset_recorder(&self, recorder: &mut Self::Recorder) -> Result<()>;

    /// Record a layout transition of `resource`.
    fn transition(
        &self,
        recorder: &mut Self::Recorder,
        resource: &Self::Resource,
        from: ResourceLayout,
        to: ResourceLayout,
    );

    /// Record a copy from staging memory into a buffer.
    fn copy_buffer(
        &self,
        recorder: &mut Self::Recorder,
        src: &Self::Staging,
        dst: &Self::Resource,
        copy: BufferCopy,
    );

    /// Record a copy from staging memory into an image.
    fn copy_buffer_to_image(
        &self,
        recorder: &mut Self::Recorder,
        src: &Self::Staging,
        dst: &Self::Resource,
        copy: ImageCopy,
    );

    /// Allocate `size` bytes of persistently mapped upload memory.
    fn create_staging(&self, size: usize) -> Result<Self::Staging>;

    /// CPU view of a staging allocation.
    fn staging_bytes<'a>(&self, staging: &'a mut Self::Staging) -> Result<&'a mut [u8]>;
}
