//! Vulkan device.
//!
//! Execution fences are timeline semaphores. Queue-level waits are collected
//! on the [`VulkanQueue`] and attached to its next submission. Layout
//! transitions are full pipeline barriers; resources are assumed to be used
//! by queues of a single family, which is the only family a
//! [`VulkanContext`] creates queues in.

pub mod command;
pub mod context;
pub mod memory;
pub mod sync;

use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use parking_lot::Mutex;

use crate::device::{BufferCopy, Device, FenceWait, ImageCopy, ResourceLayout};
use crate::error::{GpuError, Result};
use command::VulkanRecorder;
use context::{VulkanContext, VulkanContextBuilder};
use memory::{GpuAllocator, GpuBuffer, GpuImage};
use sync::TimelineWait;

/// A timeline semaphore.
pub struct VulkanFence {
    device: Arc<VulkanContext>,
    semaphore: vk::Semaphore,
}

impl VulkanFence {
    /// Raw semaphore handle.
    #[must_use]
    pub const fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for VulkanFence {
    fn drop(&mut self) {
        unsafe { self.device.destroy_semaphore(self.semaphore, None) };
    }
}

/// A device queue and the waits its next submission must honour.
pub struct VulkanQueue {
    queue: vk::Queue,
    family: u32,
    pending_waits: Vec<TimelineWait>,
}

impl VulkanQueue {
    /// Raw queue handle.
    #[must_use]
    pub const fn handle(&self) -> vk::Queue {
        self.queue
    }

    /// Queue family index.
    #[must_use]
    pub const fn family(&self) -> u32 {
        self.family
    }
}

enum ResourceMemory {
    Buffer(GpuBuffer),
    Image(GpuImage),
}

/// A buffer or image owned by the device allocator.
pub struct VulkanResource {
    memory: ResourceMemory,
    aspect: vk::ImageAspectFlags,
    allocator: Arc<Mutex<GpuAllocator>>,
}

impl VulkanResource {
    /// Raw buffer handle, if this is a buffer.
    #[must_use]
    pub const fn buffer(&self) -> Option<vk::Buffer> {
        match &self.memory {
            ResourceMemory::Buffer(buffer) => Some(buffer.buffer),
            ResourceMemory::Image(_) => None,
        }
    }

    /// Raw image handle, if this is an image.
    #[must_use]
    pub const fn image(&self) -> Option<vk::Image> {
        match &self.memory {
            ResourceMemory::Image(image) => Some(image.image),
            ResourceMemory::Buffer(_) => None,
        }
    }
}

impl Drop for VulkanResource {
    fn drop(&mut self) {
        let mut allocator = self.allocator.lock();
        let freed = match &mut self.memory {
            ResourceMemory::Buffer(buffer) => allocator.free_buffer(buffer),
            ResourceMemory::Image(image) => allocator.free_image(image),
        };
        if let Err(e) = freed {
            tracing::error!("Failed to free GPU resource: {e}");
        }
    }
}

/// Host-visible, persistently mapped upload buffer.
pub struct VulkanStaging {
    buffer: GpuBuffer,
    allocator: Arc<Mutex<GpuAllocator>>,
}

impl Drop for VulkanStaging {
    fn drop(&mut self) {
        if let Err(e) = self.allocator.lock().free_buffer(&mut self.buffer) {
            tracing::error!("Failed to free staging buffer: {e}");
        }
    }
}

/// Image layout and access mask for a resource state.
const fn layout_info(layout: ResourceLayout) -> (vk::ImageLayout, vk::AccessFlags) {
    match layout {
        ResourceLayout::Undefined => (vk::ImageLayout::UNDEFINED, vk::AccessFlags::empty()),
        ResourceLayout::CopyDest => (
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::AccessFlags::TRANSFER_WRITE,
        ),
        ResourceLayout::CopySource => (
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::AccessFlags::TRANSFER_READ,
        ),
        ResourceLayout::ShaderRead => (
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::AccessFlags::SHADER_READ,
        ),
        ResourceLayout::General => (
            vk::ImageLayout::GENERAL,
            vk::AccessFlags::from_raw(
                vk::AccessFlags::SHADER_READ.as_raw() | vk::AccessFlags::SHADER_WRITE.as_raw(),
            ),
        ),
        ResourceLayout::VertexInput => (
            vk::ImageLayout::GENERAL,
            vk::AccessFlags::from_raw(
                vk::AccessFlags::VERTEX_ATTRIBUTE_READ.as_raw()
                    | vk::AccessFlags::INDEX_READ.as_raw(),
            ),
        ),
        ResourceLayout::RenderTarget => (
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ),
    }
}

/// Vulkan implementation of [`Device`].
pub struct VulkanDevice {
    device: Arc<VulkanContext>,
    allocator: Arc<Mutex<GpuAllocator>>,
}

impl VulkanDevice {
    /// Wrap a context and give it an allocator.
    pub fn new(context: Arc<VulkanContext>) -> Result<Self> {
        let allocator = GpuAllocator::new(Arc::clone(&context))?;
        Ok(Self {
            device: context,
            allocator: Arc::new(Mutex::new(allocator)),
        })
    }

    /// Create a device on the best available GPU without presentation
    /// support.
    pub fn headless(app_name: &str) -> Result<Self> {
        let context = VulkanContextBuilder::new().app_name(app_name).build()?;
        Self::new(Arc::new(context))
    }

    /// The context this device was created from.
    #[must_use]
    pub const fn context(&self) -> &Arc<VulkanContext> {
        &self.device
    }

    /// Queue `index` of the context's family. Indices past the number of
    /// created queues share the last one.
    #[must_use]
    pub fn create_queue(&self, index: u32) -> VulkanQueue {
        let family = self.device.queue_family();
        let index = index.min(self.device.queue_count().saturating_sub(1));
        let queue = unsafe { self.device.get_device_queue(family, index) };
        VulkanQueue {
            queue,
            family,
            pending_waits: Vec::new(),
        }
    }

    /// Create a device-local buffer that can be the target of uploads.
    pub fn create_buffer(
        &self,
        size: u64,
        usage: vk::BufferUsageFlags,
        name: &str,
    ) -> Result<VulkanResource> {
        let buffer = self
            .allocator
            .lock()
            .create_target_buffer(size, usage, name)?;
        Ok(VulkanResource {
            memory: ResourceMemory::Buffer(buffer),
            aspect: vk::ImageAspectFlags::empty(),
            allocator: Arc::clone(&self.allocator),
        })
    }

    /// Create a device-local 2D color image that can be the target of uploads.
    pub fn create_image(
        &self,
        format: vk::Format,
        width: u32,
        height: u32,
        mip_levels: u32,
        usage: vk::ImageUsageFlags,
        name: &str,
    ) -> Result<VulkanResource> {
        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            })
            .mip_levels(mip_levels.max(1))
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage | vk::ImageUsageFlags::TRANSFER_DST)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = self.allocator.lock().create_image(&create_info, name)?;
        Ok(VulkanResource {
            memory: ResourceMemory::Image(image),
            aspect: vk::ImageAspectFlags::COLOR,
            allocator: Arc::clone(&self.allocator),
        })
    }
}

impl Device for VulkanDevice {
    type Fence = VulkanFence;
    type Queue = VulkanQueue;
    type Recorder = VulkanRecorder;
    type Resource = VulkanResource;
    type Staging = VulkanStaging;

    const ROW_PITCH_ALIGNMENT: usize = 256;
    const PLACEMENT_ALIGNMENT: usize = 512;

    fn create_fence(&self, initial: u64) -> Result<VulkanFence> {
        let semaphore = unsafe { sync::create_timeline_semaphore(&self.device, initial)? };
        Ok(VulkanFence {
            device: Arc::clone(&self.device),
            semaphore,
        })
    }

    fn completed_value(&self, fence: &VulkanFence) -> u64 {
        match unsafe { sync::semaphore_value(&self.device, fence.semaphore) } {
            Ok(value) => value,
            Err(e) => {
                tracing::error!("Failed to query timeline semaphore: {e}");
                0
            }
        }
    }

    fn wait_for_value(
        &self,
        fence: &VulkanFence,
        value: u64,
        timeout: Option<Duration>,
    ) -> Result<FenceWait> {
        let timeout_ns = timeout.map_or(u64::MAX, |t| {
            u64::try_from(t.as_nanos()).unwrap_or(u64::MAX)
        });
        unsafe { sync::wait_for_semaphore(&self.device, fence.semaphore, value, timeout_ns) }
    }

    fn queue_wait(&self, queue: &mut VulkanQueue, fence: &VulkanFence, value: u64) -> Result<()> {
        if let Some(existing) = queue
            .pending_waits
            .iter_mut()
            .find(|wait| wait.semaphore == fence.semaphore)
        {
            existing.value = existing.value.max(value);
        } else {
            queue.pending_waits.push(TimelineWait {
                semaphore: fence.semaphore,
                value,
            });
        }
        Ok(())
    }

    fn queue_signal(&self, queue: &mut VulkanQueue, fence: &VulkanFence, value: u64) -> Result<()> {
        let waits = std::mem::take(&mut queue.pending_waits);
        let signal = TimelineWait {
            semaphore: fence.semaphore,
            value,
        };
        unsafe { sync::submit_timeline(&self.device, queue.queue, &[], &waits, Some(signal)) }
    }

    fn submit(&self, queue: &mut VulkanQueue, recorder: &mut VulkanRecorder) -> Result<()> {
        let cmd = recorder
            .finish()?
            .ok_or_else(|| GpuError::InvalidState("submit without an open batch".to_string()))?;
        let waits = std::mem::take(&mut queue.pending_waits);
        unsafe { sync::submit_timeline(&self.device, queue.queue, &[cmd], &waits, None) }
    }

    fn create_recorder(&self, queue: &VulkanQueue) -> Result<VulkanRecorder> {
        VulkanRecorder::new(Arc::clone(&self.device), queue.family)
    }

    fn begin_recording(&self, recorder: &mut VulkanRecorder) -> Result<()> {
        recorder.begin().map(|_| ())
    }

    fn reset_recorder(&self, recorder: &mut VulkanRecorder) -> Result<()> {
        recorder.reset()
    }

    fn transition(
        &self,
        recorder: &mut VulkanRecorder,
        resource: &VulkanResource,
        from: ResourceLayout,
        to: ResourceLayout,
    ) {
        let Some(cmd) = recorder.current() else {
            tracing::error!("Layout transition recorded outside a batch");
            return;
        };
        let (old_layout, src_access) = layout_info(from);
        let (new_layout, dst_access) = layout_info(to);

        match &resource.memory {
            ResourceMemory::Image(image) => {
                let barrier = vk::ImageMemoryBarrier::default()
                    .old_layout(old_layout)
                    .new_layout(new_layout)
                    .src_access_mask(src_access)
                    .dst_access_mask(dst_access)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(image.image)
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: resource.aspect,
                        base_mip_level: 0,
                        level_count: vk::REMAINING_MIP_LEVELS,
                        base_array_layer: 0,
                        layer_count: vk::REMAINING_ARRAY_LAYERS,
                    });
                unsafe {
                    self.device.cmd_pipeline_barrier(
                        cmd,
                        vk::PipelineStageFlags::ALL_COMMANDS,
                        vk::PipelineStageFlags::ALL_COMMANDS,
                        vk::DependencyFlags::empty(),
                        &[],
                        &[],
                        &[barrier],
                    );
                }
            }
            ResourceMemory::Buffer(buffer) => {
                let barrier = vk::BufferMemoryBarrier::default()
                    .src_access_mask(src_access)
                    .dst_access_mask(dst_access)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .buffer(buffer.buffer)
                    .offset(0)
                    .size(vk::WHOLE_SIZE);
                unsafe {
                    self.device.cmd_pipeline_barrier(
                        cmd,
                        vk::PipelineStageFlags::ALL_COMMANDS,
                        vk::PipelineStageFlags::ALL_COMMANDS,
                        vk::DependencyFlags::empty(),
                        &[],
                        &[barrier],
                        &[],
                    );
                }
            }
        }
    }

    fn copy_buffer(
        &self,
        recorder: &mut VulkanRecorder,
        src: &VulkanStaging,
        dst: &VulkanResource,
        copy: BufferCopy,
    ) {
        let (Some(cmd), Some(dst_buffer)) = (recorder.current(), dst.buffer()) else {
            tracing::error!("Buffer copy recorded outside a batch or into an image");
            return;
        };
        let region = vk::BufferCopy {
            src_offset: copy.src_offset as u64,
            dst_offset: copy.dst_offset,
            size: copy.size as u64,
        };
        unsafe {
            self.device
                .cmd_copy_buffer(cmd, src.buffer.buffer, dst_buffer, &[region]);
        }
    }

    fn copy_buffer_to_image(
        &self,
        recorder: &mut VulkanRecorder,
        src: &VulkanStaging,
        dst: &VulkanResource,
        copy: ImageCopy,
    ) {
        let (Some(cmd), Some(dst_image)) = (recorder.current(), dst.image()) else {
            tracing::error!("Image copy recorded outside a batch or into a buffer");
            return;
        };
        let Ok(row_length) = u32::try_from(copy.src_row_pitch / copy.texel_size.max(1)) else {
            tracing::error!("Staging row pitch {} too large", copy.src_row_pitch);
            return;
        };
        let region = vk::BufferImageCopy {
            buffer_offset: copy.src_offset as u64,
            buffer_row_length: row_length,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: dst.aspect,
                mip_level: copy.mip_level,
                base_array_layer: 0,
                layer_count: 1,
            },
            image_offset: vk::Offset3D {
                x: i32::try_from(copy.x).unwrap_or(i32::MAX),
                y: i32::try_from(copy.y).unwrap_or(i32::MAX),
                z: 0,
            },
            image_extent: vk::Extent3D {
                width: copy.width,
                height: copy.height,
                depth: 1,
            },
        };
        unsafe {
            self.device.cmd_copy_buffer_to_image(
                cmd,
                src.buffer.buffer,
                dst_image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
    }

    fn create_staging(&self, size: usize) -> Result<VulkanStaging> {
        let buffer = self
            .allocator
            .lock()
            .create_staging_buffer(size as u64, "staging ring slot")?;
        Ok(VulkanStaging {
            buffer,
            allocator: Arc::clone(&self.allocator),
        })
    }

    fn staging_bytes<'a>(&self, staging: &'a mut VulkanStaging) -> Result<&'a mut [u8]> {
        staging
            .buffer
            .mapped_slice_mut()
            .ok_or_else(|| GpuError::InvalidState("staging buffer is not mapped".to_string()))
    }
}
