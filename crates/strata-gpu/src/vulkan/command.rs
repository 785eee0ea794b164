//! Command buffer recording for one queue family.

use std::sync::Arc;

use ash::vk;

use super::context::VulkanContext;
use crate::error::Result;

/// Records batches into primary command buffers drawn from a transient pool.
///
/// Buffers outlive a reset: resetting the pool rewinds every buffer to the
/// initial state, and the next batch picks up the first one again.
pub struct VulkanRecorder {
    context: Arc<VulkanContext>,
    pool: vk::CommandPool,
    buffers: Vec<vk::CommandBuffer>,
    used: usize,
    open: Option<vk::CommandBuffer>,
}

impl VulkanRecorder {
    /// Create a recorder whose batches run on queues of `queue_family`.
    pub fn new(context: Arc<VulkanContext>, queue_family: u32) -> Result<Self> {
        let info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);
        let pool = unsafe { context.create_command_pool(&info, None)? };
        Ok(Self {
            context,
            pool,
            buffers: Vec::new(),
            used: 0,
            open: None,
        })
    }

    /// The batch being recorded, if any.
    pub const fn current(&self) -> Option<vk::CommandBuffer> {
        self.open
    }

    /// Number of command buffers the pool has handed out so far.
    pub fn allocated(&self) -> usize {
        self.buffers.len()
    }

    fn next_buffer(&mut self) -> Result<vk::CommandBuffer> {
        if let Some(&cmd) = self.buffers.get(self.used) {
            return Ok(cmd);
        }
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let allocated = unsafe { self.context.allocate_command_buffers(&info)? };
        self.buffers.extend_from_slice(&allocated);
        Ok(self.buffers[self.used])
    }

    /// Open a batch, or return the one already open.
    pub fn begin(&mut self) -> Result<vk::CommandBuffer> {
        if let Some(cmd) = self.open {
            return Ok(cmd);
        }
        let cmd = self.next_buffer()?;
        let info =
            vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.context.begin_command_buffer(cmd, &info)? };
        self.used += 1;
        self.open = Some(cmd);
        Ok(cmd)
    }

    /// End the open batch and hand it out for submission.
    pub fn finish(&mut self) -> Result<Option<vk::CommandBuffer>> {
        let Some(cmd) = self.open.take() else {
            return Ok(None);
        };
        unsafe { self.context.end_command_buffer(cmd)? };
        Ok(Some(cmd))
    }

    /// Rewind the pool. Every batch recorded since the last reset must have
    /// finished executing.
    pub fn reset(&mut self) -> Result<()> {
        self.open = None;
        self.used = 0;
        unsafe {
            self.context
                .reset_command_pool(self.pool, vk::CommandPoolResetFlags::empty())?;
        }
        Ok(())
    }
}

impl Drop for VulkanRecorder {
    fn drop(&mut self) {
        unsafe { self.context.destroy_command_pool(self.pool, None) };
    }
}
