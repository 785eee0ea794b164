//! Device memory for staging slots and upload targets.
//!
//! Staging slots are host-visible and stay mapped for their whole lifetime.
//! Upload targets are device-local and only ever written by transfer
//! commands.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::{AllocationSizes, AllocatorDebugSettings, MemoryLocation};

use super::context::VulkanContext;
use crate::error::{GpuError, Result};

fn allocation_error(e: impl std::fmt::Display) -> GpuError {
    GpuError::AllocationFailed(e.to_string())
}

/// `gpu-allocator` instance shared by the device's staging and target
/// resources.
pub struct GpuAllocator {
    allocator: Option<Allocator>,
    device: Arc<VulkanContext>,
}

impl GpuAllocator {
    /// Create an allocator over the context's logical device.
    pub fn new(context: Arc<VulkanContext>) -> Result<Self> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: context.instance().clone(),
            device: context.device().clone(),
            physical_device: context.physical_device(),
            debug_settings: AllocatorDebugSettings {
                log_leaks_on_shutdown: true,
                ..AllocatorDebugSettings::default()
            },
            buffer_device_address: false,
            allocation_sizes: AllocationSizes::default(),
        })
        .map_err(allocation_error)?;

        Ok(Self {
            allocator: Some(allocator),
            device: context,
        })
    }

    fn allocate(
        &mut self,
        name: &str,
        requirements: vk::MemoryRequirements,
        location: MemoryLocation,
        linear: bool,
    ) -> Result<Allocation> {
        let allocator = self
            .allocator
            .as_mut()
            .ok_or_else(|| GpuError::InvalidState("allocator already shut down".to_string()))?;
        allocator
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(allocation_error)
    }

    fn release(&mut self, allocation: Option<Allocation>) -> Result<()> {
        match (allocation, self.allocator.as_mut()) {
            (Some(allocation), Some(allocator)) => {
                allocator.free(allocation).map_err(allocation_error)
            }
            _ => Ok(()),
        }
    }

    fn create_buffer(
        &mut self,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> Result<GpuBuffer> {
        let info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { self.device.create_buffer(&info, None)? };
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let mut created = GpuBuffer {
            buffer,
            allocation: None,
        };
        let allocation = match self.allocate(name, requirements, location, true) {
            Ok(allocation) => allocation,
            Err(e) => {
                self.free_buffer(&mut created)?;
                return Err(e);
            }
        };
        let bound = unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        };
        created.allocation = Some(allocation);
        if let Err(e) = bound {
            self.free_buffer(&mut created)?;
            return Err(e.into());
        }
        Ok(created)
    }

    /// Allocate a host-visible staging buffer that stays mapped.
    pub fn create_staging_buffer(&mut self, size: u64, name: &str) -> Result<GpuBuffer> {
        let mut buffer = self.create_buffer(
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
            name,
        )?;
        if !buffer.is_mapped() {
            self.free_buffer(&mut buffer)?;
            return Err(GpuError::AllocationFailed(format!(
                "staging buffer '{name}' is not host-mapped"
            )));
        }
        Ok(buffer)
    }

    /// Allocate a device-local buffer that uploads can be copied into.
    pub fn create_target_buffer(
        &mut self,
        size: u64,
        usage: vk::BufferUsageFlags,
        name: &str,
    ) -> Result<GpuBuffer> {
        self.create_buffer(
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuOnly,
            name,
        )
    }

    /// Allocate a device-local image described by `info`.
    pub fn create_image(&mut self, info: &vk::ImageCreateInfo, name: &str) -> Result<GpuImage> {
        let image = unsafe { self.device.create_image(info, None)? };
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };

        let mut created = GpuImage {
            image,
            allocation: None,
        };
        let allocation = match self.allocate(name, requirements, MemoryLocation::GpuOnly, false) {
            Ok(allocation) => allocation,
            Err(e) => {
                self.free_image(&mut created)?;
                return Err(e);
            }
        };
        let bound = unsafe {
            self.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        };
        created.allocation = Some(allocation);
        if let Err(e) = bound {
            self.free_image(&mut created)?;
            return Err(e.into());
        }
        Ok(created)
    }

    /// Destroy a buffer and return its memory. Safe to call twice.
    pub fn free_buffer(&mut self, buffer: &mut GpuBuffer) -> Result<()> {
        let freed = self.release(buffer.allocation.take());
        if buffer.buffer != vk::Buffer::null() {
            unsafe { self.device.destroy_buffer(buffer.buffer, None) };
            buffer.buffer = vk::Buffer::null();
        }
        freed
    }

    /// Destroy an image and return its memory. Safe to call twice.
    pub fn free_image(&mut self, image: &mut GpuImage) -> Result<()> {
        let freed = self.release(image.allocation.take());
        if image.image != vk::Image::null() {
            unsafe { self.device.destroy_image(image.image, None) };
            image.image = vk::Image::null();
        }
        freed
    }
}

impl Drop for GpuAllocator {
    fn drop(&mut self) {
        if self.allocator.take().is_some() {
            tracing::debug!("GPU allocator shut down");
        }
    }
}

/// A buffer and the memory bound to it.
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub allocation: Option<Allocation>,
}

impl GpuBuffer {
    /// Whether the memory has a persistent CPU mapping.
    #[must_use]
    pub fn is_mapped(&self) -> bool {
        self.allocation
            .as_ref()
            .is_some_and(|allocation| allocation.mapped_ptr().is_some())
    }

    /// CPU view of a mapped buffer.
    pub fn mapped_slice_mut(&mut self) -> Option<&mut [u8]> {
        self.allocation
            .as_mut()
            .and_then(Allocation::mapped_slice_mut)
    }
}

/// An image and the memory bound to it.
pub struct GpuImage {
    pub image: vk::Image,
    pub allocation: Option<Allocation>,
}
