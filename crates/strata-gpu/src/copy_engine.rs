//! Ring-buffered streaming uploads.
//!
//! The engine owns [`UPLOAD_RING_SIZE`] staging slots, each a persistently
//! mapped buffer with a bump allocator and its own command recorder. Every
//! allocation stamps its slot with the fence value of the copy that will read
//! it. When the current slot is full the engine moves to the next one, first
//! waiting for that slot's stamp so the GPU is done with its previous
//! contents.
//!
//! Slot lifecycle: writable, submitted, recyclable once its stamp is reached,
//! then writable again after the reset.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytemuck::Pod;
use strata_core::align_up;
use strata_core::constants::{DEFAULT_STAGING_ALIGNMENT, UPLOAD_RING_SIZE, UPLOAD_SLOT_SIZE};
use strata_profiler::{profile_scope, EventCategory, Profiler};

use crate::device::{BufferCopy, Device, FenceWait, ImageCopy, ResourceLayout};
use crate::error::{GpuError, Result};
use crate::queue::SubmissionQueue;
use crate::ring::{RingAllocator, StagingAllocation};
use crate::tracker::TrackedResource;

/// Copy engine configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyEngineConfig {
    /// Bytes of staging memory per ring slot.
    pub slot_capacity: usize,
}

impl Default for CopyEngineConfig {
    fn default() -> Self {
        Self {
            slot_capacity: UPLOAD_SLOT_SIZE,
        }
    }
}

/// CPU-side pixels of one mip level.
#[derive(Debug, Clone, Copy)]
pub struct ImageData<'a> {
    /// Pixel bytes, `row_pitch` apart.
    pub bytes: &'a [u8],
    /// Width in texels.
    pub width: u32,
    /// Height in texels.
    pub height: u32,
    /// Distance between rows in `bytes`.
    pub row_pitch: usize,
    /// Bytes per texel.
    pub texel_size: usize,
}

impl<'a> ImageData<'a> {
    /// Rows stored back to back with no padding.
    #[must_use]
    pub const fn tightly_packed(bytes: &'a [u8], width: u32, height: u32, texel_size: usize) -> Self {
        Self {
            bytes,
            width,
            height,
            row_pitch: width as usize * texel_size,
            texel_size,
        }
    }

    /// The whole image as a region of mip `mip_level`.
    #[must_use]
    pub const fn full_region(&self, mip_level: u32) -> ImageRegion {
        ImageRegion {
            x: 0,
            y: 0,
            width: self.width,
            height: self.height,
            mip_level,
        }
    }

    fn validate(&self, region: &ImageRegion) -> Result<()> {
        if self.texel_size == 0 {
            return Err(GpuError::InvalidImage("texel size is zero".to_string()));
        }
        if self.row_pitch < self.width as usize * self.texel_size {
            return Err(GpuError::InvalidImage(format!(
                "row pitch {} is shorter than a row of {} texels",
                self.row_pitch, self.width
            )));
        }
        let needed = match self.height {
            0 => 0,
            h => (h as usize - 1) * self.row_pitch + self.width as usize * self.texel_size,
        };
        if self.bytes.len() < needed {
            return Err(GpuError::InvalidImage(format!(
                "{} bytes supplied for a {}x{} image needing {needed}",
                self.bytes.len(),
                self.width,
                self.height
            )));
        }
        if u64::from(region.x) + u64::from(region.width) > u64::from(self.width)
            || u64::from(region.y) + u64::from(region.height) > u64::from(self.height)
        {
            return Err(GpuError::InvalidImage(format!(
                "region {region:?} lies outside the {}x{} image",
                self.width, self.height
            )));
        }
        Ok(())
    }
}

/// A rectangle of one mip level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageRegion {
    /// Left edge in texels.
    pub x: u32,
    /// Top edge in texels.
    pub y: u32,
    /// Width in texels.
    pub width: u32,
    /// Height in texels.
    pub height: u32,
    /// Mip level.
    pub mip_level: u32,
}

impl ImageRegion {
    /// Full-width band of `count` rows starting at `first`.
    #[must_use]
    pub const fn rows(width: u32, first: u32, count: u32) -> Self {
        Self {
            x: 0,
            y: first,
            width,
            height: count,
            mip_level: 0,
        }
    }

    /// Number of texels covered.
    #[must_use]
    pub const fn texel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Upper bound on how long dropping the engine waits for in-flight copies.
const DROP_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Row pitch for staged image data: the row length rounded up to the device's
/// alignment and kept a whole number of texels.
fn staging_row_pitch<D: Device>(row_bytes: usize, texel_size: usize) -> usize {
    let mut pitch = align_up(row_bytes, D::ROW_PITCH_ALIGNMENT);
    while pitch % texel_size != 0 {
        pitch += D::ROW_PITCH_ALIGNMENT;
    }
    pitch
}

struct RingSlot<D: Device> {
    arena: RingAllocator,
    staging: D::Staging,
    /// Fence value after which the GPU no longer reads this slot.
    reset_value: u64,
}

enum PendingCopy {
    Buffer(StagingAllocation, BufferCopy),
    Image(StagingAllocation, ImageCopy),
}

/// Streams CPU data into GPU resources through a ring of staging slots.
pub struct CopyEngine<D: Device> {
    device: Arc<D>,
    queue: SubmissionQueue<D>,
    slots: Vec<RingSlot<D>>,
    recorders: Vec<D::Recorder>,
    current: usize,
    config: CopyEngineConfig,
    profiler: Option<Profiler>,
}

impl<D: Device> CopyEngine<D> {
    /// Create the staging ring on `queue`'s device.
    pub fn new(
        queue: SubmissionQueue<D>,
        config: CopyEngineConfig,
        profiler: Option<Profiler>,
    ) -> Result<Self> {
        if config.slot_capacity == 0 {
            return Err(GpuError::InvalidState(
                "copy engine slot capacity is zero".to_string(),
            ));
        }

        let device = Arc::clone(queue.device());
        let mut slots = Vec::with_capacity(UPLOAD_RING_SIZE);
        let mut recorders = Vec::with_capacity(UPLOAD_RING_SIZE);
        for _ in 0..UPLOAD_RING_SIZE {
            slots.push(RingSlot {
                arena: RingAllocator::new(config.slot_capacity),
                staging: device.create_staging(config.slot_capacity)?,
                reset_value: 0,
            });
            recorders.push(device.create_recorder(queue.raw())?);
        }

        tracing::info!(
            "Copy engine on '{}' with {UPLOAD_RING_SIZE} slots of {} KiB",
            queue.name(),
            config.slot_capacity / 1024
        );

        Ok(Self {
            device,
            queue,
            slots,
            recorders,
            current: 0,
            config,
            profiler,
        })
    }

    /// The engine's submission queue.
    #[must_use]
    pub const fn queue(&self) -> &SubmissionQueue<D> {
        &self.queue
    }

    /// Mutable access to the engine's submission queue.
    pub fn queue_mut(&mut self) -> &mut SubmissionQueue<D> {
        &mut self.queue
    }

    /// Configuration the engine was created with.
    #[must_use]
    pub const fn config(&self) -> &CopyEngineConfig {
        &self.config
    }

    /// Index of the slot currently being filled.
    #[must_use]
    pub const fn current_slot(&self) -> usize {
        self.current
    }

    /// Fence value guarding `slot`.
    #[must_use]
    pub fn slot_reset_value(&self, slot: usize) -> Option<u64> {
        self.slots.get(slot).map(|slot| slot.reset_value)
    }

    /// Reserve `size` bytes of staging memory.
    ///
    /// The allocation is guarded by the fence value the next submission on
    /// the engine's queue completes at. Moves to the next ring slot when the
    /// current one is full, waiting for that slot's guard first.
    pub fn allocate(&mut self, size: usize, alignment: usize) -> Result<StagingAllocation> {
        if alignment != 0 && !alignment.is_power_of_two() {
            return Err(GpuError::InvalidState(format!(
                "staging alignment {alignment} is not a power of two"
            )));
        }
        if size > self.config.slot_capacity {
            return Err(GpuError::StagingOverflow {
                requested: size,
                capacity: self.config.slot_capacity,
            });
        }

        if let Some(allocation) = self.try_allocate(size, alignment) {
            return Ok(allocation);
        }

        self.advance_ring()?;

        self.try_allocate(size, alignment)
            .ok_or(GpuError::StagingOverflow {
                requested: size,
                capacity: self.config.slot_capacity,
            })
    }

    fn try_allocate(&mut self, size: usize, alignment: usize) -> Option<StagingAllocation> {
        let guard = self.queue.next_value();
        let slot = &mut self.slots[self.current];
        let offset = slot.arena.allocate(size, alignment)?;
        slot.reset_value = slot.reset_value.max(guard);
        Some(StagingAllocation {
            slot: self.current,
            generation: slot.arena.generation(),
            offset,
            len: size,
        })
    }

    fn advance_ring(&mut self) -> Result<()> {
        profile_scope!(self.profiler, EventCategory::RingAdvance);

        let next = (self.current + 1) % self.slots.len();
        let required = self.slots[next].reset_value;
        let signaled = self.queue.last_signaled_value();
        if required > signaled {
            tracing::error!(
                "Ring slot {next} is guarded by unsignalled value {required} (last signalled {signaled})"
            );
            return Err(GpuError::RingStall {
                slot: next,
                required,
                signaled,
            });
        }

        if !self.queue.fence().is_reached(required) {
            tracing::debug!("Copy ring waiting for value {required} to recycle slot {next}");
            let start = Instant::now();
            let _ = self.queue.wait_for_value(required, None)?;
            if let Some(profiler) = &self.profiler {
                profiler.record_duration(EventCategory::FenceWait, start.elapsed());
            }
        }

        self.device.reset_recorder(&mut self.recorders[next])?;
        self.slots[next].arena.reset();
        self.current = next;
        tracing::trace!("Copy ring advanced to slot {next}");
        Ok(())
    }

    /// CPU view of an allocation's bytes.
    ///
    /// Fails if the allocation's slot was recycled since it was made.
    pub fn staging_mut(&mut self, allocation: &StagingAllocation) -> Result<&mut [u8]> {
        let slot = self
            .slots
            .get_mut(allocation.slot)
            .ok_or(GpuError::StaleAllocation {
                slot: allocation.slot,
            })?;
        if slot.arena.generation() != allocation.generation
            || allocation.end() > slot.arena.used()
        {
            return Err(GpuError::StaleAllocation {
                slot: allocation.slot,
            });
        }
        let bytes = self.device.staging_bytes(&mut slot.staging)?;
        bytes
            .get_mut(allocation.offset..allocation.end())
            .ok_or(GpuError::StaleAllocation {
                slot: allocation.slot,
            })
    }

    /// Copy `bytes` into `target` at `dest_offset`.
    ///
    /// Returns the fence value at which the copy completes.
    pub fn upload_buffer(
        &mut self,
        target: &TrackedResource<D>,
        dest_offset: u64,
        bytes: &[u8],
    ) -> Result<u64> {
        profile_scope!(self.profiler, EventCategory::Upload);

        let allocation = self.allocate(bytes.len(), DEFAULT_STAGING_ALIGNMENT)?;
        self.staging_mut(&allocation)?.copy_from_slice(bytes);
        let copy = BufferCopy {
            src_offset: allocation.offset,
            dst_offset: dest_offset,
            size: bytes.len(),
        };
        self.submit(target, &[PendingCopy::Buffer(allocation, copy)])
    }

    /// Copy a slice of plain-old-data values into `target` at `dest_offset`.
    pub fn upload_pod<T: Pod>(
        &mut self,
        target: &TrackedResource<D>,
        dest_offset: u64,
        data: &[T],
    ) -> Result<u64> {
        self.upload_buffer(target, dest_offset, bytemuck::cast_slice(data))
    }

    /// Upload a full mip chain, one [`ImageData`] per level starting at 0.
    pub fn upload_image(
        &mut self,
        target: &TrackedResource<D>,
        mips: &[ImageData<'_>],
    ) -> Result<u64> {
        profile_scope!(self.profiler, EventCategory::Upload);

        let mut copies = Vec::with_capacity(mips.len());
        for (level, image) in (0u32..).zip(mips) {
            let (allocation, copy) = self.stage_region(image, image.full_region(level))?;
            copies.push(PendingCopy::Image(allocation, copy));
        }
        self.submit(target, &copies)
    }

    /// Upload one rectangle of `source` to the same rectangle of `target`.
    ///
    /// Rows are copied one by one into a staging allocation whose pitch meets
    /// the device's alignment, so a large image can be streamed in bands.
    pub fn upload_image_region(
        &mut self,
        target: &TrackedResource<D>,
        source: &ImageData<'_>,
        region: ImageRegion,
    ) -> Result<u64> {
        profile_scope!(self.profiler, EventCategory::Upload);

        let (allocation, copy) = self.stage_region(source, region)?;
        self.submit(target, &[PendingCopy::Image(allocation, copy)])
    }

    fn stage_region(
        &mut self,
        image: &ImageData<'_>,
        region: ImageRegion,
    ) -> Result<(StagingAllocation, ImageCopy)> {
        image.validate(&region)?;

        let texel_size = image.texel_size;
        let row_bytes = region.width as usize * texel_size;
        let pitch = staging_row_pitch::<D>(row_bytes, texel_size);
        let rows = region.height as usize;

        let allocation = self.allocate(pitch * rows, D::PLACEMENT_ALIGNMENT)?;
        let staging = self.staging_mut(&allocation)?;
        for row in 0..rows {
            let src = (region.y as usize + row) * image.row_pitch + region.x as usize * texel_size;
            let dst = row * pitch;
            staging[dst..dst + row_bytes].copy_from_slice(&image.bytes[src..src + row_bytes]);
        }

        let copy = ImageCopy {
            src_offset: allocation.offset,
            src_row_pitch: pitch,
            texel_size,
            mip_level: region.mip_level,
            x: region.x,
            y: region.y,
            width: region.width,
            height: region.height,
        };
        Ok((allocation, copy))
    }

    /// Record the copies, mark `target` written, submit and signal.
    fn submit(&mut self, target: &TrackedResource<D>, copies: &[PendingCopy]) -> Result<u64> {
        let value = self.queue.next_value();
        // The recorder belongs to the current slot even when nothing was staged.
        let slot = &mut self.slots[self.current];
        slot.reset_value = slot.reset_value.max(value);

        let recorder = &mut self.recorders[self.current];
        self.device.begin_recording(recorder)?;
        target.mark_write(&mut self.queue, value, ResourceLayout::CopyDest, recorder)?;

        for copy in copies {
            match copy {
                PendingCopy::Buffer(allocation, copy) => {
                    let slot = &self.slots[allocation.slot];
                    self.device
                        .copy_buffer(recorder, &slot.staging, target.raw(), *copy);
                }
                PendingCopy::Image(allocation, copy) => {
                    let slot = &self.slots[allocation.slot];
                    self.device
                        .copy_buffer_to_image(recorder, &slot.staging, target.raw(), *copy);
                }
            }
        }

        self.queue.submit(recorder)?;
        let signaled = self.queue.signal_next()?;
        debug_assert_eq!(signaled, value);
        Ok(value)
    }

    /// Wait until every upload submitted so far has completed.
    pub fn flush(&mut self) -> Result<()> {
        self.queue.flush()
    }
}

impl<D: Device> Drop for CopyEngine<D> {
    fn drop(&mut self) {
        // Staging memory and recorders must outlive the copies reading them.
        let last = self.queue.last_signaled_value();
        match self.queue.wait_for_value(last, Some(DROP_DRAIN_TIMEOUT)) {
            Ok(FenceWait::Reached) => {}
            Ok(FenceWait::TimedOut) => {
                tracing::error!("Copy engine dropped with uploads through value {last} in flight");
            }
            Err(e) => tracing::error!("Copy engine failed to drain on drop: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessDevice;

    #[test]
    fn staging_pitch_is_aligned_and_whole_texels() {
        let align = HeadlessDevice::ROW_PITCH_ALIGNMENT;
        assert_eq!(staging_row_pitch::<HeadlessDevice>(1, 1), align);
        assert_eq!(staging_row_pitch::<HeadlessDevice>(align, 4), align);
        let pitch = staging_row_pitch::<HeadlessDevice>(30, 3);
        assert_eq!(pitch % align, 0);
        assert_eq!(pitch % 3, 0);
    }

    #[test]
    fn region_outside_image_is_rejected() {
        let bytes = [0u8; 16];
        let image = ImageData::tightly_packed(&bytes, 4, 4, 1);
        let region = ImageRegion {
            x: 2,
            y: 0,
            width: 3,
            height: 1,
            mip_level: 0,
        };
        assert!(matches!(
            image.validate(&region),
            Err(GpuError::InvalidImage(_))
        ));
        assert!(image.validate(&ImageRegion::rows(4, 3, 1)).is_ok());
    }

    #[test]
    fn short_source_is_rejected() {
        let bytes = [0u8; 15];
        let image = ImageData::tightly_packed(&bytes, 4, 4, 1);
        assert!(image.validate(&image.full_region(0)).is_err());
    }
}
