//! Streaming finished height maps to GPU textures.

use strata_gpu::{CopyEngine, Device, ImageData, ImageRegion, TrackedResource};

use crate::error::Result;
use crate::job::{HeightMapJob, JobState};

/// Progress of a streaming step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamProgress {
    /// The job has no finished image to upload.
    Idle,
    /// A band was uploaded; more rows remain.
    Uploading {
        /// Rows uploaded so far.
        rows_done: u32,
        /// Fence value the latest band completes at.
        value: u64,
    },
    /// The last band was uploaded and the job was released.
    Complete {
        /// Fence value at which both textures are fully written.
        value: u64,
    },
}

/// Uploads a ready [`HeightMapJob`] in bands of rows, one band per call, so
/// a large image never stalls a frame with one huge copy.
///
/// Heights go to an `R32_FLOAT` texture, normals to an `RGBA8` texture of the
/// same size.
#[derive(Debug, Clone)]
pub struct HeightMapStreamer {
    rows_per_band: u32,
    next_row: u32,
}

impl HeightMapStreamer {
    /// Stream `rows_per_band` rows per call.
    #[must_use]
    pub fn new(rows_per_band: u32) -> Self {
        Self {
            rows_per_band: rows_per_band.max(1),
            next_row: 0,
        }
    }

    /// First row of the next band.
    #[must_use]
    pub const fn next_row(&self) -> u32 {
        self.next_row
    }

    /// Upload the next band of `job`'s image.
    ///
    /// Once the last band is submitted the job is marked consumed so it can
    /// start its next recompute.
    pub fn stream<D: Device>(
        &mut self,
        job: &mut HeightMapJob,
        engine: &mut CopyEngine<D>,
        heights: &TrackedResource<D>,
        normals: &TrackedResource<D>,
    ) -> Result<StreamProgress> {
        if job.state() != JobState::Ready {
            return Ok(StreamProgress::Idle);
        }

        let (width, height) = (job.config().width, job.config().height);
        let rows = self.rows_per_band.min(height - self.next_row);
        let region = ImageRegion::rows(width, self.next_row, rows);

        let uploaded = job.with_image(|image| -> Result<u64> {
            let height_bytes: &[u8] = bytemuck::cast_slice(&image.heights);
            let normal_bytes: &[u8] = bytemuck::cast_slice(&image.normals);
            engine.upload_image_region(
                heights,
                &ImageData::tightly_packed(height_bytes, width, height, 4),
                region,
            )?;
            let value = engine.upload_image_region(
                normals,
                &ImageData::tightly_packed(normal_bytes, width, height, 4),
                region,
            )?;
            Ok(value)
        });
        let Some(value) = uploaded.transpose()? else {
            return Ok(StreamProgress::Idle);
        };

        self.next_row += rows;
        tracing::trace!("Streamed height map rows {}..{}", region.y, self.next_row);

        if self.next_row < height {
            return Ok(StreamProgress::Uploading {
                rows_done: self.next_row,
                value,
            });
        }

        self.next_row = 0;
        job.mark_consumed();
        tracing::debug!("Height map generation {} streamed", job.generation());
        Ok(StreamProgress::Complete { value })
    }
}
