//! Multi-phase height map generation on a worker pool.
//!
//! A [`HeightMapJob`] moves through
//! `Obsolete -> Precomputing -> Computing -> Postcomputing -> Ready`.
//! Each phase pushes its jobs and sets an in-flight counter; the next phase
//! is only scheduled once every job of the previous one decremented it to
//! zero. Phase ordering is therefore carried by data, not by queue order.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crossbeam::utils::Backoff;
use noise::{Fbm, MultiFractal, NoiseFn, Perlin};
use parking_lot::{Condvar, Mutex, RwLock};
use strata_jobs::ThreadPool;
use strata_profiler::{EventCategory, Profiler};

use crate::config::HeightMapConfig;
use crate::error::Result;
use crate::normals::fill_normals;
use crate::tiles::{TileLayout, TileRect};

/// Generation state of a height map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Contents are stale or consumed; a recompute may start.
    Obsolete,
    /// Preparing noise for a new image.
    Precomputing,
    /// Tiles are being filled.
    Computing,
    /// Normalizing heights and deriving normals.
    Postcomputing,
    /// Image and normals are complete.
    Ready,
}

impl JobState {
    /// Whether jobs of this state may still be running.
    #[must_use]
    pub const fn is_busy(self) -> bool {
        matches!(self, Self::Precomputing | Self::Computing | Self::Postcomputing)
    }
}

struct Tile {
    rect: TileRect,
    values: Mutex<TileValues>,
}

struct TileValues {
    heights: Vec<f32>,
    min: f32,
    max: f32,
}

/// Outputs of the postcompute phase.
#[derive(Debug, Default)]
pub struct HeightMapImage {
    /// Heights normalized to `0.0..=1.0`, row-major.
    pub heights: Vec<f32>,
    /// Packed RGBA8 normals, row-major.
    pub normals: Vec<u32>,
}

struct Shared {
    config: HeightMapConfig,
    tiles: Vec<Tile>,
    noise: RwLock<Option<Fbm<Perlin>>>,
    image: Mutex<HeightMapImage>,
    in_flight: AtomicU32,
    settle_lock: Mutex<()>,
    settled: Condvar,
}

impl Shared {
    fn finish_part(&self) {
        if self.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            let _guard = self.settle_lock.lock();
            self.settled.notify_all();
        }
    }

    fn is_settled(&self) -> bool {
        self.in_flight.load(Ordering::Acquire) == 0
    }

    fn precompute(&self, seed: u32) {
        let noise = Fbm::<Perlin>::new(seed)
            .set_octaves(self.config.octaves)
            .set_lacunarity(self.config.lacunarity)
            .set_persistence(self.config.persistence);
        *self.noise.write() = Some(noise);
    }

    fn compute_tile(&self, index: usize) {
        let tile = &self.tiles[index];
        let noise = self.noise.read();
        let Some(noise) = noise.as_ref() else {
            tracing::error!("Tile {index} computed before noise was prepared");
            return;
        };

        let mut values = tile.values.lock();
        values.heights.clear();
        values.min = f32::MAX;
        values.max = f32::MIN;
        let scale = self.config.scale;
        for texel in tile.rect.texels() {
            let nx = (f64::from(texel.x) + 0.5) / scale;
            let ny = (f64::from(texel.y) + 0.5) / scale;
            #[allow(clippy::cast_possible_truncation)]
            let h = noise.get([nx, ny]) as f32;
            values.min = values.min.min(h);
            values.max = values.max.max(h);
            values.heights.push(h);
        }
    }

    fn postcompute(&self) {
        let (min, max) = self.tiles.iter().fold((f32::MAX, f32::MIN), |(lo, hi), tile| {
            let values = tile.values.lock();
            (lo.min(values.min), hi.max(values.max))
        });
        let span = max - min;
        let inv_span = if span > f32::EPSILON { 1.0 / span } else { 0.0 };

        let width = self.config.width as usize;
        let mut image = self.image.lock();
        let image = &mut *image;
        image.heights.resize(self.config.texel_count(), 0.0);
        image.normals.resize(self.config.texel_count(), 0);

        for tile in &self.tiles {
            let values = tile.values.lock();
            let row_len = tile.rect.size.x as usize;
            for (row, src) in values.heights.chunks_exact(row_len).enumerate() {
                let start =
                    (tile.rect.origin.y as usize + row) * width + tile.rect.origin.x as usize;
                for (dst, &h) in image.heights[start..start + row_len].iter_mut().zip(src) {
                    *dst = (h - min) * inv_span;
                }
            }
        }

        fill_normals(
            &image.heights,
            self.config.width,
            self.config.height,
            &mut image.normals,
        );
    }
}

/// A height map computed in gated phases on a [`ThreadPool`].
pub struct HeightMapJob {
    shared: Arc<Shared>,
    state: JobState,
    should_recompute: bool,
    generation: u64,
    started: Option<Instant>,
    profiler: Option<Profiler>,
}

impl HeightMapJob {
    /// Create an idle job. Call [`request_recompute`](Self::request_recompute)
    /// and drive it with [`update`](Self::update).
    pub fn new(config: HeightMapConfig, profiler: Option<Profiler>) -> Result<Self> {
        config.validate()?;

        let layout = TileLayout::new(config.width, config.height, config.tile_size);
        let tiles = layout
            .tiles()
            .iter()
            .map(|&rect| Tile {
                rect,
                values: Mutex::new(TileValues {
                    heights: Vec::with_capacity(rect.texel_count()),
                    min: 0.0,
                    max: 0.0,
                }),
            })
            .collect();

        tracing::debug!(
            "Height map {}x{} split into {} tiles",
            config.width,
            config.height,
            layout.len()
        );

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                tiles,
                noise: RwLock::new(None),
                image: Mutex::new(HeightMapImage::default()),
                in_flight: AtomicU32::new(0),
                settle_lock: Mutex::new(()),
                settled: Condvar::new(),
            }),
            state: JobState::Obsolete,
            should_recompute: false,
            generation: 0,
            started: None,
            profiler,
        })
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &HeightMapConfig {
        &self.shared.config
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> JobState {
        self.state
    }

    /// Number of completed images.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Jobs of the current phase still running.
    #[must_use]
    pub fn in_flight(&self) -> u32 {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    /// Number of tiles computed in parallel.
    #[must_use]
    pub fn tile_count(&self) -> usize {
        self.shared.tiles.len()
    }

    /// Ask for a new image once the current one is consumed.
    pub fn request_recompute(&mut self) {
        self.should_recompute = true;
    }

    /// Release a ready image so the next recompute can start.
    pub fn mark_consumed(&mut self) {
        if self.state == JobState::Ready {
            self.state = JobState::Obsolete;
        }
    }

    /// Run `f` on the finished image.
    ///
    /// Returns `None` unless the job is ready.
    pub fn with_image<R>(&self, f: impl FnOnce(&HeightMapImage) -> R) -> Option<R> {
        (self.state == JobState::Ready).then(|| f(&self.shared.image.lock()))
    }

    /// Advance the state machine as far as finished phases allow, pushing
    /// the next phase's jobs onto `pool`.
    pub fn update(&mut self, pool: &mut ThreadPool) -> JobState {
        loop {
            let settled = self.shared.is_settled();
            match self.state {
                JobState::Obsolete if self.should_recompute => {
                    debug_assert!(settled);
                    self.should_recompute = false;
                    self.started = Some(Instant::now());
                    self.shared.in_flight.store(1, Ordering::Release);

                    let shared = Arc::clone(&self.shared);
                    #[allow(clippy::cast_possible_truncation)]
                    let seed = self.shared.config.seed.wrapping_add(self.generation) as u32;
                    pool.push(move || {
                        shared.precompute(seed);
                        shared.finish_part();
                    });
                    self.state = JobState::Precomputing;
                }
                JobState::Precomputing if settled => {
                    let count = u32::try_from(self.shared.tiles.len()).unwrap_or(u32::MAX);
                    self.shared.in_flight.store(count, Ordering::Release);
                    for index in 0..self.shared.tiles.len() {
                        let shared = Arc::clone(&self.shared);
                        pool.push(move || {
                            shared.compute_tile(index);
                            shared.finish_part();
                        });
                    }
                    self.state = JobState::Computing;
                }
                JobState::Computing if settled => {
                    self.shared.in_flight.store(1, Ordering::Release);
                    let shared = Arc::clone(&self.shared);
                    pool.push(move || {
                        shared.postcompute();
                        shared.finish_part();
                    });
                    self.state = JobState::Postcomputing;
                }
                JobState::Postcomputing if settled => {
                    self.state = JobState::Ready;
                    self.generation += 1;
                    if let Some(started) = self.started.take() {
                        let elapsed = started.elapsed();
                        tracing::info!(
                            "Height map generation {} computed in {:.2} ms",
                            self.generation,
                            elapsed.as_secs_f64() * 1000.0
                        );
                        if let Some(profiler) = &self.profiler {
                            profiler.record_duration(EventCategory::JobPhase, elapsed);
                        }
                    }
                }
                _ => return self.state,
            }
        }
    }

    /// Block until every job of the current phase has finished.
    ///
    /// Spins briefly, then parks on a condition variable.
    pub fn wait_until_settled(&self) {
        if !self.state.is_busy() || self.shared.is_settled() {
            return;
        }

        let start = Instant::now();
        let backoff = Backoff::new();
        while !backoff.is_completed() {
            if self.shared.is_settled() {
                return;
            }
            backoff.snooze();
        }

        let mut guard = self.shared.settle_lock.lock();
        while !self.shared.is_settled() {
            self.shared.settled.wait(&mut guard);
        }
        drop(guard);

        tracing::debug!("Blocked {:?} waiting for {:?} jobs", start.elapsed(), self.state);
        if let Some(profiler) = &self.profiler {
            profiler.record_duration(EventCategory::JobPhase, start.elapsed());
        }
    }

    /// Drive the job to completion, stalling on each phase.
    pub fn finish(&mut self, pool: &mut ThreadPool) -> JobState {
        loop {
            let state = self.update(pool);
            if !state.is_busy() {
                return state;
            }
            self.wait_until_settled();
        }
    }
}

impl Drop for HeightMapJob {
    fn drop(&mut self) {
        // Pushed jobs hold their own Arc; nothing dangles if they outlive us.
        if self.state.is_busy() && !self.shared.is_settled() {
            tracing::debug!("Height map dropped with {} jobs in flight", self.in_flight());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use strata_jobs::PoolConfig;

    fn small_config(seed: u64) -> HeightMapConfig {
        HeightMapConfig {
            seed,
            width: 48,
            height: 40,
            tile_size: 16,
            scale: 20.0,
            octaves: 3,
            ..Default::default()
        }
    }

    fn compute(config: HeightMapConfig, threads: usize) -> Vec<f32> {
        let mut pool = ThreadPool::new(PoolConfig::hot().with_threads(threads), None).unwrap();
        let mut job = HeightMapJob::new(config, None).unwrap();
        job.request_recompute();
        assert_eq!(job.finish(&mut pool), JobState::Ready);
        job.with_image(|image| image.heights.clone()).unwrap()
    }

    #[test]
    fn idle_job_stays_obsolete() {
        let mut pool = ThreadPool::new(PoolConfig::cold().with_threads(1), None).unwrap();
        let mut job = HeightMapJob::new(small_config(1), None).unwrap();
        assert_eq!(job.update(&mut pool), JobState::Obsolete);
        assert!(job.with_image(|_| ()).is_none());
    }

    #[test]
    fn heights_are_normalized() {
        let heights = compute(small_config(7), 3);
        assert_eq!(heights.len(), 48 * 40);

        let min = heights.iter().copied().fold(f32::MAX, f32::min);
        let max = heights.iter().copied().fold(f32::MIN, f32::max);
        assert_relative_eq!(min, 0.0);
        assert_relative_eq!(max, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn result_does_not_depend_on_thread_count() {
        let single = compute(small_config(99), 1);
        let many = compute(small_config(99), 4);
        assert_eq!(single, many);
    }

    #[test]
    fn different_seeds_differ() {
        let a = compute(small_config(1), 2);
        let b = compute(small_config(2), 2);
        let differences = a
            .iter()
            .zip(&b)
            .filter(|(x, y)| (*x - *y).abs() > 1e-3)
            .count();
        assert!(differences > a.len() / 2);
    }

    #[test]
    fn recompute_waits_for_consumption() {
        let mut pool = ThreadPool::new(PoolConfig::hot().with_threads(2), None).unwrap();
        let mut job = HeightMapJob::new(small_config(3), None).unwrap();
        job.request_recompute();
        assert_eq!(job.finish(&mut pool), JobState::Ready);
        assert_eq!(job.generation(), 1);

        job.request_recompute();
        assert_eq!(job.update(&mut pool), JobState::Ready);

        job.mark_consumed();
        assert_eq!(job.finish(&mut pool), JobState::Ready);
        assert_eq!(job.generation(), 2);
    }

    #[test]
    fn phase_timing_reaches_profiler() {
        let profiler = Profiler::new();
        let mut pool = ThreadPool::new(PoolConfig::hot().with_threads(2), None).unwrap();
        let mut job = HeightMapJob::new(small_config(5), Some(profiler.clone())).unwrap();
        job.request_recompute();
        job.finish(&mut pool);

        let _ = profiler.drain();
        assert!(profiler.snapshot().get(EventCategory::JobPhase).is_some());
    }
}
