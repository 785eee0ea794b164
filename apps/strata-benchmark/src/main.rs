//! Strata headless benchmark
//!
//! Generates height maps on the hot pool, streams them through the copy
//! engine into textures, and keeps the cold pool busy with background work.
//! Uploads go to the software device unless `--vulkan` selects a GPU.
//! Prints profiler statistics at the end.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p strata-benchmark --release -- [OPTIONS]
//! ```
//!
//! ## Options
//!
//! - `--seed <N>`: Seed of the first height map (default: 42)
//! - `--size <N>`: Height map edge length in texels (default: 1024)
//! - `--tile <N>`: Tile edge length (default: 128)
//! - `--images <N>`: Number of height maps to generate (default: 4)
//! - `--band <N>`: Rows uploaded per frame (default: 64)
//! - `--hot-threads <N>`: Hot pool size (default: cores - 1)
//! - `--vulkan`: Upload to the first Vulkan GPU with timeline semaphores
//! - `-h, --help`: Print help message
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context};
use ash::vk;
use strata_gpu::{
    CopyEngine, CopyEngineConfig, Device, HeadlessDevice, ResourceLayout, SubmissionQueue,
    TrackedResource, VulkanDevice,
};
use strata_jobs::{JobSystem, JobSystemConfig};
use strata_profiler::{EventCategory, Profiler};
use strata_world::{HeightMapConfig, HeightMapJob, HeightMapStreamer, StreamProgress};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Background jobs pushed to the cold pool per frame.
const COLD_JOBS_PER_FRAME: u64 = 16;

#[derive(Debug)]
struct Options {
    seed: u64,
    size: u32,
    tile: u32,
    images: u64,
    band: u32,
    hot_threads: Option<usize>,
    vulkan: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            seed: 42,
            size: 1024,
            tile: 128,
            images: 4,
            band: 64,
            hot_threads: None,
            vulkan: false,
        }
    }
}

fn parse_args() -> anyhow::Result<Option<Options>> {
    let mut options = Options::default();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "-h" || arg == "--help" {
            print_help();
            return Ok(None);
        }
        if arg == "--vulkan" {
            options.vulkan = true;
            continue;
        }
        let value = args
            .next()
            .with_context(|| format!("missing value for {arg}"))?;
        match arg.as_str() {
            "--seed" => options.seed = value.parse().context("--seed")?,
            "--size" => options.size = value.parse().context("--size")?,
            "--tile" => options.tile = value.parse().context("--tile")?,
            "--images" => options.images = value.parse().context("--images")?,
            "--band" => options.band = value.parse().context("--band")?,
            "--hot-threads" => options.hot_threads = Some(value.parse().context("--hot-threads")?),
            other => bail!("unknown option {other}"),
        }
    }
    Ok(Some(options))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let Some(options) = parse_args()? else {
        return Ok(());
    };
    info!("Strata benchmark: {options:?}");

    let profiler = Profiler::new();

    let mut job_config = JobSystemConfig::default();
    if let Some(threads) = options.hot_threads {
        job_config.hot = job_config.hot.with_threads(threads);
    }
    let mut jobs = JobSystem::new(job_config, Some(profiler.clone()))?;

    let size = options.size;
    if options.vulkan {
        let device = Arc::new(VulkanDevice::headless("strata-benchmark")?);
        let queue = device.create_queue(0);
        let usage = vk::ImageUsageFlags::SAMPLED;
        let heights =
            device.create_image(vk::Format::R32_SFLOAT, size, size, 1, usage, "heights")?;
        let normals =
            device.create_image(vk::Format::R8G8B8A8_UNORM, size, size, 1, usage, "normals")?;
        run(&options, &profiler, &mut jobs, device, queue, heights, normals)
    } else {
        let device = Arc::new(HeadlessDevice::auto_completing());
        let queue = device.create_queue("copy");
        let heights = device.create_image(size, size, 4, 1);
        let normals = device.create_image(size, size, 4, 1);
        run(&options, &profiler, &mut jobs, device, queue, heights, normals)
    }
}

/// Generate and stream `options.images` height maps into `heights` and
/// `normals` on `device`.
fn run<D: Device>(
    options: &Options,
    profiler: &Profiler,
    jobs: &mut JobSystem,
    device: Arc<D>,
    queue: D::Queue,
    heights: D::Resource,
    normals: D::Resource,
) -> anyhow::Result<()> {
    let size = options.size;
    let heights = TrackedResource::new("heights", heights, ResourceLayout::Undefined);
    let normals = TrackedResource::new("normals", normals, ResourceLayout::Undefined);
    let queue = SubmissionQueue::new(device, queue, "copy")?;
    let mut engine = CopyEngine::new(
        queue,
        CopyEngineConfig {
            slot_capacity: 16 * 1024 * 1024,
        },
        Some(profiler.clone()),
    )?;

    let mut height_map = HeightMapJob::new(
        HeightMapConfig {
            seed: options.seed,
            width: size,
            height: size,
            tile_size: options.tile,
            ..Default::default()
        },
        Some(profiler.clone()),
    )?;
    let mut streamer = HeightMapStreamer::new(options.band);

    let background = Arc::new(AtomicU64::new(0));
    let start = Instant::now();
    let mut frames = 0u64;
    let mut streamed = 0u64;

    height_map.request_recompute();
    while streamed < options.images {
        frames += 1;
        let frame = profiler.scope(EventCategory::Custom(0));

        for _ in 0..COLD_JOBS_PER_FRAME {
            let background = Arc::clone(&background);
            jobs.cold().push(move || {
                background.fetch_add(1, Ordering::Relaxed);
            });
        }

        height_map.update(jobs.hot());
        match streamer.stream(&mut height_map, &mut engine, &heights, &normals)? {
            StreamProgress::Complete { value } => {
                streamed += 1;
                info!("Height map {streamed} resident at copy value {value}");
                if streamed < options.images {
                    height_map.request_recompute();
                }
            }
            StreamProgress::Uploading { .. } => {}
            StreamProgress::Idle => std::thread::yield_now(),
        }

        frame.end(1);
    }

    jobs.flush_all();
    engine.flush()?;

    let elapsed = start.elapsed();
    info!(
        "Streamed {streamed} height maps of {size}x{size} in {frames} frames, {:.1} ms",
        elapsed.as_secs_f64() * 1000.0
    );
    info!(
        "Cold pool ran {} background jobs",
        background.load(Ordering::Relaxed)
    );

    let _ = profiler.drain();
    for stats in profiler.snapshot().categories {
        info!(
            "{:<20} {:>8} hits  avg {:>8.3} ms  max {:>8.3} ms  total {:>10.3} ms",
            stats.category.name(),
            stats.hits,
            stats.avg_ms(),
            stats.max_ms(),
            stats.total_ms()
        );
    }

    Ok(())
}

fn print_help() {
    eprintln!(
        "Strata headless benchmark

USAGE:
    cargo run -p strata-benchmark --release -- [OPTIONS]

OPTIONS:
    --seed <N>          Seed of the first height map (default: 42)
    --size <N>          Height map edge length in texels (default: 1024)
    --tile <N>          Tile edge length (default: 128)
    --images <N>        Number of height maps to generate (default: 4)
    --band <N>          Rows uploaded per frame (default: 64)
    --hot-threads <N>   Hot pool size (default: cores - 1)
    --vulkan            Upload to the first Vulkan GPU with timeline semaphores
    -h, --help          Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG            Set log level (e.g., info, debug, trace)"
    );
}
