//! Generating a height map on a pool and streaming it through the copy engine.

use std::sync::Arc;

use strata_gpu::{
    CopyEngine, CopyEngineConfig, HeadlessDevice, ResourceLayout, SubmissionQueue,
    TrackedResource,
};
use strata_jobs::{PoolConfig, ThreadPool};
use strata_world::{HeightMapConfig, HeightMapJob, HeightMapStreamer, JobState, StreamProgress};

#[test]
fn ready_image_streams_in_bands_and_is_released() {
    let config = HeightMapConfig {
        seed: 11,
        width: 32,
        height: 20,
        tile_size: 8,
        scale: 12.0,
        octaves: 2,
        ..Default::default()
    };

    let device = Arc::new(HeadlessDevice::auto_completing());
    let queue =
        SubmissionQueue::new(Arc::clone(&device), device.create_queue("copy"), "copy").unwrap();
    let mut engine = CopyEngine::new(
        queue,
        CopyEngineConfig {
            slot_capacity: 64 * 1024,
        },
        None,
    )
    .unwrap();
    let heights = TrackedResource::new(
        "heights",
        device.create_image(32, 20, 4, 1),
        ResourceLayout::Undefined,
    );
    let normals = TrackedResource::new(
        "normals",
        device.create_image(32, 20, 4, 1),
        ResourceLayout::Undefined,
    );

    let mut pool = ThreadPool::new(PoolConfig::hot().with_threads(2), None).unwrap();
    let mut job = HeightMapJob::new(config, None).unwrap();
    let mut streamer = HeightMapStreamer::new(8);

    assert_eq!(
        streamer
            .stream(&mut job, &mut engine, &heights, &normals)
            .unwrap(),
        StreamProgress::Idle
    );

    job.request_recompute();
    assert_eq!(job.finish(&mut pool), JobState::Ready);
    let (expected_heights, expected_normals) = job
        .with_image(|image| {
            (
                bytemuck::cast_slice::<f32, u8>(&image.heights).to_vec(),
                bytemuck::cast_slice::<u32, u8>(&image.normals).to_vec(),
            )
        })
        .unwrap();

    let mut bands = 0;
    loop {
        bands += 1;
        match streamer
            .stream(&mut job, &mut engine, &heights, &normals)
            .unwrap()
        {
            StreamProgress::Uploading { rows_done, .. } => assert_eq!(rows_done, bands * 8),
            StreamProgress::Complete { value } => {
                assert_eq!(value, engine.queue().last_signaled_value());
                break;
            }
            StreamProgress::Idle => panic!("job went idle mid-stream"),
        }
    }

    assert_eq!(bands, 3);
    assert_eq!(job.state(), JobState::Obsolete);
    assert_eq!(heights.raw().mip_contents(0).unwrap(), expected_heights);
    assert_eq!(normals.raw().mip_contents(0).unwrap(), expected_normals);
    assert!(heights.is_ready(None));
}
