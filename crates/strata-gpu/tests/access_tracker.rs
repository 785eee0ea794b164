//! Cross-queue hazard tracking against the headless device.

use std::sync::Arc;

use strata_gpu::headless::QueueOp;
use strata_gpu::{
    Device, GpuError, HeadlessDevice, ResourceLayout, SubmissionQueue, TrackedResource,
};

type Queue = SubmissionQueue<HeadlessDevice>;

fn setup() -> (Arc<HeadlessDevice>, Queue, Queue) {
    let device = Arc::new(HeadlessDevice::new());
    let a = SubmissionQueue::new(Arc::clone(&device), device.create_queue("a"), "a").unwrap();
    let b = SubmissionQueue::new(Arc::clone(&device), device.create_queue("b"), "b").unwrap();
    (device, a, b)
}

fn buffer(device: &HeadlessDevice) -> TrackedResource<HeadlessDevice> {
    TrackedResource::new("buffer", device.create_buffer(64), ResourceLayout::Undefined)
}

fn waits(queue: &Queue) -> Vec<(u32, u64)> {
    queue
        .raw()
        .log()
        .iter()
        .filter_map(|op| match op {
            QueueOp::Wait { fence, value } => Some((*fence, *value)),
            _ => None,
        })
        .collect()
}

fn fence_id(queue: &Queue) -> u32 {
    queue.fence().raw().id()
}

#[test]
fn read_after_write_waits_before_reader_commands() {
    let (device, mut a, mut b) = setup();
    let resource = buffer(&device);

    let mut recorder = device.create_recorder(a.raw()).unwrap();
    device.begin_recording(&mut recorder).unwrap();
    resource
        .mark_write(&mut a, 5, ResourceLayout::CopyDest, &mut recorder)
        .unwrap();

    let mut reader = device.create_recorder(b.raw()).unwrap();
    device.begin_recording(&mut reader).unwrap();
    resource.mark_read(&mut b, 3).unwrap();
    device.transition(
        &mut reader,
        resource.raw(),
        ResourceLayout::CopyDest,
        ResourceLayout::ShaderRead,
    );
    b.submit(&mut reader).unwrap();

    let log = b.raw().log();
    let wait = QueueOp::Wait {
        fence: fence_id(&a),
        value: 5,
    };
    let wait_at = log.iter().position(|op| *op == wait).expect("wait recorded");
    let first_command = log
        .iter()
        .position(|op| matches!(op, QueueOp::Transition { .. }))
        .unwrap();
    assert!(wait_at < first_command);
}

#[test]
fn completed_write_needs_no_wait() {
    let (device, mut a, mut b) = setup();
    let resource = buffer(&device);
    let mut recorder = device.create_recorder(a.raw()).unwrap();
    device.begin_recording(&mut recorder).unwrap();

    resource
        .mark_write(&mut a, 1, ResourceLayout::CopyDest, &mut recorder)
        .unwrap();
    a.fence().raw().complete(1);
    resource.mark_read(&mut b, 1).unwrap();

    assert!(waits(&b).is_empty());
}

#[test]
fn same_queue_accesses_never_wait() {
    let (device, mut a, _) = setup();
    let resource = buffer(&device);
    let mut recorder = device.create_recorder(a.raw()).unwrap();
    device.begin_recording(&mut recorder).unwrap();

    resource
        .mark_write(&mut a, 1, ResourceLayout::CopyDest, &mut recorder)
        .unwrap();
    resource.mark_read(&mut a, 2).unwrap();
    resource
        .mark_write(&mut a, 3, ResourceLayout::CopyDest, &mut recorder)
        .unwrap();

    assert!(waits(&a).is_empty());
}

#[test]
fn reads_from_one_queue_coalesce() {
    let (device, mut a, _) = setup();
    let resource = buffer(&device);

    resource.mark_read(&mut a, 1).unwrap();
    resource.mark_read(&mut a, 4).unwrap();
    resource.mark_read(&mut a, 2).unwrap();

    resource.with_tracker(|tracker| {
        assert_eq!(tracker.occupied_read_slots(), 1);
        let slot = tracker
            .read_slots()
            .iter()
            .find(|slot| slot.queue_id() == Some(a.id()))
            .unwrap();
        assert_eq!(slot.required_value(), 4);
    });
}

#[test]
fn write_after_reads_waits_on_every_other_queue() {
    let device = Arc::new(HeadlessDevice::new());
    let mut queues: Vec<Queue> = (0..4)
        .map(|i| {
            let name = format!("q{i}");
            SubmissionQueue::new(Arc::clone(&device), device.create_queue(&name), name).unwrap()
        })
        .collect();
    let resource = buffer(&device);

    for (value, queue) in (10..).zip(queues.iter_mut().skip(1)) {
        resource.mark_read(queue, value).unwrap();
    }

    let mut recorder = device.create_recorder(queues[0].raw()).unwrap();
    device.begin_recording(&mut recorder).unwrap();
    resource
        .mark_write(&mut queues[0], 1, ResourceLayout::CopyDest, &mut recorder)
        .unwrap();

    let mut expected: Vec<_> = queues[1..]
        .iter()
        .zip(10..)
        .map(|(queue, value)| (fence_id(queue), value))
        .collect();
    let mut recorded = waits(&queues[0]);
    expected.sort_unstable();
    recorded.sort_unstable();
    assert_eq!(recorded, expected);

    resource.with_tracker(|tracker| assert_eq!(tracker.occupied_read_slots(), 0));
}

#[test]
fn write_after_write_on_other_queue_waits() {
    let (device, mut a, mut b) = setup();
    let resource = buffer(&device);
    let mut ra = device.create_recorder(a.raw()).unwrap();
    let mut rb = device.create_recorder(b.raw()).unwrap();
    device.begin_recording(&mut ra).unwrap();
    device.begin_recording(&mut rb).unwrap();

    resource
        .mark_write(&mut a, 2, ResourceLayout::CopyDest, &mut ra)
        .unwrap();
    resource
        .mark_write(&mut b, 7, ResourceLayout::CopyDest, &mut rb)
        .unwrap();

    assert_eq!(waits(&b), vec![(fence_id(&a), 2)]);
}

#[test]
fn fifth_concurrent_reader_is_rejected() {
    let device = Arc::new(HeadlessDevice::new());
    let resource = buffer(&device);
    let mut queues: Vec<Queue> = (0..5)
        .map(|i| {
            SubmissionQueue::new(Arc::clone(&device), device.create_queue("q"), format!("q{i}"))
                .unwrap()
        })
        .collect();

    for queue in &mut queues[..4] {
        resource.mark_read(queue, 1).unwrap();
    }
    assert!(matches!(
        resource.mark_read(&mut queues[4], 1),
        Err(GpuError::ReadSlotsExhausted { capacity: 4 })
    ));

    // A retired reader frees its slot.
    queues[2].fence().raw().complete(1);
    resource.mark_read(&mut queues[4], 1).unwrap();
}

#[test]
fn older_write_value_on_same_queue_is_rejected() {
    let (device, mut a, _) = setup();
    let resource = buffer(&device);
    let mut recorder = device.create_recorder(a.raw()).unwrap();
    device.begin_recording(&mut recorder).unwrap();

    resource
        .mark_write(&mut a, 5, ResourceLayout::CopyDest, &mut recorder)
        .unwrap();
    let result = resource.mark_write(&mut a, 4, ResourceLayout::CopyDest, &mut recorder);
    assert!(matches!(
        result,
        Err(GpuError::StaleFenceValue {
            requested: 4,
            recorded: 5
        })
    ));
}

#[test]
fn transition_is_recorded_only_on_layout_change() {
    let (device, mut a, _) = setup();
    let resource: TrackedResource<HeadlessDevice> = TrackedResource::new(
        "image",
        device.create_image(4, 4, 4, 1),
        ResourceLayout::Undefined,
    );
    let mut recorder = device.create_recorder(a.raw()).unwrap();
    device.begin_recording(&mut recorder).unwrap();

    resource
        .mark_write(&mut a, 1, ResourceLayout::CopyDest, &mut recorder)
        .unwrap();
    resource
        .mark_write(&mut a, 2, ResourceLayout::CopyDest, &mut recorder)
        .unwrap();
    a.submit(&mut recorder).unwrap();

    let id = resource.raw().id();
    let transitions: Vec<_> = a
        .raw()
        .log()
        .iter()
        .filter(|op| matches!(op, QueueOp::Transition { .. }))
        .cloned()
        .collect();
    assert_eq!(
        transitions,
        vec![QueueOp::Transition {
            resource: id,
            from: ResourceLayout::Undefined,
            to: ResourceLayout::CopyDest,
        }]
    );
    assert_eq!(resource.layout(), ResourceLayout::CopyDest);
}

#[test]
fn readiness_follows_the_pending_write() {
    let (device, mut a, b) = setup();
    let resource = buffer(&device);
    assert!(resource.is_ready(None));

    let mut recorder = device.create_recorder(a.raw()).unwrap();
    device.begin_recording(&mut recorder).unwrap();
    resource
        .mark_write_next(&mut a, ResourceLayout::CopyDest, &mut recorder)
        .unwrap();

    assert!(!resource.is_ready(None));
    assert!(!resource.is_ready(Some(&b)));
    assert!(resource.is_ready(Some(&a)));

    a.signal_next().unwrap();
    a.fence().raw().complete_signaled();
    assert!(resource.is_ready(None));
}

#[test]
fn older_read_value_than_write_on_same_queue_is_rejected() {
    let (device, mut a, _) = setup();
    let resource = buffer(&device);
    let mut recorder = device.create_recorder(a.raw()).unwrap();
    device.begin_recording(&mut recorder).unwrap();

    resource
        .mark_write(&mut a, 5, ResourceLayout::CopyDest, &mut recorder)
        .unwrap();
    assert!(matches!(
        resource.mark_read(&mut a, 3),
        Err(GpuError::StaleFenceValue {
            requested: 3,
            recorded: 5
        })
    ));
    resource.with_tracker(|tracker| assert_eq!(tracker.occupied_read_slots(), 0));
}

#[test]
fn cross_queue_read_waits_for_the_write_value() {
    let (device, mut a, mut b) = setup();
    let resource = buffer(&device);
    let mut recorder = device.create_recorder(a.raw()).unwrap();
    device.begin_recording(&mut recorder).unwrap();

    resource
        .mark_write(&mut a, 6, ResourceLayout::CopyDest, &mut recorder)
        .unwrap();
    resource.mark_read(&mut b, 2).unwrap();
    assert_eq!(waits(&b), vec![(fence_id(&a), 6)]);

    resource.with_tracker(|tracker| {
        let slot = tracker
            .read_slots()
            .iter()
            .find(|slot| slot.queue_id() == Some(b.id()))
            .unwrap();
        assert_eq!(slot.required_value(), 2);
        assert_eq!(tracker.write_slot().required_value(), 6);
    });

    // Once the write retired, further reads add no waits.
    a.fence().raw().complete(6);
    resource.mark_read(&mut b, 3).unwrap();
    assert_eq!(waits(&b).len(), 1);
}
