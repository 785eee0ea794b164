//! Timeline semaphore helpers.

use ash::vk;

use crate::device::FenceWait;
use crate::error::Result;

/// Create a timeline semaphore starting at `initial`.
///
/// # Safety
/// The device must be valid and support timeline semaphores.
pub unsafe fn create_timeline_semaphore(device: &ash::Device, initial: u64) -> Result<vk::Semaphore> {
    let mut type_info = vk::SemaphoreTypeCreateInfo::default()
        .semaphore_type(vk::SemaphoreType::TIMELINE)
        .initial_value(initial);
    let create_info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);
    let semaphore = device.create_semaphore(&create_info, None)?;
    Ok(semaphore)
}

/// Current counter value of a timeline semaphore.
///
/// # Safety
/// The device and semaphore must be valid.
pub unsafe fn semaphore_value(device: &ash::Device, semaphore: vk::Semaphore) -> Result<u64> {
    Ok(device.get_semaphore_counter_value(semaphore)?)
}

/// Block until `semaphore` reaches `value` or `timeout_ns` elapses.
///
/// # Safety
/// The device and semaphore must be valid.
pub unsafe fn wait_for_semaphore(
    device: &ash::Device,
    semaphore: vk::Semaphore,
    value: u64,
    timeout_ns: u64,
) -> Result<FenceWait> {
    let semaphores = [semaphore];
    let values = [value];
    let wait_info = vk::SemaphoreWaitInfo::default()
        .semaphores(&semaphores)
        .values(&values);

    match device.wait_semaphores(&wait_info, timeout_ns) {
        Ok(()) => Ok(FenceWait::Reached),
        Err(vk::Result::TIMEOUT) => Ok(FenceWait::TimedOut),
        Err(e) => Err(e.into()),
    }
}

/// A pending `(semaphore, value)` wait for the next submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimelineWait {
    /// Semaphore to wait on.
    pub semaphore: vk::Semaphore,
    /// Value to wait for.
    pub value: u64,
}

/// Submit `command_buffers` after `waits`, optionally signalling a timeline
/// value when they finish.
///
/// # Safety
/// All handles must be valid and the command buffers must be executable.
pub unsafe fn submit_timeline(
    device: &ash::Device,
    queue: vk::Queue,
    command_buffers: &[vk::CommandBuffer],
    waits: &[TimelineWait],
    signal: Option<TimelineWait>,
) -> Result<()> {
    let wait_semaphores: Vec<_> = waits.iter().map(|w| w.semaphore).collect();
    let wait_values: Vec<_> = waits.iter().map(|w| w.value).collect();
    let wait_stages = vec![vk::PipelineStageFlags::ALL_COMMANDS; waits.len()];
    let signal_semaphores: Vec<_> = signal.iter().map(|s| s.semaphore).collect();
    let signal_values: Vec<_> = signal.iter().map(|s| s.value).collect();

    let mut timeline_info = vk::TimelineSemaphoreSubmitInfo::default()
        .wait_semaphore_values(&wait_values)
        .signal_semaphore_values(&signal_values);
    let submit_info = vk::SubmitInfo::default()
        .command_buffers(command_buffers)
        .wait_semaphores(&wait_semaphores)
        .wait_dst_stage_mask(&wait_stages)
        .signal_semaphores(&signal_semaphores)
        .push_next(&mut timeline_info);

    device.queue_submit(queue, &[submit_info], vk::Fence::null())?;
    Ok(())
}
