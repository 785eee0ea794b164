//! Headless Vulkan instance and logical device.
//!
//! Every Vulkan object in this crate keeps an `Arc<VulkanContext>`, so the
//! logical device and instance are destroyed only after the last semaphore,
//! command pool, and allocation created from them.

use std::ffi::{CStr, CString};
use std::ops::Deref;

use ash::vk;

use crate::error::{GpuError, Result};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Instance, physical device, and logical device with timeline semaphores
/// enabled.
pub struct VulkanContext {
    // Keeps the loader alive for the instance and device function tables.
    #[allow(dead_code)]
    entry: ash::Entry,
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    queue_family: u32,
    queue_count: u32,
}

impl VulkanContext {
    /// The Vulkan instance.
    #[must_use]
    pub const fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// The selected physical device.
    #[must_use]
    pub const fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// The logical device.
    #[must_use]
    pub const fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Family every queue of this context belongs to.
    #[must_use]
    pub const fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Number of distinct queues created in [`Self::queue_family`].
    #[must_use]
    pub const fn queue_count(&self) -> u32 {
        self.queue_count
    }
}

impl Deref for VulkanContext {
    type Target = ash::Device;

    fn deref(&self) -> &ash::Device {
        &self.device
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                tracing::warn!("Device did not go idle before teardown: {e}");
            }
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
        tracing::debug!("Vulkan context destroyed");
    }
}

/// Builder for a [`VulkanContext`] without any presentation support.
pub struct VulkanContextBuilder {
    app_name: String,
    enable_validation: bool,
    queue_count: u32,
}

impl Default for VulkanContextBuilder {
    fn default() -> Self {
        Self {
            app_name: "Strata".to_string(),
            enable_validation: cfg!(debug_assertions),
            queue_count: 2,
        }
    }
}

impl VulkanContextBuilder {
    /// Create a builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Application name reported to the driver.
    #[must_use]
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Request the Khronos validation layer when it is installed.
    #[must_use]
    pub fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Upper bound on queues created in the chosen family.
    #[must_use]
    pub fn queue_count(mut self, count: u32) -> Self {
        self.queue_count = count;
        self
    }

    /// Load the Vulkan loader and create the instance and device.
    ///
    /// Fails with [`GpuError::NoSuitableDevice`] when no loader is installed
    /// or no device supports Vulkan 1.2 timeline semaphores.
    pub fn build(self) -> Result<VulkanContext> {
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| GpuError::NoSuitableDevice(format!("Vulkan loader unavailable: {e}")))?;
        let instance = unsafe { self.create_instance(&entry)? };

        let selected = unsafe { select_device(&instance) };
        let (physical_device, queue_family, available_queues) = match selected {
            Ok(found) => found,
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                return Err(e);
            }
        };
        let queue_count = self.queue_count.clamp(1, available_queues.max(1));

        let device =
            match unsafe { create_device(&instance, physical_device, queue_family, queue_count) } {
                Ok(device) => device,
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            };

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) };
        tracing::info!(
            device = %name.to_string_lossy(),
            queue_family,
            queue_count,
            "Vulkan context ready"
        );

        Ok(VulkanContext {
            entry,
            instance,
            physical_device,
            device,
            queue_family,
            queue_count,
        })
    }

    unsafe fn create_instance(&self, entry: &ash::Entry) -> Result<ash::Instance> {
        let app_name = CString::new(self.app_name.as_str())
            .map_err(|e| GpuError::InvalidState(format!("application name: {e}")))?;
        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"Strata")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_2);

        let mut layers = Vec::new();
        if self.enable_validation {
            let available = entry.enumerate_instance_layer_properties()?;
            let installed = available
                .iter()
                .any(|layer| layer.layer_name_as_c_str() == Ok(VALIDATION_LAYER));
            if installed {
                layers.push(VALIDATION_LAYER.as_ptr());
            } else {
                tracing::warn!("Validation layer {VALIDATION_LAYER:?} not installed");
            }
        }

        #[cfg(target_os = "macos")]
        let (extensions, flags) = (
            vec![ash::khr::portability_enumeration::NAME.as_ptr()],
            vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR,
        );
        #[cfg(not(target_os = "macos"))]
        let (extensions, flags) = (Vec::new(), vk::InstanceCreateFlags::empty());

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_layer_names(&layers)
            .enabled_extension_names(&extensions)
            .flags(flags);
        Ok(entry.create_instance(&create_info, None)?)
    }
}

/// Family able to record transfers and the number of queues it offers.
///
/// Graphics families are preferred; compute families also accept transfer
/// commands without granularity limits.
unsafe fn upload_family(instance: &ash::Instance, device: vk::PhysicalDevice) -> Option<(u32, u32)> {
    let families = instance.get_physical_device_queue_family_properties(device);
    let with = |flags: vk::QueueFlags| {
        families
            .iter()
            .position(|family| family.queue_count > 0 && family.queue_flags.contains(flags))
            .and_then(|index| {
                let count = families[index].queue_count;
                u32::try_from(index).ok().map(|index| (index, count))
            })
    };
    with(vk::QueueFlags::GRAPHICS).or_else(|| with(vk::QueueFlags::COMPUTE))
}

unsafe fn supports_timeline(instance: &ash::Instance, device: vk::PhysicalDevice) -> bool {
    let properties = instance.get_physical_device_properties(device);
    if properties.api_version < vk::API_VERSION_1_2 {
        return false;
    }
    let mut features_12 = vk::PhysicalDeviceVulkan12Features::default();
    let mut features = vk::PhysicalDeviceFeatures2::default().push_next(&mut features_12);
    instance.get_physical_device_features2(device, &mut features);
    features_12.timeline_semaphore == vk::TRUE
}

/// Pick a device with timeline semaphores, discrete GPUs first.
unsafe fn select_device(instance: &ash::Instance) -> Result<(vk::PhysicalDevice, u32, u32)> {
    let mut best: Option<(u8, vk::PhysicalDevice, u32, u32)> = None;
    for device in instance.enumerate_physical_devices()? {
        if !supports_timeline(instance, device) {
            continue;
        }
        let Some((family, count)) = upload_family(instance, device) else {
            continue;
        };
        let rank = match instance.get_physical_device_properties(device).device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => 3,
            vk::PhysicalDeviceType::INTEGRATED_GPU => 2,
            vk::PhysicalDeviceType::VIRTUAL_GPU => 1,
            _ => 0,
        };
        if best.map_or(true, |(best_rank, ..)| rank > best_rank) {
            best = Some((rank, device, family, count));
        }
    }
    best.map(|(_, device, family, count)| (device, family, count))
        .ok_or_else(|| {
            GpuError::NoSuitableDevice("no device supports timeline semaphores".to_string())
        })
}

unsafe fn create_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_family: u32,
    queue_count: u32,
) -> Result<ash::Device> {
    let priorities = vec![1.0_f32; queue_count as usize];
    let queue_infos = [vk::DeviceQueueCreateInfo::default()
        .queue_family_index(queue_family)
        .queue_priorities(&priorities)];

    // Portability implementations reject devices that do not enable this.
    let portability = instance
        .enumerate_device_extension_properties(physical_device)?
        .iter()
        .any(|ext| ext.extension_name_as_c_str() == Ok(ash::khr::portability_subset::NAME));
    let extensions = if portability {
        vec![ash::khr::portability_subset::NAME.as_ptr()]
    } else {
        Vec::new()
    };

    let mut features_12 = vk::PhysicalDeviceVulkan12Features::default().timeline_semaphore(true);
    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_infos)
        .enabled_extension_names(&extensions)
        .push_next(&mut features_12);
    Ok(instance.create_device(physical_device, &create_info, None)?)
}
