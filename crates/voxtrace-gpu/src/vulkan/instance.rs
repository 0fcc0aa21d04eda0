//! Instance creation and compute device discovery.

use std::ffi::{CStr, CString};

use ash::vk;

use super::capabilities::GpuCapabilities;
use crate::error::{GpuError, Result};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// A physical device chosen for compute, with the queue family to use.
pub struct SelectedDevice {
    pub physical: vk::PhysicalDevice,
    pub capabilities: GpuCapabilities,
    pub queue_family: u32,
}

/// Create a headless instance, adding the validation layer when requested
/// and installed.
///
/// # Safety
/// The entry must be a loaded Vulkan entry point.
pub unsafe fn create_instance(
    entry: &ash::Entry,
    app_name: &str,
    validation: bool,
) -> Result<ash::Instance> {
    let app_name = CString::new(app_name)
        .map_err(|e| GpuError::InvalidState(format!("application name: {e}")))?;
    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .engine_name(c"Voxtrace")
        .api_version(vk::API_VERSION_1_2);

    let mut layers = Vec::new();
    if validation {
        let installed = unsafe { entry.enumerate_instance_layer_properties() }?;
        let present = installed
            .iter()
            .any(|props| props.layer_name_as_c_str().is_ok_and(|name| name == VALIDATION_LAYER));
        if present {
            layers.push(VALIDATION_LAYER.as_ptr());
        } else {
            tracing::warn!("{} requested but not installed", VALIDATION_LAYER.to_string_lossy());
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
    Ok(unsafe { entry.create_instance(&create_info, None) }?)
}

/// Pick the highest-ranked device that exposes a compute queue.
///
/// # Safety
/// The instance must be valid.
pub unsafe fn select_device(instance: &ash::Instance) -> Result<SelectedDevice> {
    let mut best: Option<(u64, SelectedDevice)> = None;
    for physical in unsafe { instance.enumerate_physical_devices() }? {
        let capabilities = unsafe { GpuCapabilities::query(instance, physical) };
        let Some(score) = capabilities.selection_score() else {
            continue;
        };
        let Some(queue_family) = (unsafe { compute_queue_family(instance, physical) }) else {
            continue;
        };
        tracing::debug!("Candidate GPU {} scored {score}", capabilities.name);
        if best.as_ref().map_or(true, |(top, _)| score > *top) {
            best = Some((
                score,
                SelectedDevice {
                    physical,
                    capabilities,
                    queue_family,
                },
            ));
        }
    }
    best.map(|(_, device)| device)
        .ok_or(GpuError::NoSuitableDevice)
}

/// A compute-capable queue family, preferring one without graphics.
unsafe fn compute_queue_family(
    instance: &ash::Instance,
    physical: vk::PhysicalDevice,
) -> Option<u32> {
    let families = unsafe { instance.get_physical_device_queue_family_properties(physical) };
    let compute = |flags: vk::QueueFlags| flags.contains(vk::QueueFlags::COMPUTE);
    families
        .iter()
        .position(|f| compute(f.queue_flags) && !f.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        .or_else(|| families.iter().position(|f| compute(f.queue_flags)))
        .map(|index| index as u32)
}
