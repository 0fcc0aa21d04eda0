//! Headless Vulkan context: instance, logical device, one compute queue, and
//! the buffer allocator.

use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;

use super::capabilities::GpuCapabilities;
use super::instance::{create_instance, select_device, SelectedDevice};
use super::memory::BufferAllocator;
use crate::error::{GpuError, Result};

pub struct GpuContext {
    pub(crate) allocator: Mutex<BufferAllocator>,
    pub(crate) device: Arc<ash::Device>,
    pub(crate) capabilities: GpuCapabilities,
    pub(crate) compute_queue: vk::Queue,
    pub(crate) compute_queue_family: u32,
    instance: ash::Instance,
    // Keeps the loader library mapped
    _entry: ash::Entry,
}

impl GpuContext {
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn capabilities(&self) -> &GpuCapabilities {
        &self.capabilities
    }

    pub fn compute_queue(&self) -> vk::Queue {
        self.compute_queue
    }

    pub fn compute_queue_family(&self) -> u32 {
        self.compute_queue_family
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            // Allocations must go before the device that owns them
            self.allocator.lock().shutdown();
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

/// Options for [`GpuContext`] creation.
#[derive(Clone, Debug)]
pub struct GpuContextBuilder {
    app_name: String,
    validation: bool,
}

impl Default for GpuContextBuilder {
    fn default() -> Self {
        Self {
            app_name: "Voxtrace".to_string(),
            validation: cfg!(debug_assertions),
        }
    }
}

impl GpuContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Request the Khronos validation layer. On by default in debug builds.
    pub fn validation(mut self, enable: bool) -> Self {
        self.validation = enable;
        self
    }

    pub fn build(self) -> Result<GpuContext> {
        let entry = unsafe { ash::Entry::load() }.map_err(|e| GpuError::Loader(e.to_string()))?;
        let instance = unsafe { create_instance(&entry, &self.app_name, self.validation) }?;

        let opened = unsafe { open_device(&instance) };
        let (selected, device, compute_queue) = match opened {
            Ok(parts) => parts,
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                return Err(e);
            }
        };
        tracing::info!("Selected GPU: {}", selected.capabilities.summary());

        let device = Arc::new(device);
        let allocator = unsafe { BufferAllocator::new(&instance, device.clone(), selected.physical) };
        let allocator = match allocator {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe {
                    device.destroy_device(None);
                    instance.destroy_instance(None);
                }
                return Err(e);
            }
        };

        Ok(GpuContext {
            allocator: Mutex::new(allocator),
            device,
            capabilities: selected.capabilities,
            compute_queue,
            compute_queue_family: selected.queue_family,
            instance,
            _entry: entry,
        })
    }
}

/// Create a logical device with a single queue from the chosen compute family.
///
/// # Safety
/// The instance must be valid.
unsafe fn open_device(
    instance: &ash::Instance,
) -> Result<(SelectedDevice, ash::Device, vk::Queue)> {
    let selected = unsafe { select_device(instance) }?;

    let priority = [1.0_f32];
    let queue_info = vk::DeviceQueueCreateInfo::default()
        .queue_family_index(selected.queue_family)
        .queue_priorities(&priority);
    let device_info =
        vk::DeviceCreateInfo::default().queue_create_infos(std::slice::from_ref(&queue_info));

    let device = unsafe { instance.create_device(selected.physical, &device_info, None) }?;
    let queue = unsafe { device.get_device_queue(selected.queue_family, 0) };
    Ok((selected, device, queue))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_defaults_to_debug_builds() {
        let builder = GpuContextBuilder::new().app_name("probe");
        assert_eq!(builder.validation, cfg!(debug_assertions));
        assert_eq!(builder.app_name, "probe");
        assert!(!builder.validation(false).validation);
    }

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn builds_headless_context() {
        let context = GpuContextBuilder::new().validation(false).build().unwrap();
        assert!(context.capabilities().supports_kernel(7, 64));
    }
}
