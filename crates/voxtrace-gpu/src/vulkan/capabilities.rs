//! Physical device properties relevant to the render kernel.

use ash::vk;
use std::ffi::CStr;

const MIB: u64 = 1024 * 1024;

/// Vendor of a physical device, from its PCI vendor id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Apple,
    Other(u32),
}

impl From<u32> for GpuVendor {
    fn from(id: u32) -> Self {
        match id {
            0x10DE => Self::Nvidia,
            0x1002 => Self::Amd,
            0x8086 => Self::Intel,
            0x106B => Self::Apple,
            other => Self::Other(other),
        }
    }
}

/// Limits and identity of a physical device.
#[derive(Debug, Clone)]
pub struct GpuCapabilities {
    pub name: String,
    pub vendor: GpuVendor,
    pub device_type: vk::PhysicalDeviceType,
    pub api_version: u32,
    pub vram_mib: u64,
    /// Largest single storage buffer range in bytes
    pub max_storage_buffer_range: u32,
    /// Storage buffers bindable to one compute stage
    pub max_storage_buffers: u32,
    pub max_workgroups_x: u32,
    pub max_workgroup_width: u32,
    pub max_invocations: u32,
}

impl GpuCapabilities {
    /// # Safety
    /// The instance and physical device must be valid.
    pub unsafe fn query(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Self {
        let props = unsafe { instance.get_physical_device_properties(physical_device) };
        let memory = unsafe { instance.get_physical_device_memory_properties(physical_device) };
        let heaps = &memory.memory_heaps[..memory.memory_heap_count as usize];
        let limits = &props.limits;

        Self {
            name: unsafe { CStr::from_ptr(props.device_name.as_ptr()) }
                .to_string_lossy()
                .into_owned(),
            vendor: props.vendor_id.into(),
            device_type: props.device_type,
            api_version: props.api_version,
            vram_mib: heaps
                .iter()
                .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
                .map(|heap| heap.size / MIB)
                .sum(),
            max_storage_buffer_range: limits.max_storage_buffer_range,
            max_storage_buffers: limits.max_per_stage_descriptor_storage_buffers,
            max_workgroups_x: limits.max_compute_work_group_count[0],
            max_workgroup_width: limits.max_compute_work_group_size[0],
            max_invocations: limits.max_compute_work_group_invocations,
        }
    }

    /// Whether a kernel with `storage_buffers` bindings and a one-dimensional
    /// workgroup of `workgroup_size` fits this device.
    pub fn supports_kernel(&self, storage_buffers: u32, workgroup_size: u32) -> bool {
        self.max_storage_buffers >= storage_buffers
            && self.max_workgroup_width >= workgroup_size
            && self.max_invocations >= workgroup_size
    }

    /// Largest number of work items one dispatch can cover.
    pub fn max_work_items(&self, workgroup_size: u32) -> u64 {
        u64::from(self.max_workgroups_x) * u64::from(workgroup_size)
    }

    /// Ranking used to choose between devices; `None` below Vulkan 1.1.
    pub fn selection_score(&self) -> Option<u64> {
        let (major, minor) = (
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
        );
        if (major, minor) < (1, 1) {
            return None;
        }
        let kind = match self.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
            vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
            vk::PhysicalDeviceType::VIRTUAL_GPU => 50,
            _ => 0,
        };
        Some(kind + self.vram_mib / 1024)
    }

    pub fn summary(&self) -> String {
        format!(
            "{} ({:?}, Vulkan {}.{}, {} MiB)",
            self.name,
            self.vendor,
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
            self.vram_mib,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities(device_type: vk::PhysicalDeviceType) -> GpuCapabilities {
        GpuCapabilities {
            name: "test".to_string(),
            vendor: GpuVendor::Other(0),
            device_type,
            api_version: vk::API_VERSION_1_2,
            vram_mib: 8192,
            max_storage_buffer_range: 1 << 27,
            max_storage_buffers: 8,
            max_workgroups_x: 65535,
            max_workgroup_width: 1024,
            max_invocations: 1024,
        }
    }

    #[test]
    fn vendor_ids() {
        assert_eq!(GpuVendor::from(0x10DE), GpuVendor::Nvidia);
        assert_eq!(GpuVendor::from(0x106B), GpuVendor::Apple);
        assert_eq!(GpuVendor::from(0x1234), GpuVendor::Other(0x1234));
    }

    #[test]
    fn seven_bindings_of_64_fit() {
        let caps = capabilities(vk::PhysicalDeviceType::DISCRETE_GPU);
        assert!(caps.supports_kernel(7, 64));
        assert!(!caps.supports_kernel(9, 64));
        assert!(!caps.supports_kernel(7, 2048));
        assert_eq!(caps.max_work_items(64), 65535 * 64);
        assert!(caps.summary().contains("Vulkan 1.2"));
    }

    #[test]
    fn discrete_outranks_integrated() {
        let discrete = capabilities(vk::PhysicalDeviceType::DISCRETE_GPU);
        let integrated = capabilities(vk::PhysicalDeviceType::INTEGRATED_GPU);
        assert!(discrete.selection_score() > integrated.selection_score());

        let mut old = discrete;
        old.api_version = vk::API_VERSION_1_0;
        assert_eq!(old.selection_score(), None);
    }
}
