//! Host-visible storage buffers backed by `gpu-allocator`.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::{AllocatorDebugSettings, MemoryLocation};

use crate::error::{GpuError, Result};

/// Smallest buffer Vulkan will create; empty uploads are padded to this.
const MIN_BUFFER_SIZE: u64 = 4;

/// Allocator for kernel storage buffers.
///
/// The inner allocator is taken on [`shutdown`](Self::shutdown), which must
/// happen before the logical device is destroyed.
pub struct BufferAllocator {
    allocator: Option<Allocator>,
    device: Arc<ash::Device>,
}

impl BufferAllocator {
    /// # Safety
    /// The instance, device, and physical device must be valid.
    pub unsafe fn new(
        instance: &ash::Instance,
        device: Arc<ash::Device>,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: (*device).clone(),
            physical_device,
            debug_settings: AllocatorDebugSettings {
                log_memory_information: cfg!(debug_assertions),
                log_leaks_on_shutdown: true,
                store_stack_traces: false,
                log_allocations: false,
                log_frees: false,
                log_stack_traces: false,
            },
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| GpuError::AllocationFailed(e.to_string()))?;

        Ok(Self {
            allocator: Some(allocator),
            device,
        })
    }

    fn allocator(&mut self) -> Result<&mut Allocator> {
        self.allocator
            .as_mut()
            .ok_or_else(|| GpuError::InvalidState("allocator already shut down".to_string()))
    }

    /// Create a mapped storage buffer of at least `size` bytes.
    ///
    /// Read-only kernel inputs live in `CpuToGpu` memory, buffers the host
    /// reads back in `GpuToCpu` memory.
    pub fn create(&mut self, size: u64, location: MemoryLocation, name: &str) -> Result<StorageBuffer> {
        let size = size.max(MIN_BUFFER_SIZE);
        let device = Arc::clone(&self.device);
        let buffer = unsafe {
            device.create_buffer(
                &vk::BufferCreateInfo::default()
                    .size(size)
                    .usage(vk::BufferUsageFlags::STORAGE_BUFFER)
                    .sharing_mode(vk::SharingMode::EXCLUSIVE),
                None,
            )?
        };
        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

        let allocation = self.allocator().and_then(|allocator| {
            allocator
                .allocate(&AllocationCreateDesc {
                    name,
                    requirements,
                    location,
                    linear: true,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(|e| GpuError::AllocationFailed(format!("`{name}`: {e}")))
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let mut storage = StorageBuffer {
            buffer,
            allocation: Some(allocation),
            size,
        };
        let bound = storage.allocation.as_ref().map(|a| unsafe {
            device.bind_buffer_memory(buffer, a.memory(), a.offset())
        });
        if let Some(Err(e)) = bound {
            self.free(&mut storage)?;
            return Err(e.into());
        }
        Ok(storage)
    }

    /// Free the memory and handle of `buffer`. Freeing twice is a no-op.
    pub fn free(&mut self, buffer: &mut StorageBuffer) -> Result<()> {
        if let Some(allocation) = buffer.allocation.take() {
            self.allocator()?
                .free(allocation)
                .map_err(|e| GpuError::AllocationFailed(e.to_string()))?;
        }
        if buffer.buffer != vk::Buffer::null() {
            unsafe { self.device.destroy_buffer(buffer.buffer, None) };
            buffer.buffer = vk::Buffer::null();
        }
        Ok(())
    }

    /// Drop the allocator, logging any allocation still outstanding.
    pub fn shutdown(&mut self) {
        self.allocator.take();
    }
}

impl Drop for BufferAllocator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A mapped storage buffer and its allocation.
pub struct StorageBuffer {
    pub buffer: vk::Buffer,
    allocation: Option<Allocation>,
    pub size: u64,
}

impl StorageBuffer {
    fn mapped(&self, len: usize) -> Result<*mut u8> {
        if len as u64 > self.size {
            return Err(GpuError::SizeMismatch {
                expected: self.size as usize,
                actual: len,
            });
        }
        self.allocation
            .as_ref()
            .and_then(Allocation::mapped_ptr)
            .map(|ptr| ptr.as_ptr().cast::<u8>())
            .ok_or_else(|| GpuError::InvalidState("buffer is not host visible".to_string()))
    }

    /// Copy `data` to the start of the buffer.
    pub fn write_bytes(&self, data: &[u8]) -> Result<()> {
        let ptr = self.mapped(data.len())?;
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), ptr, data.len()) };
        Ok(())
    }

    /// Copy the start of the buffer into `out`.
    pub fn read_bytes(&self, out: &mut [u8]) -> Result<()> {
        let ptr = self.mapped(out.len())?;
        unsafe { std::ptr::copy_nonoverlapping(ptr.cast_const(), out.as_mut_ptr(), out.len()) };
        Ok(())
    }
}
