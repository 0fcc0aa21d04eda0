//! Vulkan implementation of [`ComputeDevice`].

use std::ffi::CString;
use std::sync::atomic::{AtomicU64, Ordering};

use gpu_allocator::MemoryLocation;
use hashbrown::HashMap;
use parking_lot::Mutex;
use voxtrace_core::{ArgAccess, KernelSignature};

use super::capabilities::GpuCapabilities;
use super::context::GpuContext;
use super::kernel::{KernelPipeline, StorageBinding};
use super::memory::StorageBuffer;
use crate::device::{BufferHandle, ComputeDevice, Interrupt};
use crate::error::{GpuError, Result};
use crate::kernel::{KernelArg, KernelArgs};

/// Compute device running one SPIR-V kernel on a Vulkan queue.
///
/// Every argument is bound as a storage buffer in descriptor set 0 at the
/// binding equal to its position. Scalar arguments are uploaded into
/// transient four-byte buffers for the duration of a dispatch.
pub struct VulkanDevice {
    name: String,
    signature: KernelSignature,
    workgroup_size: u32,
    kernel: Mutex<KernelPipeline>,
    buffers: Mutex<HashMap<BufferHandle, StorageBuffer>>,
    next_handle: AtomicU64,
    // Declared last so it is dropped after the objects created from it
    context: GpuContext,
}

impl VulkanDevice {
    /// Load `spirv` as the kernel declared by `signature`.
    pub fn new(
        context: GpuContext,
        spirv: &[u32],
        signature: KernelSignature,
        workgroup_size: u32,
    ) -> Result<Self> {
        let caps = context.capabilities();
        let bindings = signature.len() as u32;
        ensure_supported(caps, bindings, workgroup_size)?;

        let entry_point = CString::new(signature.entry_point)
            .map_err(|e| GpuError::PipelineCreation(format!("invalid entry point: {e}")))?;
        let kernel = unsafe {
            KernelPipeline::new(
                context.device(),
                spirv,
                &entry_point,
                bindings,
                context.compute_queue_family(),
            )?
        };

        let name = caps.name.clone();
        tracing::info!(
            "Loaded kernel `{}` on {name} (workgroup size {workgroup_size})",
            signature.entry_point
        );
        Ok(Self {
            name,
            signature,
            workgroup_size,
            kernel: Mutex::new(kernel),
            buffers: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            context,
        })
    }

    /// Underlying Vulkan context.
    pub fn context(&self) -> &GpuContext {
        &self.context
    }

    /// Resolve `args` to descriptor bindings, uploading scalars into
    /// `scalars`.
    fn storage_bindings(
        &self,
        args: &KernelArgs,
        scalars: &mut Vec<StorageBuffer>,
    ) -> Result<Vec<StorageBinding>> {
        let buffers = self.buffers.lock();
        let mut bindings = Vec::with_capacity(args.len());

        for (binding, (spec, arg)) in (0_u32..).zip(args.iter()) {
            let (buffer, range) = match *arg {
                KernelArg::Buffer { handle, .. } => {
                    let buffer = buffers
                        .get(&handle)
                        .ok_or(GpuError::UnknownBuffer(handle.raw()))?;
                    (buffer.buffer, buffer.size)
                }
                KernelArg::Int(value) => {
                    let scalar = self.context.allocator.lock().create(
                        4,
                        MemoryLocation::CpuToGpu,
                        spec.name,
                    )?;
                    let raw = scalar.buffer;
                    scalars.push(scalar);
                    if let Some(scalar) = scalars.last() {
                        scalar.write_bytes(&value.to_ne_bytes())?;
                    }
                    (raw, 4)
                }
            };
            bindings.push(StorageBinding {
                binding,
                buffer,
                range,
            });
        }

        Ok(bindings)
    }
}

impl ComputeDevice for VulkanDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn kernel_signature(&self) -> KernelSignature {
        self.signature
    }

    fn create_buffer(
        &self,
        label: &str,
        access: ArgAccess,
        contents: &[u8],
    ) -> Result<BufferHandle> {
        let max = self.context.capabilities().max_storage_buffer_range;
        if contents.len() as u64 > u64::from(max) {
            return Err(GpuError::AllocationFailed(format!(
                "`{label}` needs {} bytes, storage buffers are limited to {max}",
                contents.len()
            )));
        }

        let location = match access {
            ArgAccess::ReadOnly => MemoryLocation::CpuToGpu,
            ArgAccess::ReadWrite => MemoryLocation::GpuToCpu,
        };

        let mut allocator = self.context.allocator.lock();
        let mut buffer = allocator.create(contents.len() as u64, location, label)?;
        if let Err(e) = buffer.write_bytes(contents) {
            allocator.free(&mut buffer)?;
            return Err(e);
        }
        drop(allocator);

        let handle = BufferHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.buffers.lock().insert(handle, buffer);
        Ok(handle)
    }

    fn release_buffer(&self, handle: BufferHandle) -> Result<()> {
        let mut buffer = self
            .buffers
            .lock()
            .remove(&handle)
            .ok_or(GpuError::UnknownBuffer(handle.raw()))?;
        self.context.allocator.lock().free(&mut buffer)
    }

    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    fn dispatch(&self, args: &KernelArgs, work_items: u32, interrupt: &Interrupt) -> Result<()> {
        args.ensure_complete()?;
        if *args.signature() != self.signature {
            return Err(GpuError::InvalidArgument(format!(
                "arguments were bound for kernel `{}`, device runs `{}`",
                args.signature().entry_point,
                self.signature.entry_point
            )));
        }

        let max_items = self.context.capabilities().max_work_items(self.workgroup_size);
        if u64::from(work_items) > max_items {
            return Err(GpuError::InvalidArgument(format!(
                "{work_items} work items exceed the device limit of {max_items}"
            )));
        }
        interrupt.check()?;

        // Holding the kernel serializes submissions
        let kernel = self.kernel.lock();
        let mut scalars = Vec::new();
        let result = self.storage_bindings(args, &mut scalars).and_then(|bindings| unsafe {
            kernel.run(
                self.context.device(),
                self.context.compute_queue(),
                &bindings,
                work_items.div_ceil(self.workgroup_size),
                interrupt,
            )
        });

        let mut allocator = self.context.allocator.lock();
        for mut scalar in scalars {
            if let Err(e) = allocator.free(&mut scalar) {
                tracing::warn!("Failed to free scalar argument buffer: {e}");
            }
        }

        result
    }

    fn read_buffer(&self, handle: BufferHandle, out: &mut [u8]) -> Result<()> {
        let buffers = self.buffers.lock();
        let buffer = buffers
            .get(&handle)
            .ok_or(GpuError::UnknownBuffer(handle.raw()))?;
        buffer.read_bytes(out)
    }

    fn live_allocations(&self) -> usize {
        self.buffers.lock().len()
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        let device = self.context.device.clone();
        unsafe {
            let _ = device.device_wait_idle();
        }

        let mut buffers = self.buffers.lock();
        if !buffers.is_empty() {
            tracing::warn!("{} device buffers still live at device teardown", buffers.len());
        }
        let mut allocator = self.context.allocator.lock();
        for (_, mut buffer) in buffers.drain() {
            let _ = allocator.free(&mut buffer);
        }
        drop(allocator);
        drop(buffers);

        unsafe { self.kernel.get_mut().destroy(&device) };
    }
}

/// Reject kernels whose bindings or workgroup exceed the device limits.
fn ensure_supported(caps: &GpuCapabilities, bindings: u32, workgroup_size: u32) -> Result<()> {
    if caps.supports_kernel(bindings, workgroup_size) {
        return Ok(());
    }
    Err(GpuError::PipelineCreation(format!(
        "{} cannot bind {bindings} storage buffers with workgroup size {workgroup_size}",
        caps.name
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceBuffer;
    use crate::vulkan::GpuContextBuilder;
    use voxtrace_core::{ArgKind, ArgSpec};

    const SIGNATURE: KernelSignature =
        KernelSignature::new("main", &[ArgSpec::output("out", ArgKind::Pixels)]);

    fn small_device() -> GpuCapabilities {
        GpuCapabilities {
            name: "Tiny GPU".to_string(),
            vendor: crate::vulkan::GpuVendor::Other(0),
            device_type: ash::vk::PhysicalDeviceType::INTEGRATED_GPU,
            api_version: ash::vk::API_VERSION_1_1,
            vram_mib: 512,
            max_storage_buffer_range: 1 << 27,
            max_storage_buffers: 4,
            max_workgroups_x: 65535,
            max_workgroup_width: 128,
            max_invocations: 128,
        }
    }

    #[test]
    fn unsupported_kernel_names_the_device() {
        let caps = small_device();
        assert!(ensure_supported(&caps, 4, 64).is_ok());

        let err = ensure_supported(&caps, 7, 64).unwrap_err();
        assert!(matches!(&err, GpuError::PipelineCreation(msg) if msg.starts_with("Tiny GPU")));
        assert!(ensure_supported(&caps, 4, 256).is_err());
    }

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn context_creation() {
        let context = GpuContextBuilder::new().validation(false).build();
        assert!(context.is_ok(), "Failed to create GPU context");
    }

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn rejects_invalid_spirv() {
        let context = GpuContextBuilder::new().validation(false).build().unwrap();
        assert!(VulkanDevice::new(context, &[0xdead_beef], SIGNATURE, 64).is_err());
    }

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn buffers_round_trip_through_device_memory() {
        let context = GpuContextBuilder::new().validation(false).build().unwrap();
        let device = VulkanDevice {
            name: "test".to_string(),
            signature: SIGNATURE,
            workgroup_size: 64,
            kernel: Mutex::new(KernelPipeline::default()),
            buffers: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            context,
        };

        let buffer =
            DeviceBuffer::upload(&device, "data", ArgAccess::ReadWrite, &[1, 2, 3, 4]).unwrap();
        let mut out = [0_u8; 4];
        buffer.read_into(&mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);

        drop(buffer);
        assert_eq!(device.live_allocations(), 0);
    }
}
