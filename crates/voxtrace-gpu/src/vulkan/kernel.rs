//! Per-kernel Vulkan objects and synchronous submission.

use std::ffi::CStr;
use std::time::Duration;

use ash::vk;

use crate::device::Interrupt;
use crate::error::{GpuError, Result};

/// How long a single fence wait blocks before re-checking for interruption.
pub const FENCE_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Storage buffer bound at a descriptor binding.
#[derive(Clone, Copy, Debug)]
pub struct StorageBinding {
    pub binding: u32,
    pub buffer: vk::Buffer,
    pub range: u64,
}

/// Pipeline, descriptor set, command buffer, and fence of one compute kernel.
///
/// All handles start null, so a partially built pipeline can be destroyed.
#[derive(Default)]
pub struct KernelPipeline {
    set_layout: vk::DescriptorSetLayout,
    layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    descriptor_pool: vk::DescriptorPool,
    command_pool: vk::CommandPool,
    fence: vk::Fence,
}

impl KernelPipeline {
    /// Build the pipeline for `spirv` with `bindings` storage buffers in set 0.
    ///
    /// # Safety
    /// The device must be valid and `queue_family` must support compute.
    pub unsafe fn new(
        device: &ash::Device,
        spirv: &[u32],
        entry_point: &CStr,
        bindings: u32,
        queue_family: u32,
    ) -> Result<Self> {
        let mut kernel = Self::default();
        if let Err(e) = kernel.create(device, spirv, entry_point, bindings, queue_family) {
            kernel.destroy(device);
            return Err(e);
        }
        Ok(kernel)
    }

    unsafe fn create(
        &mut self,
        device: &ash::Device,
        spirv: &[u32],
        entry_point: &CStr,
        bindings: u32,
        queue_family: u32,
    ) -> Result<()> {
        let layout_bindings: Vec<_> = (0..bindings)
            .map(|binding| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(binding)
                    .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                    .descriptor_count(1)
                    .stage_flags(vk::ShaderStageFlags::COMPUTE)
            })
            .collect();
        self.set_layout = device.create_descriptor_set_layout(
            &vk::DescriptorSetLayoutCreateInfo::default().bindings(&layout_bindings),
            None,
        )?;

        let set_layouts = [self.set_layout];
        self.layout = device.create_pipeline_layout(
            &vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts),
            None,
        )?;

        let module = device
            .create_shader_module(&vk::ShaderModuleCreateInfo::default().code(spirv), None)
            .map_err(|e| GpuError::PipelineCreation(format!("shader module: {e}")))?;
        let stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(module)
            .name(entry_point);
        let created = device.create_compute_pipelines(
            vk::PipelineCache::null(),
            &[vk::ComputePipelineCreateInfo::default()
                .stage(stage)
                .layout(self.layout)],
            None,
        );
        device.destroy_shader_module(module, None);
        self.pipeline = created
            .map_err(|(_, e)| GpuError::PipelineCreation(e.to_string()))?
            .first()
            .copied()
            .ok_or_else(|| GpuError::PipelineCreation("no pipeline returned".to_string()))?;

        let pool_sizes = [vk::DescriptorPoolSize::default()
            .ty(vk::DescriptorType::STORAGE_BUFFER)
            .descriptor_count(bindings.max(1))];
        self.descriptor_pool = device.create_descriptor_pool(
            &vk::DescriptorPoolCreateInfo::default()
                .max_sets(1)
                .pool_sizes(&pool_sizes),
            None,
        )?;

        self.command_pool = device.create_command_pool(
            &vk::CommandPoolCreateInfo::default()
                .queue_family_index(queue_family)
                .flags(vk::CommandPoolCreateFlags::TRANSIENT),
            None,
        )?;

        self.fence = device.create_fence(&vk::FenceCreateInfo::default(), None)?;
        Ok(())
    }

    /// Bind `bindings`, dispatch `groups` workgroups, and block until the
    /// results are visible to the host.
    ///
    /// # Safety
    /// Calls must be serialized and every bound buffer must stay alive until
    /// this returns.
    pub unsafe fn run(
        &self,
        device: &ash::Device,
        queue: vk::Queue,
        bindings: &[StorageBinding],
        groups: u32,
        interrupt: &Interrupt,
    ) -> Result<()> {
        device.reset_descriptor_pool(self.descriptor_pool, vk::DescriptorPoolResetFlags::empty())?;
        device.reset_command_pool(self.command_pool, vk::CommandPoolResetFlags::empty())?;

        let set_layouts = [self.set_layout];
        let set = device.allocate_descriptor_sets(
            &vk::DescriptorSetAllocateInfo::default()
                .descriptor_pool(self.descriptor_pool)
                .set_layouts(&set_layouts),
        )?[0];
        write_bindings(device, set, bindings);

        let cmd = device.allocate_command_buffers(
            &vk::CommandBufferAllocateInfo::default()
                .command_pool(self.command_pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1),
        )?[0];
        self.record(device, cmd, set, groups)?;

        device.reset_fences(&[self.fence])?;
        let command_buffers = [cmd];
        device.queue_submit(
            queue,
            &[vk::SubmitInfo::default().command_buffers(&command_buffers)],
            self.fence,
        )?;
        self.wait(device, interrupt)
    }

    unsafe fn record(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        set: vk::DescriptorSet,
        groups: u32,
    ) -> Result<()> {
        device.begin_command_buffer(
            cmd,
            &vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
        )?;
        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, self.pipeline);
        device.cmd_bind_descriptor_sets(
            cmd,
            vk::PipelineBindPoint::COMPUTE,
            self.layout,
            0,
            &[set],
            &[],
        );
        device.cmd_dispatch(cmd, groups, 1, 1);

        // Kernel writes must be visible to mapped reads of the result buffer
        let barrier = vk::MemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::SHADER_WRITE)
            .dst_access_mask(vk::AccessFlags::HOST_READ);
        device.cmd_pipeline_barrier(
            cmd,
            vk::PipelineStageFlags::COMPUTE_SHADER,
            vk::PipelineStageFlags::HOST,
            vk::DependencyFlags::empty(),
            &[barrier],
            &[],
            &[],
        );
        device.end_command_buffer(cmd)?;
        Ok(())
    }

    /// Poll the fence, draining the device if `interrupt` fires first.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    unsafe fn wait(&self, device: &ash::Device, interrupt: &Interrupt) -> Result<()> {
        let timeout = FENCE_POLL_INTERVAL.as_nanos() as u64;
        loop {
            match device.wait_for_fences(&[self.fence], true, timeout) {
                Ok(()) => return Ok(()),
                Err(vk::Result::TIMEOUT) if interrupt.is_triggered() => {
                    tracing::debug!("Interrupted while waiting for kernel, draining device");
                    device.device_wait_idle()?;
                    return Err(GpuError::Interrupted);
                }
                Err(vk::Result::TIMEOUT) => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Destroy every object created so far.
    ///
    /// # Safety
    /// The device must be idle with respect to this kernel.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        // Destroying null handles is a no-op
        device.destroy_fence(self.fence, None);
        device.destroy_command_pool(self.command_pool, None);
        device.destroy_descriptor_pool(self.descriptor_pool, None);
        device.destroy_pipeline(self.pipeline, None);
        device.destroy_pipeline_layout(self.layout, None);
        device.destroy_descriptor_set_layout(self.set_layout, None);
        *self = Self::default();
    }
}

unsafe fn write_bindings(device: &ash::Device, set: vk::DescriptorSet, bindings: &[StorageBinding]) {
    let infos: Vec<[vk::DescriptorBufferInfo; 1]> = bindings
        .iter()
        .map(|b| {
            [vk::DescriptorBufferInfo::default()
                .buffer(b.buffer)
                .offset(0)
                .range(b.range)]
        })
        .collect();
    let writes: Vec<_> = bindings
        .iter()
        .zip(&infos)
        .map(|(b, info)| {
            vk::WriteDescriptorSet::default()
                .dst_set(set)
                .dst_binding(b.binding)
                .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                .buffer_info(info)
        })
        .collect();
    device.update_descriptor_sets(&writes, &[]);
}
