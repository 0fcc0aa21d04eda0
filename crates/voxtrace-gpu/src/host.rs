//! Host (CPU) compute backend.
//!
//! Buffers live in host memory and the kernel is a [`HostKernel`] run on the
//! calling thread. Every allocation, release, and dispatch is recorded so the
//! resource discipline of a render pass can be inspected after the fact.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytemuck::Pod;
use hashbrown::HashMap;
use parking_lot::Mutex;
use voxtrace_core::{ArgAccess, KernelSignature};

use crate::device::{BufferHandle, ComputeDevice, Interrupt};
use crate::error::{GpuError, Result};
use crate::kernel::{KernelArg, KernelArgs};

/// CPU implementation of a compute kernel.
pub trait HostKernel: Send + Sync {
    /// Signature of the kernel entry point.
    fn signature(&self) -> KernelSignature;

    /// Execute `work_items` invocations against the bound arguments.
    fn run(&self, bindings: &mut HostBindings, work_items: u32) -> Result<()>;
}

struct HostBuffer {
    label: String,
    access: ArgAccess,
    words: Vec<u32>,
    len: usize,
}

impl HostBuffer {
    fn new(label: &str, access: ArgAccess, contents: &[u8]) -> Self {
        let mut words = vec![0_u32; contents.len().div_ceil(4)];
        bytemuck::cast_slice_mut::<u32, u8>(&mut words)[..contents.len()].copy_from_slice(contents);
        Self {
            label: label.to_string(),
            access,
            words,
            len: contents.len(),
        }
    }

    fn bytes(&self) -> &[u8] {
        &bytemuck::cast_slice::<u32, u8>(&self.words)[..self.len]
    }
}

enum HostSlot {
    Buffer {
        handle: BufferHandle,
        buffer: HostBuffer,
    },
    Int(i32),
}

/// Arguments of one host dispatch, in signature order.
pub struct HostBindings {
    slots: Vec<HostSlot>,
}

impl HostBindings {
    /// Number of bound arguments.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Read-only view of every argument.
    pub fn inputs(&self) -> HostInputs<'_> {
        HostInputs {
            head: &self.slots,
            tail: &[],
            output: usize::MAX,
        }
    }

    /// Split off the read-write buffer at `index` as `T` elements, leaving a
    /// read-only view of the remaining arguments.
    pub fn split_output<T: Pod>(&mut self, index: usize) -> Result<(HostInputs<'_>, &mut [T])> {
        if index >= self.slots.len() {
            return Err(GpuError::InvalidArgument(format!(
                "argument {index} is not bound"
            )));
        }
        let (head, rest) = self.slots.split_at_mut(index);
        let (slot, tail) = rest
            .split_first_mut()
            .ok_or_else(|| GpuError::InvalidArgument(format!("argument {index} is not bound")))?;

        let HostSlot::Buffer { buffer, .. } = slot else {
            return Err(GpuError::InvalidArgument(format!(
                "argument {index} is a scalar, not an output buffer"
            )));
        };
        if buffer.access != ArgAccess::ReadWrite {
            return Err(GpuError::InvalidArgument(format!(
                "argument {index} (`{}`) is read-only",
                buffer.label
            )));
        }

        let words = buffer.len / 4;
        let output = bytemuck::try_cast_slice_mut(&mut buffer.words[..words])
            .map_err(|e| GpuError::InvalidArgument(format!("argument {index}: {e}")))?;

        Ok((
            HostInputs {
                head,
                tail,
                output: index,
            },
            output,
        ))
    }
}

/// Read-only access to host dispatch arguments.
pub struct HostInputs<'a> {
    head: &'a [HostSlot],
    tail: &'a [HostSlot],
    output: usize,
}

impl<'a> HostInputs<'a> {
    /// Scalar argument at `index`.
    pub fn int(&self, index: usize) -> Result<i32> {
        match self.slot(index)? {
            HostSlot::Int(value) => Ok(*value),
            HostSlot::Buffer { .. } => Err(GpuError::InvalidArgument(format!(
                "argument {index} is a buffer, not a scalar"
            ))),
        }
    }

    /// Buffer argument at `index` viewed as `T` elements.
    pub fn slice<T: Pod>(&self, index: usize) -> Result<&'a [T]> {
        match self.slot(index)? {
            HostSlot::Buffer { buffer, .. } => {
                let words = &buffer.words[..buffer.len / 4];
                bytemuck::try_cast_slice(words)
                    .map_err(|e| GpuError::InvalidArgument(format!("argument {index}: {e}")))
            }
            HostSlot::Int(_) => Err(GpuError::InvalidArgument(format!(
                "argument {index} is a scalar, not a buffer"
            ))),
        }
    }

    fn slot(&self, index: usize) -> Result<&'a HostSlot> {
        let slot = if index < self.head.len() {
            self.head.get(index)
        } else if index == self.output {
            None
        } else {
            self.tail.get(index - self.head.len() - 1)
        };
        slot.ok_or_else(|| GpuError::InvalidArgument(format!("argument {index} is not readable")))
    }
}

/// Record of one completed host dispatch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchRecord {
    pub work_items: u32,
    pub args: Vec<KernelArg>,
}

/// Allocation and dispatch counters of a [`HostDevice`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HostDeviceStats {
    /// Buffers created over the device lifetime.
    pub allocations: usize,
    /// Buffers released over the device lifetime.
    pub releases: usize,
    /// Labels of created buffers, in creation order.
    pub created: Vec<String>,
    /// Labels of released buffers, in release order.
    pub released: Vec<String>,
    /// Completed dispatches, in order.
    pub dispatches: Vec<DispatchRecord>,
}

/// Compute device that runs a [`HostKernel`] on the CPU.
pub struct HostDevice {
    name: String,
    kernel: Box<dyn HostKernel>,
    buffers: Mutex<HashMap<BufferHandle, HostBuffer>>,
    next_handle: AtomicU64,
    stats: Mutex<HostDeviceStats>,
    fail_next_dispatch: AtomicBool,
}

impl HostDevice {
    pub fn new(kernel: impl HostKernel + 'static) -> Self {
        Self::with_name("host", kernel)
    }

    pub fn with_name(name: impl Into<String>, kernel: impl HostKernel + 'static) -> Self {
        Self {
            name: name.into(),
            kernel: Box::new(kernel),
            buffers: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            stats: Mutex::new(HostDeviceStats::default()),
            fail_next_dispatch: AtomicBool::new(false),
        }
    }

    /// Snapshot of the allocation and dispatch counters.
    pub fn stats(&self) -> HostDeviceStats {
        self.stats.lock().clone()
    }

    /// Make the next dispatch fail with [`GpuError::Execution`].
    pub fn fail_next_dispatch(&self) {
        self.fail_next_dispatch.store(true, Ordering::Release);
    }

    fn take_bindings(&self, args: &KernelArgs) -> Result<HostBindings> {
        let mut buffers = self.buffers.lock();
        let mut slots = Vec::with_capacity(args.len());

        for (spec, arg) in args.iter() {
            match *arg {
                KernelArg::Int(value) => slots.push(HostSlot::Int(value)),
                KernelArg::Buffer { handle, .. } => match buffers.remove(&handle) {
                    Some(buffer) => slots.push(HostSlot::Buffer { handle, buffer }),
                    None => {
                        restore(&mut buffers, slots);
                        return Err(GpuError::InvalidArgument(format!(
                            "`{}` is bound to unknown or duplicate buffer {handle}",
                            spec.name
                        )));
                    }
                },
            }
        }

        Ok(HostBindings { slots })
    }
}

fn restore(buffers: &mut HashMap<BufferHandle, HostBuffer>, slots: Vec<HostSlot>) {
    for slot in slots {
        if let HostSlot::Buffer { handle, buffer } = slot {
            buffers.insert(handle, buffer);
        }
    }
}

impl ComputeDevice for HostDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn kernel_signature(&self) -> KernelSignature {
        self.kernel.signature()
    }

    fn create_buffer(
        &self,
        label: &str,
        access: ArgAccess,
        contents: &[u8],
    ) -> Result<BufferHandle> {
        let handle = BufferHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.buffers
            .lock()
            .insert(handle, HostBuffer::new(label, access, contents));

        let mut stats = self.stats.lock();
        stats.allocations += 1;
        stats.created.push(label.to_string());
        Ok(handle)
    }

    fn release_buffer(&self, handle: BufferHandle) -> Result<()> {
        let buffer = self
            .buffers
            .lock()
            .remove(&handle)
            .ok_or(GpuError::UnknownBuffer(handle.0))?;

        let mut stats = self.stats.lock();
        stats.releases += 1;
        stats.released.push(buffer.label);
        Ok(())
    }

    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    fn dispatch(&self, args: &KernelArgs, work_items: u32, interrupt: &Interrupt) -> Result<()> {
        args.ensure_complete()?;
        interrupt.check()?;

        if self.fail_next_dispatch.swap(false, Ordering::AcqRel) {
            return Err(GpuError::Execution(format!(
                "{}: injected dispatch failure",
                self.name
            )));
        }

        let mut bindings = self.take_bindings(args)?;
        let result = self.kernel.run(&mut bindings, work_items);
        restore(&mut self.buffers.lock(), bindings.slots);
        result?;
        interrupt.check()?;

        self.stats.lock().dispatches.push(DispatchRecord {
            work_items,
            args: args.iter().map(|(_, arg)| *arg).collect(),
        });
        Ok(())
    }

    fn read_buffer(&self, handle: BufferHandle, out: &mut [u8]) -> Result<()> {
        let buffers = self.buffers.lock();
        let buffer = buffers
            .get(&handle)
            .ok_or(GpuError::UnknownBuffer(handle.0))?;
        let bytes = buffer.bytes();
        if out.len() > bytes.len() {
            return Err(GpuError::SizeMismatch {
                expected: bytes.len(),
                actual: out.len(),
            });
        }
        out.copy_from_slice(&bytes[..out.len()]);
        Ok(())
    }

    fn live_allocations(&self) -> usize {
        self.buffers.lock().len()
    }
}
