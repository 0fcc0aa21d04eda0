//! Compute device interface and buffer ownership.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use voxtrace_core::{ArgAccess, KernelSignature};

use crate::error::{GpuError, Result};
use crate::kernel::KernelArgs;

/// Opaque identifier of a buffer allocated on a [`ComputeDevice`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub(crate) u64);

impl BufferHandle {
    /// Raw handle value.
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Cooperative cancellation flag shared between a pass and its owner.
#[derive(Clone, Debug, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that the running pass stops at the next check.
    pub fn trigger(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Clear a previous request.
    pub fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Fail with [`GpuError::Interrupted`] if a stop was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_triggered() {
            Err(GpuError::Interrupted)
        } else {
            Ok(())
        }
    }
}

/// A device able to hold buffers and run one compiled kernel.
///
/// Implementations must be usable from any thread; a render pass serializes
/// its own calls through the device context's pass lock.
pub trait ComputeDevice: Send + Sync {
    /// Human-readable device name.
    fn name(&self) -> &str;

    /// Signature declared by the loaded program.
    fn kernel_signature(&self) -> KernelSignature;

    /// Allocate a buffer initialized with `contents`.
    fn create_buffer(&self, label: &str, access: ArgAccess, contents: &[u8])
        -> Result<BufferHandle>;

    /// Free a buffer. Releasing an unknown handle is an error.
    fn release_buffer(&self, handle: BufferHandle) -> Result<()>;

    /// Run the kernel over `work_items` invocations and block until it finishes.
    fn dispatch(&self, args: &KernelArgs, work_items: u32, interrupt: &Interrupt) -> Result<()>;

    /// Blocking copy of a buffer's leading bytes into `out`.
    fn read_buffer(&self, handle: BufferHandle, out: &mut [u8]) -> Result<()>;

    /// Number of buffers currently allocated.
    fn live_allocations(&self) -> usize;
}

impl<T: ComputeDevice + ?Sized> ComputeDevice for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn kernel_signature(&self) -> KernelSignature {
        (**self).kernel_signature()
    }

    fn create_buffer(
        &self,
        label: &str,
        access: ArgAccess,
        contents: &[u8],
    ) -> Result<BufferHandle> {
        (**self).create_buffer(label, access, contents)
    }

    fn release_buffer(&self, handle: BufferHandle) -> Result<()> {
        (**self).release_buffer(handle)
    }

    fn dispatch(&self, args: &KernelArgs, work_items: u32, interrupt: &Interrupt) -> Result<()> {
        (**self).dispatch(args, work_items, interrupt)
    }

    fn read_buffer(&self, handle: BufferHandle, out: &mut [u8]) -> Result<()> {
        (**self).read_buffer(handle, out)
    }

    fn live_allocations(&self) -> usize {
        (**self).live_allocations()
    }
}

/// Device buffer released exactly once, explicitly or on drop.
pub struct DeviceBuffer<'d> {
    device: &'d dyn ComputeDevice,
    handle: Option<BufferHandle>,
    label: String,
    access: ArgAccess,
    size: usize,
}

impl<'d> DeviceBuffer<'d> {
    /// Allocate a buffer on `device` holding a copy of `contents`.
    pub fn upload(
        device: &'d dyn ComputeDevice,
        label: impl Into<String>,
        access: ArgAccess,
        contents: &[u8],
    ) -> Result<Self> {
        let label = label.into();
        let handle = device.create_buffer(&label, access, contents)?;
        tracing::debug!(buffer = %handle, label = %label, bytes = contents.len(), "Uploaded buffer");
        Ok(Self {
            device,
            handle: Some(handle),
            label,
            access,
            size: contents.len(),
        })
    }

    /// Device handle; `None` only after release.
    pub fn handle(&self) -> Option<BufferHandle> {
        self.handle
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn access(&self) -> ArgAccess {
        self.access
    }

    /// Size in bytes of the uploaded contents.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Blocking read of the buffer contents into `out`.
    pub fn read_into(&self, out: &mut [u8]) -> Result<()> {
        let handle = self.live_handle()?;
        if out.len() != self.size {
            return Err(GpuError::SizeMismatch {
                expected: self.size,
                actual: out.len(),
            });
        }
        self.device.read_buffer(handle, out)
    }

    /// Release the device allocation now.
    pub fn release(mut self) -> Result<()> {
        self.release_inner()
    }

    pub(crate) fn live_handle(&self) -> Result<BufferHandle> {
        self.handle
            .ok_or_else(|| GpuError::InvalidState(format!("buffer `{}` already released", self.label)))
    }

    fn release_inner(&mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => {
                tracing::trace!(buffer = %handle, label = %self.label, "Releasing buffer");
                self.device.release_buffer(handle)
            }
            None => Ok(()),
        }
    }
}

impl Drop for DeviceBuffer<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.release_inner() {
            tracing::warn!("Failed to release buffer `{}`: {e}", self.label);
        }
    }
}

impl fmt::Debug for DeviceBuffer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("label", &self.label)
            .field("handle", &self.handle)
            .field("access", &self.access)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::tests::echo_device;

    #[test]
    fn interrupt_round_trip() {
        let interrupt = Interrupt::new();
        assert!(interrupt.check().is_ok());

        let shared = interrupt.clone();
        shared.trigger();
        assert!(interrupt.is_triggered());
        assert!(matches!(interrupt.check(), Err(GpuError::Interrupted)));

        interrupt.reset();
        assert!(!shared.is_triggered());
    }

    #[test]
    fn buffer_released_once_on_drop() {
        let device = echo_device();
        {
            let _buffer =
                DeviceBuffer::upload(&device, "a", ArgAccess::ReadOnly, &[1, 2, 3, 4]).unwrap();
            assert_eq!(device.live_allocations(), 1);
        }
        assert_eq!(device.live_allocations(), 0);
        assert_eq!(device.stats().releases, 1);
    }

    #[test]
    fn explicit_release_is_not_repeated_by_drop() {
        let device = echo_device();
        let buffer = DeviceBuffer::upload(&device, "a", ArgAccess::ReadOnly, &[0; 8]).unwrap();
        buffer.release().unwrap();

        assert_eq!(device.live_allocations(), 0);
        assert_eq!(device.stats().releases, 1);
    }

    #[test]
    fn shared_device_tracks_the_same_buffers() {
        let device = Arc::new(echo_device());
        let shared: &dyn ComputeDevice = &device;

        let buffer = DeviceBuffer::upload(shared, "a", ArgAccess::ReadOnly, &[0; 4]).unwrap();
        assert_eq!(device.live_allocations(), 1);
        drop(buffer);
        assert_eq!(device.stats().allocations, 1);
        assert_eq!(device.live_allocations(), 0);
    }

    #[test]
    fn read_checks_length() {
        let device = echo_device();
        let buffer =
            DeviceBuffer::upload(&device, "a", ArgAccess::ReadWrite, &[1, 2, 3, 4]).unwrap();

        let mut out = [0_u8; 4];
        buffer.read_into(&mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);

        let mut short = [0_u8; 2];
        assert!(matches!(
            buffer.read_into(&mut short),
            Err(GpuError::SizeMismatch { expected: 4, actual: 2 })
        ));
    }
}
