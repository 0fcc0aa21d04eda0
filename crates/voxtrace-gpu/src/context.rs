//! Device context shared across render passes.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use voxtrace_core::{ArgAccess, KernelSignature};

use crate::device::{ComputeDevice, DeviceBuffer};
use crate::error::{GpuError, Result};

/// A compute device loaded with a program whose signature has been verified.
pub struct DeviceContext {
    device: Box<dyn ComputeDevice>,
    signature: KernelSignature,
    pass: Mutex<()>,
}

impl DeviceContext {
    /// Wrap `device`, checking that its program declares `expected`.
    pub fn new(device: Box<dyn ComputeDevice>, expected: &KernelSignature) -> Result<Self> {
        let declared = device.kernel_signature();
        expected.check_compatible(&declared).inspect_err(|e| {
            tracing::error!("Device `{}` cannot serve render kernel: {e}", device.name());
        })?;

        tracing::info!(
            "Device context ready on `{}` (kernel `{}`, {} arguments)",
            device.name(),
            declared.entry_point,
            declared.len()
        );

        Ok(Self {
            device,
            signature: declared,
            pass: Mutex::new(()),
        })
    }

    pub fn device(&self) -> &dyn ComputeDevice {
        self.device.as_ref()
    }

    /// Verified kernel signature.
    pub fn signature(&self) -> &KernelSignature {
        &self.signature
    }

    /// Outstanding device buffers.
    pub fn live_allocations(&self) -> usize {
        self.device.live_allocations()
    }

    /// Claim the context for one render pass.
    ///
    /// Fails with [`GpuError::PassInFlight`] while another pass holds it.
    pub fn begin_pass(&self) -> Result<PassLock<'_>> {
        let guard = self.pass.try_lock().ok_or(GpuError::PassInFlight)?;
        Ok(PassLock {
            _guard: guard,
            context: self,
        })
    }
}

impl std::fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceContext")
            .field("device", &self.device.name())
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

/// Exclusive use of a [`DeviceContext`] for the duration of one pass.
pub struct PassLock<'a> {
    _guard: MutexGuard<'a, ()>,
    context: &'a DeviceContext,
}

impl<'a> PassLock<'a> {
    pub fn context(&self) -> &'a DeviceContext {
        self.context
    }

    pub fn device(&self) -> &'a dyn ComputeDevice {
        self.context.device()
    }

    /// Upload `contents` into a new device buffer owned by the pass.
    pub fn upload(
        &self,
        label: impl Into<String>,
        access: ArgAccess,
        contents: &[u8],
    ) -> Result<DeviceBuffer<'a>> {
        DeviceBuffer::upload(self.device(), label, access, contents)
    }
}

/// Lazily initialized, shared [`DeviceContext`].
#[derive(Default)]
pub struct ContextSlot {
    context: Mutex<Option<Arc<DeviceContext>>>,
}

impl ContextSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared context, running `init` on the first call only.
    ///
    /// A failed `init` leaves the slot empty so a later call can retry.
    pub fn acquire<F, E>(&self, init: F) -> std::result::Result<Arc<DeviceContext>, E>
    where
        F: FnOnce() -> std::result::Result<DeviceContext, E>,
    {
        let mut slot = self.context.lock();
        if let Some(context) = slot.as_ref() {
            return Ok(Arc::clone(context));
        }

        let context = Arc::new(init()?);
        *slot = Some(Arc::clone(&context));
        Ok(context)
    }

    /// The context, if it has been initialized.
    pub fn get(&self) -> Option<Arc<DeviceContext>> {
        self.context.lock().clone()
    }
}
