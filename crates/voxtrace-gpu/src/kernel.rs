//! Positional kernel argument binding.
//!
//! [`KernelArgs`] is filled in argument order. Every bind is checked against
//! the program's [`KernelSignature`] by position, name, kind, and access, so a
//! reordered or retyped argument is rejected before anything reaches the
//! device.

use voxtrace_core::{ArgKind, ArgSpec, KernelSignature};

use crate::device::{BufferHandle, DeviceBuffer};
use crate::error::{GpuError, Result};

/// A bound kernel argument value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KernelArg {
    /// Device buffer and its size in bytes.
    Buffer { handle: BufferHandle, size: usize },
    /// Scalar integer.
    Int(i32),
}

/// Ordered, validated argument list for one dispatch.
#[derive(Clone, Debug)]
pub struct KernelArgs {
    signature: KernelSignature,
    values: Vec<KernelArg>,
}

impl KernelArgs {
    /// Start binding arguments for `signature`.
    pub fn new(signature: KernelSignature) -> Self {
        Self {
            signature,
            values: Vec::with_capacity(signature.len()),
        }
    }

    pub fn signature(&self) -> &KernelSignature {
        &self.signature
    }

    /// Bind `buffer` as the next argument, which must be named `name`.
    pub fn bind_buffer(&mut self, name: &str, buffer: &DeviceBuffer<'_>) -> Result<&mut Self> {
        let spec = self.next_spec(name)?;
        if !spec.kind.is_buffer() {
            return Err(GpuError::InvalidArgument(format!(
                "`{name}` is a scalar {:?}, a buffer was bound",
                spec.kind
            )));
        }
        if spec.access != buffer.access() {
            return Err(GpuError::InvalidArgument(format!(
                "`{name}` must be {:?}, buffer `{}` is {:?}",
                spec.access,
                buffer.label(),
                buffer.access()
            )));
        }
        if buffer.size() % spec.kind.element_size() != 0 {
            return Err(GpuError::InvalidArgument(format!(
                "`{name}` holds {:?} elements of {} bytes, buffer `{}` has {} bytes",
                spec.kind,
                spec.kind.element_size(),
                buffer.label(),
                buffer.size()
            )));
        }

        self.values.push(KernelArg::Buffer {
            handle: buffer.live_handle()?,
            size: buffer.size(),
        });
        Ok(self)
    }

    /// Bind a scalar as the next argument, which must be named `name`.
    pub fn bind_int(&mut self, name: &str, value: i32) -> Result<&mut Self> {
        let spec = self.next_spec(name)?;
        if spec.kind != ArgKind::IntScalar {
            return Err(GpuError::InvalidArgument(format!(
                "`{name}` is a {:?} buffer, a scalar was bound",
                spec.kind
            )));
        }
        self.values.push(KernelArg::Int(value));
        Ok(self)
    }

    /// Number of arguments bound so far.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns true once every argument of the signature is bound.
    pub fn is_complete(&self) -> bool {
        self.values.len() == self.signature.len()
    }

    /// Fail unless every argument is bound.
    pub fn ensure_complete(&self) -> Result<()> {
        if self.is_complete() {
            Ok(())
        } else {
            Err(GpuError::InvalidArgument(format!(
                "{} of {} kernel arguments bound",
                self.values.len(),
                self.signature.len()
            )))
        }
    }

    /// Bound value at `index`.
    pub fn get(&self, index: usize) -> Option<&KernelArg> {
        self.values.get(index)
    }

    /// Bound arguments paired with their declarations, in position order.
    pub fn iter(&self) -> impl Iterator<Item = (&ArgSpec, &KernelArg)> {
        self.signature.args.iter().zip(&self.values)
    }

    fn next_spec(&self, name: &str) -> Result<ArgSpec> {
        let index = self.values.len();
        let Some(spec) = self.signature.args.get(index).copied() else {
            return Err(GpuError::InvalidArgument(format!(
                "`{name}` bound past the last of {} arguments",
                self.signature.len()
            )));
        };
        if spec.name != name {
            let hint = match self.signature.position(name) {
                Some(position) => format!("it belongs at position {position}"),
                None => "the kernel declares no such argument".to_string(),
            };
            return Err(GpuError::InvalidArgument(format!(
                "position {index} expects `{}`, got `{name}`; {hint}",
                spec.name
            )));
        }
        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::tests::{echo_device, ECHO_SIGNATURE};
    use voxtrace_core::ArgAccess;

    #[test]
    fn binds_in_declared_order() {
        let device = echo_device();
        let input = DeviceBuffer::upload(&device, "in", ArgAccess::ReadOnly, &[0; 8]).unwrap();
        let output = DeviceBuffer::upload(&device, "out", ArgAccess::ReadWrite, &[0; 8]).unwrap();

        let mut args = KernelArgs::new(ECHO_SIGNATURE);
        args.bind_int("scale", 2)
            .unwrap()
            .bind_buffer("input", &input)
            .unwrap()
            .bind_buffer("output", &output)
            .unwrap();

        assert!(args.is_complete());
        assert!(args.ensure_complete().is_ok());
        assert_eq!(args.get(0), Some(&KernelArg::Int(2)));
        assert_eq!(args.iter().count(), 3);
    }

    #[test]
    fn rejects_reordered_arguments() {
        let device = echo_device();
        let input = DeviceBuffer::upload(&device, "in", ArgAccess::ReadOnly, &[0; 8]).unwrap();

        let mut args = KernelArgs::new(ECHO_SIGNATURE);
        let err = args.bind_buffer("input", &input).unwrap_err();
        assert!(err.to_string().contains("position 0 expects `scale`"));
        assert!(args.is_empty());
    }

    #[test]
    fn rejects_retyped_arguments() {
        let device = echo_device();
        let input = DeviceBuffer::upload(&device, "in", ArgAccess::ReadOnly, &[0; 8]).unwrap();

        let mut args = KernelArgs::new(ECHO_SIGNATURE);
        assert!(args.bind_buffer("scale", &input).is_err());

        args.bind_int("scale", 1).unwrap();
        assert!(args.bind_int("input", 5).is_err());

        // Wrong access mode.
        let writable = DeviceBuffer::upload(&device, "w", ArgAccess::ReadWrite, &[0; 8]).unwrap();
        assert!(args.bind_buffer("input", &writable).is_err());

        // Size that is not a whole number of elements.
        let ragged = DeviceBuffer::upload(&device, "r", ArgAccess::ReadOnly, &[0; 6]).unwrap();
        assert!(args.bind_buffer("input", &ragged).is_err());
    }

    #[test]
    fn incomplete_arguments_are_reported() {
        let mut args = KernelArgs::new(ECHO_SIGNATURE);
        args.bind_int("scale", 1).unwrap();
        assert!(!args.is_complete());
        assert!(args.ensure_complete().is_err());
    }
}
