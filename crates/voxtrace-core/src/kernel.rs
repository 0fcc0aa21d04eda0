//! Kernel signature descriptors.
//!
//! A compiled device program declares the arguments of its entry point as a
//! [`KernelSignature`]. The host side declares the signature it expects, and
//! the two are compared once when a device context is created, so argument
//! order or layout drift is caught at startup instead of at dispatch time.

use std::fmt;

use thiserror::Error;

/// Size in bytes of one material record in the block palette buffer.
pub const MATERIAL_RECORD_BYTES: usize = 48;

/// Element layout of a kernel argument.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArgKind {
    /// Array of `f32` triples (one per pixel).
    FloatTriples,
    /// Single `i32` value.
    IntScalar,
    /// Array of `i32` octree node records.
    Nodes,
    /// Array of material records.
    Materials,
    /// Array of packed `0xAARRGGBB` texels.
    Pixels,
}

impl ArgKind {
    /// Size in bytes of one element of this kind.
    pub const fn element_size(self) -> usize {
        match self {
            Self::FloatTriples => 12,
            Self::IntScalar | Self::Nodes | Self::Pixels => 4,
            Self::Materials => MATERIAL_RECORD_BYTES,
        }
    }

    /// Returns true if the argument is bound as a buffer.
    pub const fn is_buffer(self) -> bool {
        !matches!(self, Self::IntScalar)
    }
}

/// Device-side access mode of a kernel argument.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArgAccess {
    ReadOnly,
    ReadWrite,
}

/// One positional kernel argument.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ArgSpec {
    pub name: &'static str,
    pub kind: ArgKind,
    pub access: ArgAccess,
}

impl ArgSpec {
    /// Read-only argument.
    pub const fn input(name: &'static str, kind: ArgKind) -> Self {
        Self {
            name,
            kind,
            access: ArgAccess::ReadOnly,
        }
    }

    /// Read-write argument.
    pub const fn output(name: &'static str, kind: ArgKind) -> Self {
        Self {
            name,
            kind,
            access: ArgAccess::ReadWrite,
        }
    }
}

impl fmt::Display for ArgSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let access = match self.access {
            ArgAccess::ReadOnly => "read",
            ArgAccess::ReadWrite => "read_write",
        };
        write!(f, "{}: {:?} ({access})", self.name, self.kind)
    }
}

/// Entry point name and ordered argument list of a compiled kernel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KernelSignature {
    pub entry_point: &'static str,
    pub args: &'static [ArgSpec],
}

impl KernelSignature {
    pub const fn new(entry_point: &'static str, args: &'static [ArgSpec]) -> Self {
        Self { entry_point, args }
    }

    /// Number of positional arguments.
    pub const fn len(&self) -> usize {
        self.args.len()
    }

    /// Returns true if the kernel takes no arguments.
    pub const fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Position of the argument with the given name.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.args.iter().position(|arg| arg.name == name)
    }

    /// Check that a program declaring `program` can serve calls made against `self`.
    pub fn check_compatible(&self, program: &Self) -> Result<(), SignatureMismatch> {
        if self.entry_point != program.entry_point {
            return Err(SignatureMismatch::EntryPoint {
                expected: self.entry_point,
                actual: program.entry_point,
            });
        }

        if self.args.len() != program.args.len() {
            return Err(SignatureMismatch::ArgCount {
                expected: self.args.len(),
                actual: program.args.len(),
            });
        }

        for (index, (expected, actual)) in self.args.iter().zip(program.args).enumerate() {
            if expected != actual {
                return Err(SignatureMismatch::Argument {
                    index,
                    expected: *expected,
                    actual: *actual,
                });
            }
        }

        Ok(())
    }
}

/// Disagreement between an expected and a declared kernel signature.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignatureMismatch {
    #[error("kernel entry point is `{actual}`, expected `{expected}`")]
    EntryPoint {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("kernel takes {actual} arguments, expected {expected}")]
    ArgCount { expected: usize, actual: usize },

    #[error("kernel argument {index} is `{actual}`, expected `{expected}`")]
    Argument {
        index: usize,
        expected: ArgSpec,
        actual: ArgSpec,
    },
}
