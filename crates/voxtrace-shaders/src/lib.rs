//! Render kernel source for Voxtrace.
//!
//! The kernel is written in WGSL and translated to SPIR-V with naga the first
//! time a Vulkan device asks for it. The argument list declared here is the
//! contract every dispatch is checked against.

use std::sync::OnceLock;

use naga::back::spv;
use naga::proc::{BoundsCheckPolicies, BoundsCheckPolicy};
use naga::valid::{Capabilities, ValidationFlags, Validator};
use thiserror::Error;
use tracing::debug;
use voxtrace_core::{ArgKind, ArgSpec, KernelSignature};

/// WGSL source of the render kernel.
pub const RENDER_WGSL: &str = include_str!("../shaders/render.wgsl");

/// Entry point name of the render kernel.
pub const RENDER_ENTRY_POINT: &str = "render";

/// Invocations per workgroup declared by the render kernel.
pub const WORKGROUP_SIZE: u32 = 64;

/// Sky color the device kernel returns for rays that hit nothing.
pub const DEFAULT_SKY_COLOR: [f32; 3] = [0.6, 0.75, 1.0];

/// Positional arguments of the render kernel. Binding `n` in set 0 is
/// argument `n`.
pub const RENDER_ARGS: [ArgSpec; 7] = [
    ArgSpec::input("rayPos", ArgKind::FloatTriples),
    ArgSpec::input("rayDir", ArgKind::FloatTriples),
    ArgSpec::input("octreeDepth", ArgKind::IntScalar),
    ArgSpec::input("octreeData", ArgKind::Nodes),
    ArgSpec::input("blockPalette", ArgKind::Materials),
    ArgSpec::input("atlasTexture", ArgKind::Pixels),
    ArgSpec::output("result", ArgKind::FloatTriples),
];

/// Signature of the render kernel.
pub const RENDER_KERNEL: KernelSignature = KernelSignature::new(RENDER_ENTRY_POINT, &RENDER_ARGS);

pub const fn render_kernel_signature() -> KernelSignature {
    RENDER_KERNEL
}

/// Failure translating kernel source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShaderError {
    #[error("WGSL parse error: {0}")]
    Parse(String),

    #[error("shader validation failed: {0}")]
    Validation(String),

    #[error("SPIR-V generation failed: {0}")]
    Backend(String),
}

/// Parse and validate a WGSL module.
pub fn parse_wgsl(source: &str) -> Result<(naga::Module, naga::valid::ModuleInfo), ShaderError> {
    let module = naga::front::wgsl::parse_str(source)
        .map_err(|e| ShaderError::Parse(e.emit_to_string(source)))?;

    let info = Validator::new(ValidationFlags::all(), Capabilities::empty())
        .validate(&module)
        .map_err(|e| ShaderError::Validation(e.emit_to_string(source)))?;

    Ok((module, info))
}

/// Translate a WGSL compute entry point to SPIR-V words.
pub fn compile_wgsl(source: &str, entry_point: &str) -> Result<Vec<u32>, ShaderError> {
    let (module, info) = parse_wgsl(source)?;

    let options = spv::Options {
        bounds_check_policies: BoundsCheckPolicies {
            index: BoundsCheckPolicy::Restrict,
            buffer: BoundsCheckPolicy::Restrict,
            ..Default::default()
        },
        ..Default::default()
    };
    let pipeline = spv::PipelineOptions {
        shader_stage: naga::ShaderStage::Compute,
        entry_point: entry_point.to_owned(),
    };

    let words = spv::write_vec(&module, &info, &options, Some(&pipeline))
        .map_err(|e| ShaderError::Backend(e.to_string()))?;

    debug!(entry_point, words = words.len(), "Translated WGSL to SPIR-V");
    Ok(words)
}

static RENDER_SPIRV: OnceLock<Result<Vec<u32>, ShaderError>> = OnceLock::new();

/// SPIR-V for the render kernel, translated once per process.
pub fn render_kernel_spirv() -> Result<&'static [u32], ShaderError> {
    RENDER_SPIRV
        .get_or_init(|| compile_wgsl(RENDER_WGSL, RENDER_ENTRY_POINT))
        .as_ref()
        .map(Vec::as_slice)
        .map_err(Clone::clone)
}

#[cfg(test)]
mod tests {
    use super::*;
    use naga::{AddressSpace, StorageAccess};
    use voxtrace_core::ArgAccess;

    #[test]
    fn render_kernel_translates() {
        let spirv = render_kernel_spirv().unwrap();
        assert_eq!(spirv[0], 0x0723_0203, "Invalid SPIR-V magic number");
        assert!(spirv.len() > 100, "Shader too small");
    }

    #[test]
    fn bindings_follow_argument_order() {
        let (module, _) = parse_wgsl(RENDER_WGSL).unwrap();

        let mut bound = 0;
        for (_, var) in module.global_variables.iter() {
            let Some(binding) = &var.binding else {
                continue;
            };
            assert_eq!(binding.group, 0);

            let arg = RENDER_ARGS[binding.binding as usize];
            let AddressSpace::Storage { access } = var.space else {
                panic!("{} is not a storage buffer", arg.name);
            };
            let writable = access.contains(StorageAccess::STORE);
            assert_eq!(writable, arg.access == ArgAccess::ReadWrite, "{arg}");
            bound += 1;
        }

        assert_eq!(bound, RENDER_ARGS.len());
    }

    #[test]
    fn entry_point_matches_signature() {
        let (module, _) = parse_wgsl(RENDER_WGSL).unwrap();
        let entry = &module.entry_points[0];
        assert_eq!(entry.name, RENDER_ENTRY_POINT);
        assert_eq!(entry.stage, naga::ShaderStage::Compute);
        assert_eq!(entry.workgroup_size, [WORKGROUP_SIZE, 1, 1]);
    }

    #[test]
    fn invalid_source_reports_parse_error() {
        let err = compile_wgsl("fn broken( {", RENDER_ENTRY_POINT).unwrap_err();
        assert!(matches!(err, ShaderError::Parse(_)));
    }

    #[test]
    fn signature_is_seven_arguments() {
        let signature = render_kernel_signature();
        assert_eq!(signature.len(), 7);
        assert_eq!(signature.position("octreeDepth"), Some(2));
        assert_eq!(signature.position("result"), Some(6));
    }
}
