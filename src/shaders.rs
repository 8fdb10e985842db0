//! WGSL program catalogue and validation
//!
//! Every [`ShaderProgram`] ships as a WGSL module with `vs_main` and
//! `fs_main` entry points. GPU devices validate the source through naga
//! before handing it to the driver, so a broken shader surfaces as a
//! [`BackendError::ShaderCreationFailed`] at renderer creation.

use crate::backend::{BackendError, BackendResult, ShaderProgram};
use crate::pipeline::gbuffer_pass::GBUFFER_SHADER;
use crate::pipeline::lighting_pass::LIGHTING_SHADER;
use crate::pipeline::postprocess::fxaa::FXAA_SHADER;
use crate::pipeline::postprocess::{
    BLOOM_BLUR_SHADER, BLOOM_DOWNSAMPLE_SHADER, BLOOM_PREFILTER_SHADER, BLOOM_UPSAMPLE_SHADER,
    COMPOSITE_SHADER,
};
use crate::pipeline::shadow_pass::SHADOW_SHADER;

/// Bind group holding uniform blocks, binding = uniform slot
pub const UNIFORM_GROUP: u32 = 0;
/// Bind group holding textures and samplers, binding = texture slot
pub const TEXTURE_GROUP: u32 = 1;
/// Clamp-to-edge linear sampler binding in [`TEXTURE_GROUP`]
pub const CLAMP_SAMPLER_BINDING: u32 = 16;
/// Repeating linear sampler binding in [`TEXTURE_GROUP`]
pub const REPEAT_SAMPLER_BINDING: u32 = 17;

/// WGSL source of `program`
pub fn source(program: ShaderProgram) -> &'static str {
    match program {
        ShaderProgram::ShadowDepth => SHADOW_SHADER,
        ShaderProgram::GBuffer => GBUFFER_SHADER,
        ShaderProgram::Lighting => LIGHTING_SHADER,
        ShaderProgram::BloomPrefilter => BLOOM_PREFILTER_SHADER,
        ShaderProgram::BloomDownsample => BLOOM_DOWNSAMPLE_SHADER,
        ShaderProgram::BloomBlur => BLOOM_BLUR_SHADER,
        ShaderProgram::BloomUpsample => BLOOM_UPSAMPLE_SHADER,
        ShaderProgram::Composite => COMPOSITE_SHADER,
        ShaderProgram::Fxaa => FXAA_SHADER,
    }
}

/// Parse and validate a WGSL module with `vs_main`/`fs_main` entry points.
pub fn validate_wgsl(label: &str, source: &str) -> BackendResult<naga::Module> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| {
        BackendError::ShaderCreationFailed(format!(
            "'{label}' WGSL parse error: {}",
            e.emit_to_string(source)
        ))
    })?;

    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    );
    validator.validate(&module).map_err(|e| {
        BackendError::ShaderCreationFailed(format!("'{label}' validation error: {e}"))
    })?;

    for (name, stage) in [
        ("vs_main", naga::ShaderStage::Vertex),
        ("fs_main", naga::ShaderStage::Fragment),
    ] {
        if !module
            .entry_points
            .iter()
            .any(|ep| ep.name == name && ep.stage == stage)
        {
            return Err(BackendError::ShaderCreationFailed(format!(
                "'{label}' has no {stage:?} entry point '{name}'"
            )));
        }
    }

    Ok(module)
}

/// Validate `program`'s source and check that it declares every uniform
/// and texture slot the program layout promises.
pub fn validate_program(program: ShaderProgram) -> BackendResult<naga::Module> {
    let label = program.label();
    let module = validate_wgsl(label, source(program))?;

    let declared: Vec<(u32, u32)> = module
        .global_variables
        .iter()
        .filter_map(|(_, var)| var.binding.as_ref().map(|b| (b.group, b.binding)))
        .collect();

    let expected = program
        .uniform_slots()
        .iter()
        .map(|&slot| (UNIFORM_GROUP, slot))
        .chain(
            program
                .texture_bindings()
                .iter()
                .map(|binding| (TEXTURE_GROUP, binding.slot)),
        );
    for (group, binding) in expected {
        if !declared.contains(&(group, binding)) {
            return Err(BackendError::ShaderCreationFailed(format!(
                "'{label}' does not declare @group({group}) @binding({binding})"
            )));
        }
    }

    log::debug!("Validated shader '{label}'");
    Ok(module)
}
