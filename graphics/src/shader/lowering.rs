//! Built-in lowering of portable shader code to SPIR-V through naga.

use keel_core::profiling::profile_scope;

use super::ShaderStage;
use crate::error::GraphicsError;

/// Parse WGSL and emit SPIR-V for one entry point.
pub fn wgsl_to_spirv(
    source: &str,
    stage: ShaderStage,
    entry_point: &str,
) -> Result<Vec<u32>, GraphicsError> {
    profile_scope!("wgsl_to_spirv");

    let module = naga::front::wgsl::parse_str(source).map_err(|e| {
        GraphicsError::ShaderCompilationFailed(format!("WGSL parse error: {e}"))
    })?;
    module_to_spirv(&module, stage, entry_point)
}

/// Parse GLSL for `stage` and emit SPIR-V for one entry point.
///
/// The upper-case stage name is defined for the preprocessor.
pub fn glsl_to_spirv(
    source: &str,
    stage: ShaderStage,
    entry_point: &str,
) -> Result<Vec<u32>, GraphicsError> {
    profile_scope!("glsl_to_spirv");

    let naga_stage = naga_stage(stage)?;
    let mut defines = naga::FastHashMap::default();
    let stage_define = match naga_stage {
        naga::ShaderStage::Vertex => "VERTEX",
        naga::ShaderStage::Fragment => "FRAGMENT",
        naga::ShaderStage::Compute => "COMPUTE",
    };
    defines.insert(stage_define.to_string(), String::new());

    let options = naga::front::glsl::Options {
        stage: naga_stage,
        defines,
    };
    let mut frontend = naga::front::glsl::Frontend::default();
    let module = frontend.parse(&options, source).map_err(|errors| {
        GraphicsError::ShaderCompilationFailed(format!("GLSL parse error:\n{errors}"))
    })?;
    module_to_spirv(&module, stage, entry_point)
}

/// Validate a naga module and emit SPIR-V for one entry point.
pub fn module_to_spirv(
    module: &naga::Module,
    stage: ShaderStage,
    entry_point: &str,
) -> Result<Vec<u32>, GraphicsError> {
    profile_scope!("module_to_spirv");

    let naga_stage = naga_stage(stage)?;

    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    );
    let info = validator.validate(module).map_err(|e| {
        GraphicsError::ShaderCompilationFailed(format!("Validation error: {e}"))
    })?;

    if !module
        .entry_points
        .iter()
        .any(|ep| ep.name == entry_point && ep.stage == naga_stage)
    {
        return Err(GraphicsError::ShaderCompilationFailed(format!(
            "Entry point '{entry_point}' not found for stage {stage:?}"
        )));
    }

    let options = naga::back::spv::Options {
        lang_version: (1, 3),
        flags: naga::back::spv::WriterFlags::empty(),
        capabilities: None,
        bounds_check_policies: naga::proc::BoundsCheckPolicies::default(),
        binding_map: Default::default(),
        debug_info: None,
        zero_initialize_workgroup_memory: naga::back::spv::ZeroInitializeWorkgroupMemoryMode::None,
    };
    let pipeline_options = naga::back::spv::PipelineOptions {
        shader_stage: naga_stage,
        entry_point: entry_point.to_string(),
    };

    naga::back::spv::write_vec(module, &info, &options, Some(&pipeline_options)).map_err(|e| {
        GraphicsError::ShaderCompilationFailed(format!("SPIR-V generation error: {e}"))
    })
}

fn naga_stage(stage: ShaderStage) -> Result<naga::ShaderStage, GraphicsError> {
    stage.naga_stage().ok_or_else(|| {
        GraphicsError::FeatureNotSupported(format!(
            "built-in shader lowering does not support {stage:?} shaders"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    const WGSL_COMPUTE: &str = r#"
@group(0) @binding(0) var<storage, read_write> data: array<u32>;

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    data[id.x] = data[id.x] * 2u;
}
"#;

    const GLSL_MULTI_STAGE: &str = r#"#version 450

#ifdef VERTEX
layout(location = 0) in vec3 position;
void main() {
    gl_Position = vec4(position, 1.0);
}
#endif

#ifdef FRAGMENT
layout(location = 0) out vec4 out_color;
void main() {
    out_color = vec4(1.0);
}
#endif
"#;

    #[test]
    fn test_wgsl_lowering() {
        let spirv = wgsl_to_spirv(WGSL_COMPUTE, ShaderStage::Compute, "main").unwrap();
        assert_eq!(spirv.first(), Some(&SPIRV_MAGIC));
    }

    #[test]
    fn test_wgsl_missing_entry_point() {
        let result = wgsl_to_spirv(WGSL_COMPUTE, ShaderStage::Compute, "other");
        assert!(matches!(
            result,
            Err(GraphicsError::ShaderCompilationFailed(_))
        ));
    }

    #[test]
    fn test_wgsl_parse_error() {
        let result = wgsl_to_spirv("fn broken(", ShaderStage::Compute, "main");
        assert!(result.is_err());
    }

    #[test]
    fn test_glsl_stage_defines() {
        let vs = glsl_to_spirv(GLSL_MULTI_STAGE, ShaderStage::Vertex, "main");
        assert!(vs.is_ok(), "VS failed: {:?}", vs.err());
        let fs = glsl_to_spirv(GLSL_MULTI_STAGE, ShaderStage::Fragment, "main");
        assert!(fs.is_ok(), "FS failed: {:?}", fs.err());
    }

    #[test]
    fn test_unsupported_stage() {
        let result = wgsl_to_spirv(WGSL_COMPUTE, ShaderStage::Mesh, "main");
        assert!(matches!(result, Err(GraphicsError::FeatureNotSupported(_))));
    }
}
