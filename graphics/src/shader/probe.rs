//! Resolution of shader programs to native modules.

use std::sync::Arc;

use keel_core::profiling::profile_scope;

use super::{
    glsl_to_spirv, module_to_spirv, wgsl_to_spirv, CompileRequest, CompilerRegistry, ShaderCode,
    ShaderFailure, ShaderFailureAction, ShaderFailureHandler, ShaderFormat, ShaderModuleCache,
    ShaderProgram, ShaderStage, ShaderStageDesc,
};
use crate::device::Device;
use crate::error::GraphicsError;
use crate::handles::ShaderModuleHandle;

/// A stage resolved to a native module.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StageBinding {
    pub stage: ShaderStage,
    pub module: ShaderModuleHandle,
    pub entry_point: String,
}

/// A program whose every stage holds one use of a native module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompiledProgram {
    pub stages: Vec<StageBinding>,
}

impl CompiledProgram {
    pub fn modules(&self) -> impl Iterator<Item = ShaderModuleHandle> + '_ {
        self.stages.iter().map(|s| s.module)
    }
}

/// Turns [`ShaderProgram`]s into native modules.
pub struct ShaderCompiler {
    device: Arc<dyn Device>,
    compilers: CompilerRegistry,
    modules: Arc<ShaderModuleCache>,
    failure_handler: Option<ShaderFailureHandler>,
    max_retries: u32,
}

impl ShaderCompiler {
    pub fn new(
        device: Arc<dyn Device>,
        compilers: CompilerRegistry,
        modules: Arc<ShaderModuleCache>,
    ) -> Self {
        Self {
            device,
            compilers,
            modules,
            failure_handler: None,
            max_retries: 0,
        }
    }

    /// Consult `handler` after a failure, at most `max_retries` times per
    /// request.
    pub fn with_failure_handler(mut self, handler: ShaderFailureHandler, max_retries: u32) -> Self {
        self.failure_handler = Some(handler);
        self.max_retries = max_retries;
        self
    }

    pub fn modules(&self) -> &Arc<ShaderModuleCache> {
        &self.modules
    }

    /// Resolve every stage of `program` to a native module.
    ///
    /// On success the returned program holds one module use per stage, to be
    /// given back with [`release`](Self::release). On failure nothing is
    /// held.
    pub fn compile(
        &self,
        label: Option<&str>,
        program: &ShaderProgram,
    ) -> Result<CompiledProgram, GraphicsError> {
        profile_scope!("compile_shaders");

        let mut attempt = 0;
        loop {
            let error = match self.compile_once(label, program) {
                Ok(compiled) => return Ok(compiled),
                Err(e) => e,
            };
            let action = match &self.failure_handler {
                Some(handler) if attempt < self.max_retries => handler(&ShaderFailure {
                    label,
                    error: &error,
                    attempt,
                }),
                _ => ShaderFailureAction::Abort,
            };
            if action == ShaderFailureAction::Abort {
                return Err(error);
            }
            attempt += 1;
            log::info!(
                "Retrying shader compilation of {} (attempt {})",
                label.unwrap_or("<unnamed>"),
                attempt
            );
        }
    }

    /// Give back the module uses held by `program`.
    pub fn release(&self, program: &CompiledProgram) {
        for module in program.modules() {
            if !self.modules.release_use(&*self.device, module) {
                log::warn!("Released stale shader module {:?}", module);
            }
        }
    }

    fn compile_once(
        &self,
        label: Option<&str>,
        program: &ShaderProgram,
    ) -> Result<CompiledProgram, GraphicsError> {
        if program.is_empty() {
            return Err(GraphicsError::InvalidParameter(
                "shader program has no stages".to_string(),
            ));
        }

        if !self.compilers.is_empty() {
            let request = CompileRequest { label, program };
            if let Some(external) = self.compilers.compile(&request, &self.external_formats()) {
                match self.build(&external) {
                    Ok(compiled) => return Ok(compiled),
                    Err(e) => log::warn!(
                        "External compiler output for {} is unusable, using built-in path: {}",
                        label.unwrap_or("<unnamed>"),
                        e
                    ),
                }
            }
        }

        self.build(program)
    }

    /// Formats worth asking external compilers for: device-native ones
    /// first, then those the built-in lowering accepts.
    fn external_formats(&self) -> Vec<ShaderFormat> {
        let spirv = self.device.accepts_shader_format(ShaderFormat::Spirv);
        ShaderFormat::NATIVE
            .into_iter()
            .filter(|&f| f != ShaderFormat::Module && self.device.accepts_shader_format(f))
            .chain(ShaderFormat::PORTABLE.into_iter().filter(|_| spirv))
            .collect()
    }

    fn build(&self, program: &ShaderProgram) -> Result<CompiledProgram, GraphicsError> {
        let selected = self.select(program)?;
        self.lower(&selected)
    }

    /// Pick, per stage, the highest priority code variant that can be used.
    fn select<'a>(
        &self,
        program: &'a ShaderProgram,
    ) -> Result<Vec<(&'a ShaderStageDesc, &'a ShaderCode)>, GraphicsError> {
        let mut selected: Vec<(&ShaderStageDesc, &ShaderCode)> = Vec::new();
        for desc in &program.stages {
            if selected.iter().any(|(s, _)| s.stage == desc.stage) {
                return Err(GraphicsError::InvalidParameter(format!(
                    "{:?} stage given twice",
                    desc.stage
                )));
            }

            let mut candidates: Vec<&ShaderCode> = desc.code.iter().collect();
            candidates.sort_by_key(|c| c.format());
            match candidates.into_iter().find(|c| self.is_usable(desc.stage, c)) {
                Some(code) => selected.push((desc, code)),
                None => {
                    let provided: Vec<ShaderFormat> = desc.code.iter().map(|c| c.format()).collect();
                    return Err(GraphicsError::ShaderCompilationFailed(format!(
                        "no supported shader format for {:?} stage '{}' (provided {:?})",
                        desc.stage, desc.entry_point, provided
                    )));
                }
            }
        }
        Ok(selected)
    }

    fn is_usable(&self, stage: ShaderStage, code: &ShaderCode) -> bool {
        let spirv = self.device.accepts_shader_format(ShaderFormat::Spirv);
        match code {
            ShaderCode::Module(handle) => self.modules.is_valid(*handle),
            ShaderCode::Spirv(_) => spirv,
            ShaderCode::Naga(_) | ShaderCode::Wgsl(_) | ShaderCode::Glsl(_) => {
                spirv && stage.naga_stage().is_some()
            }
        }
    }

    fn lower(
        &self,
        selected: &[(&ShaderStageDesc, &ShaderCode)],
    ) -> Result<CompiledProgram, GraphicsError> {
        let mut compiled = CompiledProgram::default();
        for (desc, code) in selected {
            match self.lower_stage(desc, code) {
                Ok(module) => compiled.stages.push(StageBinding {
                    stage: desc.stage,
                    module,
                    entry_point: desc.entry_point.clone(),
                }),
                Err(e) => {
                    self.release(&compiled);
                    return Err(e);
                }
            }
        }
        Ok(compiled)
    }

    fn lower_stage(
        &self,
        desc: &ShaderStageDesc,
        code: &ShaderCode,
    ) -> Result<ShaderModuleHandle, GraphicsError> {
        let (stage, entry) = (desc.stage, desc.entry_point.as_str());
        let words: Arc<[u32]> = match code {
            ShaderCode::Module(handle) => {
                return if self.modules.acquire_use(*handle) {
                    Ok(*handle)
                } else {
                    Err(GraphicsError::StaleHandle(format!("{handle:?}")))
                };
            }
            ShaderCode::Spirv(words) => words.clone(),
            ShaderCode::Naga(module) => module_to_spirv(module, stage, entry)?.into(),
            ShaderCode::Wgsl(source) => wgsl_to_spirv(source, stage, entry)?.into(),
            ShaderCode::Glsl(source) => glsl_to_spirv(source, stage, entry)?.into(),
        };
        self.modules.register(&*self.device, words)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::device::{DummyDevice, ObjectKind};

    const MAGIC: u32 = 0x0723_0203;

    const WGSL: &str = r#"
@vertex
fn vs_main(@builtin(vertex_index) i: u32) -> @builtin(position) vec4<f32> {
    return vec4<f32>(f32(i), 0.0, 0.0, 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return vec4<f32>(1.0, 0.0, 0.0, 1.0);
}
"#;

    fn setup(device: DummyDevice) -> (Arc<DummyDevice>, ShaderCompiler) {
        let device = Arc::new(device);
        let compiler = ShaderCompiler::new(
            device.clone(),
            CompilerRegistry::new(),
            Arc::new(ShaderModuleCache::new(1024)),
        );
        (device, compiler)
    }

    fn spirv(tag: u32) -> ShaderCode {
        ShaderCode::spirv(vec![MAGIC, 0x0001_0300, tag])
    }

    #[test]
    fn test_wgsl_program() {
        let (device, compiler) = setup(DummyDevice::new());
        let program = ShaderProgram::new()
            .with_stage(ShaderStage::Vertex, "vs_main", vec![ShaderCode::wgsl(WGSL)])
            .with_stage(ShaderStage::Fragment, "fs_main", vec![ShaderCode::wgsl(WGSL)]);

        let compiled = compiler.compile(Some("triangle"), &program).unwrap();
        assert_eq!(compiled.stages.len(), 2);
        assert_eq!(device.live_count(ObjectKind::ShaderModule), 2);

        // Same sources resolve to the same modules.
        let again = compiler.compile(Some("triangle"), &program).unwrap();
        assert_eq!(compiled, again);
        assert_eq!(device.live_count(ObjectKind::ShaderModule), 2);
    }

    #[test]
    fn test_priority_prefers_spirv_over_sources() {
        let (_device, compiler) = setup(DummyDevice::new());
        // The WGSL is invalid; it must never be parsed.
        let program = ShaderProgram::new().with_stage(
            ShaderStage::Compute,
            "main",
            vec![ShaderCode::wgsl("not wgsl"), spirv(7)],
        );
        assert!(compiler.compile(None, &program).is_ok());
    }

    #[test]
    fn test_stale_module_falls_back_to_next_variant() {
        let (_device, compiler) = setup(DummyDevice::new());
        let program = ShaderProgram::new().with_stage(
            ShaderStage::Compute,
            "main",
            vec![ShaderCode::Module(ShaderModuleHandle::new(5, 1)), spirv(1)],
        );
        let compiled = compiler.compile(None, &program).unwrap();
        assert_ne!(compiled.stages[0].module, ShaderModuleHandle::new(5, 1));
    }

    #[test]
    fn test_no_supported_format() {
        let (_device, compiler) = setup(DummyDevice::new().with_shader_formats(vec![]));
        let program =
            ShaderProgram::new().with_stage(ShaderStage::Vertex, "vs_main", vec![ShaderCode::wgsl(WGSL)]);
        assert!(matches!(
            compiler.compile(None, &program),
            Err(GraphicsError::ShaderCompilationFailed(_))
        ));
    }

    #[test]
    fn test_mesh_stage_needs_binary() {
        let (_device, compiler) = setup(DummyDevice::new());
        let source_only =
            ShaderProgram::new().with_stage(ShaderStage::Mesh, "main", vec![ShaderCode::wgsl(WGSL)]);
        assert!(compiler.compile(None, &source_only).is_err());

        let binary = ShaderProgram::new().with_stage(ShaderStage::Mesh, "main", vec![spirv(3)]);
        assert!(compiler.compile(None, &binary).is_ok());
    }

    #[test]
    fn test_failure_releases_earlier_stages() {
        let (device, compiler) = setup(DummyDevice::new());
        let program = ShaderProgram::new()
            .with_stage(ShaderStage::Vertex, "vs_main", vec![ShaderCode::wgsl(WGSL)])
            .with_stage(ShaderStage::Fragment, "missing", vec![ShaderCode::wgsl(WGSL)]);

        assert!(compiler.compile(None, &program).is_err());

        // The vertex module was created, then given back to its cache.
        assert_eq!(compiler.modules().len(), 1);
        assert_eq!(compiler.modules().collect_unused(&*device, 16), 1);
        assert_eq!(device.live_count(ObjectKind::ShaderModule), 0);
    }

    #[test]
    fn test_retry_handler() {
        let (_device, compiler) = setup(DummyDevice::new());
        let calls = Arc::new(AtomicU32::new(0));
        let seen = calls.clone();
        let compiler = compiler.with_failure_handler(
            Arc::new(move |failure: &ShaderFailure<'_>| {
                assert_eq!(failure.label, Some("broken"));
                seen.fetch_add(1, Ordering::Relaxed);
                ShaderFailureAction::Retry
            }),
            2,
        );
        let program =
            ShaderProgram::new().with_stage(ShaderStage::Compute, "main", vec![ShaderCode::wgsl("???")]);

        assert!(compiler.compile(Some("broken"), &program).is_err());
        assert_eq!(calls.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_empty_program_rejected() {
        let (_device, compiler) = setup(DummyDevice::new());
        assert!(matches!(
            compiler.compile(None, &ShaderProgram::new()),
            Err(GraphicsError::InvalidParameter(_))
        ));
    }
}
