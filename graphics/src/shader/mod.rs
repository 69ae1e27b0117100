//! Shader programs and their compilation to native modules.
//!
//! A [`ShaderProgram`] lists, per stage, the code variants a caller can
//! provide. Before a pipeline is created every stage is narrowed to exactly
//! one native shader module:
//!
//! 1. registered [`PipelineCompiler`]s get the first chance to compile the
//!    whole program ([`CompilerRegistry`]);
//! 2. otherwise each stage keeps its highest priority variant the device
//!    consumes directly or the built-in naga lowering can turn into SPIR-V;
//! 3. SPIR-V binaries become native modules through a
//!    fingerprint-keyed [`ShaderModuleCache`].
//!
//! Format priority, highest first: [`ShaderFormat::Module`],
//! [`ShaderFormat::NagaIr`], [`ShaderFormat::Spirv`], [`ShaderFormat::Wgsl`],
//! [`ShaderFormat::Glsl`].
//!
//! # Example
//!
//! ```ignore
//! use keel_graphics::shader::{ShaderCode, ShaderProgram, ShaderStage};
//!
//! let program = ShaderProgram::new()
//!     .with_stage(ShaderStage::Vertex, "vs_main", vec![ShaderCode::wgsl(SOURCE)])
//!     .with_stage(ShaderStage::Fragment, "fs_main", vec![ShaderCode::wgsl(SOURCE)]);
//! ```

mod compiler;
mod lowering;
mod module_cache;
mod probe;

use std::fmt;
use std::sync::Arc;

pub use compiler::{CompileRequest, CompiledStage, CompilerRegistry, PipelineCompiler};
pub use lowering::{glsl_to_spirv, module_to_spirv, wgsl_to_spirv};
pub use module_cache::{ShaderModuleCache, ShaderModuleResource, SpirvKey};
pub use probe::{CompiledProgram, ShaderCompiler, StageBinding};

use crate::error::GraphicsError;
use crate::handles::ShaderModuleHandle;
use crate::types::ShaderStageFlags;

/// Programmable pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
    Task,
    Mesh,
    RayGen,
    Miss,
    ClosestHit,
    AnyHit,
    Intersection,
    Callable,
}

impl ShaderStage {
    /// Matching stage of the built-in lowering, if it supports this stage.
    pub fn naga_stage(self) -> Option<naga::ShaderStage> {
        match self {
            Self::Vertex => Some(naga::ShaderStage::Vertex),
            Self::Fragment => Some(naga::ShaderStage::Fragment),
            Self::Compute => Some(naga::ShaderStage::Compute),
            _ => None,
        }
    }

    pub fn flag(self) -> ShaderStageFlags {
        match self {
            Self::Vertex => ShaderStageFlags::VERTEX,
            Self::Fragment => ShaderStageFlags::FRAGMENT,
            Self::Compute => ShaderStageFlags::COMPUTE,
            Self::Task => ShaderStageFlags::TASK,
            Self::Mesh => ShaderStageFlags::MESH,
            Self::RayGen => ShaderStageFlags::RAY_GEN,
            Self::Miss => ShaderStageFlags::MISS,
            Self::ClosestHit => ShaderStageFlags::CLOSEST_HIT,
            Self::AnyHit => ShaderStageFlags::ANY_HIT,
            Self::Intersection => ShaderStageFlags::INTERSECTION,
            Self::Callable => ShaderStageFlags::CALLABLE,
        }
    }
}

/// Shader code format, ordered by priority (highest first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderFormat {
    /// A native module already created on the device.
    Module,
    /// Parsed naga IR.
    NagaIr,
    /// SPIR-V binary.
    Spirv,
    /// WGSL source.
    Wgsl,
    /// GLSL source.
    Glsl,
}

impl ShaderFormat {
    /// Formats the built-in lowering turns into SPIR-V.
    pub const PORTABLE: [ShaderFormat; 3] = [Self::NagaIr, Self::Wgsl, Self::Glsl];

    /// Formats a device may consume directly.
    pub const NATIVE: [ShaderFormat; 2] = [Self::Module, Self::Spirv];

    pub fn is_portable(self) -> bool {
        Self::PORTABLE.contains(&self)
    }
}

/// One code variant of a shader stage.
#[derive(Clone)]
pub enum ShaderCode {
    Module(ShaderModuleHandle),
    Naga(Arc<naga::Module>),
    Spirv(Arc<[u32]>),
    Wgsl(Arc<str>),
    /// GLSL source. The stage name (`VERTEX`, `FRAGMENT`, `COMPUTE`) is
    /// defined while parsing, so one file may hold several stages.
    Glsl(Arc<str>),
}

impl ShaderCode {
    pub fn wgsl(source: impl Into<Arc<str>>) -> Self {
        Self::Wgsl(source.into())
    }

    pub fn glsl(source: impl Into<Arc<str>>) -> Self {
        Self::Glsl(source.into())
    }

    pub fn spirv(words: impl Into<Arc<[u32]>>) -> Self {
        Self::Spirv(words.into())
    }

    pub fn format(&self) -> ShaderFormat {
        match self {
            Self::Module(_) => ShaderFormat::Module,
            Self::Naga(_) => ShaderFormat::NagaIr,
            Self::Spirv(_) => ShaderFormat::Spirv,
            Self::Wgsl(_) => ShaderFormat::Wgsl,
            Self::Glsl(_) => ShaderFormat::Glsl,
        }
    }
}

impl fmt::Debug for ShaderCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Module(handle) => write!(f, "Module({handle:?})"),
            Self::Naga(module) => write!(f, "Naga({} entry points)", module.entry_points.len()),
            Self::Spirv(words) => write!(f, "Spirv({} words)", words.len()),
            Self::Wgsl(source) => write!(f, "Wgsl({} bytes)", source.len()),
            Self::Glsl(source) => write!(f, "Glsl({} bytes)", source.len()),
        }
    }
}

/// All code variants supplied for one stage.
#[derive(Debug, Clone)]
pub struct ShaderStageDesc {
    pub stage: ShaderStage,
    pub entry_point: String,
    pub code: Vec<ShaderCode>,
}

/// Shader stages of one pipeline.
#[derive(Debug, Clone, Default)]
pub struct ShaderProgram {
    pub stages: Vec<ShaderStageDesc>,
}

impl ShaderProgram {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a stage with its code variants, in any order.
    pub fn with_stage(
        mut self,
        stage: ShaderStage,
        entry_point: impl Into<String>,
        code: Vec<ShaderCode>,
    ) -> Self {
        self.stages.push(ShaderStageDesc {
            stage,
            entry_point: entry_point.into(),
            code,
        });
        self
    }

    pub fn stage(&self, stage: ShaderStage) -> Option<&ShaderStageDesc> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// A failed shader compilation, handed to a [`ShaderFailureHandler`].
#[derive(Debug)]
pub struct ShaderFailure<'a> {
    pub label: Option<&'a str>,
    pub error: &'a GraphicsError,
    /// Zero for the first attempt.
    pub attempt: u32,
}

/// What to do after a shader compilation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderFailureAction {
    /// Compile again, typically after the sources were fixed on disk.
    Retry,
    Abort,
}

/// Callback consulted when shader compilation fails.
pub type ShaderFailureHandler = Arc<dyn Fn(&ShaderFailure<'_>) -> ShaderFailureAction + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_priority() {
        let mut formats = vec![
            ShaderFormat::Glsl,
            ShaderFormat::Spirv,
            ShaderFormat::Module,
            ShaderFormat::Wgsl,
            ShaderFormat::NagaIr,
        ];
        formats.sort();
        assert_eq!(
            formats,
            vec![
                ShaderFormat::Module,
                ShaderFormat::NagaIr,
                ShaderFormat::Spirv,
                ShaderFormat::Wgsl,
                ShaderFormat::Glsl,
            ]
        );
        assert!(ShaderFormat::Wgsl.is_portable());
        assert!(!ShaderFormat::Spirv.is_portable());
    }

    #[test]
    fn test_program_builder() {
        let program = ShaderProgram::new()
            .with_stage(ShaderStage::Compute, "main", vec![ShaderCode::wgsl("")]);
        assert_eq!(program.stages.len(), 1);
        assert_eq!(
            program.stage(ShaderStage::Compute).map(|s| s.entry_point.as_str()),
            Some("main")
        );
        assert!(program.stage(ShaderStage::Vertex).is_none());
    }

    #[test]
    fn test_naga_stage_coverage() {
        assert!(ShaderStage::Vertex.naga_stage().is_some());
        assert!(ShaderStage::Mesh.naga_stage().is_none());
        assert!(ShaderStage::RayGen.naga_stage().is_none());
    }
}
