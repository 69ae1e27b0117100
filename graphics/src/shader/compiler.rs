//! External pipeline compilers.
//!
//! Compilers are injected into the manager at construction and probed in
//! registration order before the built-in lowering runs.

use std::fmt;
use std::sync::Arc;

use super::{ShaderCode, ShaderFormat, ShaderProgram, ShaderStage};
use crate::error::GraphicsError;

/// A pipeline's shader program as seen by an external compiler.
#[derive(Debug, Clone, Copy)]
pub struct CompileRequest<'a> {
    pub label: Option<&'a str>,
    pub program: &'a ShaderProgram,
}

/// One stage produced by an external compiler.
#[derive(Debug, Clone)]
pub struct CompiledStage {
    pub stage: ShaderStage,
    pub entry_point: String,
    /// Code in the format the compiler was asked for.
    pub code: ShaderCode,
}

/// Compiles whole pipelines to a given shader format.
///
/// Errors are not fatal: they are logged and the next candidate is tried.
pub trait PipelineCompiler: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this compiler can produce `format` for every stage of
    /// `request`.
    fn is_supported(&self, request: &CompileRequest<'_>, format: ShaderFormat) -> bool;

    fn compile(
        &self,
        request: &CompileRequest<'_>,
        format: ShaderFormat,
    ) -> Result<Vec<CompiledStage>, GraphicsError>;
}

/// Ordered list of external compilers.
#[derive(Clone, Default)]
pub struct CompilerRegistry {
    compilers: Vec<Arc<dyn PipelineCompiler>>,
}

impl CompilerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, compiler: Arc<dyn PipelineCompiler>) -> Self {
        self.register(compiler);
        self
    }

    /// Append a compiler; earlier registrations are probed first.
    pub fn register(&mut self, compiler: Arc<dyn PipelineCompiler>) {
        log::debug!("Registered pipeline compiler '{}'", compiler.name());
        self.compilers.push(compiler);
    }

    pub fn len(&self) -> usize {
        self.compilers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compilers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn PipelineCompiler>> {
        self.compilers.iter()
    }

    /// Compile `request` with the first compiler that succeeds for the first
    /// usable format in `formats`.
    ///
    /// Returns the compiled program, with one code variant per stage.
    pub(crate) fn compile(
        &self,
        request: &CompileRequest<'_>,
        formats: &[ShaderFormat],
    ) -> Option<ShaderProgram> {
        for &format in formats {
            for compiler in &self.compilers {
                if !compiler.is_supported(request, format) {
                    continue;
                }
                match compiler.compile(request, format) {
                    Ok(stages) => match assemble(request, format, stages) {
                        Ok(program) => {
                            log::debug!(
                                "Pipeline {} compiled to {:?} by '{}'",
                                request.label.unwrap_or("<unnamed>"),
                                format,
                                compiler.name()
                            );
                            return Some(program);
                        }
                        Err(reason) => log::warn!(
                            "Compiler '{}' produced unusable {:?} output: {}",
                            compiler.name(),
                            format,
                            reason
                        ),
                    },
                    Err(e) => log::warn!(
                        "Compiler '{}' failed to compile {:?}: {}",
                        compiler.name(),
                        format,
                        e
                    ),
                }
            }
        }
        None
    }
}

impl fmt::Debug for CompilerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.compilers.iter().map(|c| c.name()))
            .finish()
    }
}

/// Check that `stages` covers every requested stage in `format`.
fn assemble(
    request: &CompileRequest<'_>,
    format: ShaderFormat,
    stages: Vec<CompiledStage>,
) -> Result<ShaderProgram, String> {
    let mut program = ShaderProgram::new();
    for wanted in &request.program.stages {
        let Some(compiled) = stages.iter().find(|s| s.stage == wanted.stage) else {
            return Err(format!("missing {:?} stage", wanted.stage));
        };
        if compiled.code.format() != format {
            return Err(format!(
                "{:?} stage is {:?}",
                compiled.stage,
                compiled.code.format()
            ));
        }
        program = program.with_stage(
            compiled.stage,
            compiled.entry_point.clone(),
            vec![compiled.code.clone()],
        );
    }
    Ok(program)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct Fixed {
        name: &'static str,
        format: ShaderFormat,
        fail: bool,
        calls: AtomicUsize,
    }

    impl Fixed {
        fn new(name: &'static str, format: ShaderFormat, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                format,
                fail,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl PipelineCompiler for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn is_supported(&self, _request: &CompileRequest<'_>, format: ShaderFormat) -> bool {
            format == self.format
        }

        fn compile(
            &self,
            request: &CompileRequest<'_>,
            _format: ShaderFormat,
        ) -> Result<Vec<CompiledStage>, GraphicsError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if self.fail {
                return Err(GraphicsError::ShaderCompilationFailed("broken".into()));
            }
            Ok(request
                .program
                .stages
                .iter()
                .map(|s| CompiledStage {
                    stage: s.stage,
                    entry_point: s.entry_point.clone(),
                    code: ShaderCode::wgsl(self.name),
                })
                .collect())
        }
    }

    fn program() -> ShaderProgram {
        ShaderProgram::new().with_stage(ShaderStage::Compute, "main", vec![])
    }

    #[test]
    fn test_failing_compiler_falls_through() {
        let broken = Fixed::new("broken", ShaderFormat::Wgsl, true);
        let working = Fixed::new("working", ShaderFormat::Wgsl, false);
        let registry = CompilerRegistry::new()
            .with(broken.clone())
            .with(working.clone());

        let program = program();
        let request = CompileRequest {
            label: None,
            program: &program,
        };
        let compiled = registry.compile(&request, &[ShaderFormat::Wgsl]).unwrap();

        assert_eq!(broken.calls.load(Ordering::Relaxed), 1);
        assert_eq!(working.calls.load(Ordering::Relaxed), 1);
        assert!(matches!(
            compiled.stages[0].code.as_slice(),
            [ShaderCode::Wgsl(s)] if &**s == "working"
        ));
    }

    #[test]
    fn test_unsupported_format_is_skipped() {
        let compiler = Fixed::new("glsl", ShaderFormat::Glsl, false);
        let registry = CompilerRegistry::new().with(compiler.clone());
        let program = program();
        let request = CompileRequest {
            label: Some("test"),
            program: &program,
        };

        assert!(registry.compile(&request, &[ShaderFormat::Spirv]).is_none());
        assert_eq!(compiler.calls.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_format_mismatch_is_rejected() {
        // Claims SPIR-V but returns WGSL.
        let liar = Fixed::new("liar", ShaderFormat::Spirv, false);
        let registry = CompilerRegistry::new().with(liar);
        let program = program();
        let request = CompileRequest {
            label: None,
            program: &program,
        };
        assert!(registry.compile(&request, &[ShaderFormat::Spirv]).is_none());
    }
}
