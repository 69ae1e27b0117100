//! Common utilities for resource manager integration tests.
//!
//! This module provides shared test infrastructure that can be reused
//! across different device implementations.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use keel_graphics::shader::{CompileRequest, CompiledStage};
use keel_graphics::types::{
    AttachmentDescription, ComputePipelineDescriptor, GraphicsPipelineDescriptor,
};
use keel_graphics::{
    CompilerRegistry, Device, DummyDevice, GraphicsError, ManagerConfig, PipelineCompiler,
    PipelineLayoutDescriptor, RecordingSink, RenderPassDescriptor, RenderPassHandle,
    ResourceManager, ShaderCode, ShaderFormat, ShaderProgram, ShaderStage, TextureFormat,
};

/// SPIR-V magic number, first word of every module.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// A compute shader that compiles through the built-in WGSL path.
pub const COMPUTE_WGSL: &str = r#"
@compute @workgroup_size(1)
fn main() {}
"#;

/// Vertex and fragment entry points for a single triangle.
pub const TRIANGLE_WGSL: &str = r#"
@vertex
fn vs_main(@builtin(vertex_index) i: u32) -> @builtin(position) vec4<f32> {
    return vec4<f32>(f32(i), 0.0, 0.0, 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return vec4<f32>(1.0, 0.0, 0.0, 1.0);
}
"#;

/// Initialize logging once for the whole test binary.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ============================================================================
// Backend Enumeration
// ============================================================================

/// Available devices for testing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Dummy device (bookkeeping only).
    Dummy,
    /// Headless Vulkan device via ash.
    Vulkan,
}

impl Backend {
    /// Check if this backend is compiled in.
    pub fn is_available(&self) -> bool {
        match self {
            Backend::Dummy => true,
            #[cfg(feature = "vulkan-backend")]
            Backend::Vulkan => true,
            #[cfg(not(feature = "vulkan-backend"))]
            Backend::Vulkan => false,
        }
    }

    #[allow(dead_code)]
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Dummy => "dummy",
            Backend::Vulkan => "vulkan",
        }
    }
}

// ============================================================================
// Test Context
// ============================================================================

/// Test context holding a resource manager and what it reports into.
pub struct TestContext {
    #[allow(dead_code)]
    pub backend: Backend,
    pub manager: Arc<ResourceManager>,
    /// Every diagnostic the manager reported.
    pub sink: Arc<RecordingSink>,
    /// Set for [`Backend::Dummy`], for object bookkeeping checks.
    #[allow(dead_code)]
    pub dummy: Option<Arc<DummyDevice>>,
}

impl TestContext {
    /// Create a new test context for the given backend.
    ///
    /// Returns `None` if the backend is not available.
    pub fn new(backend: Backend) -> Option<Self> {
        Self::with_setup(backend, CompilerRegistry::new(), |config| config)
    }

    /// Create a context with external compilers and a customized
    /// configuration.
    pub fn with_setup(
        backend: Backend,
        compilers: CompilerRegistry,
        configure: impl FnOnce(ManagerConfig) -> ManagerConfig,
    ) -> Option<Self> {
        init_logging();
        if !backend.is_available() {
            return None;
        }

        let (device, dummy) = create_device(backend)?;
        let sink = Arc::new(RecordingSink::default());
        let config = configure(
            ManagerConfig::default()
                .with_assert_on_stale_handles(false)
                .with_assert_on_leaks(false)
                .with_diagnostic_sink(sink.clone()),
        );
        let manager = ResourceManager::new(device, compilers, config);

        Some(Self {
            backend,
            manager,
            sink,
            dummy,
        })
    }

    /// The dummy device, for tests that only make sense on it.
    #[allow(dead_code)]
    pub fn dummy(&self) -> Option<&Arc<DummyDevice>> {
        self.dummy.as_ref()
    }
}

fn create_device(backend: Backend) -> Option<(Arc<dyn Device>, Option<Arc<DummyDevice>>)> {
    match backend {
        Backend::Dummy => {
            let dummy = Arc::new(DummyDevice::new());
            Some((dummy.clone(), Some(dummy)))
        }
        #[cfg(feature = "vulkan-backend")]
        Backend::Vulkan => match keel_graphics::VulkanDevice::new(false) {
            Ok(device) => Some((Arc::new(device), None)),
            Err(e) => {
                eprintln!("Vulkan device unavailable: {e}");
                None
            }
        },
        #[cfg(not(feature = "vulkan-backend"))]
        Backend::Vulkan => None,
    }
}

/// Context over a customized dummy device.
#[allow(dead_code)]
pub fn dummy_context(device: DummyDevice) -> TestContext {
    init_logging();
    let dummy = Arc::new(device);
    let sink = Arc::new(RecordingSink::default());
    let config = ManagerConfig::default()
        .with_assert_on_stale_handles(false)
        .with_assert_on_leaks(false)
        .with_diagnostic_sink(sink.clone());
    let manager = ResourceManager::new(dummy.clone(), CompilerRegistry::new(), config);
    TestContext {
        backend: Backend::Dummy,
        manager,
        sink,
        dummy: Some(dummy),
    }
}

// ============================================================================
// Shader Helpers
// ============================================================================

/// A fake SPIR-V binary, distinct per `tag`. Only the dummy device accepts it.
#[allow(dead_code)]
pub fn fake_spirv(tag: u32) -> Vec<u32> {
    vec![SPIRV_MAGIC, 0x0001_0300, 0, tag, 0]
}

#[allow(dead_code)]
pub fn compute_program() -> ShaderProgram {
    ShaderProgram::new().with_stage(
        ShaderStage::Compute,
        "main",
        vec![ShaderCode::wgsl(COMPUTE_WGSL)],
    )
}

#[allow(dead_code)]
pub fn triangle_program() -> ShaderProgram {
    ShaderProgram::new()
        .with_stage(
            ShaderStage::Vertex,
            "vs_main",
            vec![ShaderCode::wgsl(TRIANGLE_WGSL)],
        )
        .with_stage(
            ShaderStage::Fragment,
            "fs_main",
            vec![ShaderCode::wgsl(TRIANGLE_WGSL)],
        )
}

#[allow(dead_code)]
pub fn compute_pipeline(label: &str) -> ComputePipelineDescriptor {
    ComputePipelineDescriptor::new(compute_program(), PipelineLayoutDescriptor::new())
        .with_label(label.to_string())
}

#[allow(dead_code)]
pub fn color_pass() -> RenderPassDescriptor {
    RenderPassDescriptor::new().with_color(AttachmentDescription::new(TextureFormat::Rgba8Unorm))
}

#[allow(dead_code)]
pub fn triangle_pipeline(render_pass: RenderPassHandle) -> GraphicsPipelineDescriptor {
    GraphicsPipelineDescriptor::new(
        triangle_program(),
        PipelineLayoutDescriptor::new(),
        render_pass,
    )
    .with_label("triangle".to_string())
}

/// External compiler that answers every request with a fixed binary per
/// stage, and counts how often it was asked.
pub struct MockCompiler {
    format: ShaderFormat,
    fail: bool,
    calls: AtomicUsize,
}

#[allow(dead_code)]
impl MockCompiler {
    /// Produces fake SPIR-V.
    pub fn spirv() -> Arc<Self> {
        Arc::new(Self {
            format: ShaderFormat::Spirv,
            fail: false,
            calls: AtomicUsize::new(0),
        })
    }

    /// Claims SPIR-V support but always fails.
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            format: ShaderFormat::Spirv,
            fail: true,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

impl PipelineCompiler for MockCompiler {
    fn name(&self) -> &str {
        if self.fail {
            "mock-failing"
        } else {
            "mock"
        }
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
            return Err(GraphicsError::ShaderCompilationFailed(
                "mock compiler failure".to_string(),
            ));
        }
        Ok(request
            .program
            .stages
            .iter()
            .enumerate()
            .map(|(i, stage)| CompiledStage {
                stage: stage.stage,
                entry_point: stage.entry_point.clone(),
                code: ShaderCode::spirv(fake_spirv(1000 + i as u32)),
            })
            .collect())
    }
}
