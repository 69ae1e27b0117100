//! Pipeline descriptors and fixed-function state.

use super::{CompareFunction, DebugLabel, PipelineLayoutDescriptor, TextureFormat};
use crate::handles::RenderPassHandle;
use crate::shader::ShaderProgram;

// ============================================================================
// Vertex input
// ============================================================================

/// Format of one vertex attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    Float32,
    Float32x2,
    Float32x3,
    Float32x4,
    Uint32,
    Unorm8x4,
}

impl VertexFormat {
    pub fn size(self) -> u32 {
        match self {
            Self::Float32 | Self::Uint32 | Self::Unorm8x4 => 4,
            Self::Float32x2 => 8,
            Self::Float32x3 => 12,
            Self::Float32x4 => 16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    pub location: u32,
    pub binding: u32,
    pub format: VertexFormat,
    pub offset: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VertexStepMode {
    #[default]
    Vertex,
    Instance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexBufferLayout {
    pub binding: u32,
    pub stride: u32,
    pub step_mode: VertexStepMode,
}

/// Vertex buffers and the attributes read from them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct VertexLayout {
    pub buffers: Vec<VertexBufferLayout>,
    pub attributes: Vec<VertexAttribute>,
}

impl VertexLayout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_buffer(mut self, binding: u32, stride: u32, step_mode: VertexStepMode) -> Self {
        self.buffers.push(VertexBufferLayout {
            binding,
            stride,
            step_mode,
        });
        self
    }

    pub fn with_attribute(
        mut self,
        location: u32,
        binding: u32,
        format: VertexFormat,
        offset: u32,
    ) -> Self {
        self.attributes.push(VertexAttribute {
            location,
            binding,
            format,
            offset,
        });
        self
    }
}

// ============================================================================
// Fixed-function state
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    #[default]
    TriangleList,
    TriangleStrip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    #[default]
    None,
    Front,
    Back,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FrontFace {
    #[default]
    CounterClockwise,
    Clockwise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PrimitiveState {
    pub topology: PrimitiveTopology,
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthStencilState {
    pub format: TextureFormat,
    pub depth_write_enabled: bool,
    pub depth_compare: CompareFunction,
}

impl DepthStencilState {
    pub fn new(format: TextureFormat) -> Self {
        Self {
            format,
            depth_write_enabled: true,
            depth_compare: CompareFunction::Less,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendMode {
    #[default]
    Replace,
    AlphaBlending,
    Additive,
    PremultipliedAlpha,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColorTargetState {
    pub format: TextureFormat,
    pub blend: BlendMode,
}

/// Fixed-function state of a rasterizing pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct RasterState {
    pub primitive: PrimitiveState,
    pub depth_stencil: Option<DepthStencilState>,
    pub color_targets: Vec<ColorTargetState>,
    pub sample_count: u32,
    /// Subpass index within the render pass.
    pub subpass: u32,
}

/// Shader group of a ray tracing pipeline, by stage index in the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderGroup {
    General(u32),
    TrianglesHit {
        closest_hit: Option<u32>,
        any_hit: Option<u32>,
    },
    ProceduralHit {
        intersection: u32,
        closest_hit: Option<u32>,
        any_hit: Option<u32>,
    },
}

/// Per-kind state that takes part in a pipeline's cache identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PipelineState {
    Graphics {
        vertex_layout: VertexLayout,
        raster: RasterState,
    },
    Compute,
    Mesh {
        raster: RasterState,
    },
    RayTracing {
        groups: Vec<ShaderGroup>,
        max_recursion_depth: u32,
    },
}

// ============================================================================
// Pipeline descriptors
// ============================================================================

/// Descriptor for a graphics pipeline.
#[derive(Debug, Clone)]
pub struct GraphicsPipelineDescriptor {
    pub label: DebugLabel,
    pub program: ShaderProgram,
    pub layout: PipelineLayoutDescriptor,
    pub render_pass: RenderPassHandle,
    pub vertex_layout: VertexLayout,
    pub raster: RasterState,
}

impl GraphicsPipelineDescriptor {
    pub fn new(
        program: ShaderProgram,
        layout: PipelineLayoutDescriptor,
        render_pass: RenderPassHandle,
    ) -> Self {
        Self {
            label: DebugLabel::none(),
            program,
            layout,
            render_pass,
            vertex_layout: VertexLayout::default(),
            raster: RasterState {
                sample_count: 1,
                ..Default::default()
            },
        }
    }

    pub fn with_label(mut self, label: impl Into<DebugLabel>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_vertex_layout(mut self, layout: VertexLayout) -> Self {
        self.vertex_layout = layout;
        self
    }

    pub fn with_raster(mut self, raster: RasterState) -> Self {
        self.raster = raster;
        self
    }
}

/// Descriptor for a compute pipeline.
#[derive(Debug, Clone)]
pub struct ComputePipelineDescriptor {
    pub label: DebugLabel,
    pub program: ShaderProgram,
    pub layout: PipelineLayoutDescriptor,
}

impl ComputePipelineDescriptor {
    pub fn new(program: ShaderProgram, layout: PipelineLayoutDescriptor) -> Self {
        Self {
            label: DebugLabel::none(),
            program,
            layout,
        }
    }

    pub fn with_label(mut self, label: impl Into<DebugLabel>) -> Self {
        self.label = label.into();
        self
    }
}

/// Descriptor for a task/mesh shading pipeline.
#[derive(Debug, Clone)]
pub struct MeshPipelineDescriptor {
    pub label: DebugLabel,
    pub program: ShaderProgram,
    pub layout: PipelineLayoutDescriptor,
    pub render_pass: RenderPassHandle,
    pub raster: RasterState,
}

impl MeshPipelineDescriptor {
    pub fn new(
        program: ShaderProgram,
        layout: PipelineLayoutDescriptor,
        render_pass: RenderPassHandle,
    ) -> Self {
        Self {
            label: DebugLabel::none(),
            program,
            layout,
            render_pass,
            raster: RasterState {
                sample_count: 1,
                ..Default::default()
            },
        }
    }

    pub fn with_label(mut self, label: impl Into<DebugLabel>) -> Self {
        self.label = label.into();
        self
    }
}

/// Descriptor for a ray tracing pipeline.
#[derive(Debug, Clone)]
pub struct RayTracingPipelineDescriptor {
    pub label: DebugLabel,
    pub program: ShaderProgram,
    pub layout: PipelineLayoutDescriptor,
    pub groups: Vec<ShaderGroup>,
    pub max_recursion_depth: u32,
}

impl RayTracingPipelineDescriptor {
    pub fn new(program: ShaderProgram, layout: PipelineLayoutDescriptor) -> Self {
        Self {
            label: DebugLabel::none(),
            program,
            layout,
            groups: Vec::new(),
            max_recursion_depth: 1,
        }
    }

    pub fn with_label(mut self, label: impl Into<DebugLabel>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_group(mut self, group: ShaderGroup) -> Self {
        self.groups.push(group);
        self
    }
}
