//! Ray tracing and presentation descriptors.

use super::{DebugLabel, TextureFormat};
use crate::handles::{BufferHandle, RayTracingPipelineHandle, RtGeometryHandle};

/// Index element type of a geometry's index buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    Uint16,
    Uint32,
}

impl IndexFormat {
    /// Size of one index in bytes.
    pub fn size(self) -> u64 {
        match self {
            IndexFormat::Uint16 => 2,
            IndexFormat::Uint32 => 4,
        }
    }
}

/// Descriptor for a bottom-level acceleration structure over one triangle mesh.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RtGeometryDescriptor {
    pub label: DebugLabel,
    pub vertex_buffer: BufferHandle,
    pub vertex_count: u32,
    pub vertex_stride: u32,
    /// Optional index buffer with its element format and count.
    pub index_buffer: Option<(BufferHandle, IndexFormat, u32)>,
    pub opaque: bool,
}

impl RtGeometryDescriptor {
    pub fn new(vertex_buffer: BufferHandle, vertex_count: u32, vertex_stride: u32) -> Self {
        Self {
            label: DebugLabel::none(),
            vertex_buffer,
            vertex_count,
            vertex_stride,
            index_buffer: None,
            opaque: true,
        }
    }

    pub fn with_label(mut self, label: impl Into<DebugLabel>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_indices(mut self, buffer: BufferHandle, format: IndexFormat, count: u32) -> Self {
        self.index_buffer = Some((buffer, format, count));
        self
    }
}

/// One instance of a geometry inside a scene.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RtInstance {
    pub geometry: RtGeometryHandle,
    /// Row-major 3x4 object-to-world transform.
    pub transform: [f32; 12],
    pub mask: u8,
    pub hit_group_offset: u32,
}

impl RtInstance {
    pub const IDENTITY: [f32; 12] = [1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0];

    pub fn new(geometry: RtGeometryHandle) -> Self {
        Self {
            geometry,
            transform: Self::IDENTITY,
            mask: 0xFF,
            hit_group_offset: 0,
        }
    }
}

/// Descriptor for a top-level acceleration structure.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RtSceneDescriptor {
    pub label: DebugLabel,
    pub instances: Vec<RtInstance>,
}

impl RtSceneDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label(mut self, label: impl Into<DebugLabel>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_instance(mut self, instance: RtInstance) -> Self {
        self.instances.push(instance);
        self
    }
}

/// Descriptor for a shader binding table of a ray tracing pipeline.
///
/// Entries are shader group indices of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShaderTableDescriptor {
    pub label: DebugLabel,
    pub pipeline: RayTracingPipelineHandle,
    pub raygen: u32,
    pub miss: Vec<u32>,
    pub hit: Vec<u32>,
    pub callable: Vec<u32>,
}

impl ShaderTableDescriptor {
    pub fn new(pipeline: RayTracingPipelineHandle, raygen: u32) -> Self {
        Self {
            label: DebugLabel::none(),
            pipeline,
            raygen,
            miss: Vec::new(),
            hit: Vec::new(),
            callable: Vec::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<DebugLabel>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_miss(mut self, group: u32) -> Self {
        self.miss.push(group);
        self
    }

    pub fn with_hit(mut self, group: u32) -> Self {
        self.hit.push(group);
        self
    }

    /// Every group index the table refers to.
    pub fn groups(&self) -> impl Iterator<Item = u32> + '_ {
        std::iter::once(self.raygen)
            .chain(self.miss.iter().copied())
            .chain(self.hit.iter().copied())
            .chain(self.callable.iter().copied())
    }
}

/// Swapchain presentation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PresentMode {
    Immediate,
    Mailbox,
    #[default]
    Fifo,
    FifoRelaxed,
}

/// Descriptor for creating a swapchain.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SwapchainDescriptor {
    pub label: DebugLabel,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub image_count: u32,
    pub present_mode: PresentMode,
}

impl SwapchainDescriptor {
    pub fn new(width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            label: DebugLabel::none(),
            width,
            height,
            format,
            image_count: 3,
            present_mode: PresentMode::Fifo,
        }
    }

    pub fn with_label(mut self, label: impl Into<DebugLabel>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_present_mode(mut self, mode: PresentMode) -> Self {
        self.present_mode = mode;
        self
    }
}
