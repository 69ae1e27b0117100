//! The device seam: synchronous creation and destruction of native objects.
//!
//! The [`ResourceManager`](crate::ResourceManager) never talks to a GPU API
//! directly. It drives an `Arc<dyn Device>` handed to it at construction.
//! Native objects cross this boundary as opaque `Copy` ids ([`RawMemory`],
//! [`RawBuffer`], ...), and every id produced by `create_*` is handed back
//! exactly once through [`Device::destroy`].
//!
//! Implementations:
//! - [`DummyDevice`] - bookkeeping only, with failure injection for tests
//! - `VulkanDevice` - headless Vulkan via ash and gpu-allocator
//!   (`vulkan-backend` feature)

pub mod dummy;
#[cfg(feature = "vulkan-backend")]
pub mod vulkan;

pub use dummy::DummyDevice;
#[cfg(feature = "vulkan-backend")]
pub use vulkan::VulkanDevice;

use crate::error::GraphicsError;
use crate::shader::{ShaderFormat, ShaderStage};
use crate::types::{
    BufferDescriptor, DescriptorSetLayoutDescriptor, ImageDescriptor, IndexFormat,
    MemoryDescriptor, MemoryHeap, PipelineState, PushConstantRange, RenderPassDescriptor,
    SamplerDescriptor, ShaderTableDescriptor, SwapchainDescriptor,
};

macro_rules! raw_objects {
    ($($(#[$meta:meta])* $name:ident;)*) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
            pub struct $name(pub u64);
        )*
    };
}

raw_objects! {
    RawMemory;
    RawBuffer;
    RawImage;
    RawSampler;
    RawRenderPass;
    RawFramebuffer;
    RawDescriptorSetLayout;
    RawPipelineLayout;
    RawShaderModule;
    RawPipeline;
    RawDescriptorSet;
    /// Bottom- or top-level acceleration structure.
    RawAccelerationStructure;
    RawShaderTable;
    RawSwapchain;
}

/// Kind of a native object, used for destruction and bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Memory,
    Buffer,
    Image,
    Sampler,
    RenderPass,
    Framebuffer,
    DescriptorSetLayout,
    PipelineLayout,
    ShaderModule,
    Pipeline,
    DescriptorSet,
    AccelerationStructure,
    ShaderTable,
    Swapchain,
}

/// A native object handed back to the device for destruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceObject {
    Memory(RawMemory),
    Buffer(RawBuffer),
    Image(RawImage),
    Sampler(RawSampler),
    RenderPass(RawRenderPass),
    Framebuffer(RawFramebuffer),
    DescriptorSetLayout(RawDescriptorSetLayout),
    PipelineLayout(RawPipelineLayout),
    ShaderModule(RawShaderModule),
    Pipeline(RawPipeline),
    DescriptorSet(RawDescriptorSet),
    AccelerationStructure(RawAccelerationStructure),
    ShaderTable(RawShaderTable),
    Swapchain(RawSwapchain),
}

impl DeviceObject {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Self::Memory(_) => ObjectKind::Memory,
            Self::Buffer(_) => ObjectKind::Buffer,
            Self::Image(_) => ObjectKind::Image,
            Self::Sampler(_) => ObjectKind::Sampler,
            Self::RenderPass(_) => ObjectKind::RenderPass,
            Self::Framebuffer(_) => ObjectKind::Framebuffer,
            Self::DescriptorSetLayout(_) => ObjectKind::DescriptorSetLayout,
            Self::PipelineLayout(_) => ObjectKind::PipelineLayout,
            Self::ShaderModule(_) => ObjectKind::ShaderModule,
            Self::Pipeline(_) => ObjectKind::Pipeline,
            Self::DescriptorSet(_) => ObjectKind::DescriptorSet,
            Self::AccelerationStructure(_) => ObjectKind::AccelerationStructure,
            Self::ShaderTable(_) => ObjectKind::ShaderTable,
            Self::Swapchain(_) => ObjectKind::Swapchain,
        }
    }
}

/// Optional device features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceCapabilities {
    pub mesh_shading: bool,
    pub ray_tracing: bool,
    pub presentation: bool,
}

/// Raw objects a framebuffer is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramebufferCreateInfo {
    pub render_pass: RawRenderPass,
    pub attachments: Vec<RawImage>,
    pub width: u32,
    pub height: u32,
    pub layers: u32,
}

/// A shader stage resolved to a native module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineStageInfo {
    pub stage: ShaderStage,
    pub module: RawShaderModule,
    pub entry_point: String,
}

/// Everything a device needs to build a pipeline of any kind.
#[derive(Debug, Clone)]
pub struct PipelineCreateInfo<'a> {
    pub label: Option<&'a str>,
    pub layout: RawPipelineLayout,
    pub render_pass: Option<RawRenderPass>,
    pub stages: Vec<PipelineStageInfo>,
    pub state: &'a PipelineState,
}

/// Raw resource written into one descriptor binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawBinding {
    Buffer {
        buffer: RawBuffer,
        offset: u64,
        size: u64,
    },
    Image(RawImage),
    Sampler(RawSampler),
    CombinedImageSampler {
        image: RawImage,
        sampler: RawSampler,
    },
    AccelerationStructure(RawAccelerationStructure),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorWrite {
    pub binding: u32,
    pub resource: RawBinding,
}

/// Build input of an acceleration structure.
#[derive(Debug, Clone, PartialEq)]
pub enum AccelerationStructureInfo {
    Geometry {
        vertex_buffer: RawBuffer,
        vertex_count: u32,
        vertex_stride: u32,
        index_buffer: Option<(RawBuffer, IndexFormat, u32)>,
        opaque: bool,
    },
    Scene {
        instances: Vec<(RawAccelerationStructure, [f32; 12], u8, u32)>,
    },
}

/// Synchronous GPU object factory.
///
/// Every method may block on the driver. Failures are hard failures of the
/// enclosing manager operation.
pub trait Device: Send + Sync + 'static {
    /// Device name for logs.
    fn name(&self) -> &str;

    fn capabilities(&self) -> DeviceCapabilities;

    /// Memory heaps, used to size staging pools.
    fn memory_heaps(&self) -> Vec<MemoryHeap>;

    /// Whether [`create_shader_module`](Self::create_shader_module) consumes
    /// code in `format`.
    fn accepts_shader_format(&self, format: ShaderFormat) -> bool;

    fn create_memory(&self, desc: &MemoryDescriptor) -> Result<RawMemory, GraphicsError>;

    /// Create a buffer bound to `memory` at `offset`.
    fn create_buffer(
        &self,
        desc: &BufferDescriptor,
        memory: RawMemory,
        offset: u64,
    ) -> Result<RawBuffer, GraphicsError>;

    /// Create an image bound to `memory` at `offset`.
    fn create_image(
        &self,
        desc: &ImageDescriptor,
        memory: RawMemory,
        offset: u64,
    ) -> Result<RawImage, GraphicsError>;

    fn create_sampler(&self, desc: &SamplerDescriptor) -> Result<RawSampler, GraphicsError>;

    fn create_render_pass(
        &self,
        desc: &RenderPassDescriptor,
    ) -> Result<RawRenderPass, GraphicsError>;

    fn create_framebuffer(
        &self,
        info: &FramebufferCreateInfo,
    ) -> Result<RawFramebuffer, GraphicsError>;

    fn create_descriptor_set_layout(
        &self,
        desc: &DescriptorSetLayoutDescriptor,
    ) -> Result<RawDescriptorSetLayout, GraphicsError>;

    fn create_pipeline_layout(
        &self,
        set_layouts: &[RawDescriptorSetLayout],
        push_constants: &[PushConstantRange],
    ) -> Result<RawPipelineLayout, GraphicsError>;

    /// Create a native module from SPIR-V words.
    fn create_shader_module(&self, spirv: &[u32]) -> Result<RawShaderModule, GraphicsError>;

    fn create_pipeline(&self, info: &PipelineCreateInfo<'_>) -> Result<RawPipeline, GraphicsError>;

    fn create_descriptor_set(
        &self,
        layout: RawDescriptorSetLayout,
        writes: &[DescriptorWrite],
    ) -> Result<RawDescriptorSet, GraphicsError>;

    fn create_acceleration_structure(
        &self,
        info: &AccelerationStructureInfo,
    ) -> Result<RawAccelerationStructure, GraphicsError>;

    fn create_shader_table(
        &self,
        pipeline: RawPipeline,
        desc: &ShaderTableDescriptor,
    ) -> Result<RawShaderTable, GraphicsError>;

    fn create_swapchain(&self, desc: &SwapchainDescriptor) -> Result<RawSwapchain, GraphicsError>;

    /// Destroy an object created by this device.
    fn destroy(&self, object: DeviceObject);
}

static_assertions::assert_obj_safe!(Device);
