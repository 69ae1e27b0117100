//! Descriptors for every resource kind the manager creates.
//!
//! Descriptions double as cache keys: equality and hashing cover every field
//! except debug labels and cached back-references.

mod buffer;
mod common;
mod descriptor;
mod memory;
mod pipeline;
mod raytracing;
mod render_pass;
mod sampler;
mod texture;

pub use buffer::{BufferDescriptor, BufferUsage};
pub use common::{CompareFunction, DebugLabel, Extent3d};
pub use descriptor::{
    BindingLayoutEntry, BindingType, BoundResource, CachedSet, DescriptorBinding,
    DescriptorSetDescriptor, DescriptorSetLayoutDescriptor, PipelineLayoutDescriptor,
    PushConstantRange, ShaderStageFlags,
};
pub use memory::{MemoryDescriptor, MemoryHeap, MemoryLocation, host_visible_bytes};
pub use pipeline::{
    BlendMode, ColorTargetState, ComputePipelineDescriptor, CullMode, DepthStencilState,
    FrontFace, GraphicsPipelineDescriptor, MeshPipelineDescriptor, PipelineState,
    PrimitiveState, PrimitiveTopology, RasterState, RayTracingPipelineDescriptor, ShaderGroup,
    VertexAttribute, VertexBufferLayout, VertexFormat, VertexLayout, VertexStepMode,
};
pub use raytracing::{
    IndexFormat, PresentMode, RtGeometryDescriptor, RtInstance, RtSceneDescriptor,
    ShaderTableDescriptor, SwapchainDescriptor,
};
pub use render_pass::{
    AttachmentDescription, FramebufferDescriptor, LoadOp, RenderPassDescriptor, StoreOp,
};
pub use sampler::{AddressMode, FilterMode, SamplerDescriptor};
pub use texture::{ImageDescriptor, TextureFormat, TextureUsage};
