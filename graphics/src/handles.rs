//! Resource kinds and their typed handles.
//!
//! Each GPU resource kind gets a zero-sized tag implementing
//! [`ResourceKind`] and a `Handle` alias, so handles of different kinds
//! cannot be mixed up.

use keel_core::{Handle, ResourceKind};

macro_rules! resource_kinds {
    ($($(#[$meta:meta])* $kind:ident => $alias:ident, $name:literal;)*) => {
        $(
            $(#[$meta])*
            #[derive(Debug)]
            pub enum $kind {}

            impl ResourceKind for $kind {
                const NAME: &'static str = $name;
            }

            #[doc = concat!("Handle to a ", $name, ".")]
            pub type $alias = Handle<$kind>;
        )*
    };
}

resource_kinds! {
    /// Device memory object backing images and buffers.
    MemoryKind => MemoryHandle, "memory";
    ImageKind => ImageHandle, "image";
    BufferKind => BufferHandle, "buffer";
    SamplerKind => SamplerHandle, "sampler";
    RenderPassKind => RenderPassHandle, "render pass";
    FramebufferKind => FramebufferHandle, "framebuffer";
    DescriptorSetLayoutKind => DescriptorSetLayoutHandle, "descriptor set layout";
    PipelineLayoutKind => PipelineLayoutHandle, "pipeline layout";
    /// Set of resources bound against a descriptor set layout.
    DescriptorSetKind => DescriptorSetHandle, "descriptor set";
    ShaderModuleKind => ShaderModuleHandle, "shader module";
    GraphicsPipelineKind => GraphicsPipelineHandle, "graphics pipeline";
    ComputePipelineKind => ComputePipelineHandle, "compute pipeline";
    MeshPipelineKind => MeshPipelineHandle, "mesh pipeline";
    RayTracingPipelineKind => RayTracingPipelineHandle, "ray tracing pipeline";
    /// Bottom-level acceleration structure.
    RtGeometryKind => RtGeometryHandle, "ray tracing geometry";
    /// Top-level acceleration structure.
    RtSceneKind => RtSceneHandle, "ray tracing scene";
    ShaderTableKind => ShaderTableHandle, "shader table";
    SwapchainKind => SwapchainHandle, "swapchain";
}

static_assertions::assert_impl_all!(ImageHandle: Send, Sync, Copy);
