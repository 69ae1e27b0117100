//! Storage of every managed resource kind.

use std::sync::Arc;

use keel_core::{Cache, GcCursor, Handle, Pool, Release, ResourceKind};

use crate::device::{
    Device, DeviceObject, RawAccelerationStructure, RawBuffer, RawDescriptorSet,
    RawDescriptorSetLayout, RawFramebuffer, RawImage, RawMemory, RawPipeline, RawPipelineLayout,
    RawRenderPass, RawSampler, RawShaderTable, RawSwapchain,
};
use crate::handles::*;
use crate::shader::{ShaderModuleCache, ShaderModuleResource, StageBinding};
use crate::types::{
    BufferDescriptor, DebugLabel, DescriptorSetDescriptor, DescriptorSetLayoutDescriptor,
    FramebufferDescriptor, ImageDescriptor, MemoryLocation, PipelineState, PushConstantRange,
    RenderPassDescriptor, SamplerDescriptor, SwapchainDescriptor,
};

// ============================================================================
// Resources
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryResource {
    pub raw: RawMemory,
    pub size: u64,
    pub location: MemoryLocation,
    pub label: DebugLabel,
}

/// A buffer and the memory object it is bound to.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferResource {
    pub raw: RawBuffer,
    pub memory: MemoryHandle,
    pub desc: BufferDescriptor,
}

/// An image and the memory object it is bound to.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageResource {
    pub raw: RawImage,
    pub memory: MemoryHandle,
    pub desc: ImageDescriptor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerResource {
    pub raw: RawSampler,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderPassResource {
    pub raw: RawRenderPass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramebufferResource {
    pub raw: RawFramebuffer,
    pub render_pass: RenderPassHandle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorSetLayoutResource {
    pub raw: RawDescriptorSetLayout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineLayoutResource {
    pub raw: RawPipelineLayout,
    pub set_layouts: Vec<DescriptorSetLayoutHandle>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorSetResource {
    pub raw: RawDescriptorSet,
    pub layout: DescriptorSetLayoutHandle,
}

/// A pipeline of any kind and everything it keeps alive.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineResource {
    pub raw: RawPipeline,
    pub layout: PipelineLayoutHandle,
    pub render_pass: Option<RenderPassHandle>,
    pub modules: Vec<ShaderModuleHandle>,
    pub label: DebugLabel,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RtGeometryResource {
    pub raw: RawAccelerationStructure,
    /// Vertex buffer, then the index buffer if any.
    pub buffers: Vec<BufferHandle>,
    pub label: DebugLabel,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RtSceneResource {
    pub raw: RawAccelerationStructure,
    pub geometries: Vec<RtGeometryHandle>,
    pub label: DebugLabel,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShaderTableResource {
    pub raw: RawShaderTable,
    pub pipeline: RayTracingPipelineHandle,
    pub label: DebugLabel,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwapchainResource {
    pub raw: RawSwapchain,
    pub desc: SwapchainDescriptor,
}

// ============================================================================
// Cache keys
// ============================================================================

/// Identity of a pipeline layout: its set layouts by handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipelineLayoutKey {
    pub set_layouts: Vec<DescriptorSetLayoutHandle>,
    pub push_constants: Vec<PushConstantRange>,
}

/// Identity of a pipeline of any kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    pub layout: PipelineLayoutHandle,
    pub render_pass: Option<RenderPassHandle>,
    pub stages: Vec<StageBinding>,
    pub state: PipelineState,
}

// ============================================================================
// Tables
// ============================================================================

#[derive(Debug, Default)]
pub(crate) struct Cursors {
    pub validate_sets: GcCursor,
    pub validate_framebuffers: GcCursor,
    pub samplers: GcCursor,
    pub render_passes: GcCursor,
    pub framebuffers: GcCursor,
    pub set_layouts: GcCursor,
    pub pipeline_layouts: GcCursor,
    pub descriptor_sets: GcCursor,
    pub graphics_pipelines: GcCursor,
    pub compute_pipelines: GcCursor,
    pub mesh_pipelines: GcCursor,
    pub ray_tracing_pipelines: GcCursor,
}

/// Every pool and cache of a [`ResourceManager`](crate::ResourceManager).
///
/// Only reachable through [`ManagedKind`], under the manager's lock.
#[doc(hidden)]
pub struct ResourceTables {
    pub(crate) device: Arc<dyn Device>,
    pub(crate) shader_modules: Arc<ShaderModuleCache>,
    pub(crate) memory: Pool<MemoryKind, MemoryResource>,
    pub(crate) images: Pool<ImageKind, ImageResource>,
    pub(crate) buffers: Pool<BufferKind, BufferResource>,
    pub(crate) samplers: Cache<SamplerKind, SamplerDescriptor, SamplerResource>,
    pub(crate) render_passes: Cache<RenderPassKind, RenderPassDescriptor, RenderPassResource>,
    pub(crate) framebuffers: Cache<FramebufferKind, FramebufferDescriptor, FramebufferResource>,
    pub(crate) set_layouts:
        Cache<DescriptorSetLayoutKind, DescriptorSetLayoutDescriptor, DescriptorSetLayoutResource>,
    pub(crate) pipeline_layouts: Cache<PipelineLayoutKind, PipelineLayoutKey, PipelineLayoutResource>,
    pub(crate) descriptor_sets: Cache<DescriptorSetKind, DescriptorSetDescriptor, DescriptorSetResource>,
    pub(crate) graphics_pipelines: Cache<GraphicsPipelineKind, PipelineKey, PipelineResource>,
    pub(crate) compute_pipelines: Cache<ComputePipelineKind, PipelineKey, PipelineResource>,
    pub(crate) mesh_pipelines: Cache<MeshPipelineKind, PipelineKey, PipelineResource>,
    pub(crate) ray_tracing_pipelines: Cache<RayTracingPipelineKind, PipelineKey, PipelineResource>,
    pub(crate) rt_geometry: Pool<RtGeometryKind, RtGeometryResource>,
    pub(crate) rt_scenes: Pool<RtSceneKind, RtSceneResource>,
    pub(crate) shader_tables: Pool<ShaderTableKind, ShaderTableResource>,
    pub(crate) swapchains: Pool<SwapchainKind, SwapchainResource>,
    pub(crate) cursors: Cursors,
}

impl ResourceTables {
    pub(crate) fn new(
        device: Arc<dyn Device>,
        shader_modules: Arc<ShaderModuleCache>,
        max_slots: u32,
    ) -> Self {
        Self {
            device,
            shader_modules,
            memory: Pool::with_max_slots(max_slots),
            images: Pool::with_max_slots(max_slots),
            buffers: Pool::with_max_slots(max_slots),
            samplers: Cache::new().with_max_slots(max_slots),
            render_passes: Cache::new().with_max_slots(max_slots),
            framebuffers: Cache::new().with_max_slots(max_slots),
            set_layouts: Cache::new().with_max_slots(max_slots),
            pipeline_layouts: Cache::new().with_max_slots(max_slots),
            descriptor_sets: Cache::new().with_max_slots(max_slots),
            graphics_pipelines: Cache::new().with_max_slots(max_slots),
            compute_pipelines: Cache::new().with_max_slots(max_slots),
            mesh_pipelines: Cache::new().with_max_slots(max_slots),
            ray_tracing_pipelines: Cache::new().with_max_slots(max_slots),
            rt_geometry: Pool::with_max_slots(max_slots),
            rt_scenes: Pool::with_max_slots(max_slots),
            shader_tables: Pool::with_max_slots(max_slots),
            swapchains: Pool::with_max_slots(max_slots),
            cursors: Cursors::default(),
        }
    }

    /// Stamp cache lookups from now on with `submission`.
    pub(crate) fn set_submission(&mut self, submission: u64) {
        self.samplers.set_submission(submission);
        self.render_passes.set_submission(submission);
        self.framebuffers.set_submission(submission);
        self.set_layouts.set_submission(submission);
        self.pipeline_layouts.set_submission(submission);
        self.descriptor_sets.set_submission(submission);
        self.graphics_pipelines.set_submission(submission);
        self.compute_pipelines.set_submission(submission);
        self.mesh_pipelines.set_submission(submission);
        self.ray_tracing_pipelines.set_submission(submission);
        self.shader_modules.set_submission(submission);
    }

    /// Release unused trailing storage of every pool and cache. Returns the
    /// number of chunks released.
    pub(crate) fn trim(&mut self) -> usize {
        self.memory.trim()
            + self.images.trim()
            + self.buffers.trim()
            + self.samplers.trim()
            + self.render_passes.trim()
            + self.framebuffers.trim()
            + self.set_layouts.trim()
            + self.pipeline_layouts.trim()
            + self.descriptor_sets.trim()
            + self.graphics_pipelines.trim()
            + self.compute_pipelines.trim()
            + self.mesh_pipelines.trim()
            + self.ray_tracing_pipelines.trim()
            + self.rt_geometry.trim()
            + self.rt_scenes.trim()
            + self.shader_tables.trim()
            + self.swapchains.trim()
    }

    /// Give back a reference held by another resource.
    pub(crate) fn release_dependency<K: ManagedKind>(&mut self, handle: Handle<K>) {
        if !K::release(self, handle) {
            log::error!(
                "{} {:?} held by a dependent was already destroyed",
                K::NAME,
                handle
            );
        }
    }

    // ------------------------------------------------------------------------
    // Teardown of freed payloads
    // ------------------------------------------------------------------------

    pub(crate) fn destroy_memory(&mut self, memory: MemoryResource) {
        self.device.destroy(DeviceObject::Memory(memory.raw));
    }

    pub(crate) fn destroy_buffer(&mut self, buffer: BufferResource) {
        self.device.destroy(DeviceObject::Buffer(buffer.raw));
        self.release_dependency(buffer.memory);
    }

    pub(crate) fn destroy_image(&mut self, image: ImageResource) {
        self.device.destroy(DeviceObject::Image(image.raw));
        self.release_dependency(image.memory);
    }

    pub(crate) fn destroy_sampler(&mut self, sampler: SamplerResource) {
        self.device.destroy(DeviceObject::Sampler(sampler.raw));
    }

    pub(crate) fn destroy_render_pass(&mut self, pass: RenderPassResource) {
        self.device.destroy(DeviceObject::RenderPass(pass.raw));
    }

    pub(crate) fn destroy_framebuffer(&mut self, framebuffer: FramebufferResource) {
        self.device
            .destroy(DeviceObject::Framebuffer(framebuffer.raw));
        self.release_dependency(framebuffer.render_pass);
    }

    pub(crate) fn destroy_set_layout(&mut self, layout: DescriptorSetLayoutResource) {
        self.device
            .destroy(DeviceObject::DescriptorSetLayout(layout.raw));
    }

    pub(crate) fn destroy_pipeline_layout(&mut self, layout: PipelineLayoutResource) {
        self.device
            .destroy(DeviceObject::PipelineLayout(layout.raw));
        for set_layout in layout.set_layouts {
            self.release_dependency(set_layout);
        }
    }

    pub(crate) fn destroy_descriptor_set(&mut self, set: DescriptorSetResource) {
        self.device.destroy(DeviceObject::DescriptorSet(set.raw));
        self.release_dependency(set.layout);
    }

    pub(crate) fn destroy_pipeline(&mut self, pipeline: PipelineResource) {
        self.device.destroy(DeviceObject::Pipeline(pipeline.raw));
        self.release_dependency(pipeline.layout);
        if let Some(pass) = pipeline.render_pass {
            self.release_dependency(pass);
        }
        for module in pipeline.modules {
            self.release_dependency(module);
        }
    }

    pub(crate) fn destroy_rt_geometry(&mut self, geometry: RtGeometryResource) {
        self.device
            .destroy(DeviceObject::AccelerationStructure(geometry.raw));
        for buffer in geometry.buffers {
            self.release_dependency(buffer);
        }
    }

    pub(crate) fn destroy_rt_scene(&mut self, scene: RtSceneResource) {
        self.device
            .destroy(DeviceObject::AccelerationStructure(scene.raw));
        for geometry in scene.geometries {
            self.release_dependency(geometry);
        }
    }

    pub(crate) fn destroy_shader_table(&mut self, table: ShaderTableResource) {
        self.device.destroy(DeviceObject::ShaderTable(table.raw));
        self.release_dependency(table.pipeline);
    }

    pub(crate) fn destroy_swapchain(&mut self, swapchain: SwapchainResource) {
        self.device
            .destroy(DeviceObject::Swapchain(swapchain.raw));
    }
}

// ============================================================================
// ManagedKind
// ============================================================================

/// A resource kind owned by the [`ResourceManager`](crate::ResourceManager).
///
/// Implemented for every handle kind; drives the generic lookup and
/// ownership API of the manager and [`Owned`](crate::Owned).
pub trait ManagedKind: ResourceKind + Sized {
    /// Snapshot returned by [`ResourceManager::get`](crate::ResourceManager::get).
    type Resource: Clone;

    #[doc(hidden)]
    fn get(tables: &ResourceTables, handle: Handle<Self>) -> Option<Self::Resource>;

    #[doc(hidden)]
    fn ref_count(tables: &ResourceTables, handle: Handle<Self>) -> Option<u32>;

    #[doc(hidden)]
    fn add_ref(tables: &mut ResourceTables, handle: Handle<Self>) -> bool;

    /// Drop one reference, destroying the resource when it was the last one.
    /// Returns `false` for a stale handle.
    #[doc(hidden)]
    fn release(tables: &mut ResourceTables, handle: Handle<Self>) -> bool;

    /// Whether `handle` was destroyed by validation while its owners still
    /// held it.
    #[doc(hidden)]
    fn is_evicted(_tables: &ResourceTables, _handle: Handle<Self>) -> bool {
        false
    }

    /// Give back an owner's reference on an evicted handle.
    #[doc(hidden)]
    fn release_evicted(_tables: &mut ResourceTables, _handle: Handle<Self>) -> bool {
        false
    }
}

macro_rules! managed_pool_kind {
    ($($kind:ty => $resource:ty, $field:ident, $destroy:ident;)*) => {
        $(
            impl ManagedKind for $kind {
                type Resource = $resource;

                fn get(tables: &ResourceTables, handle: Handle<Self>) -> Option<$resource> {
                    tables.$field.get(handle).cloned()
                }

                fn ref_count(tables: &ResourceTables, handle: Handle<Self>) -> Option<u32> {
                    tables.$field.ref_count(handle)
                }

                fn add_ref(tables: &mut ResourceTables, handle: Handle<Self>) -> bool {
                    tables.$field.add_ref(handle)
                }

                fn release(tables: &mut ResourceTables, handle: Handle<Self>) -> bool {
                    match tables.$field.release(handle) {
                        Release::Stale => false,
                        Release::Retained { .. } => true,
                        Release::Freed(resource) => {
                            log::trace!("Destroying {} {:?}", <$kind>::NAME, handle);
                            tables.$destroy(resource);
                            true
                        }
                    }
                }
            }
        )*
    };
}

macro_rules! managed_cache_kind {
    ($($kind:ty => $resource:ty, $field:ident, $destroy:ident;)*) => {
        $(
            impl ManagedKind for $kind {
                type Resource = $resource;

                fn get(tables: &ResourceTables, handle: Handle<Self>) -> Option<$resource> {
                    tables.$field.get(handle).cloned()
                }

                fn ref_count(tables: &ResourceTables, handle: Handle<Self>) -> Option<u32> {
                    tables.$field.ref_count(handle)
                }

                fn add_ref(tables: &mut ResourceTables, handle: Handle<Self>) -> bool {
                    tables.$field.acquire_use(handle)
                }

                fn release(tables: &mut ResourceTables, handle: Handle<Self>) -> bool {
                    match tables.$field.release_use(handle) {
                        Release::Stale => false,
                        Release::Retained { .. } => true,
                        Release::Freed(resource) => {
                            tables.$destroy(resource);
                            true
                        }
                    }
                }

                fn is_evicted(tables: &ResourceTables, handle: Handle<Self>) -> bool {
                    tables.$field.is_evicted(handle)
                }

                fn release_evicted(tables: &mut ResourceTables, handle: Handle<Self>) -> bool {
                    tables.$field.release_evicted(handle)
                }
            }
        )*
    };
}

managed_pool_kind! {
    MemoryKind => MemoryResource, memory, destroy_memory;
    ImageKind => ImageResource, images, destroy_image;
    BufferKind => BufferResource, buffers, destroy_buffer;
    RtGeometryKind => RtGeometryResource, rt_geometry, destroy_rt_geometry;
    RtSceneKind => RtSceneResource, rt_scenes, destroy_rt_scene;
    ShaderTableKind => ShaderTableResource, shader_tables, destroy_shader_table;
    SwapchainKind => SwapchainResource, swapchains, destroy_swapchain;
}

managed_cache_kind! {
    SamplerKind => SamplerResource, samplers, destroy_sampler;
    RenderPassKind => RenderPassResource, render_passes, destroy_render_pass;
    FramebufferKind => FramebufferResource, framebuffers, destroy_framebuffer;
    DescriptorSetLayoutKind => DescriptorSetLayoutResource, set_layouts, destroy_set_layout;
    PipelineLayoutKind => PipelineLayoutResource, pipeline_layouts, destroy_pipeline_layout;
    DescriptorSetKind => DescriptorSetResource, descriptor_sets, destroy_descriptor_set;
    GraphicsPipelineKind => PipelineResource, graphics_pipelines, destroy_pipeline;
    ComputePipelineKind => PipelineResource, compute_pipelines, destroy_pipeline;
    MeshPipelineKind => PipelineResource, mesh_pipelines, destroy_pipeline;
    RayTracingPipelineKind => PipelineResource, ray_tracing_pipelines, destroy_pipeline;
}

impl ManagedKind for ShaderModuleKind {
    type Resource = ShaderModuleResource;

    fn get(tables: &ResourceTables, handle: Handle<Self>) -> Option<ShaderModuleResource> {
        tables.shader_modules.get(handle)
    }

    fn ref_count(tables: &ResourceTables, handle: Handle<Self>) -> Option<u32> {
        tables.shader_modules.ref_count(handle)
    }

    fn add_ref(tables: &mut ResourceTables, handle: Handle<Self>) -> bool {
        tables.shader_modules.acquire_use(handle)
    }

    fn release(tables: &mut ResourceTables, handle: Handle<Self>) -> bool {
        tables.shader_modules.release_use(&*tables.device, handle)
    }
}
