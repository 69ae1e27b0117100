//! Creation of every non-pipeline resource kind.

use std::sync::Arc;

use keel_core::profiling::profile_scope;

use super::tables::{
    BufferResource, DescriptorSetLayoutResource, DescriptorSetResource, FramebufferResource,
    ImageResource, MemoryResource, PipelineLayoutKey, PipelineLayoutResource, RenderPassResource,
    ResourceTables, RtGeometryResource, RtSceneResource, SamplerResource, ShaderTableResource,
    SwapchainResource,
};
use super::{stale, ResourceManager};
use crate::device::{AccelerationStructureInfo, DescriptorWrite, FramebufferCreateInfo, RawBinding};
use crate::error::GraphicsError;
use crate::handles::*;
use crate::staging::{StagingBlock, StagingClass, StagingIndex};
use crate::types::{
    BoundResource, BufferDescriptor, DebugLabel, DescriptorSetDescriptor,
    DescriptorSetLayoutDescriptor, FramebufferDescriptor, ImageDescriptor, MemoryDescriptor,
    PipelineLayoutDescriptor, PipelineState, RenderPassDescriptor, RtGeometryDescriptor,
    RtSceneDescriptor, SamplerDescriptor, ShaderTableDescriptor, SwapchainDescriptor,
};

impl ResourceManager {
    // ------------------------------------------------------------------------
    // Memory, buffers and images
    // ------------------------------------------------------------------------

    /// Create a device memory object.
    pub fn create_memory(&self, desc: &MemoryDescriptor) -> MemoryHandle {
        profile_scope!("create_memory");
        let result = self
            .live_tables()
            .and_then(|mut tables| tables.create_memory(desc));
        self.finish(&desc.label, result)
    }

    /// Create a buffer in a memory object of its own.
    ///
    /// The memory object is created first and is owned by the buffer: it is
    /// destroyed together with it, or immediately if the buffer cannot be
    /// created.
    pub fn create_buffer(
        &self,
        desc: &BufferDescriptor,
        memory_desc: &MemoryDescriptor,
    ) -> BufferHandle {
        profile_scope!("create_buffer");
        let result = self
            .live_tables()
            .and_then(|mut tables| tables.create_buffer(desc, memory_desc));
        self.finish(&desc.label, result)
    }

    /// Create a buffer at `offset` in an existing memory object.
    ///
    /// The buffer takes its own reference on `memory`.
    pub fn bind_buffer(
        &self,
        desc: &BufferDescriptor,
        memory: MemoryHandle,
        offset: u64,
    ) -> BufferHandle {
        profile_scope!("bind_buffer");
        let result = self
            .live_tables()
            .and_then(|mut tables| tables.bind_buffer(desc, memory, offset));
        self.finish(&desc.label, result)
    }

    /// Create an image in a memory object of its own. See
    /// [`create_buffer`](Self::create_buffer).
    pub fn create_image(&self, desc: &ImageDescriptor, memory_desc: &MemoryDescriptor) -> ImageHandle {
        profile_scope!("create_image");
        let result = self
            .live_tables()
            .and_then(|mut tables| tables.create_image(desc, memory_desc));
        self.finish(&desc.label, result)
    }

    /// Create an image at `offset` in an existing memory object.
    pub fn bind_image(&self, desc: &ImageDescriptor, memory: MemoryHandle, offset: u64) -> ImageHandle {
        profile_scope!("bind_image");
        let result = self
            .live_tables()
            .and_then(|mut tables| tables.bind_image(desc, memory, offset));
        self.finish(&desc.label, result)
    }

    // ------------------------------------------------------------------------
    // Cached kinds
    // ------------------------------------------------------------------------

    pub fn create_sampler(&self, desc: &SamplerDescriptor) -> SamplerHandle {
        profile_scope!("create_sampler");
        let result = self
            .live_tables()
            .and_then(|mut tables| tables.create_sampler(desc));
        self.finish(&desc.label, result)
    }

    pub fn create_render_pass(&self, desc: &RenderPassDescriptor) -> RenderPassHandle {
        profile_scope!("create_render_pass");
        let result = self
            .live_tables()
            .and_then(|mut tables| tables.create_render_pass(desc));
        self.finish(&desc.label, result)
    }

    /// Find or create a framebuffer.
    ///
    /// The attachments must match the render pass and be alive. A new
    /// framebuffer keeps its render pass alive; attachments are only checked
    /// again by [`run_validation`](Self::run_validation).
    pub fn create_framebuffer(&self, desc: &FramebufferDescriptor) -> FramebufferHandle {
        profile_scope!("create_framebuffer");
        let result = self
            .live_tables()
            .and_then(|mut tables| tables.create_framebuffer(desc));
        self.finish(&desc.label, result)
    }

    pub fn create_descriptor_set_layout(
        &self,
        desc: &DescriptorSetLayoutDescriptor,
    ) -> DescriptorSetLayoutHandle {
        profile_scope!("create_descriptor_set_layout");
        let result = self
            .live_tables()
            .and_then(|mut tables| tables.create_set_layout(desc));
        self.finish(&desc.label, result)
    }

    /// Find or create a pipeline layout and the set layouts it is built from.
    pub fn create_pipeline_layout(&self, desc: &PipelineLayoutDescriptor) -> PipelineLayoutHandle {
        profile_scope!("create_pipeline_layout");
        let result = self
            .live_tables()
            .and_then(|mut tables| tables.create_pipeline_layout(desc));
        self.finish(&desc.label, result)
    }

    /// Find or create a descriptor set.
    ///
    /// `desc` remembers the set it resolved to. Asking again with the same,
    /// unchanged description skips validation and hashing.
    pub fn create_descriptor_set(&self, desc: &DescriptorSetDescriptor) -> DescriptorSetHandle {
        profile_scope!("create_descriptor_set");
        let result = self
            .live_tables()
            .and_then(|mut tables| tables.create_descriptor_set(desc));
        self.finish(&desc.label, result)
    }

    /// Register a SPIR-V binary as a native shader module.
    ///
    /// Identical binaries share one module. The returned handle can be used
    /// as [`ShaderCode::Module`](crate::shader::ShaderCode::Module).
    pub fn create_shader_module(&self, spirv: &[u32]) -> ShaderModuleHandle {
        profile_scope!("create_shader_module");
        // Teardown clears the module cache under the tables lock.
        let tables = self.tables.read();
        let result = self
            .check_alive()
            .and_then(|()| self.shaders.modules().register(&*self.device, Arc::from(spirv)));
        drop(tables);
        self.finish(&DebugLabel::none(), result)
    }

    // ------------------------------------------------------------------------
    // Ray tracing and presentation
    // ------------------------------------------------------------------------

    pub fn create_ray_tracing_geometry(&self, desc: &RtGeometryDescriptor) -> RtGeometryHandle {
        profile_scope!("create_ray_tracing_geometry");
        let result = self
            .live_tables()
            .and_then(|mut tables| tables.create_rt_geometry(desc));
        self.finish(&desc.label, result)
    }

    pub fn create_ray_tracing_scene(&self, desc: &RtSceneDescriptor) -> RtSceneHandle {
        profile_scope!("create_ray_tracing_scene");
        let result = self
            .live_tables()
            .and_then(|mut tables| tables.create_rt_scene(desc));
        self.finish(&desc.label, result)
    }

    pub fn create_shader_table(&self, desc: &ShaderTableDescriptor) -> ShaderTableHandle {
        profile_scope!("create_shader_table");
        let result = self
            .live_tables()
            .and_then(|mut tables| tables.create_shader_table(desc));
        self.finish(&desc.label, result)
    }

    pub fn create_swapchain(&self, desc: &SwapchainDescriptor) -> SwapchainHandle {
        profile_scope!("create_swapchain");
        let result = self
            .live_tables()
            .and_then(|mut tables| tables.create_swapchain(desc));
        self.finish(&desc.label, result)
    }

    // ------------------------------------------------------------------------
    // Staging
    // ------------------------------------------------------------------------

    /// Borrow a staging block of `class`.
    ///
    /// Returns `None` when the pool is at capacity or the buffer could not be
    /// created.
    pub fn allocate_staging(&self, class: StagingClass) -> Option<StagingBlock> {
        if self.is_torn_down() {
            return None;
        }
        let mut staging = self.staging.lock();
        staging.allocate(class, |desc, memory| self.create_buffer(desc, memory))
    }

    /// Return a staging block. Returns `false` if it was not borrowed.
    pub fn release_staging(&self, index: StagingIndex) -> bool {
        self.staging.lock().release_block(index)
    }

    /// Buffer behind a borrowed staging block.
    pub fn staging_buffer(&self, index: StagingIndex) -> Option<BufferHandle> {
        self.staging.lock().buffer(index)
    }
}

// ============================================================================
// Builders
// ============================================================================

fn validate_buffer(desc: &BufferDescriptor) -> Result<(), GraphicsError> {
    if desc.size == 0 {
        return Err(GraphicsError::InvalidParameter(
            "buffer size cannot be zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_image(desc: &ImageDescriptor) -> Result<(), GraphicsError> {
    if desc.size.is_empty() {
        return Err(GraphicsError::InvalidParameter(format!(
            "image extent {:?} is empty",
            desc.size
        )));
    }
    if desc.mip_level_count == 0 || desc.array_layer_count == 0 || desc.sample_count == 0 {
        return Err(GraphicsError::InvalidParameter(
            "image needs at least one mip level, layer and sample".to_string(),
        ));
    }
    Ok(())
}

fn validate_set_layout(desc: &DescriptorSetLayoutDescriptor) -> Result<(), GraphicsError> {
    for (i, entry) in desc.entries.iter().enumerate() {
        if desc.entries[..i].iter().any(|e| e.binding == entry.binding) {
            return Err(GraphicsError::InvalidParameter(format!(
                "binding {} declared twice",
                entry.binding
            )));
        }
        if entry.count == 0 {
            return Err(GraphicsError::InvalidParameter(format!(
                "binding {} has a descriptor count of zero",
                entry.binding
            )));
        }
    }
    Ok(())
}

impl ResourceTables {
    pub(crate) fn create_memory(
        &mut self,
        desc: &MemoryDescriptor,
    ) -> Result<MemoryHandle, GraphicsError> {
        let index = self.memory.allocate()?;
        match self.device.create_memory(desc) {
            Ok(raw) => {
                let handle = self.memory.construct(
                    index,
                    MemoryResource {
                        raw,
                        size: desc.size,
                        location: desc.location,
                        label: desc.label.clone(),
                    },
                );
                log::trace!("Created {:?} ({} bytes, {:?})", handle, desc.size, desc.location);
                Ok(handle)
            }
            Err(e) => {
                self.memory.cancel(index);
                Err(e)
            }
        }
    }

    pub(crate) fn create_buffer(
        &mut self,
        desc: &BufferDescriptor,
        memory_desc: &MemoryDescriptor,
    ) -> Result<BufferHandle, GraphicsError> {
        validate_buffer(desc)?;
        let memory = self.create_memory(memory_desc)?;
        let result = self.construct_buffer(desc, memory, 0);
        if result.is_err() {
            self.release_dependency(memory);
        }
        result
    }

    pub(crate) fn bind_buffer(
        &mut self,
        desc: &BufferDescriptor,
        memory: MemoryHandle,
        offset: u64,
    ) -> Result<BufferHandle, GraphicsError> {
        validate_buffer(desc)?;
        if !self.memory.add_ref(memory) {
            return Err(stale(memory));
        }
        let result = self.construct_buffer(desc, memory, offset);
        if result.is_err() {
            self.release_dependency(memory);
        }
        result
    }

    /// Build a buffer that takes over one reference on `memory`.
    fn construct_buffer(
        &mut self,
        desc: &BufferDescriptor,
        memory: MemoryHandle,
        offset: u64,
    ) -> Result<BufferHandle, GraphicsError> {
        let raw_memory = self.memory.get(memory).ok_or_else(|| stale(memory))?.raw;
        let index = self.buffers.allocate()?;
        match self.device.create_buffer(desc, raw_memory, offset) {
            Ok(raw) => Ok(self.buffers.construct(
                index,
                BufferResource {
                    raw,
                    memory,
                    desc: desc.clone(),
                },
            )),
            Err(e) => {
                self.buffers.cancel(index);
                Err(e)
            }
        }
    }

    pub(crate) fn create_image(
        &mut self,
        desc: &ImageDescriptor,
        memory_desc: &MemoryDescriptor,
    ) -> Result<ImageHandle, GraphicsError> {
        validate_image(desc)?;
        let memory = self.create_memory(memory_desc)?;
        let result = self.construct_image(desc, memory, 0);
        if result.is_err() {
            self.release_dependency(memory);
        }
        result
    }

    pub(crate) fn bind_image(
        &mut self,
        desc: &ImageDescriptor,
        memory: MemoryHandle,
        offset: u64,
    ) -> Result<ImageHandle, GraphicsError> {
        validate_image(desc)?;
        if !self.memory.add_ref(memory) {
            return Err(stale(memory));
        }
        let result = self.construct_image(desc, memory, offset);
        if result.is_err() {
            self.release_dependency(memory);
        }
        result
    }

    fn construct_image(
        &mut self,
        desc: &ImageDescriptor,
        memory: MemoryHandle,
        offset: u64,
    ) -> Result<ImageHandle, GraphicsError> {
        let raw_memory = self.memory.get(memory).ok_or_else(|| stale(memory))?.raw;
        let index = self.images.allocate()?;
        match self.device.create_image(desc, raw_memory, offset) {
            Ok(raw) => Ok(self.images.construct(
                index,
                ImageResource {
                    raw,
                    memory,
                    desc: desc.clone(),
                },
            )),
            Err(e) => {
                self.images.cancel(index);
                Err(e)
            }
        }
    }

    pub(crate) fn create_sampler(
        &mut self,
        desc: &SamplerDescriptor,
    ) -> Result<SamplerHandle, GraphicsError> {
        let device = &self.device;
        let lookup = self.samplers.find_or_add(desc.clone(), |desc| {
            device
                .create_sampler(desc)
                .map(|raw| SamplerResource { raw })
        })?;
        Ok(lookup.handle)
    }

    pub(crate) fn create_render_pass(
        &mut self,
        desc: &RenderPassDescriptor,
    ) -> Result<RenderPassHandle, GraphicsError> {
        let device = &self.device;
        let lookup = self.render_passes.find_or_add(desc.clone(), |desc| {
            device
                .create_render_pass(desc)
                .map(|raw| RenderPassResource { raw })
        })?;
        Ok(lookup.handle)
    }

    pub(crate) fn create_framebuffer(
        &mut self,
        desc: &FramebufferDescriptor,
    ) -> Result<FramebufferHandle, GraphicsError> {
        let pass = self
            .render_passes
            .key(desc.render_pass)
            .ok_or_else(|| stale(desc.render_pass))?;
        if pass.attachment_count() != desc.attachments.len() {
            return Err(GraphicsError::InvalidParameter(format!(
                "render pass expects {} attachment(s), framebuffer has {}",
                pass.attachment_count(),
                desc.attachments.len()
            )));
        }
        if desc.width == 0 || desc.height == 0 || desc.layers == 0 {
            return Err(GraphicsError::InvalidParameter(format!(
                "framebuffer extent {}x{}x{} is empty",
                desc.width, desc.height, desc.layers
            )));
        }
        let pass_raw = self
            .render_passes
            .get(desc.render_pass)
            .ok_or_else(|| stale(desc.render_pass))?
            .raw;
        let attachments = desc
            .attachments
            .iter()
            .map(|&image| {
                self.images
                    .get(image)
                    .map(|i| i.raw)
                    .ok_or_else(|| stale(image))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let device = &self.device;
        let render_passes = &mut self.render_passes;
        let lookup = self.framebuffers.find_or_add(desc.clone(), |desc| {
            let raw = device.create_framebuffer(&FramebufferCreateInfo {
                render_pass: pass_raw,
                attachments,
                width: desc.width,
                height: desc.height,
                layers: desc.layers,
            })?;
            render_passes.acquire_use(desc.render_pass);
            Ok(FramebufferResource {
                raw,
                render_pass: desc.render_pass,
            })
        })?;
        Ok(lookup.handle)
    }

    pub(crate) fn create_set_layout(
        &mut self,
        desc: &DescriptorSetLayoutDescriptor,
    ) -> Result<DescriptorSetLayoutHandle, GraphicsError> {
        validate_set_layout(desc)?;
        let device = &self.device;
        let lookup = self.set_layouts.find_or_add(desc.clone(), |desc| {
            device
                .create_descriptor_set_layout(desc)
                .map(|raw| DescriptorSetLayoutResource { raw })
        })?;
        Ok(lookup.handle)
    }

    /// Find or create a pipeline layout.
    ///
    /// Every set layout is looked up first, each yielding one use. A new
    /// pipeline layout keeps those uses; otherwise they are given back.
    pub(crate) fn create_pipeline_layout(
        &mut self,
        desc: &PipelineLayoutDescriptor,
    ) -> Result<PipelineLayoutHandle, GraphicsError> {
        let mut set_layouts = Vec::with_capacity(desc.sets.len());
        for set in &desc.sets {
            match self.create_set_layout(set) {
                Ok(handle) => set_layouts.push(handle),
                Err(e) => {
                    self.release_set_layouts(&set_layouts);
                    return Err(e);
                }
            }
        }

        let key = PipelineLayoutKey {
            set_layouts: set_layouts.clone(),
            push_constants: desc.push_constants.clone(),
        };
        let device = &self.device;
        let set_cache = &self.set_layouts;
        let result = self.pipeline_layouts.find_or_add(key, |key| {
            let raw_sets = key
                .set_layouts
                .iter()
                .map(|&h| set_cache.get(h).map(|l| l.raw).ok_or_else(|| stale(h)))
                .collect::<Result<Vec<_>, _>>()?;
            let raw = device.create_pipeline_layout(&raw_sets, &key.push_constants)?;
            Ok(PipelineLayoutResource {
                raw,
                set_layouts: key.set_layouts.clone(),
            })
        });

        match result {
            Ok(lookup) if !lookup.existed => Ok(lookup.handle),
            Ok(lookup) => {
                self.release_set_layouts(&set_layouts);
                Ok(lookup.handle)
            }
            Err(e) => {
                self.release_set_layouts(&set_layouts);
                Err(e.into())
            }
        }
    }

    fn release_set_layouts(&mut self, set_layouts: &[DescriptorSetLayoutHandle]) {
        for &layout in set_layouts.iter().rev() {
            self.release_dependency(layout);
        }
    }

    pub(crate) fn create_descriptor_set(
        &mut self,
        desc: &DescriptorSetDescriptor,
    ) -> Result<DescriptorSetHandle, GraphicsError> {
        let cached = desc.cached.get();
        if cached.is_valid()
            && self.descriptor_sets.key(cached) == Some(desc)
            && self.descriptor_sets.acquire_use(cached)
        {
            return Ok(cached);
        }

        let layout_desc = self
            .set_layouts
            .key(desc.layout)
            .ok_or_else(|| stale(desc.layout))?;
        let layout_raw = self
            .set_layouts
            .get(desc.layout)
            .ok_or_else(|| stale(desc.layout))?
            .raw;

        let mut writes = Vec::with_capacity(desc.bindings.len());
        for (i, binding) in desc.bindings.iter().enumerate() {
            if desc.bindings[..i].iter().any(|b| b.binding == binding.binding) {
                return Err(GraphicsError::InvalidParameter(format!(
                    "binding {} written twice",
                    binding.binding
                )));
            }
            let entry = layout_desc.entry(binding.binding).ok_or_else(|| {
                GraphicsError::InvalidParameter(format!(
                    "binding {} is not declared by the layout",
                    binding.binding
                ))
            })?;
            if !binding.resource.matches(entry.binding_type) {
                return Err(GraphicsError::InvalidParameter(format!(
                    "binding {} expects {:?}, got {:?}",
                    binding.binding, entry.binding_type, binding.resource
                )));
            }
            writes.push(DescriptorWrite {
                binding: binding.binding,
                resource: self.raw_binding(&binding.resource)?,
            });
        }

        let device = &self.device;
        let set_layouts = &mut self.set_layouts;
        let lookup = self.descriptor_sets.find_or_add(desc.clone(), |desc| {
            let raw = device.create_descriptor_set(layout_raw, &writes)?;
            set_layouts.acquire_use(desc.layout);
            Ok(DescriptorSetResource {
                raw,
                layout: desc.layout,
            })
        })?;
        desc.cached.set(lookup.handle);
        Ok(lookup.handle)
    }

    fn raw_binding(&self, resource: &BoundResource) -> Result<RawBinding, GraphicsError> {
        Ok(match *resource {
            BoundResource::Buffer {
                buffer,
                offset,
                size,
            } => {
                let resource = self.buffers.get(buffer).ok_or_else(|| stale(buffer))?;
                if offset.checked_add(size).map_or(true, |end| end > resource.desc.size) {
                    return Err(GraphicsError::InvalidParameter(format!(
                        "range {}+{} exceeds {:?} of {} bytes",
                        offset, size, buffer, resource.desc.size
                    )));
                }
                RawBinding::Buffer {
                    buffer: resource.raw,
                    offset,
                    size,
                }
            }
            BoundResource::Image(image) => {
                RawBinding::Image(self.images.get(image).ok_or_else(|| stale(image))?.raw)
            }
            BoundResource::Sampler(sampler) => {
                RawBinding::Sampler(self.samplers.get(sampler).ok_or_else(|| stale(sampler))?.raw)
            }
            BoundResource::CombinedImageSampler { image, sampler } => {
                RawBinding::CombinedImageSampler {
                    image: self.images.get(image).ok_or_else(|| stale(image))?.raw,
                    sampler: self.samplers.get(sampler).ok_or_else(|| stale(sampler))?.raw,
                }
            }
            BoundResource::AccelerationStructure(scene) => RawBinding::AccelerationStructure(
                self.rt_scenes.get(scene).ok_or_else(|| stale(scene))?.raw,
            ),
        })
    }

    pub(crate) fn create_rt_geometry(
        &mut self,
        desc: &RtGeometryDescriptor,
    ) -> Result<RtGeometryHandle, GraphicsError> {
        if desc.vertex_count == 0 || desc.vertex_stride == 0 {
            return Err(GraphicsError::InvalidParameter(
                "ray tracing geometry needs vertices".to_string(),
            ));
        }
        let vertices = self
            .buffers
            .get(desc.vertex_buffer)
            .ok_or_else(|| stale(desc.vertex_buffer))?;
        let needed = u64::from(desc.vertex_count) * u64::from(desc.vertex_stride);
        if needed > vertices.desc.size {
            return Err(GraphicsError::InvalidParameter(format!(
                "{} vertices of {} bytes exceed {:?}",
                desc.vertex_count, desc.vertex_stride, desc.vertex_buffer
            )));
        }
        let vertex_raw = vertices.raw;
        let index_raw = match desc.index_buffer {
            Some((buffer, format, count)) => {
                let indices = self.buffers.get(buffer).ok_or_else(|| stale(buffer))?;
                if u64::from(count) * format.size() > indices.desc.size {
                    return Err(GraphicsError::InvalidParameter(format!(
                        "{} {:?} indices exceed {:?}",
                        count, format, buffer
                    )));
                }
                Some((indices.raw, format, count))
            }
            None => None,
        };

        let info = AccelerationStructureInfo::Geometry {
            vertex_buffer: vertex_raw,
            vertex_count: desc.vertex_count,
            vertex_stride: desc.vertex_stride,
            index_buffer: index_raw,
            opaque: desc.opaque,
        };
        let index = self.rt_geometry.allocate()?;
        let raw = match self.device.create_acceleration_structure(&info) {
            Ok(raw) => raw,
            Err(e) => {
                self.rt_geometry.cancel(index);
                return Err(e);
            }
        };

        let buffers: Vec<BufferHandle> = std::iter::once(desc.vertex_buffer)
            .chain(desc.index_buffer.map(|(buffer, _, _)| buffer))
            .collect();
        for &buffer in &buffers {
            self.buffers.add_ref(buffer);
        }
        Ok(self.rt_geometry.construct(
            index,
            RtGeometryResource {
                raw,
                buffers,
                label: desc.label.clone(),
            },
        ))
    }

    pub(crate) fn create_rt_scene(
        &mut self,
        desc: &RtSceneDescriptor,
    ) -> Result<RtSceneHandle, GraphicsError> {
        let instances = desc
            .instances
            .iter()
            .map(|instance| {
                self.rt_geometry
                    .get(instance.geometry)
                    .map(|g| {
                        (
                            g.raw,
                            instance.transform,
                            instance.mask,
                            instance.hit_group_offset,
                        )
                    })
                    .ok_or_else(|| stale(instance.geometry))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let index = self.rt_scenes.allocate()?;
        let raw = match self
            .device
            .create_acceleration_structure(&AccelerationStructureInfo::Scene { instances })
        {
            Ok(raw) => raw,
            Err(e) => {
                self.rt_scenes.cancel(index);
                return Err(e);
            }
        };

        let geometries: Vec<RtGeometryHandle> =
            desc.instances.iter().map(|instance| instance.geometry).collect();
        for &geometry in &geometries {
            self.rt_geometry.add_ref(geometry);
        }
        Ok(self.rt_scenes.construct(
            index,
            RtSceneResource {
                raw,
                geometries,
                label: desc.label.clone(),
            },
        ))
    }

    pub(crate) fn create_shader_table(
        &mut self,
        desc: &ShaderTableDescriptor,
    ) -> Result<ShaderTableHandle, GraphicsError> {
        let pipeline = self
            .ray_tracing_pipelines
            .get(desc.pipeline)
            .ok_or_else(|| stale(desc.pipeline))?
            .raw;
        let group_count = match self.ray_tracing_pipelines.key(desc.pipeline) {
            Some(key) => match &key.state {
                PipelineState::RayTracing { groups, .. } => groups.len(),
                _ => 0,
            },
            None => return Err(stale(desc.pipeline)),
        };
        if let Some(group) = desc.groups().find(|&g| g as usize >= group_count) {
            return Err(GraphicsError::InvalidParameter(format!(
                "shader group {} out of range, pipeline has {}",
                group, group_count
            )));
        }

        let index = self.shader_tables.allocate()?;
        let raw = match self.device.create_shader_table(pipeline, desc) {
            Ok(raw) => raw,
            Err(e) => {
                self.shader_tables.cancel(index);
                return Err(e);
            }
        };
        self.ray_tracing_pipelines.acquire_use(desc.pipeline);
        Ok(self.shader_tables.construct(
            index,
            ShaderTableResource {
                raw,
                pipeline: desc.pipeline,
                label: desc.label.clone(),
            },
        ))
    }

    pub(crate) fn create_swapchain(
        &mut self,
        desc: &SwapchainDescriptor,
    ) -> Result<SwapchainHandle, GraphicsError> {
        if desc.width == 0 || desc.height == 0 || desc.image_count == 0 {
            return Err(GraphicsError::InvalidParameter(format!(
                "swapchain {}x{} with {} image(s)",
                desc.width, desc.height, desc.image_count
            )));
        }
        let index = self.swapchains.allocate()?;
        match self.device.create_swapchain(desc) {
            Ok(raw) => Ok(self.swapchains.construct(
                index,
                SwapchainResource {
                    raw,
                    desc: desc.clone(),
                },
            )),
            Err(e) => {
                self.swapchains.cancel(index);
                Err(e)
            }
        }
    }
}
