//! Dummy device for testing.
//!
//! No GPU work happens. The device hands out unique ids, tracks which objects
//! are alive, validates the parameters a real driver would reject, and can be
//! told to fail upcoming creations of a given kind.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::{
    AccelerationStructureInfo, DescriptorWrite, Device, DeviceCapabilities, DeviceObject,
    FramebufferCreateInfo, ObjectKind, PipelineCreateInfo, RawAccelerationStructure, RawBuffer,
    RawDescriptorSet, RawDescriptorSetLayout, RawFramebuffer, RawImage, RawMemory, RawPipeline,
    RawPipelineLayout, RawRenderPass, RawSampler, RawShaderModule, RawShaderTable, RawSwapchain,
};
use crate::error::GraphicsError;
use crate::shader::ShaderFormat;
use crate::types::{
    BufferDescriptor, DescriptorSetLayoutDescriptor, ImageDescriptor, MemoryDescriptor,
    MemoryHeap, PipelineState, PushConstantRange, RenderPassDescriptor, SamplerDescriptor,
    ShaderTableDescriptor, SwapchainDescriptor,
};

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Device that only does bookkeeping.
pub struct DummyDevice {
    next_id: AtomicU64,
    /// Live objects by id.
    objects: Mutex<HashMap<u64, ObjectKind>>,
    /// Size of every live memory object.
    memory_sizes: Mutex<HashMap<u64, u64>>,
    created: Mutex<HashMap<ObjectKind, usize>>,
    pending_failures: Mutex<HashMap<ObjectKind, usize>>,
    invalid_destroys: AtomicU64,
    max_memory_size: u64,
    heaps: Vec<MemoryHeap>,
    shader_formats: Vec<ShaderFormat>,
    capabilities: DeviceCapabilities,
}

impl Default for DummyDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl DummyDevice {
    /// Create a dummy device with one 8 GiB device-local heap, one 256 MiB
    /// host-visible heap, SPIR-V support and every optional capability.
    pub fn new() -> Self {
        log::trace!("DummyDevice: created");
        Self {
            next_id: AtomicU64::new(1),
            objects: Mutex::new(HashMap::new()),
            memory_sizes: Mutex::new(HashMap::new()),
            created: Mutex::new(HashMap::new()),
            pending_failures: Mutex::new(HashMap::new()),
            invalid_destroys: AtomicU64::new(0),
            max_memory_size: 1 << 32,
            heaps: vec![
                MemoryHeap {
                    size: 8 << 30,
                    device_local: true,
                    host_visible: false,
                },
                MemoryHeap {
                    size: 256 << 20,
                    device_local: true,
                    host_visible: true,
                },
            ],
            shader_formats: vec![ShaderFormat::Spirv],
            capabilities: DeviceCapabilities {
                mesh_shading: true,
                ray_tracing: true,
                presentation: true,
            },
        }
    }

    /// Reject memory objects larger than `size` bytes.
    pub fn with_max_memory_size(mut self, size: u64) -> Self {
        self.max_memory_size = size;
        self
    }

    pub fn with_heaps(mut self, heaps: Vec<MemoryHeap>) -> Self {
        self.heaps = heaps;
        self
    }

    pub fn with_shader_formats(mut self, formats: Vec<ShaderFormat>) -> Self {
        self.shader_formats = formats;
        self
    }

    pub fn with_capabilities(mut self, capabilities: DeviceCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Make the next creation of `kind` fail.
    pub fn fail_next(&self, kind: ObjectKind) {
        *self.pending_failures.lock().entry(kind).or_insert(0) += 1;
    }

    /// Number of live objects of `kind`.
    pub fn live_count(&self, kind: ObjectKind) -> usize {
        self.objects.lock().values().filter(|k| **k == kind).count()
    }

    /// Number of live objects of every kind.
    pub fn total_live(&self) -> usize {
        self.objects.lock().len()
    }

    /// Number of objects of `kind` ever created.
    pub fn created_count(&self, kind: ObjectKind) -> usize {
        self.created.lock().get(&kind).copied().unwrap_or(0)
    }

    /// Number of destroy calls on unknown or mismatched ids.
    pub fn invalid_destroys(&self) -> u64 {
        self.invalid_destroys.load(Ordering::Relaxed)
    }

    fn take_failure(&self, kind: ObjectKind) -> Result<(), GraphicsError> {
        let mut pending = self.pending_failures.lock();
        match pending.get_mut(&kind) {
            Some(count) if *count > 0 => {
                *count -= 1;
                Err(GraphicsError::ResourceCreationFailed(format!(
                    "injected {kind:?} failure"
                )))
            }
            _ => Ok(()),
        }
    }

    fn register(&self, kind: ObjectKind) -> Result<u64, GraphicsError> {
        self.take_failure(kind)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.objects.lock().insert(id, kind);
        *self.created.lock().entry(kind).or_insert(0) += 1;
        log::trace!("DummyDevice: created {:?} #{}", kind, id);
        Ok(id)
    }

    fn expect_live(&self, id: u64, kind: ObjectKind) -> Result<(), GraphicsError> {
        match self.objects.lock().get(&id) {
            Some(k) if *k == kind => Ok(()),
            _ => Err(GraphicsError::InvalidParameter(format!(
                "{kind:?} #{id} is not alive"
            ))),
        }
    }

    fn require(&self, supported: bool, feature: &str) -> Result<(), GraphicsError> {
        if supported {
            Ok(())
        } else {
            Err(GraphicsError::FeatureNotSupported(feature.to_string()))
        }
    }

    fn check_binding(&self, memory: RawMemory, offset: u64, size: u64) -> Result<(), GraphicsError> {
        let capacity = self.memory_sizes.lock().get(&memory.0).copied();
        match capacity {
            None => Err(GraphicsError::InvalidParameter(format!(
                "memory #{} is not alive",
                memory.0
            ))),
            Some(capacity) if offset.saturating_add(size) > capacity => {
                Err(GraphicsError::InvalidParameter(format!(
                    "{size} bytes at offset {offset} exceed memory of {capacity} bytes"
                )))
            }
            Some(_) => Ok(()),
        }
    }
}

impl Device for DummyDevice {
    fn name(&self) -> &str {
        "dummy"
    }

    fn capabilities(&self) -> DeviceCapabilities {
        self.capabilities
    }

    fn memory_heaps(&self) -> Vec<MemoryHeap> {
        self.heaps.clone()
    }

    fn accepts_shader_format(&self, format: ShaderFormat) -> bool {
        self.shader_formats.contains(&format)
    }

    fn create_memory(&self, desc: &MemoryDescriptor) -> Result<RawMemory, GraphicsError> {
        if desc.size == 0 {
            return Err(GraphicsError::InvalidParameter(
                "memory size is zero".to_string(),
            ));
        }
        if !desc.alignment.is_power_of_two() {
            return Err(GraphicsError::InvalidParameter(format!(
                "alignment {} is not a power of two",
                desc.alignment
            )));
        }
        if desc.size > self.max_memory_size {
            return Err(GraphicsError::OutOfMemory);
        }
        let id = self.register(ObjectKind::Memory)?;
        self.memory_sizes.lock().insert(id, desc.size);
        Ok(RawMemory(id))
    }

    fn create_buffer(
        &self,
        desc: &BufferDescriptor,
        memory: RawMemory,
        offset: u64,
    ) -> Result<RawBuffer, GraphicsError> {
        if desc.size == 0 {
            return Err(GraphicsError::InvalidParameter(
                "buffer size is zero".to_string(),
            ));
        }
        self.check_binding(memory, offset, desc.size)?;
        self.register(ObjectKind::Buffer).map(RawBuffer)
    }

    fn create_image(
        &self,
        desc: &ImageDescriptor,
        memory: RawMemory,
        offset: u64,
    ) -> Result<RawImage, GraphicsError> {
        if desc.size.is_empty() {
            return Err(GraphicsError::InvalidParameter(
                "image extent is empty".to_string(),
            ));
        }
        self.check_binding(memory, offset, desc.byte_size())?;
        self.register(ObjectKind::Image).map(RawImage)
    }

    fn create_sampler(&self, desc: &SamplerDescriptor) -> Result<RawSampler, GraphicsError> {
        if desc.lod_min_clamp > desc.lod_max_clamp {
            return Err(GraphicsError::InvalidParameter(
                "lod_min_clamp exceeds lod_max_clamp".to_string(),
            ));
        }
        self.register(ObjectKind::Sampler).map(RawSampler)
    }

    fn create_render_pass(
        &self,
        desc: &RenderPassDescriptor,
    ) -> Result<RawRenderPass, GraphicsError> {
        if desc.attachment_count() == 0 {
            return Err(GraphicsError::InvalidParameter(
                "render pass has no attachments".to_string(),
            ));
        }
        self.register(ObjectKind::RenderPass).map(RawRenderPass)
    }

    fn create_framebuffer(
        &self,
        info: &FramebufferCreateInfo,
    ) -> Result<RawFramebuffer, GraphicsError> {
        self.expect_live(info.render_pass.0, ObjectKind::RenderPass)?;
        for image in &info.attachments {
            self.expect_live(image.0, ObjectKind::Image)?;
        }
        self.register(ObjectKind::Framebuffer).map(RawFramebuffer)
    }

    fn create_descriptor_set_layout(
        &self,
        _desc: &DescriptorSetLayoutDescriptor,
    ) -> Result<RawDescriptorSetLayout, GraphicsError> {
        self.register(ObjectKind::DescriptorSetLayout)
            .map(RawDescriptorSetLayout)
    }

    fn create_pipeline_layout(
        &self,
        set_layouts: &[RawDescriptorSetLayout],
        _push_constants: &[PushConstantRange],
    ) -> Result<RawPipelineLayout, GraphicsError> {
        for layout in set_layouts {
            self.expect_live(layout.0, ObjectKind::DescriptorSetLayout)?;
        }
        self.register(ObjectKind::PipelineLayout)
            .map(RawPipelineLayout)
    }

    fn create_shader_module(&self, spirv: &[u32]) -> Result<RawShaderModule, GraphicsError> {
        if spirv.first() != Some(&SPIRV_MAGIC) {
            return Err(GraphicsError::ShaderCompilationFailed(
                "missing SPIR-V magic number".to_string(),
            ));
        }
        self.register(ObjectKind::ShaderModule).map(RawShaderModule)
    }

    fn create_pipeline(&self, info: &PipelineCreateInfo<'_>) -> Result<RawPipeline, GraphicsError> {
        match info.state {
            PipelineState::Mesh { .. } => {
                self.require(self.capabilities.mesh_shading, "mesh shading")?
            }
            PipelineState::RayTracing { .. } => {
                self.require(self.capabilities.ray_tracing, "ray tracing")?
            }
            PipelineState::Graphics { .. } | PipelineState::Compute => {}
        }
        self.expect_live(info.layout.0, ObjectKind::PipelineLayout)?;
        if let Some(pass) = info.render_pass {
            self.expect_live(pass.0, ObjectKind::RenderPass)?;
        }
        for stage in &info.stages {
            self.expect_live(stage.module.0, ObjectKind::ShaderModule)?;
        }
        self.register(ObjectKind::Pipeline).map(RawPipeline)
    }

    fn create_descriptor_set(
        &self,
        layout: RawDescriptorSetLayout,
        _writes: &[DescriptorWrite],
    ) -> Result<RawDescriptorSet, GraphicsError> {
        self.expect_live(layout.0, ObjectKind::DescriptorSetLayout)?;
        self.register(ObjectKind::DescriptorSet).map(RawDescriptorSet)
    }

    fn create_acceleration_structure(
        &self,
        info: &AccelerationStructureInfo,
    ) -> Result<RawAccelerationStructure, GraphicsError> {
        self.require(self.capabilities.ray_tracing, "ray tracing")?;
        if let AccelerationStructureInfo::Geometry { vertex_count: 0, .. } = info {
            return Err(GraphicsError::InvalidParameter(
                "geometry has no vertices".to_string(),
            ));
        }
        self.register(ObjectKind::AccelerationStructure)
            .map(RawAccelerationStructure)
    }

    fn create_shader_table(
        &self,
        pipeline: RawPipeline,
        _desc: &ShaderTableDescriptor,
    ) -> Result<RawShaderTable, GraphicsError> {
        self.require(self.capabilities.ray_tracing, "ray tracing")?;
        self.expect_live(pipeline.0, ObjectKind::Pipeline)?;
        self.register(ObjectKind::ShaderTable).map(RawShaderTable)
    }

    fn create_swapchain(&self, desc: &SwapchainDescriptor) -> Result<RawSwapchain, GraphicsError> {
        self.require(self.capabilities.presentation, "presentation")?;
        if desc.width == 0 || desc.height == 0 {
            return Err(GraphicsError::InvalidParameter(
                "swapchain extent is empty".to_string(),
            ));
        }
        self.register(ObjectKind::Swapchain).map(RawSwapchain)
    }

    fn destroy(&self, object: DeviceObject) {
        let kind = object.kind();
        let id = match object {
            DeviceObject::Memory(RawMemory(id)) => {
                self.memory_sizes.lock().remove(&id);
                id
            }
            DeviceObject::Buffer(RawBuffer(id))
            | DeviceObject::Image(RawImage(id))
            | DeviceObject::Sampler(RawSampler(id))
            | DeviceObject::RenderPass(RawRenderPass(id))
            | DeviceObject::Framebuffer(RawFramebuffer(id))
            | DeviceObject::DescriptorSetLayout(RawDescriptorSetLayout(id))
            | DeviceObject::PipelineLayout(RawPipelineLayout(id))
            | DeviceObject::ShaderModule(RawShaderModule(id))
            | DeviceObject::Pipeline(RawPipeline(id))
            | DeviceObject::DescriptorSet(RawDescriptorSet(id))
            | DeviceObject::AccelerationStructure(RawAccelerationStructure(id))
            | DeviceObject::ShaderTable(RawShaderTable(id))
            | DeviceObject::Swapchain(RawSwapchain(id)) => id,
        };

        let mut objects = self.objects.lock();
        match objects.get(&id) {
            Some(k) if *k == kind => {
                objects.remove(&id);
                log::trace!("DummyDevice: destroyed {:?} #{}", kind, id);
            }
            _ => {
                self.invalid_destroys.fetch_add(1, Ordering::Relaxed);
                log::error!("DummyDevice: destroy of unknown {:?} #{}", kind, id);
            }
        }
    }
}

static_assertions::assert_impl_all!(DummyDevice: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BufferUsage, MemoryLocation};

    #[test]
    fn test_memory_validation() {
        let device = DummyDevice::new().with_max_memory_size(1024);
        assert!(device
            .create_memory(&MemoryDescriptor::new(0, MemoryLocation::GpuOnly))
            .is_err());
        assert_eq!(
            device.create_memory(&MemoryDescriptor::new(4096, MemoryLocation::GpuOnly)),
            Err(GraphicsError::OutOfMemory)
        );
        assert!(device
            .create_memory(&MemoryDescriptor::new(512, MemoryLocation::GpuOnly))
            .is_ok());
        assert_eq!(device.live_count(ObjectKind::Memory), 1);
    }

    #[test]
    fn test_buffer_must_fit_memory() {
        let device = DummyDevice::new();
        let memory = device
            .create_memory(&MemoryDescriptor::new(64, MemoryLocation::GpuOnly))
            .unwrap();
        let big = BufferDescriptor::new(128, BufferUsage::VERTEX);
        assert!(device.create_buffer(&big, memory, 0).is_err());

        let fits = BufferDescriptor::new(64, BufferUsage::VERTEX);
        let buffer = device.create_buffer(&fits, memory, 0).unwrap();
        device.destroy(DeviceObject::Buffer(buffer));
        device.destroy(DeviceObject::Memory(memory));
        assert_eq!(device.total_live(), 0);
        assert_eq!(device.invalid_destroys(), 0);
    }

    #[test]
    fn test_fail_next() {
        let device = DummyDevice::new();
        device.fail_next(ObjectKind::Sampler);
        assert!(device.create_sampler(&SamplerDescriptor::linear()).is_err());
        assert!(device.create_sampler(&SamplerDescriptor::linear()).is_ok());
        assert_eq!(device.created_count(ObjectKind::Sampler), 1);
    }

    #[test]
    fn test_double_destroy_is_reported() {
        let device = DummyDevice::new();
        let sampler = device.create_sampler(&SamplerDescriptor::nearest()).unwrap();
        device.destroy(DeviceObject::Sampler(sampler));
        device.destroy(DeviceObject::Sampler(sampler));
        assert_eq!(device.invalid_destroys(), 1);
    }

    #[test]
    fn test_shader_module_requires_spirv_magic() {
        let device = DummyDevice::new();
        assert!(device.create_shader_module(&[0, 1, 2]).is_err());
        assert!(device.create_shader_module(&[SPIRV_MAGIC, 0x0001_0300]).is_ok());
    }
}
