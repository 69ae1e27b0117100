//! Headless Vulkan device using ash and gpu-allocator.
//!
//! Memory objects are gpu-allocator allocations; buffers and images are bound
//! into them at the offset the manager chooses. Every image gets one view
//! covering all of its subresources, used for framebuffers and descriptors.
//!
//! Mesh shading, ray tracing and presentation need extensions this device
//! does not enable. Those creations report
//! [`GraphicsError::FeatureNotSupported`].

mod conversion;
mod instance;

use std::collections::HashMap;
use std::ffi::CString;
use std::sync::atomic::{AtomicU64, Ordering};

use ash::vk;
use ash::vk::Handle as _;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator};
use parking_lot::Mutex;

use self::conversion::*;
use super::{
    AccelerationStructureInfo, DescriptorWrite, Device, DeviceCapabilities, DeviceObject,
    FramebufferCreateInfo, PipelineCreateInfo, RawAccelerationStructure, RawBinding, RawBuffer,
    RawDescriptorSet, RawDescriptorSetLayout, RawFramebuffer, RawImage, RawMemory, RawPipeline,
    RawPipelineLayout, RawRenderPass, RawSampler, RawShaderModule, RawShaderTable, RawSwapchain,
};
use crate::error::GraphicsError;
use crate::shader::ShaderFormat;
use crate::types::{
    AttachmentDescription, BufferDescriptor, DescriptorSetLayoutDescriptor, ImageDescriptor,
    MemoryDescriptor, MemoryHeap, MemoryLocation, PipelineState, PushConstantRange, RasterState,
    RenderPassDescriptor, SamplerDescriptor, ShaderTableDescriptor, SwapchainDescriptor,
    TextureFormat, TextureUsage, VertexLayout,
};

const MAX_DESCRIPTOR_SETS: u32 = 4096;

/// Memory types compatible with linear and with optimally tiled resources.
#[derive(Debug, Clone, Copy)]
struct MemoryTypeBits {
    linear: u32,
    optimal: u32,
}

/// Objects that need bookkeeping beyond their raw id.
#[derive(Default)]
struct ObjectTables {
    memory: HashMap<u64, Allocation>,
    /// Image view by image.
    image_views: HashMap<u64, vk::ImageView>,
    /// Descriptor type of every binding, by set layout.
    set_layouts: HashMap<u64, Vec<(u32, vk::DescriptorType)>>,
}

/// Descriptor contents, stored until the writes referring to them are made.
enum DescriptorInfo {
    Buffer(vk::DescriptorBufferInfo),
    Image(vk::DescriptorImageInfo),
}

/// A Vulkan device without a surface.
pub struct VulkanDevice {
    // Keeps the loader alive for the instance.
    _entry: ash::Entry,
    instance: ash::Instance,
    debug: Option<DebugMessenger>,
    device: ash::Device,
    name: String,
    allocator: Mutex<Option<Allocator>>,
    descriptor_pool: vk::DescriptorPool,
    objects: Mutex<ObjectTables>,
    next_memory: AtomicU64,
    heaps: Vec<MemoryHeap>,
    memory_type_bits: MemoryTypeBits,
    anisotropy: bool,
}

impl std::fmt::Debug for VulkanDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanDevice")
            .field("name", &self.name)
            .field("validation", &self.debug.is_some())
            .finish()
    }
}

impl VulkanDevice {
    /// Load Vulkan, pick a GPU and create a logical device on it.
    pub fn new(validation: bool) -> Result<Self, GraphicsError> {
        let entry = unsafe { ash::Entry::load() }.map_err(|e| {
            GraphicsError::InitializationFailed(format!("Failed to load Vulkan: {e}"))
        })?;
        let (instance, debug) = instance::create_instance(&entry, validation)?;

        let (physical_device, name, queue_family) =
            match instance::select_physical_device(&instance) {
                Ok(selected) => selected,
                Err(e) => {
                    destroy_instance(&instance, &debug);
                    return Err(e);
                }
            };
        let device =
            match instance::create_logical_device(&instance, physical_device, queue_family) {
                Ok(device) => device,
                Err(e) => {
                    destroy_instance(&instance, &debug);
                    return Err(e);
                }
            };

        let setup = || -> Result<_, GraphicsError> {
            let allocator =
                instance::create_allocator(&instance, physical_device, device.clone())?;
            let descriptor_pool = create_descriptor_pool(&device)?;
            let memory_type_bits = probe_memory_type_bits(&device)?;
            Ok((allocator, descriptor_pool, memory_type_bits))
        };
        let (allocator, descriptor_pool, memory_type_bits) = match setup() {
            Ok(parts) => parts,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                destroy_instance(&instance, &debug);
                return Err(e);
            }
        };

        let heaps = memory_heaps(&instance, physical_device);
        let anisotropy = unsafe { instance.get_physical_device_features(physical_device) }
            .sampler_anisotropy
            == vk::TRUE;

        log::info!(
            "Vulkan device '{}' initialized (validation: {})",
            name,
            debug.is_some()
        );

        Ok(Self {
            _entry: entry,
            instance,
            debug,
            device,
            name,
            allocator: Mutex::new(Some(allocator)),
            descriptor_pool,
            objects: Mutex::new(ObjectTables::default()),
            next_memory: AtomicU64::new(1),
            heaps,
            memory_type_bits,
            anisotropy,
        })
    }

    /// Check `offset` against the allocation and bind through `bind`.
    fn bind_memory(
        &self,
        memory: RawMemory,
        offset: u64,
        requirements: &vk::MemoryRequirements,
        bind: impl FnOnce(vk::DeviceMemory, u64) -> ash::prelude::VkResult<()>,
    ) -> Result<(), GraphicsError> {
        let objects = self.objects.lock();
        let allocation = objects.memory.get(&memory.0).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!("memory #{} is not alive", memory.0))
        })?;
        if requirements.alignment > 1 && offset % requirements.alignment != 0 {
            return Err(GraphicsError::InvalidParameter(format!(
                "offset {offset} is not aligned to {}",
                requirements.alignment
            )));
        }
        if offset.saturating_add(requirements.size) > allocation.size() {
            return Err(GraphicsError::InvalidParameter(format!(
                "{} bytes at offset {offset} exceed memory of {} bytes",
                requirements.size,
                allocation.size()
            )));
        }
        // SAFETY: the allocation stays alive while the objects lock is held
        let device_memory = unsafe { allocation.memory() };
        bind(device_memory, allocation.offset() + offset)
            .map_err(creation_error("memory binding"))
    }

    fn create_view(
        &self,
        image: vk::Image,
        desc: &ImageDescriptor,
    ) -> Result<vk::ImageView, GraphicsError> {
        let view_type = if desc.size.depth > 1 {
            vk::ImageViewType::TYPE_3D
        } else if desc.array_layer_count > 1 {
            vk::ImageViewType::TYPE_2D_ARRAY
        } else {
            vk::ImageViewType::TYPE_2D
        };
        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(view_type)
            .format(convert_texture_format(desc.format))
            .components(vk::ComponentMapping::default())
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect_mask(desc.format),
                base_mip_level: 0,
                level_count: desc.mip_level_count.max(1),
                base_array_layer: 0,
                layer_count: desc.array_layer_count.max(1),
            });
        unsafe { self.device.create_image_view(&view_info, None) }
            .map_err(creation_error("image view"))
    }

    fn graphics_pipeline(
        &self,
        info: &PipelineCreateInfo<'_>,
        stages: &[vk::PipelineShaderStageCreateInfo<'_>],
        vertex_layout: &VertexLayout,
        raster: &RasterState,
    ) -> Result<vk::Pipeline, GraphicsError> {
        let render_pass = info.render_pass.ok_or_else(|| {
            GraphicsError::InvalidParameter("graphics pipeline needs a render pass".to_string())
        })?;

        let bindings: Vec<_> = vertex_layout
            .buffers
            .iter()
            .map(|buffer| {
                vk::VertexInputBindingDescription::default()
                    .binding(buffer.binding)
                    .stride(buffer.stride)
                    .input_rate(convert_step_mode(buffer.step_mode))
            })
            .collect();
        let attributes: Vec<_> = vertex_layout
            .attributes
            .iter()
            .map(|attr| {
                vk::VertexInputAttributeDescription::default()
                    .location(attr.location)
                    .binding(attr.binding)
                    .format(convert_vertex_format(attr.format))
                    .offset(attr.offset)
            })
            .collect();
        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(convert_topology(raster.primitive.topology))
            .primitive_restart_enable(false);

        // Viewport and scissor are dynamic.
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(convert_cull_mode(raster.primitive.cull_mode))
            .front_face(convert_front_face(raster.primitive.front_face));

        let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(convert_sample_count(raster.sample_count));

        let depth_stencil_state = match &raster.depth_stencil {
            Some(depth) => vk::PipelineDepthStencilStateCreateInfo::default()
                .depth_test_enable(true)
                .depth_write_enable(depth.depth_write_enabled)
                .depth_compare_op(convert_compare_function(depth.depth_compare)),
            None => vk::PipelineDepthStencilStateCreateInfo::default(),
        };

        let blend_attachments: Vec<_> = raster
            .color_targets
            .iter()
            .map(|target| convert_blend_mode(target.blend))
            .collect();
        let color_blend_state =
            vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .depth_stencil_state(&depth_stencil_state)
            .color_blend_state(&color_blend_state)
            .dynamic_state(&dynamic_state)
            .layout(vk::PipelineLayout::from_raw(info.layout.0))
            .render_pass(vk::RenderPass::from_raw(render_pass.0))
            .subpass(raster.subpass);

        let pipelines = unsafe {
            self.device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        }
        .map_err(|(_, e)| creation_error("graphics pipeline")(e))?;
        Ok(pipelines[0])
    }

    fn compute_pipeline(
        &self,
        info: &PipelineCreateInfo<'_>,
        stages: &[vk::PipelineShaderStageCreateInfo<'_>],
    ) -> Result<vk::Pipeline, GraphicsError> {
        let [stage] = stages else {
            return Err(GraphicsError::InvalidParameter(format!(
                "compute pipeline needs exactly one stage, got {}",
                stages.len()
            )));
        };
        let pipeline_info = vk::ComputePipelineCreateInfo::default()
            .stage(*stage)
            .layout(vk::PipelineLayout::from_raw(info.layout.0));
        let pipelines = unsafe {
            self.device
                .create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        }
        .map_err(|(_, e)| creation_error("compute pipeline")(e))?;
        Ok(pipelines[0])
    }
}

type DebugMessenger = (ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT);

fn destroy_instance(instance: &ash::Instance, debug: &Option<DebugMessenger>) {
    unsafe {
        if let Some((debug_utils, messenger)) = debug {
            debug_utils.destroy_debug_utils_messenger(*messenger, None);
        }
        instance.destroy_instance(None);
    }
}

fn unsupported<T>(feature: &str) -> Result<T, GraphicsError> {
    Err(GraphicsError::FeatureNotSupported(format!(
        "{feature} on the Vulkan device"
    )))
}

fn create_descriptor_pool(device: &ash::Device) -> Result<vk::DescriptorPool, GraphicsError> {
    let pool_sizes = [
        vk::DescriptorType::UNIFORM_BUFFER,
        vk::DescriptorType::STORAGE_BUFFER,
        vk::DescriptorType::SAMPLED_IMAGE,
        vk::DescriptorType::STORAGE_IMAGE,
        vk::DescriptorType::SAMPLER,
        vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
    ]
    .map(|ty| vk::DescriptorPoolSize {
        ty,
        descriptor_count: MAX_DESCRIPTOR_SETS,
    });
    let pool_info = vk::DescriptorPoolCreateInfo::default()
        .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
        .max_sets(MAX_DESCRIPTOR_SETS)
        .pool_sizes(&pool_sizes);
    unsafe { device.create_descriptor_pool(&pool_info, None) }
        .map_err(creation_error("descriptor pool"))
}

/// Memory type bits of representative resources, used for allocations made
/// before the resource they will hold exists.
fn probe_memory_type_bits(device: &ash::Device) -> Result<MemoryTypeBits, GraphicsError> {
    let buffer_info = vk::BufferCreateInfo::default()
        .size(256)
        .usage(convert_buffer_usage(crate::types::BufferUsage::all()))
        .sharing_mode(vk::SharingMode::EXCLUSIVE);
    let linear = unsafe {
        let buffer = device
            .create_buffer(&buffer_info, None)
            .map_err(creation_error("probe buffer"))?;
        let bits = device.get_buffer_memory_requirements(buffer).memory_type_bits;
        device.destroy_buffer(buffer, None);
        bits
    };

    let format = TextureFormat::Rgba8Unorm;
    let image_info = vk::ImageCreateInfo::default()
        .image_type(vk::ImageType::TYPE_2D)
        .format(convert_texture_format(format))
        .extent(vk::Extent3D {
            width: 1,
            height: 1,
            depth: 1,
        })
        .mip_levels(1)
        .array_layers(1)
        .samples(vk::SampleCountFlags::TYPE_1)
        .tiling(vk::ImageTiling::OPTIMAL)
        .usage(convert_texture_usage(
            TextureUsage::TEXTURE_BINDING | TextureUsage::RENDER_ATTACHMENT,
            format,
        ))
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(vk::ImageLayout::UNDEFINED);
    let optimal = unsafe {
        let image = device
            .create_image(&image_info, None)
            .map_err(creation_error("probe image"))?;
        let bits = device.get_image_memory_requirements(image).memory_type_bits;
        device.destroy_image(image, None);
        bits
    };

    Ok(MemoryTypeBits { linear, optimal })
}

fn memory_heaps(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Vec<MemoryHeap> {
    let properties = unsafe { instance.get_physical_device_memory_properties(physical_device) };
    let types = &properties.memory_types[..properties.memory_type_count as usize];
    properties.memory_heaps[..properties.memory_heap_count as usize]
        .iter()
        .enumerate()
        .map(|(index, heap)| MemoryHeap {
            size: heap.size,
            device_local: heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL),
            host_visible: types.iter().any(|ty| {
                ty.heap_index as usize == index
                    && ty
                        .property_flags
                        .contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
            }),
        })
        .collect()
}

fn attachment(
    desc: &AttachmentDescription,
    layout: vk::ImageLayout,
) -> vk::AttachmentDescription {
    let load_op = convert_load_op(desc.load_op);
    let initial_layout = if load_op == vk::AttachmentLoadOp::LOAD {
        layout
    } else {
        vk::ImageLayout::UNDEFINED
    };
    vk::AttachmentDescription::default()
        .format(convert_texture_format(desc.format))
        .samples(convert_sample_count(desc.sample_count))
        .load_op(load_op)
        .store_op(convert_store_op(desc.store_op))
        .stencil_load_op(load_op)
        .stencil_store_op(convert_store_op(desc.store_op))
        .initial_layout(initial_layout)
        .final_layout(layout)
}

impl Device for VulkanDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> DeviceCapabilities {
        DeviceCapabilities::default()
    }

    fn memory_heaps(&self) -> Vec<MemoryHeap> {
        self.heaps.clone()
    }

    fn accepts_shader_format(&self, format: ShaderFormat) -> bool {
        format == ShaderFormat::Spirv
    }

    fn create_memory(&self, desc: &MemoryDescriptor) -> Result<RawMemory, GraphicsError> {
        let location = match desc.location {
            MemoryLocation::GpuOnly => gpu_allocator::MemoryLocation::GpuOnly,
            MemoryLocation::CpuToGpu => gpu_allocator::MemoryLocation::CpuToGpu,
            MemoryLocation::GpuToCpu => gpu_allocator::MemoryLocation::GpuToCpu,
        };
        let requirements = vk::MemoryRequirements {
            size: desc.size,
            alignment: desc.alignment.max(1),
            memory_type_bits: if desc.linear {
                self.memory_type_bits.linear
            } else {
                self.memory_type_bits.optimal
            },
        };

        let allocation = {
            let mut allocator = self.allocator.lock();
            let allocator = allocator.as_mut().ok_or(GraphicsError::DeviceLost)?;
            allocator
                .allocate(&AllocationCreateDesc {
                    name: desc.label.as_str().unwrap_or("memory"),
                    requirements,
                    location,
                    linear: desc.linear,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(|e| match e {
                    gpu_allocator::AllocationError::OutOfMemory => GraphicsError::OutOfMemory,
                    e => GraphicsError::ResourceCreationFailed(format!(
                        "Failed to allocate memory: {e}"
                    )),
                })?
        };

        let id = self.next_memory.fetch_add(1, Ordering::Relaxed);
        self.objects.lock().memory.insert(id, allocation);
        Ok(RawMemory(id))
    }

    fn create_buffer(
        &self,
        desc: &BufferDescriptor,
        memory: RawMemory,
        offset: u64,
    ) -> Result<RawBuffer, GraphicsError> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(desc.size)
            .usage(convert_buffer_usage(desc.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { self.device.create_buffer(&buffer_info, None) }
            .map_err(creation_error("buffer"))?;

        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };
        let bound = self.bind_memory(memory, offset, &requirements, |memory, offset| unsafe {
            self.device.bind_buffer_memory(buffer, memory, offset)
        });
        if let Err(e) = bound {
            unsafe { self.device.destroy_buffer(buffer, None) };
            return Err(e);
        }
        Ok(RawBuffer(buffer.as_raw()))
    }

    fn create_image(
        &self,
        desc: &ImageDescriptor,
        memory: RawMemory,
        offset: u64,
    ) -> Result<RawImage, GraphicsError> {
        let image_type = if desc.size.depth > 1 {
            vk::ImageType::TYPE_3D
        } else {
            vk::ImageType::TYPE_2D
        };
        let image_info = vk::ImageCreateInfo::default()
            .image_type(image_type)
            .format(convert_texture_format(desc.format))
            .extent(vk::Extent3D {
                width: desc.size.width,
                height: desc.size.height,
                depth: desc.size.depth.max(1),
            })
            .mip_levels(desc.mip_level_count.max(1))
            .array_layers(desc.array_layer_count.max(1))
            .samples(convert_sample_count(desc.sample_count))
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(convert_texture_usage(desc.usage, desc.format))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = unsafe { self.device.create_image(&image_info, None) }
            .map_err(creation_error("image"))?;

        let requirements = unsafe { self.device.get_image_memory_requirements(image) };
        let view = self
            .bind_memory(memory, offset, &requirements, |memory, offset| unsafe {
                self.device.bind_image_memory(image, memory, offset)
            })
            .and_then(|()| self.create_view(image, desc));
        match view {
            Ok(view) => {
                self.objects.lock().image_views.insert(image.as_raw(), view);
                Ok(RawImage(image.as_raw()))
            }
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                Err(e)
            }
        }
    }

    fn create_sampler(&self, desc: &SamplerDescriptor) -> Result<RawSampler, GraphicsError> {
        let anisotropy = self.anisotropy && desc.anisotropy_clamp > 1;
        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(convert_filter_mode(desc.mag_filter))
            .min_filter(convert_filter_mode(desc.min_filter))
            .mipmap_mode(convert_mipmap_filter_mode(desc.mipmap_filter))
            .address_mode_u(convert_address_mode(desc.address_mode_u))
            .address_mode_v(convert_address_mode(desc.address_mode_v))
            .address_mode_w(convert_address_mode(desc.address_mode_w))
            .anisotropy_enable(anisotropy)
            .max_anisotropy(if anisotropy {
                desc.anisotropy_clamp as f32
            } else {
                1.0
            })
            .compare_enable(desc.compare.is_some())
            .compare_op(
                desc.compare
                    .map(convert_compare_function)
                    .unwrap_or(vk::CompareOp::ALWAYS),
            )
            .min_lod(desc.lod_min_clamp)
            .max_lod(desc.lod_max_clamp)
            .border_color(vk::BorderColor::FLOAT_TRANSPARENT_BLACK);
        unsafe { self.device.create_sampler(&sampler_info, None) }
            .map(|sampler| RawSampler(sampler.as_raw()))
            .map_err(creation_error("sampler"))
    }

    fn create_render_pass(
        &self,
        desc: &RenderPassDescriptor,
    ) -> Result<RawRenderPass, GraphicsError> {
        let mut attachments: Vec<_> = desc
            .color_attachments
            .iter()
            .map(|a| attachment(a, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL))
            .collect();
        let color_refs: Vec<_> = (0..attachments.len() as u32)
            .map(|index| vk::AttachmentReference {
                attachment: index,
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            })
            .collect();
        let depth_ref = desc.depth_stencil_attachment.as_ref().map(|depth| {
            attachments.push(attachment(
                depth,
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            ));
            vk::AttachmentReference {
                attachment: attachments.len() as u32 - 1,
                layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            }
        });

        let mut subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);
        if let Some(depth_ref) = &depth_ref {
            subpass = subpass.depth_stencil_attachment(depth_ref);
        }
        let subpasses = [subpass];

        let render_pass_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses);
        unsafe { self.device.create_render_pass(&render_pass_info, None) }
            .map(|pass| RawRenderPass(pass.as_raw()))
            .map_err(creation_error("render pass"))
    }

    fn create_framebuffer(
        &self,
        info: &FramebufferCreateInfo,
    ) -> Result<RawFramebuffer, GraphicsError> {
        let views = {
            let objects = self.objects.lock();
            info.attachments
                .iter()
                .map(|image| {
                    objects.image_views.get(&image.0).copied().ok_or_else(|| {
                        GraphicsError::InvalidParameter(format!("image #{} has no view", image.0))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?
        };
        let framebuffer_info = vk::FramebufferCreateInfo::default()
            .render_pass(vk::RenderPass::from_raw(info.render_pass.0))
            .attachments(&views)
            .width(info.width)
            .height(info.height)
            .layers(info.layers.max(1));
        unsafe { self.device.create_framebuffer(&framebuffer_info, None) }
            .map(|framebuffer| RawFramebuffer(framebuffer.as_raw()))
            .map_err(creation_error("framebuffer"))
    }

    fn create_descriptor_set_layout(
        &self,
        desc: &DescriptorSetLayoutDescriptor,
    ) -> Result<RawDescriptorSetLayout, GraphicsError> {
        let types = desc
            .entries
            .iter()
            .map(|entry| convert_binding_type(entry.binding_type).map(|ty| (entry.binding, ty)))
            .collect::<Result<Vec<_>, _>>()?;
        let bindings: Vec<_> = desc
            .entries
            .iter()
            .zip(&types)
            .map(|(entry, &(_, ty))| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(entry.binding)
                    .descriptor_type(ty)
                    .descriptor_count(entry.count)
                    .stage_flags(convert_shader_stage_flags(entry.visibility))
            })
            .collect();

        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        let layout = unsafe { self.device.create_descriptor_set_layout(&create_info, None) }
            .map_err(creation_error("descriptor set layout"))?;
        self.objects.lock().set_layouts.insert(layout.as_raw(), types);
        Ok(RawDescriptorSetLayout(layout.as_raw()))
    }

    fn create_pipeline_layout(
        &self,
        set_layouts: &[RawDescriptorSetLayout],
        push_constants: &[PushConstantRange],
    ) -> Result<RawPipelineLayout, GraphicsError> {
        let set_layouts: Vec<_> = set_layouts
            .iter()
            .map(|layout| vk::DescriptorSetLayout::from_raw(layout.0))
            .collect();
        let ranges: Vec<_> = push_constants
            .iter()
            .map(|range| vk::PushConstantRange {
                stage_flags: convert_shader_stage_flags(range.stages),
                offset: range.offset,
                size: range.size,
            })
            .collect();
        let create_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&ranges);
        unsafe { self.device.create_pipeline_layout(&create_info, None) }
            .map(|layout| RawPipelineLayout(layout.as_raw()))
            .map_err(creation_error("pipeline layout"))
    }

    fn create_shader_module(&self, spirv: &[u32]) -> Result<RawShaderModule, GraphicsError> {
        let create_info = vk::ShaderModuleCreateInfo::default().code(spirv);
        unsafe { self.device.create_shader_module(&create_info, None) }
            .map(|module| RawShaderModule(module.as_raw()))
            .map_err(|e| {
                GraphicsError::ShaderCompilationFailed(format!(
                    "Failed to create shader module: {e:?}"
                ))
            })
    }

    fn create_pipeline(&self, info: &PipelineCreateInfo<'_>) -> Result<RawPipeline, GraphicsError> {
        let entry_points = info
            .stages
            .iter()
            .map(|stage| CString::new(stage.entry_point.as_str()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| {
                GraphicsError::InvalidParameter(format!(
                    "Invalid entry point name (contains null byte): {e}"
                ))
            })?;
        let stages = info
            .stages
            .iter()
            .zip(&entry_points)
            .map(|(stage, entry_point)| -> Result<_, GraphicsError> {
                Ok(vk::PipelineShaderStageCreateInfo::default()
                    .stage(convert_shader_stage(stage.stage)?)
                    .module(vk::ShaderModule::from_raw(stage.module.0))
                    .name(entry_point))
            })
            .collect::<Result<Vec<_>, GraphicsError>>()?;

        let pipeline = match info.state {
            PipelineState::Graphics {
                vertex_layout,
                raster,
            } => self.graphics_pipeline(info, &stages, vertex_layout, raster)?,
            PipelineState::Compute => self.compute_pipeline(info, &stages)?,
            PipelineState::Mesh { .. } => return unsupported("mesh shading"),
            PipelineState::RayTracing { .. } => return unsupported("ray tracing"),
        };
        Ok(RawPipeline(pipeline.as_raw()))
    }

    fn create_descriptor_set(
        &self,
        layout: RawDescriptorSetLayout,
        writes: &[DescriptorWrite],
    ) -> Result<RawDescriptorSet, GraphicsError> {
        let infos = {
            let objects = self.objects.lock();
            let types = objects.set_layouts.get(&layout.0).ok_or_else(|| {
                GraphicsError::InvalidParameter(format!(
                    "descriptor set layout #{} is not alive",
                    layout.0
                ))
            })?;
            let view_of = |image: RawImage| {
                objects.image_views.get(&image.0).copied().ok_or_else(|| {
                    GraphicsError::InvalidParameter(format!("image #{} has no view", image.0))
                })
            };

            writes
                .iter()
                .map(|write| -> Result<_, GraphicsError> {
                    let ty = types
                        .iter()
                        .find(|(binding, _)| *binding == write.binding)
                        .map(|&(_, ty)| ty)
                        .ok_or_else(|| {
                            GraphicsError::InvalidParameter(format!(
                                "binding {} is not in the layout",
                                write.binding
                            ))
                        })?;
                    let image_layout = if ty == vk::DescriptorType::STORAGE_IMAGE {
                        vk::ImageLayout::GENERAL
                    } else {
                        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
                    };
                    let info = match write.resource {
                        RawBinding::Buffer {
                            buffer,
                            offset,
                            size,
                        } => DescriptorInfo::Buffer(vk::DescriptorBufferInfo {
                            buffer: vk::Buffer::from_raw(buffer.0),
                            offset,
                            range: size,
                        }),
                        RawBinding::Image(image) => DescriptorInfo::Image(
                            vk::DescriptorImageInfo::default()
                                .image_view(view_of(image)?)
                                .image_layout(image_layout),
                        ),
                        RawBinding::Sampler(sampler) => DescriptorInfo::Image(
                            vk::DescriptorImageInfo::default()
                                .sampler(vk::Sampler::from_raw(sampler.0)),
                        ),
                        RawBinding::CombinedImageSampler { image, sampler } => {
                            DescriptorInfo::Image(
                                vk::DescriptorImageInfo::default()
                                    .sampler(vk::Sampler::from_raw(sampler.0))
                                    .image_view(view_of(image)?)
                                    .image_layout(image_layout),
                            )
                        }
                        RawBinding::AccelerationStructure(_) => {
                            return unsupported("acceleration structure bindings")
                        }
                    };
                    Ok((write.binding, ty, info))
                })
                .collect::<Result<Vec<_>, GraphicsError>>()?
        };

        let set_layouts = [vk::DescriptorSetLayout::from_raw(layout.0)];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.descriptor_pool)
            .set_layouts(&set_layouts);
        let set = unsafe { self.device.allocate_descriptor_sets(&alloc_info) }
            .map_err(creation_error("descriptor set"))?[0];

        let vk_writes: Vec<_> = infos
            .iter()
            .map(|(binding, ty, info)| {
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(*binding)
                    .descriptor_type(*ty);
                match info {
                    DescriptorInfo::Buffer(info) => write.buffer_info(std::slice::from_ref(info)),
                    DescriptorInfo::Image(info) => write.image_info(std::slice::from_ref(info)),
                }
            })
            .collect();
        unsafe { self.device.update_descriptor_sets(&vk_writes, &[]) };

        Ok(RawDescriptorSet(set.as_raw()))
    }

    fn create_acceleration_structure(
        &self,
        _info: &AccelerationStructureInfo,
    ) -> Result<RawAccelerationStructure, GraphicsError> {
        unsupported("ray tracing")
    }

    fn create_shader_table(
        &self,
        _pipeline: RawPipeline,
        _desc: &ShaderTableDescriptor,
    ) -> Result<RawShaderTable, GraphicsError> {
        unsupported("ray tracing")
    }

    fn create_swapchain(&self, _desc: &SwapchainDescriptor) -> Result<RawSwapchain, GraphicsError> {
        unsupported("presentation")
    }

    fn destroy(&self, object: DeviceObject) {
        // SAFETY: every id was produced by this device and is destroyed once
        unsafe {
            match object {
                DeviceObject::Memory(RawMemory(id)) => {
                    let allocation = self.objects.lock().memory.remove(&id);
                    let mut allocator = self.allocator.lock();
                    match (allocation, allocator.as_mut()) {
                        (Some(allocation), Some(allocator)) => {
                            if let Err(e) = allocator.free(allocation) {
                                log::error!("Failed to free memory #{}: {}", id, e);
                            }
                        }
                        _ => log::error!("VulkanDevice: destroy of unknown memory #{}", id),
                    }
                }
                DeviceObject::Buffer(RawBuffer(id)) => {
                    self.device.destroy_buffer(vk::Buffer::from_raw(id), None)
                }
                DeviceObject::Image(RawImage(id)) => {
                    if let Some(view) = self.objects.lock().image_views.remove(&id) {
                        self.device.destroy_image_view(view, None);
                    }
                    self.device.destroy_image(vk::Image::from_raw(id), None);
                }
                DeviceObject::Sampler(RawSampler(id)) => {
                    self.device.destroy_sampler(vk::Sampler::from_raw(id), None)
                }
                DeviceObject::RenderPass(RawRenderPass(id)) => self
                    .device
                    .destroy_render_pass(vk::RenderPass::from_raw(id), None),
                DeviceObject::Framebuffer(RawFramebuffer(id)) => self
                    .device
                    .destroy_framebuffer(vk::Framebuffer::from_raw(id), None),
                DeviceObject::DescriptorSetLayout(RawDescriptorSetLayout(id)) => {
                    self.objects.lock().set_layouts.remove(&id);
                    self.device
                        .destroy_descriptor_set_layout(vk::DescriptorSetLayout::from_raw(id), None);
                }
                DeviceObject::PipelineLayout(RawPipelineLayout(id)) => self
                    .device
                    .destroy_pipeline_layout(vk::PipelineLayout::from_raw(id), None),
                DeviceObject::ShaderModule(RawShaderModule(id)) => self
                    .device
                    .destroy_shader_module(vk::ShaderModule::from_raw(id), None),
                DeviceObject::Pipeline(RawPipeline(id)) => {
                    self.device.destroy_pipeline(vk::Pipeline::from_raw(id), None)
                }
                DeviceObject::DescriptorSet(RawDescriptorSet(id)) => {
                    let sets = [vk::DescriptorSet::from_raw(id)];
                    if let Err(e) = self
                        .device
                        .free_descriptor_sets(self.descriptor_pool, &sets)
                    {
                        log::error!("Failed to free descriptor set: {:?}", e);
                    }
                }
                other => log::error!("VulkanDevice: destroy of unsupported {:?}", other),
            }
        }
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            let objects = std::mem::take(&mut *self.objects.lock());
            if !objects.memory.is_empty() || !objects.image_views.is_empty() {
                log::warn!(
                    "VulkanDevice dropped with {} memory object(s) and {} image(s) alive",
                    objects.memory.len(),
                    objects.image_views.len()
                );
            }
            for view in objects.image_views.into_values() {
                self.device.destroy_image_view(view, None);
            }
            if let Some(mut allocator) = self.allocator.lock().take() {
                for allocation in objects.memory.into_values() {
                    let _ = allocator.free(allocation);
                }
                // The allocator frees its blocks before the device goes.
                drop(allocator);
            }

            self.device
                .destroy_descriptor_pool(self.descriptor_pool, None);
            self.device.destroy_device(None);
        }
        destroy_instance(&self.instance, &self.debug);
    }
}

static_assertions::assert_impl_all!(VulkanDevice: Send, Sync);
