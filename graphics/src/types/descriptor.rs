//! Descriptor set layouts, pipeline layouts and descriptor sets.

use std::sync::atomic::{AtomicU64, Ordering};

use super::DebugLabel;
use crate::handles::{
    BufferHandle, DescriptorSetHandle, DescriptorSetLayoutHandle, ImageHandle, RtSceneHandle,
    SamplerHandle,
};

/// Type of resource that can be bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingType {
    /// Uniform buffer (read-only, small, frequently updated).
    UniformBuffer,
    /// Storage buffer (read-write, larger data).
    StorageBuffer,
    /// Sampled image.
    SampledImage,
    /// Storage image.
    StorageImage,
    /// Image sampler.
    Sampler,
    /// Combined image and sampler.
    CombinedImageSampler,
    /// Top-level acceleration structure.
    AccelerationStructure,
}

bitflags::bitflags! {
    /// Shader stages that can access a binding or push constant range.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderStageFlags: u32 {
        const VERTEX = 1 << 0;
        const FRAGMENT = 1 << 1;
        const COMPUTE = 1 << 2;
        const TASK = 1 << 3;
        const MESH = 1 << 4;
        const RAY_GEN = 1 << 5;
        const MISS = 1 << 6;
        const CLOSEST_HIT = 1 << 7;
        const ANY_HIT = 1 << 8;
        const INTERSECTION = 1 << 9;
        const CALLABLE = 1 << 10;
    }
}

/// Describes a single binding slot in a layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BindingLayoutEntry {
    /// Binding index within the set.
    pub binding: u32,
    /// Type of resource expected at this binding.
    pub binding_type: BindingType,
    /// Array size of the binding.
    pub count: u32,
    /// Shader stages that can access this binding.
    pub visibility: ShaderStageFlags,
}

impl BindingLayoutEntry {
    /// Create a new binding layout entry.
    pub fn new(binding: u32, binding_type: BindingType) -> Self {
        Self {
            binding,
            binding_type,
            count: 1,
            visibility: ShaderStageFlags::VERTEX | ShaderStageFlags::FRAGMENT,
        }
    }

    /// Set the shader stage visibility.
    pub fn with_visibility(mut self, visibility: ShaderStageFlags) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn with_count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }
}

/// Descriptor for creating a descriptor set layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct DescriptorSetLayoutDescriptor {
    pub label: DebugLabel,
    pub entries: Vec<BindingLayoutEntry>,
}

impl DescriptorSetLayoutDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label(mut self, label: impl Into<DebugLabel>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_entry(mut self, entry: BindingLayoutEntry) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn with_uniform_buffer(self, binding: u32) -> Self {
        self.with_entry(BindingLayoutEntry::new(binding, BindingType::UniformBuffer))
    }

    pub fn with_storage_buffer(self, binding: u32) -> Self {
        self.with_entry(BindingLayoutEntry::new(binding, BindingType::StorageBuffer))
    }

    pub fn with_sampled_image(self, binding: u32) -> Self {
        self.with_entry(BindingLayoutEntry::new(binding, BindingType::SampledImage))
    }

    pub fn with_sampler(self, binding: u32) -> Self {
        self.with_entry(BindingLayoutEntry::new(binding, BindingType::Sampler))
    }

    pub fn with_combined_image_sampler(self, binding: u32) -> Self {
        self.with_entry(BindingLayoutEntry::new(
            binding,
            BindingType::CombinedImageSampler,
        ))
    }

    pub fn entry(&self, binding: u32) -> Option<&BindingLayoutEntry> {
        self.entries.iter().find(|e| e.binding == binding)
    }
}

/// Push constant range of a pipeline layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PushConstantRange {
    pub stages: ShaderStageFlags,
    pub offset: u32,
    pub size: u32,
}

/// Descriptor for a pipeline layout: one set layout per set index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct PipelineLayoutDescriptor {
    pub label: DebugLabel,
    pub sets: Vec<DescriptorSetLayoutDescriptor>,
    pub push_constants: Vec<PushConstantRange>,
}

impl PipelineLayoutDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label(mut self, label: impl Into<DebugLabel>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_set(mut self, set: DescriptorSetLayoutDescriptor) -> Self {
        self.sets.push(set);
        self
    }

    pub fn with_push_constants(mut self, range: PushConstantRange) -> Self {
        self.push_constants.push(range);
        self
    }
}

/// Resource bound at one binding of a descriptor set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoundResource {
    Buffer {
        buffer: BufferHandle,
        offset: u64,
        size: u64,
    },
    Image(ImageHandle),
    Sampler(SamplerHandle),
    CombinedImageSampler {
        image: ImageHandle,
        sampler: SamplerHandle,
    },
    AccelerationStructure(RtSceneHandle),
}

impl BoundResource {
    /// Whether a binding of type `ty` accepts this resource.
    pub fn matches(&self, ty: BindingType) -> bool {
        matches!(
            (self, ty),
            (
                BoundResource::Buffer { .. },
                BindingType::UniformBuffer | BindingType::StorageBuffer
            ) | (
                BoundResource::Image(_),
                BindingType::SampledImage | BindingType::StorageImage
            ) | (BoundResource::Sampler(_), BindingType::Sampler)
                | (
                    BoundResource::CombinedImageSampler { .. },
                    BindingType::CombinedImageSampler
                )
                | (
                    BoundResource::AccelerationStructure(_),
                    BindingType::AccelerationStructure
                )
        )
    }
}

/// One binding of a descriptor set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorBinding {
    pub binding: u32,
    pub resource: BoundResource,
}

/// Handle of the cache entry a description resolved to last time.
///
/// Stored on the description so repeat requests skip hashing. Never part of
/// equality or hashing.
#[derive(Default)]
pub struct CachedSet(AtomicU64);

impl CachedSet {
    pub fn get(&self) -> DescriptorSetHandle {
        DescriptorSetHandle::from_bits(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, handle: DescriptorSetHandle) {
        self.0.store(handle.to_bits(), Ordering::Release);
    }

    pub fn clear(&self) {
        self.set(DescriptorSetHandle::INVALID);
    }
}

impl Clone for CachedSet {
    fn clone(&self) -> Self {
        Self(AtomicU64::new(self.0.load(Ordering::Acquire)))
    }
}

impl PartialEq for CachedSet {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl Eq for CachedSet {}

impl std::hash::Hash for CachedSet {
    fn hash<H: std::hash::Hasher>(&self, _state: &mut H) {}
}

impl std::fmt::Debug for CachedSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.get())
    }
}

/// Descriptor for a descriptor set: a layout plus the resources bound to it.
///
/// Bound resources are not kept alive by the set. A set referencing a
/// destroyed resource is reclaimed by validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DescriptorSetDescriptor {
    pub label: DebugLabel,
    pub layout: DescriptorSetLayoutHandle,
    pub bindings: Vec<DescriptorBinding>,
    pub cached: CachedSet,
}

impl DescriptorSetDescriptor {
    pub fn new(layout: DescriptorSetLayoutHandle) -> Self {
        Self {
            label: DebugLabel::none(),
            layout,
            bindings: Vec::new(),
            cached: CachedSet::default(),
        }
    }

    pub fn with_label(mut self, label: impl Into<DebugLabel>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_binding(mut self, binding: u32, resource: BoundResource) -> Self {
        self.bindings.push(DescriptorBinding { binding, resource });
        self.cached.clear();
        self
    }

    pub fn with_buffer(self, binding: u32, buffer: BufferHandle, offset: u64, size: u64) -> Self {
        self.with_binding(
            binding,
            BoundResource::Buffer {
                buffer,
                offset,
                size,
            },
        )
    }

    pub fn with_image(self, binding: u32, image: ImageHandle) -> Self {
        self.with_binding(binding, BoundResource::Image(image))
    }

    pub fn with_sampler(self, binding: u32, sampler: SamplerHandle) -> Self {
        self.with_binding(binding, BoundResource::Sampler(sampler))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_builder() {
        let layout = DescriptorSetLayoutDescriptor::new()
            .with_uniform_buffer(0)
            .with_combined_image_sampler(1);
        assert_eq!(layout.entries.len(), 2);
        assert_eq!(
            layout.entry(1).map(|e| e.binding_type),
            Some(BindingType::CombinedImageSampler)
        );
        assert!(layout.entry(2).is_none());
    }

    #[test]
    fn test_cached_handle_not_part_of_identity() {
        let layout = DescriptorSetLayoutHandle::new(0, 1);
        let a = DescriptorSetDescriptor::new(layout);
        let b = DescriptorSetDescriptor::new(layout);
        a.cached.set(DescriptorSetHandle::new(3, 1));

        assert_eq!(a, b);
        assert_eq!(a.clone().cached.get(), DescriptorSetHandle::new(3, 1));
        assert!(!b.cached.get().is_valid());
    }

    #[test]
    fn test_bound_resource_matches() {
        let buffer = BoundResource::Buffer {
            buffer: BufferHandle::new(0, 1),
            offset: 0,
            size: 64,
        };
        assert!(buffer.matches(BindingType::UniformBuffer));
        assert!(!buffer.matches(BindingType::Sampler));
        assert!(BoundResource::Sampler(SamplerHandle::new(0, 1)).matches(BindingType::Sampler));
    }
}
