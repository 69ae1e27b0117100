//! Image formats, usages and descriptors.

use bitflags::bitflags;

use super::{DebugLabel, Extent3d, MemoryDescriptor, MemoryLocation};

/// Image format enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum TextureFormat {
    // 8-bit formats
    R8Unorm,
    R8Uint,

    // 16-bit formats
    R16Float,
    Rg8Unorm,

    // 32-bit formats
    R32Float,
    R32Uint,
    Rg16Float,
    #[default]
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,

    // 64-bit formats
    Rgba16Float,
    Rg32Float,

    // 128-bit formats
    Rgba32Float,

    // Depth/stencil formats
    Depth16Unorm,
    Depth24PlusStencil8,
    Depth32Float,
    Depth32FloatStencil8,
}

impl TextureFormat {
    /// Returns true if this is a depth or stencil format.
    pub fn is_depth_stencil(&self) -> bool {
        matches!(
            self,
            Self::Depth16Unorm
                | Self::Depth24PlusStencil8
                | Self::Depth32Float
                | Self::Depth32FloatStencil8
        )
    }

    /// Returns true if this format has a stencil component.
    pub fn has_stencil(&self) -> bool {
        matches!(self, Self::Depth24PlusStencil8 | Self::Depth32FloatStencil8)
    }

    /// Returns the size in bytes per pixel.
    pub fn block_size(&self) -> u32 {
        match self {
            Self::R8Unorm | Self::R8Uint => 1,
            Self::R16Float | Self::Rg8Unorm | Self::Depth16Unorm => 2,
            Self::R32Float
            | Self::R32Uint
            | Self::Rg16Float
            | Self::Rgba8Unorm
            | Self::Rgba8UnormSrgb
            | Self::Bgra8Unorm
            | Self::Bgra8UnormSrgb
            | Self::Depth24PlusStencil8
            | Self::Depth32Float => 4,
            Self::Rgba16Float | Self::Rg32Float | Self::Depth32FloatStencil8 => 8,
            Self::Rgba32Float => 16,
        }
    }
}

bitflags! {
    /// Usage flags for images.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        /// Image can be copied from.
        const COPY_SRC = 1 << 0;
        /// Image can be copied to.
        const COPY_DST = 1 << 1;
        /// Image can be sampled in a shader.
        const TEXTURE_BINDING = 1 << 2;
        /// Image can be used as a storage image.
        const STORAGE_BINDING = 1 << 3;
        /// Image can be used as a render attachment.
        const RENDER_ATTACHMENT = 1 << 4;
    }
}

impl Default for TextureUsage {
    fn default() -> Self {
        Self::empty()
    }
}

/// Descriptor for creating an image.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageDescriptor {
    pub label: DebugLabel,
    pub size: Extent3d,
    pub mip_level_count: u32,
    pub array_layer_count: u32,
    pub sample_count: u32,
    pub format: TextureFormat,
    pub usage: TextureUsage,
}

impl ImageDescriptor {
    /// Create a new 2D image descriptor.
    pub fn new_2d(width: u32, height: u32, format: TextureFormat, usage: TextureUsage) -> Self {
        Self {
            label: DebugLabel::none(),
            size: Extent3d::new_2d(width, height),
            mip_level_count: 1,
            array_layer_count: 1,
            sample_count: 1,
            format,
            usage,
        }
    }

    pub fn with_label(mut self, label: impl Into<DebugLabel>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_mip_levels(mut self, count: u32) -> Self {
        self.mip_level_count = count;
        self
    }

    pub fn with_sample_count(mut self, count: u32) -> Self {
        self.sample_count = count;
        self
    }

    /// Tightly packed size of every mip level and layer.
    pub fn byte_size(&self) -> u64 {
        let texel = self.format.block_size() as u64;
        let mut total = 0u64;
        for mip in 0..self.mip_level_count.max(1) {
            let w = (self.size.width >> mip).max(1) as u64;
            let h = (self.size.height >> mip).max(1) as u64;
            let d = (self.size.depth >> mip).max(1) as u64;
            total += w * h * d * texel;
        }
        total * self.array_layer_count.max(1) as u64 * self.sample_count.max(1) as u64
    }

    /// Memory description large enough for this image.
    pub fn memory(&self, location: MemoryLocation) -> MemoryDescriptor {
        MemoryDescriptor::new(self.byte_size(), location)
            .with_label(self.label.clone())
            .with_alignment(4096)
            .optimal()
    }
}

impl Default for ImageDescriptor {
    fn default() -> Self {
        Self::new_2d(1, 1, TextureFormat::default(), TextureUsage::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_properties() {
        assert!(TextureFormat::Depth32Float.is_depth_stencil());
        assert!(!TextureFormat::Depth32Float.has_stencil());
        assert!(TextureFormat::Depth24PlusStencil8.has_stencil());
        assert_eq!(TextureFormat::Rgba16Float.block_size(), 8);
    }

    #[test]
    fn test_byte_size_with_mips() {
        let desc = ImageDescriptor::new_2d(4, 4, TextureFormat::R8Unorm, TextureUsage::COPY_DST)
            .with_mip_levels(3);
        // 16 + 4 + 1
        assert_eq!(desc.byte_size(), 21);
        assert!(!desc.memory(MemoryLocation::GpuOnly).linear);
    }
}
