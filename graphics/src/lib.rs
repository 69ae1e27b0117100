//! # Keel Graphics
//!
//! GPU resource manager: every image, buffer, sampler, pipeline and
//! descriptor set an application uses is created, deduplicated and destroyed
//! through one [`ResourceManager`].
//!
//! ## Overview
//!
//! This crate provides:
//! - [`ResourceManager`] - pools and caches for every resource kind, behind
//!   typed generation-checked handles
//! - [`Owned`] - releases its handle when dropped
//! - [`shader`] - program compilation through external compilers, built-in
//!   WGSL/GLSL lowering and a shared module cache
//! - [`staging`] - size-classed staging buffers under a memory ceiling
//! - [`device`] - the [`Device`] seam with a bookkeeping [`DummyDevice`] and a
//!   headless Vulkan device (`vulkan-backend` feature)
//!
//! ## Example
//!
//! ```ignore
//! use keel_graphics::{
//!     CompilerRegistry, DummyDevice, ManagerConfig, ResourceManager, SamplerDescriptor,
//! };
//!
//! let manager = ResourceManager::new(
//!     Arc::new(DummyDevice::new()),
//!     CompilerRegistry::new(),
//!     ManagerConfig::default(),
//! );
//! let sampler = manager.own(manager.create_sampler(&SamplerDescriptor::linear()));
//! ```

pub mod config;
pub mod device;
pub mod diagnostics;
pub mod error;
pub mod handles;
pub mod manager;
pub mod owned;
pub mod shader;
pub mod staging;
pub mod types;

// Re-export main types for convenience
pub use config::{ManagerConfig, StagingBlockSizes};
pub use device::{Device, DeviceCapabilities, DummyDevice, ObjectKind};
#[cfg(feature = "vulkan-backend")]
pub use device::VulkanDevice;
pub use diagnostics::{Diagnostic, DiagnosticSink, LogSink, RecordingSink};
pub use error::GraphicsError;
pub use handles::*;
pub use keel_core::{Handle, ResourceKind};
pub use manager::{ManagedKind, ManagerStats, ResourceManager};
pub use owned::Owned;
pub use shader::{
    CompilerRegistry, PipelineCompiler, ShaderCode, ShaderFormat, ShaderProgram, ShaderStage,
};
pub use staging::{StagingBlock, StagingClass, StagingIndex, StagingStats};
pub use types::{
    BufferDescriptor, BufferUsage, DescriptorSetDescriptor, DescriptorSetLayoutDescriptor,
    Extent3d, ImageDescriptor, MemoryDescriptor, MemoryLocation, PipelineLayoutDescriptor,
    RenderPassDescriptor, SamplerDescriptor, TextureFormat, TextureUsage,
};

/// Graphics library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_dummy_device() {
        let device = DummyDevice::new();
        assert_eq!(device.name(), "dummy");
    }
}
