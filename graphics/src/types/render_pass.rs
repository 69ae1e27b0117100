//! Render pass and framebuffer descriptors.

use super::{DebugLabel, TextureFormat};
use crate::handles::{ImageHandle, RenderPassHandle};

/// What happens to an attachment at the start of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LoadOp {
    Load,
    #[default]
    Clear,
    DontCare,
}

/// What happens to an attachment at the end of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StoreOp {
    #[default]
    Store,
    DontCare,
}

/// Format and operations of one render pass attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttachmentDescription {
    pub format: TextureFormat,
    pub sample_count: u32,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
}

impl AttachmentDescription {
    pub fn new(format: TextureFormat) -> Self {
        Self {
            format,
            sample_count: 1,
            load_op: LoadOp::Clear,
            store_op: StoreOp::Store,
        }
    }

    pub fn with_ops(mut self, load_op: LoadOp, store_op: StoreOp) -> Self {
        self.load_op = load_op;
        self.store_op = store_op;
        self
    }
}

/// Descriptor for creating a render pass.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct RenderPassDescriptor {
    pub label: DebugLabel,
    pub color_attachments: Vec<AttachmentDescription>,
    pub depth_stencil_attachment: Option<AttachmentDescription>,
}

impl RenderPassDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label(mut self, label: impl Into<DebugLabel>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_color(mut self, attachment: AttachmentDescription) -> Self {
        self.color_attachments.push(attachment);
        self
    }

    pub fn with_depth_stencil(mut self, attachment: AttachmentDescription) -> Self {
        self.depth_stencil_attachment = Some(attachment);
        self
    }

    /// Number of attachments a compatible framebuffer must provide.
    pub fn attachment_count(&self) -> usize {
        self.color_attachments.len() + usize::from(self.depth_stencil_attachment.is_some())
    }
}

/// Descriptor for creating a framebuffer.
///
/// Attachments are listed color first, then depth/stencil, matching the
/// render pass. The framebuffer keeps its render pass alive but not its
/// attachments; a framebuffer whose attachment was destroyed is reclaimed by
/// validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FramebufferDescriptor {
    pub label: DebugLabel,
    pub render_pass: RenderPassHandle,
    pub attachments: Vec<ImageHandle>,
    pub width: u32,
    pub height: u32,
    pub layers: u32,
}

impl FramebufferDescriptor {
    pub fn new(render_pass: RenderPassHandle, width: u32, height: u32) -> Self {
        Self {
            label: DebugLabel::none(),
            render_pass,
            attachments: Vec::new(),
            width,
            height,
            layers: 1,
        }
    }

    pub fn with_label(mut self, label: impl Into<DebugLabel>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_attachment(mut self, image: ImageHandle) -> Self {
        self.attachments.push(image);
        self
    }
}
