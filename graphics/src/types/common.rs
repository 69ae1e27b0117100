//! Common types shared across resource descriptors.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

// ============================================================================
// DebugLabel
// ============================================================================

/// Debug name attached to a resource description.
///
/// Labels never take part in equality or hashing: two descriptions that only
/// differ by label describe the same cached resource, which keeps the label
/// of the first request.
#[derive(Clone, Default)]
pub struct DebugLabel(Option<Arc<str>>);

impl DebugLabel {
    pub fn new(label: impl Into<Arc<str>>) -> Self {
        Self(Some(label.into()))
    }

    pub fn none() -> Self {
        Self(None)
    }

    pub fn as_str(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

impl PartialEq for DebugLabel {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl Eq for DebugLabel {}

impl Hash for DebugLabel {
    fn hash<H: Hasher>(&self, _state: &mut H) {}
}

impl fmt::Debug for DebugLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(label) => write!(f, "{label:?}"),
            None => f.write_str("None"),
        }
    }
}

impl fmt::Display for DebugLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(label) => write!(f, "'{label}'"),
            None => f.write_str("<unnamed>"),
        }
    }
}

impl From<&str> for DebugLabel {
    fn from(label: &str) -> Self {
        Self::new(label)
    }
}

impl From<String> for DebugLabel {
    fn from(label: String) -> Self {
        Self::new(label)
    }
}

// ============================================================================
// Extent3d
// ============================================================================

/// 3D extent for images and framebuffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Extent3d {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Depth in pixels (1 for 2D images).
    pub depth: u32,
}

impl Default for Extent3d {
    fn default() -> Self {
        Self::new_2d(1, 1)
    }
}

impl Extent3d {
    /// Create a new 2D extent.
    pub fn new_2d(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            depth: 1,
        }
    }

    /// Create a new 3D extent.
    pub fn new_3d(width: u32, height: u32, depth: u32) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.depth == 0
    }
}

/// Comparison function for depth tests and comparison samplers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareFunction {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of<T: Hash>(value: &T) -> u64 {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_labels_do_not_affect_identity() {
        let a = DebugLabel::new("shadow");
        let b = DebugLabel::none();
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
        assert_eq!(a.as_str(), Some("shadow"));
        assert_eq!(a.to_string(), "'shadow'");
        assert_eq!(b.to_string(), "<unnamed>");
    }

    #[test]
    fn test_extent() {
        assert!(!Extent3d::new_2d(4, 4).is_empty());
        assert!(Extent3d::new_3d(4, 4, 0).is_empty());
        assert_eq!(Extent3d::new_2d(8, 2).depth, 1);
    }
}
