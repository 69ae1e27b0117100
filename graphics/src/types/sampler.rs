//! Sampler types and descriptors.

use std::hash::{Hash, Hasher};

use super::{CompareFunction, DebugLabel};

/// Texture filtering mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilterMode {
    #[default]
    Nearest,
    Linear,
}

/// Texture addressing outside `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AddressMode {
    #[default]
    ClampToEdge,
    Repeat,
    MirrorRepeat,
    ClampToBorder,
}

/// Descriptor for creating a sampler.
///
/// LOD clamps compare by bit pattern, so `-0.0` and `0.0` describe different
/// samplers.
#[derive(Debug, Clone)]
pub struct SamplerDescriptor {
    /// Debug label for the sampler.
    pub label: DebugLabel,
    /// Address mode for U coordinate.
    pub address_mode_u: AddressMode,
    /// Address mode for V coordinate.
    pub address_mode_v: AddressMode,
    /// Address mode for W coordinate.
    pub address_mode_w: AddressMode,
    /// Magnification filter.
    pub mag_filter: FilterMode,
    /// Minification filter.
    pub min_filter: FilterMode,
    /// Mipmap filter.
    pub mipmap_filter: FilterMode,
    /// Minimum LOD clamp.
    pub lod_min_clamp: f32,
    /// Maximum LOD clamp.
    pub lod_max_clamp: f32,
    /// Comparison function for depth sampling.
    pub compare: Option<CompareFunction>,
    /// Maximum anisotropy level.
    pub anisotropy_clamp: u16,
}

impl SamplerDescriptor {
    /// Create a new sampler descriptor with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a linear filtering sampler.
    pub fn linear() -> Self {
        Self {
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            mipmap_filter: FilterMode::Linear,
            ..Default::default()
        }
    }

    /// Create a nearest neighbor filtering sampler.
    pub fn nearest() -> Self {
        Self {
            mag_filter: FilterMode::Nearest,
            min_filter: FilterMode::Nearest,
            mipmap_filter: FilterMode::Nearest,
            ..Default::default()
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<DebugLabel>) -> Self {
        self.label = label.into();
        self
    }

    /// Set address mode for all coordinates.
    pub fn with_address_mode(mut self, mode: AddressMode) -> Self {
        self.address_mode_u = mode;
        self.address_mode_v = mode;
        self.address_mode_w = mode;
        self
    }

    /// Set comparison function for depth sampling.
    pub fn with_compare(mut self, compare: CompareFunction) -> Self {
        self.compare = Some(compare);
        self
    }

    /// Set anisotropic filtering level.
    pub fn with_anisotropy(mut self, level: u16) -> Self {
        self.anisotropy_clamp = level.max(1);
        self
    }

    fn identity(&self) -> impl PartialEq + Hash {
        (
            self.address_mode_u,
            self.address_mode_v,
            self.address_mode_w,
            self.mag_filter,
            self.min_filter,
            self.mipmap_filter,
            self.lod_min_clamp.to_bits(),
            self.lod_max_clamp.to_bits(),
            self.compare,
            self.anisotropy_clamp,
        )
    }
}

impl Default for SamplerDescriptor {
    fn default() -> Self {
        Self {
            label: DebugLabel::none(),
            address_mode_u: AddressMode::ClampToEdge,
            address_mode_v: AddressMode::ClampToEdge,
            address_mode_w: AddressMode::ClampToEdge,
            mag_filter: FilterMode::Nearest,
            min_filter: FilterMode::Nearest,
            mipmap_filter: FilterMode::Nearest,
            lod_min_clamp: 0.0,
            lod_max_clamp: 32.0,
            compare: None,
            anisotropy_clamp: 1,
        }
    }
}

impl PartialEq for SamplerDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for SamplerDescriptor {}

impl Hash for SamplerDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sampler_identity_ignores_label() {
        let a = SamplerDescriptor::linear()
            .with_address_mode(AddressMode::Repeat)
            .with_label("a");
        let b = SamplerDescriptor::linear()
            .with_address_mode(AddressMode::Repeat)
            .with_label("b");
        assert_eq!(a, b);
    }

    #[test]
    fn test_sampler_identity_covers_every_field() {
        let base = SamplerDescriptor::linear();
        assert_ne!(base, base.clone().with_anisotropy(16));
        assert_ne!(base, base.clone().with_compare(CompareFunction::Less));
        let mut lod = base.clone();
        lod.lod_max_clamp = 4.0;
        assert_ne!(base, lod);
    }
}
