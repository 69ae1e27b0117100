//! Generation-checked, kind-tagged handles.
//!
//! A [`Handle<K>`] names a slot in a [`Pool`](crate::pool::Pool) by index and
//! carries the generation the slot had when the handle was issued. Every time
//! a slot is recycled its generation is bumped, so a handle kept past the
//! release of its resource stops resolving instead of aliasing the new
//! occupant.
//!
//! The kind parameter `K` is a zero-sized tag. Handles of different kinds are
//! different types, so an image handle cannot be passed where a buffer handle
//! is expected.
//!
//! ```
//! use keel_core::handle::{Handle, ResourceKind};
//!
//! enum Texture {}
//! impl ResourceKind for Texture {
//!     const NAME: &'static str = "texture";
//! }
//!
//! let h = Handle::<Texture>::new(7, 3);
//! assert_eq!(Handle::<Texture>::from_bits(h.to_bits()), h);
//! assert!(!Handle::<Texture>::INVALID.is_valid());
//! ```

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// Compile-time tag for a resource kind.
pub trait ResourceKind: 'static {
    /// Human readable kind name, used in diagnostics.
    const NAME: &'static str;
}

/// Typed reference to a pooled resource.
pub struct Handle<K: ResourceKind> {
    index: u32,
    generation: u32,
    _kind: PhantomData<fn() -> K>,
}

impl<K: ResourceKind> Handle<K> {
    /// Handle that never resolves.
    pub const INVALID: Self = Self {
        index: u32::MAX,
        generation: 0,
        _kind: PhantomData,
    };

    /// Create a handle from raw parts.
    pub const fn new(index: u32, generation: u32) -> Self {
        Self {
            index,
            generation,
            _kind: PhantomData,
        }
    }

    #[inline]
    pub const fn index(self) -> u32 {
        self.index
    }

    #[inline]
    pub const fn generation(self) -> u32 {
        self.generation
    }

    /// Whether this handle is not the invalid sentinel.
    ///
    /// This does not check liveness; ask the owning pool for that.
    #[inline]
    pub const fn is_valid(self) -> bool {
        self.generation != 0 && self.index != u32::MAX
    }

    /// Pack into a single `u64` (generation in the high half).
    #[inline]
    pub const fn to_bits(self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }

    /// Inverse of [`to_bits`](Self::to_bits).
    #[inline]
    pub const fn from_bits(bits: u64) -> Self {
        Self::new(bits as u32, (bits >> 32) as u32)
    }

    /// Reinterpret as a handle of another kind.
    ///
    /// Only for containers that store several kinds in one pool.
    pub const fn cast<L: ResourceKind>(self) -> Handle<L> {
        Handle::new(self.index, self.generation)
    }
}

impl<K: ResourceKind> Clone for Handle<K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K: ResourceKind> Copy for Handle<K> {}

impl<K: ResourceKind> PartialEq for Handle<K> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<K: ResourceKind> Eq for Handle<K> {}

impl<K: ResourceKind> Hash for Handle<K> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.to_bits().hash(state);
    }
}

impl<K: ResourceKind> Default for Handle<K> {
    fn default() -> Self {
        Self::INVALID
    }
}

impl<K: ResourceKind> fmt::Debug for Handle<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "{}({}v{})", K::NAME, self.index, self.generation)
        } else {
            write!(f, "{}(invalid)", K::NAME)
        }
    }
}

static_assertions::assert_eq_size!(Handle<Untyped>, u64);
static_assertions::assert_impl_all!(Handle<Untyped>: Send, Sync, Copy);

/// Kind tag for handles whose kind is not known statically.
#[derive(Debug)]
pub enum Untyped {}

impl ResourceKind for Untyped {
    const NAME: &'static str = "untyped";
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    enum Image {}
    impl ResourceKind for Image {
        const NAME: &'static str = "image";
    }

    #[test]
    fn test_invalid_handle() {
        let h = Handle::<Image>::INVALID;
        assert!(!h.is_valid());
        assert_eq!(Handle::<Image>::default(), h);
        assert_eq!(format!("{h:?}"), "image(invalid)");
    }

    #[test]
    fn test_bits_roundtrip() {
        let h = Handle::<Image>::new(0x1234, 0xABCD);
        assert_eq!(h.to_bits(), 0x0000_ABCD_0000_1234);
        assert_eq!(Handle::<Image>::from_bits(h.to_bits()), h);
    }

    #[test]
    fn test_generation_distinguishes_handles() {
        let a = Handle::<Image>::new(4, 1);
        let b = Handle::<Image>::new(4, 2);
        assert_ne!(a, b);

        let set: HashSet<_> = [a, b, a].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_debug_format() {
        assert_eq!(format!("{:?}", Handle::<Image>::new(3, 9)), "image(3v9)");
    }
}
