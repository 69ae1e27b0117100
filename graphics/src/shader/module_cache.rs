//! Fingerprint-keyed cache of native shader modules.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use keel_core::{Cache, GcCursor, Release};
use parking_lot::Mutex;

use crate::device::{Device, DeviceObject, RawShaderModule};
use crate::error::GraphicsError;
use crate::handles::{ShaderModuleHandle, ShaderModuleKind};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// SPIR-V binary identified by its FNV-1a fingerprint.
///
/// Hashing only feeds the fingerprint; equality also compares the words, so
/// colliding fingerprints never share a module.
#[derive(Debug, Clone)]
pub struct SpirvKey {
    fingerprint: u64,
    words: Arc<[u32]>,
}

impl SpirvKey {
    pub fn new(words: Arc<[u32]>) -> Self {
        Self {
            fingerprint: fingerprint(&words),
            words,
        }
    }

    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }
}

impl PartialEq for SpirvKey {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint == other.fingerprint && self.words == other.words
    }
}

impl Eq for SpirvKey {}

impl Hash for SpirvKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.fingerprint);
    }
}

fn fingerprint(words: &[u32]) -> u64 {
    words
        .iter()
        .flat_map(|w| w.to_le_bytes())
        .fold(FNV_OFFSET, |hash, byte| {
            (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
        })
}

/// A native shader module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderModuleResource {
    pub raw: RawShaderModule,
    pub word_count: usize,
}

struct Inner {
    cache: Cache<ShaderModuleKind, SpirvKey, ShaderModuleResource>,
    cursor: GcCursor,
}

/// Shader module cache with its own lock, so slow compilation never holds
/// the manager's resource tables.
pub struct ShaderModuleCache {
    inner: Mutex<Inner>,
}

impl ShaderModuleCache {
    pub fn new(max_slots: u32) -> Self {
        Self {
            inner: Mutex::new(Inner {
                cache: Cache::new().with_max_slots(max_slots),
                cursor: GcCursor::new(),
            }),
        }
    }

    /// Find or create the module for `words` and acquire one use of it.
    pub fn register(
        &self,
        device: &dyn Device,
        words: Arc<[u32]>,
    ) -> Result<ShaderModuleHandle, GraphicsError> {
        let mut inner = self.inner.lock();
        let lookup = inner.cache.find_or_add(SpirvKey::new(words), |key| {
            device
                .create_shader_module(key.words())
                .map(|raw| ShaderModuleResource {
                    raw,
                    word_count: key.words().len(),
                })
        })?;
        if !lookup.existed {
            log::trace!(
                "Created shader module {:?} ({} words)",
                lookup.handle,
                inner.cache.get(lookup.handle).map_or(0, |m| m.word_count)
            );
        }
        Ok(lookup.handle)
    }

    /// Acquire a use of a live module. Returns `false` for a stale handle.
    pub fn acquire_use(&self, handle: ShaderModuleHandle) -> bool {
        self.inner.lock().cache.acquire_use(handle)
    }

    /// Give back one use. Returns `false` for a stale handle.
    pub fn release_use(&self, device: &dyn Device, handle: ShaderModuleHandle) -> bool {
        match self.inner.lock().cache.release_use(handle) {
            Release::Stale => false,
            Release::Retained { .. } => true,
            Release::Freed(module) => {
                device.destroy(DeviceObject::ShaderModule(module.raw));
                true
            }
        }
    }

    pub fn get(&self, handle: ShaderModuleHandle) -> Option<ShaderModuleResource> {
        self.inner.lock().cache.get(handle).copied()
    }

    pub fn is_valid(&self, handle: ShaderModuleHandle) -> bool {
        self.inner.lock().cache.is_valid(handle)
    }

    pub fn ref_count(&self, handle: ShaderModuleHandle) -> Option<u32> {
        self.inner.lock().cache.ref_count(handle)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn set_submission(&self, submission: u64) {
        self.inner.lock().cache.set_submission(submission);
    }

    /// Destroy up to `max_iterations` slots worth of modules nothing uses.
    pub fn collect_unused(&self, device: &dyn Device, max_iterations: usize) -> usize {
        let mut inner = self.inner.lock();
        let Inner { cache, cursor } = &mut *inner;
        let removed = cache.garbage_collect(cursor, max_iterations, |e| e.is_cache_only());
        for module in &removed {
            device.destroy(DeviceObject::ShaderModule(module.raw));
        }
        cache.trim();
        removed.len()
    }

    /// Destroy every module. Returns the number still in use.
    pub fn clear(&self, device: &dyn Device) -> usize {
        self.inner.lock().cache.clear_ignore_leaks(|_, module, _| {
            device.destroy(DeviceObject::ShaderModule(module.raw));
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DummyDevice, ObjectKind};

    const MAGIC: u32 = 0x0723_0203;

    fn words(tag: u32) -> Arc<[u32]> {
        Arc::from(vec![MAGIC, 0x0001_0300, tag])
    }

    #[test]
    fn test_identical_binaries_share_module() {
        let device = DummyDevice::new();
        let cache = ShaderModuleCache::new(1024);

        let a = cache.register(&device, words(1)).unwrap();
        let b = cache.register(&device, words(1)).unwrap();
        let c = cache.register(&device, words(2)).unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(device.live_count(ObjectKind::ShaderModule), 2);
        assert_eq!(cache.ref_count(a), Some(3));
    }

    #[test]
    fn test_collect_unused() {
        let device = DummyDevice::new();
        let cache = ShaderModuleCache::new(1024);
        let a = cache.register(&device, words(1)).unwrap();
        let b = cache.register(&device, words(2)).unwrap();

        assert!(cache.release_use(&device, a));
        assert_eq!(cache.collect_unused(&device, 16), 1);
        assert!(!cache.is_valid(a));
        assert!(cache.is_valid(b));
        assert!(!cache.release_use(&device, a));

        assert_eq!(cache.clear(&device), 1);
        assert_eq!(device.live_count(ObjectKind::ShaderModule), 0);
    }

    #[test]
    fn test_rejected_binary_leaves_cache_empty() {
        let device = DummyDevice::new();
        let cache = ShaderModuleCache::new(1024);
        let result = cache.register(&device, Arc::from(vec![1u32, 2, 3]));
        assert!(result.is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_fingerprint_differs_by_content() {
        let a = SpirvKey::new(words(1));
        let b = SpirvKey::new(words(2));
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a, SpirvKey::new(words(1)));
    }
}
