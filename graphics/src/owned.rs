//! Scoped ownership of manager resources.

use std::fmt;
use std::sync::Arc;

use keel_core::Handle;

use crate::manager::{ManagedKind, ResourceManager};

/// One reference on a resource, given back when dropped.
///
/// # Example
///
/// ```ignore
/// let sampler = Owned::new(&manager, manager.create_sampler(&SamplerDescriptor::linear()));
/// let raw = sampler.get().map(|s| s.raw);
/// // released here
/// ```
#[must_use = "dropping an Owned releases its resource immediately"]
pub struct Owned<K: ManagedKind> {
    manager: Arc<ResourceManager>,
    handle: Handle<K>,
}

impl<K: ManagedKind> Owned<K> {
    /// Adopt the reference a `create_*` call returned.
    ///
    /// An invalid handle is adopted as well; dropping it does nothing.
    pub fn new(manager: &Arc<ResourceManager>, handle: Handle<K>) -> Self {
        Self {
            manager: Arc::clone(manager),
            handle,
        }
    }

    pub fn handle(&self) -> Handle<K> {
        self.handle
    }

    pub fn manager(&self) -> &Arc<ResourceManager> {
        &self.manager
    }

    pub fn is_valid(&self) -> bool {
        self.manager.is_valid(self.handle)
    }

    pub fn get(&self) -> Option<K::Resource> {
        self.manager.get(self.handle)
    }

    /// Give up ownership without releasing. The caller now owes the release.
    pub fn into_handle(mut self) -> Handle<K> {
        std::mem::replace(&mut self.handle, Handle::INVALID)
    }

    /// Take another reference on the same resource.
    pub fn try_clone(&self) -> Option<Self> {
        self.manager
            .add_ref(self.handle)
            .then(|| Self::new(&self.manager, self.handle))
    }
}

impl<K: ManagedKind> Drop for Owned<K> {
    fn drop(&mut self) {
        if self.handle.is_valid() {
            self.manager.release(self.handle);
        }
    }
}

impl<K: ManagedKind> fmt::Debug for Owned<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Owned").field(&self.handle).finish()
    }
}

impl ResourceManager {
    /// Wrap a handle in an [`Owned`]. Returns `None` for an invalid handle,
    /// so `manager.own(manager.create_*(..))` propagates creation failures.
    pub fn own<K: ManagedKind>(self: &Arc<Self>, handle: Handle<K>) -> Option<Owned<K>> {
        handle.is_valid().then(|| Owned::new(self, handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ManagerConfig;
    use crate::device::DummyDevice;
    use crate::handles::SamplerKind;
    use crate::shader::CompilerRegistry;
    use crate::types::SamplerDescriptor;

    fn manager() -> Arc<ResourceManager> {
        ResourceManager::new(
            Arc::new(DummyDevice::new()),
            CompilerRegistry::new(),
            ManagerConfig::default(),
        )
    }

    #[test]
    fn test_drop_releases() {
        let manager = manager();
        let handle = manager.create_sampler(&SamplerDescriptor::linear());
        {
            let owned = manager.own(handle).unwrap();
            assert_eq!(manager.ref_count(owned.handle()), Some(2));
        }
        // Only the cache's own reference is left.
        assert_eq!(manager.ref_count(handle), Some(1));
    }

    #[test]
    fn test_try_clone_and_into_handle() {
        let manager = manager();
        let owned: Owned<SamplerKind> =
            Owned::new(&manager, manager.create_sampler(&SamplerDescriptor::nearest()));
        let clone = owned.try_clone().unwrap();
        assert_eq!(manager.ref_count(owned.handle()), Some(3));

        drop(clone);
        let handle = owned.into_handle();
        assert_eq!(manager.ref_count(handle), Some(2));
        assert!(manager.release(handle));
        assert_eq!(manager.tear_down(), 0);
    }

    #[test]
    fn test_invalid_handle_is_not_owned() {
        let manager = manager();
        assert!(manager.own(Handle::<SamplerKind>::INVALID).is_none());
        let owned = Owned::new(&manager, Handle::<SamplerKind>::INVALID);
        assert!(!owned.is_valid());
        assert!(owned.try_clone().is_none());
    }
}
