//! Content-addressed, reference-counted caches.
//!
//! A [`Cache`] is a [`Pool`] whose entries are indexed by their full
//! construction description. Requesting an equal description twice returns
//! the same handle; the lookup compares whole keys, so two descriptions that
//! merely hash alike are never merged.
//!
//! # Reference model
//!
//! Every entry carries exactly one *cache-owned* reference for as long as it
//! is indexed, plus one *use* reference per external owner:
//!
//! - [`Cache::find_or_add`] on a miss creates the cache-owned slot and then
//!   acquires a use for the caller; on a hit it only acquires a use.
//! - [`Cache::release_use`] gives a use back. The entry stays cached when the
//!   last use is dropped and is reclaimed later by
//!   [`Cache::garbage_collect`].
//!
//! A sweep may also remove entries that are still in use, e.g. because
//! something they refer to died. Their owners' handles are remembered as
//! *evicted* until every outstanding use is given back through
//! [`Cache::release_evicted`].
//!
//! ```
//! use keel_core::cache::{Cache, GcCursor};
//! use keel_core::handle::ResourceKind;
//!
//! enum Sampler {}
//! impl ResourceKind for Sampler {
//!     const NAME: &'static str = "sampler";
//! }
//!
//! let mut cache = Cache::<Sampler, &str, u64>::new();
//! let a = cache.find_or_add("linear", |_| Ok::<_, ()>(1)).unwrap();
//! let b = cache.find_or_add("linear", |_| Ok::<_, ()>(2)).unwrap();
//! assert_eq!(a.handle, b.handle);
//! assert!(b.existed);
//! assert_eq!(cache.external_refs(a.handle), Some(2));
//!
//! cache.release_use(a.handle);
//! cache.release_use(b.handle);
//!
//! let mut cursor = GcCursor::default();
//! let reclaimed = cache.garbage_collect(&mut cursor, 16, |e| e.is_cache_only());
//! assert_eq!(reclaimed, vec![1]);
//! ```

use std::collections::hash_map::RandomState;
use std::collections::HashMap;
use std::fmt;
use std::hash::{BuildHasher, Hash};

use crate::handle::{Handle, ResourceKind};
use crate::pool::{Pool, PoolError, Release};

/// Reference count of an entry that only the cache itself holds.
pub const CACHE_OWNED_REFS: u32 = 1;

/// Errors returned by [`Cache::find_or_add`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheError<E> {
    /// No slot could be allocated.
    Pool(PoolError),
    /// The constructor failed. The reserved slot was rolled back.
    Construct(E),
}

impl<E: fmt::Display> fmt::Display for CacheError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Pool(e) => write!(f, "{e}"),
            CacheError::Construct(e) => write!(f, "{e}"),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for CacheError<E> {}

impl<E> From<PoolError> for CacheError<E> {
    fn from(e: PoolError) -> Self {
        CacheError::Pool(e)
    }
}

/// Result of a successful [`Cache::find_or_add`].
pub struct Lookup<K: ResourceKind> {
    pub handle: Handle<K>,
    /// Whether the entry was already cached.
    pub existed: bool,
}

impl<K: ResourceKind> Clone for Lookup<K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K: ResourceKind> Copy for Lookup<K> {}

impl<K: ResourceKind> PartialEq for Lookup<K> {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle && self.existed == other.existed
    }
}

impl<K: ResourceKind> Eq for Lookup<K> {}

impl<K: ResourceKind> fmt::Debug for Lookup<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lookup")
            .field("handle", &self.handle)
            .field("existed", &self.existed)
            .finish()
    }
}

/// Resumable position of a garbage-collection sweep.
///
/// Held by the caller and passed to every [`Cache::garbage_collect`] call, so
/// one long sweep can be spread over many short calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcCursor {
    next: u32,
    passes: u64,
}

impl GcCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index the next sweep step inspects.
    pub fn position(&self) -> u32 {
        self.next
    }

    /// Number of times the sweep wrapped around the end of the cache.
    pub fn completed_passes(&self) -> u64 {
        self.passes
    }
}

/// View of a cache entry handed to garbage-collection predicates.
pub struct EntryInfo<'a, K: ResourceKind, D, T> {
    pub handle: Handle<K>,
    pub key: &'a D,
    pub value: &'a T,
    pub ref_count: u32,
    /// Submission index the entry was last requested at.
    pub last_used: u64,
}

impl<K: ResourceKind, D, T> EntryInfo<'_, K, D, T> {
    /// Number of references held outside the cache.
    pub fn external_refs(&self) -> u32 {
        self.ref_count.saturating_sub(CACHE_OWNED_REFS)
    }

    /// Whether only the cache keeps this entry alive.
    pub fn is_cache_only(&self) -> bool {
        self.ref_count <= CACHE_OWNED_REFS
    }
}

struct Entry<D, T> {
    key: D,
    value: T,
    last_used: u64,
}

/// A [`Pool`] with content-addressed deduplication.
pub struct Cache<K: ResourceKind, D, T, S = RandomState> {
    pool: Pool<K, Entry<D, T>>,
    index: HashMap<D, u32, S>,
    /// Uses still outstanding on entries swept while in use.
    evicted: HashMap<Handle<K>, u32>,
    submission: u64,
}

impl<K, D, T> Cache<K, D, T, RandomState>
where
    K: ResourceKind,
    D: Hash + Eq + Clone,
{
    pub fn new() -> Self {
        Self::with_hasher(RandomState::new())
    }
}

impl<K, D, T> Default for Cache<K, D, T, RandomState>
where
    K: ResourceKind,
    D: Hash + Eq + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, D, T, S> Cache<K, D, T, S>
where
    K: ResourceKind,
    D: Hash + Eq + Clone,
    S: BuildHasher,
{
    pub fn with_hasher(hasher: S) -> Self {
        Self {
            pool: Pool::new(),
            index: HashMap::with_hasher(hasher),
            evicted: HashMap::new(),
            submission: 0,
        }
    }

    /// Limit the number of slots the cache may grow to.
    pub fn with_max_slots(mut self, max_slots: u32) -> Self {
        self.pool = Pool::with_max_slots(max_slots);
        self
    }

    /// Set the submission index stamped on entries requested or released
    /// from now on.
    pub fn set_submission(&mut self, submission: u64) {
        self.submission = submission;
    }

    /// Return the entry for `key`, constructing it on a miss.
    ///
    /// The caller receives one use reference either way. A failing
    /// constructor leaves the cache exactly as it was.
    pub fn find_or_add<E>(
        &mut self,
        key: D,
        construct: impl FnOnce(&D) -> Result<T, E>,
    ) -> Result<Lookup<K>, CacheError<E>> {
        if let Some(handle) = self.find(&key) {
            self.acquire_use(handle);
            return Ok(Lookup {
                handle,
                existed: true,
            });
        }

        let index = self.pool.allocate()?;
        let value = match construct(&key) {
            Ok(value) => value,
            Err(e) => {
                self.pool.cancel(index);
                return Err(CacheError::Construct(e));
            }
        };
        let handle = self.create_cache_owned(index, key, value);
        self.acquire_use(handle);
        Ok(Lookup {
            handle,
            existed: false,
        })
    }

    /// Publish a constructed entry holding only the cache-owned reference.
    fn create_cache_owned(&mut self, index: u32, key: D, value: T) -> Handle<K> {
        self.index.insert(key.clone(), index);
        self.pool.construct(
            index,
            Entry {
                key,
                value,
                last_used: self.submission,
            },
        )
    }

    /// Whether `handle` names an entry that was swept while still in use and
    /// has uses outstanding.
    pub fn is_evicted(&self, handle: Handle<K>) -> bool {
        self.evicted.contains_key(&handle)
    }

    /// Give back a use on an evicted entry. Returns `false` if `handle` is
    /// not evicted.
    pub fn release_evicted(&mut self, handle: Handle<K>) -> bool {
        let Some(remaining) = self.evicted.get_mut(&handle) else {
            return false;
        };
        *remaining -= 1;
        if *remaining == 0 {
            self.evicted.remove(&handle);
        }
        true
    }

    /// Number of evicted entries with uses outstanding.
    pub fn evicted_len(&self) -> usize {
        self.evicted.len()
    }

    /// Look up an entry without touching its reference count.
    pub fn find(&self, key: &D) -> Option<Handle<K>> {
        self.index
            .get(key)
            .and_then(|&index| self.pool.handle_at(index))
    }

    /// Add a use reference to a live entry. Returns `false` for a stale handle.
    pub fn acquire_use(&mut self, handle: Handle<K>) -> bool {
        let submission = self.submission;
        match self.pool.get_mut(handle) {
            Some(entry) => entry.last_used = entry.last_used.max(submission),
            None => return false,
        }
        self.pool.add_ref(handle)
    }

    /// Drop a use reference.
    ///
    /// Dropping the last use leaves the cache-owned reference in place, so the
    /// entry is normally reported as [`Release::Retained`] with one remaining
    /// reference. [`Release::Freed`] only happens for an over-released entry,
    /// which is then unindexed.
    ///
    /// The entry counts as used at the current submission, so age-based
    /// collection measures from its last release.
    pub fn release_use(&mut self, handle: Handle<K>) -> Release<T> {
        let submission = self.submission;
        if let Some(entry) = self.pool.get_mut(handle) {
            entry.last_used = entry.last_used.max(submission);
        }
        match self.pool.release(handle) {
            Release::Stale => Release::Stale,
            Release::Retained { remaining } => Release::Retained { remaining },
            Release::Freed(entry) => {
                log::error!(
                    "{} cache: entry {:?} released past its cache-owned reference",
                    K::NAME,
                    handle
                );
                debug_assert!(false, "{} cache: refcount underflow", K::NAME);
                self.index.remove(&entry.key);
                Release::Freed(entry.value)
            }
        }
    }

    pub fn get(&self, handle: Handle<K>) -> Option<&T> {
        self.pool.get(handle).map(|e| &e.value)
    }

    pub fn get_mut(&mut self, handle: Handle<K>) -> Option<&mut T> {
        self.pool.get_mut(handle).map(|e| &mut e.value)
    }

    pub fn key(&self, handle: Handle<K>) -> Option<&D> {
        self.pool.get(handle).map(|e| &e.key)
    }

    /// Bounds-checked lookup by raw index.
    pub fn slot(&self, index: u32) -> Option<&T> {
        self.pool.slot(index).map(|e| &e.value)
    }

    pub fn is_valid(&self, handle: Handle<K>) -> bool {
        self.pool.is_valid(handle)
    }

    pub fn ref_count(&self, handle: Handle<K>) -> Option<u32> {
        self.pool.ref_count(handle)
    }

    /// Number of references held outside the cache.
    pub fn external_refs(&self, handle: Handle<K>) -> Option<u32> {
        self.ref_count(handle)
            .map(|count| count.saturating_sub(CACHE_OWNED_REFS))
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.pool.capacity()
    }

    /// Release unused trailing storage. See [`Pool::trim`].
    pub fn trim(&mut self) -> usize {
        let released = self.pool.trim();
        if released > 0 {
            self.index.shrink_to_fit();
        }
        released
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle<K>, &D, &T)> + '_ {
        self.pool.iter().map(|(h, e)| (h, &e.key, &e.value))
    }

    /// Inspect at most `max_iterations` slots starting at `cursor`, removing
    /// every live entry for which `predicate` holds.
    ///
    /// Removed values are returned for teardown against the device. The
    /// cursor wraps around at the end of the cache, so repeated calls
    /// eventually visit every entry. Removed entries that still had uses are
    /// remembered as evicted.
    pub fn garbage_collect(
        &mut self,
        cursor: &mut GcCursor,
        max_iterations: usize,
        mut predicate: impl FnMut(EntryInfo<'_, K, D, T>) -> bool,
    ) -> Vec<T> {
        let mut removed = Vec::new();
        let bound = self.pool.index_bound();
        if bound == 0 {
            return removed;
        }
        if cursor.next >= bound {
            cursor.next = 0;
        }

        for _ in 0..max_iterations.min(bound as usize) {
            let index = cursor.next;
            cursor.next += 1;
            if cursor.next >= bound {
                cursor.next = 0;
                cursor.passes += 1;
            }

            let Some(handle) = self.pool.handle_at(index) else {
                continue;
            };
            let (collect, uses) = match (self.pool.get(handle), self.pool.ref_count(handle)) {
                (Some(entry), Some(ref_count)) => {
                    let info = EntryInfo {
                        handle,
                        key: &entry.key,
                        value: &entry.value,
                        ref_count,
                        last_used: entry.last_used,
                    };
                    let uses = info.external_refs();
                    (predicate(info), uses)
                }
                _ => (false, 0),
            };
            if collect {
                if let Some(entry) = self.pool.force_remove(index) {
                    self.index.remove(&entry.key);
                    removed.push(entry.value);
                    if uses > 0 {
                        self.evicted.insert(handle, uses);
                    }
                }
            }
        }

        if !removed.is_empty() {
            log::trace!("{} cache: collected {} entries", K::NAME, removed.len());
        }
        removed
    }

    /// Tear down every entry regardless of its reference count.
    ///
    /// Entries still used outside the cache are reported as leaks. `visitor`
    /// receives every removed value together with its external reference
    /// count. Returns the number of leaked entries.
    pub fn clear_ignore_leaks(&mut self, mut visitor: impl FnMut(&D, T, u32)) -> usize {
        let mut leaks = 0;
        for handle in self.pool.handles() {
            let external = self.external_refs(handle).unwrap_or(0);
            let Some(entry) = self.pool.force_remove(handle.index()) else {
                continue;
            };
            if external > 0 {
                leaks += 1;
                log::warn!(
                    "{} cache: leaked entry {:?} with {} external reference(s)",
                    K::NAME,
                    handle,
                    external
                );
            }
            visitor(&entry.key, entry.value, external);
        }
        self.index.clear();
        if !self.evicted.is_empty() {
            log::debug!(
                "{} cache: dropping {} evicted handle(s) still held",
                K::NAME,
                self.evicted.len()
            );
            self.evicted.clear();
        }
        leaks
    }
}

impl<K: ResourceKind, D, T, S> fmt::Debug for Cache<K, D, T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("kind", &K::NAME)
            .field("entries", &self.pool.len())
            .field("indexed", &self.index.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::hash::{BuildHasherDefault, Hasher};

    enum Layout {}
    impl ResourceKind for Layout {
        const NAME: &'static str = "layout";
    }

    type LayoutCache = Cache<Layout, String, u32>;

    /// Hashes every key to the same value.
    #[derive(Default)]
    struct ConstantHasher;

    impl Hasher for ConstantHasher {
        fn finish(&self) -> u64 {
            42
        }
        fn write(&mut self, _bytes: &[u8]) {}
    }

    fn ok(v: u32) -> impl FnOnce(&String) -> Result<u32, &'static str> {
        move |_| Ok(v)
    }

    #[test]
    fn test_equal_keys_share_entry() {
        let mut cache = LayoutCache::new();
        let a = cache.find_or_add("set0".into(), ok(1)).unwrap();
        let b = cache.find_or_add("set0".into(), ok(2)).unwrap();

        assert!(!a.existed);
        assert!(b.existed);
        assert_eq!(a.handle, b.handle);
        assert_eq!(cache.get(a.handle), Some(&1));
        assert_eq!(cache.ref_count(a.handle), Some(CACHE_OWNED_REFS + 2));
        assert_eq!(cache.external_refs(a.handle), Some(2));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_colliding_keys_are_not_merged() {
        let mut cache =
            Cache::<Layout, String, u32, _>::with_hasher(BuildHasherDefault::<ConstantHasher>::default());
        let a = cache.find_or_add("a".into(), ok(1)).unwrap();
        let b = cache.find_or_add("b".into(), ok(2)).unwrap();

        assert_ne!(a.handle, b.handle);
        assert!(!b.existed);
        assert_eq!(cache.get(a.handle), Some(&1));
        assert_eq!(cache.get(b.handle), Some(&2));
        assert_eq!(cache.find(&"b".to_string()), Some(b.handle));
    }

    #[test]
    fn test_construct_failure_rolls_back() {
        let mut cache = LayoutCache::new();
        let err = cache
            .find_or_add("bad".into(), |_| Err::<u32, _>("rejected"))
            .unwrap_err();
        assert_eq!(err, CacheError::Construct("rejected"));
        assert!(cache.is_empty());
        assert!(cache.find(&"bad".to_string()).is_none());

        // The rolled back slot is reused.
        let h = cache.find_or_add("good".into(), ok(3)).unwrap().handle;
        assert_eq!(h.index(), 0);
    }

    #[test]
    fn test_last_use_keeps_entry_cached() {
        let mut cache = LayoutCache::new();
        let h = cache.find_or_add("x".into(), ok(7)).unwrap().handle;

        assert_eq!(cache.release_use(h), Release::Retained { remaining: 1 });
        assert!(cache.is_valid(h));
        assert_eq!(cache.external_refs(h), Some(0));

        // A new request revives the same entry.
        let again = cache.find_or_add("x".into(), ok(8)).unwrap();
        assert!(again.existed);
        assert_eq!(again.handle, h);
    }

    #[test]
    fn test_garbage_collect_cache_only() {
        let mut cache = LayoutCache::new();
        let used = cache.find_or_add("used".into(), ok(1)).unwrap().handle;
        let idle = cache.find_or_add("idle".into(), ok(2)).unwrap().handle;
        cache.release_use(idle);

        let mut cursor = GcCursor::new();
        let collected = cache.garbage_collect(&mut cursor, 16, |e| e.is_cache_only());

        assert_eq!(collected, vec![2]);
        assert!(cache.is_valid(used));
        assert!(!cache.is_valid(idle));
        assert!(cache.find(&"idle".to_string()).is_none());
    }

    #[test]
    fn test_garbage_collect_is_bounded_and_resumable() {
        let mut cache = LayoutCache::new();
        let handles: Vec<_> = (0..10)
            .map(|i| cache.find_or_add(format!("k{i}"), ok(i)).unwrap().handle)
            .collect();
        for h in &handles {
            cache.release_use(*h);
        }

        let mut cursor = GcCursor::new();
        let first = cache.garbage_collect(&mut cursor, 4, |e| e.is_cache_only());
        assert_eq!(first, vec![0, 1, 2, 3]);
        assert_eq!(cursor.position(), 4);
        assert_eq!(cache.len(), 6);

        let second = cache.garbage_collect(&mut cursor, 4, |e| e.is_cache_only());
        assert_eq!(second, vec![4, 5, 6, 7]);

        let third = cache.garbage_collect(&mut cursor, 4, |e| e.is_cache_only());
        assert_eq!(third, vec![8, 9]);
        assert_eq!(cursor.completed_passes(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_garbage_collect_predicate_sees_last_used() {
        let mut cache = LayoutCache::new();
        cache.set_submission(3);
        let old = cache.find_or_add("old".into(), ok(1)).unwrap().handle;
        cache.release_use(old);
        cache.set_submission(10);
        let recent = cache.find_or_add("recent".into(), ok(2)).unwrap().handle;
        cache.release_use(recent);

        let mut cursor = GcCursor::new();
        let collected = cache.garbage_collect(&mut cursor, 16, |e| {
            e.is_cache_only() && 10 - e.last_used >= 5
        });
        assert_eq!(collected, vec![1]);
        assert!(cache.is_valid(recent));
    }

    #[test]
    fn test_release_stamps_last_used() {
        let mut cache = LayoutCache::new();
        let h = cache.find_or_add("held".into(), ok(1)).unwrap().handle;
        cache.set_submission(8);
        cache.release_use(h);

        let mut last_used = None;
        let mut cursor = GcCursor::new();
        cache.garbage_collect(&mut cursor, 16, |e| {
            last_used = Some(e.last_used);
            false
        });
        assert_eq!(last_used, Some(8));
    }

    #[test]
    fn test_swept_entry_in_use_is_evicted() {
        let mut cache = LayoutCache::new();
        let h = cache.find_or_add("set".into(), ok(1)).unwrap().handle;
        assert!(cache.acquire_use(h));

        let mut cursor = GcCursor::new();
        assert_eq!(cache.garbage_collect(&mut cursor, 16, |_| true), vec![1]);
        assert!(!cache.is_valid(h));
        assert!(cache.is_evicted(h));
        assert!(cache.release_use(h).is_stale());

        // Two uses were outstanding.
        assert!(cache.release_evicted(h));
        assert!(cache.is_evicted(h));
        assert!(cache.release_evicted(h));
        assert!(!cache.is_evicted(h));
        assert!(!cache.release_evicted(h));
        assert_eq!(cache.evicted_len(), 0);
    }

    #[test]
    fn test_clear_ignore_leaks_reports_external_refs() {
        let mut cache = LayoutCache::new();
        let leaked = cache.find_or_add("leaked".into(), ok(1)).unwrap().handle;
        let idle = cache.find_or_add("idle".into(), ok(2)).unwrap().handle;
        cache.release_use(idle);

        let mut torn_down = Vec::new();
        let leaks = cache.clear_ignore_leaks(|_, value, external| torn_down.push((value, external)));

        assert_eq!(leaks, 1);
        torn_down.sort();
        assert_eq!(torn_down, vec![(1, 1), (2, 0)]);
        assert!(cache.is_empty());
        assert!(!cache.is_valid(leaked));
    }

    #[test]
    fn test_stale_release_is_noop() {
        let mut cache = LayoutCache::new();
        let h = cache.find_or_add("a".into(), ok(1)).unwrap().handle;
        cache.release_use(h);
        let mut cursor = GcCursor::new();
        cache.garbage_collect(&mut cursor, 8, |_| true);

        let fresh = cache.find_or_add("b".into(), ok(2)).unwrap().handle;
        assert_eq!(fresh.index(), h.index());
        assert!(cache.release_use(h).is_stale());
        assert!(!cache.acquire_use(h));
        assert_eq!(cache.external_refs(fresh), Some(1));
    }
}
