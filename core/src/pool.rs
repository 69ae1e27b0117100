//! Chunked, reference-counted slot storage.
//!
//! [`Pool`] hands out [`Handle`]s to values stored in fixed-size chunks. Chunks
//! are never reallocated once created, so growing the pool never moves an
//! existing value and an issued index stays meaningful for the lifetime of the
//! pool.
//!
//! Each slot carries a reference count and a generation. Construction leaves
//! the count at one; [`Pool::release`] hands the value back once the count
//! drains to zero and bumps the slot generation, which invalidates every
//! outstanding handle to it.
//!
//! Construction is split into [`Pool::allocate`] and [`Pool::construct`] so a
//! caller can reserve an index, build the value (which may fail), and either
//! publish it or [`Pool::cancel`] the reservation.
//!
//! ```
//! use keel_core::handle::ResourceKind;
//! use keel_core::pool::{Pool, Release};
//!
//! enum Buffer {}
//! impl ResourceKind for Buffer {
//!     const NAME: &'static str = "buffer";
//! }
//!
//! let mut pool = Pool::<Buffer, &str>::new();
//! let h = pool.insert("vertices").unwrap();
//! assert!(pool.add_ref(h));
//!
//! assert_eq!(pool.release(h), Release::Retained { remaining: 1 });
//! assert_eq!(pool.release(h), Release::Freed("vertices"));
//!
//! // The handle is stale now.
//! assert_eq!(pool.release(h), Release::Stale);
//! assert!(pool.get(h).is_none());
//! ```

use std::fmt;

use crate::handle::{Handle, ResourceKind};

/// log2 of the number of slots per chunk.
pub const CHUNK_BITS: u32 = 8;
/// Number of slots per chunk.
pub const CHUNK_SIZE: usize = 1 << CHUNK_BITS;

const CHUNK_MASK: u32 = (CHUNK_SIZE as u32) - 1;

/// Errors returned by [`Pool`] operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The pool reached its slot limit.
    Exhausted { kind: &'static str, max_slots: u32 },
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::Exhausted { kind, max_slots } => {
                write!(f, "{kind} pool exhausted ({max_slots} slots)")
            }
        }
    }
}

impl std::error::Error for PoolError {}

/// Outcome of [`Pool::release`].
#[derive(Debug, PartialEq, Eq)]
pub enum Release<T> {
    /// The handle did not name a live slot. Nothing changed.
    Stale,
    /// The count was decremented and other owners remain.
    Retained { remaining: u32 },
    /// The last reference was dropped. The value is handed back for teardown.
    Freed(T),
}

impl<T> Release<T> {
    pub fn is_stale(&self) -> bool {
        matches!(self, Release::Stale)
    }

    /// The value, if this release destroyed it.
    pub fn freed(self) -> Option<T> {
        match self {
            Release::Freed(value) => Some(value),
            _ => None,
        }
    }
}

struct Slot<T> {
    value: Option<T>,
    ref_count: u32,
    generation: u32,
    reserved: bool,
}

impl<T> Slot<T> {
    fn vacant(generation: u32) -> Self {
        Self {
            value: None,
            ref_count: 0,
            generation,
            reserved: false,
        }
    }

    fn is_free(&self) -> bool {
        self.value.is_none() && !self.reserved
    }
}

fn next_generation(generation: u32) -> u32 {
    match generation.wrapping_add(1) {
        0 => 1,
        g => g,
    }
}

/// Reference-counted storage for values of one resource kind.
pub struct Pool<K: ResourceKind, T> {
    chunks: Vec<Box<[Slot<T>]>>,
    free: Vec<u32>,
    /// Number of slots ever handed out from the backed chunks.
    high_water: u32,
    live: usize,
    max_slots: u32,
    /// Lowest generation a re-grown slot may start from after a trim.
    generation_floor: u32,
    _kind: std::marker::PhantomData<fn() -> K>,
}

impl<K: ResourceKind, T> Default for Pool<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: ResourceKind, T> Pool<K, T> {
    /// Create an empty pool limited only by the index space.
    pub fn new() -> Self {
        Self::with_max_slots(u32::MAX - 1)
    }

    /// Create an empty pool that refuses to grow past `max_slots` slots.
    pub fn with_max_slots(max_slots: u32) -> Self {
        Self {
            chunks: Vec::new(),
            free: Vec::new(),
            high_water: 0,
            live: 0,
            max_slots: max_slots.min(u32::MAX - 1),
            generation_floor: 0,
            _kind: std::marker::PhantomData,
        }
    }

    fn slot_ref(&self, index: u32) -> Option<&Slot<T>> {
        self.chunks
            .get((index >> CHUNK_BITS) as usize)
            .map(|chunk| &chunk[(index & CHUNK_MASK) as usize])
    }

    fn slot_mut(&mut self, index: u32) -> Option<&mut Slot<T>> {
        self.chunks
            .get_mut((index >> CHUNK_BITS) as usize)
            .map(|chunk| &mut chunk[(index & CHUNK_MASK) as usize])
    }

    fn live_slot(&self, handle: Handle<K>) -> Option<&Slot<T>> {
        self.slot_ref(handle.index())
            .filter(|s| s.value.is_some() && s.generation == handle.generation())
    }

    fn live_slot_mut(&mut self, handle: Handle<K>) -> Option<&mut Slot<T>> {
        self.slot_mut(handle.index())
            .filter(|s| s.value.is_some() && s.generation == handle.generation())
    }

    /// Reserve a slot. The slot holds nothing until [`construct`](Self::construct).
    pub fn allocate(&mut self) -> Result<u32, PoolError> {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                if self.high_water >= self.max_slots {
                    return Err(PoolError::Exhausted {
                        kind: K::NAME,
                        max_slots: self.max_slots,
                    });
                }
                if self.high_water as usize == self.chunks.len() * CHUNK_SIZE {
                    let generation = next_generation(self.generation_floor);
                    let chunk = (0..CHUNK_SIZE)
                        .map(|_| Slot::vacant(generation))
                        .collect::<Vec<_>>()
                        .into_boxed_slice();
                    self.chunks.push(chunk);
                }
                let index = self.high_water;
                self.high_water += 1;
                index
            }
        };

        if let Some(slot) = self.slot_mut(index) {
            debug_assert!(slot.is_free(), "allocated slot {index} is occupied");
            slot.reserved = true;
        }
        Ok(index)
    }

    /// Publish a value into a slot reserved by [`allocate`](Self::allocate).
    ///
    /// The value starts with a reference count of one.
    pub fn construct(&mut self, index: u32, value: T) -> Handle<K> {
        let Some(slot) = self.slot_mut(index) else {
            log::error!("{} pool: construct on unbacked slot {}", K::NAME, index);
            return Handle::INVALID;
        };
        debug_assert!(slot.reserved, "construct on unreserved slot {index}");
        slot.reserved = false;
        slot.value = Some(value);
        slot.ref_count = 1;
        let generation = slot.generation;
        self.live += 1;
        Handle::new(index, generation)
    }

    /// Abandon a reservation made by [`allocate`](Self::allocate).
    pub fn cancel(&mut self, index: u32) {
        if let Some(slot) = self.slot_mut(index) {
            if slot.reserved {
                slot.reserved = false;
                self.free.push(index);
            }
        }
    }

    /// Allocate and construct in one step.
    pub fn insert(&mut self, value: T) -> Result<Handle<K>, PoolError> {
        let index = self.allocate()?;
        Ok(self.construct(index, value))
    }

    pub fn get(&self, handle: Handle<K>) -> Option<&T> {
        self.live_slot(handle).and_then(|s| s.value.as_ref())
    }

    pub fn get_mut(&mut self, handle: Handle<K>) -> Option<&mut T> {
        self.live_slot_mut(handle).and_then(|s| s.value.as_mut())
    }

    /// Bounds-checked lookup by raw index, ignoring generations.
    pub fn slot(&self, index: u32) -> Option<&T> {
        self.slot_ref(index).and_then(|s| s.value.as_ref())
    }

    /// Current handle for a live raw index.
    pub fn handle_at(&self, index: u32) -> Option<Handle<K>> {
        self.slot_ref(index)
            .filter(|s| s.value.is_some())
            .map(|s| Handle::new(index, s.generation))
    }

    pub fn is_valid(&self, handle: Handle<K>) -> bool {
        self.live_slot(handle).is_some()
    }

    pub fn ref_count(&self, handle: Handle<K>) -> Option<u32> {
        self.live_slot(handle).map(|s| s.ref_count)
    }

    /// Add a reference. Returns `false` for a stale handle.
    pub fn add_ref(&mut self, handle: Handle<K>) -> bool {
        match self.live_slot_mut(handle) {
            Some(slot) => {
                slot.ref_count += 1;
                true
            }
            None => false,
        }
    }

    /// Drop a reference.
    ///
    /// A stale handle is reported as [`Release::Stale`] and never touches the
    /// slot's current occupant.
    pub fn release(&mut self, handle: Handle<K>) -> Release<T> {
        let Some(slot) = self.live_slot_mut(handle) else {
            return Release::Stale;
        };
        if slot.ref_count > 1 {
            slot.ref_count -= 1;
            return Release::Retained {
                remaining: slot.ref_count,
            };
        }
        match self.vacate(handle.index()) {
            Some(value) => Release::Freed(value),
            None => Release::Stale,
        }
    }

    /// Remove a live value regardless of its reference count.
    pub fn force_remove(&mut self, index: u32) -> Option<T> {
        self.vacate(index)
    }

    fn vacate(&mut self, index: u32) -> Option<T> {
        let slot = self.slot_mut(index)?;
        let value = slot.value.take()?;
        slot.ref_count = 0;
        slot.generation = next_generation(slot.generation);
        self.free.push(index);
        self.live -= 1;
        Some(value)
    }

    /// Number of live values.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Number of slots backed by storage.
    pub fn capacity(&self) -> usize {
        self.chunks.len() * CHUNK_SIZE
    }

    /// One past the highest index ever handed out from backed storage.
    pub fn index_bound(&self) -> u32 {
        self.high_water
    }

    /// Release trailing chunks that hold no live or reserved slot.
    ///
    /// Returns the number of chunks released. Slots re-grown later start past
    /// every generation the released slots reached, so stale handles into the
    /// trimmed range stay stale.
    pub fn trim(&mut self) -> usize {
        let mut released = 0;
        while let Some(chunk) = self.chunks.last() {
            if !chunk.iter().all(Slot::is_free) {
                break;
            }
            let max_generation = chunk.iter().map(|s| s.generation).max().unwrap_or(0);
            self.generation_floor = self.generation_floor.max(max_generation);
            self.chunks.pop();
            released += 1;
        }
        if released > 0 {
            let bound = (self.chunks.len() * CHUNK_SIZE) as u32;
            self.high_water = self.high_water.min(bound);
            self.free.retain(|&index| index < bound);
            log::trace!("{} pool: trimmed {} chunk(s)", K::NAME, released);
        }
        released
    }

    /// Iterate over live values with their current handles.
    pub fn iter(&self) -> impl Iterator<Item = (Handle<K>, &T)> + '_ {
        self.chunks.iter().enumerate().flat_map(|(c, chunk)| {
            chunk.iter().enumerate().filter_map(move |(i, slot)| {
                let index = ((c << CHUNK_BITS) | i) as u32;
                slot.value
                    .as_ref()
                    .map(|v| (Handle::new(index, slot.generation), v))
            })
        })
    }

    /// Live handles, in index order.
    pub fn handles(&self) -> Vec<Handle<K>> {
        self.iter().map(|(h, _)| h).collect()
    }
}

impl<K: ResourceKind, T> fmt::Debug for Pool<K, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("kind", &K::NAME)
            .field("live", &self.live)
            .field("capacity", &self.capacity())
            .field("free", &self.free.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    enum Tex {}
    impl ResourceKind for Tex {
        const NAME: &'static str = "tex";
    }

    type TexPool = Pool<Tex, String>;

    #[test]
    fn test_insert_and_get() {
        let mut pool = TexPool::new();
        let h = pool.insert("albedo".to_string()).unwrap();

        assert!(pool.is_valid(h));
        assert_eq!(pool.get(h).map(String::as_str), Some("albedo"));
        assert_eq!(pool.ref_count(h), Some(1));
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.capacity(), CHUNK_SIZE);
    }

    #[test]
    fn test_release_bumps_generation() {
        let mut pool = TexPool::new();
        let first = pool.insert("a".into()).unwrap();
        assert_eq!(pool.release(first), Release::Freed("a".into()));

        let second = pool.insert("b".into()).unwrap();
        assert_eq!(second.index(), first.index());
        assert_ne!(second.generation(), first.generation());

        assert!(pool.get(first).is_none());
        assert_eq!(pool.get(second).map(String::as_str), Some("b"));
    }

    #[test]
    fn test_stale_release_leaves_occupant() {
        let mut pool = TexPool::new();
        let first = pool.insert("a".into()).unwrap();
        pool.release(first);
        let second = pool.insert("b".into()).unwrap();

        assert!(pool.release(first).is_stale());
        assert!(!pool.add_ref(first));
        assert_eq!(pool.ref_count(second), Some(1));
        assert!(pool.is_valid(second));
    }

    #[test]
    fn test_ref_counting() {
        let mut pool = TexPool::new();
        let h = pool.insert("shared".into()).unwrap();
        assert!(pool.add_ref(h));
        assert!(pool.add_ref(h));

        assert_eq!(pool.release(h), Release::Retained { remaining: 2 });
        assert_eq!(pool.release(h), Release::Retained { remaining: 1 });
        assert!(pool.is_valid(h));
        assert_eq!(pool.release(h).freed().as_deref(), Some("shared"));
        assert!(!pool.is_valid(h));
        assert!(pool.is_empty());
    }

    #[test]
    fn test_cancel_reservation() {
        let mut pool = TexPool::new();
        let index = pool.allocate().unwrap();
        assert!(pool.slot(index).is_none());
        pool.cancel(index);
        assert_eq!(pool.len(), 0);

        // The cancelled slot is reused.
        assert_eq!(pool.allocate().unwrap(), index);
    }

    #[test]
    fn test_growth_keeps_indices() {
        let mut pool = Pool::<Tex, usize>::new();
        let handles: Vec<_> = (0..CHUNK_SIZE * 3 + 5)
            .map(|i| pool.insert(i).unwrap())
            .collect();

        assert_eq!(pool.capacity(), CHUNK_SIZE * 4);
        for (i, h) in handles.iter().enumerate() {
            assert_eq!(h.index() as usize, i);
            assert_eq!(pool.get(*h), Some(&i));
            assert_eq!(pool.slot(h.index()), Some(&i));
        }
    }

    #[test]
    fn test_slot_out_of_range() {
        let pool = TexPool::new();
        assert!(pool.slot(0).is_none());
        assert!(pool.slot(u32::MAX).is_none());
        assert!(pool.get(Handle::INVALID).is_none());
    }

    #[test]
    fn test_exhaustion() {
        let mut pool = Pool::<Tex, u8>::with_max_slots(2);
        pool.insert(1).unwrap();
        pool.insert(2).unwrap();
        assert_eq!(
            pool.insert(3),
            Err(PoolError::Exhausted {
                kind: "tex",
                max_slots: 2
            })
        );
    }

    #[test]
    fn test_trim_releases_tail_and_keeps_stale_handles_stale() {
        let mut pool = Pool::<Tex, usize>::new();
        let keep = pool.insert(0).unwrap();
        let tail: Vec<_> = (1..CHUNK_SIZE + 10)
            .map(|i| pool.insert(i).unwrap())
            .collect();
        assert_eq!(pool.capacity(), CHUNK_SIZE * 2);

        for h in &tail {
            pool.release(*h);
        }
        assert_eq!(pool.trim(), 1);
        assert_eq!(pool.capacity(), CHUNK_SIZE);
        assert!(pool.is_valid(keep));

        // Regrow into the trimmed range.
        let regrown: Vec<_> = (0..CHUNK_SIZE * 2)
            .map(|i| pool.insert(i).unwrap())
            .collect();
        let stale = tail[tail.len() - 1];
        let reused = regrown
            .iter()
            .find(|h| h.index() == stale.index())
            .copied()
            .unwrap();
        assert_ne!(reused.generation(), stale.generation());
        assert!(!pool.is_valid(stale));
        assert!(pool.release(stale).is_stale());
    }

    #[test]
    fn test_trim_stops_at_live_chunk() {
        let mut pool = Pool::<Tex, usize>::new();
        for i in 0..CHUNK_SIZE + 1 {
            pool.insert(i).unwrap();
        }
        assert_eq!(pool.trim(), 0);
        assert_eq!(pool.len(), CHUNK_SIZE + 1);
    }

    #[test]
    fn test_force_remove() {
        let mut pool = TexPool::new();
        let h = pool.insert("x".into()).unwrap();
        pool.add_ref(h);
        assert_eq!(pool.force_remove(h.index()).as_deref(), Some("x"));
        assert!(!pool.is_valid(h));
        assert!(pool.force_remove(h.index()).is_none());
    }

    #[test]
    fn test_iter_and_handle_at() {
        let mut pool = TexPool::new();
        let a = pool.insert("a".into()).unwrap();
        let b = pool.insert("b".into()).unwrap();
        pool.release(a);

        let live: Vec<_> = pool.iter().map(|(h, v)| (h, v.clone())).collect();
        assert_eq!(live, vec![(b, "b".to_string())]);
        assert_eq!(pool.handle_at(b.index()), Some(b));
        assert_eq!(pool.handle_at(a.index()), None);
    }
}
