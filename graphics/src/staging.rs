//! Pools of host-visible staging buffers.
//!
//! Three independent pools serve uploads ([`StagingClass::Write`]),
//! readbacks ([`StagingClass::Read`]) and per-frame constants
//! ([`StagingClass::Uniform`]). Every pool hands out fixed-size blocks up to a
//! capacity derived from the device's host visible heaps. Released blocks are
//! recycled, never destroyed, until teardown.
//!
//! The budget `min(host_visible * heap_fraction, ceiling)` applies to each
//! pool on its own, so all three together may hold up to three times that
//! amount. Lower the fraction or the ceiling to bound the total.

use std::fmt;

use crate::config::StagingBlockSizes;
use crate::handles::BufferHandle;
use crate::types::{
    host_visible_bytes, BufferDescriptor, BufferUsage, MemoryDescriptor, MemoryHeap,
    MemoryLocation,
};

const CLASS_SHIFT: u32 = 30;
const BLOCK_MASK: u32 = (1 << CLASS_SHIFT) - 1;

/// Usage class of a staging block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StagingClass {
    Write = 0,
    Read = 1,
    Uniform = 2,
}

impl StagingClass {
    pub const ALL: [StagingClass; 3] = [Self::Write, Self::Read, Self::Uniform];

    fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(Self::Write),
            1 => Some(Self::Read),
            2 => Some(Self::Uniform),
            _ => None,
        }
    }

    pub fn usage(self) -> BufferUsage {
        match self {
            Self::Write => BufferUsage::COPY_SRC,
            Self::Read => BufferUsage::COPY_DST,
            Self::Uniform => BufferUsage::UNIFORM | BufferUsage::COPY_DST,
        }
    }

    pub fn location(self) -> MemoryLocation {
        match self {
            Self::Write | Self::Uniform => MemoryLocation::CpuToGpu,
            Self::Read => MemoryLocation::GpuToCpu,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Write => "write",
            Self::Read => "read",
            Self::Uniform => "uniform",
        }
    }
}

/// Index of a staging block: a 2-bit class tag above a 30-bit block index.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct StagingIndex(u32);

impl StagingIndex {
    /// Tag 3 names no class, so this never resolves.
    pub const INVALID: Self = Self(u32::MAX);

    pub fn new(class: StagingClass, block: u32) -> Self {
        debug_assert!(block <= BLOCK_MASK, "staging block index out of range");
        Self(((class as u32) << CLASS_SHIFT) | (block & BLOCK_MASK))
    }

    pub fn class(self) -> Option<StagingClass> {
        StagingClass::from_tag(self.0 >> CLASS_SHIFT)
    }

    pub fn block(self) -> u32 {
        self.0 & BLOCK_MASK
    }

    pub fn is_valid(self) -> bool {
        self.class().is_some()
    }

    pub fn to_bits(self) -> u32 {
        self.0
    }

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }
}

impl fmt::Debug for StagingIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.class() {
            Some(class) => write!(f, "StagingIndex({:?}#{})", class, self.block()),
            None => write!(f, "StagingIndex(invalid)"),
        }
    }
}

/// A staging buffer lent out by the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagingBlock {
    pub buffer: BufferHandle,
    pub index: StagingIndex,
}

/// Usage of one staging pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StagingStats {
    pub block_size: u64,
    /// Maximum number of blocks.
    pub capacity: u32,
    /// Blocks created so far.
    pub allocated: u32,
    /// Blocks currently lent out.
    pub in_use: u32,
}

struct ClassPool {
    class: StagingClass,
    block_size: u64,
    capacity: u32,
    buffers: Vec<BufferHandle>,
    in_use: Vec<bool>,
    free: Vec<u32>,
}

impl ClassPool {
    fn new(class: StagingClass, block_size: u64, budget: u64) -> Self {
        let capacity = if block_size == 0 {
            0
        } else {
            (budget / block_size).min(u64::from(BLOCK_MASK) + 1) as u32
        };
        log::debug!(
            "Staging {} pool: {} blocks of {} bytes",
            class.name(),
            capacity,
            block_size
        );
        Self {
            class,
            block_size,
            capacity,
            buffers: Vec::new(),
            in_use: Vec::new(),
            free: Vec::new(),
        }
    }

    fn stats(&self) -> StagingStats {
        StagingStats {
            block_size: self.block_size,
            capacity: self.capacity,
            allocated: self.buffers.len() as u32,
            in_use: self.in_use.iter().filter(|u| **u).count() as u32,
        }
    }
}

/// The three staging pools.
pub struct StagingBufferPool {
    pools: [ClassPool; 3],
}

impl StagingBufferPool {
    /// Size every pool at `min(host_visible * heap_fraction, ceiling)` bytes.
    /// The budget is per pool, not shared.
    pub fn new(
        heaps: &[MemoryHeap],
        block_sizes: StagingBlockSizes,
        heap_fraction: f64,
        ceiling_bytes: u64,
    ) -> Self {
        let share = (host_visible_bytes(heaps) as f64 * heap_fraction.clamp(0.0, 1.0)) as u64;
        let budget = share.min(ceiling_bytes);
        Self {
            pools: [
                ClassPool::new(StagingClass::Write, block_sizes.write, budget),
                ClassPool::new(StagingClass::Read, block_sizes.read, budget),
                ClassPool::new(StagingClass::Uniform, block_sizes.uniform, budget),
            ],
        }
    }

    fn pool(&self, class: StagingClass) -> &ClassPool {
        &self.pools[class as usize]
    }

    fn pool_mut(&mut self, class: StagingClass) -> &mut ClassPool {
        &mut self.pools[class as usize]
    }

    pub fn capacity(&self, class: StagingClass) -> u32 {
        self.pool(class).capacity
    }

    pub fn stats(&self, class: StagingClass) -> StagingStats {
        self.pool(class).stats()
    }

    /// Lend a block of `class`.
    ///
    /// A free block is reused; below capacity `factory` creates a new buffer.
    /// Returns `None` at capacity or when `factory` yields an invalid handle.
    pub fn allocate(
        &mut self,
        class: StagingClass,
        factory: impl FnOnce(&BufferDescriptor, &MemoryDescriptor) -> BufferHandle,
    ) -> Option<StagingBlock> {
        let pool = self.pool_mut(class);

        if let Some(block) = pool.free.pop() {
            pool.in_use[block as usize] = true;
            return Some(StagingBlock {
                buffer: pool.buffers[block as usize],
                index: StagingIndex::new(class, block),
            });
        }

        let block = pool.buffers.len() as u32;
        if block >= pool.capacity {
            log::debug!("Staging {} pool exhausted ({} blocks)", class.name(), pool.capacity);
            return None;
        }

        let desc = BufferDescriptor::new(pool.block_size, class.usage())
            .with_label(format!("staging-{}-{}", class.name(), block));
        let memory = desc.memory(class.location());
        let buffer = factory(&desc, &memory);
        if !buffer.is_valid() {
            return None;
        }

        pool.buffers.push(buffer);
        pool.in_use.push(true);
        Some(StagingBlock {
            buffer,
            index: StagingIndex::new(class, block),
        })
    }

    /// Buffer of a lent block.
    pub fn buffer(&self, index: StagingIndex) -> Option<BufferHandle> {
        let pool = self.pool(index.class()?);
        let block = index.block() as usize;
        match pool.in_use.get(block) {
            Some(true) => pool.buffers.get(block).copied(),
            _ => None,
        }
    }

    /// Return a block to its pool. Returns `false` if it was not lent out.
    pub fn release_block(&mut self, index: StagingIndex) -> bool {
        let Some(class) = index.class() else {
            log::warn!("Released invalid {:?}", index);
            return false;
        };
        let pool = self.pool_mut(class);
        let block = index.block();
        match pool.in_use.get_mut(block as usize) {
            Some(in_use) if *in_use => {
                *in_use = false;
                pool.free.push(block);
                true
            }
            _ => {
                log::warn!("Released {:?} which is not in use", index);
                false
            }
        }
    }

    /// Empty every pool and return its buffers for destruction.
    pub fn teardown(&mut self) -> Vec<BufferHandle> {
        let mut buffers = Vec::new();
        for pool in &mut self.pools {
            let lent = pool.in_use.iter().filter(|u| **u).count();
            if lent > 0 {
                log::warn!(
                    "Staging {} pool torn down with {} block(s) still in use",
                    pool.class.name(),
                    lent
                );
            }
            buffers.append(&mut pool.buffers);
            pool.in_use.clear();
            pool.free.clear();
        }
        buffers
    }
}

impl fmt::Debug for StagingBufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StagingBufferPool")
            .field("write", &self.stats(StagingClass::Write))
            .field("read", &self.stats(StagingClass::Read))
            .field("uniform", &self.stats(StagingClass::Uniform))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heaps(host_visible: u64) -> Vec<MemoryHeap> {
        vec![
            MemoryHeap {
                size: 1 << 30,
                device_local: true,
                host_visible: false,
            },
            MemoryHeap {
                size: host_visible,
                device_local: false,
                host_visible: true,
            },
        ]
    }

    fn sizes(block: u64) -> StagingBlockSizes {
        StagingBlockSizes {
            write: block,
            read: block,
            uniform: block,
        }
    }

    fn counter_factory(next: &mut u32) -> impl FnOnce(&BufferDescriptor, &MemoryDescriptor) -> BufferHandle + '_ {
        move |_, _| {
            *next += 1;
            BufferHandle::new(*next, 1)
        }
    }

    #[test]
    fn test_index_packing() {
        let index = StagingIndex::new(StagingClass::Uniform, 12345);
        assert_eq!(index.class(), Some(StagingClass::Uniform));
        assert_eq!(index.block(), 12345);
        assert_eq!(StagingIndex::from_bits(index.to_bits()), index);
        assert!(!StagingIndex::INVALID.is_valid());

        let max = StagingIndex::new(StagingClass::Read, BLOCK_MASK);
        assert_eq!(max.class(), Some(StagingClass::Read));
        assert_eq!(max.block(), BLOCK_MASK);
    }

    #[test]
    fn test_capacity_from_heaps() {
        // 1 MiB host visible, half of it, 64 KiB blocks.
        let pool = StagingBufferPool::new(&heaps(1 << 20), sizes(64 << 10), 0.5, u64::MAX);
        assert_eq!(pool.capacity(StagingClass::Write), 8);

        // Ceiling wins over the heap share.
        let pool = StagingBufferPool::new(&heaps(1 << 20), sizes(64 << 10), 0.5, 128 << 10);
        assert_eq!(pool.capacity(StagingClass::Read), 2);
    }

    #[test]
    fn test_each_class_gets_the_full_budget() {
        let pool = StagingBufferPool::new(&heaps(1 << 20), sizes(64 << 10), 0.5, u64::MAX);
        let total: u32 = StagingClass::ALL
            .iter()
            .map(|&class| pool.capacity(class))
            .sum();
        assert_eq!(total, 3 * 8);
    }

    #[test]
    fn test_allocate_reuse_and_exhaustion() {
        let mut pool = StagingBufferPool::new(&heaps(1 << 20), sizes(512 << 10), 1.0, u64::MAX);
        let mut next = 0;

        let a = pool.allocate(StagingClass::Write, counter_factory(&mut next)).unwrap();
        let b = pool.allocate(StagingClass::Write, counter_factory(&mut next)).unwrap();
        assert_ne!(a.buffer, b.buffer);
        assert!(pool.allocate(StagingClass::Write, counter_factory(&mut next)).is_none());
        assert_eq!(next, 2);

        assert!(pool.release_block(a.index));
        assert!(!pool.release_block(a.index));
        assert_eq!(pool.buffer(a.index), None);

        let c = pool.allocate(StagingClass::Write, counter_factory(&mut next)).unwrap();
        assert_eq!(c.buffer, a.buffer);
        assert_eq!(next, 2);

        let stats = pool.stats(StagingClass::Write);
        assert_eq!(stats.allocated, 2);
        assert_eq!(stats.in_use, 2);
        assert_eq!(pool.stats(StagingClass::Read).allocated, 0);
    }

    #[test]
    fn test_factory_failure() {
        let mut pool = StagingBufferPool::new(&heaps(1 << 20), sizes(1024), 1.0, u64::MAX);
        assert!(pool
            .allocate(StagingClass::Uniform, |_, _| BufferHandle::INVALID)
            .is_none());
        assert_eq!(pool.stats(StagingClass::Uniform).allocated, 0);
    }

    #[test]
    fn test_factory_receives_class_description() {
        let mut pool = StagingBufferPool::new(&heaps(1 << 20), sizes(1024), 1.0, u64::MAX);
        pool.allocate(StagingClass::Read, |desc, memory| {
            assert_eq!(desc.size, 1024);
            assert!(desc.usage.contains(BufferUsage::COPY_DST));
            assert_eq!(memory.location, MemoryLocation::GpuToCpu);
            BufferHandle::new(0, 1)
        })
        .unwrap();
    }

    #[test]
    fn test_teardown_returns_every_buffer() {
        let mut pool = StagingBufferPool::new(&heaps(1 << 20), sizes(1024), 1.0, u64::MAX);
        let mut next = 0;
        let a = pool.allocate(StagingClass::Write, counter_factory(&mut next)).unwrap();
        pool.allocate(StagingClass::Uniform, counter_factory(&mut next)).unwrap();
        pool.release_block(a.index);

        assert_eq!(pool.teardown().len(), 2);
        assert_eq!(pool.stats(StagingClass::Write), StagingStats {
            block_size: 1024,
            capacity: pool.capacity(StagingClass::Write),
            allocated: 0,
            in_use: 0,
        });
    }
}
