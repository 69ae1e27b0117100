//! Device memory descriptions.

use super::DebugLabel;

/// Where a memory object lives and how the host may access it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MemoryLocation {
    /// Device-local, not host visible.
    #[default]
    GpuOnly,
    /// Host visible, written by the CPU and read by the GPU.
    CpuToGpu,
    /// Host visible, written by the GPU and read back by the CPU.
    GpuToCpu,
}

impl MemoryLocation {
    pub fn is_host_visible(self) -> bool {
        !matches!(self, Self::GpuOnly)
    }
}

/// Descriptor for creating a memory object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemoryDescriptor {
    pub label: DebugLabel,
    /// Size in bytes.
    pub size: u64,
    /// Required alignment in bytes (power of two).
    pub alignment: u64,
    pub location: MemoryLocation,
    /// Whether the memory backs linear resources (buffers, linear images).
    pub linear: bool,
}

impl MemoryDescriptor {
    pub fn new(size: u64, location: MemoryLocation) -> Self {
        Self {
            label: DebugLabel::none(),
            size,
            alignment: 256,
            location,
            linear: true,
        }
    }

    pub fn with_label(mut self, label: impl Into<DebugLabel>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_alignment(mut self, alignment: u64) -> Self {
        self.alignment = alignment;
        self
    }

    /// Mark the memory as backing optimally tiled images.
    pub fn optimal(mut self) -> Self {
        self.linear = false;
        self
    }
}

/// One memory heap reported by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryHeap {
    /// Heap size in bytes.
    pub size: u64,
    pub device_local: bool,
    pub host_visible: bool,
}

/// Sum of the sizes of every host visible heap.
pub fn host_visible_bytes(heaps: &[MemoryHeap]) -> u64 {
    heaps
        .iter()
        .filter(|h| h.host_visible)
        .map(|h| h.size)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_visible_bytes() {
        let heaps = [
            MemoryHeap {
                size: 8 << 30,
                device_local: true,
                host_visible: false,
            },
            MemoryHeap {
                size: 256 << 20,
                device_local: true,
                host_visible: true,
            },
            MemoryHeap {
                size: 16 << 30,
                device_local: false,
                host_visible: true,
            },
        ];
        assert_eq!(host_visible_bytes(&heaps), (256 << 20) + (16 << 30));
    }

    #[test]
    fn test_location() {
        assert!(!MemoryLocation::GpuOnly.is_host_visible());
        assert!(MemoryLocation::CpuToGpu.is_host_visible());
        assert!(MemoryLocation::GpuToCpu.is_host_visible());
    }
}
