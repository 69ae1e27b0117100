//! Resource manager configuration.

use std::fmt;
use std::sync::Arc;

use crate::diagnostics::{DiagnosticSink, LogSink};
use crate::shader::ShaderFailureHandler;

/// Block size of each staging pool, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagingBlockSizes {
    pub write: u64,
    pub read: u64,
    pub uniform: u64,
}

impl Default for StagingBlockSizes {
    fn default() -> Self {
        Self {
            write: 4 << 20,
            read: 4 << 20,
            uniform: 64 << 10,
        }
    }
}

/// Configuration for [`ResourceManager`](crate::ResourceManager).
#[derive(Clone)]
pub struct ManagerConfig {
    pub staging_block_sizes: StagingBlockSizes,
    /// Share of the host visible heaps each staging pool may occupy.
    pub staging_heap_fraction: f64,
    /// Upper bound on the bytes of each staging pool.
    pub staging_ceiling_bytes: u64,
    /// Slot limit of every pool and cache.
    pub max_slots_per_pool: u32,
    /// Slots inspected per cache by the validation step of `maintain`.
    pub validation_iterations: usize,
    /// Slots inspected per cache by the garbage collection step of `maintain`.
    pub gc_iterations: usize,
    /// Slots inspected per cache by `release_memory`.
    pub release_memory_iterations: usize,
    /// Submissions a cache entry must stay unused before `collect_garbage`
    /// reclaims it.
    pub gc_min_age: u64,
    /// Panic when a stale handle is released or referenced.
    pub assert_on_stale_handles: bool,
    /// Panic when resources are still referenced at teardown.
    pub assert_on_leaks: bool,
    pub max_shader_retries: u32,
    pub shader_failure_handler: Option<ShaderFailureHandler>,
    pub diagnostic_sink: Arc<dyn DiagnosticSink>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            staging_block_sizes: StagingBlockSizes::default(),
            staging_heap_fraction: 0.25,
            staging_ceiling_bytes: 256 << 20,
            max_slots_per_pool: 1 << 20,
            validation_iterations: 64,
            gc_iterations: 64,
            release_memory_iterations: 4096,
            gc_min_age: 3,
            assert_on_stale_handles: cfg!(debug_assertions),
            assert_on_leaks: cfg!(debug_assertions),
            max_shader_retries: 3,
            shader_failure_handler: None,
            diagnostic_sink: Arc::new(LogSink),
        }
    }
}

impl ManagerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_staging_block_sizes(mut self, sizes: StagingBlockSizes) -> Self {
        self.staging_block_sizes = sizes;
        self
    }

    /// Set the heap share of each staging pool, clamped to `[0, 1]`.
    pub fn with_staging_heap_fraction(mut self, fraction: f64) -> Self {
        self.staging_heap_fraction = fraction.clamp(0.0, 1.0);
        self
    }

    pub fn with_staging_ceiling_bytes(mut self, bytes: u64) -> Self {
        self.staging_ceiling_bytes = bytes;
        self
    }

    pub fn with_max_slots_per_pool(mut self, slots: u32) -> Self {
        self.max_slots_per_pool = slots;
        self
    }

    pub fn with_validation_iterations(mut self, iterations: usize) -> Self {
        self.validation_iterations = iterations;
        self
    }

    pub fn with_gc_iterations(mut self, iterations: usize) -> Self {
        self.gc_iterations = iterations;
        self
    }

    pub fn with_release_memory_iterations(mut self, iterations: usize) -> Self {
        self.release_memory_iterations = iterations;
        self
    }

    pub fn with_gc_min_age(mut self, submissions: u64) -> Self {
        self.gc_min_age = submissions;
        self
    }

    pub fn with_assert_on_stale_handles(mut self, enabled: bool) -> Self {
        self.assert_on_stale_handles = enabled;
        self
    }

    pub fn with_assert_on_leaks(mut self, enabled: bool) -> Self {
        self.assert_on_leaks = enabled;
        self
    }

    /// Install a handler consulted after each shader compilation failure.
    pub fn with_shader_failure_handler(
        mut self,
        handler: ShaderFailureHandler,
        max_retries: u32,
    ) -> Self {
        self.shader_failure_handler = Some(handler);
        self.max_shader_retries = max_retries;
        self
    }

    pub fn with_diagnostic_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.diagnostic_sink = sink;
        self
    }
}

impl fmt::Debug for ManagerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagerConfig")
            .field("staging_block_sizes", &self.staging_block_sizes)
            .field("staging_heap_fraction", &self.staging_heap_fraction)
            .field("staging_ceiling_bytes", &self.staging_ceiling_bytes)
            .field("max_slots_per_pool", &self.max_slots_per_pool)
            .field("validation_iterations", &self.validation_iterations)
            .field("gc_iterations", &self.gc_iterations)
            .field("release_memory_iterations", &self.release_memory_iterations)
            .field("gc_min_age", &self.gc_min_age)
            .field("assert_on_stale_handles", &self.assert_on_stale_handles)
            .field("assert_on_leaks", &self.assert_on_leaks)
            .field("max_shader_retries", &self.max_shader_retries)
            .field(
                "shader_failure_handler",
                &self.shader_failure_handler.is_some(),
            )
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = ManagerConfig::new()
            .with_gc_min_age(0)
            .with_staging_heap_fraction(2.0)
            .with_assert_on_leaks(false);
        assert_eq!(config.gc_min_age, 0);
        assert_eq!(config.staging_heap_fraction, 1.0);
        assert!(!config.assert_on_leaks);
        assert!(format!("{config:?}").contains("gc_min_age: 0"));
    }
}
