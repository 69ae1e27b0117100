//! The resource manager.
//!
//! [`ResourceManager`] owns one pool or cache per resource kind, the staging
//! pools and the shader compiler. Every GPU object a client uses is created
//! through it and referred to by a typed [`Handle`].
//!
//! # Ownership
//!
//! A successful `create_*` call hands the caller one reference. Cached kinds
//! (samplers, render passes, layouts, descriptor sets, pipelines...) are
//! deduplicated by their full description: asking twice for the same thing
//! returns the same handle and two references. Each reference is given back
//! with [`ResourceManager::release`], or automatically by wrapping the handle
//! in an [`Owned`](crate::Owned).
//!
//! # Failures
//!
//! Creation never panics on bad input or device errors. The failure is
//! reported once through the configured
//! [`DiagnosticSink`](crate::diagnostics::DiagnosticSink), everything acquired
//! so far is rolled back and [`Handle::INVALID`] is returned.
//!
//! # Example
//!
//! ```ignore
//! let manager = ResourceManager::new(device, CompilerRegistry::new(), ManagerConfig::default());
//!
//! let sampler = manager.create_sampler(&SamplerDescriptor::linear());
//! let again = manager.create_sampler(&SamplerDescriptor::linear());
//! assert_eq!(sampler, again);
//!
//! manager.release(sampler);
//! manager.release(again);
//! manager.release_memory();
//! ```

mod create;
mod maintenance;
mod pipeline;
mod tables;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use keel_core::{Handle, ResourceKind};
use parking_lot::{Mutex, RwLock, RwLockWriteGuard};

pub use tables::{
    BufferResource, DescriptorSetLayoutResource, DescriptorSetResource, FramebufferResource,
    ImageResource, ManagedKind, MemoryResource, PipelineKey, PipelineLayoutKey,
    PipelineLayoutResource, PipelineResource, RenderPassResource, ResourceTables,
    RtGeometryResource, RtSceneResource, SamplerResource, ShaderTableResource,
    SwapchainResource,
};

use crate::config::ManagerConfig;
use crate::device::Device;
use crate::diagnostics::Diagnostic;
use crate::error::GraphicsError;
use crate::shader::{CompilerRegistry, ShaderCompiler, ShaderModuleCache};
use crate::staging::{StagingBufferPool, StagingClass, StagingStats};
use crate::types::DebugLabel;

/// Live object counts, as returned by [`ResourceManager::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManagerStats {
    pub memory: usize,
    pub images: usize,
    pub buffers: usize,
    pub samplers: usize,
    pub render_passes: usize,
    pub framebuffers: usize,
    pub set_layouts: usize,
    pub pipeline_layouts: usize,
    pub descriptor_sets: usize,
    pub shader_modules: usize,
    pub graphics_pipelines: usize,
    pub compute_pipelines: usize,
    pub mesh_pipelines: usize,
    pub ray_tracing_pipelines: usize,
    pub rt_geometry: usize,
    pub rt_scenes: usize,
    pub shader_tables: usize,
    pub swapchains: usize,
    /// Per staging class, indexed by `StagingClass as usize`.
    pub staging: [StagingStats; 3],
    pub submission: u64,
}

impl ManagerStats {
    pub fn staging(&self, class: StagingClass) -> StagingStats {
        self.staging[class as usize]
    }

    /// Live objects of every kind.
    pub fn total_resources(&self) -> usize {
        self.memory
            + self.images
            + self.buffers
            + self.samplers
            + self.render_passes
            + self.framebuffers
            + self.set_layouts
            + self.pipeline_layouts
            + self.descriptor_sets
            + self.shader_modules
            + self.graphics_pipelines
            + self.compute_pipelines
            + self.mesh_pipelines
            + self.ray_tracing_pipelines
            + self.rt_geometry
            + self.rt_scenes
            + self.shader_tables
            + self.swapchains
    }
}

/// Owner of every GPU object created on one device.
///
/// # Thread Safety
///
/// `ResourceManager` is `Send + Sync` and meant to be shared through an
/// `Arc`. Pools and caches sit behind one `RwLock`: lookups share it,
/// everything that creates or destroys takes it exclusively. Shader
/// compilation runs before that lock is taken. The staging pools have their
/// own mutex, always locked before the tables.
pub struct ResourceManager {
    device: Arc<dyn Device>,
    tables: RwLock<ResourceTables>,
    staging: Mutex<StagingBufferPool>,
    shaders: ShaderCompiler,
    submission: AtomicU64,
    config: ManagerConfig,
    torn_down: AtomicBool,
}

static_assertions::assert_impl_all!(ResourceManager: Send, Sync);

impl ResourceManager {
    /// Create a manager for `device`.
    ///
    /// `compilers` are consulted before the built-in shader lowering, in
    /// registration order.
    pub fn new(
        device: Arc<dyn Device>,
        compilers: CompilerRegistry,
        config: ManagerConfig,
    ) -> Arc<Self> {
        let modules = Arc::new(ShaderModuleCache::new(config.max_slots_per_pool));
        let mut shaders = ShaderCompiler::new(Arc::clone(&device), compilers, Arc::clone(&modules));
        if let Some(handler) = &config.shader_failure_handler {
            shaders = shaders.with_failure_handler(Arc::clone(handler), config.max_shader_retries);
        }

        let staging = StagingBufferPool::new(
            &device.memory_heaps(),
            config.staging_block_sizes,
            config.staging_heap_fraction,
            config.staging_ceiling_bytes,
        );

        log::info!(
            "ResourceManager: created for device '{}' ({:?})",
            device.name(),
            device.capabilities()
        );

        Arc::new(Self {
            tables: RwLock::new(ResourceTables::new(
                Arc::clone(&device),
                modules,
                config.max_slots_per_pool,
            )),
            device,
            staging: Mutex::new(staging),
            shaders,
            submission: AtomicU64::new(0),
            config,
            torn_down: AtomicBool::new(false),
        })
    }

    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Current submission index. See [`advance_submission`](Self::advance_submission).
    pub fn submission(&self) -> u64 {
        self.submission.load(Ordering::Acquire)
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------------
    // Lookup and ownership
    // ------------------------------------------------------------------------

    /// Snapshot of a live resource.
    pub fn get<K: ManagedKind>(&self, handle: Handle<K>) -> Option<K::Resource> {
        if !handle.is_valid() {
            return None;
        }
        K::get(&self.tables.read(), handle)
    }

    pub fn is_valid<K: ManagedKind>(&self, handle: Handle<K>) -> bool {
        self.ref_count(handle).is_some()
    }

    /// Current reference count. For cached kinds this includes the one
    /// reference the cache itself keeps.
    pub fn ref_count<K: ManagedKind>(&self, handle: Handle<K>) -> Option<u32> {
        if !handle.is_valid() {
            return None;
        }
        K::ref_count(&self.tables.read(), handle)
    }

    /// Take another reference on a live resource.
    pub fn add_ref<K: ManagedKind>(&self, handle: Handle<K>) -> bool {
        if !handle.is_valid() || self.is_torn_down() {
            return false;
        }
        let mut tables = self.tables.write();
        let added = K::add_ref(&mut tables, handle);
        if !added {
            let evicted = K::is_evicted(&tables, handle);
            drop(tables);
            if evicted {
                log::debug!("ResourceManager: add_ref on evicted {:?}", handle);
            } else {
                self.stale_handle("add_ref", handle);
            }
        }
        added
    }

    /// Give back one reference. The resource is destroyed with its last
    /// reference; cached kinds stay in their cache until collected.
    ///
    /// Returns `false` for a stale handle, without touching whatever now
    /// occupies its slot. [`Handle::INVALID`] is ignored. A handle whose
    /// resource [`run_validation`](Self::run_validation) destroyed is not
    /// stale: releasing it gives back the owner's reference and returns
    /// `true`.
    pub fn release<K: ManagedKind>(&self, handle: Handle<K>) -> bool {
        if !handle.is_valid() || self.is_torn_down() {
            return false;
        }
        let mut tables = self.tables.write();
        if K::release(&mut tables, handle) {
            return true;
        }
        let evicted = K::release_evicted(&mut tables, handle);
        drop(tables);
        if !evicted {
            self.stale_handle("release", handle);
        }
        evicted
    }

    /// Live object counts and staging usage.
    pub fn stats(&self) -> ManagerStats {
        let staging = {
            let staging = self.staging.lock();
            StagingClass::ALL.map(|class| staging.stats(class))
        };
        let tables = self.tables.read();
        ManagerStats {
            memory: tables.memory.len(),
            images: tables.images.len(),
            buffers: tables.buffers.len(),
            samplers: tables.samplers.len(),
            render_passes: tables.render_passes.len(),
            framebuffers: tables.framebuffers.len(),
            set_layouts: tables.set_layouts.len(),
            pipeline_layouts: tables.pipeline_layouts.len(),
            descriptor_sets: tables.descriptor_sets.len(),
            shader_modules: tables.shader_modules.len(),
            graphics_pipelines: tables.graphics_pipelines.len(),
            compute_pipelines: tables.compute_pipelines.len(),
            mesh_pipelines: tables.mesh_pipelines.len(),
            ray_tracing_pipelines: tables.ray_tracing_pipelines.len(),
            rt_geometry: tables.rt_geometry.len(),
            rt_scenes: tables.rt_scenes.len(),
            shader_tables: tables.shader_tables.len(),
            swapchains: tables.swapchains.len(),
            staging,
            submission: self.submission(),
        }
    }

    // ------------------------------------------------------------------------
    // Failure reporting
    // ------------------------------------------------------------------------

    fn stale_handle<K: ResourceKind>(&self, operation: &str, handle: Handle<K>) {
        log::warn!("ResourceManager: {} on stale handle {:?}", operation, handle);
        assert!(
            !self.config.assert_on_stale_handles,
            "{operation} on stale handle {handle:?}"
        );
    }

    /// Report a failed operation and return the invalid handle.
    fn report<K: ResourceKind>(&self, label: &DebugLabel, error: GraphicsError) -> Handle<K> {
        self.config.diagnostic_sink.report(&Diagnostic {
            kind: K::NAME,
            label: label.as_str().map(str::to_owned),
            error,
        });
        Handle::INVALID
    }

    fn finish<K: ResourceKind>(
        &self,
        label: &DebugLabel,
        result: Result<Handle<K>, GraphicsError>,
    ) -> Handle<K> {
        match result {
            Ok(handle) => handle,
            Err(error) => self.report(label, error),
        }
    }

    /// Exclusive access to the tables for creating something.
    ///
    /// Teardown flags the manager before it takes the lock, so checking after
    /// acquiring it keeps late creations out of an already cleared table.
    fn live_tables(&self) -> Result<RwLockWriteGuard<'_, ResourceTables>, GraphicsError> {
        let tables = self.tables.write();
        self.check_alive()?;
        Ok(tables)
    }

    fn check_alive(&self) -> Result<(), GraphicsError> {
        if self.is_torn_down() {
            Err(GraphicsError::InvalidParameter(
                "resource manager was torn down".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

impl Drop for ResourceManager {
    fn drop(&mut self) {
        self.tear_down_impl(false);
    }
}

impl std::fmt::Debug for ResourceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceManager")
            .field("device", &self.device.name())
            .field("submission", &self.submission())
            .field("torn_down", &self.is_torn_down())
            .finish_non_exhaustive()
    }
}

/// Error for a handle that no longer names a live resource.
pub(crate) fn stale<K: ResourceKind>(handle: Handle<K>) -> GraphicsError {
    GraphicsError::StaleHandle(format!("{handle:?}"))
}
