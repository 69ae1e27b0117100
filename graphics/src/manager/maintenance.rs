//! Validation, garbage collection and teardown.

use std::sync::atomic::Ordering;

use keel_core::profiling::{profile_function, profile_plot};
use keel_core::{EntryInfo, Pool, ResourceKind};

use super::tables::ResourceTables;
use super::ResourceManager;
use crate::types::BoundResource;

/// Bounds of one garbage collection step.
#[derive(Debug, Clone, Copy)]
struct GcPolicy {
    max_iterations: usize,
    now: u64,
    /// Submissions an entry must have gone unused.
    min_age: u64,
}

impl GcPolicy {
    fn reclaims<K: ResourceKind, D, T>(&self, entry: &EntryInfo<'_, K, D, T>) -> bool {
        entry.is_cache_only() && self.now.saturating_sub(entry.last_used) >= self.min_age
    }
}

/// Remove every live value of `pool`, counting each as a leak.
fn drain<K: ResourceKind, T>(pool: &mut Pool<K, T>, leaks: &mut usize) -> Vec<T> {
    let mut drained = Vec::with_capacity(pool.len());
    for handle in pool.handles() {
        if let Some(value) = pool.force_remove(handle.index()) {
            log::warn!("Teardown: {:?} was never released", handle);
            *leaks += 1;
            drained.push(value);
        }
    }
    drained
}

impl ResourceManager {
    /// Start a new submission and return its index.
    ///
    /// Cache lookups are stamped with the current submission; entries
    /// untouched for [`ManagerConfig::gc_min_age`](crate::ManagerConfig::gc_min_age)
    /// submissions become eligible for [`collect_garbage`](Self::collect_garbage).
    pub fn advance_submission(&self) -> u64 {
        let mut tables = self.tables.write();
        let submission = self.submission.fetch_add(1, Ordering::AcqRel) + 1;
        tables.set_submission(submission);
        submission
    }

    /// Periodic upkeep, meant to run once per frame after
    /// [`advance_submission`](Self::advance_submission).
    ///
    /// Runs one validation step of
    /// [`validation_iterations`](crate::ManagerConfig::validation_iterations)
    /// slots and one garbage collection step of
    /// [`gc_iterations`](crate::ManagerConfig::gc_iterations) slots. Returns
    /// the number of entries destroyed.
    pub fn maintain(&self) -> usize {
        self.run_validation(self.config.validation_iterations)
            + self.collect_garbage(self.config.gc_iterations)
    }

    /// Tear down descriptor sets and framebuffers that refer to a destroyed
    /// resource.
    ///
    /// Inspects at most `max_iterations` slots of each cache, resuming where
    /// the previous call stopped. Returns the number of entries removed.
    pub fn run_validation(&self, max_iterations: usize) -> usize {
        profile_function!();
        if self.is_torn_down() {
            return 0;
        }
        let mut tables = self.tables.write();
        let (dead_sets, dead_framebuffers) = {
            let ResourceTables {
                descriptor_sets,
                framebuffers,
                set_layouts,
                render_passes,
                images,
                buffers,
                samplers,
                rt_scenes,
                cursors,
                ..
            } = &mut *tables;

            let bound_alive = |resource: &BoundResource| match *resource {
                BoundResource::Buffer { buffer, .. } => buffers.is_valid(buffer),
                BoundResource::Image(image) => images.is_valid(image),
                BoundResource::Sampler(sampler) => samplers.is_valid(sampler),
                BoundResource::CombinedImageSampler { image, sampler } => {
                    images.is_valid(image) && samplers.is_valid(sampler)
                }
                BoundResource::AccelerationStructure(scene) => rt_scenes.is_valid(scene),
            };
            let dead_sets = descriptor_sets.garbage_collect(
                &mut cursors.validate_sets,
                max_iterations,
                |entry| {
                    !set_layouts.is_valid(entry.key.layout)
                        || !entry.key.bindings.iter().all(|b| bound_alive(&b.resource))
                },
            );
            let dead_framebuffers = framebuffers.garbage_collect(
                &mut cursors.validate_framebuffers,
                max_iterations,
                |entry| {
                    !render_passes.is_valid(entry.key.render_pass)
                        || !entry.key.attachments.iter().all(|&image| images.is_valid(image))
                },
            );
            (dead_sets, dead_framebuffers)
        };

        let removed = dead_sets.len() + dead_framebuffers.len();
        for set in dead_sets {
            tables.destroy_descriptor_set(set);
        }
        for framebuffer in dead_framebuffers {
            tables.destroy_framebuffer(framebuffer);
        }
        drop(tables);

        if removed > 0 {
            log::debug!("Validation removed {} stale cache entries", removed);
        }
        removed
    }

    /// Destroy cache entries nobody but their cache holds and that went
    /// unused for `gc_min_age` submissions.
    ///
    /// Dependents are swept before what they depend on, so a pipeline and
    /// the layout only it used can go in the same call. Returns the number of
    /// entries destroyed.
    pub fn collect_garbage(&self, max_iterations: usize) -> usize {
        profile_function!();
        if self.is_torn_down() {
            return 0;
        }
        let policy = GcPolicy {
            max_iterations,
            now: self.submission(),
            min_age: self.config.gc_min_age,
        };
        let collected = self.tables.write().sweep_caches(policy);
        profile_plot!("live_resources", self.stats().total_resources());
        collected
    }

    /// Give back as much memory as possible.
    ///
    /// Trims unused pool storage, destroys every cache entry only its cache
    /// holds regardless of age, including unused shader modules, then trims
    /// again. Returns the number of entries destroyed.
    pub fn release_memory(&self) -> usize {
        profile_function!();
        if self.is_torn_down() {
            return 0;
        }
        let policy = GcPolicy {
            max_iterations: self.config.release_memory_iterations,
            now: self.submission(),
            min_age: 0,
        };
        let mut tables = self.tables.write();
        let mut trimmed = tables.trim();
        let mut collected = tables.sweep_caches(policy);
        collected += tables
            .shader_modules
            .collect_unused(&*self.device, policy.max_iterations);
        trimmed += tables.trim();
        drop(tables);

        log::debug!(
            "Released memory: {} cache entries destroyed, {} chunks trimmed",
            collected,
            trimmed
        );
        profile_plot!("live_resources", self.stats().total_resources());
        collected
    }

    /// Destroy everything.
    ///
    /// Staging blocks are given back first, then every cache is cleared and
    /// every pool drained, dependents before their dependencies. Resources
    /// the caller still owned are reported as leaks; with
    /// [`ManagerConfig::assert_on_leaks`](crate::ManagerConfig::assert_on_leaks)
    /// set, any leak panics after cleanup. Returns the number of leaks.
    ///
    /// The manager refuses to create anything afterwards. Dropping the
    /// manager tears it down without the leak assertion.
    pub fn tear_down(&self) -> usize {
        self.tear_down_impl(true)
    }

    pub(super) fn tear_down_impl(&self, strict: bool) -> usize {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return 0;
        }
        profile_function!();

        let staging = self.staging.lock().teardown();
        let mut tables = self.tables.write();
        for buffer in staging {
            tables.release_dependency(buffer);
        }

        let leaks = tables.clear_all();
        let modules_in_use = tables.shader_modules.clear(&*self.device);
        drop(tables);

        let leaks = leaks + modules_in_use;
        if leaks > 0 {
            log::error!("ResourceManager torn down with {} leaked resource(s)", leaks);
            assert!(
                !(strict && self.config.assert_on_leaks),
                "{leaks} resource(s) leaked at teardown"
            );
        } else {
            log::info!("ResourceManager torn down cleanly");
        }
        leaks
    }
}

macro_rules! sweep {
    ($tables:ident, $field:ident, $destroy:ident, $policy:ident) => {{
        let removed = $tables.$field.garbage_collect(
            &mut $tables.cursors.$field,
            $policy.max_iterations,
            |entry| $policy.reclaims(&entry),
        );
        let count = removed.len();
        for value in removed {
            $tables.$destroy(value);
        }
        count
    }};
}

macro_rules! clear {
    ($tables:ident, $field:ident, $destroy:ident) => {{
        let mut removed = Vec::new();
        let leaks = $tables
            .$field
            .clear_ignore_leaks(|_, value, _| removed.push(value));
        for value in removed {
            $tables.$destroy(value);
        }
        leaks
    }};
}

impl ResourceTables {
    /// One bounded GC step over every cache, dependents first.
    fn sweep_caches(&mut self, policy: GcPolicy) -> usize {
        let tables = self;
        let mut collected = 0;
        collected += sweep!(tables, descriptor_sets, destroy_descriptor_set, policy);
        collected += sweep!(tables, framebuffers, destroy_framebuffer, policy);
        collected += sweep!(tables, graphics_pipelines, destroy_pipeline, policy);
        collected += sweep!(tables, compute_pipelines, destroy_pipeline, policy);
        collected += sweep!(tables, mesh_pipelines, destroy_pipeline, policy);
        collected += sweep!(tables, ray_tracing_pipelines, destroy_pipeline, policy);
        collected += sweep!(tables, pipeline_layouts, destroy_pipeline_layout, policy);
        collected += sweep!(tables, set_layouts, destroy_set_layout, policy);
        collected += sweep!(tables, samplers, destroy_sampler, policy);
        collected += sweep!(tables, render_passes, destroy_render_pass, policy);
        if collected > 0 {
            log::debug!("Garbage collection destroyed {} cache entries", collected);
        }
        collected
    }

    /// Destroy every pooled and cached resource. Returns the number of
    /// resources that still had an owner outside the manager.
    fn clear_all(&mut self) -> usize {
        let tables = self;
        let mut leaks = 0;

        leaks += clear!(tables, descriptor_sets, destroy_descriptor_set);
        leaks += clear!(tables, framebuffers, destroy_framebuffer);

        for table in drain(&mut tables.shader_tables, &mut leaks) {
            tables.destroy_shader_table(table);
        }
        for scene in drain(&mut tables.rt_scenes, &mut leaks) {
            tables.destroy_rt_scene(scene);
        }
        for geometry in drain(&mut tables.rt_geometry, &mut leaks) {
            tables.destroy_rt_geometry(geometry);
        }
        for swapchain in drain(&mut tables.swapchains, &mut leaks) {
            tables.destroy_swapchain(swapchain);
        }

        leaks += clear!(tables, graphics_pipelines, destroy_pipeline);
        leaks += clear!(tables, compute_pipelines, destroy_pipeline);
        leaks += clear!(tables, mesh_pipelines, destroy_pipeline);
        leaks += clear!(tables, ray_tracing_pipelines, destroy_pipeline);
        leaks += clear!(tables, pipeline_layouts, destroy_pipeline_layout);
        leaks += clear!(tables, set_layouts, destroy_set_layout);
        leaks += clear!(tables, samplers, destroy_sampler);
        leaks += clear!(tables, render_passes, destroy_render_pass);

        for image in drain(&mut tables.images, &mut leaks) {
            tables.destroy_image(image);
        }
        for buffer in drain(&mut tables.buffers, &mut leaks) {
            tables.destroy_buffer(buffer);
        }
        for memory in drain(&mut tables.memory, &mut leaks) {
            tables.destroy_memory(memory);
        }

        debug_assert!(tables.memory.is_empty() && tables.buffers.is_empty());
        leaks
    }
}
