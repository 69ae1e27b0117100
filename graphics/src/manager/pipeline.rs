//! Pipeline creation.
//!
//! Every pipeline kind is built the same way:
//!
//! 1. validate the program's stages for the kind;
//! 2. compile the program to native modules, outside the manager lock;
//! 3. under the lock, build the pipeline layout, acquire the render pass and
//!    find or create the pipeline by its full description.
//!
//! A failure at any step gives back everything acquired before it, in reverse
//! order. A cache hit gives back the duplicates, since the cached pipeline
//! already holds its own.

use std::sync::Arc;

use keel_core::profiling::profile_scope;
use keel_core::{Cache, Handle, Lookup};

use super::tables::{ManagedKind, PipelineKey, PipelineResource, ResourceTables};
use super::{stale, ResourceManager};
use crate::device::{PipelineCreateInfo, PipelineStageInfo, RawPipelineLayout};
use crate::error::GraphicsError;
use crate::handles::*;
use crate::shader::{CompiledProgram, ShaderProgram, ShaderStage};
use crate::types::{
    ComputePipelineDescriptor, DebugLabel, GraphicsPipelineDescriptor, MeshPipelineDescriptor,
    PipelineLayoutDescriptor, PipelineState, RayTracingPipelineDescriptor, ShaderGroup,
};

const RAY_TRACING_STAGES: [ShaderStage; 6] = [
    ShaderStage::RayGen,
    ShaderStage::Miss,
    ShaderStage::ClosestHit,
    ShaderStage::AnyHit,
    ShaderStage::Intersection,
    ShaderStage::Callable,
];

/// Pipeline kinds, each with a cache of its own.
trait PipelineKind: ManagedKind<Resource = PipelineResource> {
    fn cache(tables: &mut ResourceTables) -> &mut Cache<Self, PipelineKey, PipelineResource>;
}

macro_rules! pipeline_kind {
    ($($kind:ty => $field:ident;)*) => {
        $(
            impl PipelineKind for $kind {
                fn cache(
                    tables: &mut ResourceTables,
                ) -> &mut Cache<Self, PipelineKey, PipelineResource> {
                    &mut tables.$field
                }
            }
        )*
    };
}

pipeline_kind! {
    GraphicsPipelineKind => graphics_pipelines;
    ComputePipelineKind => compute_pipelines;
    MeshPipelineKind => mesh_pipelines;
    RayTracingPipelineKind => ray_tracing_pipelines;
}

/// Check that `program` has a `required` stage and nothing outside `allowed`.
fn validate_stages(
    program: &ShaderProgram,
    required: ShaderStage,
    allowed: &[ShaderStage],
) -> Result<(), GraphicsError> {
    if program.stage(required).is_none() {
        return Err(GraphicsError::InvalidParameter(format!(
            "program has no {required:?} stage"
        )));
    }
    match program.stages.iter().find(|s| !allowed.contains(&s.stage)) {
        Some(stage) => Err(GraphicsError::InvalidParameter(format!(
            "{:?} stage is not allowed here",
            stage.stage
        ))),
        None => Ok(()),
    }
}

fn validate_groups(program: &ShaderProgram, groups: &[ShaderGroup]) -> Result<(), GraphicsError> {
    if groups.is_empty() {
        return Err(GraphicsError::InvalidParameter(
            "ray tracing pipeline has no shader groups".to_string(),
        ));
    }
    let stage_count = program.stages.len() as u32;
    for group in groups {
        let indices: Vec<u32> = match *group {
            ShaderGroup::General(stage) => vec![stage],
            ShaderGroup::TrianglesHit {
                closest_hit,
                any_hit,
            } => closest_hit.into_iter().chain(any_hit).collect(),
            ShaderGroup::ProceduralHit {
                intersection,
                closest_hit,
                any_hit,
            } => std::iter::once(intersection)
                .chain(closest_hit)
                .chain(any_hit)
                .collect(),
        };
        if let Some(index) = indices.into_iter().find(|&i| i >= stage_count) {
            return Err(GraphicsError::InvalidParameter(format!(
                "shader group {group:?} refers to stage {index}, program has {stage_count}"
            )));
        }
    }
    Ok(())
}

impl ResourceManager {
    pub fn create_graphics_pipeline(
        &self,
        desc: &GraphicsPipelineDescriptor,
    ) -> GraphicsPipelineHandle {
        profile_scope!("create_graphics_pipeline");
        let result = validate_stages(
            &desc.program,
            ShaderStage::Vertex,
            &[ShaderStage::Vertex, ShaderStage::Fragment],
        )
        .and_then(|()| {
            self.build_pipeline(
                &desc.label,
                &desc.program,
                &desc.layout,
                Some(desc.render_pass),
                PipelineState::Graphics {
                    vertex_layout: desc.vertex_layout.clone(),
                    raster: desc.raster.clone(),
                },
            )
        });
        self.finish(&desc.label, result)
    }

    pub fn create_compute_pipeline(&self, desc: &ComputePipelineDescriptor) -> ComputePipelineHandle {
        profile_scope!("create_compute_pipeline");
        let result = validate_stages(&desc.program, ShaderStage::Compute, &[ShaderStage::Compute])
            .and_then(|()| {
                self.build_pipeline(
                    &desc.label,
                    &desc.program,
                    &desc.layout,
                    None,
                    PipelineState::Compute,
                )
            });
        self.finish(&desc.label, result)
    }

    /// Requires mesh shading support.
    pub fn create_mesh_pipeline(&self, desc: &MeshPipelineDescriptor) -> MeshPipelineHandle {
        profile_scope!("create_mesh_pipeline");
        let result = self
            .require(self.device.capabilities().mesh_shading, "mesh shading")
            .and_then(|()| {
                validate_stages(
                    &desc.program,
                    ShaderStage::Mesh,
                    &[ShaderStage::Task, ShaderStage::Mesh, ShaderStage::Fragment],
                )
            })
            .and_then(|()| {
                self.build_pipeline(
                    &desc.label,
                    &desc.program,
                    &desc.layout,
                    Some(desc.render_pass),
                    PipelineState::Mesh {
                        raster: desc.raster.clone(),
                    },
                )
            });
        self.finish(&desc.label, result)
    }

    /// Requires ray tracing support. Shader groups refer to stages by their
    /// position in the program.
    pub fn create_ray_tracing_pipeline(
        &self,
        desc: &RayTracingPipelineDescriptor,
    ) -> RayTracingPipelineHandle {
        profile_scope!("create_ray_tracing_pipeline");
        let result = self
            .require(self.device.capabilities().ray_tracing, "ray tracing")
            .and_then(|()| validate_stages(&desc.program, ShaderStage::RayGen, &RAY_TRACING_STAGES))
            .and_then(|()| validate_groups(&desc.program, &desc.groups))
            .and_then(|()| {
                self.build_pipeline(
                    &desc.label,
                    &desc.program,
                    &desc.layout,
                    None,
                    PipelineState::RayTracing {
                        groups: desc.groups.clone(),
                        max_recursion_depth: desc.max_recursion_depth,
                    },
                )
            });
        self.finish(&desc.label, result)
    }

    fn require(&self, supported: bool, feature: &str) -> Result<(), GraphicsError> {
        if supported {
            Ok(())
        } else {
            Err(GraphicsError::FeatureNotSupported(format!(
                "{} on '{}'",
                feature,
                self.device.name()
            )))
        }
    }

    fn build_pipeline<K: PipelineKind>(
        &self,
        label: &DebugLabel,
        program: &ShaderProgram,
        layout: &PipelineLayoutDescriptor,
        render_pass: Option<RenderPassHandle>,
        state: PipelineState,
    ) -> Result<Handle<K>, GraphicsError> {
        self.check_alive()?;
        let compiled = self.shaders.compile(label.as_str(), program)?;

        let result = self.live_tables().and_then(|mut tables| {
            tables.construct_pipeline::<K>(label, &compiled, layout, render_pass, state)
        });
        match result {
            Ok(lookup) if !lookup.existed => {
                log::debug!("Created {:?} {}", lookup.handle, label);
                Ok(lookup.handle)
            }
            Ok(lookup) => {
                self.shaders.release(&compiled);
                Ok(lookup.handle)
            }
            Err(e) => {
                self.shaders.release(&compiled);
                Err(e)
            }
        }
    }
}

impl ResourceTables {
    /// Find or create a pipeline from compiled stages.
    ///
    /// A new pipeline takes over the module uses held by `compiled`; the
    /// caller gives them back otherwise.
    fn construct_pipeline<K: PipelineKind>(
        &mut self,
        label: &DebugLabel,
        compiled: &CompiledProgram,
        layout_desc: &PipelineLayoutDescriptor,
        render_pass: Option<RenderPassHandle>,
        state: PipelineState,
    ) -> Result<Lookup<K>, GraphicsError> {
        let layout = self.create_pipeline_layout(layout_desc)?;
        let unwind = |tables: &mut Self| {
            if let Some(pass) = render_pass {
                tables.release_dependency(pass);
            }
            tables.release_dependency(layout);
        };

        let pass_raw = match render_pass {
            Some(pass) => match self.render_passes.get(pass).map(|p| p.raw) {
                Some(raw) => {
                    self.render_passes.acquire_use(pass);
                    Some(raw)
                }
                None => {
                    self.release_dependency(layout);
                    return Err(stale(pass));
                }
            },
            None => None,
        };

        let prepared = self.pipeline_inputs(compiled, layout);
        let (layout_raw, stages) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                unwind(self);
                return Err(e);
            }
        };

        let key = PipelineKey {
            layout,
            render_pass,
            stages: compiled.stages.clone(),
            state,
        };
        let device = Arc::clone(&self.device);
        let result = K::cache(self).find_or_add(key, |key| {
            let raw = device.create_pipeline(&PipelineCreateInfo {
                label: label.as_str(),
                layout: layout_raw,
                render_pass: pass_raw,
                stages,
                state: &key.state,
            })?;
            Ok(PipelineResource {
                raw,
                layout,
                render_pass,
                modules: compiled.modules().collect(),
                label: label.clone(),
            })
        });

        match result {
            Ok(lookup) if !lookup.existed => Ok(lookup),
            Ok(lookup) => {
                unwind(self);
                Ok(lookup)
            }
            Err(e) => {
                unwind(self);
                Err(e.into())
            }
        }
    }

    fn pipeline_inputs(
        &self,
        compiled: &CompiledProgram,
        layout: PipelineLayoutHandle,
    ) -> Result<(RawPipelineLayout, Vec<PipelineStageInfo>), GraphicsError> {
        let layout_raw = self
            .pipeline_layouts
            .get(layout)
            .ok_or_else(|| stale(layout))?
            .raw;
        let stages = compiled
            .stages
            .iter()
            .map(|stage| {
                self.shader_modules
                    .get(stage.module)
                    .map(|module| PipelineStageInfo {
                        stage: stage.stage,
                        module: module.raw,
                        entry_point: stage.entry_point.clone(),
                    })
                    .ok_or_else(|| stale(stage.module))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok((layout_raw, stages))
    }
}
