use std::sync::Arc;

use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};

use keel_graphics::types::{AddressMode, ComputePipelineDescriptor};
use keel_graphics::{
    BufferDescriptor, BufferUsage, CompilerRegistry, DescriptorSetDescriptor,
    DescriptorSetLayoutDescriptor, DummyDevice, ManagerConfig, MemoryLocation,
    PipelineLayoutDescriptor, ResourceManager, SamplerDescriptor, ShaderCode, ShaderProgram,
    ShaderStage, StagingClass,
};

fn manager() -> Arc<ResourceManager> {
    ResourceManager::new(
        Arc::new(DummyDevice::new()),
        CompilerRegistry::new(),
        ManagerConfig::default()
            .with_assert_on_leaks(false)
            .with_gc_min_age(0),
    )
}

// ---------------------------------------------------------------------------
// Caches
// ---------------------------------------------------------------------------

fn bench_sampler_hit(c: &mut Criterion) {
    let manager = manager();
    let desc = SamplerDescriptor::linear().with_address_mode(AddressMode::Repeat);
    let held = manager.create_sampler(&desc);

    c.bench_function("sampler_find_or_add_hit", |b| {
        b.iter(|| {
            let sampler = manager.create_sampler(black_box(&desc));
            manager.release(sampler);
        });
    });
    manager.release(held);
}

fn bench_descriptor_set(c: &mut Criterion) {
    let manager = manager();
    let layout = manager
        .create_descriptor_set_layout(&DescriptorSetLayoutDescriptor::new().with_uniform_buffer(0));
    let desc = BufferDescriptor::new(1024, BufferUsage::UNIFORM);
    let buffer = manager.create_buffer(&desc, &desc.memory(MemoryLocation::CpuToGpu));
    let remembered = DescriptorSetDescriptor::new(layout).with_buffer(0, buffer, 0, 256);

    let mut group = c.benchmark_group("descriptor_set");
    group.bench_function("remembered", |b| {
        b.iter(|| {
            let set = manager.create_descriptor_set(black_box(&remembered));
            manager.release(set);
        });
    });
    group.bench_function("hashed", |b| {
        b.iter(|| {
            let fresh = DescriptorSetDescriptor::new(layout).with_buffer(0, buffer, 0, 256);
            let set = manager.create_descriptor_set(black_box(&fresh));
            manager.release(set);
        });
    });
    group.finish();
}

fn bench_pipeline_hit(c: &mut Criterion) {
    let manager = manager();
    let module = manager.create_shader_module(&[0x0723_0203, 0x0001_0300, 0, 1, 0]);
    let program = ShaderProgram::new().with_stage(
        ShaderStage::Compute,
        "main",
        vec![ShaderCode::Module(module)],
    );
    let desc = ComputePipelineDescriptor::new(program, PipelineLayoutDescriptor::new());
    let held = manager.create_compute_pipeline(&desc);

    c.bench_function("compute_pipeline_cache_hit", |b| {
        b.iter(|| {
            let pipeline = manager.create_compute_pipeline(black_box(&desc));
            manager.release(pipeline);
        });
    });
    manager.release(held);
}

// ---------------------------------------------------------------------------
// Pools
// ---------------------------------------------------------------------------

fn bench_buffer_create_release(c: &mut Criterion) {
    let manager = manager();
    let desc = BufferDescriptor::new(4096, BufferUsage::VERTEX | BufferUsage::COPY_DST);
    let memory = desc.memory(MemoryLocation::GpuOnly);

    c.bench_function("buffer_create_release", |b| {
        b.iter(|| {
            let buffer = manager.create_buffer(black_box(&desc), &memory);
            manager.release(buffer);
        });
    });
}

fn bench_staging_recycle(c: &mut Criterion) {
    let manager = manager();

    c.bench_function("staging_allocate_release", |b| {
        b.iter(|| {
            if let Some(block) = manager.allocate_staging(black_box(StagingClass::Uniform)) {
                manager.release_staging(block.index);
            }
        });
    });
}

// ---------------------------------------------------------------------------
// Maintenance
// ---------------------------------------------------------------------------

fn bench_collect_garbage(c: &mut Criterion) {
    c.bench_function("collect_garbage_1k_samplers", |b| {
        b.iter_batched(
            || {
                let manager = manager();
                for i in 0..1000u16 {
                    let sampler = manager
                        .create_sampler(&SamplerDescriptor::nearest().with_anisotropy(i + 1));
                    if i % 2 == 0 {
                        manager.release(sampler);
                    }
                }
                manager
            },
            |manager| black_box(manager.collect_garbage(1024)),
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(
    benches,
    bench_sampler_hit,
    bench_descriptor_set,
    bench_pipeline_hit,
    bench_buffer_create_release,
    bench_staging_recycle,
    bench_collect_garbage,
);
criterion_main!(benches);
