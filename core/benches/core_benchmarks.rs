use criterion::{Criterion, black_box, criterion_group, criterion_main};

use keel_core::cache::{Cache, GcCursor};
use keel_core::handle::ResourceKind;
use keel_core::pool::Pool;

enum Bench {}
impl ResourceKind for Bench {
    const NAME: &'static str = "bench";
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

fn bench_pool_insert_release(c: &mut Criterion) {
    c.bench_function("pool_insert_release_1k", |b| {
        let mut pool = Pool::<Bench, u64>::new();
        b.iter(|| {
            let handles: Vec<_> = (0..1000u64)
                .map(|i| pool.insert(black_box(i)).unwrap())
                .collect();
            for h in handles {
                black_box(pool.release(h));
            }
        });
    });
}

fn bench_pool_lookup(c: &mut Criterion) {
    let mut pool = Pool::<Bench, u64>::new();
    let handles: Vec<_> = (0..4096u64).map(|i| pool.insert(i).unwrap()).collect();

    c.bench_function("pool_get_4k", |b| {
        b.iter(|| {
            let mut sum = 0;
            for h in &handles {
                sum += pool.get(black_box(*h)).copied().unwrap_or(0);
            }
            black_box(sum)
        });
    });
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

fn bench_cache_hit(c: &mut Criterion) {
    let mut cache = Cache::<Bench, [u32; 8], u64>::new();
    for i in 0..256u32 {
        let _ = cache.find_or_add([i; 8], |_| Ok::<_, ()>(i as u64));
    }

    c.bench_function("cache_find_or_add_hit", |b| {
        b.iter(|| {
            let lookup = cache
                .find_or_add(black_box([17; 8]), |_| Ok::<_, ()>(0))
                .unwrap();
            cache.release_use(lookup.handle);
        });
    });
}

fn bench_cache_gc_sweep(c: &mut Criterion) {
    c.bench_function("cache_gc_sweep_1k", |b| {
        b.iter_batched(
            || {
                let mut cache = Cache::<Bench, u32, u32>::new();
                for i in 0..1000u32 {
                    if let Ok(lookup) = cache.find_or_add(i, |k| Ok::<_, ()>(*k)) {
                        if i % 2 == 0 {
                            cache.release_use(lookup.handle);
                        }
                    }
                }
                cache
            },
            |mut cache| {
                let mut cursor = GcCursor::new();
                black_box(cache.garbage_collect(&mut cursor, 1000, |e| e.is_cache_only()))
            },
            criterion::BatchSize::SmallInput,
        );
    });
}

criterion_group!(
    benches,
    bench_pool_insert_release,
    bench_pool_lookup,
    bench_cache_hit,
    bench_cache_gc_sweep,
);
criterion_main!(benches);
