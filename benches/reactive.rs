//! Benchmarks for transparent-reactive
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use transparent_reactive::{autorun, observable, ComputedValue, SharedState, SharedStateConfig};

// =============================================================================
// OBSERVABLE VALUE BENCHMARKS
// =============================================================================

fn bench_observable_create(c: &mut Criterion) {
    c.bench_function("observable_create", |b| {
        b.iter(|| black_box(observable(0i32)))
    });
}

fn bench_observable_get(c: &mut Criterion) {
    let v = observable(42i32);
    c.bench_function("observable_get", |b| b.iter(|| black_box(v.get())));
}

fn bench_observable_set(c: &mut Criterion) {
    let v = observable(0i32);
    c.bench_function("observable_set", |b| b.iter(|| v.set(black_box(42)).unwrap()));
}

fn bench_observable_set_same_value(c: &mut Criterion) {
    let v = observable(42i32);
    c.bench_function("observable_set_same_value", |b| b.iter(|| v.set(black_box(42)).unwrap()));
}

// =============================================================================
// COMPUTED VALUE BENCHMARKS
// =============================================================================

fn bench_computed_create(c: &mut Criterion) {
    let shared = SharedState::new(SharedStateConfig::default());
    let v = observable(0i32);
    c.bench_function("computed_create", |b| {
        b.iter(|| {
            let v = v.clone();
            black_box(ComputedValue::new(&shared, "bench", move || v.get() * 2))
        })
    });
}

fn bench_computed_get_cached(c: &mut Criterion) {
    let shared = SharedState::new(SharedStateConfig::default());
    let v = observable(42i32);
    let v2 = v.clone();
    let comp = ComputedValue::new(&shared, "cached", move || v2.get() * 2);
    let _ = comp.get();

    c.bench_function("computed_get_cached", |b| b.iter(|| black_box(comp.get().unwrap())));
}

fn bench_computed_get_stale(c: &mut Criterion) {
    let shared = SharedState::new(SharedStateConfig::default());
    let v = observable(0i32);
    let v2 = v.clone();
    let comp = ComputedValue::new(&shared, "stale", move || v2.get() * 2);

    let mut i = 0i32;
    c.bench_function("computed_get_stale", |b| {
        b.iter(|| {
            v.set(i).unwrap();
            i += 1;
            black_box(comp.get().unwrap())
        })
    });
}

fn bench_computed_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("computed_chain");

    for depth in [1, 5, 10, 20] {
        group.bench_with_input(BenchmarkId::new("depth", depth), &depth, |b, &depth| {
            let shared = SharedState::new(SharedStateConfig::default());
            let v = observable(1i32);

            let v2 = v.clone();
            let mut current = ComputedValue::new(&shared, "link-0", move || v2.get() + 1);

            for i in 1..depth {
                let prev = current.clone();
                current = ComputedValue::new(&shared, format!("link-{i}"), move || prev.get().unwrap() + 1);
            }

            b.iter(|| {
                v.set(black_box(1)).unwrap();
                black_box(current.get().unwrap())
            })
        });
    }

    group.finish();
}

// =============================================================================
// REACTION BENCHMARKS
// =============================================================================

fn bench_autorun_create(c: &mut Criterion) {
    let shared = SharedState::new(SharedStateConfig::default());
    c.bench_function("autorun_create", |b| {
        b.iter(|| black_box(autorun(&shared, "bench", || {})))
    });
}

fn bench_autorun_trigger(c: &mut Criterion) {
    let shared = SharedState::new(SharedStateConfig::default());
    let v = observable(0i32);
    let v2 = v.clone();
    let _disposer = autorun(&shared, "trigger", move || {
        black_box(v2.get());
    });

    let mut i = 0i32;
    c.bench_function("autorun_trigger", |b| {
        b.iter(|| {
            v.set(i).unwrap();
            i += 1;
        })
    });
}

fn bench_autorun_multiple_deps(c: &mut Criterion) {
    let shared = SharedState::new(SharedStateConfig::default());
    let a = observable(0i32);
    let b_obs = observable(0i32);
    let c_obs = observable(0i32);

    let a2 = a.clone();
    let b2 = b_obs.clone();
    let c2 = c_obs.clone();
    let _disposer = autorun(&shared, "multi", move || {
        black_box(a2.get() + b2.get() + c2.get());
    });

    let mut i = 0i32;
    c.bench_function("autorun_multiple_deps", |b| {
        b.iter(|| {
            a.set(i).unwrap();
            i += 1;
        })
    });
}

// =============================================================================
// BATCH BENCHMARKS
// =============================================================================

fn bench_batch_updates(c: &mut Criterion) {
    let shared = SharedState::new(SharedStateConfig::default());
    let v = observable(0i32);
    let v2 = v.clone();
    let _disposer = autorun(&shared, "batched", move || {
        black_box(v2.get());
    });

    c.bench_function("batch_10_updates", |b| {
        b.iter(|| {
            shared.batch(|| {
                for i in 0..10 {
                    v.set(black_box(i)).unwrap();
                }
            })
        })
    });
}

// =============================================================================
// STRESS TESTS
// =============================================================================

fn bench_many_observables(c: &mut Criterion) {
    let mut group = c.benchmark_group("many_observables");

    for count in [100, 1000, 10000] {
        group.bench_with_input(BenchmarkId::new("create", count), &count, |b, &count| {
            b.iter(|| {
                let values: Vec<_> = (0..count).map(observable).collect();
                black_box(values)
            })
        });
    }

    group.finish();
}

fn bench_many_reactions(c: &mut Criterion) {
    let mut group = c.benchmark_group("many_reactions");

    for count in [10, 100, 500] {
        group.bench_with_input(BenchmarkId::new("trigger", count), &count, |b, &count| {
            let shared = SharedState::new(SharedStateConfig::default());
            let v = observable(0i32);

            let disposers: Vec<_> = (0..count)
                .map(|_| {
                    let v = v.clone();
                    autorun(&shared, "stress", move || {
                        black_box(v.get());
                    })
                })
                .collect();

            let mut i = 0i32;
            b.iter(|| {
                v.set(i).unwrap();
                i += 1;
            });

            for d in disposers {
                d.dispose();
            }
        });
    }

    group.finish();
}

criterion_group!(
    observable_benches,
    bench_observable_create,
    bench_observable_get,
    bench_observable_set,
    bench_observable_set_same_value,
);

criterion_group!(
    computed_benches,
    bench_computed_create,
    bench_computed_get_cached,
    bench_computed_get_stale,
    bench_computed_chain,
);

criterion_group!(
    reaction_benches,
    bench_autorun_create,
    bench_autorun_trigger,
    bench_autorun_multiple_deps,
    bench_batch_updates,
);

criterion_group!(stress_benches, bench_many_observables, bench_many_reactions);

criterion_main!(observable_benches, computed_benches, reaction_benches, stress_benches);
