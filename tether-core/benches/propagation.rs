//! Benchmarks for trigger propagation
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tether_core::{Runtime, Target, Value};

// =============================================================================
// REF BENCHMARKS
// =============================================================================

fn bench_ref_get(c: &mut Criterion) {
    let rt = Runtime::new();
    let r = rt.create_ref(42);
    c.bench_function("ref_get", |b| b.iter(|| black_box(r.get())));
}

fn bench_ref_set_same_value(c: &mut Criterion) {
    let rt = Runtime::new();
    let r = rt.create_ref(42);
    c.bench_function("ref_set_same_value", |b| b.iter(|| r.set(black_box(42))));
}

fn bench_ref_effect_trigger(c: &mut Criterion) {
    let rt = Runtime::new();
    let r = rt.create_ref(0);
    let r_clone = r.clone();
    let _e = rt.effect(move || {
        black_box(r_clone.get());
    });

    let mut i = 0i64;
    c.bench_function("ref_effect_trigger", |b| {
        b.iter(|| {
            r.set(i);
            i += 1;
        })
    });
}

// =============================================================================
// CONTAINER BENCHMARKS
// =============================================================================

fn bench_container_get_tracked(c: &mut Criterion) {
    let rt = Runtime::new();
    let o = rt.wrap(&Target::object([("a", 1)]));
    let o_clone = o.clone();
    let effect = rt.effect_with(
        move || {
            black_box(o_clone.get("a").ok());
        },
        tether_core::EffectOptions::new().lazy(),
    );

    c.bench_function("container_get_tracked", |b| b.iter(|| effect.run()));
}

fn bench_container_set_in_transaction(c: &mut Criterion) {
    let rt = Runtime::new();
    let o = rt.wrap(&Target::object([("a", 0)]));
    let o_clone = o.clone();
    let _e = rt.effect(move || {
        black_box(o_clone.get("a").ok());
    });

    let mut i = 0i64;
    c.bench_function("container_set_in_transaction", |b| {
        b.iter(|| {
            rt.transaction(|| o.set("a", i)).ok();
            i += 1;
        })
    });
}

fn bench_array_push(c: &mut Criterion) {
    let rt = Runtime::new();
    let list = rt.wrap(&Target::array(Vec::<Value>::new()));
    let list_clone = list.clone();
    let _e = rt.effect(move || {
        black_box(list_clone.len());
    });

    c.bench_function("array_push", |b| {
        b.iter(|| {
            rt.transaction(|| {
                list.push(1).ok();
                list.pop().ok();
            })
        })
    });
}

// =============================================================================
// FAN-OUT
// =============================================================================

fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out");

    for count in [10, 100, 1000] {
        let rt = Runtime::new();
        let o = rt.wrap(&Target::object([("a", 0)]));
        let effects: Vec<_> = (0..count)
            .map(|_| {
                let o = o.clone();
                rt.effect(move || {
                    black_box(o.get("a").ok());
                })
            })
            .collect();

        let mut i = 0i64;
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| {
                rt.transaction(|| o.set("a", i)).ok();
                i += 1;
            })
        });
        drop(effects);
    }

    group.finish();
}

fn bench_produce(c: &mut Criterion) {
    let rt = Runtime::new();
    let doc = rt.wrap(&Target::object([("title", "draft")]));

    let mut i = 0i64;
    c.bench_function("produce_single_write", |b| {
        b.iter(|| {
            let patches = rt.produce(|| {
                doc.set("title", i).ok();
            });
            i += 1;
            black_box(patches)
        })
    });
}

criterion_group!(
    ref_benches,
    bench_ref_get,
    bench_ref_set_same_value,
    bench_ref_effect_trigger,
);

criterion_group!(
    container_benches,
    bench_container_get_tracked,
    bench_container_set_in_transaction,
    bench_array_push,
    bench_produce,
);

criterion_group!(stress_benches, bench_fan_out);

criterion_main!(ref_benches, container_benches, stress_benches);
