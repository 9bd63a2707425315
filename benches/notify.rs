use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::{json, Map, Value};

use kyrostate::{Listener, Store, UpdateOptions};

/// Store with `fields` top-level counters and one observed selector per field.
fn make_store(fields: usize) -> Store {
    let mut doc = Map::new();
    for i in 0..fields {
        doc.insert(format!("f{i}"), json!(0));
    }
    let store = Store::new(Value::Object(doc)).unwrap();
    for i in 0..fields {
        let selector = store.select(json!({ format!("f{i}"): 1 }), Value::Null).unwrap();
        selector.listen(&Listener::new(|v| {
            black_box(v);
            Ok(())
        }))
        .unwrap();
    }
    store
}

fn bench_targeted_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("notify/targeted_update");
    for fields in [16_usize, 256] {
        let store = make_store(fields);
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(fields), &store, |b, store| {
            let mut n = 0_i64;
            b.iter(|| {
                n += 1;
                black_box(store.update(&json!({"$set": {"f0": n}})).unwrap())
            });
        });
    }
    group.finish();
}

fn bench_array_filter_update(c: &mut Criterion) {
    let items: Vec<Value> = (0..128).map(|i| json!({"id": i, "qty": 0})).collect();
    let store = Store::new(json!({ "items": items })).unwrap();
    let opts = UpdateOptions::new().array_filter(json!({"it.id": {"$lt": 64}}));
    c.bench_function("notify/array_filter_inc", |b| {
        b.iter(|| black_box(store.update_with(&json!({"$inc": {"items.$[it].qty": 1}}), &opts).unwrap()));
    });
}

fn bench_select_memoized(c: &mut Criterion) {
    let store = make_store(64);
    c.bench_function("notify/select_memoized", |b| {
        b.iter(|| black_box(store.select(json!({"f10": 1}), Value::Null).unwrap()));
    });
}

criterion_group!(notify, bench_targeted_update, bench_array_filter_update, bench_select_memoized);
criterion_main!(notify);
