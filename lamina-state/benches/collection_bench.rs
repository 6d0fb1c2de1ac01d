//! Benchmarks for collection reconciliation and the dynamic combinators

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use lamina_state::{ChildSources, Collection, Selector, SinkBundle, StateSource};
use lamina_stream::Stream;
use lamina_types::{Key, Value};
use serde_json::json;

struct Row {
    label: Stream<String>,
}

impl SinkBundle<Value> for Row {}

fn row(sources: ChildSources<Value, Key, ()>) -> Row {
    Row {
        label: sources
            .state
            .stream()
            .map(|item: Value| item["title"].as_str().unwrap_or_default().to_string()),
    }
}

/// Helper to build `n` items with keys starting at `offset`
fn items(n: usize, offset: usize, tag: &str) -> Vec<Value> {
    (0..n)
        .map(|i| json!({"key": i + offset, "title": format!("{tag} {i}")}))
        .collect()
}

fn setup(name: &str) -> (Stream<Option<Vec<Value>>>, Collection<Value, Key, Row>) {
    let list: Stream<Option<Vec<Value>>> = Stream::create();
    let collection = StateSource::with_dedupe(&list, name, false).as_collection(row, ());
    (list, collection)
}

fn labels() -> Selector<Row, String> {
    Selector::new("label", |r: &Row| Some(r.label.clone()))
}

fn bench_reconcile_unchanged(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile_unchanged");
    for size in [10, 100, 1000] {
        let (list, collection) = setup("unchanged");
        let (_snapshots, _sub) = collection.instances().collect();
        let array = items(size, 0, "item");
        list.send_next(Some(array.clone()));

        group.bench_with_input(BenchmarkId::from_parameter(size), &array, |b, array| {
            b.iter(|| list.send_next(Some(black_box(array.clone()))))
        });
    }
    group.finish();
}

fn bench_reconcile_reversed(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile_reversed");
    for size in [10, 100, 1000] {
        let (list, collection) = setup("reversed");
        let (_snapshots, _sub) = collection.instances().collect();
        let forward = items(size, 0, "item");
        let mut backward = forward.clone();
        backward.reverse();

        group.bench_function(BenchmarkId::from_parameter(size), |b| {
            b.iter(|| {
                list.send_next(Some(forward.clone()));
                list.send_next(Some(black_box(backward.clone())));
            })
        });
    }
    group.finish();
}

fn bench_reconcile_churn(c: &mut Criterion) {
    let (list, collection) = setup("churn");
    let (_snapshots, _sub) = collection.instances().collect();
    let first = items(100, 0, "old");
    let second = items(100, 100, "new");

    c.bench_function("reconcile_full_churn_100", |b| {
        b.iter(|| {
            list.send_next(Some(first.clone()));
            list.send_next(Some(black_box(second.clone())));
        })
    });
}

fn bench_pick_combine_item_update(c: &mut Criterion) {
    let (list, collection) = setup("combine");
    let (combined, _sub) = collection.pick_combine(labels()).collect();
    let before = items(100, 0, "before");
    let mut after = before.clone();
    after[50]["title"] = json!("changed");

    c.bench_function("pick_combine_one_item_update_100", |b| {
        b.iter(|| {
            list.send_next(Some(before.clone()));
            list.send_next(Some(black_box(after.clone())));
            combined.clear();
        })
    });
}

fn bench_pick_merge_fan_in(c: &mut Criterion) {
    let (list, collection) = setup("merge");
    let (merged, _sub) = collection.pick_merge(labels()).collect();

    c.bench_function("pick_merge_rebuild_100", |b| {
        b.iter(|| {
            list.send_next(Some(Vec::new()));
            list.send_next(Some(black_box(items(100, 0, "item"))));
            merged.clear();
        })
    });
}

criterion_group!(
    benches,
    bench_reconcile_unchanged,
    bench_reconcile_reversed,
    bench_reconcile_churn,
    bench_pick_combine_item_update,
    bench_pick_merge_fan_in
);
criterion_main!(benches);
