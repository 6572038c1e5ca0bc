//! Benchmarks for scheduling and validation.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;
use std::collections::BTreeSet;

use coursegen::course::{schemas, CourseBlueprint};
use coursegen::schema::SchemaValidator;

fn ready_set_benchmark(c: &mut Criterion) {
    let definition = CourseBlueprint::new(24)
        .definition("bench")
        .expect("blueprint builds");
    let graph = definition.graph();
    let half: BTreeSet<String> = graph
        .execution_order()
        .into_iter()
        .take(definition.len() / 2)
        .collect();

    c.bench_function("ready_set_empty", |b| {
        b.iter(|| black_box(graph.ready_set(black_box(&BTreeSet::new()))));
    });
    c.bench_function("ready_set_half_done", |b| {
        b.iter(|| black_box(graph.ready_set(black_box(&half))));
    });
}

fn validation_benchmark(c: &mut Criterion) {
    let validator = SchemaValidator::new();
    let schema = schemas::lessons();
    let output = json!({
        "lessons": (0..20)
            .map(|i| json!({ "order": i, "title": format!("Lesson {i}"), "content": "text" }))
            .collect::<Vec<_>>()
    });

    c.bench_function("validate_lessons", |b| {
        b.iter(|| black_box(validator.validate(black_box(output.clone()), &schema)));
    });
}

criterion_group!(benches, ready_set_benchmark, validation_benchmark);
criterion_main!(benches);
