//! Benchmarks for reconciliation hot paths.
//!
//! Catalogs mirror codebases with a few thousand resources; classification
//! and tree building run on every refresh.

#![allow(missing_docs)]

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use mirror_catalog::delta::{Archival, classify};
use mirror_catalog::reconcile::{Reconcilable, Scope, plan};
use mirror_catalog::snapshot::catalog_tree;
use mirror_catalog::store::{CatalogTables, RowOp, Table};
use mirror_catalog::{ExtractedField, ExtractedResource, Field, Resource, SourceSystem};

fn extracted(i: usize) -> ExtractedResource {
    let name = format!("app.module{}.Model{i}", i % 17);
    ExtractedResource {
        name: name.clone(),
        resource_type: "table".into(),
        app: "app".into(),
        source_system: SourceSystem::Postgres,
        source_link: None,
        description: Some(format!("model {i}")),
        primary_key: Some("id".into()),
        fields: (0..8)
            .map(|f| ExtractedField {
                name: format!("{name}.f{f}"),
                field_type: "varchar".into(),
                resource_name: name.clone(),
                is_primary_key: f == 0,
                is_virtual: false,
                description: None,
                metadata: Vec::new(),
            })
            .collect(),
        relationships: Vec::new(),
    }
}

fn stored(size: usize) -> Vec<Resource> {
    (0..size).map(|i| extracted(i).to_row()).collect()
}

fn bench_classify(c: &mut Criterion) {
    let mut group = c.benchmark_group("classify");
    for size in [100, 1_000, 5_000] {
        let previous = stored(size);
        // A tenth of the catalog churns each refresh.
        let next: Vec<ExtractedResource> = (size / 10..size + size / 10).map(extracted).collect();

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                classify(
                    black_box(previous.clone()),
                    black_box(next.clone()),
                    Archival::Soft,
                )
            });
        });
    }
    group.finish();
}

fn bench_plan_unchanged(c: &mut Criterion) {
    let mut table = Table::empty();
    let ops: Vec<RowOp<Resource>> = stored(1_000).into_iter().map(RowOp::Insert).collect();
    table.apply(&ops).expect("fresh table");
    let next: Vec<ExtractedResource> = (0..1_000).map(extracted).collect();

    c.bench_function("plan_unchanged_1000", |b| {
        b.iter(|| plan(black_box(&table), black_box(next.clone()), &Scope::All));
    });
}

fn bench_catalog_tree(c: &mut Criterion) {
    let resources: Vec<ExtractedResource> = (0..1_000).map(extracted).collect();
    let tables = CatalogTables {
        fields: resources
            .iter()
            .flat_map(|r| r.fields.iter().map(Reconcilable::to_row))
            .collect::<Vec<Field>>(),
        resources: resources.iter().map(Reconcilable::to_row).collect(),
        ..CatalogTables::default()
    };

    c.bench_function("catalog_tree_1000x8", |b| {
        b.iter(|| catalog_tree(black_box(&tables)));
    });
}

criterion_group!(benches, bench_classify, bench_plan_unchanged, bench_catalog_tree);
criterion_main!(benches);
