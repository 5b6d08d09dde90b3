//! Benchmarks for map generation, routing and catalog matching

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use caddymate::map::StoreMap;
use caddymate::store::Item;
use caddymate::store::search::best_match;

fn bench_generate_map(c: &mut Criterion) {
    let mut group = c.benchmark_group("generate_map");
    for aisles in [8u32, 16, 32] {
        group.bench_with_input(BenchmarkId::from_parameter(aisles), &aisles, |b, &n| {
            b.iter(|| black_box(StoreMap::generate(n, 2)));
        });
    }
    group.finish();
}

fn bench_route_to_aisle(c: &mut Criterion) {
    let mut group = c.benchmark_group("route_to_aisle");
    let map = StoreMap::generate(16, 2);
    // Farthest aisle from the entrance corner
    group.bench_function("entrance_to_aisle_16", |b| {
        b.iter(|| black_box(map.route_to_aisle((2, 2), 16).unwrap()));
    });
    group.bench_function("entrance_to_aisle_1", |b| {
        b.iter(|| black_box(map.route_to_aisle((2, 2), 1).unwrap()));
    });
    group.finish();
}

fn bench_catalog_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("catalog_search");
    let items: Vec<Item> = (0..500)
        .map(|i| Item {
            name: format!("item number {i}"),
            aisle: (i % 16 + 1).to_string(),
        })
        .collect();

    group.bench_function("exact_500_items", |b| {
        b.iter(|| black_box(best_match(&items, "item number 250")));
    });
    group.bench_function("fuzzy_500_items", |b| {
        b.iter(|| black_box(best_match(&items, "item numbre 250")));
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_generate_map,
    bench_route_to_aisle,
    bench_catalog_search
);
criterion_main!(benches);
