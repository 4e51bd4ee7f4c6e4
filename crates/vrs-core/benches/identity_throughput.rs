use criterion::{criterion_group, criterion_main, Criterion};
use vrs_core::{compute_identifier, Metadata};

fn make_snapshot(entries: usize) -> Metadata {
    (0..entries)
        .map(|idx| (format!("input_{idx:03}"), format!("value-{}", idx * 7919)))
        .collect()
}

fn bench_identity(c: &mut Criterion) {
    let small = make_snapshot(8);
    let large = make_snapshot(512);
    c.bench_function("identity_small_snapshot", |b| {
        b.iter(|| compute_identifier("Bench", &small, 1));
    });
    c.bench_function("identity_large_snapshot", |b| {
        b.iter(|| compute_identifier("Bench", &large, 1));
    });
}

criterion_group!(benches, bench_identity);
criterion_main!(benches);
