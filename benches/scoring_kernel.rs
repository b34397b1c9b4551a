use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use riskflow_worker::kernel::composite_score;
use riskflow_worker::model::Neighbour;

fn neighbours(n: usize) -> Vec<Neighbour> {
    (0..n)
        .map(|i| Neighbour {
            id: format!("n{i}"),
            distance: (i as f64) / (n as f64),
            label: Some((i % 2) as i8),
        })
        .collect()
}

fn benchmark_composite_score(c: &mut Criterion) {
    let rows = neighbours(10);
    c.bench_function("composite_score_10_neighbours", |b| {
        b.iter(|| {
            let score = composite_score(black_box(&rows));
            black_box(score);
        });
    });
}

fn benchmark_composite_score_empty(c: &mut Criterion) {
    let rows: Vec<Neighbour> = Vec::new();
    c.bench_function("composite_score_no_anchor", |b| {
        b.iter(|| {
            let score = composite_score(black_box(&rows));
            black_box(score);
        });
    });
}

criterion_group!(benches, benchmark_composite_score, benchmark_composite_score_empty);
criterion_main!(benches);
