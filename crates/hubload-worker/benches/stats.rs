//! Statistics benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use hubload_core::Timestamp;
use hubload_worker::stats::{compute, percentile};
use hubload_worker::SampleStore;
use std::time::Duration;

fn sorted_samples(n: usize) -> Vec<f64> {
    let mut values: Vec<f64> = (0..n).map(|i| ((i * 7919) % 10_000) as f64 / 100.0).collect();
    values.sort_unstable_by(f64::total_cmp);
    values
}

fn percentile_benchmark(c: &mut Criterion) {
    let values = sorted_samples(100_000);

    c.bench_function("percentile_p99_100k", |b| {
        b.iter(|| black_box(percentile(black_box(&values), 99.0)))
    });
}

fn compute_benchmark(c: &mut Criterion) {
    let mut store = SampleStore::new(100);
    for index in 0..100 {
        if let Some(mut samples) = store.take(index) {
            for i in 0..1_000u64 {
                samples.record_at(Timestamp::from_micros(0), Timestamp::from_micros(i * 37 % 5_000));
            }
            store.restore(samples);
        }
    }

    c.bench_function("snapshot_and_compute_100x1000", |b| {
        b.iter(|| {
            let snapshot = store.snapshot();
            black_box(compute(&snapshot, Duration::from_secs(30)))
        })
    });
}

criterion_group!(benches, percentile_benchmark, compute_benchmark);
criterion_main!(benches);
