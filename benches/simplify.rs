//! Simplifier and store view performance.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use iotpulse_lib::series::{
    simplify_to_max_points, KeyedSample, Sample, SimplifyOptions, StoreOptions, TimeSeriesStore,
};
use std::time::Duration;

fn wave(n: usize) -> Vec<Sample> {
    (0..n)
        .map(|i| {
            let x = i as f64;
            Sample::new(x * 100.0, (x / 200.0).sin() * 20.0 + ((i * 7919) % 97) as f64 / 50.0)
        })
        .collect()
}

fn bench_simplify(c: &mut Criterion) {
    let mut group = c.benchmark_group("simplify_to_max_points");

    for n in [1_000, 10_000, 100_000] {
        let samples = wave(n);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &samples, |b, samples| {
            b.iter(|| simplify_to_max_points(black_box(samples), SimplifyOptions::default()))
        });
    }

    group.finish();
}

fn bench_store_append(c: &mut Criterion) {
    let batches: Vec<Vec<KeyedSample>> = wave(10_000)
        .chunks(10)
        .map(|chunk| {
            chunk
                .iter()
                .flat_map(|s| {
                    [
                        KeyedSample::new("Temperature", s.time, s.value),
                        KeyedSample::new("Humidity", s.time, s.value * 2.0),
                    ]
                })
                .collect()
        })
        .collect();

    c.bench_function("store_append_10k", |b| {
        b.iter(|| {
            let mut store = TimeSeriesStore::new(StoreOptions::default());
            for batch in &batches {
                store.update_data(Some(batch.clone()));
            }
            black_box(store.sample_count())
        })
    });

    let mut store = TimeSeriesStore::new(StoreOptions::default());
    for batch in &batches {
        store.update_data(Some(batch.clone()));
    }
    c.bench_function("store_memoized_view", |b| {
        b.iter(|| black_box(store.calculate_simplified_data(&["Temperature", "Humidity"])))
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .sample_size(50)
        .measurement_time(Duration::from_secs(5));
    targets = bench_simplify, bench_store_append
}

criterion_main!(benches);
