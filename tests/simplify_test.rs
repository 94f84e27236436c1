//! Curve simplification tests.

mod common;

use common::assert_sorted_by_time;
use iotpulse_lib::series::{simplify, simplify_to_max_points, KeyedSample, Sample, SimplifyOptions};
use pretty_assertions::assert_eq;

fn noisy_wave(n: usize) -> Vec<Sample> {
    (0..n)
        .map(|i| {
            let x = i as f64;
            let noise = ((i * 7919) % 97) as f64 / 97.0;
            Sample::new(x * 100.0, (x / 50.0).sin() * 20.0 + noise)
        })
        .collect()
}

#[test]
fn test_large_input_lands_between_bounds() {
    let samples = noisy_wave(5_000);
    let out = simplify_to_max_points(&samples, SimplifyOptions::default());

    assert!(out.len() >= 200, "too few points: {}", out.len());
    assert!(out.len() <= 1000, "too many points: {}", out.len());
    assert_sorted_by_time(&out);
    assert_eq!(out.first(), samples.first());
    assert_eq!(out.last(), samples.last());
}

#[test]
fn test_strictly_monotonic_input_lands_between_bounds() {
    let samples: Vec<Sample> = (0..5_000)
        .map(|i| Sample::new(i as f64, (i as f64).sqrt()))
        .collect();
    let out = simplify_to_max_points(&samples, SimplifyOptions::default());

    assert!((200..=1000).contains(&out.len()), "got {} points", out.len());
    assert!(out.windows(2).all(|w| w[0].time < w[1].time && w[0].value < w[1].value));
    assert_eq!(out.first(), samples.first());
    assert_eq!(out.last(), samples.last());
}

#[test]
fn test_output_is_a_subsequence() {
    let samples = noisy_wave(3_000);
    let out = simplify_to_max_points(&samples, SimplifyOptions::new(300, 50));

    let mut rest = samples.iter();
    for kept in &out {
        assert!(rest.any(|s| s == kept), "{kept:?} not in input order");
    }
}

#[test]
fn test_short_input_unchanged() {
    let samples = noisy_wave(999);
    assert_eq!(simplify_to_max_points(&samples, SimplifyOptions::default()), samples);
}

#[test]
fn test_step_keeps_its_corners() {
    let samples: Vec<Sample> = (0..2_000)
        .map(|i| Sample::new(i as f64, if i < 1_000 { 0.0 } else { 10.0 }))
        .collect();
    let out = simplify(&samples, 0.01);

    assert!(out.contains(&samples[999]));
    assert!(out.contains(&samples[1_000]));
    assert!(out.len() <= 4);
}

#[test]
fn test_flat_series_is_stride_sampled() {
    let samples: Vec<Sample> = (0..5_000).map(|i| Sample::new(i as f64, 1.0)).collect();
    let out = simplify_to_max_points(&samples, SimplifyOptions::default());

    assert_eq!(out.len(), 200);
    assert_eq!(out.first(), samples.first());
    assert_eq!(out.last(), samples.last());
}

#[test]
fn test_keyed_samples_keep_their_key() {
    let samples: Vec<KeyedSample> = noisy_wave(2_000)
        .into_iter()
        .map(|s| KeyedSample::new("Temperature", s.time, s.value))
        .collect();
    let out = simplify_to_max_points(&samples, SimplifyOptions::for_target(500));

    assert!(out.len() <= 500);
    assert!(out.iter().all(|s| &*s.key == "Temperature"));
}
