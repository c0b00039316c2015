//! Throughput of the registration building blocks on synthetic frames.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use fiducial_align::*;
use ndarray::{Array2, Array3};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

fn noisy_scene(size: usize, seed: u64) -> MultiChannelImage {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(200.0, 15.0).expect("valid noise parameters");
    let spacing = size as f64 / 8.0;
    let sources: Vec<(f64, f64)> = (1..8)
        .flat_map(|i| (1..8).map(move |j| (spacing * i as f64 + 0.3, spacing * j as f64 - 0.2)))
        .collect();

    Array3::from_shape_fn((size, size, 3), |(r, c, _)| {
        let signal: f64 = sources
            .iter()
            .map(|&(x, y)| {
                let d2 = (c as f64 - x).powi(2) + (r as f64 - y).powi(2);
                3000.0 * (-d2 / 8.0).exp()
            })
            .sum();
        (signal + noise.sample(&mut rng)).clamp(0.0, u16::MAX as f64) as u16
    })
}

fn bench_phase_correlation(c: &mut Criterion) {
    let mut group = c.benchmark_group("phase_correlation");
    group.sample_size(10);

    for size in [128, 256, 512] {
        let reference = noisy_scene(size, 1);
        let moving = ImageTransformer::shift(&reference, (3.4, -6.7));
        group.bench_with_input(BenchmarkId::new("direct", size), &size, |b, _| {
            b.iter(|| phase_cross_correlation(black_box(&reference), black_box(&moving), 20))
        });

        let spectrum = ReferenceSpectrum::new(&reference).expect("non-empty reference");
        group.bench_with_input(BenchmarkId::new("cached_reference", size), &size, |b, _| {
            b.iter(|| spectrum.correlate(black_box(&moving), 20))
        });
    }

    group.finish();
}

fn bench_detection(c: &mut Criterion) {
    let mut group = c.benchmark_group("point_detection");
    group.sample_size(10);

    let image = noisy_scene(512, 2);
    let plane: Array2<f64> = image.index_axis(ndarray::Axis(2), 0).mapv(f64::from);
    let detector = PointDetector::default();

    group.bench_function("single_width", |b| {
        b.iter(|| detector.detect(black_box(&plane), 600.0, 5.0))
    });
    group.bench_function("width_search", |b| {
        b.iter(|| detector.find_fiducials(black_box(&plane), 600.0))
    });

    group.finish();
}

fn bench_projection(c: &mut Criterion) {
    let mut group = c.benchmark_group("stack_projection");
    group.sample_size(10);

    let stack: Vec<MultiChannelImage> = (0..9).map(|seed| noisy_scene(256, seed)).collect();
    for method in [ProjectionMethod::Median, ProjectionMethod::SigmaClipMean] {
        let config = ProjectionConfig {
            method,
            ..ProjectionConfig::default()
        };
        group.bench_function(method.to_string(), |b| {
            b.iter(|| project_stack(black_box(&stack), &config))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_phase_correlation, bench_detection, bench_projection);
criterion_main!(benches);
