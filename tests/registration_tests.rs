use fiducial_align::utils::estimate_affine_ransac;
use fiducial_align::*;
use nalgebra::Point2;
use ndarray::Array3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn render(rows: usize, cols: usize, sources: &[(f64, f64)]) -> MultiChannelImage {
    Array3::from_shape_fn((rows, cols, 3), |(r, c, _)| {
        let v: f64 = sources
            .iter()
            .map(|&(x, y)| {
                let d2 = (c as f64 - x).powi(2) + (r as f64 - y).powi(2);
                4000.0 * (-d2 / 8.0).exp()
            })
            .sum();
        v.round() as u16
    })
}

fn lattice(n: usize, origin: f64, spacing: f64) -> Vec<(f64, f64)> {
    let mut pts = Vec::with_capacity(n * n);
    for i in 0..n {
        for j in 0..n {
            pts.push((origin + spacing * i as f64, origin + spacing * j as f64));
        }
    }
    pts
}

fn seeded_config() -> Config {
    let mut config = Config::default();
    config.ransac.seed = Some(11);
    config
}

#[test]
fn test_ransac_recovers_affine_despite_outliers() {
    let truth = AffineTransform::from_params([1.01, -0.02, 3.5, 0.015, 0.99, -2.25]);
    let mut rng = StdRng::seed_from_u64(5);

    let src: Vec<Point2<f64>> = lattice(7, 10.0, 45.0)
        .into_iter()
        .map(|(x, y)| Point2::new(x, y))
        .collect();
    let mut dst: Vec<Point2<f64>> = src
        .iter()
        .map(|p| {
            let q = truth.apply(p);
            Point2::new(
                q.x + rng.gen_range(-0.05..0.05),
                q.y + rng.gen_range(-0.05..0.05),
            )
        })
        .collect();
    // Every fifth pair is a mismatch.
    for q in dst.iter_mut().step_by(5) {
        q.x += 1.2;
        q.y -= 0.9;
    }

    let config = RansacConfig {
        seed: Some(1),
        ..RansacConfig::default()
    };
    let result = estimate_affine_ransac(&src, &dst, &config).unwrap();

    for outlier in (0..src.len()).step_by(5) {
        assert!(!result.inliers.contains(&outlier));
    }
    assert!(result.inliers.len() >= src.len() - src.len().div_ceil(5));

    for corner in [(0.0, 0.0), (300.0, 0.0), (0.0, 300.0), (300.0, 300.0)] {
        let p = Point2::new(corner.0, corner.1);
        let err = (result.transform.apply(&p) - truth.apply(&p)).norm();
        assert!(err < 0.1, "corner {corner:?} off by {err}");
    }
}

#[test]
fn test_disjoint_point_sets_have_no_correspondence() {
    let reference = vec![Point2::new(0.0, 0.0), Point2::new(10.0, 0.0), Point2::new(0.0, 10.0)];
    let fit: Vec<Point2<f64>> = reference.iter().map(|p| Point2::new(p.x + 50.0, p.y)).collect();

    let err = nearest_neighbors_transform(&reference, &fit, Some(2.0), &RansacConfig::default())
        .unwrap_err();
    assert!(matches!(
        err,
        AlignError::InsufficientCorrespondence { found: 0, required: 3 }
    ));
}

#[test]
fn test_precision_needs_two_residuals() {
    assert!(matches!(
        dot_displacement(&[0.4]),
        Err(AlignError::InsufficientSample { found: 1, required: 2 })
    ));
    assert!(dot_displacement(&[0.4, 0.1, 0.2]).unwrap() > 0.0);
}

#[test]
fn test_integer_shift_end_to_end() {
    let reference = render(160, 160, &lattice(3, 40.0, 40.0));
    let moving = ImageTransformer::shift(&reference, (5.0, -7.0));

    let aligner = SingleImageAligner::new(&seeded_config());
    let outcome = aligner.align(&reference, &moving, "shifted").unwrap();

    assert!((outcome.shift.0 + 5.0).abs() < 1e-6);
    assert!((outcome.shift.1 - 7.0).abs() < 1e-6);

    for r in 20..140 {
        for c in 20..140 {
            for ch in 0..3 {
                let a = outcome.image[[r, c, ch]] as i32;
                let b = reference[[r, c, ch]] as i32;
                assert!((a - b).abs() <= 1, "pixel ({r}, {c}, {ch}): {a} vs {b}");
            }
        }
    }

    let report = outcome.report.unwrap();
    assert_eq!(report.channels.len(), 3);
    for row in &report.channels {
        assert!(row.precision < 1e-6);
        assert_eq!(row.improvement, 0.0);
    }
}

#[test]
fn test_small_rotation_is_corrected_per_channel() {
    let reference_points = lattice(5, 40.0, 30.0);
    let (angle, center) = (0.008_f64, 100.0);
    let (s, c) = angle.sin_cos();
    let moving_points: Vec<(f64, f64)> = reference_points
        .iter()
        .map(|&(x, y)| {
            let (dx, dy) = (x - center, y - center);
            (center + c * dx - s * dy + 3.0, center + s * dx + c * dy - 2.0)
        })
        .collect();

    let reference = render(200, 200, &reference_points);
    let moving = render(200, 200, &moving_points);

    let aligner = SingleImageAligner::new(&seeded_config());
    let outcome = aligner.align(&reference, &moving, "rotated").unwrap();
    assert_eq!(outcome.transforms.len(), 3);

    let (dr, dc) = outcome.shift;
    assert!((dr - 2.0).abs() < 0.5 && (dc + 3.0).abs() < 0.5, "shift {:?}", outcome.shift);

    for transform in &outcome.transforms {
        for (&(px, py), &(qx, qy)) in reference_points.iter().zip(&moving_points) {
            let mapped = transform.apply(&Point2::new(qx + dc, qy + dr));
            let err = ((mapped.x - px).powi(2) + (mapped.y - py).powi(2)).sqrt();
            assert!(err < 0.3, "({qx:.2}, {qy:.2}) maps {err} px from ({px}, {py})");
        }
    }

    let report = outcome.report.unwrap();
    for row in &report.channels {
        assert!(row.improvement > 0.0, "channel {} got worse: {:?}", row.channel, row);
    }
}

#[test]
fn test_prepared_reference_is_reusable() {
    let reference = render(128, 128, &lattice(4, 25.0, 25.0));
    let aligner = SingleImageAligner::new(&seeded_config());
    let prepared = aligner.prepare_reference(&reference).unwrap();

    assert_eq!(prepared.thresholds.len(), 3);
    let fiducials = prepared.fiducials.as_ref().unwrap();
    assert!(fiducials.iter().all(|points| points.len() == 16));

    for shift in [(2.0, 1.0), (-3.0, 4.0)] {
        let moving = ImageTransformer::shift(&reference, shift);
        let outcome = aligner.align_prepared(&prepared, &moving, "reuse").unwrap();
        assert!((outcome.shift.0 + shift.0).abs() < 1e-6);
        assert!((outcome.shift.1 + shift.1).abs() < 1e-6);
    }
}
