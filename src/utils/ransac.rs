use crate::pipeline::AffineTransform;
use nalgebra::{DMatrix, DVector, Point2, Vector2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

/// Minimal sample size for an affine model.
pub const AFFINE_MIN_SAMPLES: usize = 3;

/// Configuration for RANSAC affine estimation
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RansacConfig {
    /// Maximum reprojection error (pixels) for a pair to count as an inlier.
    pub reprojection_threshold: f64,
    pub max_iterations: usize,
    /// Target probability of having drawn one all-inlier sample.
    pub confidence: f64,
    /// Least-squares refits on the inlier set after sampling.
    pub refine_iterations: usize,
    /// Fixed RNG seed for reproducible fits.
    pub seed: Option<u64>,
}

impl Default for RansacConfig {
    fn default() -> Self {
        Self {
            reprojection_threshold: 0.5,
            max_iterations: 2000,
            confidence: 0.99,
            refine_iterations: 10,
            seed: None,
        }
    }
}

/// Result of RANSAC estimation
#[derive(Clone, Debug)]
pub struct RansacResult {
    pub transform: AffineTransform,
    /// Indices of the pairs consistent with `transform`.
    pub inliers: Vec<usize>,
    pub iterations: usize,
}

impl RansacResult {
    pub fn inlier_ratio(&self, total: usize) -> f64 {
        if total == 0 {
            0.0
        } else {
            self.inliers.len() as f64 / total as f64
        }
    }
}

/// Robustly fit an affine transform mapping `src[i]` onto `dst[i]`.
///
/// Returns `None` when fewer than three pairs are given or when no sample
/// yields a non-degenerate model with at least three inliers.
pub fn estimate_affine_ransac(
    src: &[Point2<f64>],
    dst: &[Point2<f64>],
    config: &RansacConfig,
) -> Option<RansacResult> {
    let n = src.len();
    if n < AFFINE_MIN_SAMPLES || dst.len() != n {
        return None;
    }

    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut best: Option<(AffineTransform, Vec<usize>)> = None;
    let mut max_iterations = config.max_iterations;
    let mut iterations = 0;
    let mut sample_src = [Point2::origin(); AFFINE_MIN_SAMPLES];
    let mut sample_dst = [Point2::origin(); AFFINE_MIN_SAMPLES];

    while iterations < max_iterations {
        iterations += 1;

        let sample = rand::seq::index::sample(&mut rng, n, AFFINE_MIN_SAMPLES);
        for (slot, idx) in sample.iter().enumerate() {
            sample_src[slot] = src[idx];
            sample_dst[slot] = dst[idx];
        }

        let Some(model) = fit_affine(&sample_src, &sample_dst) else {
            continue;
        };

        let inliers = find_inliers(src, dst, &model, config.reprojection_threshold);
        let best_count = best.as_ref().map_or(0, |(_, b)| b.len());
        if inliers.len() > best_count {
            let ratio = inliers.len() as f64 / n as f64;
            max_iterations = max_iterations.min(adaptive_iterations(
                ratio,
                AFFINE_MIN_SAMPLES,
                config.confidence,
            ));
            best = Some((model, inliers));
        }
    }

    let (mut transform, mut inliers) = best?;
    if inliers.len() < AFFINE_MIN_SAMPLES {
        return None;
    }

    for _ in 0..config.refine_iterations {
        let inlier_src: Vec<Point2<f64>> = inliers.iter().map(|&i| src[i]).collect();
        let inlier_dst: Vec<Point2<f64>> = inliers.iter().map(|&i| dst[i]).collect();
        let Some(refined) = fit_affine(&inlier_src, &inlier_dst) else {
            break;
        };
        let refined_inliers = find_inliers(src, dst, &refined, config.reprojection_threshold);
        if refined_inliers.len() < inliers.len() {
            break;
        }
        let converged = refined_inliers == inliers && refined.max_abs_diff(&transform) < 1e-12;
        transform = refined;
        inliers = refined_inliers;
        if converged {
            break;
        }
    }

    tracing::debug!(
        pairs = n,
        inliers = inliers.len(),
        iterations = iterations,
        "RANSAC affine estimation completed"
    );

    Some(RansacResult {
        transform,
        inliers,
        iterations,
    })
}

/// Number of iterations needed to draw one all-inlier sample with `confidence`.
fn adaptive_iterations(inlier_ratio: f64, sample_size: usize, confidence: f64) -> usize {
    if inlier_ratio <= 0.0 {
        return usize::MAX;
    }
    if inlier_ratio >= 1.0 {
        return 1;
    }

    // N = log(1 - confidence) / log(1 - w^n)
    let w_n = inlier_ratio.powi(sample_size as i32);
    let log_outlier = (1.0 - w_n).ln();
    if log_outlier >= 0.0 {
        return usize::MAX;
    }

    let n = ((1.0 - confidence).ln() / log_outlier).ceil();
    if n.is_finite() && n >= 1.0 {
        n as usize
    } else {
        1
    }
}

fn find_inliers(
    src: &[Point2<f64>],
    dst: &[Point2<f64>],
    model: &AffineTransform,
    threshold: f64,
) -> Vec<usize> {
    src.iter()
        .zip(dst)
        .enumerate()
        .filter(|(_, (s, d))| (model.apply(s) - **d).norm() <= threshold)
        .map(|(i, _)| i)
        .collect()
}

/// Least-squares affine fit of `dst ≈ M src`, `None` for collinear input.
pub fn fit_affine(src: &[Point2<f64>], dst: &[Point2<f64>]) -> Option<AffineTransform> {
    let n = src.len();
    if n < AFFINE_MIN_SAMPLES || dst.len() != n {
        return None;
    }

    // Centre the design matrix for conditioning.
    let centroid = src.iter().fold(Vector2::zeros(), |acc, p| acc + p.coords) / n as f64;
    let design = DMatrix::from_fn(n, 3, |r, c| match c {
        0 => src[r].x - centroid.x,
        1 => src[r].y - centroid.y,
        _ => 1.0,
    });

    let svd = design.svd(true, true);
    let max_sv = svd.singular_values.max();
    let min_sv = svd.singular_values.min();
    if max_sv <= 0.0 || min_sv / max_sv < 1e-9 {
        return None;
    }

    let bx = DVector::from_iterator(n, dst.iter().map(|p| p.x));
    let by = DVector::from_iterator(n, dst.iter().map(|p| p.y));
    let px = svd.solve(&bx, 1e-12).ok()?;
    let py = svd.solve(&by, 1e-12).ok()?;

    let transform = AffineTransform::from_params([
        px[0],
        px[1],
        px[2] - px[0] * centroid.x - px[1] * centroid.y,
        py[0],
        py[1],
        py[2] - py[0] * centroid.x - py[1] * centroid.y,
    ]);

    transform.is_finite().then_some(transform)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn scattered_points(count: usize, seed: u64) -> Vec<Point2<f64>> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..count)
            .map(|_| Point2::new(rng.gen_range(0.0..512.0), rng.gen_range(0.0..512.0)))
            .collect()
    }

    fn seeded(seed: u64) -> RansacConfig {
        RansacConfig {
            seed: Some(seed),
            ..RansacConfig::default()
        }
    }

    #[test]
    fn test_fit_affine_exact() {
        let truth = AffineTransform::from_params([1.01, 0.02, 3.0, -0.015, 0.99, -1.5]);
        let src = scattered_points(10, 1);
        let dst = truth.apply_all(&src);
        let fitted = fit_affine(&src, &dst).unwrap();
        assert!(fitted.max_abs_diff(&truth) < 1e-9);
    }

    #[test]
    fn test_fit_affine_rejects_collinear() {
        let src = vec![Point2::new(0.0, 0.0), Point2::new(1.0, 1.0), Point2::new(2.0, 2.0)];
        assert!(fit_affine(&src, &src).is_none());
    }

    #[test]
    fn test_ransac_ignores_outliers() {
        let truth = AffineTransform::similarity(0.01, 1.0, 2.5, -1.25);
        let src = scattered_points(60, 2);
        let mut dst = truth.apply_all(&src);
        // Corrupt a fifth of the pairs.
        for p in dst.iter_mut().step_by(5) {
            p.x += 7.0;
            p.y -= 4.0;
        }

        let result = estimate_affine_ransac(&src, &dst, &seeded(11)).unwrap();
        assert!(result.transform.max_abs_diff(&truth) < 1e-6);
        assert_eq!(result.inliers.len(), 48);
        assert!((result.inlier_ratio(src.len()) - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_ransac_too_few_pairs() {
        let src = scattered_points(2, 3);
        assert!(estimate_affine_ransac(&src, &src, &seeded(1)).is_none());
    }

    #[test]
    fn test_ransac_all_collinear_has_no_model() {
        let src: Vec<Point2<f64>> = (0..10).map(|i| Point2::new(i as f64, 2.0 * i as f64)).collect();
        assert!(estimate_affine_ransac(&src, &src, &seeded(5)).is_none());
    }

    #[test]
    fn test_adaptive_iterations() {
        assert_eq!(adaptive_iterations(1.0, 3, 0.99), 1);
        assert_eq!(adaptive_iterations(0.0, 3, 0.99), usize::MAX);
        // w = 0.5, n = 3: log(0.01) / log(0.875) = 34.5 -> 35
        assert_eq!(adaptive_iterations(0.5, 3, 0.99), 35);
    }
}
