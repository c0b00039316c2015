//! Robust moving→reference affine estimation from unpaired point sets.

use crate::algorithms::correspondence::nearest_neighbors;
use crate::error::{AlignError, Result};
use crate::pipeline::{AffineTransform, PointSet};
use crate::utils::ransac::{estimate_affine_ransac, RansacConfig, AFFINE_MIN_SAMPLES};
use nalgebra::Point2;

/// Outcome of [`nearest_neighbors_transform`].
#[derive(Debug, Clone)]
pub struct RobustFit {
    /// Maps `fit_points[i]` onto `ref_points[i]`.
    pub transform: AffineTransform,
    /// Matched distances before the transform, one per pair.
    pub distances: Vec<f64>,
    pub ref_points: PointSet,
    pub fit_points: PointSet,
    /// Indices into the pair lists that the robust fit kept.
    pub inliers: Vec<usize>,
}

impl RobustFit {
    pub fn pairs(&self) -> usize {
        self.distances.len()
    }
}

fn strip_nan(points: &[Point2<f64>]) -> PointSet {
    points
        .iter()
        .filter(|p| !p.x.is_nan() && !p.y.is_nan())
        .copied()
        .collect()
}

/// Pairs `fit` with `reference` by nearest neighbour and fits the affine
/// matrix taking the matched fit points onto their reference partners.
///
/// Points with a NaN coordinate are dropped from each set independently.
/// Fewer than three surviving pairs is an
/// [`AlignError::InsufficientCorrespondence`]; a robust fit that finds no
/// model is an [`AlignError::NoTransform`].
pub fn nearest_neighbors_transform(
    reference: &[Point2<f64>],
    fit: &[Point2<f64>],
    max_dist: Option<f64>,
    ransac: &RansacConfig,
) -> Result<RobustFit> {
    let reference = strip_nan(reference);
    let fit = strip_nan(fit);

    if reference.is_empty() || fit.is_empty() {
        return Err(AlignError::InsufficientCorrespondence {
            found: 0,
            required: AFFINE_MIN_SAMPLES,
        });
    }

    let matched = nearest_neighbors(&reference, &fit, max_dist)?;
    if matched.len() < AFFINE_MIN_SAMPLES {
        return Err(AlignError::InsufficientCorrespondence {
            found: matched.len(),
            required: AFFINE_MIN_SAMPLES,
        });
    }

    let ref_points: PointSet = matched.ref_indices.iter().map(|&i| reference[i]).collect();
    let fit_points: PointSet = matched.fit_indices.iter().map(|&i| fit[i]).collect();

    let result = estimate_affine_ransac(&fit_points, &ref_points, ransac).ok_or(
        AlignError::NoTransform {
            pairs: matched.len(),
        },
    )?;

    tracing::debug!(
        pairs = matched.len(),
        inliers = result.inliers.len(),
        inlier_ratio = result.inlier_ratio(matched.len()),
        iterations = result.iterations,
        "robust affine fit"
    );

    Ok(RobustFit {
        transform: result.transform,
        distances: matched.distances,
        ref_points,
        fit_points,
        inliers: result.inliers,
    })
}
