use crate::error::{AlignError, Result};
use crate::pipeline::Correspondence;
use crate::utils::spatial::KdTree;
use nalgebra::Point2;

/// Pairs every `fit` point with its nearest `reference` point.
///
/// Produces one pair per fit point, in fit order. With `max_dist` set, pairs
/// farther apart than the cutoff are dropped; an empty result is returned as
/// such and left to the caller to reject.
pub fn nearest_neighbors(
    reference: &[Point2<f64>],
    fit: &[Point2<f64>],
    max_dist: Option<f64>,
) -> Result<Correspondence> {
    if let Some(d) = max_dist {
        if d.is_nan() || d < 0.0 {
            return Err(AlignError::InvalidParameter(format!(
                "max_dist must be a non-negative number, got {d}"
            )));
        }
    }

    if fit.is_empty() {
        return Ok(Correspondence::default());
    }

    let tree = KdTree::build(reference).ok_or_else(|| {
        AlignError::EmptyInput("reference point set for nearest-neighbour search".to_string())
    })?;

    let mut matched = Correspondence {
        distances: Vec::with_capacity(fit.len()),
        ref_indices: Vec::with_capacity(fit.len()),
        fit_indices: Vec::with_capacity(fit.len()),
    };

    for (fit_idx, point) in fit.iter().enumerate() {
        let (ref_idx, dist) = tree.nearest(point);
        if max_dist.is_some_and(|d| dist > d) {
            continue;
        }
        matched.distances.push(dist);
        matched.ref_indices.push(ref_idx);
        matched.fit_indices.push(fit_idx);
    }

    tracing::debug!(
        reference = reference.len(),
        fit = fit.len(),
        matched = matched.len(),
        ?max_dist,
        "nearest-neighbour matching completed"
    );

    Ok(matched)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(offset: (f64, f64)) -> Vec<Point2<f64>> {
        let mut pts = Vec::new();
        for i in 0..5 {
            for j in 0..5 {
                pts.push(Point2::new(
                    20.0 * i as f64 + offset.0,
                    20.0 * j as f64 + offset.1,
                ));
            }
        }
        pts
    }

    #[test]
    fn test_one_pair_per_fit_point_without_cutoff() {
        let reference = grid((0.0, 0.0));
        let fit: Vec<Point2<f64>> = grid((0.5, -0.3)).into_iter().take(7).collect();
        let m = nearest_neighbors(&reference, &fit, None).unwrap();
        assert_eq!(m.len(), fit.len());
        assert_eq!(m.fit_indices, (0..7).collect::<Vec<_>>());
        for (k, &r) in m.ref_indices.iter().enumerate() {
            assert_eq!(r, k);
            assert!((m.distances[k] - (0.25f64 + 0.09).sqrt()).abs() < 1e-12);
        }
    }

    #[test]
    fn test_many_to_one_is_allowed() {
        let reference = vec![Point2::new(0.0, 0.0), Point2::new(100.0, 100.0)];
        let fit = vec![Point2::new(1.0, 0.0), Point2::new(0.0, 1.0), Point2::new(99.0, 99.0)];
        let m = nearest_neighbors(&reference, &fit, None).unwrap();
        assert_eq!(m.ref_indices, vec![0, 0, 1]);
    }

    #[test]
    fn test_cutoff_filters_far_pairs() {
        let reference = vec![Point2::new(0.0, 0.0), Point2::new(50.0, 50.0)];
        let fit = vec![
            Point2::new(0.5, 0.0),
            Point2::new(25.0, 25.0),
            Point2::new(51.5, 50.0),
        ];
        let m = nearest_neighbors(&reference, &fit, Some(2.0)).unwrap();
        assert_eq!(m.fit_indices, vec![0, 2]);
        assert_eq!(m.ref_indices, vec![0, 1]);
        assert!(m.distances.iter().all(|&d| d <= 2.0));
    }

    #[test]
    fn test_cutoff_can_empty_the_result() {
        let reference = vec![Point2::new(0.0, 0.0)];
        let fit = vec![Point2::new(10.0, 0.0)];
        let m = nearest_neighbors(&reference, &fit, Some(2.0)).unwrap();
        assert!(m.is_empty());
    }

    #[test]
    fn test_zero_cutoff_keeps_exact_matches() {
        let reference = vec![Point2::new(3.0, 4.0)];
        let fit = vec![Point2::new(3.0, 4.0), Point2::new(3.0, 4.5)];
        let m = nearest_neighbors(&reference, &fit, Some(0.0)).unwrap();
        assert_eq!(m.fit_indices, vec![0]);
    }

    #[test]
    fn test_empty_reference_is_rejected() {
        let err = nearest_neighbors(&[], &[Point2::new(1.0, 1.0)], None).unwrap_err();
        assert!(matches!(err, AlignError::EmptyInput(_)));
    }

    #[test]
    fn test_negative_cutoff_is_rejected() {
        let err = nearest_neighbors(&[Point2::new(0.0, 0.0)], &[Point2::new(0.0, 0.0)], Some(-1.0))
            .unwrap_err();
        assert!(matches!(err, AlignError::InvalidParameter(_)));
    }
}
