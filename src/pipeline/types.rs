use nalgebra::{Matrix3, Point2};
use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Multi-channel image laid out as `(rows, cols, channels)` with 16-bit samples.
pub type MultiChannelImage = Array3<u16>;

/// A single channel plane `(rows, cols)`.
pub type Plane = Array2<u16>;

/// Sub-pixel centroids, `x` along columns and `y` along rows.
pub type PointSet = Vec<Point2<f64>>;

/// Nearest-neighbour pairing of a fit point set against a reference set.
///
/// `distances[i]` is the Euclidean distance between `reference[ref_indices[i]]`
/// and `fit[fit_indices[i]]`. Several fit points may share a reference index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Correspondence {
    pub distances: Vec<f64>,
    pub ref_indices: Vec<usize>,
    pub fit_indices: Vec<usize>,
}

impl Correspondence {
    pub fn len(&self) -> usize {
        self.distances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.distances.is_empty()
    }
}

/// 2x3 affine matrix mapping `(x, y)` to
/// `(m00 x + m01 y + m02, m10 x + m11 y + m12)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AffineTransform {
    pub matrix: [[f64; 3]; 2],
}

impl Default for AffineTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl AffineTransform {
    pub fn identity() -> Self {
        Self {
            matrix: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
        }
    }

    /// Row-major parameters `[m00, m01, m02, m10, m11, m12]`.
    pub fn from_params(p: [f64; 6]) -> Self {
        Self {
            matrix: [[p[0], p[1], p[2]], [p[3], p[4], p[5]]],
        }
    }

    pub fn translation(dx: f64, dy: f64) -> Self {
        Self::from_params([1.0, 0.0, dx, 0.0, 1.0, dy])
    }

    /// Rotation by `angle` radians about the origin, uniform `scale`, then translation.
    pub fn similarity(angle: f64, scale: f64, dx: f64, dy: f64) -> Self {
        let (s, c) = angle.sin_cos();
        Self::from_params([scale * c, -scale * s, dx, scale * s, scale * c, dy])
    }

    pub fn apply(&self, p: &Point2<f64>) -> Point2<f64> {
        let m = &self.matrix;
        Point2::new(
            m[0][0] * p.x + m[0][1] * p.y + m[0][2],
            m[1][0] * p.x + m[1][1] * p.y + m[1][2],
        )
    }

    pub fn apply_all(&self, points: &[Point2<f64>]) -> PointSet {
        points.iter().map(|p| self.apply(p)).collect()
    }

    fn to_homogeneous(self) -> Matrix3<f64> {
        let m = &self.matrix;
        Matrix3::new(
            m[0][0], m[0][1], m[0][2], m[1][0], m[1][1], m[1][2], 0.0, 0.0, 1.0,
        )
    }

    /// Inverse mapping, `None` when the linear part is singular.
    pub fn inverse(&self) -> Option<Self> {
        let inv = self.to_homogeneous().try_inverse()?;
        Some(Self::from_params([
            inv[(0, 0)],
            inv[(0, 1)],
            inv[(0, 2)],
            inv[(1, 0)],
            inv[(1, 1)],
            inv[(1, 2)],
        ]))
    }

    pub fn is_finite(&self) -> bool {
        self.matrix.iter().flatten().all(|v| v.is_finite())
    }

    /// Largest absolute element-wise difference to `other`.
    pub fn max_abs_diff(&self, other: &Self) -> f64 {
        self.matrix
            .iter()
            .flatten()
            .zip(other.matrix.iter().flatten())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max)
    }
}

/// One report row per channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelReport {
    pub channel: usize,
    /// Positive when precision got better, negative when it got worse.
    pub improvement: f64,
    /// Precision metric (FWHM displacement, pixels) after the affine correction.
    pub precision: f64,
}

impl ChannelReport {
    /// Builds a row from the precision before and after correction.
    ///
    /// A decrease of the metric is reported as a positive improvement and any
    /// non-negative change as a negative one.
    pub fn from_precisions(channel: usize, old: f64, new: f64) -> Self {
        let improvement = if old == 0.0 {
            if new == 0.0 {
                0.0
            } else {
                f64::NEG_INFINITY
            }
        } else {
            let percent_change = (new - old) / old;
            if percent_change < 0.0 {
                percent_change.abs()
            } else {
                -percent_change
            }
        };

        Self {
            channel,
            improvement,
            precision: new,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlignmentReport {
    pub channels: Vec<ChannelReport>,
}

/// Progress of a single-image alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlignmentStage {
    Loaded,
    Pretranslated,
    PerChannelDetected,
    Matched,
    Transformed,
    Scored,
    Done,
}

impl fmt::Display for AlignmentStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AlignmentStage::Loaded => "loaded",
            AlignmentStage::Pretranslated => "pretranslated",
            AlignmentStage::PerChannelDetected => "per_channel_detected",
            AlignmentStage::Matched => "matched",
            AlignmentStage::Transformed => "transformed",
            AlignmentStage::Scored => "scored",
            AlignmentStage::Done => "done",
        };
        f.write_str(name)
    }
}

/// Final product of the orchestrator for one moving image.
#[derive(Debug, Clone)]
pub struct AlignmentOutcome {
    pub image: MultiChannelImage,
    /// Global `(row, col)` shift applied before fine alignment.
    pub shift: (f64, f64),
    /// Per-channel moving→reference matrices; empty in phase-only mode.
    pub transforms: Vec<AffineTransform>,
    /// `None` in phase-only mode.
    pub report: Option<AlignmentReport>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transform_inverse_roundtrip() {
        let t = AffineTransform::similarity(0.1, 1.02, 3.5, -2.0);
        let inv = t.inverse().unwrap();
        let p = Point2::new(12.0, 40.0);
        let q = inv.apply(&t.apply(&p));
        assert!((q - p).norm() < 1e-9);
    }

    #[test]
    fn test_singular_transform_has_no_inverse() {
        let t = AffineTransform::from_params([1.0, 2.0, 0.0, 2.0, 4.0, 0.0]);
        assert!(t.inverse().is_none());
    }

    #[test]
    fn test_improvement_sign_convention() {
        // Precision went from 1.0 to 0.5 px: a 50% decrease reads as +0.5.
        let better = ChannelReport::from_precisions(0, 1.0, 0.5);
        assert!((better.improvement - 0.5).abs() < 1e-12);
        assert_eq!(better.precision, 0.5);

        // Precision went from 1.0 to 1.5 px: a 50% increase reads as -0.5.
        let worse = ChannelReport::from_precisions(1, 1.0, 1.5);
        assert!((worse.improvement + 0.5).abs() < 1e-12);

        // No change is reported as negative zero improvement.
        let same = ChannelReport::from_precisions(2, 1.0, 1.0);
        assert_eq!(same.improvement, 0.0);
        assert!(same.improvement.is_sign_negative());
    }

    #[test]
    fn test_improvement_with_zero_baseline() {
        assert_eq!(ChannelReport::from_precisions(0, 0.0, 0.0).improvement, 0.0);
        assert_eq!(
            ChannelReport::from_precisions(0, 0.0, 0.3).improvement,
            f64::NEG_INFINITY
        );
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(AlignmentStage::PerChannelDetected.to_string(), "per_channel_detected");
    }
}
