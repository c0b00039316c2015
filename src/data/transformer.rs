use crate::error::{AlignError, Result};
use crate::pipeline::{AffineTransform, MultiChannelImage, Plane};
use ndarray::{Array2, ArrayView2, Axis, Zip};

/// Resampling of 16-bit planes and multi-channel images.
///
/// All operations produce new arrays; samples falling outside the source are
/// zero and results are rounded and clamped to the 16-bit range.
pub struct ImageTransformer;

impl ImageTransformer {
    /// Shift every channel by `(rows, cols)`: `out[r, c] = in[r - dr, c - dc]`.
    pub fn shift(image: &MultiChannelImage, shift: (f64, f64)) -> MultiChannelImage {
        let (dr, dc) = shift;
        let mut out = MultiChannelImage::zeros(image.raw_dim());
        for (src, mut dst) in image.axis_iter(Axis(2)).zip(out.axis_iter_mut(Axis(2))) {
            dst.assign(&Self::shift_plane(src, shift));
        }
        tracing::trace!(dr = dr, dc = dc, "shifted image");
        out
    }

    pub fn shift_plane(plane: ArrayView2<'_, u16>, shift: (f64, f64)) -> Plane {
        let (dr, dc) = shift;
        Self::resample(plane, |r, c| (c as f64 - dc, r as f64 - dr))
    }

    /// Warp a plane with the moving→reference matrix `transform`.
    ///
    /// Destination pixel `(x, y)` samples the source at `transform⁻¹ (x, y)`.
    pub fn warp_plane(
        plane: ArrayView2<'_, u16>,
        transform: &AffineTransform,
    ) -> Result<Plane> {
        let inverse = transform.inverse().ok_or_else(|| {
            AlignError::InvalidParameter(format!("transform {:?} is not invertible", transform.matrix))
        })?;
        let m = inverse.matrix;
        Ok(Self::resample(plane, |r, c| {
            let (x, y) = (c as f64, r as f64);
            (
                m[0][0] * x + m[0][1] * y + m[0][2],
                m[1][0] * x + m[1][1] * y + m[1][2],
            )
        }))
    }

    /// Warp channel `i` of `image` with `transforms[i]`.
    pub fn warp_channels(
        image: &MultiChannelImage,
        transforms: &[AffineTransform],
    ) -> Result<MultiChannelImage> {
        let channels = image.len_of(Axis(2));
        if transforms.len() != channels {
            return Err(AlignError::ShapeMismatch {
                expected: vec![channels],
                found: vec![transforms.len()],
            });
        }

        let mut out = MultiChannelImage::zeros(image.raw_dim());
        for ((src, mut dst), transform) in image
            .axis_iter(Axis(2))
            .zip(out.axis_iter_mut(Axis(2)))
            .zip(transforms)
        {
            dst.assign(&Self::warp_plane(src, transform)?);
        }
        Ok(out)
    }

    /// Fill each destination pixel from the source position `map(row, col)`,
    /// given as `(x, y)`.
    fn resample<F>(plane: ArrayView2<'_, u16>, map: F) -> Plane
    where
        F: Fn(usize, usize) -> (f64, f64) + Sync,
    {
        let mut out = Array2::zeros(plane.raw_dim());
        Zip::indexed(&mut out).par_for_each(|(r, c), o| {
            let (x, y) = map(r, c);
            *o = to_u16(Self::bilinear_interpolate(plane, x, y));
        });
        out
    }

    /// Bilinear interpolation with zero outside the plane.
    pub fn bilinear_interpolate(plane: ArrayView2<'_, u16>, x: f64, y: f64) -> f64 {
        let (rows, cols) = plane.dim();
        if !x.is_finite() || !y.is_finite() {
            return 0.0;
        }
        if x <= -1.0 || y <= -1.0 || x >= cols as f64 || y >= rows as f64 {
            return 0.0;
        }

        let x0 = x.floor();
        let y0 = y.floor();
        let fx = x - x0;
        let fy = y - y0;
        let (x0, y0) = (x0 as isize, y0 as isize);

        let sample = |xi: isize, yi: isize| -> f64 {
            if xi < 0 || yi < 0 || xi >= cols as isize || yi >= rows as isize {
                0.0
            } else {
                plane[[yi as usize, xi as usize]] as f64
            }
        };

        sample(x0, y0) * (1.0 - fx) * (1.0 - fy)
            + sample(x0 + 1, y0) * fx * (1.0 - fy)
            + sample(x0, y0 + 1) * (1.0 - fx) * fy
            + sample(x0 + 1, y0 + 1) * fx * fy
    }
}

fn to_u16(value: f64) -> u16 {
    value.round().clamp(0.0, u16::MAX as f64) as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn ramp(rows: usize, cols: usize) -> Array2<u16> {
        Array2::from_shape_fn((rows, cols), |(r, c)| (r * 100 + c) as u16)
    }

    #[test]
    fn test_integer_shift() {
        let plane = ramp(6, 8);
        let shifted = ImageTransformer::shift_plane(plane.view(), (2.0, -1.0));
        assert_eq!(shifted[[2, 0]], plane[[0, 1]]);
        assert_eq!(shifted[[5, 6]], plane[[3, 7]]);
        // Uncovered rows and the last column are zero filled.
        assert!(shifted.row(0).iter().all(|&v| v == 0));
        assert!(shifted.row(1).iter().all(|&v| v == 0));
        assert_eq!(shifted[[3, 7]], 0);
    }

    #[test]
    fn test_half_pixel_shift_interpolates() {
        let plane = Array2::from_shape_vec((1, 3), vec![0u16, 100, 200]).unwrap();
        let shifted = ImageTransformer::shift_plane(plane.view(), (0.0, 0.5));
        assert_eq!(shifted[[0, 1]], 50);
        assert_eq!(shifted[[0, 2]], 150);
    }

    #[test]
    fn test_identity_warp_is_lossless() {
        let plane = ramp(5, 7);
        let warped = ImageTransformer::warp_plane(plane.view(), &AffineTransform::identity()).unwrap();
        assert_eq!(warped, plane);
    }

    #[test]
    fn test_warp_translation_matches_shift() {
        let plane = ramp(10, 10);
        // Moving point (x, y) maps to (x + 3, y - 2) in the reference frame.
        let t = AffineTransform::translation(3.0, -2.0);
        let warped = ImageTransformer::warp_plane(plane.view(), &t).unwrap();
        let shifted = ImageTransformer::shift_plane(plane.view(), (-2.0, 3.0));
        assert_eq!(warped, shifted);
    }

    #[test]
    fn test_singular_warp_is_rejected() {
        let plane = ramp(3, 3);
        let t = AffineTransform::from_params([0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        assert!(ImageTransformer::warp_plane(plane.view(), &t).is_err());
    }

    #[test]
    fn test_warp_channels_needs_one_transform_per_channel() {
        let image = Array3::<u16>::zeros((4, 4, 3));
        let err = ImageTransformer::warp_channels(&image, &[AffineTransform::identity()]).unwrap_err();
        assert!(matches!(err, AlignError::ShapeMismatch { .. }));
    }
}
