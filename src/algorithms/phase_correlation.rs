//! Whole-image translation by phase cross-correlation with matrix-multiply
//! DFT upsampling around the integer peak.

use crate::data::ImageTransformer;
use crate::error::{AlignError, Result};
use crate::pipeline::MultiChannelImage;
use ndarray::{Array2, ArrayView2, Axis};
use num_complex::Complex64;
use rustfft::FftPlanner;

/// Per-channel spectra of a reference image, computed once and shared by
/// every moving image registered against it.
#[derive(Debug, Clone)]
pub struct ReferenceSpectrum {
    shape: (usize, usize, usize),
    channels: Vec<Array2<Complex64>>,
}

impl ReferenceSpectrum {
    pub fn new(reference: &MultiChannelImage) -> Result<Self> {
        if reference.is_empty() {
            return Err(AlignError::EmptyInput(
                "image for phase correlation".to_string(),
            ));
        }

        let mut planner = FftPlanner::new();
        let channels = reference
            .axis_iter(Axis(2))
            .map(|plane| compute_2d_fft(&to_complex(plane), &mut planner, false))
            .collect();

        Ok(Self {
            shape: reference.dim(),
            channels,
        })
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        self.shape
    }

    /// Shift `(rows, cols)` that registers `moving` onto the reference.
    ///
    /// Applying the returned shift to `moving` with
    /// [`ImageTransformer::shift`] lines it up with the reference. The
    /// cross-power spectra of all channels are summed before normalisation,
    /// so one shift is shared by every channel. Precision is
    /// `1 / upsample_factor` pixels.
    pub fn correlate(&self, moving: &MultiChannelImage, upsample_factor: usize) -> Result<(f64, f64)> {
        if moving.dim() != self.shape {
            let (rows, cols, channels) = self.shape;
            return Err(AlignError::ShapeMismatch {
                expected: vec![rows, cols, channels],
                found: moving.shape().to_vec(),
            });
        }
        if upsample_factor == 0 {
            return Err(AlignError::InvalidParameter(
                "upsample factor must be at least 1".to_string(),
            ));
        }

        let (rows, cols, _) = self.shape;
        let mut planner = FftPlanner::new();
        let mut product = Array2::<Complex64>::zeros((rows, cols));

        for (ref_freq, mov_plane) in self.channels.iter().zip(moving.axis_iter(Axis(2))) {
            let mov_freq = compute_2d_fft(&to_complex(mov_plane), &mut planner, false);
            ndarray::Zip::from(&mut product)
                .and(ref_freq)
                .and(&mov_freq)
                .for_each(|p, &f, &g| *p += f * g.conj());
        }

        let floor = 100.0 * f64::EPSILON;
        product.mapv_inplace(|z| z / z.norm().max(floor));

        let correlation = compute_2d_fft(&product, &mut planner, true);
        let (peak_r, peak_c) = argmax_norm(&correlation);

        let mut shift = (
            wrap_shift(peak_r, rows),
            wrap_shift(peak_c, cols),
        );

        if upsample_factor > 1 {
            let up = upsample_factor as f64;
            shift = (
                (shift.0 * up).round_ties_even() / up,
                (shift.1 * up).round_ties_even() / up,
            );

            let region = (up * 1.5).ceil() as usize;
            let dftshift = (region as f64 / 2.0).floor();
            let offsets = (dftshift - shift.0 * up, dftshift - shift.1 * up);

            let conj_product = product.mapv(|z| z.conj());
            let upsampled = upsampled_dft(&conj_product, region, upsample_factor, offsets);
            let (ur, uc) = argmax_norm(&upsampled);
            shift.0 += (ur as f64 - dftshift) / up;
            shift.1 += (uc as f64 - dftshift) / up;
        }

        tracing::debug!(
            row_shift = shift.0,
            col_shift = shift.1,
            upsample_factor = upsample_factor,
            "phase correlation completed"
        );

        Ok(shift)
    }

    /// Pre-aligns `moving` with one global sub-pixel shift and returns the
    /// shifted image together with the `(rows, cols)` shift.
    pub fn align(
        &self,
        moving: &MultiChannelImage,
        upsample_factor: usize,
    ) -> Result<(MultiChannelImage, (f64, f64))> {
        let shift = self.correlate(moving, upsample_factor)?;
        Ok((ImageTransformer::shift(moving, shift), shift))
    }
}

/// One-off [`ReferenceSpectrum::correlate`] for a single image pair.
pub fn phase_cross_correlation(
    reference: &MultiChannelImage,
    moving: &MultiChannelImage,
    upsample_factor: usize,
) -> Result<(f64, f64)> {
    if reference.shape() != moving.shape() {
        return Err(AlignError::ShapeMismatch {
            expected: reference.shape().to_vec(),
            found: moving.shape().to_vec(),
        });
    }
    ReferenceSpectrum::new(reference)?.correlate(moving, upsample_factor)
}

/// One-off [`ReferenceSpectrum::align`] for a single image pair.
pub fn translational_alignment(
    reference: &MultiChannelImage,
    moving: &MultiChannelImage,
    upsample_factor: usize,
) -> Result<(MultiChannelImage, (f64, f64))> {
    let shift = phase_cross_correlation(reference, moving, upsample_factor)?;
    Ok((ImageTransformer::shift(moving, shift), shift))
}

fn to_complex(plane: ArrayView2<'_, u16>) -> Array2<Complex64> {
    plane.mapv(|v| Complex64::new(v as f64, 0.0))
}

/// Unnormalised 2D transform along rows then columns; only peak locations
/// are read from the inverse.
fn compute_2d_fft(
    input: &Array2<Complex64>,
    planner: &mut FftPlanner<f64>,
    inverse: bool,
) -> Array2<Complex64> {
    let (height, width) = input.dim();
    let mut result = input.clone();

    let (fft_row, fft_col) = if inverse {
        (planner.plan_fft_inverse(width), planner.plan_fft_inverse(height))
    } else {
        (planner.plan_fft_forward(width), planner.plan_fft_forward(height))
    };

    let mut buffer = Vec::with_capacity(width.max(height));
    for mut row in result.rows_mut() {
        buffer.clear();
        buffer.extend(row.iter().copied());
        fft_row.process(&mut buffer);
        row.iter_mut().zip(&buffer).for_each(|(o, v)| *o = *v);
    }

    for mut col in result.columns_mut() {
        buffer.clear();
        buffer.extend(col.iter().copied());
        fft_col.process(&mut buffer);
        col.iter_mut().zip(&buffer).for_each(|(o, v)| *o = *v);
    }

    result
}

/// First (row-major) position of the largest magnitude.
fn argmax_norm(data: &Array2<Complex64>) -> (usize, usize) {
    let mut best = f64::NEG_INFINITY;
    let mut at = (0, 0);
    for ((r, c), z) in data.indexed_iter() {
        let magnitude = z.norm();
        if magnitude > best {
            best = magnitude;
            at = (r, c);
        }
    }
    at
}

/// Peaks past the midpoint correspond to negative shifts.
fn wrap_shift(peak: usize, n: usize) -> f64 {
    if peak > n / 2 {
        peak as f64 - n as f64
    } else {
        peak as f64
    }
}

/// Sample frequency `k` of an `n`-point transform, in cycles per sample.
fn fft_freq(k: usize, n: usize) -> f64 {
    let signed = if k < (n + 1) / 2 {
        k as f64
    } else {
        k as f64 - n as f64
    };
    signed / n as f64
}

/// Kernel `(region, n)` evaluating the inverse DFT on a grid refined by
/// `upsample` and starting at `offset` upsampled pixels.
fn dft_kernel(n: usize, region: usize, upsample: usize, offset: f64) -> Array2<Complex64> {
    let up = upsample as f64;
    Array2::from_shape_fn((region, n), |(u, k)| {
        let phase = -2.0 * std::f64::consts::PI * (u as f64 - offset) * fft_freq(k, n) / up;
        Complex64::from_polar(1.0, phase)
    })
}

/// Inverse DFT of `data` on a `region x region` patch of the upsampled grid.
fn upsampled_dft(
    data: &Array2<Complex64>,
    region: usize,
    upsample: usize,
    offsets: (f64, f64),
) -> Array2<Complex64> {
    let (rows, cols) = data.dim();
    let row_kernel = dft_kernel(rows, region, upsample, offsets.0);
    let col_kernel = dft_kernel(cols, region, upsample, offsets.1);
    row_kernel.dot(data).dot(&col_kernel.t())
}
