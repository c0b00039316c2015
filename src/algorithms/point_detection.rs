//! Point-source (fiducial) detection with an adaptive width search.
//!
//! Detection follows the DAOFIND scheme: the image is correlated with a
//! zero-sum ("lowered") Gaussian kernel whose response at a pixel is the
//! least-squares amplitude of a Gaussian of the kernel width sitting there.
//! Local maxima of that response above the absolute threshold, away from the
//! image border, and with a plausible sharpness are kept as sources.

use crate::error::{AlignError, Result};
use crate::pipeline::PointSet;
use nalgebra::Point2;
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

/// sigma = FWHM * FWHM_TO_SIGMA for a Gaussian profile.
pub const FWHM_TO_SIGMA: f64 = 0.424_660_900_144_009_5;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Inclusive range of candidate kernel FWHMs (pixels).
    pub fwhm_range: (f64, f64),
    /// Number of evenly spaced widths tried within `fwhm_range`.
    pub fwhm_steps: usize,
    /// Thresholds are `threshold_sigma` standard deviations of the mirrored
    /// reference intensities unless fixed below.
    pub threshold_sigma: f64,
    /// Fixed per-channel absolute thresholds.
    pub thresholds: Option<Vec<f64>>,
    /// Kernel truncation radius in units of the Gaussian sigma.
    pub sigma_radius: f64,
    /// Accepted `(low, high)` sharpness.
    pub sharpness_range: (f64, f64),
    /// Accepted `(low, high)` roundness; 0 is circular, the sign tells
    /// whether a source is stretched along x (negative) or y (positive).
    pub roundness_range: (f64, f64),
    /// Drop peaks closer to the edge than the kernel half-size.
    pub exclude_border: bool,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            fwhm_range: (5.0, 10.0),
            fwhm_steps: 4,
            threshold_sigma: 2.0,
            thresholds: None,
            sigma_radius: 1.5,
            sharpness_range: (0.2, 1.0),
            roundness_range: (-1.0, 1.0),
            exclude_border: true,
        }
    }
}

/// A detected point source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectedSource {
    pub centroid: Point2<f64>,
    /// Integer peak position `(row, col)` in the kernel response.
    pub peak: (usize, usize),
    /// Fitted amplitude above the local background.
    pub amplitude: f64,
    pub sharpness: f64,
    pub roundness: f64,
}

/// Lowered, truncated Gaussian kernel.
#[derive(Debug, Clone)]
pub struct StarKernel {
    pub fwhm: f64,
    pub half: usize,
    weights: Array2<f64>,
    mask: Array2<bool>,
    npixels: usize,
}

impl StarKernel {
    pub fn new(fwhm: f64, sigma_radius: f64) -> Result<Self> {
        if !fwhm.is_finite() || fwhm <= 0.0 {
            return Err(AlignError::InvalidParameter(format!(
                "kernel FWHM must be positive, got {fwhm}"
            )));
        }
        if !sigma_radius.is_finite() || sigma_radius <= 0.0 {
            return Err(AlignError::InvalidParameter(format!(
                "sigma_radius must be positive, got {sigma_radius}"
            )));
        }

        let sigma = fwhm * FWHM_TO_SIGMA;
        let radius = sigma_radius * sigma;
        let half = radius.max(2.0) as usize;
        let size = 2 * half + 1;

        let gauss = Array2::from_shape_fn((size, size), |(r, c)| {
            let dy = r as f64 - half as f64;
            let dx = c as f64 - half as f64;
            (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp()
        });
        let mask = Array2::from_shape_fn((size, size), |(r, c)| {
            let dy = r as f64 - half as f64;
            let dx = c as f64 - half as f64;
            let r2 = dx * dx + dy * dy;
            r2 <= radius * radius || r2 <= 2.0
        });

        let npixels = mask.iter().filter(|&&m| m).count();
        let (sum, sum_sq) = gauss
            .iter()
            .zip(mask.iter())
            .filter(|(_, &m)| m)
            .fold((0.0, 0.0), |(s, s2), (&g, _)| (s + g, s2 + g * g));
        let denom = sum_sq - sum * sum / npixels as f64;
        if denom <= 0.0 {
            return Err(AlignError::InvalidParameter(format!(
                "degenerate detection kernel for FWHM {fwhm}"
            )));
        }

        let mean = sum / npixels as f64;
        let weights = Array2::from_shape_fn((size, size), |(r, c)| {
            if mask[[r, c]] {
                (gauss[[r, c]] - mean) / denom
            } else {
                0.0
            }
        });

        Ok(Self {
            fwhm,
            half,
            weights,
            mask,
            npixels,
        })
    }

    pub fn size(&self) -> usize {
        2 * self.half + 1
    }

    /// Kernel response over the whole image, zero outside the image.
    pub fn correlate(&self, image: &Array2<f64>) -> Array2<f64> {
        let (rows, cols) = image.dim();
        let half = self.half as isize;
        let taps: Vec<(isize, isize, f64)> = self
            .weights
            .indexed_iter()
            .filter(|(_, &w)| w != 0.0)
            .map(|((kr, kc), &w)| (kr as isize - half, kc as isize - half, w))
            .collect();

        let mut out = Array2::zeros((rows, cols));
        Zip::indexed(&mut out).par_for_each(|(r, c), o| {
            let mut acc = 0.0;
            for &(dr, dc, w) in &taps {
                let ir = r as isize + dr;
                let ic = c as isize + dc;
                if ir < 0 || ic < 0 || ir >= rows as isize || ic >= cols as isize {
                    continue;
                }
                acc += w * image[[ir as usize, ic as usize]];
            }
            *o = acc;
        });

        out
    }
}

pub struct PointDetector {
    config: DetectionConfig,
}

impl Default for PointDetector {
    fn default() -> Self {
        Self::new(DetectionConfig::default())
    }
}

impl PointDetector {
    pub fn new(config: DetectionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// Candidate widths, evenly spaced over the configured range.
    pub fn candidate_widths(&self) -> Result<Vec<f64>> {
        let (lo, hi) = self.config.fwhm_range;
        if !(lo.is_finite() && hi.is_finite()) || lo <= 0.0 || hi < lo {
            return Err(AlignError::InvalidParameter(format!(
                "fwhm_range must satisfy 0 < min <= max, got ({lo}, {hi})"
            )));
        }
        let steps = self.config.fwhm_steps;
        if steps == 0 {
            return Err(AlignError::InvalidParameter(
                "fwhm_steps must be at least 1".to_string(),
            ));
        }
        if steps == 1 {
            return Ok(vec![lo]);
        }
        let step = (hi - lo) / (steps - 1) as f64;
        let mut widths: Vec<f64> = (0..steps).map(|i| lo + step * i as f64).collect();
        widths[steps - 1] = hi;
        Ok(widths)
    }

    /// Detect sources at a single kernel width.
    ///
    /// Finding nothing is not an error; only invalid parameters are.
    pub fn detect(&self, image: &Array2<f64>, threshold: f64, fwhm: f64) -> Result<Vec<DetectedSource>> {
        if !threshold.is_finite() {
            return Err(AlignError::InvalidParameter(format!(
                "detection threshold must be finite, got {threshold}"
            )));
        }

        let kernel = StarKernel::new(fwhm, self.config.sigma_radius)?;
        let (rows, cols) = image.dim();
        if rows == 0 || cols == 0 {
            return Ok(Vec::new());
        }

        let response = kernel.correlate(image);
        let half = kernel.half;
        let (sharp_lo, sharp_hi) = self.config.sharpness_range;
        let (round_lo, round_hi) = self.config.roundness_range;

        let (r_range, c_range) = if self.config.exclude_border {
            if rows <= 2 * half || cols <= 2 * half {
                return Ok(Vec::new());
            }
            (half..rows - half, half..cols - half)
        } else {
            (0..rows, 0..cols)
        };

        let mut sources = Vec::new();
        for r in r_range {
            for c in c_range.clone() {
                let amplitude = response[[r, c]];
                if amplitude <= threshold || !is_local_max(&response, &kernel, r, c) {
                    continue;
                }

                let sharpness = sharpness(image, &kernel, r, c, amplitude);
                if sharpness < sharp_lo || sharpness > sharp_hi {
                    continue;
                }

                let Some(roundness) = roundness(image, &kernel, r, c) else {
                    continue;
                };
                if roundness < round_lo || roundness > round_hi {
                    continue;
                }

                sources.push(DetectedSource {
                    centroid: weighted_centroid(image, &kernel, r, c),
                    peak: (r, c),
                    amplitude,
                    sharpness,
                    roundness,
                });
            }
        }

        Ok(sources)
    }

    /// Width in the candidate range that yields the most detections.
    ///
    /// Ties go to the smallest width.
    pub fn optimum_fwhm(&self, image: &Array2<f64>, threshold: f64) -> Result<f64> {
        self.search(image, threshold).map(|(fwhm, _)| fwhm)
    }

    /// Centroids detected at the optimum width.
    pub fn find_fiducials(&self, image: &Array2<f64>, threshold: f64) -> Result<PointSet> {
        let (_, sources) = self.search(image, threshold)?;
        Ok(sources.into_iter().map(|s| s.centroid).collect())
    }

    fn search(&self, image: &Array2<f64>, threshold: f64) -> Result<(f64, Vec<DetectedSource>)> {
        let mut best: Option<(f64, Vec<DetectedSource>)> = None;

        for fwhm in self.candidate_widths()? {
            let sources = self.detect(image, threshold, fwhm)?;
            tracing::debug!(fwhm = fwhm, count = sources.len(), "width search step");

            let best_count = best.as_ref().map_or(0, |(_, s)| s.len());
            if sources.len() > best_count {
                best = Some((fwhm, sources));
            }
        }

        best.ok_or(AlignError::NoDetection {
            fwhm_range: self.config.fwhm_range,
        })
    }
}

/// Strict maximum over the kernel footprint; equal neighbours earlier in
/// raster order win so plateaus yield a single peak.
fn is_local_max(response: &Array2<f64>, kernel: &StarKernel, r: usize, c: usize) -> bool {
    let (rows, cols) = response.dim();
    let value = response[[r, c]];
    let half = kernel.half as isize;

    for ((kr, kc), &m) in kernel.mask.indexed_iter() {
        if !m {
            continue;
        }
        let dr = kr as isize - half;
        let dc = kc as isize - half;
        if dr == 0 && dc == 0 {
            continue;
        }
        let nr = r as isize + dr;
        let nc = c as isize + dc;
        if nr < 0 || nc < 0 || nr >= rows as isize || nc >= cols as isize {
            continue;
        }
        let neighbour = response[[nr as usize, nc as usize]];
        if neighbour > value || (neighbour == value && (dr, dc) < (0, 0)) {
            return false;
        }
    }

    true
}

/// Peak pixel minus the mean of the other footprint pixels, over the amplitude.
fn sharpness(image: &Array2<f64>, kernel: &StarKernel, r: usize, c: usize, amplitude: f64) -> f64 {
    let (rows, cols) = image.dim();
    let half = kernel.half as isize;
    let mut sum = 0.0;
    let mut count = 0usize;

    for ((kr, kc), &m) in kernel.mask.indexed_iter() {
        if !m || (kr as isize == half && kc as isize == half) {
            continue;
        }
        let nr = r as isize + kr as isize - half;
        let nc = c as isize + kc as isize - half;
        if nr < 0 || nc < 0 || nr >= rows as isize || nc >= cols as isize {
            continue;
        }
        sum += image[[nr as usize, nc as usize]];
        count += 1;
    }

    if count == 0 || amplitude == 0.0 {
        return 0.0;
    }
    debug_assert!(count < kernel.npixels);
    (image[[r, c]] - sum / count as f64) / amplitude
}

/// Marginal symmetry `2 (hx - hy) / (hx + hy)` of the kernel box around
/// `(r, c)`.
///
/// `hx` and `hy` are the heights of lowered 1D Gaussians of the kernel width
/// fitted to the x and y marginals, each marginal weighting the other axis
/// by the same Gaussian. Pixels outside the image count as zero. `None` when
/// either height is not positive.
fn roundness(image: &Array2<f64>, kernel: &StarKernel, r: usize, c: usize) -> Option<f64> {
    let (rows, cols) = image.dim();
    let half = kernel.half as isize;
    let sigma = kernel.fwhm * FWHM_TO_SIGMA;
    let profile: Vec<f64> = (-half..=half)
        .map(|k| (-((k * k) as f64) / (2.0 * sigma * sigma)).exp())
        .collect();
    let size = profile.len();

    let mut marginal_x = vec![0.0; size];
    let mut marginal_y = vec![0.0; size];
    for (i, dr) in (-half..=half).enumerate() {
        let nr = r as isize + dr;
        if nr < 0 || nr >= rows as isize {
            continue;
        }
        for (j, dc) in (-half..=half).enumerate() {
            let nc = c as isize + dc;
            if nc < 0 || nc >= cols as isize {
                continue;
            }
            let v = image[[nr as usize, nc as usize]];
            marginal_x[j] += profile[i] * v;
            marginal_y[i] += profile[j] * v;
        }
    }

    let n = size as f64;
    let profile_mean = profile.iter().sum::<f64>() / n;
    let spread: f64 = profile.iter().map(|g| (g - profile_mean).powi(2)).sum();
    if spread <= 0.0 {
        return None;
    }
    let height = |marginal: &[f64]| {
        let mean = marginal.iter().sum::<f64>() / n;
        profile
            .iter()
            .zip(marginal)
            .map(|(g, m)| (g - profile_mean) * (m - mean))
            .sum::<f64>()
            / spread
    };

    let (hx, hy) = (height(&marginal_x), height(&marginal_y));
    if hx <= 0.0 || hy <= 0.0 {
        return None;
    }
    Some(2.0 * (hx - hy) / (hx + hy))
}

/// Background-subtracted intensity-weighted centroid over the kernel box.
fn weighted_centroid(image: &Array2<f64>, kernel: &StarKernel, r: usize, c: usize) -> Point2<f64> {
    let (rows, cols) = image.dim();
    let half = kernel.half;
    let r0 = r.saturating_sub(half);
    let c0 = c.saturating_sub(half);
    let r1 = (r + half).min(rows - 1);
    let c1 = (c + half).min(cols - 1);

    let window = image.slice(ndarray::s![r0..=r1, c0..=c1]);
    let floor = window.iter().copied().fold(f64::INFINITY, f64::min);

    let (mut total, mut sx, mut sy) = (0.0, 0.0, 0.0);
    for ((wr, wc), &v) in window.indexed_iter() {
        let w = v - floor;
        total += w;
        sx += w * (c0 + wc) as f64;
        sy += w * (r0 + wr) as f64;
    }

    if total <= 0.0 {
        return Point2::new(c as f64, r as f64);
    }
    Point2::new(sx / total, sy / total)
}
