//! Localization precision from a sample of residual distances.
//!
//! Residual magnitudes are one-sided, but the displacement they stand for is
//! symmetric about zero, so the sample is mirrored before a Gaussian is fitted.
//! The full width at half maximum of that Gaussian is the precision metric.

use crate::error::{AlignError, Result};

/// Number of grid points the fitted density is evaluated on.
pub const DENSITY_GRID_POINTS: usize = 500;

/// Fewest residuals for which the Gaussian fit is defined.
pub const MIN_RESIDUALS: usize = 2;

/// Standard deviations (pixels) at or below this count as no spread at all.
const MIN_SPREAD: f64 = 1e-9;

/// Maximum-likelihood normal fit `(mean, std)` with population variance.
pub fn fit_normal(sample: &[f64]) -> Option<(f64, f64)> {
    if sample.is_empty() {
        return None;
    }
    let n = sample.len() as f64;
    let mean = sample.iter().sum::<f64>() / n;
    let var = sample.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Some((mean, var.sqrt()))
}

fn normal_pdf(x: f64, mean: f64, std: f64) -> f64 {
    let z = (x - mean) / std;
    (-0.5 * z * z).exp() / (std * (2.0 * std::f64::consts::PI).sqrt())
}

/// FWHM-based displacement estimate of a residual-distance sample.
///
/// Fails with [`AlignError::InsufficientSample`] for fewer than two residuals.
/// A sample without spread (all residuals zero, up to round-off) has a
/// precision of zero.
pub fn dot_displacement(distances: &[f64]) -> Result<f64> {
    if distances.len() < MIN_RESIDUALS {
        return Err(AlignError::InsufficientSample {
            found: distances.len(),
            required: MIN_RESIDUALS,
        });
    }
    if distances.iter().any(|d| !d.is_finite()) {
        return Err(AlignError::InvalidParameter(
            "residual distances must be finite".to_string(),
        ));
    }

    let mirrored: Vec<f64> = distances
        .iter()
        .map(|d| -d)
        .chain(distances.iter().copied())
        .collect();

    let (mean, std) = fit_normal(&mirrored).ok_or(AlignError::InsufficientSample {
        found: 0,
        required: MIN_RESIDUALS,
    })?;

    let xmin = mirrored.iter().copied().fold(f64::INFINITY, f64::min);
    let xmax = mirrored.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if std <= MIN_SPREAD || xmax <= xmin {
        return Ok(0.0);
    }

    let step = (xmax - xmin) / (DENSITY_GRID_POINTS - 1) as f64;
    let grid: Vec<f64> = (0..DENSITY_GRID_POINTS)
        .map(|i| xmin + step * i as f64)
        .collect();
    let density: Vec<f64> = grid.iter().map(|&x| normal_pdf(x, mean, std)).collect();

    let peak = density.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let half_max = peak / 2.0;

    // Last grid point above half maximum is the right-hand crossing.
    let index_hwhm = density
        .iter()
        .rposition(|&p| p > half_max)
        .unwrap_or(DENSITY_GRID_POINTS / 2);

    let displacement = grid[index_hwhm] * 2.0;
    tracing::trace!(
        residuals = distances.len(),
        std = std,
        displacement = displacement,
        "precision estimate"
    );

    Ok(displacement)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    const FWHM_PER_SIGMA: f64 = 2.354_820_045_030_949;

    #[test]
    fn test_fit_normal_population_std() {
        let (mean, std) = fit_normal(&[-1.0, 1.0, -3.0, 3.0]).unwrap();
        assert_eq!(mean, 0.0);
        assert!((std - 5f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_recovers_known_width() {
        let mut rng = StdRng::seed_from_u64(42);
        let sigma: f64 = 0.4;
        let normal = Normal::new(0.0, sigma).unwrap();
        let residuals: Vec<f64> = (0..4000).map(|_| normal.sample(&mut rng).abs()).collect();

        let estimate = dot_displacement(&residuals).unwrap();
        let expected = FWHM_PER_SIGMA * sigma;
        assert!(
            ((estimate - expected) / expected).abs() < 0.05,
            "estimate {estimate} vs expected {expected}"
        );
    }

    #[test]
    fn test_scales_linearly() {
        let residuals = [0.1, 0.3, 0.2, 0.5, 0.05, 0.4];
        let scaled: Vec<f64> = residuals.iter().map(|r| r * 3.0).collect();
        let a = dot_displacement(&residuals).unwrap();
        let b = dot_displacement(&scaled).unwrap();
        assert!((b - 3.0 * a).abs() < 1e-9);
    }

    #[test]
    fn test_too_few_residuals() {
        for sample in [&[][..], &[0.3][..]] {
            let err = dot_displacement(sample).unwrap_err();
            assert!(matches!(
                err,
                AlignError::InsufficientSample { found, required: 2 } if found == sample.len()
            ));
        }
    }

    #[test]
    fn test_two_residuals_are_enough() {
        assert!(dot_displacement(&[0.2, 0.4]).unwrap() > 0.0);
    }

    #[test]
    fn test_zero_spread_is_zero() {
        assert_eq!(dot_displacement(&[0.0, 0.0, 0.0]).unwrap(), 0.0);
        assert_eq!(dot_displacement(&[1e-13, 0.0, 2e-13]).unwrap(), 0.0);
    }
}
