use crate::error::{AlignError, Result};
use crate::pipeline::MultiChannelImage;
use ndarray::{ArrayView2, Axis};

/// Detection threshold for one plane: the mean plus `sigma` standard
/// deviations of a Gaussian fitted to the intensities mirrored about zero.
///
/// The mirrored sample has zero mean, so this reduces to `sigma` times the
/// root mean square intensity.
pub fn pick_threshold(plane: ArrayView2<'_, u16>, sigma: f64) -> Result<f64> {
    if plane.is_empty() {
        return Err(AlignError::EmptyInput(
            "plane for threshold estimation".to_string(),
        ));
    }
    if !sigma.is_finite() {
        return Err(AlignError::InvalidParameter(format!(
            "threshold sigma must be finite, got {sigma}"
        )));
    }

    let n = plane.len() as f64;
    let mean_square = plane.iter().map(|&v| (v as f64).powi(2)).sum::<f64>() / n;
    Ok(sigma * mean_square.sqrt())
}

/// One threshold per channel of `image`.
pub fn pick_thresholds(image: &MultiChannelImage, sigma: f64) -> Result<Vec<f64>> {
    let thresholds = image
        .axis_iter(Axis(2))
        .map(|plane| pick_threshold(plane, sigma))
        .collect::<Result<Vec<_>>>()?;

    tracing::debug!(?thresholds, sigma = sigma, "picked detection thresholds");
    Ok(thresholds)
}
