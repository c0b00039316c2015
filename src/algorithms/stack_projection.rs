//! Per-pixel projection of repeated exposures into a single frame.

use crate::error::{AlignError, Result};
use crate::pipeline::MultiChannelImage;
use ndarray::Zip;
use serde::{Deserialize, Serialize};
use std::fmt;

const EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectionMethod {
    Median,
    SigmaClipMean,
}

impl fmt::Display for ProjectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProjectionMethod::Median => f.write_str("median"),
            ProjectionMethod::SigmaClipMean => f.write_str("sigma_clip_mean"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectionConfig {
    pub method: ProjectionMethod,
    /// Clipping bound in standard deviations around the mean.
    pub sigma: f64,
    /// Clipping passes; `None` iterates until nothing more is rejected.
    pub max_iterations: Option<usize>,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            method: ProjectionMethod::SigmaClipMean,
            sigma: 3.0,
            max_iterations: None,
        }
    }
}

/// Collapses a stack of identically shaped images pixel by pixel and channel
/// by channel. The result is truncated back to 16 bits.
pub fn project_stack(
    stack: &[MultiChannelImage],
    config: &ProjectionConfig,
) -> Result<MultiChannelImage> {
    let first = stack
        .first()
        .ok_or_else(|| AlignError::EmptyInput("image stack for projection".to_string()))?;

    if let Some(other) = stack.iter().find(|img| img.shape() != first.shape()) {
        return Err(AlignError::ShapeMismatch {
            expected: first.shape().to_vec(),
            found: other.shape().to_vec(),
        });
    }
    if config.method == ProjectionMethod::SigmaClipMean
        && (!config.sigma.is_finite() || config.sigma <= 0.0)
    {
        return Err(AlignError::InvalidParameter(format!(
            "clipping sigma must be positive, got {}",
            config.sigma
        )));
    }

    let mut out = MultiChannelImage::zeros(first.raw_dim());
    Zip::indexed(&mut out).par_for_each(|idx, o| {
        let mut vals: Vec<f64> = stack.iter().map(|img| img[idx] as f64).collect();
        let value = match config.method {
            ProjectionMethod::Median => median(&mut vals),
            ProjectionMethod::SigmaClipMean => {
                sigma_clip_mean(&vals, config.sigma, config.max_iterations)
            }
        };
        *o = value.clamp(0.0, u16::MAX as f64) as u16;
    });

    tracing::info!(
        images = stack.len(),
        method = %config.method,
        shape = ?first.shape(),
        "projected image stack"
    );

    Ok(out)
}

/// Median of `vals`, averaging the two middle values for even lengths.
fn median(vals: &mut [f64]) -> f64 {
    let n = vals.len();
    let mid = n / 2;
    let (lower, upper, _) = vals.select_nth_unstable_by(mid, f64::total_cmp);
    let upper = *upper;
    if n % 2 == 1 {
        upper
    } else {
        let lower = lower.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        (lower + upper) / 2.0
    }
}

fn masked_mean_stddev(values: &[f64], mask: &[bool]) -> (f64, f64, usize) {
    let kept = values.iter().zip(mask).filter(|(_, &m)| m).map(|(&v, _)| v);
    let (sum, count) = kept.clone().fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if count == 0 {
        return (0.0, 0.0, 0);
    }
    let mean = sum / count as f64;
    let var = kept.map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;
    (mean, var.sqrt(), count)
}

/// Mean after iteratively rejecting samples more than `sigma` standard
/// deviations from the mean of the surviving samples.
fn sigma_clip_mean(vals: &[f64], sigma: f64, max_iterations: Option<usize>) -> f64 {
    let mut mask = vec![true; vals.len()];
    let mut pass = 0;

    loop {
        if max_iterations.is_some_and(|limit| pass >= limit) {
            break;
        }
        pass += 1;

        let (mean, std, _) = masked_mean_stddev(vals, &mask);
        if std < EPSILON {
            break;
        }
        let mut rejected = 0;
        for (m, &v) in mask.iter_mut().zip(vals) {
            if *m && (v - mean).abs() > sigma * std {
                *m = false;
                rejected += 1;
            }
        }
        if rejected == 0 {
            break;
        }
    }

    let (mean, _, count) = masked_mean_stddev(vals, &mask);
    if count > 0 {
        mean
    } else {
        vals.iter().sum::<f64>() / vals.len() as f64
    }
}
