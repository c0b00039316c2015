//! Single-image registration: global pre-translation, then a per-channel
//! affine correction fitted on matched fiducials, then scoring.

use crate::algorithms::{
    dot_displacement, nearest_neighbors, nearest_neighbors_transform, pick_thresholds,
    PointDetector, ReferenceSpectrum, RobustFit,
};
use crate::config::{Config, MatchingConfig, PhaseConfig};
use crate::data::ImageTransformer;
use crate::error::{AlignError, Result};
use crate::logging::{self, ImageSpan};
use crate::pipeline::{
    AffineTransform, AlignmentOutcome, AlignmentReport, AlignmentStage, ChannelReport,
    MultiChannelImage, PointSet,
};
use crate::utils::RansacConfig;
use ndarray::{Array2, Axis};

/// Reference image with the per-channel data every moving image is compared
/// against. Built once per batch.
#[derive(Debug, Clone)]
pub struct PreparedReference {
    /// Reference spectra reused by every phase correlation.
    pub spectrum: ReferenceSpectrum,
    pub thresholds: Vec<f64>,
    /// Per-channel fiducials; `None` in phase-only mode.
    pub fiducials: Option<Vec<PointSet>>,
}

pub struct SingleImageAligner {
    detector: PointDetector,
    matching: MatchingConfig,
    ransac: RansacConfig,
    phase: PhaseConfig,
    threshold_sigma: f64,
}

impl Default for SingleImageAligner {
    fn default() -> Self {
        Self::new(&Config::default())
    }
}

impl SingleImageAligner {
    pub fn new(config: &Config) -> Self {
        Self {
            detector: PointDetector::new(config.detection.clone()),
            matching: config.matching.clone(),
            ransac: config.ransac.clone(),
            phase: config.phase.clone(),
            threshold_sigma: config.detection.threshold_sigma,
        }
    }

    /// Per-channel thresholds from the reference: fixed ones when configured,
    /// otherwise picked from the reference intensities.
    pub fn thresholds(&self, reference: &MultiChannelImage) -> Result<Vec<f64>> {
        let channels = reference.len_of(Axis(2));
        match self.detector.config().thresholds {
            Some(ref fixed) if fixed.len() != channels => Err(AlignError::InvalidParameter(
                format!("{} fixed thresholds for {} channels", fixed.len(), channels),
            )),
            Some(ref fixed) => Ok(fixed.clone()),
            None => pick_thresholds(reference, self.threshold_sigma),
        }
    }

    pub fn prepare_reference(&self, reference: &MultiChannelImage) -> Result<PreparedReference> {
        if reference.is_empty() {
            return Err(AlignError::EmptyInput("reference image".to_string()));
        }

        let thresholds = self.thresholds(reference)?;
        let fiducials = if self.phase.phase_only {
            None
        } else {
            Some(self.detect_channels(reference, &thresholds)?)
        };

        Ok(PreparedReference {
            spectrum: ReferenceSpectrum::new(reference)?,
            thresholds,
            fiducials,
        })
    }

    /// Aligns `moving` onto `reference`.
    pub fn align(
        &self,
        reference: &MultiChannelImage,
        moving: &MultiChannelImage,
        name: &str,
    ) -> Result<AlignmentOutcome> {
        let prepared = self.prepare_reference(reference)?;
        self.align_prepared(&prepared, moving, name)
    }

    /// Aligns `moving` against an already prepared reference. Any stage
    /// failure aborts the whole image.
    pub fn align_prepared(
        &self,
        reference: &PreparedReference,
        moving: &MultiChannelImage,
        name: &str,
    ) -> Result<AlignmentOutcome> {
        let correlation_id = logging::new_correlation_id();
        let span = ImageSpan::new(name, Some(correlation_id));
        let _entered = span.span().enter();

        let result = self.run_stages(reference, moving, &span);
        match result {
            Ok(ref outcome) => span.record_report(outcome.report.as_ref()),
            Err(ref e) => span.record_failure(e),
        }

        logging::clear_correlation_id();
        result
    }

    fn run_stages(
        &self,
        reference: &PreparedReference,
        moving: &MultiChannelImage,
        span: &ImageSpan,
    ) -> Result<AlignmentOutcome> {
        span.record_stage(AlignmentStage::Loaded);

        let (shifted, shift) = reference.spectrum.align(moving, self.phase.upsample_factor)?;
        span.record_shift(shift);
        span.record_stage(AlignmentStage::Pretranslated);

        let reference_points = match reference.fiducials {
            Some(ref points) if !self.phase.phase_only => points,
            _ => {
                span.record_stage(AlignmentStage::Done);
                return Ok(AlignmentOutcome {
                    image: shifted,
                    shift,
                    transforms: Vec::new(),
                    report: None,
                });
            }
        };

        let moving_points = self.detect_channels(&shifted, &reference.thresholds)?;
        span.record_stage(AlignmentStage::PerChannelDetected);

        let mut fits = Vec::with_capacity(moving_points.len());
        for (channel, (ref_pts, mov_pts)) in reference_points.iter().zip(&moving_points).enumerate() {
            let fit = nearest_neighbors_transform(ref_pts, mov_pts, self.matching.max_dist, &self.ransac)?;
            span.record_channel(channel, ref_pts.len(), mov_pts.len(), fit.pairs());
            fits.push(fit);
        }
        span.record_stage(AlignmentStage::Matched);

        let transforms: Vec<AffineTransform> = fits.iter().map(|f| f.transform).collect();
        let image = ImageTransformer::warp_channels(&shifted, &transforms)?;
        span.record_stage(AlignmentStage::Transformed);

        let channels = fits
            .iter()
            .enumerate()
            .map(|(channel, fit)| alignment_error(channel, fit, &self.matching))
            .collect::<Result<Vec<_>>>()?;
        span.record_stage(AlignmentStage::Scored);

        span.record_stage(AlignmentStage::Done);
        Ok(AlignmentOutcome {
            image,
            shift,
            transforms,
            report: Some(AlignmentReport { channels }),
        })
    }

    fn detect_channels(
        &self,
        image: &MultiChannelImage,
        thresholds: &[f64],
    ) -> Result<Vec<PointSet>> {
        let channels = image.len_of(Axis(2));
        if thresholds.len() != channels {
            return Err(AlignError::ShapeMismatch {
                expected: vec![channels],
                found: vec![thresholds.len()],
            });
        }

        image
            .axis_iter(Axis(2))
            .zip(thresholds)
            .map(|(plane, &threshold)| {
                let plane: Array2<f64> = plane.mapv(f64::from);
                self.detector.find_fiducials(&plane, threshold)
            })
            .collect()
    }
}

/// Scores one channel: precision of the matched distances before the fit
/// against precision after mapping the fit points through the transform.
///
/// Post-transform residuals above `residual_cutoff` are discarded as
/// outliers before the new precision is estimated.
pub fn alignment_error(channel: usize, fit: &RobustFit, matching: &MatchingConfig) -> Result<ChannelReport> {
    let transformed = fit.transform.apply_all(&fit.fit_points);
    let rematched = nearest_neighbors(&fit.ref_points, &transformed, matching.max_dist)?;
    let residuals: Vec<f64> = rematched
        .distances
        .into_iter()
        .filter(|&d| d <= matching.residual_cutoff)
        .collect();

    let new = dot_displacement(&residuals)?;
    let old = dot_displacement(&fit.distances)?;
    tracing::debug!(channel = channel, old = old, new = new, "channel precision");

    Ok(ChannelReport::from_precisions(channel, old, new))
}
