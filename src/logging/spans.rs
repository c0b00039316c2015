//! Span wrapper for one single-image alignment.

use crate::pipeline::{AlignmentReport, AlignmentStage};
use std::time::Instant;
use tracing::{field, span, Level, Span};
use uuid::Uuid;

/// Span covering one orchestrator invocation, tagged with the image name and
/// the thread's correlation id.
pub struct ImageSpan {
    span: Span,
    start_time: Instant,
    image: String,
}

impl ImageSpan {
    pub fn new(image: &str, correlation_id: Option<Uuid>) -> Self {
        let span = span!(
            Level::INFO,
            "image_alignment",
            image = image,
            correlation_id = field::Empty,
            stage = field::Empty,
            row_shift = field::Empty,
            col_shift = field::Empty,
            execution_time_ms = field::Empty,
        );
        if let Some(id) = correlation_id {
            span.record("correlation_id", field::display(id));
        }

        Self {
            span,
            start_time: Instant::now(),
            image: image.to_string(),
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn record_stage(&self, stage: AlignmentStage) {
        self.span.record("stage", field::display(stage));
        tracing::debug!(parent: &self.span, stage = %stage, "stage reached");
    }

    pub fn record_shift(&self, shift: (f64, f64)) {
        self.span.record("row_shift", shift.0);
        self.span.record("col_shift", shift.1);
        tracing::debug!(
            parent: &self.span,
            row_shift = shift.0,
            col_shift = shift.1,
            "pre-translation applied"
        );
    }

    pub fn record_channel(&self, channel: usize, reference_points: usize, moving_points: usize, pairs: usize) {
        tracing::debug!(
            parent: &self.span,
            channel = channel,
            reference_points = reference_points,
            moving_points = moving_points,
            pairs = pairs,
            "channel matched"
        );
    }

    pub fn record_report(&self, report: Option<&AlignmentReport>) {
        let elapsed = self.start_time.elapsed().as_millis() as f64;
        self.span.record("execution_time_ms", elapsed);

        match report {
            Some(report) => {
                for row in &report.channels {
                    tracing::info!(
                        parent: &self.span,
                        image = %self.image,
                        channel = row.channel,
                        improvement = row.improvement,
                        precision = row.precision,
                        "channel alignment error"
                    );
                }
            }
            None => tracing::info!(
                parent: &self.span,
                image = %self.image,
                execution_time_ms = elapsed,
                "phase-only alignment finished"
            ),
        }
    }

    pub fn record_failure(&self, error: &crate::AlignError) {
        tracing::warn!(parent: &self.span, image = %self.image, error = %error, "alignment failed");
    }
}
