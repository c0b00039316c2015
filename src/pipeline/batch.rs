//! Fans the single-image aligner out over many moving images.
//!
//! Workers only compute; every outcome is sent back to the calling thread,
//! which performs all writes one at a time.

use crate::config::{BatchConfig, Config};
use crate::data::{output_dir, output_stem};
use crate::error::{AlignError, Result};
use crate::pipeline::{
    AlignmentOutcome, ImageSink, ImageSource, ReportSink, SingleImageAligner,
};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Instant;

/// A moving image that produced no output.
#[derive(Debug)]
pub struct ItemFailure {
    pub path: PathBuf,
    pub error: AlignError,
}

#[derive(Debug, Default)]
pub struct BatchSummary {
    /// Inputs whose aligned image (and report) were written.
    pub succeeded: Vec<PathBuf>,
    pub failures: Vec<ItemFailure>,
    /// Where the reference copy was written, if it was.
    pub reference_output: Option<PathBuf>,
}

impl BatchSummary {
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failures.len()
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct BatchAligner {
    aligner: SingleImageAligner,
    batch: BatchConfig,
}

impl BatchAligner {
    pub fn new(config: &Config) -> Self {
        Self {
            aligner: SingleImageAligner::new(config),
            batch: config.batch.clone(),
        }
    }

    /// Aligns every path in `moving_paths` onto the image at `reference_path`.
    ///
    /// Failing to load or prepare the reference fails the batch. A failure on
    /// any single moving image, in alignment or in persistence, is recorded in
    /// the summary and the remaining images carry on.
    pub fn run(
        &self,
        reference_path: &Path,
        moving_paths: &[PathBuf],
        source: &dyn ImageSource,
        image_sink: &dyn ImageSink,
        report_sink: &dyn ReportSink,
    ) -> Result<BatchSummary> {
        let start = Instant::now();
        let reference = source.load(reference_path)?;
        let prepared = self.aligner.prepare_reference(&reference)?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.batch.max_workers.max(1))
            .thread_name(|i| format!("align-worker-{i}"))
            .build()
            .map_err(|e| AlignError::InvalidParameter(format!("cannot build worker pool: {e}")))?;

        tracing::info!(
            reference = %reference_path.display(),
            images = moving_paths.len(),
            workers = self.batch.max_workers,
            "batch alignment started"
        );

        let mut summary = BatchSummary::default();
        // Bounded so finished images wait on the writer instead of piling up.
        let (tx, rx) =
            mpsc::sync_channel::<(PathBuf, Result<AlignmentOutcome>)>(self.batch.max_workers.max(1));
        let aligner = &self.aligner;
        let prepared = &prepared;

        pool.in_place_scope(|scope| {
            for path in moving_paths {
                let tx = tx.clone();
                scope.spawn(move |_| {
                    let name = path.display().to_string();
                    let result = source
                        .load(path)
                        .and_then(|moving| aligner.align_prepared(prepared, &moving, &name));
                    // The receiver lives until every sender is dropped.
                    let _ = tx.send((path.clone(), result));
                });
            }
            drop(tx);

            for (path, result) in rx {
                let outcome = result.and_then(|outcome| {
                    self.persist(&path, &outcome, image_sink, report_sink)
                });
                match outcome {
                    Ok(()) => summary.succeeded.push(path),
                    Err(error) => {
                        tracing::error!(path = %path.display(), error = %error, "image failed");
                        summary.failures.push(ItemFailure { path, error });
                    }
                }
            }
        });

        if self.batch.copy_reference {
            if let Some(first) = moving_paths.first() {
                let dir = output_dir(first, &self.batch.output_dir_name);
                let target = dir.join(format!(
                    "{}.{}",
                    output_stem(reference_path),
                    image_sink.extension()
                ));
                match image_sink.save(&reference, &target) {
                    Ok(()) => summary.reference_output = Some(target),
                    Err(error) => {
                        tracing::error!(path = %target.display(), error = %error, "reference copy failed");
                        summary.failures.push(ItemFailure {
                            path: reference_path.to_path_buf(),
                            error,
                        });
                    }
                }
            }
        }

        tracing::info!(
            succeeded = summary.succeeded.len(),
            failed = summary.failures.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "batch alignment finished"
        );

        Ok(summary)
    }

    /// Writes one outcome next to its input: the report unless the run was
    /// phase-only, then the image.
    ///
    /// An item either gets both files or neither. The report goes first so a
    /// failed report never leaves an orphan image, and it is discarded again
    /// if the image cannot be saved.
    fn persist(
        &self,
        input: &Path,
        outcome: &AlignmentOutcome,
        image_sink: &dyn ImageSink,
        report_sink: &dyn ReportSink,
    ) -> Result<()> {
        let dir = output_dir(input, &self.batch.output_dir_name);
        let stem = output_stem(input);

        let report_path = match outcome.report {
            Some(ref report) => {
                let path = dir.join(format!("{stem}{}", report_sink.suffix()));
                report_sink.write(report, &path)?;
                Some(path)
            }
            None => None,
        };

        let image_path = dir.join(format!("{stem}.{}", image_sink.extension()));
        if let Err(error) = image_sink.save(&outcome.image, &image_path) {
            if let Some(path) = report_path {
                if let Err(cleanup) = report_sink.discard(&path) {
                    tracing::warn!(path = %path.display(), error = %cleanup, "could not remove report");
                }
            }
            return Err(error);
        }

        tracing::debug!(path = %image_path.display(), "persisted aligned image");
        Ok(())
    }
}
