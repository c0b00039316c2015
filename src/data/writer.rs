use crate::data::loader::to_rgb16;
use crate::error::Result;
use crate::pipeline::{AlignmentReport, ImageSink, MultiChannelImage, ReportSink};
use chrono::{DateTime, Utc};
use image::ImageFormat;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Output file stem: the file name with its last extension removed and the
/// remaining dot-separated parts joined by `_`.
///
/// `"tile.001.ome.tif"` becomes `"tile_001_ome"`.
pub fn output_stem(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() > 1 {
        parts[..parts.len() - 1].join("_")
    } else {
        name
    }
}

/// `<parent of input>/<dir_name>`.
pub fn output_dir(input: &Path, dir_name: &str) -> PathBuf {
    input
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(dir_name)
}

/// 16-bit RGB TIFF writer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TiffImageSink;

impl ImageSink for TiffImageSink {
    fn save(&self, image: &MultiChannelImage, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        to_rgb16(image)?.save_with_format(path, ImageFormat::Tiff)?;
        tracing::debug!(path = %path.display(), "wrote image");
        Ok(())
    }
}

/// Plain text report: one `"<channel> <improvement> <precision>"` line per
/// channel.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextReportSink;

impl TextReportSink {
    pub fn render(report: &AlignmentReport) -> String {
        report
            .channels
            .iter()
            .map(|row| format!("{} {} {}\n", row.channel, row.improvement, row.precision))
            .collect()
    }
}

impl ReportSink for TextReportSink {
    fn write(&self, report: &AlignmentReport, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(path)?;
        file.write_all(Self::render(report).as_bytes())?;
        Ok(())
    }

    fn suffix(&self) -> &str {
        "_error.txt"
    }
}

#[derive(Serialize)]
struct TimestampedReport<'a> {
    generated_at: DateTime<Utc>,
    #[serde(flatten)]
    report: &'a AlignmentReport,
}

/// Pretty-printed JSON report with a generation timestamp.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonReportSink;

impl ReportSink for JsonReportSink {
    fn write(&self, report: &AlignmentReport, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let record = TimestampedReport {
            generated_at: Utc::now(),
            report,
        };
        fs::write(path, serde_json::to_string_pretty(&record)?)?;
        Ok(())
    }

    fn suffix(&self) -> &str {
        "_error.json"
    }
}
