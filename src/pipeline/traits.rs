use crate::pipeline::{AlignmentReport, MultiChannelImage};
use crate::Result;
use std::fs;
use std::io;
use std::path::Path;

/// Supplies decoded multi-channel images.
pub trait ImageSource: Send + Sync {
    fn load(&self, path: &Path) -> Result<MultiChannelImage>;
}

/// Persists aligned images.
pub trait ImageSink {
    fn save(&self, image: &MultiChannelImage, path: &Path) -> Result<()>;

    /// Extension (without dot) of the files written by this sink.
    fn extension(&self) -> &str {
        "tif"
    }
}

/// Persists one alignment report per image.
pub trait ReportSink {
    fn write(&self, report: &AlignmentReport, path: &Path) -> Result<()>;

    /// Suffix appended to the output stem, extension included.
    fn suffix(&self) -> &str;

    /// Removes a report whose image could not be saved. A missing file is
    /// not an error.
    fn discard(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}
