use thiserror::Error;

/// Errors raised by the registration pipeline.
///
/// Each stage fails locally with its own variant; the orchestrator never
/// recovers from any of them and the batch layer only records them.
#[derive(Error, Debug)]
pub enum AlignError {
    #[error("no point sources detected at any candidate width in {fwhm_range:?}")]
    NoDetection { fwhm_range: (f64, f64) },

    #[error("insufficient correspondences for affine fit: {found} matched pairs, at least {required} required")]
    InsufficientCorrespondence { found: usize, required: usize },

    #[error("robust affine fit found no valid model among {pairs} matched pairs")]
    NoTransform { pairs: usize },

    #[error("precision estimate needs at least {required} residuals, got {found}")]
    InsufficientSample { found: usize, required: usize },

    #[error("shape mismatch: expected {expected:?}, got {found:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("empty input: {0}")]
    EmptyInput(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Config error: {0}")]
    Config(String),
}

impl From<toml::de::Error> for AlignError {
    fn from(err: toml::de::Error) -> Self {
        AlignError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for AlignError {
    fn from(err: toml::ser::Error) -> Self {
        AlignError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for AlignError {
    fn from(err: serde_json::Error) -> Self {
        AlignError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AlignError>;
