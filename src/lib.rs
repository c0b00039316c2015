//! Fiducial-based registration of multi-channel microscopy images.
//!
//! A moving image is first pre-aligned to the reference by phase
//! correlation, then each channel gets its own affine correction fitted on
//! matched point sources, and the change in localization precision is
//! reported per channel.

pub mod algorithms;
pub mod config;
pub mod data;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod utils;

pub use algorithms::*;
pub use config::{load_config_or_default, Config, ConfigFormat};
pub use data::*;
pub use error::{AlignError, Result};
pub use pipeline::*;
pub use utils::{RansacConfig, RansacResult};
