use crate::algorithms::{DetectionConfig, ProjectionConfig};
use crate::error::Result;
use crate::logging::LoggingConfig;
use crate::utils::RansacConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub detection: DetectionConfig,
    pub matching: MatchingConfig,
    pub ransac: RansacConfig,
    pub phase: PhaseConfig,
    pub projection: ProjectionConfig,
    pub batch: BatchConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Pairs farther apart than this (pixels) are dropped; `None` keeps all.
    pub max_dist: Option<f64>,
    /// Post-transform residuals above this (pixels) are treated as outliers
    /// when scoring.
    pub residual_cutoff: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseConfig {
    pub upsample_factor: usize,
    /// Stop after the global translation.
    pub phase_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub max_workers: usize,
    /// Output directory created next to each input image.
    pub output_dir_name: String,
    /// Write the reference image into the output directory as well.
    pub copy_reference: bool,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            max_dist: Some(2.0),
            residual_cutoff: 2.0,
        }
    }
}

impl Default for PhaseConfig {
    fn default() -> Self {
        Self {
            upsample_factor: 20,
            phase_only: false,
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_workers: 20,
            output_dir_name: "aligned_images".to_string(),
            copy_reference: true,
        }
    }
}

impl Config {
    /// Reads TOML, or JSON when the content starts with `{`.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;

        if content.trim_start().starts_with('{') {
            Ok(serde_json::from_str(&content)?)
        } else {
            Ok(toml::from_str(&content)?)
        }
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P, format: ConfigFormat) -> Result<()> {
        let content = match format {
            ConfigFormat::Json => serde_json::to_string_pretty(self)?,
            ConfigFormat::Toml => toml::to_string_pretty(self)?,
        };

        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        let (lo, hi) = self.detection.fwhm_range;
        if !(lo > 0.0 && hi >= lo) {
            errors.push(format!("detection fwhm_range must satisfy 0 < min <= max, got ({lo}, {hi})"));
        }
        if self.detection.fwhm_steps == 0 {
            errors.push("detection fwhm_steps must be at least 1".to_string());
        }
        if !(self.detection.threshold_sigma.is_finite() && self.detection.threshold_sigma >= 0.0) {
            errors.push("detection threshold_sigma must be non-negative".to_string());
        }
        if let Some(ref thresholds) = self.detection.thresholds {
            if thresholds.iter().any(|t| !t.is_finite()) {
                errors.push("detection thresholds must be finite".to_string());
            }
        }
        if !(self.detection.sigma_radius > 0.0) {
            errors.push("detection sigma_radius must be positive".to_string());
        }
        let (sharp_lo, sharp_hi) = self.detection.sharpness_range;
        if sharp_lo > sharp_hi {
            errors.push("detection sharpness_range must be ordered".to_string());
        }
        let (round_lo, round_hi) = self.detection.roundness_range;
        if round_lo > round_hi {
            errors.push("detection roundness_range must be ordered".to_string());
        }

        if let Some(d) = self.matching.max_dist {
            if !(d >= 0.0) {
                errors.push("matching max_dist must be non-negative".to_string());
            }
        }
        if !(self.matching.residual_cutoff >= 0.0) {
            errors.push("matching residual_cutoff must be non-negative".to_string());
        }

        if !(self.ransac.reprojection_threshold > 0.0) {
            errors.push("ransac reprojection_threshold must be positive".to_string());
        }
        if self.ransac.max_iterations == 0 {
            errors.push("ransac max_iterations must be at least 1".to_string());
        }
        if !(self.ransac.confidence > 0.0 && self.ransac.confidence < 1.0) {
            errors.push("ransac confidence must be in (0, 1)".to_string());
        }

        if self.phase.upsample_factor == 0 {
            errors.push("phase upsample_factor must be at least 1".to_string());
        }

        if !(self.projection.sigma > 0.0) {
            errors.push("projection sigma must be positive".to_string());
        }

        if self.batch.max_workers == 0 {
            errors.push("batch max_workers must be at least 1".to_string());
        }
        if self.batch.output_dir_name.trim().is_empty() {
            errors.push("batch output_dir_name must not be empty".to_string());
        }

        if let Err(e) = self.logging.validate() {
            errors.push(e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Toml,
}

impl FromStr for ConfigFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ConfigFormat::Json),
            "toml" => Ok(ConfigFormat::Toml),
            other => Err(format!("unknown config format '{other}', expected json or toml")),
        }
    }
}

/// Loads and validates `config_path`, falling back to defaults on any problem.
///
/// Runs before logging is set up, so problems go to stderr.
pub fn load_config_or_default(config_path: Option<&str>) -> Config {
    match config_path {
        Some(path) => match Config::load_from_file(path) {
            Ok(config) => {
                if let Err(errors) = config.validate() {
                    eprintln!("Configuration errors in '{}':", path);
                    for error in errors {
                        eprintln!("  - {}", error);
                    }
                    eprintln!("Using default configuration instead.");
                    Config::default()
                } else {
                    config
                }
            }
            Err(e) => {
                eprintln!("Failed to load config from '{}': {}", path, e);
                eprintln!("Using default configuration.");
                Config::default()
            }
        },
        None => Config::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::ProjectionMethod;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.detection.fwhm_range, (5.0, 10.0));
        assert_eq!(config.matching.max_dist, Some(2.0));
        assert_eq!(config.ransac.reprojection_threshold, 0.5);
        assert_eq!(config.phase.upsample_factor, 20);
        assert_eq!(config.batch.max_workers, 20);
    }

    #[test]
    fn test_toml_and_json_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.projection.method = ProjectionMethod::Median;
        config.ransac.seed = Some(9);

        for (name, format) in [("c.toml", ConfigFormat::Toml), ("c.json", ConfigFormat::Json)] {
            let path = dir.path().join(name);
            config.save_to_file(&path, format).unwrap();
            let loaded = Config::load_from_file(&path).unwrap();
            assert_eq!(loaded.projection.method, ProjectionMethod::Median);
            assert_eq!(loaded.ransac.seed, Some(9));
        }
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("partial.toml");
        fs::write(
            &path,
            "[phase]\nupsample_factor = 10\nphase_only = true\n",
        )
        .unwrap();
        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.phase.upsample_factor, 10);
        assert!(config.phase.phase_only);
        assert_eq!(config.batch.output_dir_name, "aligned_images");
    }

    #[test]
    fn test_partial_sections_keep_their_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sections.toml");
        fs::write(
            &path,
            "[detection]\nfwhm_range = [4.0, 8.0]\n\n[ransac]\nseed = 5\n\n[logging]\nglobal_level = \"debug\"\n",
        )
        .unwrap();

        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.detection.fwhm_range, (4.0, 8.0));
        assert_eq!(config.detection.fwhm_steps, 4);
        assert_eq!(config.detection.threshold_sigma, 2.0);
        assert_eq!(config.ransac.seed, Some(5));
        assert_eq!(config.ransac.reprojection_threshold, 0.5);
        assert_eq!(config.logging.global_level, "debug");
        assert!(config.logging.console_output);

        let loaded = load_config_or_default(path.to_str());
        assert_eq!(loaded.detection.fwhm_range, (4.0, 8.0));
    }

    #[test]
    fn test_validation_collects_errors() {
        let mut config = Config::default();
        config.detection.fwhm_range = (0.0, 3.0);
        config.batch.max_workers = 0;
        config.phase.upsample_factor = 0;
        config.detection.roundness_range = (0.5, -0.5);
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 4);
    }

    #[test]
    fn test_invalid_file_falls_back_to_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "[batch]\nmax_workers = 0\noutput_dir_name = \"x\"\ncopy_reference = false\n").unwrap();
        let config = load_config_or_default(path.to_str());
        assert_eq!(config.batch.max_workers, 20);
    }

    #[test]
    fn test_format_from_str() {
        assert_eq!("TOML".parse::<ConfigFormat>().unwrap(), ConfigFormat::Toml);
        assert!("yaml".parse::<ConfigFormat>().is_err());
    }
}
