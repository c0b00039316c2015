use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use fiducial_align::logging::{init_logging, LoggingConfig};
use fiducial_align::*;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "align")]
#[command(about = "Fiducial-based registration of multi-channel microscopy images")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML or JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Align moving images onto a reference image
    Align {
        /// Reference image every moving image is registered to
        #[arg(short, long)]
        reference: PathBuf,

        /// Moving images
        #[arg(required = true)]
        moving: Vec<PathBuf>,

        /// Only apply the global phase-correlation shift
        #[arg(long)]
        phase_only: bool,

        /// Maximum pairing distance between fiducials (pixels)
        #[arg(long)]
        max_dist: Option<f64>,

        /// RANSAC reprojection threshold (pixels)
        #[arg(long)]
        ransac_threshold: Option<f64>,

        /// Smallest candidate detection FWHM
        #[arg(long)]
        fwhm_min: Option<f64>,

        /// Largest candidate detection FWHM
        #[arg(long)]
        fwhm_max: Option<f64>,

        /// Write reports as JSON instead of plain text
        #[arg(long)]
        json_report: bool,
    },

    /// Project a stack of exposures into a single image
    Project {
        /// Images of the stack, all of the same shape
        #[arg(required = true)]
        images: Vec<PathBuf>,

        #[arg(short, long, value_enum, default_value_t = MethodArg::SigmaClipMean)]
        method: MethodArg,

        /// Clipping bound in standard deviations
        #[arg(short, long)]
        sigma: Option<f64>,

        /// Output file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the automatic per-channel detection thresholds of an image
    Thresholds {
        image: PathBuf,
    },

    /// Write the default configuration to a file
    Config {
        #[arg(short, long)]
        output: PathBuf,

        #[arg(short, long, default_value = "toml")]
        format: ConfigFormat,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum MethodArg {
    Median,
    SigmaClipMean,
}

impl From<MethodArg> for ProjectionMethod {
    fn from(arg: MethodArg) -> Self {
        match arg {
            MethodArg::Median => ProjectionMethod::Median,
            MethodArg::SigmaClipMean => ProjectionMethod::SigmaClipMean,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config_or_default(cli.config.as_deref().and_then(Path::to_str));

    let logging = match cli.verbose {
        0 => config.logging.clone(),
        1 => config.logging.clone().with_level("info"),
        2 => config.logging.clone().with_level("debug"),
        _ => LoggingConfig::development().with_level("trace"),
    };
    let _guard = init_logging(&logging)?;

    match cli.command {
        Commands::Align {
            reference,
            moving,
            phase_only,
            max_dist,
            ransac_threshold,
            fwhm_min,
            fwhm_max,
            json_report,
        } => {
            config.phase.phase_only |= phase_only;
            if max_dist.is_some() {
                config.matching.max_dist = max_dist;
            }
            if let Some(t) = ransac_threshold {
                config.ransac.reprojection_threshold = t;
            }
            if let Some(lo) = fwhm_min {
                config.detection.fwhm_range.0 = lo;
            }
            if let Some(hi) = fwhm_max {
                config.detection.fwhm_range.1 = hi;
            }
            handle_align(&config, &reference, &moving, json_report)?;
        }
        Commands::Project {
            images,
            method,
            sigma,
            output,
        } => {
            config.projection.method = method.into();
            if let Some(s) = sigma {
                config.projection.sigma = s;
            }
            handle_project(&config, &images, output)?;
        }
        Commands::Thresholds { image } => {
            handle_thresholds(&config, &image)?;
        }
        Commands::Config { output, format } => {
            config
                .save_to_file(&output, format)
                .with_context(|| format!("failed to write {}", output.display()))?;
            println!("Configuration written to {}", output.display());
        }
    }

    Ok(())
}

fn validated(config: &Config) -> anyhow::Result<()> {
    config
        .validate()
        .map_err(|errors| anyhow::anyhow!("invalid configuration:\n  {}", errors.join("\n  ")))
}

fn handle_align(
    config: &Config,
    reference: &Path,
    moving: &[PathBuf],
    json_report: bool,
) -> anyhow::Result<()> {
    validated(config)?;

    let batch = BatchAligner::new(config);
    let report_sink: Box<dyn ReportSink> = if json_report {
        Box::new(JsonReportSink)
    } else {
        Box::new(TextReportSink)
    };

    let summary = batch
        .run(
            reference,
            moving,
            &FileImageSource,
            &TiffImageSink,
            report_sink.as_ref(),
        )
        .with_context(|| format!("batch against {} failed", reference.display()))?;

    println!(
        "Aligned {}/{} images",
        summary.succeeded.len(),
        summary.total()
    );
    if let Some(ref path) = summary.reference_output {
        println!("Reference copied to {}", path.display());
    }
    for failure in &summary.failures {
        eprintln!("  {}: {}", failure.path.display(), failure.error);
    }

    if summary.is_success() {
        Ok(())
    } else {
        anyhow::bail!("{} image(s) failed", summary.failures.len())
    }
}

fn handle_project(config: &Config, images: &[PathBuf], output: Option<PathBuf>) -> anyhow::Result<()> {
    validated(config)?;

    let stack = images
        .iter()
        .map(|path| {
            FileImageSource
                .load(path)
                .with_context(|| format!("failed to load {}", path.display()))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let projected = project_stack(&stack, &config.projection)?;

    let output = match output {
        Some(path) => path,
        None => output_dir(&images[0], "projected_image")
            .join(format!("{}_projected_image.tif", config.projection.method)),
    };
    TiffImageSink.save(&projected, &output)?;
    println!("Projected {} images to {}", images.len(), output.display());
    Ok(())
}

fn handle_thresholds(config: &Config, image: &Path) -> anyhow::Result<()> {
    let image_data = FileImageSource
        .load(image)
        .with_context(|| format!("failed to load {}", image.display()))?;
    let aligner = SingleImageAligner::new(config);
    for (channel, threshold) in aligner.thresholds(&image_data)?.iter().enumerate() {
        println!("{} {:.3}", channel, threshold);
    }
    Ok(())
}
