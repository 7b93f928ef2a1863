//! woundsize: measure wound surface area in photographs.
//!
//! Decodes each input image, runs the measurement pipeline, and prints
//! the area in square centimeters. Useful for:
//!
//! - Measuring a batch of photographs in parallel
//! - Tuning blur, Canny thresholds, and the minimum contour area
//! - Writing every intermediate stage as PNG to see where segmentation
//!   goes wrong
//! - Measuring per-stage durations
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin woundsize -- [OPTIONS] <IMAGES>...
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use rayon::prelude::*;
use serde::Serialize;
use woundsize_pipeline::diagnostics::{Clock, PipelineDiagnostics};
use woundsize_pipeline::{
    AggregationPolicy, ChainApproximation, ContourSource, ContourTracerKind, DisplayBuffer,
    ElementShape, MeasurementResult, PipelineConfig, RasterBuffer, RetrievalMode,
    StageEvent, StructuringElementConfig, ThresholdMode,
};

/// Estimate wound surface area from photographs.
///
/// Every image is segmented with Otsu's method, cleaned with a
/// morphological closing, traced into contours, and converted from
/// pixels to square centimeters at the given resolution.
#[derive(Parser)]
#[command(name = "woundsize", version)]
struct Cli {
    /// Input images (PNG, JPEG, BMP, WebP).
    #[arg(required = true)]
    images: Vec<PathBuf>,

    /// Capture resolution in dots per inch.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_DPI)]
    dpi: f64,

    /// Gaussian kernel size in pixels (odd).
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_BLUR_KERNEL_SIZE)]
    blur_kernel_size: u32,

    /// Canny low threshold.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_CANNY_LOW)]
    canny_low: f32,

    /// Canny high threshold.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_CANNY_HIGH)]
    canny_high: f32,

    /// Use the L2 gradient norm in Canny.
    #[arg(long)]
    canny_l2: bool,

    /// Contours at or below this area (px²) are ignored.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_MIN_CONTOUR_AREA)]
    min_area: f64,

    /// Cut this fraction of min(width, height) from every side of the mask.
    #[arg(long, num_args = 0..=1, default_missing_value = "0.1")]
    roi_margin: Option<f64>,

    /// Which side of the Otsu level is the wound.
    #[arg(long, value_enum, default_value_t = Polarity::Dark)]
    wound: Polarity,

    /// Structuring element shape for closing.
    #[arg(long, value_enum, default_value_t = Shape::Ellipse)]
    element_shape: Shape,

    /// Structuring element width.
    #[arg(long, default_value_t = StructuringElementConfig::default().width)]
    element_width: u32,

    /// Structuring element height.
    #[arg(long, default_value_t = StructuringElementConfig::default().height)]
    element_height: u32,

    /// Raster the contours are traced on.
    #[arg(long, value_enum, default_value_t = Source::Mask)]
    source: Source,

    /// Contour tracing algorithm.
    #[arg(long, value_enum, default_value_t = Tracer::BorderFollowing)]
    tracer: Tracer,

    /// Return only outermost boundaries.
    #[arg(long)]
    external: bool,

    /// Keep every boundary pixel instead of compressing straight runs.
    #[arg(long)]
    no_chain_approx: bool,

    /// Report only the largest contour instead of the sum.
    #[arg(long)]
    largest_only: bool,

    /// Complete `PipelineConfig` as JSON.
    ///
    /// Takes precedence over every individual parameter flag.
    /// The JSON must be a valid `PipelineConfig` serialization; missing
    /// fields take their defaults.
    #[arg(long)]
    config_json: Option<String>,

    /// Write every stage raster as `<stem>-<stage>.png` into this directory.
    #[arg(long)]
    stages_dir: Option<PathBuf>,

    /// Time every stage and print the diagnostics report.
    #[arg(long)]
    diagnostics: bool,

    /// Output results as JSON instead of text.
    #[arg(long)]
    json: bool,
}

/// Wound polarity relative to the surrounding skin.
#[derive(Clone, Copy, ValueEnum)]
enum Polarity {
    /// Wound darker than skin.
    Dark,
    /// Wound lighter than background.
    Light,
}

/// Structuring element shape selection.
#[derive(Clone, Copy, ValueEnum)]
enum Shape {
    /// Rasterized ellipse.
    Ellipse,
    /// Filled rectangle.
    Rect,
    /// Cross through the anchor.
    Cross,
}

/// Contour source selection.
#[derive(Clone, Copy, ValueEnum)]
enum Source {
    /// Otsu mask before closing.
    Threshold,
    /// Mask after closing.
    Mask,
    /// Closed Canny edge map; only outer borders are counted.
    Edges,
}

/// Contour tracer selection.
#[derive(Clone, Copy, ValueEnum)]
enum Tracer {
    /// Suzuki-Abe border following.
    BorderFollowing,
    /// Moore-neighbor tracing.
    Moore,
}

/// Build a [`PipelineConfig`] from CLI arguments.
///
/// `--config-json` wins over the individual flags. The result is
/// validated before any image is read.
fn config_from_cli(cli: &Cli) -> Result<PipelineConfig, String> {
    let config = if let Some(ref json) = cli.config_json {
        serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"))?
    } else {
        PipelineConfig {
            blur_kernel_size: cli.blur_kernel_size,
            threshold_mode: match cli.wound {
                Polarity::Dark => ThresholdMode::OtsuInverted,
                Polarity::Light => ThresholdMode::Otsu,
            },
            structuring_element: StructuringElementConfig {
                shape: match cli.element_shape {
                    Shape::Ellipse => ElementShape::Ellipse,
                    Shape::Rect => ElementShape::Rect,
                    Shape::Cross => ElementShape::Cross,
                },
                width: cli.element_width,
                height: cli.element_height,
            },
            canny_low: cli.canny_low,
            canny_high: cli.canny_high,
            canny_l2_gradient: cli.canny_l2,
            min_contour_area: cli.min_area,
            dpi: cli.dpi,
            retrieval: if cli.external {
                RetrievalMode::External
            } else {
                RetrievalMode::List
            },
            contour_tracer: match cli.tracer {
                Tracer::BorderFollowing => ContourTracerKind::BorderFollowing,
                Tracer::Moore => ContourTracerKind::MooreNeighbor,
            },
            chain_approximation: if cli.no_chain_approx {
                ChainApproximation::None
            } else {
                ChainApproximation::Simple
            },
            contour_source: match cli.source {
                Source::Threshold => ContourSource::Threshold,
                Source::Mask => ContourSource::Mask,
                Source::Edges => ContourSource::Edges,
            },
            aggregation: if cli.largest_only {
                AggregationPolicy::LargestOnly
            } else {
                AggregationPolicy::SumAboveThreshold
            },
            roi_margin: cli.roi_margin,
        }
    };
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

/// Outcome for one input file.
#[derive(Serialize)]
struct FileReport {
    path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    measurement: Option<MeasurementResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    diagnostics: Option<PipelineDiagnostics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match config_from_cli(&cli) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    if let Some(ref dir) = cli.stages_dir
        && let Err(e) = std::fs::create_dir_all(dir)
    {
        eprintln!("Error creating {}: {e}", dir.display());
        return ExitCode::FAILURE;
    }

    tracing::info!(images = cli.images.len(), dpi = config.dpi, "measuring");

    let reports: Vec<FileReport> = cli
        .images
        .par_iter()
        .map(|path| match measure_file(path, &config, &cli) {
            Ok((measurement, diagnostics)) => FileReport {
                path: path.clone(),
                measurement: Some(measurement),
                diagnostics,
                error: None,
            },
            Err(error) => {
                tracing::error!(path = %path.display(), %error, "measurement failed");
                FileReport {
                    path: path.clone(),
                    measurement: None,
                    diagnostics: None,
                    error: Some(error),
                }
            }
        })
        .collect();

    if cli.json {
        match serde_json::to_string_pretty(&reports) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("Error serializing results: {e}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        for report in &reports {
            print_report(report);
        }
    }

    if reports.iter().any(|r| r.error.is_some()) {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// Decode one file and measure it.
///
/// With `--diagnostics` every stage is timed; with `--stages-dir` every
/// display raster is written as it is produced.
fn measure_file(
    path: &Path,
    config: &PipelineConfig,
    cli: &Cli,
) -> Result<(MeasurementResult, Option<PipelineDiagnostics>), String> {
    let raster = decode(path)?;
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("image");

    if cli.diagnostics {
        let (staged, diagnostics) =
            woundsize_pipeline::process_staged_with_diagnostics(raster, config, &StdClock)
                .map_err(|e| e.to_string())?;
        if let Some(ref dir) = cli.stages_dir {
            for buffer in staged.display_buffers() {
                save_stage(dir, stem, &buffer)?;
            }
        }
        return Ok((staged.measurement, Some(diagnostics)));
    }

    let Some(ref dir) = cli.stages_dir else {
        let measurement = woundsize_pipeline::process(raster, config).map_err(|e| e.to_string())?;
        return Ok((measurement, None));
    };

    let mut write_errors = Vec::new();
    let report = woundsize_pipeline::run(raster, config, &mut |event: StageEvent<'_>| {
        match event {
            StageEvent::Entered(state) => {
                tracing::debug!(path = %path.display(), ?state, "entered");
            }
            StageEvent::Output(buffer) => {
                if let Err(e) = save_stage(dir, stem, &buffer) {
                    write_errors.push(e);
                }
            }
            StageEvent::Failed(_) | StageEvent::Done(_) => {}
        }
    });
    let measurement = report.result.map_err(|e| e.to_string())?;
    if let Some(first) = write_errors.into_iter().next() {
        return Err(first);
    }
    Ok((measurement, None))
}

/// Read and decode an image file into a pipeline raster.
fn decode(path: &Path) -> Result<RasterBuffer, String> {
    let image = image::open(path).map_err(|e| format!("Error reading {}: {e}", path.display()))?;
    Ok(match image {
        image::DynamicImage::ImageLuma8(gray) => RasterBuffer::from(gray),
        other => RasterBuffer::from(other.to_rgba8()),
    })
}

/// Write one display raster as `<dir>/<stem>-<stage>.png`.
fn save_stage(dir: &Path, stem: &str, buffer: &DisplayBuffer) -> Result<(), String> {
    let path = dir.join(format!("{stem}-{}.png", buffer.name));
    let color = match buffer.raster.channels() {
        woundsize_pipeline::Channels::Gray => image::ExtendedColorType::L8,
        woundsize_pipeline::Channels::Rgb => image::ExtendedColorType::Rgb8,
        woundsize_pipeline::Channels::Rgba => image::ExtendedColorType::Rgba8,
    };
    image::save_buffer(
        &path,
        buffer.raster.data(),
        buffer.raster.width(),
        buffer.raster.height(),
        color,
    )
    .map_err(|e| format!("Error writing {}: {e}", path.display()))?;
    tracing::debug!(path = %path.display(), "wrote stage");
    Ok(())
}

/// Print a human-readable result for one file.
fn print_report(report: &FileReport) {
    println!("{}", report.path.display());
    if let Some(ref m) = report.measurement {
        println!("  {}", m.summary());
        println!(
            "  {:.1} px² in {} contour(s) at {} dpi, Otsu level {}",
            m.pixel_area, m.contour_count, m.dpi, m.threshold,
        );
        for warning in &m.warnings {
            println!("  warning: {warning}");
        }
    }
    if let Some(ref d) = report.diagnostics {
        println!();
        println!("{}", d.report());
    }
    if let Some(ref e) = report.error {
        println!("  error: {e}");
    }
}

/// Wall-clock [`Clock`] over [`std::time::Instant`].
struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn elapsed(&self, since: &Instant) -> Duration {
        since.elapsed()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("woundsize").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn defaults_match_pipeline_defaults() {
        let config = config_from_cli(&parse(&["a.png"])).unwrap();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn flags_override_defaults() {
        let cli = parse(&[
            "a.png",
            "--dpi",
            "300",
            "--external",
            "--largest-only",
            "--roi-margin",
            "--source",
            "threshold",
            "--tracer",
            "moore",
        ]);
        let config = config_from_cli(&cli).unwrap();
        assert!((config.dpi - 300.0).abs() < f64::EPSILON);
        assert_eq!(config.retrieval, RetrievalMode::External);
        assert_eq!(config.aggregation, AggregationPolicy::LargestOnly);
        assert_eq!(config.roi_margin, Some(0.1));
        assert_eq!(config.contour_source, ContourSource::Threshold);
        assert_eq!(config.contour_tracer, ContourTracerKind::MooreNeighbor);
    }

    #[test]
    fn config_json_overrides_flags() {
        let cli = parse(&["a.png", "--dpi", "300", "--config-json", r#"{"dpi": 140.0}"#]);
        let config = config_from_cli(&cli).unwrap();
        assert!((config.dpi - 140.0).abs() < f64::EPSILON);
    }

    #[test]
    fn invalid_values_are_rejected_before_processing() {
        assert!(config_from_cli(&parse(&["a.png", "--blur-kernel-size", "4"])).is_err());
        assert!(config_from_cli(&parse(&["a.png", "--config-json", "{"])).is_err());
    }

    #[test]
    fn at_least_one_image_is_required() {
        assert!(Cli::try_parse_from(["woundsize"]).is_err());
    }
}
