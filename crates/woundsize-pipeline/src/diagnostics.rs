//! Per-stage timing and metrics for a measurement run.
//!
//! [`process_staged_with_diagnostics`] drives the typed stage chain and
//! reads a caller-supplied [`Clock`] around every transition, so the
//! core crate never touches the system time itself. The result
//! serializes to JSON for offline comparison of parameter sets.

use std::fmt::Write as _;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::pipeline::{Pipeline, PipelineStage};
use crate::raster::RasterBuffer;
use crate::types::{PipelineConfig, PipelineError, StagedResult};

/// `Duration` as an `f64` number of seconds.
mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        value.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(raw)
            .map_err(|e| serde::de::Error::custom(format!("invalid duration {raw}: {e}")))
    }
}

/// Source of timestamps for stage timing.
///
/// Native callers wrap `std::time::Instant`; tests count ticks.
pub trait Clock {
    /// Opaque point in time.
    type Instant;

    /// The current time.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// Timing and metrics for every stage of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDiagnostics {
    /// Grayscale reduction and RGBA expansion.
    pub decode: StageDiagnostics,
    /// Gaussian blur.
    pub preprocess: StageDiagnostics,
    /// Otsu thresholding and optional region mask.
    pub segment: StageDiagnostics,
    /// Morphological closing.
    pub clean: StageDiagnostics,
    /// Canny edge detection.
    pub edge_detection: StageDiagnostics,
    /// Contour tracing.
    pub contour_extraction: StageDiagnostics,
    /// Area aggregation, unit conversion, and overlay.
    pub measure: StageDiagnostics,
    /// Time from validation to the final stage.
    #[serde(with = "seconds")]
    pub total_duration: Duration,
    /// Headline numbers of the run.
    pub summary: PipelineSummary,
}

/// One stage's timing and metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDiagnostics {
    #[serde(with = "seconds")]
    pub duration: Duration,
    pub metrics: StageMetrics,
}

/// What a stage produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageMetrics {
    /// The raster handed to the pipeline.
    Input {
        width: u32,
        height: u32,
        channels: usize,
    },
    Decode {
        width: u32,
        height: u32,
        /// `width * height`.
        pixel_count: u64,
    },
    Preprocess {
        kernel_size: u32,
        /// Derived from the kernel size.
        sigma: f64,
    },
    Segment {
        level: u8,
        /// The histogram had a single occupied bin.
        degenerate: bool,
        /// Non-zero pixels in the working mask.
        foreground: u64,
        /// Present when region masking ran.
        roi_margin: Option<f64>,
    },
    Clean {
        element_width: u32,
        element_height: u32,
        foreground_before: u64,
        foreground_after: u64,
    },
    EdgeDetection {
        /// Thresholds after clamping.
        low: f32,
        high: f32,
        edge_pixels: u64,
    },
    ContourExtraction {
        contours: usize,
        /// Of which hole boundaries.
        holes: usize,
        /// Boundary points over all contours.
        points: usize,
        /// Largest enclosed area in px².
        largest_area: f64,
    },
    Measure {
        /// Contours that passed the minimum-area filter.
        kept: usize,
        pixel_area: f64,
        dpi: f64,
        area_cm2: f64,
    },
}

/// Headline numbers of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSummary {
    pub image_width: u32,
    pub image_height: u32,
    /// Contours traced.
    pub contour_count: usize,
    /// Contours that contributed to the area.
    pub kept_contour_count: usize,
    pub pixel_area: f64,
    pub area_cm2: f64,
}

impl PipelineDiagnostics {
    /// Name and diagnostics of every stage, in run order.
    #[must_use]
    pub fn stages(&self) -> [(&'static str, &StageDiagnostics); 7] {
        [
            ("decode", &self.decode),
            ("preprocess", &self.preprocess),
            ("segment", &self.segment),
            ("clean", &self.clean),
            ("edges", &self.edge_detection),
            ("contours", &self.contour_extraction),
            ("measure", &self.measure),
        ]
    }

    /// Plain-text table of the run, one row per stage.
    #[must_use]
    pub fn report(&self) -> String {
        let total_ms = millis(self.total_duration);
        let s = &self.summary;
        let mut out = String::new();
        // Writing into a String cannot fail.
        let _ = writeln!(out, "Measurement diagnostics");
        let _ = writeln!(
            out,
            "{}x{} image, {total_ms:.3}ms total",
            s.image_width, s.image_height
        );
        let _ = writeln!(out);
        let _ = writeln!(out, "{:<12} {:>10} {:>7}  detail", "stage", "ms", "share");
        for (name, stage) in self.stages() {
            let ms = millis(stage.duration);
            let share = if total_ms > 0.0 {
                100.0 * ms / total_ms
            } else {
                0.0
            };
            let _ = writeln!(
                out,
                "{name:<12} {ms:>10.3} {share:>6.1}%  {}",
                describe(&stage.metrics)
            );
        }
        let _ = writeln!(out);
        let _ = write!(
            out,
            "{} of {} contours kept: {:.1} px² = {:.4} cm²",
            s.kept_contour_count, s.contour_count, s.pixel_area, s.area_cm2
        );
        out
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1e3
}

/// One-line rendering of a stage's metrics.
fn describe(metrics: &StageMetrics) -> String {
    match *metrics {
        StageMetrics::Input {
            width,
            height,
            channels,
        } => format!("{width}x{height}x{channels}"),
        StageMetrics::Decode {
            width,
            height,
            pixel_count,
        } => format!("{width}x{height} ({pixel_count} px)"),
        StageMetrics::Preprocess { kernel_size, sigma } => {
            format!("kernel {kernel_size}, sigma {sigma:.2}")
        }
        StageMetrics::Segment {
            level,
            degenerate,
            foreground,
            roi_margin,
        } => {
            let mut text = format!("level {level}, {foreground} fg px");
            if degenerate {
                text.push_str(", uniform");
            }
            if let Some(margin) = roi_margin {
                let _ = write!(text, ", roi {margin:.2}");
            }
            text
        }
        StageMetrics::Clean {
            element_width,
            element_height,
            foreground_before,
            foreground_after,
        } => format!(
            "{element_width}x{element_height} element, fg {foreground_before} -> {foreground_after}"
        ),
        StageMetrics::EdgeDetection {
            low,
            high,
            edge_pixels,
        } => format!("{low:.0}/{high:.0}, {edge_pixels} edge px"),
        StageMetrics::ContourExtraction {
            contours,
            holes,
            points,
            largest_area,
        } => format!("{contours} ({holes} holes), {points} pts, largest {largest_area:.1} px²"),
        StageMetrics::Measure {
            kept,
            pixel_area,
            dpi,
            area_cm2,
        } => format!("{kept} kept, {pixel_area:.1} px² at {dpi} dpi = {area_cm2:.4} cm²"),
    }
}

/// Number of non-zero pixels in a mask.
pub(crate) fn count_foreground(image: &image::GrayImage) -> u64 {
    image.pixels().map(|p| u64::from(p.0[0] != 0)).sum()
}

/// Advance one stage and read the clock around it.
fn timed<C, S>(
    clock: &C,
    advance: impl FnOnce() -> Result<S, PipelineError>,
) -> Result<(S, StageDiagnostics), PipelineError>
where
    C: Clock,
    S: PipelineStage,
{
    let start = clock.now();
    let stage = advance()?;
    let duration = clock.elapsed(&start);
    let metrics = stage.metrics();
    Ok((stage, StageDiagnostics { duration, metrics }))
}

/// Run the typed pipeline, timing every stage.
///
/// Metrics are gathered after each stage's second clock reading and do
/// not count toward its duration.
///
/// # Errors
///
/// Returns [`PipelineError`] under the same conditions as
/// [`crate::process_staged`].
pub fn process_staged_with_diagnostics<C: Clock>(
    raster: RasterBuffer,
    config: &PipelineConfig,
    clock: &C,
) -> Result<(StagedResult, PipelineDiagnostics), PipelineError> {
    let start = clock.now();
    let pending = Pipeline::new(raster, config.clone())?;
    let (decoded, decode) = timed(clock, || pending.decode())?;
    let (preprocessed, preprocess) = timed(clock, || decoded.preprocess())?;
    let (segmented, segment) = timed(clock, || preprocessed.segment())?;
    let (cleaned, clean) = timed(clock, || Ok(segmented.clean()))?;
    let (edges, edge_detection) = timed(clock, || Ok(cleaned.detect_edges()))?;
    let (contours, contour_extraction) = timed(clock, || Ok(edges.extract_contours()))?;
    let (measured, measure) = timed(clock, || contours.measure())?;
    let staged = measured.into_result();
    let total_duration = clock.elapsed(&start);

    let summary = PipelineSummary {
        image_width: staged.dimensions.width,
        image_height: staged.dimensions.height,
        contour_count: staged.contours.len(),
        kept_contour_count: staged.kept.len(),
        pixel_area: staged.measurement.pixel_area,
        area_cm2: staged.measurement.area_cm2,
    };
    tracing::debug!(total_ms = millis(total_duration), "timed run");

    Ok((
        staged,
        PipelineDiagnostics {
            decode,
            preprocess,
            segment,
            clean,
            edge_detection,
            contour_extraction,
            measure,
            total_duration,
            summary,
        },
    ))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::cell::Cell;

    use super::*;

    /// Advances one millisecond per reading.
    struct TickClock(Cell<u64>);

    impl Clock for TickClock {
        type Instant = u64;

        fn now(&self) -> u64 {
            let t = self.0.get();
            self.0.set(t + 1);
            t
        }

        fn elapsed(&self, since: &u64) -> Duration {
            Duration::from_millis(self.now() - since)
        }
    }

    fn wound() -> RasterBuffer {
        RasterBuffer::from(image::GrayImage::from_fn(80, 80, |x, y| {
            let r = (f64::from(x) - 40.0).hypot(f64::from(y) - 40.0);
            image::Luma([if r <= 20.0 { 30 } else { 220 }])
        }))
    }

    fn diagnose(config: &PipelineConfig) -> (StagedResult, PipelineDiagnostics) {
        process_staged_with_diagnostics(wound(), config, &TickClock(Cell::new(0))).unwrap()
    }

    #[test]
    fn foreground_counts_non_zero_pixels() {
        let mask =
            image::GrayImage::from_fn(6, 6, |x, _| image::Luma([if x < 2 { 1 } else { 0 }]));
        assert_eq!(count_foreground(&mask), 12);
    }

    #[test]
    fn every_stage_is_timed_once() {
        let (_, diag) = diagnose(&PipelineConfig::default());
        for (name, stage) in diag.stages() {
            assert_eq!(stage.duration, Duration::from_millis(1), "{name}");
        }
        // Two bracketing readings around seven two-reading stages.
        assert_eq!(diag.total_duration, Duration::from_millis(15));
    }

    #[test]
    fn metrics_line_up_with_the_staged_result() {
        let (staged, diag) = diagnose(&PipelineConfig::default());
        assert_eq!(diag.summary.contour_count, staged.contours.len());
        assert_eq!(diag.summary.kept_contour_count, staged.kept.len());
        match diag.segment.metrics {
            StageMetrics::Segment {
                level, foreground, ..
            } => {
                assert_eq!(level, staged.measurement.threshold);
                assert_eq!(foreground, count_foreground(&staged.threshold));
            }
            ref other => unreachable!("{other:?}"),
        }
        match diag.clean.metrics {
            StageMetrics::Clean {
                foreground_before,
                foreground_after,
                ..
            } => assert!(foreground_after >= foreground_before),
            ref other => unreachable!("{other:?}"),
        }
        match diag.contour_extraction.metrics {
            StageMetrics::ContourExtraction {
                contours,
                largest_area,
                ..
            } => {
                assert_eq!(contours, staged.contours.len());
                assert!(largest_area >= staged.measurement.pixel_area);
            }
            ref other => unreachable!("{other:?}"),
        }
    }

    #[test]
    fn report_has_a_row_per_stage() {
        let (_, diag) = diagnose(&PipelineConfig::default());
        let report = diag.report();
        assert!(report.starts_with("Measurement diagnostics"));
        for (name, _) in diag.stages() {
            assert!(
                report.lines().any(|l| l.starts_with(name)),
                "no row for {name}"
            );
        }
        assert!(report.ends_with("cm²"));
    }

    #[test]
    fn survives_json() {
        let (_, diag) = diagnose(&PipelineConfig {
            roi_margin: Some(0.1),
            ..PipelineConfig::default()
        });
        let back: PipelineDiagnostics =
            serde_json::from_str(&serde_json::to_string(&diag).unwrap()).unwrap();
        assert_eq!(back.segment.metrics, diag.segment.metrics);
        assert_eq!(back.total_duration, diag.total_duration);
    }

    #[test]
    fn negative_seconds_are_rejected() {
        let json =
            r#"{"duration": -1.0, "metrics": {"Preprocess": {"kernel_size": 3, "sigma": 0.8}}}"#;
        assert!(serde_json::from_str::<StageDiagnostics>(json).is_err());
    }

    #[test]
    fn invalid_config_fails_before_any_stage() {
        let config = PipelineConfig {
            dpi: 0.0,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            process_staged_with_diagnostics(wound(), &config, &TickClock(Cell::new(0))),
            Err(PipelineError::InvalidConfig(_))
        ));
    }
}
