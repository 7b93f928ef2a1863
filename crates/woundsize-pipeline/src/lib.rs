//! woundsize-pipeline: pure wound-area measurement pipeline (sans-IO).
//!
//! Estimates the surface area of a wound in a photograph through:
//! grayscale -> Gaussian blur -> Otsu threshold -> optional region mask
//! -> morphological closing -> Canny edges -> contour extraction ->
//! area aggregation -> pixel-to-cm² conversion.
//!
//! This crate has **no I/O dependencies**: it operates on decoded
//! in-memory rasters and returns structured data. File decoding and
//! output live in `woundsize-cli`.

pub mod area;
pub mod blur;
pub mod canny;
pub mod contour;
pub mod diagnostics;
pub mod edge;
pub mod grayscale;
pub mod morphology;
pub mod overlay;
pub mod pipeline;
pub mod raster;
pub mod roi;
pub mod threshold;
pub mod types;
pub mod units;

pub use area::AggregationPolicy;
pub use contour::{ChainApproximation, ContourTracer, ContourTracerKind, RetrievalMode};
pub use diagnostics::{Clock, PipelineDiagnostics, process_staged_with_diagnostics};
pub use morphology::{ElementShape, StructuringElementConfig};
pub use pipeline::{Pipeline, PipelineState, RunReport, StageEvent, StageObserver, run};
pub use raster::{Channels, RasterBuffer};
pub use threshold::ThresholdMode;
pub use types::{
    BorderKind, Contour, ContourSource, Dimensions, DisplayBuffer, DisplayName,
    MeasurementResult, PipelineConfig, PipelineError, PipelineWarning, Point, StagedResult,
    UNIT_LABEL,
};

/// Run the full measurement pipeline.
///
/// Takes a decoded raster and a configuration and returns the
/// [`MeasurementResult`]. Intermediate rasters are dropped as soon as
/// the next stage has consumed them; use [`process_staged`] to keep
/// them.
///
/// # Pipeline steps
///
/// 1. Grayscale reduction
/// 2. Gaussian blur (replicated border)
/// 3. Otsu threshold, inverted by default (dark wound on light skin)
/// 4. Optional region-of-interest mask
/// 5. Morphological closing (dilate, then erode)
/// 6. Canny edge detection
/// 7. Contour extraction on the configured source raster
/// 8. Minimum-area filter and aggregation
/// 9. Conversion to square centimeters at the configured dpi
///
/// A run in which no contour exceeds the minimum area succeeds with a
/// zero area and [`PipelineWarning::NoForegroundFound`].
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] if a parameter is out of
/// range and [`PipelineError::InvalidInput`] if the raster is malformed.
pub fn process(
    raster: RasterBuffer,
    config: &PipelineConfig,
) -> Result<MeasurementResult, PipelineError> {
    let dimensions = raster.dimensions();
    config.validate()?;
    let element = config.structuring_element.build()?;

    // 1-2. Grayscale and blur.
    let gray = grayscale::reduce(&raster)?;
    drop(raster);
    let blurred = blur::gaussian_blur(&gray, config.blur_kernel_size)?;
    drop(gray);

    // 3-4. Segmentation and optional region mask.
    let threshold::Segmentation {
        mask,
        level,
        degenerate,
    } = threshold::threshold(&blurred, config.threshold_mode);
    drop(blurred);
    let working = match config.roi_margin {
        Some(margin) => roi::apply_roi(&mask, margin)?,
        None => mask,
    };

    // 5. Closing.
    let closed = morphology::close(&working, &element);

    // 6-7. Contours on the configured source.
    let contours = {
        let source = match config.contour_source {
            ContourSource::Threshold => working,
            ContourSource::Mask => closed,
            ContourSource::Edges => {
                let edges = edge::canny(
                    &closed,
                    config.canny_low,
                    config.canny_high,
                    config.canny_l2_gradient,
                );
                morphology::close(&edges, &element)
            }
        };
        contour::extract_contours(
            &source,
            config.contour_tracer,
            config.contour_source.effective_retrieval(config.retrieval),
            config.chain_approximation,
        )
    };

    // 8-9. Aggregate and convert.
    let area::Aggregate { pixel_area, kept } =
        area::aggregate(&contours, config.min_contour_area, config.aggregation);
    let area_cm2 = units::pixels_to_cm2(pixel_area, config.dpi)?;

    let mut warnings = Vec::new();
    if degenerate {
        warnings.push(PipelineWarning::DegenerateInput { level });
    }
    if kept.is_empty() {
        tracing::warn!(
            min_area = config.min_contour_area,
            contours = contours.len(),
            "no contour exceeded the minimum area"
        );
        warnings.push(PipelineWarning::NoForegroundFound {
            min_area: config.min_contour_area,
        });
    }

    tracing::debug!(
        width = dimensions.width,
        height = dimensions.height,
        pixel_area,
        area_cm2,
        "processed"
    );
    Ok(MeasurementResult {
        pixel_area,
        dpi: config.dpi,
        area_cm2,
        unit: UNIT_LABEL.to_string(),
        contour_count: kept.len(),
        threshold: level,
        warnings,
    })
}

/// Run the full pipeline, preserving every intermediate stage output.
///
/// Produces the same measurement as [`process`], plus every raster a
/// presentation layer needs to show each step and the result overlay.
///
/// # Errors
///
/// Same as [`process`].
pub fn process_staged(
    raster: RasterBuffer,
    config: &PipelineConfig,
) -> Result<StagedResult, PipelineError> {
    Ok(Pipeline::new(raster, config.clone())?
        .decode()?
        .preprocess()?
        .segment()?
        .clean()
        .detect_edges()
        .extract_contours()
        .measure()?
        .into_result())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    /// Dark disk on light skin-colored background.
    fn disk_raster(size: u32, radius: f64) -> RasterBuffer {
        let center = f64::from(size) / 2.0;
        let img = image::RgbaImage::from_fn(size, size, |x, y| {
            if (f64::from(x) - center).hypot(f64::from(y) - center) <= radius {
                image::Rgba([90, 20, 25, 255])
            } else {
                image::Rgba([230, 190, 170, 255])
            }
        });
        RasterBuffer::from(img)
    }

    #[test]
    fn process_matches_process_staged() {
        for source in [
            ContourSource::Threshold,
            ContourSource::Mask,
            ContourSource::Edges,
        ] {
            let config = PipelineConfig {
                contour_source: source,
                ..PipelineConfig::default()
            };
            let direct = process(disk_raster(90, 25.0), &config).unwrap();
            let staged = process_staged(disk_raster(90, 25.0), &config).unwrap();
            assert_eq!(direct, staged.measurement, "{source:?}");
        }
    }

    #[test]
    fn process_with_roi_matches_process_staged() {
        let config = PipelineConfig {
            roi_margin: Some(PipelineConfig::DEFAULT_ROI_MARGIN),
            ..PipelineConfig::default()
        };
        let direct = process(disk_raster(90, 25.0), &config).unwrap();
        let staged = process_staged(disk_raster(90, 25.0), &config).unwrap();
        assert_eq!(direct, staged.measurement);
        assert!(staged.roi.is_some());
    }

    #[test]
    fn process_uniform_image_reports_zero() {
        let raster = RasterBuffer::from(image::GrayImage::from_pixel(30, 30, image::Luma([77])));
        let result = process(raster, &PipelineConfig::default()).unwrap();
        assert!(result.pixel_area.abs() < f64::EPSILON);
        assert_eq!(result.contour_count, 0);
        assert!(
            result
                .warnings
                .contains(&PipelineWarning::DegenerateInput { level: 77 })
        );
    }

    #[test]
    fn process_rejects_invalid_config() {
        let config = PipelineConfig {
            canny_low: -5.0,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            process(disk_raster(20, 5.0), &config),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn area_scales_with_inverse_square_of_dpi() {
        let at = |dpi: f64| {
            let config = PipelineConfig {
                dpi,
                ..PipelineConfig::default()
            };
            process(disk_raster(90, 25.0), &config).unwrap()
        };
        let low = at(95.0);
        let high = at(190.0);
        assert!((low.pixel_area - high.pixel_area).abs() < f64::EPSILON);
        assert!((low.area_cm2 - 4.0 * high.area_cm2).abs() < 1e-9);
    }

    #[test]
    fn tiny_region_below_min_area_is_ignored() {
        let img = image::GrayImage::from_fn(60, 60, |x, y| {
            if (28..32).contains(&x) && (28..32).contains(&y) {
                image::Luma([10])
            } else {
                image::Luma([240])
            }
        });
        let config = PipelineConfig {
            blur_kernel_size: 1,
            ..PipelineConfig::default()
        };
        let result = process(RasterBuffer::from(img), &config).unwrap();
        assert_eq!(result.contour_count, 0);
        assert!(
            result
                .warnings
                .contains(&PipelineWarning::NoForegroundFound { min_area: 100.0 })
        );
        assert!(matches!(
            result.require_foreground(),
            Err(PipelineError::NoForegroundFound)
        ));
    }
}
