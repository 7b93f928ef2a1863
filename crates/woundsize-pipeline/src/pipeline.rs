//! Step-by-step measurement: one typed value per stage, each holding
//! every raster computed so far.
//!
//! [`crate::process_staged`] is a thin wrapper around this chain:
//!
//! ```rust
//! # use woundsize_pipeline::{Pipeline, PipelineConfig, PipelineError, RasterBuffer};
//! # fn run(raster: RasterBuffer) -> Result<(), PipelineError> {
//! let staged = Pipeline::new(raster, PipelineConfig::default())?
//!     .decode()?
//!     .preprocess()?
//!     .segment()?
//!     .clean()
//!     .detect_edges()
//!     .extract_contours()
//!     .measure()?
//!     .into_result();
//! println!("{}", staged.measurement.summary());
//! # Ok(())
//! # }
//! ```
//!
//! A stage is consumed when it advances, so a step can neither be
//! skipped nor repeated. Only ingestion, blur, segmentation, and
//! measurement can fail.
//!
//! For callers that want progress instead of a typed chain, [`run`]
//! drives the dynamic [`Stage`] enum in a loop and reports each step to
//! a [`StageObserver`] as an immutable [`StageEvent`].

use serde::{Deserialize, Serialize};

use crate::area::{self, Aggregate};
use crate::diagnostics::{StageMetrics, count_foreground};
use crate::morphology::{self, StructuringElement};
use crate::raster::RasterBuffer;
use crate::threshold::Segmentation;
use crate::types::{
    BorderKind, Contour, ContourSource, Dimensions, DisplayBuffer, DisplayName, GrayImage,
    MeasurementResult, PipelineConfig, PipelineError, PipelineWarning, RgbaImage, StagedResult,
    UNIT_LABEL,
};

/// Configuration plus everything derived from it once up front.
struct Context {
    config: PipelineConfig,
    element: StructuringElement,
}

// Pending

/// A validated config and an untouched raster.
#[must_use = "pipeline stages are consumed by advancing, call .decode() to continue"]
pub struct Pending {
    ctx: Context,
    raster: RasterBuffer,
}

impl Pending {
    /// The input raster.
    #[must_use]
    pub const fn raster(&self) -> &RasterBuffer {
        &self.raster
    }

    /// The validated configuration.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.ctx.config
    }

    /// Expand the raster to RGBA for display, reduce it to luminance, and
    /// advance to the [`Decoded`] stage.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidInput`] if the pixel data cannot
    /// be reassembled into an image of the declared size.
    pub fn decode(self) -> Result<Decoded, PipelineError> {
        let dimensions = self.raster.dimensions();
        let grayscale = crate::grayscale::reduce(&self.raster)?;
        let original = self.raster.to_rgba_image();
        tracing::debug!(
            width = dimensions.width,
            height = dimensions.height,
            channels = self.raster.channels().count(),
            "decoded"
        );
        Ok(Decoded {
            ctx: self.ctx,
            dimensions,
            original,
            grayscale,
        })
    }
}

// Decoded

/// Pipeline state after ingesting the raster.
///
/// Call [`preprocess`](Self::preprocess) to advance to the next stage.
#[must_use = "pipeline stages are consumed by advancing, call .preprocess() to continue"]
pub struct Decoded {
    ctx: Context,
    dimensions: Dimensions,
    original: RgbaImage,
    grayscale: GrayImage,
}

impl Decoded {
    /// The input expanded to RGBA.
    #[must_use]
    pub const fn original(&self) -> &RgbaImage {
        &self.original
    }

    /// The luminance image.
    #[must_use]
    pub const fn grayscale(&self) -> &GrayImage {
        &self.grayscale
    }

    /// Apply the Gaussian blur and advance to the [`Preprocessed`] stage.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if the kernel size is
    /// unusable.
    pub fn preprocess(self) -> Result<Preprocessed, PipelineError> {
        let kernel_size = self.ctx.config.blur_kernel_size;
        let blurred = crate::blur::gaussian_blur(&self.grayscale, kernel_size)?;
        tracing::debug!(kernel_size, "blurred");
        Ok(Preprocessed {
            ctx: self.ctx,
            dimensions: self.dimensions,
            original: self.original,
            grayscale: self.grayscale,
            blurred,
        })
    }
}

// Preprocessed

/// Pipeline state after Gaussian smoothing.
///
/// Call [`segment`](Self::segment) to advance to the next stage.
#[must_use = "pipeline stages are consumed by advancing, call .segment() to continue"]
pub struct Preprocessed {
    ctx: Context,
    dimensions: Dimensions,
    original: RgbaImage,
    grayscale: GrayImage,
    blurred: GrayImage,
}

impl Preprocessed {
    /// The smoothed luminance image.
    #[must_use]
    pub const fn blurred(&self) -> &GrayImage {
        &self.blurred
    }

    /// Threshold with Otsu's method, optionally mask to the central
    /// region, and advance to the [`Segmented`] stage.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if the region margin is
    /// out of range.
    pub fn segment(self) -> Result<Segmented, PipelineError> {
        let segmentation = crate::threshold::threshold(&self.blurred, self.ctx.config.threshold_mode);
        let roi = self
            .ctx
            .config
            .roi_margin
            .map(|margin| crate::roi::apply_roi(&segmentation.mask, margin))
            .transpose()?;
        tracing::debug!(
            level = segmentation.level,
            degenerate = segmentation.degenerate,
            roi = roi.is_some(),
            "segmented"
        );
        Ok(Segmented {
            ctx: self.ctx,
            dimensions: self.dimensions,
            original: self.original,
            grayscale: self.grayscale,
            blurred: self.blurred,
            segmentation,
            roi,
        })
    }
}

// Segmented

/// Pipeline state after thresholding.
///
/// Call [`clean`](Self::clean) to advance to the next stage.
#[must_use = "pipeline stages are consumed by advancing, call .clean() to continue"]
pub struct Segmented {
    ctx: Context,
    dimensions: Dimensions,
    original: RgbaImage,
    grayscale: GrayImage,
    blurred: GrayImage,
    segmentation: Segmentation,
    roi: Option<GrayImage>,
}

impl Segmented {
    /// The Otsu mask.
    #[must_use]
    pub const fn threshold(&self) -> &GrayImage {
        &self.segmentation.mask
    }

    /// The selected Otsu level.
    #[must_use]
    pub const fn level(&self) -> u8 {
        self.segmentation.level
    }

    /// The region-masked mask, or `None` if region masking is disabled.
    #[must_use]
    pub const fn roi(&self) -> Option<&GrayImage> {
        self.roi.as_ref()
    }

    /// The mask that later stages work on.
    #[must_use]
    pub fn working_mask(&self) -> &GrayImage {
        self.roi.as_ref().unwrap_or(&self.segmentation.mask)
    }

    /// Close the working mask (dilate, then erode) and advance to the
    /// [`Cleaned`] stage.
    pub fn clean(self) -> Cleaned {
        let dilated = morphology::dilate(self.working_mask(), &self.ctx.element);
        let eroded = morphology::erode(&dilated, &self.ctx.element);
        tracing::debug!(
            element_width = self.ctx.element.width(),
            element_height = self.ctx.element.height(),
            "closed mask"
        );
        Cleaned {
            ctx: self.ctx,
            dimensions: self.dimensions,
            original: self.original,
            grayscale: self.grayscale,
            blurred: self.blurred,
            segmentation: self.segmentation,
            roi: self.roi,
            dilated,
            eroded,
        }
    }
}

// Cleaned

/// The working mask after closing.
#[must_use = "pipeline stages are consumed by advancing, call .detect_edges() to continue"]
pub struct Cleaned {
    ctx: Context,
    dimensions: Dimensions,
    original: RgbaImage,
    grayscale: GrayImage,
    blurred: GrayImage,
    segmentation: Segmentation,
    roi: Option<GrayImage>,
    dilated: GrayImage,
    eroded: GrayImage,
}

impl Cleaned {
    /// The mask after dilation.
    #[must_use]
    pub const fn dilated(&self) -> &GrayImage {
        &self.dilated
    }

    /// The closed mask.
    #[must_use]
    pub const fn eroded(&self) -> &GrayImage {
        &self.eroded
    }

    /// Run Canny on the closed mask and advance to the [`EdgesDetected`]
    /// stage. When contours are traced on edges, the edge map is closed
    /// once more.
    pub fn detect_edges(self) -> EdgesDetected {
        let config = &self.ctx.config;
        let edges = crate::edge::canny(
            &self.eroded,
            config.canny_low,
            config.canny_high,
            config.canny_l2_gradient,
        );
        let edges_closed = (config.contour_source == ContourSource::Edges)
            .then(|| morphology::close(&edges, &self.ctx.element));
        tracing::debug!(
            edge_pixels = count_foreground(&edges),
            closed = edges_closed.is_some(),
            "detected edges"
        );
        EdgesDetected {
            ctx: self.ctx,
            dimensions: self.dimensions,
            original: self.original,
            grayscale: self.grayscale,
            blurred: self.blurred,
            segmentation: self.segmentation,
            roi: self.roi,
            dilated: self.dilated,
            eroded: self.eroded,
            edges,
            edges_closed,
        }
    }
}

// EdgesDetected

/// Pipeline state after edge detection.
///
/// Call [`extract_contours`](Self::extract_contours) to advance to the
/// next stage.
#[must_use = "pipeline stages are consumed by advancing, call .extract_contours() to continue"]
pub struct EdgesDetected {
    ctx: Context,
    dimensions: Dimensions,
    original: RgbaImage,
    grayscale: GrayImage,
    blurred: GrayImage,
    segmentation: Segmentation,
    roi: Option<GrayImage>,
    dilated: GrayImage,
    eroded: GrayImage,
    edges: GrayImage,
    edges_closed: Option<GrayImage>,
}

impl EdgesDetected {
    /// The binary edge map.
    #[must_use]
    pub const fn edges(&self) -> &GrayImage {
        &self.edges
    }

    /// The closed edge map, present only when tracing on edges.
    #[must_use]
    pub const fn edges_closed(&self) -> Option<&GrayImage> {
        self.edges_closed.as_ref()
    }

    /// The raster the contour extractor will trace.
    #[must_use]
    pub fn contour_source(&self) -> &GrayImage {
        match self.ctx.config.contour_source {
            ContourSource::Threshold => self.roi.as_ref().unwrap_or(&self.segmentation.mask),
            ContourSource::Mask => &self.eroded,
            ContourSource::Edges => self.edges_closed.as_ref().unwrap_or(&self.edges),
        }
    }

    /// Trace boundaries and advance to the [`ContoursExtracted`] stage.
    pub fn extract_contours(self) -> ContoursExtracted {
        let config = &self.ctx.config;
        let contours = crate::contour::extract_contours(
            self.contour_source(),
            config.contour_tracer,
            config.contour_source.effective_retrieval(config.retrieval),
            config.chain_approximation,
        );
        tracing::debug!(
            contours = contours.len(),
            source = ?config.contour_source,
            "extracted contours"
        );
        ContoursExtracted {
            ctx: self.ctx,
            dimensions: self.dimensions,
            original: self.original,
            grayscale: self.grayscale,
            blurred: self.blurred,
            segmentation: self.segmentation,
            roi: self.roi,
            dilated: self.dilated,
            eroded: self.eroded,
            edges: self.edges,
            edges_closed: self.edges_closed,
            contours,
        }
    }
}

// ContoursExtracted

/// Pipeline state after contour extraction.
///
/// Call [`measure`](Self::measure) to advance to the final stage.
#[must_use = "pipeline stages are consumed by advancing, call .measure() to continue"]
pub struct ContoursExtracted {
    ctx: Context,
    dimensions: Dimensions,
    original: RgbaImage,
    grayscale: GrayImage,
    blurred: GrayImage,
    segmentation: Segmentation,
    roi: Option<GrayImage>,
    dilated: GrayImage,
    eroded: GrayImage,
    edges: GrayImage,
    edges_closed: Option<GrayImage>,
    contours: Vec<Contour>,
}

impl ContoursExtracted {
    /// Every traced contour.
    #[must_use]
    pub fn contours(&self) -> &[Contour] {
        &self.contours
    }

    /// Filter and aggregate contour areas, convert to square centimeters,
    /// render the overlay, and advance to the [`Measured`] stage.
    ///
    /// A run where nothing survives the minimum-area filter still
    /// succeeds, with a zero area and
    /// [`PipelineWarning::NoForegroundFound`].
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if the resolution is
    /// unusable.
    pub fn measure(self) -> Result<Measured, PipelineError> {
        let config = &self.ctx.config;
        let Aggregate { pixel_area, kept } =
            area::aggregate(&self.contours, config.min_contour_area, config.aggregation);
        let area_cm2 = crate::units::pixels_to_cm2(pixel_area, config.dpi)?;

        let mut warnings = Vec::new();
        if self.segmentation.degenerate {
            warnings.push(PipelineWarning::DegenerateInput {
                level: self.segmentation.level,
            });
        }
        if kept.is_empty() {
            tracing::warn!(
                min_area = config.min_contour_area,
                contours = self.contours.len(),
                "no contour exceeded the minimum area"
            );
            warnings.push(PipelineWarning::NoForegroundFound {
                min_area: config.min_contour_area,
            });
        }

        let overlay = crate::overlay::render_overlay(
            &self.original,
            kept.iter().filter_map(|&i| self.contours.get(i)),
        );
        let measurement = MeasurementResult {
            pixel_area,
            dpi: config.dpi,
            area_cm2,
            unit: UNIT_LABEL.to_string(),
            contour_count: kept.len(),
            threshold: self.segmentation.level,
            warnings,
        };
        tracing::debug!(pixel_area, area_cm2, kept = kept.len(), "measured");

        Ok(Measured {
            ctx: self.ctx,
            dimensions: self.dimensions,
            original: self.original,
            grayscale: self.grayscale,
            blurred: self.blurred,
            segmentation: self.segmentation,
            roi: self.roi,
            dilated: self.dilated,
            eroded: self.eroded,
            edges: self.edges,
            edges_closed: self.edges_closed,
            contours: self.contours,
            kept,
            overlay,
            measurement,
        })
    }
}

// Measured

/// The finished measurement and its overlay.
#[must_use = "call .into_result() to extract the StagedResult"]
pub struct Measured {
    ctx: Context,
    dimensions: Dimensions,
    original: RgbaImage,
    grayscale: GrayImage,
    blurred: GrayImage,
    segmentation: Segmentation,
    roi: Option<GrayImage>,
    dilated: GrayImage,
    eroded: GrayImage,
    edges: GrayImage,
    edges_closed: Option<GrayImage>,
    contours: Vec<Contour>,
    kept: Vec<usize>,
    overlay: RgbaImage,
    measurement: MeasurementResult,
}

impl Measured {
    /// The measurement.
    #[must_use]
    pub const fn measurement(&self) -> &MeasurementResult {
        &self.measurement
    }

    /// The original image with the measured region highlighted.
    #[must_use]
    pub const fn overlay(&self) -> &RgbaImage {
        &self.overlay
    }

    /// Source image dimensions.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    /// Consume the pipeline and return every intermediate.
    #[must_use]
    pub fn into_result(self) -> StagedResult {
        StagedResult {
            original: self.original,
            grayscale: self.grayscale,
            blurred: self.blurred,
            threshold: self.segmentation.mask,
            roi: self.roi,
            dilated: self.dilated,
            eroded: self.eroded,
            edges: self.edges,
            edges_closed: self.edges_closed,
            contours: self.contours,
            kept: self.kept,
            overlay: self.overlay,
            measurement: self.measurement,
            dimensions: self.dimensions,
        }
    }
}

// PipelineState

/// Coarse progress of a pipeline run, as reported to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineState {
    /// Nothing has run yet.
    Idle,
    /// Ingesting the raster.
    Decoding,
    /// Grayscale reduction and blur.
    Preprocessing,
    /// Otsu thresholding and region masking.
    Segmenting,
    /// Morphological closing.
    Cleaning,
    /// Canny edge detection.
    EdgeExtraction,
    /// Contour tracing.
    ContourExtraction,
    /// Area aggregation and unit conversion.
    Measuring,
    /// The run produced a measurement.
    Done,
    /// The run stopped on an error.
    Failed,
}

impl PipelineState {
    /// The state a successful step moves into. `Done` and `Failed` are
    /// terminal and map to themselves.
    #[must_use]
    pub const fn next(self) -> Self {
        match self {
            Self::Idle => Self::Decoding,
            Self::Decoding => Self::Preprocessing,
            Self::Preprocessing => Self::Segmenting,
            Self::Segmenting => Self::Cleaning,
            Self::Cleaning => Self::EdgeExtraction,
            Self::EdgeExtraction => Self::ContourExtraction,
            Self::ContourExtraction => Self::Measuring,
            Self::Measuring | Self::Done => Self::Done,
            Self::Failed => Self::Failed,
        }
    }

    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

// Dynamic access

/// Number of [`Stage`] variants, `Pending` included.
pub const STAGE_COUNT: usize = 8;

/// Borrowed view of what one stage added.
#[must_use]
pub enum StageOutput<'a> {
    /// The raster handed to the pipeline.
    Input {
        /// The input raster.
        raster: &'a RasterBuffer,
    },
    /// RGBA expansion and luminance.
    Decoded {
        /// The original image.
        original: &'a RgbaImage,
        /// The luminance image.
        grayscale: &'a GrayImage,
    },
    /// Gaussian blur result.
    Preprocessed {
        /// The smoothed luminance image.
        blurred: &'a GrayImage,
    },
    /// Otsu segmentation result.
    Segmented {
        /// The Otsu mask.
        threshold: &'a GrayImage,
        /// The region-masked mask, or `None` if disabled.
        roi: Option<&'a GrayImage>,
    },
    /// Morphological closing result.
    Cleaned {
        /// The mask after dilation.
        dilated: &'a GrayImage,
        /// The mask after erosion.
        eroded: &'a GrayImage,
    },
    /// Canny output.
    EdgesDetected {
        /// The binary edge map.
        edges: &'a GrayImage,
        /// The closed edge map, or `None` unless tracing on edges.
        edges_closed: Option<&'a GrayImage>,
    },
    /// Contour extraction result.
    ContoursExtracted {
        /// Every traced contour.
        contours: &'a [Contour],
    },
    /// Final measurement.
    Measured {
        /// The result overlay.
        overlay: &'a RgbaImage,
        /// The measurement.
        measurement: &'a MeasurementResult,
    },
}

impl StageOutput<'_> {
    /// The rasters this output contributes to the display sequence.
    ///
    /// Concatenating these across every stage yields the same list as
    /// [`StagedResult::display_buffers`].
    #[must_use]
    pub fn display_buffers(&self) -> Vec<DisplayBuffer> {
        match *self {
            Self::Input { .. } | Self::ContoursExtracted { .. } => Vec::new(),
            Self::Decoded { grayscale, .. } => {
                vec![DisplayBuffer::gray(DisplayName::Grayscale, grayscale)]
            }
            Self::Preprocessed { blurred } => {
                vec![DisplayBuffer::gray(DisplayName::Blurred, blurred)]
            }
            Self::Segmented { threshold, roi } => {
                let mut out = vec![DisplayBuffer::gray(DisplayName::Threshold, threshold)];
                out.extend(roi.map(|r| DisplayBuffer::gray(DisplayName::Roi, r)));
                out
            }
            Self::Cleaned { dilated, eroded } => vec![
                DisplayBuffer::gray(DisplayName::Dilated, dilated),
                DisplayBuffer::gray(DisplayName::Eroded, eroded),
            ],
            Self::EdgesDetected {
                edges,
                edges_closed,
            } => {
                let mut out = vec![DisplayBuffer::gray(DisplayName::Edges, edges)];
                out.extend(edges_closed.map(|e| DisplayBuffer::gray(DisplayName::EdgesClosed, e)));
                out
            }
            Self::Measured { overlay, .. } => {
                vec![DisplayBuffer::rgba(DisplayName::ResultOverlay, overlay)]
            }
        }
    }
}

/// Common surface of the stage structs.
///
/// [`Stage`] forwards to this for whichever struct it wraps, which is
/// what lets [`run`] and the diagnostics loop treat stages uniformly.
pub trait PipelineStage: Sized {
    /// Short name of this stage (e.g. `"input"`, `"segment"`).
    const NAME: &str;

    /// Zero-based index of this stage (`0` for Pending through `7` for
    /// Measured).
    const INDEX: usize;

    /// The state whose work produced this stage.
    const STATE: PipelineState;

    /// Rasters and values this stage added.
    fn output(&self) -> StageOutput<'_>;

    /// Counts and parameters describing this stage's work.
    fn metrics(&self) -> StageMetrics;

    /// The following stage, or `None` after [`Measured`].
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if a fallible transition fails.
    fn next(self) -> Result<Option<Stage>, PipelineError>;

    /// Finish every remaining stage.
    ///
    /// # Errors
    ///
    /// Returns the first [`PipelineError`] raised on the way.
    fn complete(self) -> Result<StagedResult, PipelineError>;
}

impl PipelineStage for Pending {
    const NAME: &str = "input";
    const INDEX: usize = 0;
    const STATE: PipelineState = PipelineState::Idle;

    fn output(&self) -> StageOutput<'_> {
        StageOutput::Input {
            raster: &self.raster,
        }
    }

    fn metrics(&self) -> StageMetrics {
        StageMetrics::Input {
            width: self.raster.width(),
            height: self.raster.height(),
            channels: self.raster.channels().count(),
        }
    }

    fn next(self) -> Result<Option<Stage>, PipelineError> {
        Ok(Some(Stage::Decoded(self.decode()?)))
    }

    fn complete(self) -> Result<StagedResult, PipelineError> {
        self.decode()?.complete()
    }
}

impl PipelineStage for Decoded {
    const NAME: &str = "decode";
    const INDEX: usize = 1;
    const STATE: PipelineState = PipelineState::Decoding;

    fn output(&self) -> StageOutput<'_> {
        StageOutput::Decoded {
            original: &self.original,
            grayscale: &self.grayscale,
        }
    }

    fn metrics(&self) -> StageMetrics {
        StageMetrics::Decode {
            width: self.dimensions.width,
            height: self.dimensions.height,
            pixel_count: u64::from(self.dimensions.width) * u64::from(self.dimensions.height),
        }
    }

    fn next(self) -> Result<Option<Stage>, PipelineError> {
        Ok(Some(Stage::Preprocessed(self.preprocess()?)))
    }

    fn complete(self) -> Result<StagedResult, PipelineError> {
        self.preprocess()?.complete()
    }
}

impl PipelineStage for Preprocessed {
    const NAME: &str = "preprocess";
    const INDEX: usize = 2;
    const STATE: PipelineState = PipelineState::Preprocessing;

    fn output(&self) -> StageOutput<'_> {
        StageOutput::Preprocessed {
            blurred: &self.blurred,
        }
    }

    fn metrics(&self) -> StageMetrics {
        let kernel_size = self.ctx.config.blur_kernel_size;
        StageMetrics::Preprocess {
            kernel_size,
            sigma: crate::blur::sigma_for_kernel(kernel_size),
        }
    }

    fn next(self) -> Result<Option<Stage>, PipelineError> {
        Ok(Some(Stage::Segmented(self.segment()?)))
    }

    fn complete(self) -> Result<StagedResult, PipelineError> {
        self.segment()?.complete()
    }
}

impl PipelineStage for Segmented {
    const NAME: &str = "segment";
    const INDEX: usize = 3;
    const STATE: PipelineState = PipelineState::Segmenting;

    fn output(&self) -> StageOutput<'_> {
        StageOutput::Segmented {
            threshold: &self.segmentation.mask,
            roi: self.roi.as_ref(),
        }
    }

    fn metrics(&self) -> StageMetrics {
        StageMetrics::Segment {
            level: self.segmentation.level,
            degenerate: self.segmentation.degenerate,
            foreground: count_foreground(self.working_mask()),
            roi_margin: self.ctx.config.roi_margin,
        }
    }

    fn next(self) -> Result<Option<Stage>, PipelineError> {
        Ok(Some(Stage::Cleaned(self.clean())))
    }

    fn complete(self) -> Result<StagedResult, PipelineError> {
        self.clean().complete()
    }
}

impl PipelineStage for Cleaned {
    const NAME: &str = "clean";
    const INDEX: usize = 4;
    const STATE: PipelineState = PipelineState::Cleaning;

    fn output(&self) -> StageOutput<'_> {
        StageOutput::Cleaned {
            dilated: &self.dilated,
            eroded: &self.eroded,
        }
    }

    fn metrics(&self) -> StageMetrics {
        let before = self.roi.as_ref().unwrap_or(&self.segmentation.mask);
        StageMetrics::Clean {
            element_width: self.ctx.element.width(),
            element_height: self.ctx.element.height(),
            foreground_before: count_foreground(before),
            foreground_after: count_foreground(&self.eroded),
        }
    }

    fn next(self) -> Result<Option<Stage>, PipelineError> {
        Ok(Some(Stage::EdgesDetected(self.detect_edges())))
    }

    fn complete(self) -> Result<StagedResult, PipelineError> {
        self.detect_edges().complete()
    }
}

impl PipelineStage for EdgesDetected {
    const NAME: &str = "edges";
    const INDEX: usize = 5;
    const STATE: PipelineState = PipelineState::EdgeExtraction;

    fn output(&self) -> StageOutput<'_> {
        StageOutput::EdgesDetected {
            edges: &self.edges,
            edges_closed: self.edges_closed.as_ref(),
        }
    }

    fn metrics(&self) -> StageMetrics {
        let config = &self.ctx.config;
        let (low, high) = crate::edge::clamp_thresholds(config.canny_low, config.canny_high);
        StageMetrics::EdgeDetection {
            low,
            high,
            edge_pixels: count_foreground(&self.edges),
        }
    }

    fn next(self) -> Result<Option<Stage>, PipelineError> {
        Ok(Some(Stage::ContoursExtracted(self.extract_contours())))
    }

    fn complete(self) -> Result<StagedResult, PipelineError> {
        self.extract_contours().complete()
    }
}

impl PipelineStage for ContoursExtracted {
    const NAME: &str = "contours";
    const INDEX: usize = 6;
    const STATE: PipelineState = PipelineState::ContourExtraction;

    fn output(&self) -> StageOutput<'_> {
        StageOutput::ContoursExtracted {
            contours: &self.contours,
        }
    }

    fn metrics(&self) -> StageMetrics {
        StageMetrics::ContourExtraction {
            contours: self.contours.len(),
            holes: self
                .contours
                .iter()
                .filter(|c| c.kind() == BorderKind::Hole)
                .count(),
            points: self.contours.iter().map(Contour::len).sum(),
            largest_area: self.contours.iter().map(Contour::area).fold(0.0, f64::max),
        }
    }

    fn next(self) -> Result<Option<Stage>, PipelineError> {
        Ok(Some(Stage::Measured(self.measure()?)))
    }

    fn complete(self) -> Result<StagedResult, PipelineError> {
        self.measure()?.complete()
    }
}

impl PipelineStage for Measured {
    const NAME: &str = "measure";
    const INDEX: usize = 7;
    const STATE: PipelineState = PipelineState::Measuring;

    fn output(&self) -> StageOutput<'_> {
        StageOutput::Measured {
            overlay: &self.overlay,
            measurement: &self.measurement,
        }
    }

    fn metrics(&self) -> StageMetrics {
        StageMetrics::Measure {
            kept: self.kept.len(),
            pixel_area: self.measurement.pixel_area,
            dpi: self.measurement.dpi,
            area_cm2: self.measurement.area_cm2,
        }
    }

    fn next(self) -> Result<Option<Stage>, PipelineError> {
        Ok(None)
    }

    fn complete(self) -> Result<StagedResult, PipelineError> {
        Ok(self.into_result())
    }
}

/// Any one of the stage structs, for callers that loop instead of
/// chaining:
///
/// ```rust
/// # use woundsize_pipeline::{Pipeline, PipelineConfig, PipelineError, RasterBuffer};
/// # use woundsize_pipeline::pipeline::{Advance, Stage};
/// # fn run(raster: RasterBuffer) -> Result<(), PipelineError> {
/// let mut stage: Stage = Pipeline::new(raster, PipelineConfig::default())?.into();
/// loop {
///     match stage.advance()? {
///         Advance::Next(next) => stage = next,
///         Advance::Complete(done) => { stage = done; break; }
///     }
/// }
/// let result = stage.complete()?;
/// # Ok(())
/// # }
/// ```
#[must_use]
pub enum Stage {
    /// See [`Pending`].
    Pending(Pending),
    /// See [`Decoded`].
    Decoded(Decoded),
    /// See [`Preprocessed`].
    Preprocessed(Preprocessed),
    /// See [`Segmented`].
    Segmented(Segmented),
    /// See [`Cleaned`].
    Cleaned(Cleaned),
    /// See [`EdgesDetected`].
    EdgesDetected(EdgesDetected),
    /// See [`ContoursExtracted`].
    ContoursExtracted(ContoursExtracted),
    /// See [`Measured`].
    Measured(Measured),
}

// Exhaustive over `Stage`; update `STAGE_COUNT` when this stops compiling.
#[allow(dead_code, clippy::match_same_arms)]
const fn _stage_count_guard(s: &Stage) {
    match s {
        Stage::Pending(_)
        | Stage::Decoded(_)
        | Stage::Preprocessed(_)
        | Stage::Segmented(_)
        | Stage::Cleaned(_)
        | Stage::EdgesDetected(_)
        | Stage::ContoursExtracted(_)
        | Stage::Measured(_) => {}
    }
}

/// Outcome of [`Stage::advance`].
#[must_use]
pub enum Advance {
    /// A newer stage.
    Next(Stage),
    /// [`Stage::Measured`], handed back as is.
    Complete(Stage),
}

/// Forward `$method` to the wrapped stage struct.
macro_rules! delegate {
    ($self:ident, $method:ident $(, $arg:expr)*) => {
        match $self {
            Self::Pending(s) => s.$method($($arg),*),
            Self::Decoded(s) => s.$method($($arg),*),
            Self::Preprocessed(s) => s.$method($($arg),*),
            Self::Segmented(s) => s.$method($($arg),*),
            Self::Cleaned(s) => s.$method($($arg),*),
            Self::EdgesDetected(s) => s.$method($($arg),*),
            Self::ContoursExtracted(s) => s.$method($($arg),*),
            Self::Measured(s) => s.$method($($arg),*),
        }
    };
}

impl Stage {
    /// Short name of the current stage.
    #[must_use]
    pub fn name(&self) -> &'static str {
        delegate!(self, name)
    }

    /// Position in run order, `0` for [`Stage::Pending`].
    #[must_use]
    pub fn index(&self) -> usize {
        delegate!(self, index)
    }

    /// The state whose work produced the current stage.
    #[must_use]
    pub fn state(&self) -> PipelineState {
        delegate!(self, state)
    }

    /// See [`PipelineStage::output`].
    pub fn output(&self) -> StageOutput<'_> {
        delegate!(self, output)
    }

    /// See [`PipelineStage::metrics`].
    #[must_use]
    pub fn metrics(&self) -> StageMetrics {
        delegate!(self, metrics)
    }

    /// True for [`Stage::Measured`].
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self, Self::Measured(_))
    }

    /// The following stage. `None` consumes a finished [`Measured`].
    ///
    /// # Errors
    ///
    /// Propagates the failing stage's [`PipelineError`].
    pub fn next(self) -> Result<Option<Self>, PipelineError> {
        delegate!(self, next)
    }

    /// Like [`next`](Self::next), but a finished run comes back as
    /// [`Advance::Complete`] instead of being dropped.
    ///
    /// # Errors
    ///
    /// Propagates the failing stage's [`PipelineError`].
    pub fn advance(self) -> Result<Advance, PipelineError> {
        if self.is_complete() {
            return Ok(Advance::Complete(self));
        }
        let name = self.name();
        // Only `Measured` answers `None`.
        #[allow(clippy::unreachable)]
        let next = self
            .next()?
            .unwrap_or_else(|| unreachable!("stage {name} has a successor"));
        Ok(Advance::Next(next))
    }

    /// See [`PipelineStage::complete`].
    ///
    /// # Errors
    ///
    /// Propagates the failing stage's [`PipelineError`].
    pub fn complete(self) -> Result<StagedResult, PipelineError> {
        delegate!(self, complete)
    }
}

// `delegate!` calls methods, so the associated constants need wrappers.
trait StageMetadata {
    fn name(&self) -> &'static str;
    fn index(&self) -> usize;
    fn state(&self) -> PipelineState;
}

impl<T: PipelineStage> StageMetadata for T {
    fn name(&self) -> &'static str {
        T::NAME
    }

    fn index(&self) -> usize {
        T::INDEX
    }

    fn state(&self) -> PipelineState {
        T::STATE
    }
}

impl From<Pending> for Stage {
    fn from(s: Pending) -> Self {
        Self::Pending(s)
    }
}

impl From<Decoded> for Stage {
    fn from(s: Decoded) -> Self {
        Self::Decoded(s)
    }
}

impl From<Preprocessed> for Stage {
    fn from(s: Preprocessed) -> Self {
        Self::Preprocessed(s)
    }
}

impl From<Segmented> for Stage {
    fn from(s: Segmented) -> Self {
        Self::Segmented(s)
    }
}

impl From<Cleaned> for Stage {
    fn from(s: Cleaned) -> Self {
        Self::Cleaned(s)
    }
}

impl From<EdgesDetected> for Stage {
    fn from(s: EdgesDetected) -> Self {
        Self::EdgesDetected(s)
    }
}

impl From<ContoursExtracted> for Stage {
    fn from(s: ContoursExtracted) -> Self {
        Self::ContoursExtracted(s)
    }
}

impl From<Measured> for Stage {
    fn from(s: Measured) -> Self {
        Self::Measured(s)
    }
}

// Observed runs

/// Progress notification emitted by [`run`].
///
/// Events only borrow or copy pipeline data; observers cannot change
/// the run.
#[derive(Debug)]
pub enum StageEvent<'a> {
    /// The run moved into this state.
    Entered(PipelineState),
    /// A stage produced a display raster.
    Output(DisplayBuffer),
    /// The run stopped on this error.
    Failed(&'a PipelineError),
    /// The run finished with this measurement.
    Done(&'a MeasurementResult),
}

/// Receiver of [`StageEvent`]s.
///
/// Any `FnMut(StageEvent<'_>)` closure is an observer.
pub trait StageObserver {
    /// Handle one event.
    fn on_event(&mut self, event: StageEvent<'_>);
}

impl<F> StageObserver for F
where
    F: FnMut(StageEvent<'_>),
{
    fn on_event(&mut self, event: StageEvent<'_>) {
        self(event);
    }
}

/// Outcome of [`run`].
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    /// [`PipelineState::Done`] or [`PipelineState::Failed`].
    pub state: PipelineState,
    /// The measurement, or the error that stopped the run.
    pub result: Result<MeasurementResult, PipelineError>,
}

impl RunReport {
    fn failed<O: StageObserver + ?Sized>(error: PipelineError, observer: &mut O) -> Self {
        tracing::debug!(%error, "pipeline failed");
        observer.on_event(StageEvent::Entered(PipelineState::Failed));
        observer.on_event(StageEvent::Failed(&error));
        Self {
            state: PipelineState::Failed,
            result: Err(error),
        }
    }
}

/// Run the pipeline to completion, reporting progress to `observer`.
///
/// The observer sees `Entered(state)` before each step, `Output` for
/// every display raster the step produced, and finally either
/// `Done(measurement)` or `Failed(error)`. Outputs already emitted
/// before a failure stay with the observer; nothing is measured.
pub fn run<O: StageObserver + ?Sized>(
    raster: RasterBuffer,
    config: &PipelineConfig,
    observer: &mut O,
) -> RunReport {
    observer.on_event(StageEvent::Entered(PipelineState::Idle));
    let mut stage: Stage = match Pipeline::new(raster, config.clone()) {
        Ok(pending) => pending.into(),
        Err(error) => return RunReport::failed(error, observer),
    };

    while !stage.is_complete() {
        observer.on_event(StageEvent::Entered(stage.state().next()));
        stage = match stage.advance() {
            Ok(Advance::Next(next) | Advance::Complete(next)) => next,
            Err(error) => return RunReport::failed(error, observer),
        };
        tracing::debug!(stage = stage.name(), index = stage.index(), "stage complete");
        for buffer in stage.output().display_buffers() {
            observer.on_event(StageEvent::Output(buffer));
        }
    }

    let measurement = match stage.complete() {
        Ok(staged) => staged.measurement,
        Err(error) => return RunReport::failed(error, observer),
    };
    observer.on_event(StageEvent::Entered(PipelineState::Done));
    observer.on_event(StageEvent::Done(&measurement));
    RunReport {
        state: PipelineState::Done,
        result: Ok(measurement),
    }
}

// Pipeline entry point

/// Incremental wound measurement pipeline.
///
/// Created via [`Pipeline::new`], which validates the config and stores
/// the raster without processing it. The caller then chains stage
/// methods to advance through the pipeline. Each stage method consumes
/// the current state and returns the next, making it a compile-time
/// error to skip stages or call them out of order.
pub struct Pipeline;

impl Pipeline {
    /// Validate `config` and wrap `raster` in the first pipeline stage.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] naming the first
    /// out-of-range parameter.
    #[allow(clippy::new_ret_no_self)]
    pub fn new(raster: RasterBuffer, config: PipelineConfig) -> Result<Pending, PipelineError> {
        config.validate()?;
        let element = config.structuring_element.build()?;
        Ok(Pending {
            ctx: Context { config, element },
            raster,
        })
    }
}
