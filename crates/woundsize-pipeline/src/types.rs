//! Shared types for the woundsize measurement pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::area::AggregationPolicy;
use crate::contour::{ChainApproximation, ContourTracerKind, RetrievalMode};
use crate::morphology::StructuringElementConfig;
use crate::raster::RasterBuffer;
use crate::threshold::ThresholdMode;

/// Intermediate masks and luminance rasters.
pub use image::GrayImage;

/// Re-export `RgbaImage` for the original image and the result overlay.
pub use image::RgbaImage;

/// Label attached to every physical area the pipeline reports.
pub const UNIT_LABEL: &str = "cm²";

/// An integer pixel coordinate on a traced boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    /// Column (pixels from left edge).
    pub x: i32,
    /// Row (pixels from top edge).
    pub y: i32,
}

impl Point {
    /// Create a new point.
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Whether a traced boundary encloses foreground or a hole in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BorderKind {
    /// Outer boundary of a foreground component.
    Outer,
    /// Boundary of a background hole inside a component.
    Hole,
}

/// A closed boundary polygon. The last point connects back to the
/// first; the first point is not repeated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contour {
    points: Vec<Point>,
    kind: BorderKind,
}

impl Contour {
    /// Create a contour from ordered boundary points.
    #[must_use]
    pub const fn new(points: Vec<Point>, kind: BorderKind) -> Self {
        Self { points, kind }
    }

    /// Boundary points in tracing order.
    #[must_use]
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Outer boundary or hole.
    #[must_use]
    pub const fn kind(&self) -> BorderKind {
        self.kind
    }

    /// Number of boundary points.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.points.len()
    }

    /// Returns `true` if the contour has no points.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Enclosed area in square pixels (shoelace formula).
    #[must_use]
    pub fn area(&self) -> f64 {
        crate::area::polygon_area(&self.points)
    }

    /// Consumes the contour and returns its points.
    #[must_use]
    pub fn into_points(self) -> Vec<Point> {
        self.points
    }
}

/// Width and height of the source raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// Which binary raster the contour extractor traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ContourSource {
    /// The Otsu mask before morphological closing (after ROI masking,
    /// when enabled).
    Threshold,
    /// The mask after closing (and ROI masking, when enabled).
    #[default]
    Mask,
    /// The Canny edge map after a further closing pass.
    ///
    /// Only outer borders are traced: a closed edge ring also has an
    /// inner border, and counting both would roughly double the area.
    Edges,
}

impl ContourSource {
    /// Retrieval mode actually used on this source.
    #[must_use]
    pub const fn effective_retrieval(self, configured: RetrievalMode) -> RetrievalMode {
        match self {
            Self::Edges => RetrievalMode::External,
            Self::Threshold | Self::Mask => configured,
        }
    }
}

/// Configuration for the measurement pipeline.
///
/// Passed once to [`Pipeline::new`](crate::Pipeline::new), which
/// validates it; every stage then reads it without modification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Gaussian kernel size in pixels. Must be odd.
    pub blur_kernel_size: u32,

    /// How the Otsu level turns into a binary mask.
    pub threshold_mode: ThresholdMode,

    /// Structuring element used for every closing pass.
    pub structuring_element: StructuringElementConfig,

    /// Canny low threshold. Weak edges above it survive only when
    /// connected to a strong edge.
    pub canny_low: f32,

    /// Canny high threshold. Gradients above it are definite edges.
    pub canny_high: f32,

    /// Use the Euclidean gradient magnitude instead of `|gx| + |gy|`.
    pub canny_l2_gradient: bool,

    /// Contours with an area at or below this many square pixels are
    /// treated as noise.
    pub min_contour_area: f64,

    /// Assumed capture resolution in dots per inch.
    pub dpi: f64,

    /// Which boundaries the contour extractor returns.
    pub retrieval: RetrievalMode,

    /// Tracer used by the contour stage.
    pub contour_tracer: ContourTracerKind,

    /// Whether straight runs of boundary pixels are compressed.
    pub chain_approximation: ChainApproximation,

    /// Which binary raster contours are traced on.
    pub contour_source: ContourSource,

    /// How the surviving contour areas combine into one measurement.
    pub aggregation: AggregationPolicy,

    /// Fraction of `min(width, height)` cut from each side of the mask.
    /// `None` disables region masking.
    pub roi_margin: Option<f64>,
}

impl PipelineConfig {
    /// Default Gaussian kernel size.
    pub const DEFAULT_BLUR_KERNEL_SIZE: u32 = 19;
    /// Default Canny low threshold.
    pub const DEFAULT_CANNY_LOW: f32 = 100.0;
    /// Default Canny high threshold.
    pub const DEFAULT_CANNY_HIGH: f32 = 200.0;
    /// Default minimum contour area in square pixels.
    pub const DEFAULT_MIN_CONTOUR_AREA: f64 = 100.0;
    /// Default assumed resolution.
    pub const DEFAULT_DPI: f64 = 190.0;
    /// Margin used when region masking is switched on without a value.
    pub const DEFAULT_ROI_MARGIN: f64 = 0.10;

    /// Check every parameter range.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] naming the first
    /// offending field.
    pub fn validate(&self) -> Result<(), PipelineError> {
        crate::blur::validate_kernel_size(self.blur_kernel_size)?;
        self.structuring_element.validate()?;
        crate::edge::validate_thresholds(self.canny_low, self.canny_high)?;
        if !self.min_contour_area.is_finite() || self.min_contour_area < 0.0 {
            return Err(PipelineError::InvalidConfig(format!(
                "min_contour_area must be a non-negative number, got {}",
                self.min_contour_area
            )));
        }
        crate::units::validate_dpi(self.dpi)?;
        if let Some(margin) = self.roi_margin {
            crate::roi::validate_margin(margin)?;
        }
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            blur_kernel_size: Self::DEFAULT_BLUR_KERNEL_SIZE,
            threshold_mode: ThresholdMode::default(),
            structuring_element: StructuringElementConfig::default(),
            canny_low: Self::DEFAULT_CANNY_LOW,
            canny_high: Self::DEFAULT_CANNY_HIGH,
            canny_l2_gradient: false,
            min_contour_area: Self::DEFAULT_MIN_CONTOUR_AREA,
            dpi: Self::DEFAULT_DPI,
            retrieval: RetrievalMode::default(),
            contour_tracer: ContourTracerKind::default(),
            chain_approximation: ChainApproximation::default(),
            contour_source: ContourSource::default(),
            aggregation: AggregationPolicy::default(),
            roi_margin: None,
        }
    }
}

/// Non-fatal conditions attached to a successful measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PipelineWarning {
    /// The smoothed image has a single intensity, so no threshold
    /// separates anything. The whole image was treated as background.
    DegenerateInput {
        /// The only intensity present.
        level: u8,
    },
    /// No contour exceeded the minimum area; the area is reported as zero.
    NoForegroundFound {
        /// The minimum area that every contour failed to exceed.
        min_area: f64,
    },
}

impl fmt::Display for PipelineWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DegenerateInput { level } => write!(
                f,
                "image is uniform (intensity {level}); treated as background"
            ),
            Self::NoForegroundFound { min_area } => {
                write!(f, "no region larger than {min_area} px² was found")
            }
        }
    }
}

/// Final measurement of a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementResult {
    /// Total wound area in square pixels.
    pub pixel_area: f64,
    /// Resolution the conversion assumed.
    pub dpi: f64,
    /// Physical area: `pixel_area * (2.54 / dpi)^2`.
    pub area_cm2: f64,
    /// Unit of `area_cm2`, always [`UNIT_LABEL`].
    pub unit: String,
    /// Number of contours that contributed to `pixel_area`.
    pub contour_count: usize,
    /// Otsu level the segmentation used.
    pub threshold: u8,
    /// Non-fatal conditions encountered during the run.
    pub warnings: Vec<PipelineWarning>,
}

impl MeasurementResult {
    /// One-line human-readable result, e.g. `Wound Area: 1.40 cm²`.
    #[must_use]
    pub fn summary(&self) -> String {
        format!("Wound Area: {:.2} {}", self.area_cm2, self.unit)
    }

    /// Turn a zero measurement into an error for callers that need a
    /// positive area.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NoForegroundFound`] when no contour
    /// survived the minimum-area filter.
    pub fn require_foreground(self) -> Result<Self, PipelineError> {
        if self.contour_count == 0 {
            Err(PipelineError::NoForegroundFound)
        } else {
            Ok(self)
        }
    }
}

/// Names of the rasters the pipeline exposes for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DisplayName {
    /// Luminance image.
    Grayscale,
    /// Gaussian-smoothed luminance.
    Blurred,
    /// Otsu binary mask.
    Threshold,
    /// Mask after region masking.
    Roi,
    /// Mask after dilation.
    Dilated,
    /// Mask after erosion (closing complete).
    Eroded,
    /// Canny edge map.
    Edges,
    /// Edge map after the extra closing pass.
    EdgesClosed,
    /// Original image with the measured region highlighted.
    ResultOverlay,
}

impl DisplayName {
    /// Stable kebab-case name used for file names and UI labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Grayscale => "grayscale",
            Self::Blurred => "blurred",
            Self::Threshold => "threshold",
            Self::Roi => "roi",
            Self::Dilated => "dilated",
            Self::Eroded => "eroded",
            Self::Edges => "edges",
            Self::EdgesClosed => "edges-closed",
            Self::ResultOverlay => "result-overlay",
        }
    }
}

impl fmt::Display for DisplayName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named raster handed to an external renderer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayBuffer {
    /// Which stage produced the raster.
    pub name: DisplayName,
    /// The pixels (gray for masks, RGBA for the overlay).
    pub raster: RasterBuffer,
}

impl DisplayBuffer {
    /// Copy a grayscale intermediate into a display buffer.
    #[must_use]
    pub fn gray(name: DisplayName, image: &GrayImage) -> Self {
        Self {
            name,
            raster: RasterBuffer::from(image.clone()),
        }
    }

    /// Copy an RGBA intermediate into a display buffer.
    #[must_use]
    pub fn rgba(name: DisplayName, image: &RgbaImage) -> Self {
        Self {
            name,
            raster: RasterBuffer::from(image.clone()),
        }
    }
}

/// Result of running the pipeline with all intermediate stage outputs
/// preserved.
///
/// Each field captures the output of one logical stage so a
/// presentation layer can show every step of the measurement.
#[derive(Debug, Clone)]
pub struct StagedResult {
    /// Input expanded to RGBA.
    pub original: RgbaImage,
    /// Luminance image.
    pub grayscale: GrayImage,
    /// Gaussian-smoothed luminance.
    pub blurred: GrayImage,
    /// Otsu mask.
    pub threshold: GrayImage,
    /// Mask after region masking (`Some` only when `roi_margin` is set).
    pub roi: Option<GrayImage>,
    /// Mask after dilation.
    pub dilated: GrayImage,
    /// Mask after erosion.
    pub eroded: GrayImage,
    /// Canny edge map.
    pub edges: GrayImage,
    /// Edge map after the extra closing (`Some` only for
    /// [`ContourSource::Edges`]).
    pub edges_closed: Option<GrayImage>,
    /// Every traced contour.
    pub contours: Vec<Contour>,
    /// Indices into `contours` that contributed to the area.
    pub kept: Vec<usize>,
    /// Original image with kept contours highlighted.
    pub overlay: RgbaImage,
    /// The measurement.
    pub measurement: MeasurementResult,
    /// Size of the source raster.
    pub dimensions: Dimensions,
}

impl StagedResult {
    /// Every display raster in pipeline order.
    #[must_use]
    pub fn display_buffers(&self) -> Vec<DisplayBuffer> {
        let mut buffers = vec![
            DisplayBuffer::gray(DisplayName::Grayscale, &self.grayscale),
            DisplayBuffer::gray(DisplayName::Blurred, &self.blurred),
            DisplayBuffer::gray(DisplayName::Threshold, &self.threshold),
        ];
        if let Some(ref roi) = self.roi {
            buffers.push(DisplayBuffer::gray(DisplayName::Roi, roi));
        }
        buffers.push(DisplayBuffer::gray(DisplayName::Dilated, &self.dilated));
        buffers.push(DisplayBuffer::gray(DisplayName::Eroded, &self.eroded));
        buffers.push(DisplayBuffer::gray(DisplayName::Edges, &self.edges));
        if let Some(ref closed) = self.edges_closed {
            buffers.push(DisplayBuffer::gray(DisplayName::EdgesClosed, closed));
        }
        buffers.push(DisplayBuffer::rgba(DisplayName::ResultOverlay, &self.overlay));
        buffers
    }

    /// The contours that contributed to the measurement.
    pub fn kept_contours(&self) -> impl Iterator<Item = &Contour> {
        self.kept.iter().filter_map(|&i| self.contours.get(i))
    }
}

/// Reasons a measurement run can fail.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum PipelineError {
    /// The raster handed to the pipeline is malformed.
    #[error("invalid input image: {0}")]
    InvalidInput(String),

    /// The raster has no usable content (e.g. zero area).
    #[error("degenerate input image: {0}")]
    DegenerateInput(String),

    /// A configuration parameter is out of range.
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    /// No contour exceeded the minimum area.
    #[error("no wound region found in the image")]
    NoForegroundFound,
}
