//! Edge extraction stage.
//!
//! Wraps [`crate::canny::detect`] with threshold clamping. By default the
//! edge map is computed from the cleaned mask for display only; with
//! [`ContourSource::Edges`](crate::types::ContourSource::Edges) it is
//! closed once more and traced instead of the mask.

use image::GrayImage;

use crate::canny::{self, GradientNorm};
use crate::types::PipelineError;

/// Minimum allowed Canny threshold.
///
/// With a zero low threshold every pixel carrying any gradient becomes a
/// weak edge, and one strong pixel floods the whole gradient field.
pub const MIN_THRESHOLD: f32 = 1.0;
const _: () = assert!(MIN_THRESHOLD > 0.0);

/// Check Canny thresholds from a configuration.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] for negative or non-finite
/// thresholds, or when `low > high`.
pub fn validate_thresholds(low: f32, high: f32) -> Result<(), PipelineError> {
    for (name, value) in [("canny_low", low), ("canny_high", high)] {
        if !value.is_finite() || value < 0.0 {
            return Err(PipelineError::InvalidConfig(format!(
                "{name} must be a finite non-negative number, got {value}"
            )));
        }
    }
    if low > high {
        return Err(PipelineError::InvalidConfig(format!(
            "canny_low ({low}) must not exceed canny_high ({high})"
        )));
    }
    Ok(())
}

/// Thresholds actually handed to the detector: both raised to at least
/// [`MIN_THRESHOLD`], and `low` capped at `high`.
#[must_use]
pub fn clamp_thresholds(low: f32, high: f32) -> (f32, f32) {
    let high = high.max(MIN_THRESHOLD);
    (low.max(MIN_THRESHOLD).min(high), high)
}

/// Canny edge map of `image`: 255 on edges, 0 elsewhere.
///
/// Thresholds pass through [`clamp_thresholds`] first. `l2` selects the
/// Euclidean gradient magnitude.
#[must_use = "returns the binary edge map"]
pub fn canny(image: &GrayImage, low: f32, high: f32, l2: bool) -> GrayImage {
    let (low, high) = clamp_thresholds(low, high);
    let norm = if l2 { GradientNorm::L2 } else { GradientNorm::L1 };
    canny::detect(image, low, high, norm)
}
