//! Region-of-interest masking: keep only a centered inset rectangle.
//!
//! Photos of a roughly centered wound often carry vignetting, frame
//! edges or clothing along the border that segment as "dark". Cutting
//! a fixed margin from every side keeps those out of the measurement.
//!
//! Optional stage, applied to the Otsu mask before closing.

use image::GrayImage;

use crate::types::{Dimensions, PipelineError};

/// Inclusive-exclusive pixel bounds of the retained region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsetRect {
    /// First retained column.
    pub left: u32,
    /// First retained row.
    pub top: u32,
    /// One past the last retained column.
    pub right: u32,
    /// One past the last retained row.
    pub bottom: u32,
}

impl InsetRect {
    /// Whether `(x, y)` lies inside the region.
    #[must_use]
    pub const fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.left && x < self.right && y >= self.top && y < self.bottom
    }
}

/// Check that a margin fraction leaves a non-empty region.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] unless `0.0 <= margin < 0.5`.
pub fn validate_margin(margin: f64) -> Result<(), PipelineError> {
    if !margin.is_finite() || !(0.0..0.5).contains(&margin) {
        return Err(PipelineError::InvalidConfig(format!(
            "roi margin must be in [0, 0.5), got {margin}"
        )));
    }
    Ok(())
}

/// Rectangle left after cutting `margin * min(width, height)` pixels
/// (rounded down) from every side.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] if the margin is out of range.
pub fn inset_rect(dimensions: Dimensions, margin: f64) -> Result<InsetRect, PipelineError> {
    validate_margin(margin)?;
    let extent = dimensions.width.min(dimensions.height);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let inset = (margin * f64::from(extent)).floor() as u32;
    Ok(InsetRect {
        left: inset,
        top: inset,
        right: dimensions.width - inset,
        bottom: dimensions.height - inset,
    })
}

/// Zero every mask pixel outside the inset rectangle.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] if the margin is out of range.
pub fn apply_roi(mask: &GrayImage, margin: f64) -> Result<GrayImage, PipelineError> {
    let rect = inset_rect(
        Dimensions {
            width: mask.width(),
            height: mask.height(),
        },
        margin,
    )?;
    Ok(GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        if rect.contains(x, y) {
            *mask.get_pixel(x, y)
        } else {
            image::Luma([0])
        }
    }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn full_mask(width: u32, height: u32) -> GrayImage {
        GrayImage::from_pixel(width, height, image::Luma([255]))
    }

    #[test]
    fn inset_uses_smaller_dimension() {
        let rect = inset_rect(
            Dimensions {
                width: 200,
                height: 100,
            },
            0.1,
        )
        .unwrap();
        assert_eq!(
            rect,
            InsetRect {
                left: 10,
                top: 10,
                right: 190,
                bottom: 90,
            }
        );
    }

    #[test]
    fn zero_margin_keeps_everything() {
        let mask = full_mask(7, 5);
        assert_eq!(apply_roi(&mask, 0.0).unwrap(), mask);
    }

    #[test]
    fn border_pixels_are_cleared() {
        let masked = apply_roi(&full_mask(100, 100), 0.1).unwrap();
        assert_eq!(masked.get_pixel(9, 50).0[0], 0);
        assert_eq!(masked.get_pixel(10, 50).0[0], 255);
        assert_eq!(masked.get_pixel(89, 89).0[0], 255);
        assert_eq!(masked.get_pixel(90, 89).0[0], 0);
        let kept = masked.pixels().filter(|p| p.0[0] == 255).count();
        assert_eq!(kept, 80 * 80);
    }

    #[test]
    fn margin_near_half_still_leaves_a_region() {
        let masked = apply_roi(&full_mask(3, 3), 0.49).unwrap();
        assert_eq!(masked.get_pixel(1, 1).0[0], 255);
    }

    #[test]
    fn out_of_range_margins_are_rejected() {
        for margin in [0.5, 0.75, -0.1, f64::INFINITY] {
            assert!(
                matches!(
                    apply_roi(&full_mask(10, 10), margin),
                    Err(PipelineError::InvalidConfig(_))
                ),
                "margin {margin} should be rejected",
            );
        }
    }
}
