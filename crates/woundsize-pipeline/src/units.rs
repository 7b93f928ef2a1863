//! Pixel-to-physical area conversion.

use crate::types::PipelineError;

/// Centimeters per inch.
pub const CM_PER_INCH: f64 = 2.54;

/// Check that a resolution is usable.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] unless `dpi` is finite and
/// positive.
pub fn validate_dpi(dpi: f64) -> Result<(), PipelineError> {
    if !dpi.is_finite() || dpi <= 0.0 {
        return Err(PipelineError::InvalidConfig(format!(
            "dpi must be a positive number, got {dpi}"
        )));
    }
    Ok(())
}

/// Edge length of one pixel in centimeters.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] for an unusable `dpi`.
pub fn cm_per_pixel(dpi: f64) -> Result<f64, PipelineError> {
    validate_dpi(dpi)?;
    Ok(CM_PER_INCH / dpi)
}

/// Convert an area in square pixels to square centimeters:
/// `pixel_area * (2.54 / dpi)^2`.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] for an unusable `dpi`.
pub fn pixels_to_cm2(pixel_area: f64, dpi: f64) -> Result<f64, PipelineError> {
    let side = cm_per_pixel(dpi)?;
    Ok(pixel_area * side * side)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn one_square_inch() {
        let cm2 = pixels_to_cm2(190.0 * 190.0, 190.0).unwrap();
        assert!((cm2 - 6.4516).abs() < 1e-12);
    }

    #[test]
    fn disk_of_radius_fifty_at_default_dpi() {
        let cm2 = pixels_to_cm2(7854.0, 190.0).unwrap();
        assert!((cm2 - 1.4036).abs() < 1e-3, "got {cm2}");
    }

    #[test]
    #[allow(clippy::float_cmp)]
    fn thousand_pixels_at_254_dpi_is_a_tenth() {
        assert_eq!(pixels_to_cm2(1000.0, 254.0).unwrap(), 0.1);
    }

    #[test]
    fn conversion_is_linear() {
        let one = pixels_to_cm2(1.0, 300.0).unwrap();
        let many = pixels_to_cm2(12_345.0, 300.0).unwrap();
        assert!((many - 12_345.0 * one).abs() < 1e-12);
    }

    #[test]
    fn zero_area_is_zero() {
        assert_eq!(
            pixels_to_cm2(0.0, 190.0).unwrap().to_bits(),
            0.0f64.to_bits()
        );
    }

    #[test]
    fn unusable_dpi_is_rejected() {
        for dpi in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                pixels_to_cm2(100.0, dpi),
                Err(PipelineError::InvalidConfig(_))
            ));
        }
    }
}
