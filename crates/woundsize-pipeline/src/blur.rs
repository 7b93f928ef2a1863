//! Gaussian smoothing before segmentation.
//!
//! A large kernel (19 px by default) deliberately blurs away skin
//! texture and sensor noise while keeping the gross silhouette of the
//! wound, so the Otsu threshold sees two clean populations.
//!
//! The kernel is built here from the kernel size and handed to
//! `imageproc::filter::separable_filter_equal`. Pixels beyond the border
//! replicate the nearest edge pixel, the same clamping the Canny
//! gradient uses.

use image::{GrayImage, ImageBuffer, Luma};

use crate::types::PipelineError;

/// Check that a Gaussian kernel size is usable.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] for zero or even sizes.
pub fn validate_kernel_size(kernel_size: u32) -> Result<(), PipelineError> {
    if kernel_size == 0 || kernel_size % 2 == 0 {
        return Err(PipelineError::InvalidConfig(format!(
            "blur kernel size must be a positive odd number, got {kernel_size}"
        )));
    }
    Ok(())
}

/// Standard deviation conventionally derived from a kernel size:
/// `0.3 * ((k - 1) / 2 - 1) + 0.8`.
#[must_use]
pub fn sigma_for_kernel(kernel_size: u32) -> f64 {
    0.3f64.mul_add((f64::from(kernel_size) - 1.0).mul_add(0.5, -1.0), 0.8)
}

/// Normalized 1-D Gaussian weights of length `kernel_size`.
#[must_use]
pub fn gaussian_kernel(kernel_size: u32) -> Vec<f64> {
    let sigma = sigma_for_kernel(kernel_size);
    let radius = f64::from(kernel_size / 2);
    let denom = 2.0 * sigma * sigma;
    let weights: Vec<f64> = (0..kernel_size)
        .map(|i| {
            let d = f64::from(i) - radius;
            (-(d * d) / denom).exp()
        })
        .collect();
    let sum: f64 = weights.iter().sum();
    weights.into_iter().map(|w| w / sum).collect()
}

/// Blur a grayscale image with a `kernel_size` x `kernel_size` Gaussian.
///
/// A kernel size of 1 returns the image unchanged.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] if `kernel_size` is zero or
/// even.
pub fn gaussian_blur(image: &GrayImage, kernel_size: u32) -> Result<GrayImage, PipelineError> {
    validate_kernel_size(kernel_size)?;
    if kernel_size == 1 {
        return Ok(image.clone());
    }

    #[allow(clippy::cast_possible_truncation)]
    let kernel: Vec<f32> = gaussian_kernel(kernel_size)
        .into_iter()
        .map(|w| w as f32)
        .collect();
    // Filter in f32 so the horizontal pass is not quantized to u8.
    let widened: ImageBuffer<Luma<f32>, Vec<f32>> =
        ImageBuffer::from_fn(image.width(), image.height(), |x, y| {
            Luma([f32::from(image.get_pixel(x, y).0[0])])
        });
    let smoothed = imageproc::filter::separable_filter_equal(&widened, &kernel);
    Ok(GrayImage::from_fn(image.width(), image.height(), |x, y| {
        Luma([round_to_u8(smoothed.get_pixel(x, y).0[0])])
    }))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn round_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    /// Create a test image with a sharp black-to-white boundary at x=10.
    fn sharp_edge_image() -> GrayImage {
        GrayImage::from_fn(20, 20, |x, _y| {
            if x < 10 {
                image::Luma([0])
            } else {
                image::Luma([255])
            }
        })
    }

    fn intensity_sum(image: &GrayImage) -> u64 {
        image.pixels().map(|p| u64::from(p.0[0])).sum()
    }

    #[test]
    fn sigma_matches_kernel_convention() {
        assert!((sigma_for_kernel(19) - 3.2).abs() < 1e-12);
        assert!((sigma_for_kernel(3) - 0.8).abs() < 1e-12);
    }

    #[test]
    fn kernel_is_normalized_and_symmetric() {
        let kernel = gaussian_kernel(19);
        assert_eq!(kernel.len(), 19);
        assert!((kernel.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        for i in 0..9 {
            assert!((kernel[i] - kernel[18 - i]).abs() < 1e-15);
        }
        assert!(kernel[9] > kernel[8]);
    }

    #[test]
    fn even_or_zero_kernel_is_rejected() {
        let img = sharp_edge_image();
        assert!(matches!(
            gaussian_blur(&img, 18),
            Err(PipelineError::InvalidConfig(_))
        ));
        assert!(matches!(
            gaussian_blur(&img, 0),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn unit_kernel_returns_identical_image() {
        let img = sharp_edge_image();
        assert_eq!(gaussian_blur(&img, 1).unwrap(), img);
    }

    #[test]
    fn output_dimensions_preserved() {
        let img = GrayImage::new(17, 31);
        let blurred = gaussian_blur(&img, 19).unwrap();
        assert_eq!(blurred.dimensions(), (17, 31));
    }

    #[test]
    fn uniform_image_unchanged_by_blur() {
        // Replicated borders keep a flat image flat, even at the edges.
        let img = GrayImage::from_pixel(12, 9, image::Luma([128]));
        let blurred = gaussian_blur(&img, 19).unwrap();
        assert_eq!(blurred, img);
    }

    #[test]
    fn border_column_is_replicated_outward() {
        let img = GrayImage::from_fn(5, 5, |x, _| image::Luma([if x == 0 { 200 } else { 0 }]));
        let blurred = gaussian_blur(&img, 3).unwrap();
        // Columns are constant, so only the horizontal taps matter:
        // x = 0 sees (k0 + k1) * 200, x = 1 sees k2 * 200 with k = gaussian_kernel(3).
        for y in 0..5 {
            assert_eq!(blurred.get_pixel(0, y).0[0], 152);
            assert_eq!(blurred.get_pixel(1, y).0[0], 48);
            assert_eq!(blurred.get_pixel(3, y).0[0], 0);
        }
    }

    #[test]
    fn blur_smooths_sharp_edge() {
        let blurred = gaussian_blur(&sharp_edge_image(), 5).unwrap();
        let left_of_edge = blurred.get_pixel(9, 10).0[0];
        let right_of_edge = blurred.get_pixel(10, 10).0[0];
        assert!(left_of_edge > 0, "got {left_of_edge}");
        assert!(right_of_edge < 255, "got {right_of_edge}");
        // Far from the edge the plateaus are untouched.
        assert_eq!(blurred.get_pixel(0, 10).0[0], 0);
        assert_eq!(blurred.get_pixel(19, 10).0[0], 255);
    }

    #[test]
    fn total_intensity_is_preserved() {
        let img = GrayImage::from_fn(64, 64, |x, y| {
            if (22..42).contains(&x) && (22..42).contains(&y) {
                image::Luma([200])
            } else {
                image::Luma([0])
            }
        });
        let before = intensity_sum(&img);
        let after = intensity_sum(&gaussian_blur(&img, 9).unwrap());
        #[allow(clippy::cast_precision_loss)]
        let drift = (after as f64 - before as f64).abs() / before as f64;
        assert!(drift < 0.01, "sum drifted {before} -> {after}");
    }
}
