//! Grayscale reduction.
//!
//! First numeric step of the pipeline: a decoded [`RasterBuffer`] in,
//! single-channel `GrayImage` out.
//!
//! Uses BT.601 weights rather than `image`'s `to_luma8()` (Rec. 709), so
//! Otsu levels match those of the common `RGBA2GRAY` conversion that
//! the default parameters were tuned against.

use image::GrayImage;

use crate::raster::{Channels, RasterBuffer};
use crate::types::PipelineError;

/// Luminance weights in 14-bit fixed point (`0.299`, `0.587`, `0.114`).
const WEIGHT_R: u32 = 4899;
const WEIGHT_G: u32 = 9617;
const WEIGHT_B: u32 = 1868;
const SHIFT: u32 = 14;
const _: () = assert!(WEIGHT_R + WEIGHT_G + WEIGHT_B == 1 << SHIFT);

/// Reduce a raster to luminance.
///
/// Color pixels use the standard perceptual weights
/// `0.299*R + 0.587*G + 0.114*B`, rounded to nearest. Alpha is ignored.
/// A single-channel raster is copied unchanged, so reducing an already
/// reduced image is a no-op.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidInput`] if the pixel data cannot be
/// reassembled into an image of the declared size.
pub fn reduce(raster: &RasterBuffer) -> Result<GrayImage, PipelineError> {
    let data = match raster.channels() {
        Channels::Gray => raster.data().to_vec(),
        Channels::Rgb | Channels::Rgba => raster.pixels().map(luminance).collect(),
    };
    GrayImage::from_raw(raster.width(), raster.height(), data).ok_or_else(|| {
        PipelineError::InvalidInput(format!(
            "pixel data does not fill {}x{}",
            raster.width(),
            raster.height()
        ))
    })
}

fn luminance(px: &[u8]) -> u8 {
    let y = u32::from(px[0]) * WEIGHT_R
        + u32::from(px[1]) * WEIGHT_G
        + u32::from(px[2]) * WEIGHT_B
        + (1 << (SHIFT - 1));
    u8::try_from(y >> SHIFT).unwrap_or(u8::MAX)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn rgba_pixel(r: u8, g: u8, b: u8) -> RasterBuffer {
        RasterBuffer::from_rgba(1, 1, vec![r, g, b, 255]).unwrap()
    }

    #[test]
    fn white_stays_white_and_black_stays_black() {
        assert_eq!(reduce(&rgba_pixel(255, 255, 255)).unwrap().get_pixel(0, 0).0[0], 255);
        assert_eq!(reduce(&rgba_pixel(0, 0, 0)).unwrap().get_pixel(0, 0).0[0], 0);
    }

    #[test]
    fn weights_favor_green_then_red_then_blue() {
        let r = reduce(&rgba_pixel(255, 0, 0)).unwrap().get_pixel(0, 0).0[0];
        let g = reduce(&rgba_pixel(0, 255, 0)).unwrap().get_pixel(0, 0).0[0];
        let b = reduce(&rgba_pixel(0, 0, 255)).unwrap().get_pixel(0, 0).0[0];
        assert_eq!((r, g, b), (76, 150, 29));
    }

    #[test]
    fn alpha_is_ignored() {
        let opaque = RasterBuffer::from_rgba(1, 1, vec![10, 200, 90, 255]).unwrap();
        let clear = RasterBuffer::from_rgba(1, 1, vec![10, 200, 90, 0]).unwrap();
        assert_eq!(reduce(&opaque).unwrap(), reduce(&clear).unwrap());
    }

    #[test]
    fn rgb_and_rgba_agree() {
        let rgb = RasterBuffer::new(2, 1, Channels::Rgb, vec![12, 34, 56, 200, 100, 50]).unwrap();
        let rgba =
            RasterBuffer::from_rgba(2, 1, vec![12, 34, 56, 255, 200, 100, 50, 255]).unwrap();
        assert_eq!(reduce(&rgb).unwrap(), reduce(&rgba).unwrap());
    }

    #[test]
    fn reduction_is_idempotent() {
        #[allow(clippy::cast_possible_truncation)]
        let data: Vec<u8> = (0..48u32).map(|i| (i * 37 % 256) as u8).collect();
        let color = RasterBuffer::new(4, 4, Channels::Rgb, data).unwrap();
        let once = reduce(&color).unwrap();
        let twice = reduce(&RasterBuffer::from(once.clone())).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn output_dimensions_match_input() {
        let raster = RasterBuffer::from_rgba(17, 31, vec![128; 17 * 31 * 4]).unwrap();
        let gray = reduce(&raster).unwrap();
        assert_eq!(gray.dimensions(), (17, 31));
    }
}
