//! Automatic binary segmentation with Otsu's method.
//!
//! The threshold is the intensity that maximizes the between-class
//! variance of the two populations it splits the histogram into. By
//! default the mask is inverted: wound tissue is assumed darker than the
//! surrounding skin, so pixels at or below the level become foreground.

use image::GrayImage;
use serde::{Deserialize, Serialize};

/// How the selected level turns into a binary mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ThresholdMode {
    /// Pixels `<= level` become foreground (255). Dark wound on light skin.
    #[default]
    OtsuInverted,
    /// Pixels `> level` become foreground. Light wound on dark background.
    Otsu,
}

/// Level selected by [`otsu_level`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OtsuLevel {
    /// Selected threshold.
    pub level: u8,
    /// `true` when the histogram has a single occupied bin, so no
    /// threshold separates two populations.
    pub degenerate: bool,
}

/// Output of [`threshold`].
#[derive(Debug, Clone)]
pub struct Segmentation {
    /// Binary mask: 255 foreground, 0 background.
    pub mask: GrayImage,
    /// Level used to split the histogram.
    pub level: u8,
    /// See [`OtsuLevel::degenerate`]. The mask is all background.
    pub degenerate: bool,
}

/// 256-bin intensity histogram.
#[must_use]
pub fn histogram(image: &GrayImage) -> [u64; 256] {
    let mut hist = [0u64; 256];
    for p in image.pixels() {
        hist[usize::from(p.0[0])] += 1;
    }
    hist
}

/// Select the Otsu threshold of an image.
///
/// Every candidate `t` in `0..=255` splits the pixels into `{v <= t}`
/// and `{v > t}`; the first `t` with the largest between-class variance
/// `w0 * w1 * (mu0 - mu1)^2` wins, so the result is deterministic.
#[must_use]
pub fn otsu_level(image: &GrayImage) -> OtsuLevel {
    otsu_level_from_histogram(&histogram(image))
}

/// [`otsu_level`] on a precomputed histogram.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn otsu_level_from_histogram(hist: &[u64; 256]) -> OtsuLevel {
    let mut occupied = (0u8..=255).filter(|&v| hist[usize::from(v)] > 0);
    let first = occupied.next();
    if occupied.next().is_none() {
        return OtsuLevel {
            level: first.unwrap_or(0),
            degenerate: true,
        };
    }

    let total: u64 = hist.iter().sum();
    let weighted_total: f64 = hist
        .iter()
        .zip(0u32..)
        .map(|(&n, v)| n as f64 * f64::from(v))
        .sum();

    let mut best_level = 0u8;
    let mut best_variance = -1.0f64;
    let mut w0 = 0u64;
    let mut weighted0 = 0.0f64;
    for t in 0u8..=255 {
        let n = hist[usize::from(t)];
        w0 += n;
        weighted0 += n as f64 * f64::from(t);
        if w0 == 0 {
            continue;
        }
        let w1 = total - w0;
        if w1 == 0 {
            break;
        }
        let p0 = w0 as f64 / total as f64;
        let p1 = 1.0 - p0;
        let mu0 = weighted0 / w0 as f64;
        let mu1 = (weighted_total - weighted0) / w1 as f64;
        let variance = p0 * p1 * (mu0 - mu1) * (mu0 - mu1);
        if variance > best_variance {
            best_variance = variance;
            best_level = t;
        }
    }

    OtsuLevel {
        level: best_level,
        degenerate: false,
    }
}

/// Segment a smoothed image into a binary mask.
///
/// A flat image yields an all-background mask with
/// [`Segmentation::degenerate`] set rather than an arbitrary split.
#[must_use = "returns the binary mask"]
pub fn threshold(image: &GrayImage, mode: ThresholdMode) -> Segmentation {
    let OtsuLevel { level, degenerate } = otsu_level(image);
    if degenerate {
        tracing::warn!(level, "uniform image, no threshold separates foreground");
        return Segmentation {
            mask: GrayImage::new(image.width(), image.height()),
            level,
            degenerate,
        };
    }

    let mask = GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let v = image.get_pixel(x, y).0[0];
        let foreground = match mode {
            ThresholdMode::OtsuInverted => v <= level,
            ThresholdMode::Otsu => v > level,
        };
        image::Luma([if foreground { 255 } else { 0 }])
    });
    Segmentation {
        mask,
        level,
        degenerate,
    }
}
