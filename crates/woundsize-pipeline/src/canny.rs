//! Canny edge detection on an already smoothed image.
//!
//! Unlike `imageproc::edges::canny` there is no internal Gaussian blur:
//! the input is either the blurred grayscale image or a binary mask, and
//! blurring a second time would move the measured boundary. The gradient
//! magnitude can be the L1 norm `|gx| + |gy|` (the common default) or the
//! Euclidean norm. Thresholds are strict: a pixel is strong when its
//! magnitude exceeds `high` and weak when it exceeds `low`.
//!
//! Hysteresis checks all 8 neighbors and bounds-checks every neighbor
//! coordinate, so tracing that reaches the image border cannot underflow.

use image::{GrayImage, Luma};
use imageproc::definitions::{HasBlack, HasWhite, Image};
use imageproc::filter::filter_clamped;
use imageproc::kernel;

/// How gradient components combine into a magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GradientNorm {
    /// `|gx| + |gy|`.
    #[default]
    L1,
    /// `sqrt(gx^2 + gy^2)`.
    L2,
}

/// Quantized gradient direction, in degrees modulo 180.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Horizontal,
    Diagonal45,
    Vertical,
    Diagonal135,
}

impl Direction {
    fn from_gradient(gx: f32, gy: f32) -> Self {
        let mut angle = gy.atan2(gx).to_degrees();
        if angle < 0.0 {
            angle += 180.0;
        }
        if !(22.5..157.5).contains(&angle) {
            Self::Horizontal
        } else if angle < 67.5 {
            Self::Diagonal45
        } else if angle < 112.5 {
            Self::Vertical
        } else {
            Self::Diagonal135
        }
    }

    /// Offsets of the two neighbors across the edge, along the gradient.
    const fn neighbors(self) -> [(i64, i64); 2] {
        match self {
            Self::Horizontal => [(-1, 0), (1, 0)],
            Self::Diagonal45 => [(-1, -1), (1, 1)],
            Self::Vertical => [(0, -1), (0, 1)],
            Self::Diagonal135 => [(1, -1), (-1, 1)],
        }
    }
}

/// Run Canny edge detection.
///
/// Returns a binary image: 255 for edge pixels, 0 elsewhere. Callers are
/// expected to pass `low <= high`; [`crate::edge::canny`] clamps both.
#[must_use = "returns the binary edge map"]
pub fn detect(image: &GrayImage, low: f32, high: f32, norm: GradientNorm) -> GrayImage {
    let gx: Image<Luma<i16>> = filter_clamped(image, kernel::SOBEL_HORIZONTAL_3X3);
    let gy: Image<Luma<i16>> = filter_clamped(image, kernel::SOBEL_VERTICAL_3X3);

    let magnitude = Image::from_fn(image.width(), image.height(), |x, y| {
        let h = f32::from(gx.get_pixel(x, y).0[0]);
        let v = f32::from(gy.get_pixel(x, y).0[0]);
        let m = match norm {
            GradientNorm::L1 => h.abs() + v.abs(),
            GradientNorm::L2 => h.hypot(v),
        };
        Luma([m])
    });

    let thinned = non_maximum_suppression(&magnitude, &gx, &gy);
    hysteresis(&thinned, low, high)
}

/// Magnitude at `(x + dx, y + dy)`, zero outside the image.
fn sample(g: &Image<Luma<f32>>, x: u32, y: u32, dx: i64, dy: i64) -> f32 {
    let nx = i64::from(x) + dx;
    let ny = i64::from(y) + dy;
    match (u32::try_from(nx), u32::try_from(ny)) {
        (Ok(nx), Ok(ny)) if nx < g.width() && ny < g.height() => g.get_pixel(nx, ny).0[0],
        _ => 0.0,
    }
}

/// Keep only pixels that are local maxima across the edge.
///
/// The first neighbor must be strictly smaller and the second no larger,
/// so a two-pixel-wide plateau keeps exactly one of its pixels.
fn non_maximum_suppression(
    g: &Image<Luma<f32>>,
    gx: &Image<Luma<i16>>,
    gy: &Image<Luma<i16>>,
) -> Image<Luma<f32>> {
    Image::from_fn(g.width(), g.height(), |x, y| {
        let m = g.get_pixel(x, y).0[0];
        if m <= 0.0 {
            return Luma([0.0]);
        }
        let direction = Direction::from_gradient(
            f32::from(gx.get_pixel(x, y).0[0]),
            f32::from(gy.get_pixel(x, y).0[0]),
        );
        let [(ax, ay), (bx, by)] = direction.neighbors();
        if m > sample(g, x, y, ax, ay) && m >= sample(g, x, y, bx, by) {
            Luma([m])
        } else {
            Luma([0.0])
        }
    })
}

/// Keep strong pixels and every weak pixel 8-connected to one.
fn hysteresis(input: &Image<Luma<f32>>, low: f32, high: f32) -> GrayImage {
    let (w, h) = input.dimensions();
    let mut out = GrayImage::from_pixel(w, h, Luma::black());
    let mut stack = Vec::new();

    for y in 0..h {
        for x in 0..w {
            if input.get_pixel(x, y).0[0] <= high || out.get_pixel(x, y).0[0] != 0 {
                continue;
            }
            out.put_pixel(x, y, Luma::white());
            stack.push((x, y));
            while let Some((cx, cy)) = stack.pop() {
                for dy in -1i64..=1 {
                    for dx in -1i64..=1 {
                        if dx == 0 && dy == 0 {
                            continue;
                        }
                        let nx = i64::from(cx) + dx;
                        let ny = i64::from(cy) + dy;
                        let (Ok(nx), Ok(ny)) = (u32::try_from(nx), u32::try_from(ny)) else {
                            continue;
                        };
                        if nx >= w || ny >= h {
                            continue;
                        }
                        if input.get_pixel(nx, ny).0[0] > low && out.get_pixel(nx, ny).0[0] == 0 {
                            out.put_pixel(nx, ny, Luma::white());
                            stack.push((nx, ny));
                        }
                    }
                }
            }
        }
    }
    out
}
