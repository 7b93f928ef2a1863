//! Binary morphology: dilation, erosion, closing.
//!
//! Closing (dilate, then erode with the same element) bridges small gaps
//! and pinholes in the Otsu mask without growing it overall. The default
//! element is a tiny 2x2 ellipse so fine wound margins survive.
//!
//! Dilation is the Minkowski sum `X + B` and erosion the difference
//! `X - B`, which makes closing extensive (it never removes foreground)
//! and idempotent for any element, symmetric or not. Neighbors that
//! fall outside the image are ignored by both operations.

use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::types::PipelineError;

/// Shape of a structuring element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ElementShape {
    /// Rasterized ellipse inscribed in the bounding box.
    #[default]
    Ellipse,
    /// Filled rectangle.
    Rect,
    /// Horizontal and vertical bar through the anchor.
    Cross,
}

/// Serializable description of a structuring element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuringElementConfig {
    /// Element shape.
    pub shape: ElementShape,
    /// Bounding box width in pixels.
    pub width: u32,
    /// Bounding box height in pixels.
    pub height: u32,
}

impl Default for StructuringElementConfig {
    fn default() -> Self {
        Self {
            shape: ElementShape::Ellipse,
            width: 2,
            height: 2,
        }
    }
}

impl StructuringElementConfig {
    /// Largest accepted element side.
    pub const MAX_SIZE: u32 = 255;

    /// Check the element dimensions.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] for a zero or oversized side.
    pub fn validate(&self) -> Result<(), PipelineError> {
        for (name, side) in [("width", self.width), ("height", self.height)] {
            if side == 0 || side > Self::MAX_SIZE {
                return Err(PipelineError::InvalidConfig(format!(
                    "structuring element {name} must be in 1..={}, got {side}",
                    Self::MAX_SIZE
                )));
            }
        }
        Ok(())
    }

    /// Rasterize the element.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if the dimensions are invalid.
    pub fn build(&self) -> Result<StructuringElement, PipelineError> {
        StructuringElement::new(self.shape, self.width, self.height)
    }
}

/// A rasterized binary kernel with its anchor at `(width / 2, height / 2)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuringElement {
    width: u32,
    height: u32,
    cells: Vec<bool>,
    /// `(dx, dy)` of every set cell relative to the anchor.
    offsets: Vec<(i64, i64)>,
}

impl StructuringElement {
    /// Rasterize an element of the given shape and size.
    ///
    /// Ellipse rows span `round(c * sqrt(r^2 - dy^2) / r)` columns either
    /// side of the center, with `r = height / 2` and `c = width / 2`;
    /// a 2x2 ellipse is therefore `[[0, 1], [1, 1]]`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] for a zero or oversized side.
    pub fn new(shape: ElementShape, width: u32, height: u32) -> Result<Self, PipelineError> {
        StructuringElementConfig {
            shape,
            width,
            height,
        }
        .validate()?;

        // 1x1 of any shape is the identity element.
        let shape = if width == 1 && height == 1 {
            ElementShape::Rect
        } else {
            shape
        };
        let (anchor_x, anchor_y) = (width / 2, height / 2);
        let r = i64::from(height / 2);
        let c = i64::from(width / 2);
        #[allow(clippy::cast_precision_loss)]
        let inv_r2 = if r > 0 { 1.0 / (r * r) as f64 } else { 0.0 };

        let mut cells = vec![false; (width * height) as usize];
        for row in 0..height {
            let (start, end) = match shape {
                ElementShape::Rect => (0, width),
                ElementShape::Cross if row == anchor_y => (0, width),
                ElementShape::Cross => (anchor_x, anchor_x + 1),
                ElementShape::Ellipse => {
                    let dy = i64::from(row) - r;
                    if dy.abs() > r {
                        (0, 0)
                    } else {
                        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
                        let dx = ((c as f64) * (((r * r - dy * dy) as f64) * inv_r2).sqrt())
                            .round() as i64;
                        let start = u32::try_from((c - dx).max(0)).unwrap_or(0);
                        let end = u32::try_from((c + dx + 1).min(i64::from(width)))
                            .unwrap_or(width);
                        (start, end)
                    }
                }
            };
            for col in start..end {
                cells[(row * width + col) as usize] = true;
            }
        }

        let offsets = (0..height)
            .flat_map(|row| (0..width).map(move |col| (col, row)))
            .filter(|&(col, row)| cells[(row * width + col) as usize])
            .map(|(col, row)| {
                (
                    i64::from(col) - i64::from(anchor_x),
                    i64::from(row) - i64::from(anchor_y),
                )
            })
            .collect();

        Ok(Self {
            width,
            height,
            cells,
            offsets,
        })
    }

    /// Bounding box width.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Bounding box height.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Whether the cell at `(col, row)` belongs to the element.
    #[must_use]
    pub fn contains(&self, col: u32, row: u32) -> bool {
        col < self.width && row < self.height && self.cells[(row * self.width + col) as usize]
    }

    /// Offsets of the set cells relative to the anchor.
    #[must_use]
    pub fn offsets(&self) -> &[(i64, i64)] {
        &self.offsets
    }
}

/// Dilate a binary mask: `p` becomes foreground if `p - b` is foreground
/// for some element offset `b`.
#[must_use = "returns the dilated mask"]
pub fn dilate(mask: &GrayImage, element: &StructuringElement) -> GrayImage {
    apply(mask, element, Combine::Any)
}

/// Erode a binary mask: `p` stays foreground only if `p + b` is
/// foreground for every in-bounds element offset `b`.
#[must_use = "returns the eroded mask"]
pub fn erode(mask: &GrayImage, element: &StructuringElement) -> GrayImage {
    apply(mask, element, Combine::All)
}

/// Dilation followed by erosion.
#[must_use = "returns the closed mask"]
pub fn close(mask: &GrayImage, element: &StructuringElement) -> GrayImage {
    erode(&dilate(mask, element), element)
}

#[derive(Clone, Copy)]
enum Combine {
    /// Dilation: sample `p - b`, foreground if any sample is.
    Any,
    /// Erosion: sample `p + b`, foreground if every sample is.
    All,
}

fn apply(mask: &GrayImage, element: &StructuringElement, combine: Combine) -> GrayImage {
    let (w, h) = (i64::from(mask.width()), i64::from(mask.height()));
    let sign = match combine {
        Combine::Any => -1,
        Combine::All => 1,
    };
    GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        let (x, y) = (i64::from(x), i64::from(y));
        let mut samples = element.offsets().iter().filter_map(|&(dx, dy)| {
            let sx = x + sign * dx;
            let sy = y + sign * dy;
            if sx < 0 || sy < 0 || sx >= w || sy >= h {
                return None;
            }
            let sx = u32::try_from(sx).ok()?;
            let sy = u32::try_from(sy).ok()?;
            Some(mask.get_pixel(sx, sy).0[0] > 0)
        });
        let foreground = match combine {
            Combine::Any => samples.any(|v| v),
            Combine::All => samples.all(|v| v),
        };
        image::Luma([if foreground { 255 } else { 0 }])
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn count(mask: &GrayImage) -> usize {
        mask.pixels().filter(|p| p.0[0] > 0).count()
    }

    fn element() -> StructuringElement {
        StructuringElementConfig::default().build().unwrap()
    }

    fn rows(se: &StructuringElement) -> Vec<Vec<u8>> {
        (0..se.height())
            .map(|r| (0..se.width()).map(|c| u8::from(se.contains(c, r))).collect())
            .collect()
    }

    fn disk(size: u32, cx: i64, cy: i64, radius: i64) -> GrayImage {
        GrayImage::from_fn(size, size, |x, y| {
            let dx = i64::from(x) - cx;
            let dy = i64::from(y) - cy;
            image::Luma([if dx * dx + dy * dy <= radius * radius { 255 } else { 0 }])
        })
    }

    #[test]
    fn two_by_two_ellipse_drops_one_corner() {
        assert_eq!(rows(&element()), vec![vec![0, 1], vec![1, 1]]);
    }

    #[test]
    fn five_by_five_ellipse_is_round() {
        let se = StructuringElement::new(ElementShape::Ellipse, 5, 5).unwrap();
        assert_eq!(
            rows(&se),
            vec![
                vec![0, 0, 1, 0, 0],
                vec![1, 1, 1, 1, 1],
                vec![1, 1, 1, 1, 1],
                vec![1, 1, 1, 1, 1],
                vec![0, 0, 1, 0, 0],
            ]
        );
    }

    #[test]
    fn rect_and_cross_shapes() {
        let rect = StructuringElement::new(ElementShape::Rect, 3, 2).unwrap();
        assert_eq!(rows(&rect), vec![vec![1, 1, 1], vec![1, 1, 1]]);
        let cross = StructuringElement::new(ElementShape::Cross, 3, 3).unwrap();
        assert_eq!(
            rows(&cross),
            vec![vec![0, 1, 0], vec![1, 1, 1], vec![0, 1, 0]]
        );
    }

    #[test]
    fn zero_sized_element_is_rejected() {
        assert!(matches!(
            StructuringElement::new(ElementShape::Rect, 0, 3),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn dilation_grows_single_pixel_by_element() {
        let mut mask = GrayImage::new(5, 5);
        mask.put_pixel(2, 2, image::Luma([255]));
        let dilated = dilate(&mask, &element());
        assert_eq!(count(&dilated), 3);
        assert_eq!(dilated.get_pixel(2, 1).0[0], 255);
        assert_eq!(dilated.get_pixel(1, 2).0[0], 255);
    }

    #[test]
    fn erosion_removes_isolated_pixel() {
        let mut mask = GrayImage::new(5, 5);
        mask.put_pixel(2, 2, image::Luma([255]));
        assert_eq!(count(&erode(&mask, &element())), 0);
    }

    #[test]
    fn closing_fills_one_pixel_gap() {
        let mask = GrayImage::from_fn(12, 8, |x, y| {
            image::Luma([if (2..6).contains(&y) && x != 6 && (2..11).contains(&x) { 255 } else { 0 }])
        });
        let closed = close(&mask, &element());
        // The top row has no foreground above the gap to anchor it.
        for y in 3..6 {
            assert_eq!(closed.get_pixel(6, y).0[0], 255, "gap not bridged at row {y}");
        }
    }

    #[test]
    fn closing_does_not_merge_distant_components() {
        let mask = GrayImage::from_fn(20, 10, |x, y| {
            let inside = (2..8).contains(&y) && ((2..8).contains(&x) || (11..17).contains(&x));
            image::Luma([if inside { 255 } else { 0 }])
        });
        let closed = close(&mask, &element());
        for y in 0..10 {
            for x in 8..11 {
                assert_eq!(closed.get_pixel(x, y).0[0], 0, "gap filled at ({x},{y})");
            }
        }
    }

    #[test]
    fn closing_never_shrinks_convex_region() {
        let mask = disk(40, 20, 20, 12);
        let closed = close(&mask, &element());
        assert!(count(&closed) >= count(&mask));
        for (a, b) in mask.pixels().zip(closed.pixels()) {
            if a.0[0] > 0 {
                assert_eq!(b.0[0], 255);
            }
        }
    }

    #[test]
    fn closing_is_idempotent() {
        let mask = disk(30, 15, 15, 8);
        let se = StructuringElement::new(ElementShape::Ellipse, 3, 3).unwrap();
        let once = close(&mask, &se);
        assert_eq!(close(&once, &se), once);
    }

    #[test]
    fn full_mask_survives_erosion_at_borders() {
        let mask = GrayImage::from_pixel(6, 6, image::Luma([255]));
        assert_eq!(erode(&mask, &element()), mask);
    }
}
