//! Result overlay: the original image with the measured region marked.
//!
//! Kept contours are filled in translucent green and outlined in opaque
//! green, two pixels wide. Display only; nothing here feeds back into
//! the measurement.

use image::{GrayImage, Luma, Rgba};
use imageproc::drawing::{draw_line_segment_mut, draw_polygon_mut};

use crate::types::{Contour, RgbaImage};

/// Fill and outline color.
pub const HIGHLIGHT: [u8; 3] = [0, 255, 0];

/// Opacity of the fill, out of 255.
pub const FILL_ALPHA: u8 = 100;

/// Pixel offsets at which every outline segment is drawn.
const OUTLINE_OFFSETS: [(f32, f32); 3] = [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0)];

/// Draw `contours` over a copy of `original`.
#[must_use = "returns the composited overlay"]
pub fn render_overlay<'a, I>(original: &RgbaImage, contours: I) -> RgbaImage
where
    I: IntoIterator<Item = &'a Contour>,
{
    let contours: Vec<&Contour> = contours.into_iter().collect();
    let fill = fill_mask(original.width(), original.height(), &contours);

    let mut out = RgbaImage::from_fn(original.width(), original.height(), |x, y| {
        let px = *original.get_pixel(x, y);
        if fill.get_pixel(x, y).0[0] > 0 {
            blend(px)
        } else {
            px
        }
    });

    let outline = Rgba([HIGHLIGHT[0], HIGHLIGHT[1], HIGHLIGHT[2], 255]);
    for contour in contours {
        let points = contour.points();
        for (i, a) in points.iter().enumerate() {
            let b = points[(i + 1) % points.len()];
            for (dx, dy) in OUTLINE_OFFSETS {
                #[allow(clippy::cast_precision_loss)]
                draw_line_segment_mut(
                    &mut out,
                    (a.x as f32 + dx, a.y as f32 + dy),
                    (b.x as f32 + dx, b.y as f32 + dy),
                    outline,
                );
            }
        }
    }
    out
}

/// Union of the filled interiors of `contours`.
fn fill_mask(width: u32, height: u32, contours: &[&Contour]) -> GrayImage {
    let mut mask = GrayImage::new(width, height);
    for contour in contours {
        let mut poly: Vec<imageproc::point::Point<i32>> = contour
            .points()
            .iter()
            .map(|p| imageproc::point::Point::new(p.x, p.y))
            .collect();
        // The polygon drawer rejects a closing point equal to the first.
        while poly.len() > 1 && poly.first() == poly.last() {
            poly.pop();
        }
        if poly.len() >= 3 {
            draw_polygon_mut(&mut mask, &poly, Luma([255]));
        }
    }
    mask
}

fn blend(px: Rgba<u8>) -> Rgba<u8> {
    let a = u16::from(FILL_ALPHA);
    let mix = |base: u8, tint: u8| {
        let v = (u16::from(base) * (255 - a) + u16::from(tint) * a + 127) / 255;
        u8::try_from(v).unwrap_or(u8::MAX)
    };
    Rgba([
        mix(px.0[0], HIGHLIGHT[0]),
        mix(px.0[1], HIGHLIGHT[1]),
        mix(px.0[2], HIGHLIGHT[2]),
        px.0[3],
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BorderKind, Point};

    fn square(x0: i32, y0: i32, x1: i32, y1: i32) -> Contour {
        Contour::new(
            vec![
                Point::new(x0, y0),
                Point::new(x1, y0),
                Point::new(x1, y1),
                Point::new(x0, y1),
            ],
            BorderKind::Outer,
        )
    }

    fn gray_canvas() -> RgbaImage {
        RgbaImage::from_pixel(30, 30, Rgba([200, 200, 200, 255]))
    }

    #[test]
    fn interior_is_tinted_green() {
        let out = render_overlay(&gray_canvas(), [&square(5, 5, 25, 25)]);
        let px = out.get_pixel(15, 15).0;
        assert!(px[1] > px[0], "{px:?}");
        assert!(px[0] < 200 && px[0] > 0, "{px:?}");
        assert_eq!(px[3], 255);
    }

    #[test]
    fn outside_is_untouched() {
        let canvas = gray_canvas();
        let out = render_overlay(&canvas, [&square(5, 5, 25, 25)]);
        assert_eq!(out.get_pixel(1, 1), canvas.get_pixel(1, 1));
        assert_eq!(out.get_pixel(28, 15), canvas.get_pixel(28, 15));
    }

    #[test]
    fn outline_is_opaque_green() {
        let out = render_overlay(&gray_canvas(), [&square(5, 5, 25, 25)]);
        assert_eq!(out.get_pixel(15, 5).0, [0, 255, 0, 255]);
        assert_eq!(out.get_pixel(15, 6).0, [0, 255, 0, 255]);
    }

    #[test]
    fn no_contours_returns_copy() {
        let canvas = gray_canvas();
        let out = render_overlay(&canvas, std::iter::empty());
        assert_eq!(out, canvas);
    }

    #[test]
    fn degenerate_contours_do_not_panic() {
        let dot = Contour::new(vec![Point::new(3, 3)], BorderKind::Outer);
        let line = Contour::new(vec![Point::new(3, 3), Point::new(8, 3)], BorderKind::Outer);
        let out = render_overlay(&gray_canvas(), [&dot, &line]);
        assert_eq!(out.get_pixel(5, 3).0, [0, 255, 0, 255]);
    }
}
