//! Contour extraction: closed boundary polygons from a binary mask.
//!
//! Tracers implement [`ContourTracer`] and are picked at runtime through
//! [`ContourTracerKind`]. Every tracer returns contours in raster discovery
//! order (by the first pixel of the region the boundary belongs to) and
//! honors a [`RetrievalMode`]. [`extract_contours`] adds the optional
//! chain compression.

use image::{GrayImage, Luma};
use imageproc::contours::BorderType;
use imageproc::region_labelling::{Connectivity, connected_components};
use serde::{Deserialize, Serialize};

use crate::types::{BorderKind, Contour, Point};

/// Available boundary tracers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ContourTracerKind {
    /// Suzuki-Abe topological border following.
    #[default]
    BorderFollowing,
    /// Moore-neighbor tracing of each labelled region.
    ///
    /// Foreground regions are 8-connected, holes 4-connected. A hole's
    /// boundary runs through the hole's own pixels.
    MooreNeighbor,
}

/// Which boundaries to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RetrievalMode {
    /// Every outer and hole boundary, flat.
    #[default]
    List,
    /// Only outer boundaries of regions that are not inside a hole.
    External,
}

/// Whether straight runs of boundary pixels are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChainApproximation {
    /// Keep every boundary pixel.
    None,
    /// Keep only the end points of horizontal, vertical and diagonal runs.
    #[default]
    Simple,
}

/// A way of turning a binary mask into boundary contours.
///
/// Input: a binary mask (non-zero = foreground).
/// Output: closed polygons through boundary pixel centers.
pub trait ContourTracer {
    /// Trace the boundaries selected by `retrieval`.
    fn trace(&self, mask: &GrayImage, retrieval: RetrievalMode) -> Vec<Contour>;
}

impl ContourTracer for ContourTracerKind {
    fn trace(&self, mask: &GrayImage, retrieval: RetrievalMode) -> Vec<Contour> {
        match *self {
            Self::BorderFollowing => trace_border_following(mask, retrieval),
            Self::MooreNeighbor => trace_moore(mask, retrieval),
        }
    }
}

/// Trace a mask and apply the chain approximation.
#[must_use = "returns the traced contours"]
pub fn extract_contours(
    mask: &GrayImage,
    tracer: ContourTracerKind,
    retrieval: RetrievalMode,
    approximation: ChainApproximation,
) -> Vec<Contour> {
    let contours = tracer.trace(mask, retrieval);
    match approximation {
        ChainApproximation::None => contours,
        ChainApproximation::Simple => contours
            .into_iter()
            .map(|c| {
                let kind = c.kind();
                Contour::new(compress_chain(c.points()), kind)
            })
            .collect(),
    }
}

/// Drop every point that continues the step direction of its
/// predecessor, treating the chain as closed.
///
/// Consecutive input points must be 8-neighbors. The enclosed area is
/// unchanged.
#[must_use]
pub fn compress_chain(points: &[Point]) -> Vec<Point> {
    let n = points.len();
    if n < 3 {
        return points.to_vec();
    }
    let step = |a: Point, b: Point| (b.x - a.x, b.y - a.y);
    let kept: Vec<Point> = (0..n)
        .filter(|&i| {
            let prev = points[(i + n - 1) % n];
            let next = points[(i + 1) % n];
            step(prev, points[i]) != step(points[i], next)
        })
        .map(|i| points[i])
        .collect();
    // A closed straight chain has no corner at all; keep its end points.
    if kept.is_empty() {
        vec![points[0], points[n / 2]]
    } else {
        kept
    }
}

/// Wraps `imageproc`'s Suzuki-Abe implementation.
///
/// The mask is traced inside a one-pixel background frame: without it a
/// region whose first pixel lies on column 0 is reported as a hole.
fn trace_border_following(mask: &GrayImage, retrieval: RetrievalMode) -> Vec<Contour> {
    let (width, height) = mask.dimensions();
    let mut framed = GrayImage::new(width + 2, height + 2);
    image::imageops::replace(&mut framed, mask, 1, 1);
    let contours: Vec<imageproc::contours::Contour<i32>> =
        imageproc::contours::find_contours(&framed);

    contours
        .into_iter()
        .filter(|c| match retrieval {
            RetrievalMode::List => true,
            RetrievalMode::External => c.border_type == BorderType::Outer && c.parent.is_none(),
        })
        .map(|c| {
            let kind = match c.border_type {
                BorderType::Outer => BorderKind::Outer,
                BorderType::Hole => BorderKind::Hole,
            };
            let points = c
                .points
                .into_iter()
                .map(|p| Point::new(p.x - 1, p.y - 1))
                .collect();
            Contour::new(points, kind)
        })
        .collect()
}

/// Moore neighborhood in clockwise order (y grows downward), starting west.
const DIRECTIONS: [(i32, i32); 8] = [
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
];

const WEST: usize = 0;

fn direction_index(dx: i32, dy: i32) -> Option<usize> {
    DIRECTIONS.iter().position(|&d| d == (dx, dy))
}

/// Label maps shared by every region traced in one mask.
struct Regions {
    width: u32,
    height: u32,
    /// 8-connected foreground labels, 0 = background.
    foreground: image::ImageBuffer<Luma<u32>, Vec<u32>>,
    /// 4-connected background labels, 0 = foreground.
    background: image::ImageBuffer<Luma<u32>, Vec<u32>>,
    /// Indexed by background label: `true` if the region touches the
    /// image border (so it is not a hole).
    open_background: Vec<bool>,
}

impl Regions {
    fn label(mask: &GrayImage) -> Self {
        let (width, height) = mask.dimensions();
        let foreground = connected_components(mask, Connectivity::Eight, Luma([0u8]));
        let inverted = GrayImage::from_fn(width, height, |x, y| {
            Luma([if mask.get_pixel(x, y).0[0] > 0 { 0 } else { 255 }])
        });
        let background = connected_components(&inverted, Connectivity::Four, Luma([0u8]));

        let max_label = background.pixels().map(|p| p.0[0]).max().unwrap_or(0);
        let mut open_background = vec![false; max_label as usize + 1];
        let border = (0..width)
            .flat_map(|x| [(x, 0), (x, height - 1)])
            .chain((0..height).flat_map(|y| [(0, y), (width - 1, y)]));
        for (x, y) in border {
            open_background[background.get_pixel(x, y).0[0] as usize] = true;
        }

        Self {
            width,
            height,
            foreground,
            background,
            open_background,
        }
    }

    fn is_hole(&self, label: u32) -> bool {
        label != 0 && !self.open_background[label as usize]
    }

    /// Whether the foreground region whose raster-first pixel is
    /// `(x, y)` lies inside a hole. The pixel west of that first pixel
    /// belongs to the background surrounding the region.
    fn enclosed(&self, x: u32, y: u32) -> bool {
        x > 0 && self.is_hole(self.background.get_pixel(x - 1, y).0[0])
    }
}

fn trace_moore(mask: &GrayImage, retrieval: RetrievalMode) -> Vec<Contour> {
    let (width, height) = mask.dimensions();
    if width == 0 || height == 0 {
        return Vec::new();
    }
    let regions = Regions::label(mask);
    let max_foreground = regions.foreground.pixels().map(|p| p.0[0]).max().unwrap_or(0);
    let mut seen_foreground = vec![false; max_foreground as usize + 1];
    let mut seen_background = vec![false; regions.open_background.len()];
    let mut contours = Vec::new();

    for y in 0..height {
        for x in 0..width {
            #[allow(clippy::cast_possible_wrap)]
            let start = Point::new(x as i32, y as i32);
            let fg = regions.foreground.get_pixel(x, y).0[0];
            if fg != 0 {
                if seen_foreground[fg as usize] {
                    continue;
                }
                seen_foreground[fg as usize] = true;
                if retrieval == RetrievalMode::External && regions.enclosed(x, y) {
                    continue;
                }
                let points = trace_region(&regions, start, |p| {
                    regions.foreground.get_pixel(p.0, p.1).0[0] == fg
                });
                contours.push(Contour::new(points, BorderKind::Outer));
            } else {
                let bg = regions.background.get_pixel(x, y).0[0];
                if retrieval == RetrievalMode::External
                    || !regions.is_hole(bg)
                    || seen_background[bg as usize]
                {
                    continue;
                }
                seen_background[bg as usize] = true;
                let points = trace_region(&regions, start, |p| {
                    regions.background.get_pixel(p.0, p.1).0[0] == bg
                });
                contours.push(Contour::new(points, BorderKind::Hole));
            }
        }
    }
    contours
}

/// Moore-neighbor boundary of the region containing `start`, which must
/// be the region's first pixel in raster order.
///
/// Tracing stops when the walk is about to repeat its first move from
/// `start`, so regions that pass through `start` more than once are
/// traced completely.
fn trace_region<F>(regions: &Regions, start: Point, inside: F) -> Vec<Point>
where
    F: Fn((u32, u32)) -> bool,
{
    let member = |p: Point| -> bool {
        match (u32::try_from(p.x), u32::try_from(p.y)) {
            (Ok(x), Ok(y)) if x < regions.width && y < regions.height => inside((x, y)),
            _ => false,
        }
    };

    // Scan clockwise from the backtrack direction. Returns the next
    // boundary pixel and the direction from it back to the last
    // non-member checked.
    let step = |current: Point, back: usize| -> Option<(Point, usize)> {
        for k in 1..=8 {
            let d = (back + k) % 8;
            let candidate = Point::new(current.x + DIRECTIONS[d].0, current.y + DIRECTIONS[d].1);
            if member(candidate) {
                let prev = DIRECTIONS[(back + k - 1) % 8];
                let back_pixel = (current.x + prev.0, current.y + prev.1);
                let new_back =
                    direction_index(back_pixel.0 - candidate.x, back_pixel.1 - candidate.y)?;
                return Some((candidate, new_back));
            }
        }
        None
    };

    let mut points = vec![start];
    let Some((first, first_back)) = step(start, WEST) else {
        return points;
    };
    let (mut current, mut back) = (first, first_back);
    let max_steps = 4 * (regions.width as usize) * (regions.height as usize) + 8;

    for _ in 0..max_steps {
        let Some((next, next_back)) = step(current, back) else {
            break;
        };
        if current == start && next == first {
            return points;
        }
        points.push(current);
        current = next;
        back = next_back;
    }
    tracing::warn!(x = start.x, y = start.y, "moore trace did not close");
    points
}
