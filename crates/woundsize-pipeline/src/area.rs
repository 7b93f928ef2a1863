//! Polygon area and the aggregation of contour areas into one value.

use serde::{Deserialize, Serialize};

use crate::types::{Contour, Point};

/// How the areas of the contours that pass the minimum-area filter
/// combine into the reported pixel area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AggregationPolicy {
    /// Sum every surviving contour, holes included.
    #[default]
    SumAboveThreshold,
    /// Report only the largest surviving contour.
    LargestOnly,
}

/// Output of [`aggregate`].
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    /// Combined area in square pixels; 0.0 when nothing survived.
    pub pixel_area: f64,
    /// Indices of the contours that contributed, in input order.
    pub kept: Vec<usize>,
}

/// Enclosed area of a closed polygon (shoelace formula).
///
/// Orientation does not matter. Fewer than three points enclose nothing.
/// Cross products are accumulated in integers, so the result is exact.
#[must_use]
pub fn polygon_area(points: &[Point]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let twice: i64 = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(a, b)| i64::from(a.x) * i64::from(b.y) - i64::from(b.x) * i64::from(a.y))
        .sum();
    #[allow(clippy::cast_precision_loss)]
    let twice = twice.unsigned_abs() as f64;
    twice / 2.0
}

/// Filter contours by area and combine the survivors.
///
/// A contour survives when its area is strictly greater than
/// `min_area`. With [`AggregationPolicy::LargestOnly`] ties go to the
/// contour that comes first.
#[must_use]
pub fn aggregate(contours: &[Contour], min_area: f64, policy: AggregationPolicy) -> Aggregate {
    let survivors = contours
        .iter()
        .enumerate()
        .map(|(i, c)| (i, c.area()))
        .filter(|&(_, area)| area > min_area);

    match policy {
        AggregationPolicy::SumAboveThreshold => {
            // Accumulate from +0.0: an empty `f64` sum is -0.0.
            let mut pixel_area = 0.0;
            let mut kept = Vec::new();
            for (i, area) in survivors {
                pixel_area += area;
                kept.push(i);
            }
            Aggregate { pixel_area, kept }
        }
        AggregationPolicy::LargestOnly => {
            let largest = survivors.fold(None, |best: Option<(usize, f64)>, (i, area)| match best {
                Some((_, best_area)) if best_area >= area => best,
                _ => Some((i, area)),
            });
            largest.map_or_else(
                || Aggregate {
                    pixel_area: 0.0,
                    kept: Vec::new(),
                },
                |(i, area)| Aggregate {
                    pixel_area: area,
                    kept: vec![i],
                },
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BorderKind;

    fn rect(x: i32, y: i32, w: i32, h: i32) -> Contour {
        Contour::new(
            vec![
                Point::new(x, y),
                Point::new(x + w, y),
                Point::new(x + w, y + h),
                Point::new(x, y + h),
            ],
            BorderKind::Outer,
        )
    }

    #[test]
    fn unit_square_has_area_one() {
        let square = [
            Point::new(0, 0),
            Point::new(1, 0),
            Point::new(1, 1),
            Point::new(0, 1),
        ];
        assert!((polygon_area(&square) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn orientation_does_not_matter() {
        let ccw = [Point::new(0, 0), Point::new(4, 0), Point::new(0, 3)];
        let cw = [Point::new(0, 0), Point::new(0, 3), Point::new(4, 0)];
        assert!((polygon_area(&ccw) - 6.0).abs() < f64::EPSILON);
        assert!((polygon_area(&cw) - 6.0).abs() < f64::EPSILON);
    }

    #[test]
    fn degenerate_polygons_have_zero_area() {
        assert!(polygon_area(&[]).abs() < f64::EPSILON);
        assert!(polygon_area(&[Point::new(3, 3)]).abs() < f64::EPSILON);
        let line = [Point::new(0, 0), Point::new(5, 5), Point::new(2, 2)];
        assert!(polygon_area(&line).abs() < f64::EPSILON);
    }

    #[test]
    fn small_contours_are_dropped() {
        // 50 px² and 500 px².
        let contours = [rect(0, 0, 5, 10), rect(20, 20, 20, 25)];
        let agg = aggregate(&contours, 100.0, AggregationPolicy::SumAboveThreshold);
        assert!((agg.pixel_area - 500.0).abs() < f64::EPSILON);
        assert_eq!(agg.kept, vec![1]);
    }

    #[test]
    fn traced_mask_keeps_only_the_large_blob() {
        use crate::contour::{
            ChainApproximation, ContourTracerKind, RetrievalMode, extract_contours,
        };
        // 5x10 and 20x25 pixel blobs; traced outlines run through pixel
        // centers, giving 36 and 456 px².
        let mask = image::GrayImage::from_fn(60, 60, |x, y| {
            let small = (2..7).contains(&x) && (2..12).contains(&y);
            let large = (30..50).contains(&x) && (20..45).contains(&y);
            image::Luma([if small || large { 255 } else { 0 }])
        });
        for tracer in [
            ContourTracerKind::BorderFollowing,
            ContourTracerKind::MooreNeighbor,
        ] {
            let contours = extract_contours(
                &mask,
                tracer,
                RetrievalMode::List,
                ChainApproximation::Simple,
            );
            assert_eq!(contours.len(), 2, "{tracer:?}");
            let agg = aggregate(&contours, 100.0, AggregationPolicy::SumAboveThreshold);
            assert_eq!(agg.kept, vec![1], "{tracer:?}");
            assert!((agg.pixel_area - 456.0).abs() < f64::EPSILON, "{tracer:?}");
        }
    }

    #[test]
    fn filter_is_strict() {
        let contours = [rect(0, 0, 10, 10)];
        let agg = aggregate(&contours, 100.0, AggregationPolicy::SumAboveThreshold);
        assert!(agg.pixel_area.abs() < f64::EPSILON);
        assert!(agg.kept.is_empty());
    }

    #[test]
    fn sum_adds_every_survivor() {
        let contours = [rect(0, 0, 20, 10), rect(50, 50, 30, 10), rect(0, 90, 2, 2)];
        let agg = aggregate(&contours, 100.0, AggregationPolicy::SumAboveThreshold);
        assert!((agg.pixel_area - 500.0).abs() < f64::EPSILON);
        assert_eq!(agg.kept, vec![0, 1]);
    }

    #[test]
    fn largest_only_keeps_one() {
        let contours = [rect(0, 0, 20, 10), rect(50, 50, 30, 10), rect(0, 90, 15, 20)];
        let agg = aggregate(&contours, 100.0, AggregationPolicy::LargestOnly);
        assert!((agg.pixel_area - 300.0).abs() < f64::EPSILON);
        assert_eq!(agg.kept, vec![1]);
    }

    #[test]
    fn largest_only_tie_goes_to_first() {
        let contours = [rect(0, 0, 20, 10), rect(50, 50, 10, 20)];
        let agg = aggregate(&contours, 100.0, AggregationPolicy::LargestOnly);
        assert_eq!(agg.kept, vec![0]);
    }

    #[test]
    fn nothing_survives_gives_zero() {
        for policy in [
            AggregationPolicy::SumAboveThreshold,
            AggregationPolicy::LargestOnly,
        ] {
            let agg = aggregate(&[rect(0, 0, 5, 5)], 100.0, policy);
            assert_eq!(agg.pixel_area.to_bits(), 0.0f64.to_bits(), "{policy:?}");
            assert!(agg.kept.is_empty());
            let agg = aggregate(&[], 100.0, policy);
            assert!(agg.pixel_area.is_sign_positive(), "{policy:?}");
        }
    }
}
