//! Geometry primitives over polygon sets: pixel containment, area,
//! overlap, union, and decomposition into ring components.
//!
//! Shapes are `geo::MultiPolygon<f64>` in pixel-corner coordinates: the
//! pixel `(x, y)` covers the unit square `[x, x + 1] x [y, y + 1]`.
//!
//! # Containment rule
//!
//! A pixel is contained when its centre `(x + 0.5, y + 0.5)` lies inside
//! the shape under the even-odd rule, or on any of its edges. Every ring
//! edge of every polygon takes part, so holes subtract and overlapping
//! seeds drawn by hand behave as even-odd fills. Centres on a hole's edge
//! belong to the shape. The rule treats x and y alike, so a shape and its
//! transpose contain the same number of pixels. Outlines produced by segmentation run
//! along pixel edges, so for them the area equals the component's pixel
//! count exactly.

use geo::{Area, BooleanOps, BoundingRect, Coord, LineString, MultiPolygon, Polygon, Rect};

use crate::types::Dimensions;

/// Intersections with an area at or below this are treated as touching,
/// not overlapping.
pub const OVERLAP_EPSILON: f64 = 1e-9;

/// Axis-aligned rectangle covering pixels `x..x + width`, `y..y + height`.
#[must_use]
pub fn rect(x: f64, y: f64, width: f64, height: f64) -> MultiPolygon<f64> {
    let rect = Rect::new(Coord { x, y }, Coord {
        x: x + width,
        y: y + height,
    });
    MultiPolygon::new(vec![rect.to_polygon()])
}

/// Closed polygon through the given vertices (the closing edge is implied).
#[must_use]
pub fn polygon(vertices: &[(f64, f64)]) -> MultiPolygon<f64> {
    if vertices.is_empty() {
        return MultiPolygon::new(Vec::new());
    }
    let ring: LineString<f64> = vertices.iter().map(|&(x, y)| Coord { x, y }).collect();
    MultiPolygon::new(vec![Polygon::new(ring, Vec::new())])
}

/// Enumerate the pixels contained by `shape`, row by row, left to right.
///
/// Shapes with no vertices, zero width or height, or non-finite
/// coordinates contain no pixels.
#[must_use]
pub fn contained_points(shape: &MultiPolygon<f64>) -> Vec<(i64, i64)> {
    let mut points = Vec::new();
    for_each_span(shape, |y, start, end| points.extend((start..=end).map(|x| (x, y))));
    points
}

/// Number of contained pixels. Zero for degenerate shapes.
#[must_use]
pub fn area(shape: &MultiPolygon<f64>) -> u64 {
    let mut total = 0;
    for_each_span(shape, |_, start, end| total += (end - start + 1).unsigned_abs());
    total
}

/// Call `f(y, start, end)` for every maximal run of contained pixels, rows
/// ascending and runs left to right. Runs are inclusive and never touch.
#[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
fn for_each_span<F: FnMut(i64, i64, i64)>(shape: &MultiPolygon<f64>, mut f: F) {
    let Some(bounds) = shape.bounding_rect() else {
        return;
    };
    let (min, max) = (bounds.min(), bounds.max());
    if !(min.x.is_finite() && min.y.is_finite() && max.x.is_finite() && max.y.is_finite()) {
        return;
    }
    if bounds.width() <= 0.0 || bounds.height() <= 0.0 {
        return;
    }

    let edges: Vec<(Coord<f64>, Coord<f64>)> = shape
        .iter()
        .flat_map(|p| std::iter::once(p.exterior()).chain(p.interiors()))
        .flat_map(|ring| ring.lines().map(|l| (l.start, l.end)))
        .collect();

    let first_row = (min.y - 0.5).ceil() as i64;
    let last_row = (max.y - 0.5).floor() as i64;

    let mut crossings: Vec<f64> = Vec::new();
    let mut spans: Vec<(i64, i64)> = Vec::new();
    for y in first_row..=last_row {
        #[allow(clippy::cast_precision_loss)]
        let yc = y as f64 + 0.5;

        crossings.clear();
        spans.clear();
        for &(a, b) in &edges {
            // Interior: an edge counts when exactly one endpoint is at or
            // above the scanline.
            if (a.y <= yc) != (b.y <= yc) {
                let t = (yc - a.y) / (b.y - a.y);
                crossings.push(t.mul_add(b.x - a.x, a.x));
            }
            // Boundary: the part of the edge lying on the scanline, which
            // is the whole edge when it is horizontal.
            if a.y.min(b.y) <= yc && yc <= a.y.max(b.y) {
                let (lo, hi) = if a.y == b.y {
                    (a.x.min(b.x), a.x.max(b.x))
                } else {
                    let t = (yc - a.y) / (b.y - a.y);
                    let x = t.mul_add(b.x - a.x, a.x);
                    (x, x)
                };
                spans.push(((lo - 0.5).ceil() as i64, (hi - 0.5).floor() as i64));
            }
        }
        crossings.sort_by(f64::total_cmp);
        for pair in crossings.chunks_exact(2) {
            spans.push(((pair[0] - 0.5).ceil() as i64, (pair[1] - 0.5).floor() as i64));
        }

        spans.retain(|&(start, end)| start <= end);
        spans.sort_unstable();
        let mut run: Option<(i64, i64)> = None;
        for &(start, end) in &spans {
            run = match run {
                Some((run_start, run_end)) if start <= run_end + 1 => {
                    Some((run_start, run_end.max(end)))
                }
                Some((run_start, run_end)) => {
                    f(y, run_start, run_end);
                    Some((start, end))
                }
                None => Some((start, end)),
            };
        }
        if let Some((start, end)) = run {
            f(y, start, end);
        }
    }
}

/// Clip `shape` to the pixel grid of an image of `dimensions`.
///
/// Shapes already inside the image, and shapes with non-finite
/// coordinates (which contain no pixels), are returned unchanged.
#[must_use]
pub fn clip_to(shape: &MultiPolygon<f64>, dimensions: Dimensions) -> MultiPolygon<f64> {
    let (width, height) = (f64::from(dimensions.width), f64::from(dimensions.height));
    let Some(bounds) = shape.bounding_rect() else {
        return shape.clone();
    };
    let (min, max) = (bounds.min(), bounds.max());
    if !(min.x.is_finite() && min.y.is_finite() && max.x.is_finite() && max.y.is_finite()) {
        return shape.clone();
    }
    if min.x >= 0.0 && min.y >= 0.0 && max.x <= width && max.y <= height {
        return shape.clone();
    }
    shape.intersection(&rect(0.0, 0.0, width, height))
}

/// `true` if the intersection of `a` and `b` has positive area.
///
/// Shapes that only share an edge or a vertex do not overlap. Bounding
/// boxes are used to reject early, never to accept.
#[must_use]
pub fn overlaps(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> bool {
    let (Some(ra), Some(rb)) = (a.bounding_rect(), b.bounding_rect()) else {
        return false;
    };
    if !rects_overlap(ra, rb) {
        return false;
    }
    a.intersection(b).unsigned_area() > OVERLAP_EPSILON
}

/// Strict rectangle overlap: touching rectangles do not overlap.
fn rects_overlap(a: Rect<f64>, b: Rect<f64>) -> bool {
    a.min().x < b.max().x && b.min().x < a.max().x && a.min().y < b.max().y && b.min().y < a.max().y
}

/// Boolean union of `shapes`, folded left to right.
///
/// A single shape is returned as-is without any boolean operation. An
/// empty input yields an empty set.
#[must_use]
pub fn union<'a, I>(shapes: I) -> MultiPolygon<f64>
where
    I: IntoIterator<Item = &'a MultiPolygon<f64>>,
{
    let mut iter = shapes.into_iter();
    let Some(first) = iter.next() else {
        return MultiPolygon::new(Vec::new());
    };
    iter.fold(first.clone(), |acc, next| acc.union(next))
}

/// Split a shape into hole-free ring components.
///
/// Every exterior ring and every hole ring becomes its own polygon, in
/// polygon order with each exterior followed by its holes. A square with a
/// hole therefore yields the full square and the hole as two components.
#[must_use]
pub fn components(shape: &MultiPolygon<f64>) -> Vec<Polygon<f64>> {
    shape
        .iter()
        .flat_map(|p| std::iter::once(p.exterior()).chain(p.interiors()))
        .filter(|ring| ring.0.len() >= 3)
        .map(|ring| Polygon::new(ring.clone(), Vec::new()))
        .collect()
}

/// Bounding rectangle, if the shape has any vertices.
#[must_use]
pub fn envelope(shape: &MultiPolygon<f64>) -> Option<Rect<f64>> {
    shape.bounding_rect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_with_hole() -> MultiPolygon<f64> {
        let outer = geo::Polygon::new(
            LineString::from(vec![(0.0, 0.0), (4.0, 0.0), (4.0, 4.0), (0.0, 4.0)]),
            vec![LineString::from(vec![
                (1.0, 1.0),
                (1.0, 3.0),
                (3.0, 3.0),
                (3.0, 1.0),
            ])],
        );
        MultiPolygon::new(vec![outer])
    }

    #[test]
    fn rect_area_is_pixel_count() {
        assert_eq!(area(&rect(3.0, 3.0, 4.0, 4.0)), 16);
        assert_eq!(area(&rect(0.0, 0.0, 1.0, 1.0)), 1);
    }

    #[test]
    fn contained_points_are_row_major() {
        let pts = contained_points(&rect(2.0, 5.0, 2.0, 2.0));
        assert_eq!(pts, vec![(2, 5), (3, 5), (2, 6), (3, 6)]);
    }

    #[test]
    fn empty_shape_has_zero_area() {
        assert_eq!(area(&MultiPolygon::new(Vec::new())), 0);
        assert_eq!(area(&polygon(&[])), 0);
    }

    #[test]
    fn degenerate_shape_has_zero_area() {
        // Collinear vertices enclose nothing.
        let line = polygon(&[(0.0, 0.0), (5.0, 0.0), (10.0, 0.0)]);
        assert_eq!(area(&line), 0);
        let zero_height = rect(1.0, 1.0, 5.0, 0.0);
        assert_eq!(area(&zero_height), 0);
    }

    #[test]
    fn holes_are_excluded() {
        assert_eq!(area(&square_with_hole()), 12);
    }

    #[test]
    fn area_ignores_vertex_order() {
        let cw = polygon(&[(0.0, 0.0), (0.0, 3.0), (2.0, 3.0), (2.0, 0.0)]);
        let ccw = polygon(&[(2.0, 3.0), (2.0, 0.0), (0.0, 0.0), (0.0, 3.0)]);
        assert_eq!(area(&cw), 6);
        assert_eq!(area(&cw), area(&ccw));
    }

    #[test]
    fn boundary_centres_are_included() {
        // Edge at x = 2.5 passes through the centres of column 2.
        let shape = rect(0.0, 0.0, 2.5, 1.0);
        assert_eq!(contained_points(&shape), vec![(0, 0), (1, 0), (2, 0)]);
    }

    #[test]
    fn horizontal_boundary_centres_are_included() {
        // Top edge at y = 0.5 and bottom edge at y = 1.5 both pass through
        // pixel centres.
        let shape = rect(0.0, 0.5, 2.0, 1.0);
        assert_eq!(
            contained_points(&shape),
            vec![(0, 0), (1, 0), (0, 1), (1, 1)]
        );
    }

    #[test]
    fn transpose_keeps_area() {
        assert_eq!(area(&rect(0.0, 0.5, 2.0, 1.0)), 4);
        assert_eq!(area(&rect(0.5, 0.0, 1.0, 2.0)), 4);
        assert_eq!(area(&rect(1.5, 0.5, 3.0, 2.0)), area(&rect(0.5, 1.5, 2.0, 3.0)));
    }

    #[test]
    fn area_matches_point_count() {
        let shapes = [
            square_with_hole(),
            rect(0.5, 0.5, 3.0, 2.0),
            polygon(&[(0.0, 0.0), (4.0, 0.0), (0.0, 4.0)]),
            union([&rect(0.0, 0.0, 2.0, 2.0), &rect(5.0, 0.0, 2.0, 2.0)]),
        ];
        for shape in &shapes {
            assert_eq!(area(shape), contained_points(shape).len() as u64);
        }
    }

    #[test]
    fn clip_keeps_only_image_pixels() {
        let dims = Dimensions {
            width: 10,
            height: 10,
        };
        let huge = rect(-2000.0, -2000.0, 4000.0, 4000.0);
        assert_eq!(area(&clip_to(&huge, dims)), 100);
        let straddling = rect(8.0, 8.0, 4.0, 4.0);
        assert_eq!(area(&clip_to(&straddling, dims)), 4);
        let inside = rect(1.0, 1.0, 2.0, 2.0);
        assert_eq!(clip_to(&inside, dims), inside);
        let outside = rect(20.0, 20.0, 2.0, 2.0);
        assert_eq!(area(&clip_to(&outside, dims)), 0);
    }

    #[test]
    fn triangle_area() {
        // Right triangle with legs of 4: centres below the diagonal.
        let tri = polygon(&[(0.0, 0.0), (4.0, 0.0), (0.0, 4.0)]);
        // Row y has centres x + 0.5 <= 4 - (y + 0.5) -> x <= 3 - y.
        assert_eq!(area(&tri), 4 + 3 + 2 + 1);
    }

    #[test]
    fn overlapping_squares_overlap() {
        let a = rect(0.0, 0.0, 4.0, 4.0);
        let b = rect(2.0, 2.0, 4.0, 4.0);
        assert!(overlaps(&a, &b));
        assert!(overlaps(&b, &a));
    }

    #[test]
    fn touching_squares_do_not_overlap() {
        let a = rect(0.0, 0.0, 4.0, 4.0);
        let edge = rect(4.0, 0.0, 4.0, 4.0);
        let corner = rect(4.0, 4.0, 2.0, 2.0);
        assert!(!overlaps(&a, &edge));
        assert!(!overlaps(&edge, &a));
        assert!(!overlaps(&a, &corner));
    }

    #[test]
    fn concave_shape_without_overlap() {
        // An L-shape whose bounding box covers the small square, but whose
        // area does not.
        let l_shape = polygon(&[
            (0.0, 0.0),
            (6.0, 0.0),
            (6.0, 2.0),
            (2.0, 2.0),
            (2.0, 6.0),
            (0.0, 6.0),
        ]);
        let inside_notch = rect(3.0, 3.0, 2.0, 2.0);
        assert!(!overlaps(&l_shape, &inside_notch));
        assert!(!overlaps(&inside_notch, &l_shape));
    }

    #[test]
    fn shape_inside_hole_does_not_overlap() {
        let patch = rect(1.0, 1.0, 2.0, 2.0);
        assert!(!overlaps(&square_with_hole(), &patch));
    }

    #[test]
    fn union_single_is_identity() {
        let r = rect(1.0, 2.0, 3.0, 4.0);
        assert_eq!(union([&r]), r);
    }

    #[test]
    fn union_with_itself_keeps_area() {
        let r = rect(1.0, 2.0, 3.0, 4.0);
        assert_eq!(area(&union([&r, &r])), area(&r));
    }

    #[test]
    fn union_of_disjoint_adds_areas() {
        let a = rect(0.0, 0.0, 2.0, 2.0);
        let b = rect(5.0, 5.0, 3.0, 1.0);
        let u = union([&a, &b]);
        assert_eq!(area(&u), 7);
        assert_eq!(u.0.len(), 2);
    }

    #[test]
    fn union_of_overlapping_counts_once() {
        let a = rect(0.0, 0.0, 4.0, 4.0);
        let b = rect(2.0, 0.0, 4.0, 4.0);
        assert_eq!(area(&union([&a, &b])), 24);
    }

    #[test]
    fn union_is_order_independent_in_area() {
        let a = rect(0.0, 0.0, 4.0, 4.0);
        let b = rect(2.0, 1.0, 4.0, 4.0);
        let c = rect(8.0, 8.0, 1.0, 1.0);
        assert_eq!(area(&union([&a, &b, &c])), area(&union([&c, &b, &a])));
    }

    #[test]
    fn union_of_nothing_is_empty() {
        let none: [&MultiPolygon<f64>; 0] = [];
        assert!(union(none).0.is_empty());
    }

    #[test]
    fn components_split_holes() {
        let parts = components(&square_with_hole());
        assert_eq!(parts.len(), 2);
        let areas: Vec<u64> = parts
            .into_iter()
            .map(|p| area(&MultiPolygon::new(vec![p])))
            .collect();
        assert_eq!(areas, vec![16, 4]);
    }

    #[test]
    fn envelope_of_rect() {
        let env = envelope(&rect(1.0, 2.0, 3.0, 4.0)).map(|r| (r.min(), r.max()));
        assert_eq!(env, Some((Coord { x: 1.0, y: 2.0 }, Coord { x: 4.0, y: 6.0 })));
        assert!(envelope(&MultiPolygon::new(Vec::new())).is_none());
    }
}
