//! Threshold segmentation: turn one slice into candidate regions.
//!
//! This module defines the [`Segmenter`] trait for pluggable segmentation
//! strategies and the [`SegmenterKind`] enum for selecting one at runtime,
//! plus the adapter ([`segment_slice`]) that the propagator calls: it reads
//! the slice from the stack, runs the segmenter, wraps each outline in a
//! [`Region`] and drops components that are too small.
//!
//! # Outlines
//!
//! [`SegmenterKind::ThresholdOutline`] labels 8-connected components of the
//! in-band mask with `imageproc` and traces each component's boundary along
//! pixel edges. Counter-clockwise rings are exteriors, clockwise rings are
//! holes. Because outlines follow pixel edges, a component's area under the
//! containment rule in [`crate::geometry`] equals its pixel count.

use std::collections::BTreeMap;

use geo::{Area, Contains, Coord, LineString, MultiPolygon, Point, Polygon};
use image::{GrayImage, ImageBuffer, Luma};
use imageproc::region_labelling::{Connectivity, connected_components};
use serde::{Deserialize, Serialize};

use crate::region::Region;
use crate::stack::{ImageStack, SliceImage};
use crate::types::{Band, Dimensions, TrackerError};

/// Selects which segmentation algorithm to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SegmenterKind {
    /// Band threshold, 8-connected labelling, pixel-edge outlines.
    #[default]
    ThresholdOutline,
}

/// Trait for segmentation strategies.
///
/// Input: one slice and an intensity band. Output: one polygon set per
/// connected component, in a deterministic order.
pub trait Segmenter {
    /// Outline every connected component of the pixels inside `band`.
    fn outlines(&self, image: &SliceImage, band: Band) -> Vec<MultiPolygon<f64>>;
}

impl Segmenter for SegmenterKind {
    fn outlines(&self, image: &SliceImage, band: Band) -> Vec<MultiPolygon<f64>> {
        match *self {
            Self::ThresholdOutline => {
                let labels = label_components(image, band);
                let mut components: Vec<(u32, Vec<(u32, u32)>)> =
                    component_pixels(&labels).into_iter().collect();
                // Raster order of each component's first pixel, independent
                // of how the labeller numbers them.
                components.sort_by_key(|(_, pixels)| pixels.first().map(|&(x, y)| (y, x)));
                components
                    .into_iter()
                    .map(|(label, pixels)| {
                        trace_outline(&pixels, |x, y| label_at(&labels, x, y) == label)
                    })
                    .collect()
            }
        }
    }
}

/// Segment `slice` into candidate regions.
///
/// Every candidate is unsigned and has an area strictly greater than
/// `min_area`. Components of zero area are always dropped.
///
/// # Errors
///
/// [`TrackerError::NoImage`] or [`TrackerError::SliceOutOfRange`] from the
/// stack.
pub fn segment_slice<S, G>(
    segmenter: &G,
    stack: &S,
    slice: u32,
    band: Band,
    min_area: u64,
) -> Result<Vec<Region>, TrackerError>
where
    S: ImageStack + ?Sized,
    G: Segmenter + ?Sized,
{
    let image = stack.slice(slice)?;
    Ok(segmenter
        .outlines(image, band)
        .into_iter()
        .map(|shape| Region::new(slice, shape, None))
        .filter(|region| region.area() > min_area && region.area() > 0)
        .collect())
}

/// Outline the in-band component containing pixel `(x, y)`.
///
/// Returns `None` if that pixel is outside `band`. This is how a seed can
/// be picked from a single click instead of a drawn polygon.
///
/// # Errors
///
/// Stack errors as for [`segment_slice`], plus
/// [`TrackerError::CoordinateOutOfRange`].
pub fn select_component_at<S>(
    stack: &S,
    slice: u32,
    band: Band,
    x: i64,
    y: i64,
) -> Result<Option<MultiPolygon<f64>>, TrackerError>
where
    S: ImageStack + ?Sized,
{
    let image = stack.slice(slice)?;
    let dims = Dimensions {
        width: image.width(),
        height: image.height(),
    };
    if !dims.contains(x, y) {
        return Err(TrackerError::CoordinateOutOfRange {
            x,
            y,
            width: dims.width,
            height: dims.height,
        });
    }

    let labels = label_components(image, band);
    let label = label_at(&labels, x, y);
    if label == 0 {
        return Ok(None);
    }
    let pixels: Vec<(u32, u32)> = labels
        .enumerate_pixels()
        .filter(|(_, _, l)| l.0[0] == label)
        .map(|(px, py, _)| (px, py))
        .collect();
    Ok(Some(trace_outline(&pixels, |px, py| {
        label_at(&labels, px, py) == label
    })))
}

type Labels = ImageBuffer<Luma<u32>, Vec<u32>>;

/// Label the 8-connected components of the pixels inside `band`.
/// Background is 0.
fn label_components(image: &SliceImage, band: Band) -> Labels {
    let mask = GrayImage::from_fn(image.width(), image.height(), |x, y| {
        Luma([if band.contains(image.get_pixel(x, y).0[0]) { 255 } else { 0 }])
    });
    connected_components(&mask, Connectivity::Eight, Luma([0u8]))
}

/// Label at `(x, y)`, 0 outside the image.
fn label_at(labels: &Labels, x: i64, y: i64) -> u32 {
    match (u32::try_from(x), u32::try_from(y)) {
        (Ok(px), Ok(py)) if px < labels.width() && py < labels.height() => {
            labels.get_pixel(px, py).0[0]
        }
        _ => 0,
    }
}

/// Pixels of each labelled component, each list in raster order.
fn component_pixels(labels: &Labels) -> BTreeMap<u32, Vec<(u32, u32)>> {
    let mut components: BTreeMap<u32, Vec<(u32, u32)>> = BTreeMap::new();
    for (x, y, label) in labels.enumerate_pixels() {
        if label.0[0] != 0 {
            components.entry(label.0[0]).or_default().push((x, y));
        }
    }
    components
}

type Vertex = (i64, i64);
type Step = (i64, i64);

/// Trace the pixel-edge boundary of a pixel set.
///
/// Each member pixel contributes one directed unit edge per side that
/// borders a non-member, oriented so the member is on the left
/// (counter-clockwise in image coordinates, where `y` grows downward and
/// the shoelace sum of an exterior ring is positive). Edges are chained
/// into closed rings; at a vertex shared by two diagonal pixels the walk
/// turns towards the pixel it is already following, so diagonal neighbours
/// get separate rings.
fn trace_outline<F>(pixels: &[(u32, u32)], is_member: F) -> MultiPolygon<f64>
where
    F: Fn(i64, i64) -> bool,
{
    let mut outgoing: BTreeMap<Vertex, Vec<Step>> = BTreeMap::new();
    for &(px, py) in pixels {
        let (x, y) = (i64::from(px), i64::from(py));
        if !is_member(x, y - 1) {
            outgoing.entry((x, y)).or_default().push((1, 0));
        }
        if !is_member(x + 1, y) {
            outgoing.entry((x + 1, y)).or_default().push((0, 1));
        }
        if !is_member(x, y + 1) {
            outgoing.entry((x + 1, y + 1)).or_default().push((-1, 0));
        }
        if !is_member(x - 1, y) {
            outgoing.entry((x, y + 1)).or_default().push((0, -1));
        }
    }

    let mut rings = Vec::new();
    while let Some(start) = outgoing.keys().next().copied() {
        let mut ring = vec![start];
        let mut at = start;
        let mut heading: Option<Step> = None;
        while let Some(step) = take_step(&mut outgoing, at, heading) {
            at = (at.0 + step.0, at.1 + step.1);
            heading = Some(step);
            if at == start {
                break;
            }
            ring.push(at);
        }
        let ring = drop_collinear(ring);
        if ring.len() >= 3 {
            rings.push(ring);
        }
    }

    assemble(rings)
}

/// Remove and return the outgoing edge at `at` that best continues
/// `heading`: left turn first, then straight, then right.
fn take_step(
    outgoing: &mut BTreeMap<Vertex, Vec<Step>>,
    at: Vertex,
    heading: Option<Step>,
) -> Option<Step> {
    let steps = outgoing.get_mut(&at)?;
    let index = match heading {
        None => 0,
        Some(h) => (0..steps.len()).min_by_key(|&i| turn_rank(h, steps[i]))?,
    };
    let step = steps.swap_remove(index);
    if steps.is_empty() {
        outgoing.remove(&at);
    }
    Some(step)
}

fn turn_rank(heading: Step, next: Step) -> u8 {
    let cross = heading.0 * next.1 - heading.1 * next.0;
    let dot = heading.0 * next.0 + heading.1 * next.1;
    match (cross.signum(), dot > 0) {
        (1, _) => 0,
        (0, true) => 1,
        (-1, _) => 2,
        _ => 3,
    }
}

/// Drop vertices that sit on a straight run, treating the ring as cyclic.
fn drop_collinear(ring: Vec<Vertex>) -> Vec<Vertex> {
    let n = ring.len();
    if n < 3 {
        return ring;
    }
    (0..n)
        .filter(|&i| {
            let prev = ring[(i + n - 1) % n];
            let cur = ring[i];
            let next = ring[(i + 1) % n];
            (cur.0 - prev.0) * (next.1 - cur.1) != (cur.1 - prev.1) * (next.0 - cur.0)
        })
        .map(|i| ring[i])
        .collect()
}

/// Centre of the non-member pixel to the right of a hole ring's first edge.
fn point_in_hole(ring: &[Coord<f64>]) -> (f64, f64) {
    let (a, b) = (ring[0], ring[1 % ring.len()]);
    // Edges are axis-aligned with integer length.
    let (dx, dy) = ((b.x - a.x).clamp(-1.0, 1.0), (b.y - a.y).clamp(-1.0, 1.0));
    let (mx, my) = (dx.mul_add(0.5, a.x), dy.mul_add(0.5, a.y));
    (dy.mul_add(0.5, mx), dx.mul_add(-0.5, my))
}

/// Group rings into polygons: each hole goes to the smallest exterior that
/// contains it.
fn assemble(rings: Vec<Vec<Vertex>>) -> MultiPolygon<f64> {
    let (exteriors, holes): (Vec<_>, Vec<_>) = rings
        .into_iter()
        .map(|ring| Polygon::new(to_line_string(&ring), Vec::new()))
        .partition(|ring| ring.signed_area() > 0.0);

    let mut interiors: Vec<Vec<LineString<f64>>> = vec![Vec::new(); exteriors.len()];
    for hole in holes {
        let (x, y) = point_in_hole(&hole.exterior().0);
        let inside = Point::new(x, y);
        let owner = exteriors
            .iter()
            .enumerate()
            .filter(|(_, ext)| ext.contains(&inside))
            .min_by(|(_, a), (_, b)| a.signed_area().total_cmp(&b.signed_area()))
            .map(|(i, _)| i);
        if let Some(i) = owner {
            let (ring, _) = hole.into_inner();
            interiors[i].push(ring);
        }
    }

    MultiPolygon::new(
        exteriors
            .into_iter()
            .zip(interiors)
            .map(|(ext, holes)| Polygon::new(ext.into_inner().0, holes))
            .collect(),
    )
}

#[allow(clippy::cast_precision_loss)]
fn to_line_string(ring: &[Vertex]) -> LineString<f64> {
    ring.iter()
        .map(|&(x, y)| Coord {
            x: x as f64,
            y: y as f64,
        })
        .collect()
}
