//! Sign classification: does a region add to the volume or subtract from it?
//!
//! A region is [`Sign::Positive`] if **any** pixel it contains has a value
//! strictly inside the "inside" band, and [`Sign::Negative`] otherwise. A
//! single in-band pixel is enough to flip a whole region positive; this is
//! not a majority vote.

use geo::MultiPolygon;

use crate::geometry;
use crate::region::Sign;
use crate::stack::SliceImage;
use crate::types::Band;

/// Classify `shape` against the pixels of one slice.
///
/// Contained pixels that fall outside the image are skipped, so a shape
/// lying entirely off the image is [`Sign::Negative`].
#[must_use]
pub fn classify(shape: &MultiPolygon<f64>, image: &SliceImage, inside: Band) -> Sign {
    let (width, height) = image.dimensions();
    let any_inside = geometry::contained_points(shape)
        .into_iter()
        .filter_map(|(x, y)| {
            let px = u32::try_from(x).ok().filter(|&px| px < width)?;
            let py = u32::try_from(y).ok().filter(|&py| py < height)?;
            Some(image.get_pixel(px, py).0[0])
        })
        .any(|value| inside.contains_strictly(value));

    if any_inside {
        Sign::Positive
    } else {
        Sign::Negative
    }
}
