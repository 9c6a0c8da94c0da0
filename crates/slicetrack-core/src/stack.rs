//! Image stacks: the pixel data tracking reads from.
//!
//! Every accessor takes an explicit 1-based slice index; there is no
//! "current slice" cursor.

use image::{ImageBuffer, Luma};

use crate::types::{Dimensions, TrackerError};

/// One slice of pixel values.
///
/// Values are stored as `f32` in the source's native units (0..255 for
/// 8-bit data, 0..65535 for 16-bit data), not normalized.
pub type SliceImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Read access to a stack of equally sized slices.
pub trait ImageStack {
    /// Number of slices. Zero means no image is loaded.
    fn depth(&self) -> u32;

    /// Size shared by every slice, `None` when no image is loaded.
    fn dimensions(&self) -> Option<Dimensions>;

    /// Pixel data of `slice`.
    ///
    /// # Errors
    ///
    /// [`TrackerError::NoImage`] if the stack is empty,
    /// [`TrackerError::SliceOutOfRange`] if `slice` is not in `1..=depth`.
    fn slice(&self, slice: u32) -> Result<&SliceImage, TrackerError>;

    /// Value of the pixel `(x, y)` on `slice`.
    ///
    /// # Errors
    ///
    /// Everything [`slice`](Self::slice) returns, plus
    /// [`TrackerError::CoordinateOutOfRange`].
    fn pixel_value(&self, slice: u32, x: i64, y: i64) -> Result<f32, TrackerError> {
        let image = self.slice(slice)?;
        let dims = Dimensions {
            width: image.width(),
            height: image.height(),
        };
        match (u32::try_from(x), u32::try_from(y)) {
            (Ok(px), Ok(py)) if dims.contains(x, y) => Ok(image.get_pixel(px, py).0[0]),
            _ => Err(TrackerError::CoordinateOutOfRange {
                x,
                y,
                width: dims.width,
                height: dims.height,
            }),
        }
    }
}

/// An in-memory stack.
#[derive(Debug, Clone, Default)]
pub struct VolumeStack {
    slices: Vec<SliceImage>,
}

impl VolumeStack {
    /// Build a stack from slices in order (first element is slice 1).
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::DimensionMismatch`] if the slices are not all
    /// the same size.
    pub fn new(slices: Vec<SliceImage>) -> Result<Self, TrackerError> {
        if let Some(first) = slices.first() {
            let (width, height) = first.dimensions();
            for (index, image) in (1u32..).zip(&slices) {
                let (found_width, found_height) = image.dimensions();
                if (found_width, found_height) != (width, height) {
                    return Err(TrackerError::DimensionMismatch {
                        slice: index,
                        width,
                        height,
                        found_width,
                        found_height,
                    });
                }
            }
        }
        Ok(Self { slices })
    }

    /// Build a stack of `depth` slices by evaluating `f(slice, x, y)` for
    /// every pixel. Slices are numbered from 1.
    #[must_use]
    pub fn from_fn<F>(depth: u32, width: u32, height: u32, f: F) -> Self
    where
        F: Fn(u32, u32, u32) -> f32,
    {
        let slices = (1..=depth)
            .map(|s| SliceImage::from_fn(width, height, |x, y| Luma([f(s, x, y)])))
            .collect();
        Self { slices }
    }

    /// Drop every slice after `depth`.
    pub fn truncate(&mut self, depth: u32) {
        self.slices.truncate(depth as usize);
    }
}

impl ImageStack for VolumeStack {
    fn depth(&self) -> u32 {
        u32::try_from(self.slices.len()).unwrap_or(u32::MAX)
    }

    fn dimensions(&self) -> Option<Dimensions> {
        self.slices.first().map(|s| Dimensions {
            width: s.width(),
            height: s.height(),
        })
    }

    fn slice(&self, slice: u32) -> Result<&SliceImage, TrackerError> {
        if self.slices.is_empty() {
            return Err(TrackerError::NoImage);
        }
        let depth = self.depth();
        slice
            .checked_sub(1)
            .and_then(|i| self.slices.get(i as usize))
            .ok_or(TrackerError::SliceOutOfRange { slice, depth })
    }
}
