//! Shared types for the slicetrack region tracker.

use serde::{Deserialize, Serialize};

use crate::propagate::PropagationOrder;
use crate::segment::SegmenterKind;

/// Slice dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Returns `true` if `(x, y)` addresses a pixel inside these bounds.
    #[must_use]
    pub fn contains(self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && x < i64::from(self.width) && y < i64::from(self.height)
    }
}

/// An intensity band `[low, high]`.
///
/// Segmentation selects pixels inclusively ([`contains`](Self::contains));
/// sign classification uses the open interval
/// ([`contains_strictly`](Self::contains_strictly)).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Band {
    /// Lower bound.
    pub low: f32,
    /// Upper bound.
    pub high: f32,
}

impl Band {
    /// Create a new band. No validation is performed; see
    /// [`TrackerConfig::validate`].
    #[must_use]
    pub const fn new(low: f32, high: f32) -> Self {
        Self { low, high }
    }

    /// `low <= value <= high`.
    #[must_use]
    pub fn contains(self, value: f32) -> bool {
        self.low <= value && value <= self.high
    }

    /// `low < value < high`.
    #[must_use]
    pub fn contains_strictly(self, value: f32) -> bool {
        self.low < value && value < self.high
    }

    fn validate(self, name: &str) -> Result<(), TrackerError> {
        if !self.low.is_finite() || !self.high.is_finite() {
            return Err(TrackerError::InvalidConfig(format!(
                "{name} thresholds must be finite (got {}..{})",
                self.low, self.high,
            )));
        }
        if self.low > self.high {
            return Err(TrackerError::InvalidConfig(format!(
                "{name} lower threshold {} exceeds higher threshold {}",
                self.low, self.high,
            )));
        }
        Ok(())
    }
}

/// Configuration for tracking and volume integration.
///
/// Construct with struct-update syntax over [`Default`] and call
/// [`validate`](Self::validate) (the propagator and integrator both do)
/// before use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Threshold band used to segment every slice into candidate regions.
    pub segmentation: Band,

    /// Band for the secondary "inside" test that decides whether a region
    /// counts positively or negatively. `None` reuses
    /// [`segmentation`](Self::segmentation).
    pub inside: Option<Band>,

    /// Candidates whose pixel area is at most this value are discarded.
    pub min_area: u64,

    /// Physical distance per slice. Each slice's signed area is multiplied
    /// by this before being added to the volume. Must be positive.
    pub scale: f64,

    /// Which sweeps the propagator runs.
    pub order: PropagationOrder,

    /// Which segmentation strategy produces candidate regions.
    pub segmenter: SegmenterKind,
}

impl TrackerConfig {
    /// Default lower segmentation threshold (16-bit stacks).
    pub const DEFAULT_LOW: f32 = 10_000.0;
    /// Default higher segmentation threshold.
    pub const DEFAULT_HIGH: f32 = 100_000.0;
    /// Default minimum candidate area.
    pub const DEFAULT_MIN_AREA: u64 = 0;
    /// Default distance per slice.
    pub const DEFAULT_SCALE: f64 = 1.0;

    /// The band used for sign classification.
    #[must_use]
    pub fn inside_band(&self) -> Band {
        self.inside.unwrap_or(self.segmentation)
    }

    /// Check every field, rejecting the configuration before any slice is
    /// touched.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::InvalidConfig`] if a band is inverted or
    /// non-finite, or if `scale` is not a positive finite number.
    pub fn validate(&self) -> Result<(), TrackerError> {
        self.segmentation.validate("segmentation")?;
        if let Some(inside) = self.inside {
            inside.validate("inside")?;
        }
        if !self.scale.is_finite() || self.scale <= 0.0 {
            return Err(TrackerError::InvalidConfig(format!(
                "scale must be a positive number (got {})",
                self.scale,
            )));
        }
        Ok(())
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            segmentation: Band::new(Self::DEFAULT_LOW, Self::DEFAULT_HIGH),
            inside: None,
            min_area: Self::DEFAULT_MIN_AREA,
            scale: Self::DEFAULT_SCALE,
            order: PropagationOrder::default(),
            segmenter: SegmenterKind::default(),
        }
    }
}

/// Errors raised while tracking or integrating.
///
/// Every variant carries plain data so results can be serialized across a
/// process boundary and compared in tests.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum TrackerError {
    /// The configuration or seed was rejected before any work started.
    #[error("invalid tracker configuration: {0}")]
    InvalidConfig(String),

    /// The stack has no slices.
    #[error("no image is loaded")]
    NoImage,

    /// A slice index outside `1..=depth` was requested.
    #[error("slice {slice} is outside the stack (1..={depth})")]
    SliceOutOfRange {
        /// Requested slice.
        slice: u32,
        /// Stack depth.
        depth: u32,
    },

    /// A pixel coordinate outside the slice was requested.
    #[error("pixel ({x}, {y}) is outside the {width}x{height} slice")]
    CoordinateOutOfRange {
        /// Requested column.
        x: i64,
        /// Requested row.
        y: i64,
        /// Slice width.
        width: u32,
        /// Slice height.
        height: u32,
    },

    /// A slice holds tracked regions but its pixels can no longer be read.
    #[error("slice {slice} has tracked regions but no pixel data")]
    StaleSlice {
        /// The slice that could not be read.
        slice: u32,
    },

    /// Slices of one stack must share dimensions.
    #[error("slice {slice} is {found_width}x{found_height}, expected {width}x{height}")]
    DimensionMismatch {
        /// Offending slice.
        slice: u32,
        /// Expected width.
        width: u32,
        /// Expected height.
        height: u32,
        /// Actual width.
        found_width: u32,
        /// Actual height.
        found_height: u32,
    },
}
