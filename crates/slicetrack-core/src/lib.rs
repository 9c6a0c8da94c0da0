//! slicetrack-core: region tracking and signed volume integration (sans-IO).
//!
//! Follows a seed region through an image stack:
//! segment -> keep overlapping components -> classify sign -> union ->
//! register, slice by slice away from the seed, then integrates the
//! signed per-slice areas into a volume.
//!
//! This crate has **no I/O dependencies** -- it operates on in-memory
//! slices and returns structured data. File loading lives in
//! `slicetrack-io`.

pub mod cancel;
pub mod classify;
pub mod diagnostics;
pub mod geometry;
pub mod integrate;
pub mod propagate;
pub mod region;
pub mod segment;
pub mod stack;
pub mod store;
pub mod types;

pub use cancel::CancellationToken;
pub use diagnostics::{Clock, NoClock, PropagationDiagnostics};
pub use integrate::{SliceVolume, VolumeReport, integrate};
pub use propagate::{
    Direction, HaltReason, PropagationOrder, PropagationResult, Propagator, Seed, propagate,
};
pub use region::{Region, Sign};
pub use segment::{Segmenter, SegmenterKind};
pub use stack::{ImageStack, SliceImage, VolumeStack};
pub use store::{RegionStore, TrackedRegistry};
pub use types::{Band, Dimensions, TrackerConfig, TrackerError};

/// Propagate `seed` through `stack` and integrate the resulting registry.
///
/// A propagation that stopped early (a failed sweep) is still integrated;
/// check [`PropagationResult::incomplete`] before trusting the volume.
///
/// # Errors
///
/// Any error from [`propagate`] or [`integrate`].
pub fn track_volume<S: ImageStack + ?Sized>(
    stack: &S,
    seed: Seed,
    config: &TrackerConfig,
) -> Result<(PropagationResult, VolumeReport), TrackerError> {
    let result = propagate(stack, seed, config)?;
    let volume = integrate(stack, &result.registry, config)?;
    Ok((result, volume))
}
