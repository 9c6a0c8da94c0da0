//! Volume integration over a populated registry.
//!
//! Every tracked region is split back into its rings (outer boundaries and
//! holes alike) and each ring is classified again against the slice it
//! lives on. A stored region may be the union of candidates with different
//! signs, so the sign recorded at propagation time is not trusted here.

use std::fmt::Write as _;

use geo::MultiPolygon;
use serde::{Deserialize, Serialize};

use crate::classify::classify;
use crate::geometry;
use crate::region::Sign;
use crate::stack::ImageStack;
use crate::store::RegionStore;
use crate::types::{TrackerConfig, TrackerError};

/// Signed area accounting for one slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceVolume {
    /// Slice index.
    pub slice: u32,
    /// Pixel area of components classified positive.
    pub positive_area: u64,
    /// Pixel area of components classified negative.
    pub negative_area: u64,
    /// Number of components examined.
    pub components: usize,
    /// `positive_area - negative_area`.
    pub signed_area: i64,
    /// `signed_area * scale`.
    pub contribution: f64,
}

/// The integrated volume and its per-slice breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeReport {
    /// Sum of every slice's contribution. May be negative.
    pub total: f64,
    /// Distance per slice used for the contributions.
    pub scale: f64,
    /// Slices with at least one tracked region, ascending.
    pub slices: Vec<SliceVolume>,
}

impl VolumeReport {
    /// Format the breakdown as a table followed by the total.
    #[must_use]
    pub fn report(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:>6} {:>10} {:>10} {:>10} {:>12}",
            "Slice", "+Area", "-Area", "Signed", "Volume",
        );
        let _ = writeln!(out, "{}", "-".repeat(52));
        for slice in &self.slices {
            let _ = writeln!(
                out,
                "{:>6} {:>10} {:>10} {:>10} {:>12.3}",
                slice.slice,
                slice.positive_area,
                slice.negative_area,
                slice.signed_area,
                slice.contribution,
            );
        }
        let _ = write!(out, "Total volume: {:.3} (scale {})", self.total, self.scale);
        out
    }
}

/// Integrate the signed volume of everything in `registry`.
///
/// # Errors
///
/// Returns [`TrackerError::InvalidConfig`] if `config` does not validate,
/// and [`TrackerError::StaleSlice`] if a slice with tracked regions can no
/// longer be read from `stack`. No partial volume is returned.
pub fn integrate<S, R>(
    stack: &S,
    registry: &R,
    config: &TrackerConfig,
) -> Result<VolumeReport, TrackerError>
where
    S: ImageStack + ?Sized,
    R: RegionStore + ?Sized,
{
    config.validate()?;
    let inside = config.inside_band();

    let mut slices = Vec::new();
    let mut total = 0.0;

    for slice in 1..=registry.depth() {
        let regions = registry.list_regions(slice)?;
        if regions.is_empty() {
            continue;
        }
        let image = stack
            .slice(slice)
            .map_err(|_| TrackerError::StaleSlice { slice })?;

        let mut positive_area = 0;
        let mut negative_area = 0;
        let mut components = 0;
        let mut signed_area = 0;
        for region in regions {
            for component in geometry::components(region.shape()) {
                let component = MultiPolygon::new(vec![component]);
                let area = geometry::area(&component);
                components += 1;
                let sign = classify(&component, image, inside);
                signed_area += to_signed(area) * sign.factor();
                match sign {
                    Sign::Positive => positive_area += area,
                    Sign::Negative => negative_area += area,
                }
            }
        }

        let contribution = scaled(signed_area, config.scale);
        tracing::debug!(
            slice,
            positive_area,
            negative_area,
            components,
            contribution,
            "integrated slice"
        );
        total += contribution;
        slices.push(SliceVolume {
            slice,
            positive_area,
            negative_area,
            components,
            signed_area,
            contribution,
        });
    }

    tracing::info!(total, slices = slices.len(), "volume integrated");
    Ok(VolumeReport {
        total,
        scale: config.scale,
        slices,
    })
}

fn to_signed(area: u64) -> i64 {
    i64::try_from(area).unwrap_or(i64::MAX)
}

#[allow(clippy::cast_precision_loss)]
fn scaled(signed_area: i64, scale: f64) -> f64 {
    signed_area as f64 * scale
}
