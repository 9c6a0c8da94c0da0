//! Region store: the per-slice record of tracked regions.
//!
//! The store is append-only per slice. Accessors are bounds-checked and
//! fail loudly for slices outside `1..=depth` instead of returning an
//! empty list.

use std::collections::BTreeMap;
use std::hash::Hasher;

use serde::{Deserialize, Serialize};
use siphasher::sip::SipHasher13;

use crate::region::{Region, Sign};
use crate::types::TrackerError;

/// Where tracked regions are registered and read back.
pub trait RegionStore {
    /// Number of slices the store accepts (`1..=depth`).
    fn depth(&self) -> u32;

    /// Append `region` to the tracked set of `region.slice()`.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::SliceOutOfRange`] if the region's slice is
    /// outside the store.
    fn register(&mut self, region: Region) -> Result<(), TrackerError>;

    /// Regions tracked on `slice`, in registration order.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::SliceOutOfRange`] if `slice` is outside the
    /// store.
    fn list_regions(&self, slice: u32) -> Result<&[Region], TrackerError>;
}

/// In-memory [`RegionStore`] keyed by slice.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackedRegistry {
    depth: u32,
    slices: BTreeMap<u32, Vec<Region>>,
}

impl TrackedRegistry {
    /// An empty registry for a stack of `depth` slices.
    #[must_use]
    pub const fn new(depth: u32) -> Self {
        Self {
            depth,
            slices: BTreeMap::new(),
        }
    }

    fn check(&self, slice: u32) -> Result<(), TrackerError> {
        if (1..=self.depth).contains(&slice) {
            Ok(())
        } else {
            Err(TrackerError::SliceOutOfRange {
                slice,
                depth: self.depth,
            })
        }
    }

    /// Slices with at least one region, ascending.
    pub fn tracked_slices(&self) -> impl Iterator<Item = u32> + '_ {
        self.slices
            .iter()
            .filter(|(_, regions)| !regions.is_empty())
            .map(|(&slice, _)| slice)
    }

    /// Every registered region, by slice then registration order.
    pub fn regions(&self) -> impl Iterator<Item = &Region> {
        self.slices.values().flatten()
    }

    /// Total number of registered regions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slices.values().map(Vec::len).sum()
    }

    /// `true` if nothing has been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stable 64-bit digest of every region's slice, sign, area and vertex
    /// coordinates. Two runs over the same input produce the same value.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = SipHasher13::new();
        hasher.write_u32(self.depth);
        for region in self.regions() {
            hasher.write_u32(region.slice());
            hasher.write_u8(match region.sign() {
                None => 0,
                Some(Sign::Positive) => 1,
                Some(Sign::Negative) => 2,
            });
            hasher.write_u64(region.area());
            for polygon in region.shape() {
                hasher.write_usize(polygon.interiors().len());
                for ring in std::iter::once(polygon.exterior()).chain(polygon.interiors()) {
                    hasher.write_usize(ring.0.len());
                    for c in ring.coords() {
                        hasher.write_u64(c.x.to_bits());
                        hasher.write_u64(c.y.to_bits());
                    }
                }
            }
        }
        hasher.finish()
    }
}

impl RegionStore for TrackedRegistry {
    fn depth(&self) -> u32 {
        self.depth
    }

    fn register(&mut self, region: Region) -> Result<(), TrackerError> {
        self.check(region.slice())?;
        self.slices.entry(region.slice()).or_default().push(region);
        Ok(())
    }

    fn list_regions(&self, slice: u32) -> Result<&[Region], TrackerError> {
        self.check(slice)?;
        Ok(self.slices.get(&slice).map_or(&[], Vec::as_slice))
    }
}
