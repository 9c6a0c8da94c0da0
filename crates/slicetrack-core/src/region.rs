//! Slice-tagged regions.

use geo::{Coord, LineString, MultiPolygon, Polygon};
use serde::{Deserialize, Serialize};

use crate::geometry;

/// Whether a region adds to or subtracts from the volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Sign {
    /// Contains at least one pixel inside the "inside" band.
    Positive,
    /// Contains no pixel inside the "inside" band.
    Negative,
}

impl Sign {
    /// `+1` or `-1`.
    #[must_use]
    pub const fn factor(self) -> i64 {
        match self {
            Self::Positive => 1,
            Self::Negative => -1,
        }
    }
}

/// An immutable polygon set attributed to one slice.
///
/// The pixel area is computed once at construction. The sign is fixed at
/// construction too; the user's seed carries `None` because it never went
/// through classification.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    slice: u32,
    shape: MultiPolygon<f64>,
    area: u64,
    sign: Option<Sign>,
}

impl Region {
    /// Create a region, caching its pixel area.
    #[must_use]
    pub fn new(slice: u32, shape: MultiPolygon<f64>, sign: Option<Sign>) -> Self {
        let area = geometry::area(&shape);
        Self {
            slice,
            shape,
            area,
            sign,
        }
    }

    /// 1-based slice index.
    #[must_use]
    pub const fn slice(&self) -> u32 {
        self.slice
    }

    /// The polygon set.
    #[must_use]
    pub const fn shape(&self) -> &MultiPolygon<f64> {
        &self.shape
    }

    /// Cached pixel count.
    #[must_use]
    pub const fn area(&self) -> u64 {
        self.area
    }

    /// Sign assigned at creation, `None` for the seed.
    #[must_use]
    pub const fn sign(&self) -> Option<Sign> {
        self.sign
    }

    /// `true` if the two regions share positive area.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        geometry::overlaps(&self.shape, &other.shape)
    }

    /// Consume the region and return its polygon set.
    #[must_use]
    pub fn into_shape(self) -> MultiPolygon<f64> {
        self.shape
    }
}

/// Serde proxy for [`Region`].
///
/// `geo` types are not serialized directly; each polygon is stored as a
/// list of rings (exterior first), each ring as `[x, y]` pairs. The area is
/// written for readers but recomputed on deserialization.
#[derive(Serialize, Deserialize)]
struct RegionProxy {
    slice: u32,
    sign: Option<Sign>,
    area: u64,
    polygons: Vec<Vec<Vec<[f64; 2]>>>,
}

fn ring_to_pairs(ring: &LineString<f64>) -> Vec<[f64; 2]> {
    ring.coords().map(|c| [c.x, c.y]).collect()
}

fn pairs_to_ring(pairs: Vec<[f64; 2]>) -> LineString<f64> {
    pairs.into_iter().map(|[x, y]| Coord { x, y }).collect()
}

impl Serialize for Region {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let polygons = self
            .shape
            .iter()
            .map(|p| {
                std::iter::once(p.exterior())
                    .chain(p.interiors())
                    .map(ring_to_pairs)
                    .collect()
            })
            .collect();
        RegionProxy {
            slice: self.slice,
            sign: self.sign,
            area: self.area,
            polygons,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Region {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let proxy = RegionProxy::deserialize(deserializer)?;
        let mut polygons = Vec::with_capacity(proxy.polygons.len());
        for rings in proxy.polygons {
            let mut rings = rings.into_iter().map(pairs_to_ring);
            let exterior = rings
                .next()
                .ok_or_else(|| serde::de::Error::custom("polygon without an exterior ring"))?;
            polygons.push(Polygon::new(exterior, rings.collect()));
        }
        Ok(Self::new(proxy.slice, MultiPolygon::new(polygons), proxy.sign))
    }
}
