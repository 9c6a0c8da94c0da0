//! Seed region parsing.
//!
//! Two JSON forms are accepted, in pixel-corner coordinates:
//!
//! ```json
//! {"rect": [x, y, width, height]}
//! {"polygon": [[x0, y0], [x1, y1], [x2, y2]]}
//! ```

use serde::{Deserialize, Serialize};
use slicetrack_core::{Seed, geometry};

/// Errors that can occur while parsing a seed.
#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    /// The JSON did not match either seed form.
    #[error("invalid seed JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The `x,y,w,h` shorthand could not be parsed.
    #[error("invalid rectangle {0:?}: expected x,y,width,height")]
    Rect(String),

    /// The shape encloses no area.
    #[error("seed shape is degenerate: {0}")]
    Degenerate(&'static str),
}

/// A seed outline, before it is placed on a slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedShape {
    /// `[x, y, width, height]`.
    Rect([f64; 4]),
    /// Vertices; the closing edge is implied.
    Polygon(Vec<[f64; 2]>),
}

impl SeedShape {
    fn check(&self) -> Result<(), SeedError> {
        match self {
            Self::Rect([x, y, w, h]) => {
                if ![x, y, w, h].iter().all(|v| v.is_finite()) {
                    return Err(SeedError::Degenerate("rectangle has non-finite values"));
                }
                if *w <= 0.0 || *h <= 0.0 {
                    return Err(SeedError::Degenerate(
                        "rectangle width and height must be positive",
                    ));
                }
            }
            Self::Polygon(vertices) => {
                if vertices.len() < 3 {
                    return Err(SeedError::Degenerate("polygon needs at least 3 vertices"));
                }
                if !vertices.iter().flatten().all(|v| v.is_finite()) {
                    return Err(SeedError::Degenerate("polygon has non-finite vertices"));
                }
            }
        }
        Ok(())
    }

    /// Place the outline on `slice`.
    #[must_use]
    pub fn into_seed(self, slice: u32) -> Seed {
        match self {
            Self::Rect([x, y, w, h]) => Seed::rect(slice, x, y, w, h),
            Self::Polygon(vertices) => {
                let vertices: Vec<(f64, f64)> = vertices.into_iter().map(|[x, y]| (x, y)).collect();
                Seed::new(slice, geometry::polygon(&vertices))
            }
        }
    }
}

/// Parse a seed from JSON.
///
/// # Errors
///
/// [`SeedError::Json`] if `json` is neither form, [`SeedError::Degenerate`]
/// for an empty rectangle or a polygon with fewer than 3 vertices.
pub fn parse_seed(json: &str) -> Result<SeedShape, SeedError> {
    let shape: SeedShape = serde_json::from_str(json)?;
    shape.check()?;
    Ok(shape)
}

/// Parse the `x,y,w,h` shorthand.
///
/// # Errors
///
/// [`SeedError::Rect`] if `text` is not four comma-separated numbers,
/// [`SeedError::Degenerate`] if the rectangle is empty.
pub fn parse_rect(text: &str) -> Result<SeedShape, SeedError> {
    let values = text
        .split(',')
        .map(|part| part.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| SeedError::Rect(text.to_owned()))?;
    let [x, y, w, h] = values[..] else {
        return Err(SeedError::Rect(text.to_owned()));
    };
    let shape = SeedShape::Rect([x, y, w, h]);
    shape.check()?;
    Ok(shape)
}
