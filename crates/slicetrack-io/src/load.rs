//! Image stack loading.
//!
//! Each file becomes one slice, in the order given. Pixel values keep
//! their native range: an 8-bit file yields 0..=255, a 16-bit file
//! 0..=65535, so thresholds mean the same thing they mean in the source
//! data.

use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageBuffer, Luma, Primitive};
use slicetrack_core::{SliceImage, TrackerError, VolumeStack};

/// File extensions picked up by [`load_stack_from_dir`].
pub const SUPPORTED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tif", "tiff"];

/// Errors that can occur while loading a stack.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// No image files were given or found.
    #[error("no image files to load")]
    Empty,

    /// A directory could not be listed.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        /// Directory being listed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A file could not be opened or decoded.
    #[error("failed to decode {}: {source}", path.display())]
    Decode {
        /// File being decoded.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: image::ImageError,
    },

    /// A file's size differs from the first file's.
    #[error(
        "{} is {found_width}x{found_height}, expected {width}x{height}",
        path.display()
    )]
    DimensionMismatch {
        /// Offending file.
        path: PathBuf,
        /// Width of the first slice.
        width: u32,
        /// Height of the first slice.
        height: u32,
        /// Width of the offending file.
        found_width: u32,
        /// Height of the offending file.
        found_height: u32,
    },

    /// The decoded slices were rejected by the stack.
    #[error(transparent)]
    Stack(#[from] TrackerError),
}

/// Decode `paths` into a stack, one slice per file.
///
/// # Errors
///
/// [`LoadError::Empty`] for no paths, [`LoadError::Decode`] for an
/// unreadable file, [`LoadError::DimensionMismatch`] if the files differ
/// in size.
pub fn load_stack<P: AsRef<Path>>(paths: &[P]) -> Result<VolumeStack, LoadError> {
    if paths.is_empty() {
        return Err(LoadError::Empty);
    }

    let mut slices: Vec<SliceImage> = Vec::with_capacity(paths.len());
    for path in paths {
        let path = path.as_ref();
        let decoded = image::open(path).map_err(|source| LoadError::Decode {
            path: path.to_path_buf(),
            source,
        })?;
        let slice = to_slice(&decoded);
        if let Some(first) = slices.first()
            && first.dimensions() != slice.dimensions()
        {
            return Err(LoadError::DimensionMismatch {
                path: path.to_path_buf(),
                width: first.width(),
                height: first.height(),
                found_width: slice.width(),
                found_height: slice.height(),
            });
        }
        tracing::debug!(
            path = %path.display(),
            width = slice.width(),
            height = slice.height(),
            color = ?decoded.color(),
            "loaded slice"
        );
        slices.push(slice);
    }

    tracing::info!(depth = slices.len(), "stack loaded");
    Ok(VolumeStack::new(slices)?)
}

/// Load every supported image in `dir`, sorted by file name.
///
/// # Errors
///
/// [`LoadError::Io`] if `dir` cannot be listed, [`LoadError::Empty`] if it
/// holds no supported images, and everything [`load_stack`] returns.
pub fn load_stack_from_dir(dir: &Path) -> Result<VolumeStack, LoadError> {
    let io_error = |source| LoadError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_error)? {
        let path = entry.map_err(io_error)?.path();
        if path.is_file() && is_supported(&path) {
            paths.push(path);
        }
    }
    paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    load_stack(&paths)
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            SUPPORTED_EXTENSIONS
                .iter()
                .any(|supported| ext.eq_ignore_ascii_case(supported))
        })
}

/// Convert to single-channel `f32`, keeping the source bit depth's range.
fn to_slice(image: &DynamicImage) -> SliceImage {
    match image {
        DynamicImage::ImageLuma16(_)
        | DynamicImage::ImageLumaA16(_)
        | DynamicImage::ImageRgb16(_)
        | DynamicImage::ImageRgba16(_) => widen(&image.to_luma16()),
        DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_) => image.to_luma32f(),
        _ => widen(&image.to_luma8()),
    }
}

fn widen<P: Primitive + Into<f32>>(image: &ImageBuffer<Luma<P>, Vec<P>>) -> SliceImage {
    SliceImage::from_fn(image.width(), image.height(), |x, y| {
        Luma([image.get_pixel(x, y).0[0].into()])
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn extensions_are_case_insensitive() {
        assert!(is_supported(Path::new("a/slice01.TIF")));
        assert!(is_supported(Path::new("slice.png")));
        assert!(!is_supported(Path::new("notes.txt")));
        assert!(!is_supported(Path::new("no_extension")));
    }

    #[test]
    fn eight_bit_values_are_kept() {
        let gray = image::GrayImage::from_fn(2, 1, |x, _| Luma([if x == 0 { 7 } else { 255 }]));
        let slice = to_slice(&DynamicImage::ImageLuma8(gray));
        assert!((slice.get_pixel(0, 0).0[0] - 7.0).abs() < f32::EPSILON);
        assert!((slice.get_pixel(1, 0).0[0] - 255.0).abs() < f32::EPSILON);
    }

    #[test]
    fn sixteen_bit_values_are_kept() {
        let deep: ImageBuffer<Luma<u16>, Vec<u16>> = ImageBuffer::from_pixel(1, 1, Luma([40_000]));
        let slice = to_slice(&DynamicImage::ImageLuma16(deep));
        assert!((slice.get_pixel(0, 0).0[0] - 40_000.0).abs() < f32::EPSILON);
    }

    #[test]
    fn empty_path_list_is_rejected() {
        let paths: [&Path; 0] = [];
        assert!(matches!(load_stack(&paths), Err(LoadError::Empty)));
    }
}
