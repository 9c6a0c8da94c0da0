//! slicetrack-io: filesystem I/O for slicetrack.
//!
//! Decodes image files into a [`VolumeStack`](slicetrack_core::VolumeStack)
//! of raw pixel values and parses seed regions from JSON or the
//! `x,y,w,h` shorthand. Everything else lives in `slicetrack-core`.

pub mod load;
pub mod seed;

pub use load::{LoadError, load_stack, load_stack_from_dir};
pub use seed::{SeedError, SeedShape, parse_rect, parse_seed};
