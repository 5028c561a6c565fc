//! Image decoding.
//!
//! This module turns encoded images into [`PixelBuffer`]s at a sample
//! factor chosen to fit a requested box, retrying at coarser factors when
//! the decoded pixels do not fit in memory.
//!
//! # Components
//!
//! - [`calculate_sample_factor`]: power-of-two factor for a source and a box
//! - [`DecodeEngine`]: decode with the out-of-memory retry policy
//! - [`ImageSource`]: dimensions + decode seam, implemented by [`EncodedImage`]
//!   and [`FileSource`]
//! - [`PixelBuffer`]: decoded RGBA8 pixels plus metadata

mod buffer;
mod engine;
mod sample;
mod source;

pub use buffer::{PixelBuffer, RGBA_CHANNELS, UNKNOWN_FORMAT_HINT};
pub use engine::{DecodeEngine, DEFAULT_MAX_SAMPLE_FACTOR};
pub use sample::{
    calculate_sample_factor, normalize_factor, sampled_dimensions, DownsampleOptions,
    NO_DOWNSAMPLING,
};
pub use source::{DecodeLimits, EncodedImage, FileSource, ImageSource, SourceInfo};
