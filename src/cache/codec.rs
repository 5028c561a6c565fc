//! Blob encoding for the disk tier.
//!
//! Decoded buffers are written to disk as ordinary image files so they stay
//! small and readable by other tools.
//!
//! # Design Decisions
//!
//! - **Format follows the source**: buffers decoded from JPEG are stored as
//!   JPEG at the requested quality, every other image type as PNG. PNG is
//!   lossless, so those buffers come back byte-for-byte.
//!
//! - **RGBA in, RGBA out**: JPEG has no alpha channel, so alpha is dropped
//!   when storing as JPEG and restored as opaque on load.

use std::io::Cursor;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, ImageEncoder, ImageReader};

use crate::decode::{PixelBuffer, UNKNOWN_FORMAT_HINT};
use crate::error::CacheError;

/// Default JPEG quality for stored blobs (the original stores at 100).
pub const DEFAULT_JPEG_QUALITY: u8 = 100;

/// Minimum allowed JPEG quality.
pub const MIN_JPEG_QUALITY: u8 = 1;

/// Maximum allowed JPEG quality.
pub const MAX_JPEG_QUALITY: u8 = 100;

/// On-disk blob format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskFormat {
    Jpeg,
    Png,
}

impl DiskFormat {
    /// Pick the blob format for a source mime type.
    ///
    /// `image/*jpeg*` maps to JPEG, any other `image/*` type to PNG. Returns
    /// `None` for non-image types.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let (kind, subtype) = mime.split_once('/')?;
        if kind != "image" {
            return None;
        }
        if subtype.contains("jpeg") {
            Some(DiskFormat::Jpeg)
        } else {
            Some(DiskFormat::Png)
        }
    }
}

/// Encode a buffer as a blob.
///
/// # Errors
///
/// Returns [`CacheError::Codec`] if the buffer is not RGBA8 or the encoder
/// fails.
pub fn encode_blob(
    buffer: &PixelBuffer,
    format: DiskFormat,
    quality: u8,
) -> Result<Bytes, CacheError> {
    let rgba = buffer
        .to_rgba_image()
        .ok_or_else(|| CacheError::Codec("buffer is not RGBA8".to_string()))?;
    let (width, height) = rgba.dimensions();

    let mut output = Vec::new();
    match format {
        DiskFormat::Png => {
            PngEncoder::new(&mut output)
                .write_image(rgba.as_raw(), width, height, image::ExtendedColorType::Rgba8)
                .map_err(|e| CacheError::Codec(e.to_string()))?;
        }
        DiskFormat::Jpeg => {
            let rgb = DynamicImage::ImageRgba8(rgba).to_rgb8();
            JpegEncoder::new_with_quality(&mut output, clamp_quality(quality))
                .write_image(rgb.as_raw(), width, height, image::ExtendedColorType::Rgb8)
                .map_err(|e| CacheError::Codec(e.to_string()))?;
        }
    }

    Ok(Bytes::from(output))
}

/// Decode a blob back into a buffer.
///
/// The buffer's format hint is the mime type of the blob.
pub fn decode_blob(blob: &[u8]) -> Result<PixelBuffer, CacheError> {
    let reader = ImageReader::new(Cursor::new(blob))
        .with_guessed_format()
        .map_err(|e| CacheError::Codec(e.to_string()))?;
    let hint = reader
        .format()
        .map(|f| f.to_mime_type())
        .unwrap_or(UNKNOWN_FORMAT_HINT);

    let image = reader
        .decode()
        .map_err(|e| CacheError::Codec(e.to_string()))?;

    Ok(PixelBuffer::from_rgba(image.into_rgba8(), hint))
}

/// Validate JPEG quality parameter.
///
/// Returns `true` if quality is in the valid range (1-100).
#[inline]
pub fn is_valid_quality(quality: u8) -> bool {
    (MIN_JPEG_QUALITY..=MAX_JPEG_QUALITY).contains(&quality)
}

/// Clamp quality to valid range.
#[inline]
pub fn clamp_quality(quality: u8) -> u8 {
    quality.clamp(MIN_JPEG_QUALITY, MAX_JPEG_QUALITY)
}
