//! Decoded pixel buffers.

use std::sync::Arc;

use bytes::Bytes;

/// Channels per pixel of every decoded buffer (RGBA8).
pub const RGBA_CHANNELS: u8 = 4;

/// Mime hint used when the source format is unknown.
pub const UNKNOWN_FORMAT_HINT: &str = "application/octet-stream";

/// A decoded image: tightly packed RGBA8 rows plus metadata.
///
/// The pixel data is held in [`Bytes`], so clones handed out by the cache
/// share one allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    channels: u8,
    data: Bytes,
    format_hint: Arc<str>,
}

impl PixelBuffer {
    /// Wrap decoded pixel data.
    ///
    /// Returns `None` if `data` is not exactly `width * height * channels`
    /// bytes long.
    pub fn new(
        width: u32,
        height: u32,
        channels: u8,
        data: impl Into<Bytes>,
        format_hint: impl Into<Arc<str>>,
    ) -> Option<Self> {
        let data = data.into();
        let expected = width as u64 * height as u64 * channels as u64;
        if data.len() as u64 != expected {
            return None;
        }
        Some(Self {
            width,
            height,
            channels,
            data,
            format_hint: format_hint.into(),
        })
    }

    /// Build a buffer from an RGBA image.
    pub fn from_rgba(image: image::RgbaImage, format_hint: impl Into<Arc<str>>) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            channels: RGBA_CHANNELS,
            data: Bytes::from(image.into_raw()),
            format_hint: format_hint.into(),
        }
    }

    /// Convert back to an `image` buffer for encoding.
    pub fn to_rgba_image(&self) -> Option<image::RgbaImage> {
        if self.channels != RGBA_CHANNELS {
            return None;
        }
        image::RgbaImage::from_raw(self.width, self.height, self.data.to_vec())
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    /// Raw pixel bytes.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Mime type of the encoded source (e.g. `image/jpeg`).
    pub fn format_hint(&self) -> &str {
        &self.format_hint
    }

    /// Size used for memory budget accounting.
    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }
}
