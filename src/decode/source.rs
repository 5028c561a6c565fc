//! Encoded image sources.
//!
//! An [`ImageSource`] hands the decode engine two things: the dimensions of
//! the encoded image (read from its header, without allocating pixels) and
//! a decode at a given sample factor. The engine never touches encoded
//! bytes directly, which keeps it testable with scripted sources.
//!
//! # Decoder Memory
//!
//! JPEG is decoded directly at 1/2, 1/4 or 1/8 scale, so a larger sample
//! factor shrinks what the decoder allocates. Other formats are decoded at
//! full resolution and downsampled afterwards; their decoder allocation is
//! fixed, and going over the limit is reported as
//! [`SourceError::ExceedsLimit`] rather than a retryable out-of-memory.

use std::io::{BufRead, BufReader, Cursor, Read, Seek};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use image::imageops::FilterType;
use image::{
    DynamicImage, GrayImage, ImageBuffer, ImageDecoder, ImageFormat, ImageReader, Limits, RgbImage,
};
use jpeg_decoder::PixelFormat;

use super::buffer::{PixelBuffer, RGBA_CHANNELS, UNKNOWN_FORMAT_HINT};
use super::sample::sampled_dimensions;
use crate::error::SourceError;

/// Header information of an encoded image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    pub width: u32,
    pub height: u32,

    /// Mime type of the encoded format (e.g. `image/png`)
    pub format_hint: Arc<str>,
}

/// An encoded image that can report its dimensions and be decoded at a sample factor.
///
/// Implementations must be thread-safe: decodes run on background workers.
pub trait ImageSource: Send + Sync {
    /// Identifier used in logs (a path, resource name, ...).
    fn identifier(&self) -> &str;

    /// Read the image dimensions without decoding pixels.
    fn info(&self) -> Result<SourceInfo, SourceError>;

    /// Decode the image with both dimensions divided by `sample_factor`.
    ///
    /// Returns [`SourceError::OutOfMemory`] when the decoded pixels cannot be
    /// allocated; the caller may retry at a larger factor.
    fn decode(&self, sample_factor: u32) -> Result<PixelBuffer, SourceError>;
}

impl<T: ImageSource + ?Sized> ImageSource for Arc<T> {
    fn identifier(&self) -> &str {
        (**self).identifier()
    }

    fn info(&self) -> Result<SourceInfo, SourceError> {
        (**self).info()
    }

    fn decode(&self, sample_factor: u32) -> Result<PixelBuffer, SourceError> {
        (**self).decode(sample_factor)
    }
}

// =============================================================================
// Allocation Limits
// =============================================================================

/// Memory ceilings applied while decoding.
#[derive(Debug, Clone, Default)]
pub struct DecodeLimits {
    /// Largest decoded output buffer, in bytes. Checked against the sampled
    /// size, so a larger sample factor can bring a decode under it.
    pub max_output_bytes: Option<u64>,

    /// Largest buffer the underlying decoder may allocate, in bytes.
    /// `None` keeps the `image` crate's default. Only JPEG decodes shrink
    /// with the sample factor.
    pub max_decoder_alloc: Option<u64>,
}

impl DecodeLimits {
    fn decoder_limits(&self) -> Limits {
        let mut limits = Limits::default();
        if let Some(max_alloc) = self.max_decoder_alloc {
            limits.max_alloc = Some(max_alloc);
        }
        limits
    }
}

// =============================================================================
// In-Memory Source
// =============================================================================

/// Encoded image bytes held in memory.
///
/// # Example
///
/// ```ignore
/// use pixel_loader::decode::{EncodedImage, ImageSource};
///
/// let source = EncodedImage::new("res/photo.png", std::fs::read("photo.png")?);
/// let info = source.info()?;
/// let half = source.decode(2)?;
/// assert_eq!(half.width(), info.width / 2);
/// ```
#[derive(Debug, Clone)]
pub struct EncodedImage {
    identifier: String,
    data: Bytes,
    limits: DecodeLimits,
}

impl EncodedImage {
    pub fn new(identifier: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            identifier: identifier.into(),
            data: data.into(),
            limits: DecodeLimits::default(),
        }
    }

    /// Apply memory ceilings to every decode of this source.
    pub fn with_limits(mut self, limits: DecodeLimits) -> Self {
        self.limits = limits;
        self
    }

    fn reader(&self) -> Result<ImageReader<Cursor<&[u8]>>, SourceError> {
        guessed_reader(ImageReader::new(Cursor::new(self.data.as_ref())))
    }
}

impl ImageSource for EncodedImage {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn info(&self) -> Result<SourceInfo, SourceError> {
        read_info(self.reader()?)
    }

    fn decode(&self, sample_factor: u32) -> Result<PixelBuffer, SourceError> {
        let info = self.info()?;
        decode_reader(self.reader()?, &info, sample_factor, &self.limits)
    }
}

// =============================================================================
// File Source
// =============================================================================

/// An encoded image file on local storage.
///
/// Probing reads only the file header.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    identifier: String,
    limits: DecodeLimits,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let identifier = path.display().to_string();
        Self {
            path,
            identifier,
            limits: DecodeLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: DecodeLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn reader(&self) -> Result<ImageReader<BufReader<std::fs::File>>, SourceError> {
        let file = std::fs::File::open(&self.path).map_err(|e| SourceError::Io(e.to_string()))?;
        guessed_reader(ImageReader::new(BufReader::new(file)))
    }
}

impl ImageSource for FileSource {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn info(&self) -> Result<SourceInfo, SourceError> {
        read_info(self.reader()?)
    }

    fn decode(&self, sample_factor: u32) -> Result<PixelBuffer, SourceError> {
        let info = self.info()?;
        decode_reader(self.reader()?, &info, sample_factor, &self.limits)
    }
}

// =============================================================================
// Shared Decoding
// =============================================================================

fn guessed_reader<R: BufRead + Seek>(
    reader: ImageReader<R>,
) -> Result<ImageReader<R>, SourceError> {
    let reader = reader
        .with_guessed_format()
        .map_err(|e| SourceError::Io(e.to_string()))?;
    if reader.format().is_none() {
        return Err(SourceError::Unsupported(
            "unrecognized image signature".to_string(),
        ));
    }
    Ok(reader)
}

fn read_info<R: BufRead + Seek>(reader: ImageReader<R>) -> Result<SourceInfo, SourceError> {
    let format_hint: Arc<str> = reader
        .format()
        .map(|f| f.to_mime_type())
        .unwrap_or(UNKNOWN_FORMAT_HINT)
        .into();
    let (width, height) = reader.into_dimensions()?;
    Ok(SourceInfo {
        width,
        height,
        format_hint,
    })
}

/// Largest reduction the JPEG decoder applies on its own.
const MAX_JPEG_SCALE_DOWN: u32 = 8;

fn decode_reader<R: BufRead + Seek>(
    reader: ImageReader<R>,
    info: &SourceInfo,
    sample_factor: u32,
    limits: &DecodeLimits,
) -> Result<PixelBuffer, SourceError> {
    let (width, height) = sampled_dimensions(info.width, info.height, sample_factor);
    let requested = width as u64 * height as u64 * RGBA_CHANNELS as u64;

    if limits.max_output_bytes.is_some_and(|max| requested > max) {
        return Err(SourceError::OutOfMemory {
            requested,
            sample_factor,
        });
    }

    let decoded = if reader.format() == Some(ImageFormat::Jpeg) {
        decode_jpeg_scaled(reader.into_inner(), width, height, sample_factor, limits)?
    } else {
        decode_full(reader, info, limits)?
    };

    let decoded = if (decoded.width(), decoded.height()) == (width, height) {
        decoded
    } else {
        decoded.resize_exact(width, height, FilterType::Triangle)
    };
    let pixels = decoded.into_rgba8().into_raw();

    PixelBuffer::new(width, height, RGBA_CHANNELS, pixels, info.format_hint.clone())
        .ok_or_else(|| SourceError::Corrupt("decoded size mismatch".to_string()))
}

/// Decode at full resolution. The limit is checked against the full-size
/// allocation, which no sample factor can reduce.
fn decode_full<R: BufRead + Seek>(
    mut reader: ImageReader<R>,
    info: &SourceInfo,
    limits: &DecodeLimits,
) -> Result<DynamicImage, SourceError> {
    let over_limit = |requested: u64| {
        move |e: image::ImageError| match SourceError::from(e) {
            SourceError::OutOfMemory { .. } => SourceError::ExceedsLimit { requested },
            other => other,
        }
    };

    reader.limits(limits.decoder_limits());
    let estimate = info.width as u64 * info.height as u64 * RGBA_CHANNELS as u64;
    let decoder = reader.into_decoder().map_err(over_limit(estimate))?;

    let full = decoder.total_bytes();
    if limits.max_decoder_alloc.is_some_and(|max| full > max) {
        return Err(SourceError::ExceedsLimit { requested: full });
    }
    DynamicImage::from_decoder(decoder).map_err(over_limit(full))
}

/// Decode a JPEG at the smallest DCT scale that still covers
/// `width` × `height`.
fn decode_jpeg_scaled<R: Read>(
    input: R,
    width: u32,
    height: u32,
    sample_factor: u32,
    limits: &DecodeLimits,
) -> Result<DynamicImage, SourceError> {
    let mut decoder = jpeg_decoder::Decoder::new(input);
    let (scaled_width, scaled_height) = decoder
        .scale(to_u16(width), to_u16(height))
        .map_err(jpeg_error)?;
    let format = decoder
        .info()
        .map(|info| info.pixel_format)
        .ok_or_else(|| SourceError::Corrupt("missing JPEG header".to_string()))?;

    let needed = u64::from(scaled_width) * u64::from(scaled_height) * pixel_bytes(format);
    if limits.max_decoder_alloc.is_some_and(|max| needed > max) {
        // Past 1/8 the decoder allocates the same amount at any factor
        return Err(if sample_factor >= MAX_JPEG_SCALE_DOWN {
            SourceError::ExceedsLimit { requested: needed }
        } else {
            SourceError::OutOfMemory {
                requested: needed,
                sample_factor,
            }
        });
    }

    let pixels = decoder.decode().map_err(jpeg_error)?;
    jpeg_image(
        pixels,
        u32::from(scaled_width),
        u32::from(scaled_height),
        format,
    )
}

fn to_u16(value: u32) -> u16 {
    u16::try_from(value).unwrap_or(u16::MAX)
}

fn pixel_bytes(format: PixelFormat) -> u64 {
    match format {
        PixelFormat::L8 => 1,
        PixelFormat::L16 => 2,
        PixelFormat::RGB24 => 3,
        #[allow(unreachable_patterns)]
        _ => 4,
    }
}

fn jpeg_image(
    pixels: Vec<u8>,
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<DynamicImage, SourceError> {
    let mismatch = || SourceError::Corrupt("decoded JPEG size mismatch".to_string());

    let image = match format {
        PixelFormat::L8 => {
            DynamicImage::ImageLuma8(GrayImage::from_raw(width, height, pixels).ok_or_else(mismatch)?)
        }
        PixelFormat::L16 => {
            let samples: Vec<u16> = pixels
                .chunks_exact(2)
                .map(|b| u16::from_be_bytes([b[0], b[1]]))
                .collect();
            DynamicImage::ImageLuma16(
                ImageBuffer::from_raw(width, height, samples).ok_or_else(mismatch)?,
            )
        }
        PixelFormat::RGB24 => {
            DynamicImage::ImageRgb8(RgbImage::from_raw(width, height, pixels).ok_or_else(mismatch)?)
        }
        PixelFormat::CMYK32 => {
            let rgb: Vec<u8> = pixels.chunks_exact(4).flat_map(cmyk_to_rgb).collect();
            DynamicImage::ImageRgb8(RgbImage::from_raw(width, height, rgb).ok_or_else(mismatch)?)
        }
        #[allow(unreachable_patterns)]
        other => {
            return Err(SourceError::Unsupported(format!(
                "JPEG pixel format {:?}",
                other
            )))
        }
    };
    Ok(image)
}

fn cmyk_to_rgb(cmyk: &[u8]) -> [u8; 3] {
    let k = 255 - u16::from(cmyk[3]);
    let channel = |v: u8| ((255 - u16::from(v)) * k / 255) as u8;
    [channel(cmyk[0]), channel(cmyk[1]), channel(cmyk[2])]
}

fn jpeg_error(err: jpeg_decoder::Error) -> SourceError {
    match err {
        jpeg_decoder::Error::Format(msg) => SourceError::Corrupt(msg),
        jpeg_decoder::Error::Unsupported(feature) => {
            SourceError::Unsupported(format!("{:?}", feature))
        }
        jpeg_decoder::Error::Io(e) => SourceError::Io(e.to_string()),
        other => SourceError::Corrupt(other.to_string()),
    }
}
