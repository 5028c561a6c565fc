//! Test utilities for integration tests.
//!
//! This module provides in-memory image encoders and a scripted image
//! source that fails allocation a fixed number of times.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ImageEncoder, Rgb, RgbImage, Rgba, RgbaImage};

use pixel_loader::decode::{ImageSource, PixelBuffer, SourceInfo};
use pixel_loader::error::SourceError;

// =============================================================================
// Encoded Test Images
// =============================================================================

/// RGBA gradient with a varying alpha channel.
pub fn gradient(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        Rgba([
            (x % 256) as u8,
            (y % 256) as u8,
            ((x + y) % 256) as u8,
            (255 - (x % 128)) as u8,
        ])
    })
}

/// PNG-encoded gradient.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = gradient(width, height);
    let mut output = Vec::new();
    PngEncoder::new(&mut output)
        .write_image(image.as_raw(), width, height, image::ExtendedColorType::Rgba8)
        .expect("PNG encoding failed");
    output
}

/// JPEG-encoded solid-ish image.
pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    });
    let mut output = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut output, 90)
        .write_image(image.as_raw(), width, height, image::ExtendedColorType::Rgb8)
        .expect("JPEG encoding failed");
    output.into_inner()
}

/// Write a PNG gradient to `dir/name` and return its path.
pub fn write_png(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, png_bytes(width, height)).expect("failed to write test image");
    path
}

// =============================================================================
// Scripted Source
// =============================================================================

/// Source of a fixed size that reports out-of-memory for its first
/// `oom_attempts` decodes and records every sample factor it is asked for.
pub struct FlakySource {
    identifier: String,
    width: u32,
    height: u32,
    oom_attempts: usize,
    calls: AtomicUsize,
    factors: Mutex<Vec<u32>>,
}

impl FlakySource {
    pub fn new(identifier: &str, width: u32, height: u32, oom_attempts: usize) -> Self {
        Self {
            identifier: identifier.to_string(),
            width,
            height,
            oom_attempts,
            calls: AtomicUsize::new(0),
            factors: Mutex::new(Vec::new()),
        }
    }

    pub fn decode_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn factors(&self) -> Vec<u32> {
        self.factors.lock().unwrap().clone()
    }
}

impl ImageSource for FlakySource {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn info(&self) -> Result<SourceInfo, SourceError> {
        Ok(SourceInfo {
            width: self.width,
            height: self.height,
            format_hint: "image/png".into(),
        })
    }

    fn decode(&self, sample_factor: u32) -> Result<PixelBuffer, SourceError> {
        self.factors.lock().unwrap().push(sample_factor);
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.oom_attempts {
            return Err(SourceError::OutOfMemory {
                requested: u64::from(self.width) * u64::from(self.height) * 4,
                sample_factor,
            });
        }

        let width = (self.width / sample_factor).max(1);
        let height = (self.height / sample_factor).max(1);
        let image = gradient(width, height);
        Ok(PixelBuffer::from_rgba(image, "image/png"))
    }
}
