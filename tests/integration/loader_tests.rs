//! End-to-end decode tests.
//!
//! Tests verify:
//! - Real PNG and JPEG files decode at the expected sample factor
//! - Out-of-memory retries escalate the factor and cache the result
//! - Disk-backed results are served across loader instances

use std::sync::Arc;

use tempfile::TempDir;

use pixel_loader::cache::{Cache, CacheKey};
use pixel_loader::decode::{
    calculate_sample_factor, DecodeEngine, DecodeLimits, EncodedImage, FileSource, ImageSource,
};
use pixel_loader::error::{DecodeError, SourceError};
use pixel_loader::loader::{ImageLoader, SourceList, Target};

use super::test_utils::{jpeg_bytes, png_bytes, write_png, FlakySource};

fn memory_loader() -> ImageLoader {
    ImageLoader::new(Arc::new(Cache::with_memory_budget(32 * 1024 * 1024)))
}

// =============================================================================
// Sample Factor
// =============================================================================

#[test]
fn test_reference_sample_factor() {
    assert_eq!(calculate_sample_factor(1200, 800, 200, 200), 2);
}

#[test]
fn test_png_file_decoded_at_sample_factor() {
    let dir = TempDir::new().unwrap();
    let path = write_png(dir.path(), "wide.png", 1200, 800);
    let loader = memory_loader();

    let buffer = loader
        .decode_bounded(&FileSource::new(&path), &CacheKey::new("wide"), 200, 200)
        .unwrap();

    assert_eq!((buffer.width(), buffer.height()), (600, 400));
    assert_eq!(buffer.channels(), 4);
    assert_eq!(buffer.format_hint(), "image/png");
    assert_eq!(buffer.size_bytes(), 600 * 400 * 4);
}

#[test]
fn test_small_source_is_not_downsampled() {
    let loader = memory_loader();
    let source = EncodedImage::new("tiny", png_bytes(50, 40));

    let buffer = loader
        .decode_bounded(&source, &CacheKey::new("tiny"), 200, 200)
        .unwrap();
    assert_eq!((buffer.width(), buffer.height()), (50, 40));
}

#[test]
fn test_jpeg_decoded_sampled() {
    let loader = memory_loader();
    let source = EncodedImage::new("photo.jpg", jpeg_bytes(256, 128));

    let buffer = loader
        .decode_sampled(&source, &CacheKey::new("photo"), 4)
        .unwrap();
    assert_eq!((buffer.width(), buffer.height()), (64, 32));
    assert_eq!(buffer.format_hint(), "image/jpeg");
}

#[test]
fn test_fixed_factor_rounds_up_to_power_of_two() {
    let loader = memory_loader();
    let source = EncodedImage::new("odd", png_bytes(64, 64));

    let buffer = loader
        .decode_sampled(&source, &CacheKey::new("odd"), 3)
        .unwrap();
    assert_eq!((buffer.width(), buffer.height()), (16, 16));
}

// =============================================================================
// Out-of-Memory Retry
// =============================================================================

#[test]
fn test_two_failures_quadruple_factor_and_cache_result() {
    let loader = memory_loader();
    let source = FlakySource::new("flaky", 1200, 800, 2);
    let key = CacheKey::new("flaky");

    let buffer = loader.decode_bounded(&source, &key, 200, 200).unwrap();
    assert_eq!(source.factors(), vec![2, 4, 8]);
    assert_eq!((buffer.width(), buffer.height()), (150, 100));

    // Cached under the original key, no further decode
    let again = loader.decode_bounded(&source, &key, 200, 200).unwrap();
    assert_eq!(again, buffer);
    assert_eq!(source.decode_count(), 3);
}

#[test]
fn test_retries_exhausted() {
    let loader = ImageLoader::with_engine(
        Arc::new(Cache::with_memory_budget(1024 * 1024)),
        DecodeEngine::with_max_sample_factor(8),
    );
    let source = FlakySource::new("hopeless", 1024, 1024, usize::MAX);

    let err = loader
        .decode_sampled(&source, &CacheKey::new("hopeless"), 1)
        .unwrap_err();
    match err {
        DecodeError::RetriesExhausted { last_factor, source } => {
            assert_eq!(last_factor, 4);
            assert!(source.is_out_of_memory());
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn test_output_ceiling_forces_real_retry() {
    // 512x512 RGBA is 1MB; allow only a quarter of that
    let limits = DecodeLimits {
        max_output_bytes: Some(300 * 1024),
        max_decoder_alloc: None,
    };
    let source = EncodedImage::new("big.png", png_bytes(512, 512)).with_limits(limits);
    let loader = memory_loader();

    let buffer = loader
        .decode_sampled(&source, &CacheKey::new("big"), 1)
        .unwrap();
    assert_eq!((buffer.width(), buffer.height()), (256, 256));
}

#[test]
fn test_decoder_limit_met_by_bounded_factor() {
    // Full scale needs 768KB; the 64x64 box picks factor 4, which needs 48KB
    let limits = DecodeLimits {
        max_output_bytes: None,
        max_decoder_alloc: Some(300 * 1024),
    };
    let source = EncodedImage::new("photo.jpg", jpeg_bytes(512, 512)).with_limits(limits);
    let loader = memory_loader();

    let buffer = loader
        .decode_bounded(&source, &CacheKey::new("bounded"), 64, 64)
        .unwrap();
    assert_eq!((buffer.width(), buffer.height()), (128, 128));

    // From factor 1 the retry loop reaches a scale that fits
    let buffer = loader
        .decode_sampled(&source, &CacheKey::new("sampled"), 1)
        .unwrap();
    assert_eq!((buffer.width(), buffer.height()), (256, 256));
}

#[test]
fn test_full_size_decoder_limit_fails_without_retries() {
    let limits = DecodeLimits {
        max_output_bytes: None,
        max_decoder_alloc: Some(300 * 1024),
    };
    let source = EncodedImage::new("big.png", png_bytes(512, 512)).with_limits(limits);
    let loader = memory_loader();

    let err = loader
        .decode_bounded(&source, &CacheKey::new("big"), 64, 64)
        .unwrap_err();
    assert!(matches!(
        err,
        DecodeError::Source(SourceError::ExceedsLimit { requested }) if requested == 512 * 512 * 4
    ));
}

#[test]
fn test_corrupt_source_not_retried() {
    let loader = memory_loader();
    let mut data = png_bytes(64, 64);
    data.truncate(40);
    let source = EncodedImage::new("broken.png", data);

    let err = loader
        .decode_bounded(&source, &CacheKey::new("broken"), 16, 16)
        .unwrap_err();
    assert!(matches!(err, DecodeError::Source(_)));
}

#[test]
fn test_missing_file_reports_io() {
    let loader = memory_loader();
    let err = loader
        .decode_bounded(
            &FileSource::new("/definitely/not/here.png"),
            &CacheKey::new("missing"),
            10,
            10,
        )
        .unwrap_err();
    assert!(matches!(err, DecodeError::Source(SourceError::Io(_))));
}

// =============================================================================
// Disk-Backed Loading
// =============================================================================

#[test]
fn test_second_process_reads_from_disk() {
    let root = TempDir::new().unwrap();
    let source = FlakySource::new("persisted", 400, 300, 0);
    let key = CacheKey::new("persisted");

    let first = {
        let cache = Arc::new(Cache::with_memory_budget(8 * 1024 * 1024));
        assert!(cache.init_disk(root.path()));
        let loader = ImageLoader::new(cache.clone());
        let buffer = loader.decode_bounded(&source, &key, 100, 100).unwrap();
        cache.close();
        buffer
    };

    let cache = Arc::new(Cache::with_memory_budget(8 * 1024 * 1024));
    assert!(cache.init_disk(root.path()));
    let loader = ImageLoader::new(cache);

    let response = loader
        .load(&source, &key, Target::Bounded { width: 100, height: 100 })
        .unwrap();
    assert!(response.cache_hit);
    assert_eq!(response.buffer.data(), first.data());
    assert_eq!(source.decode_count(), 1);
}

#[test]
fn test_source_list_from_directory() {
    let dir = TempDir::new().unwrap();
    write_png(dir.path(), "b.png", 40, 40);
    write_png(dir.path(), "a.png", 80, 20);
    std::fs::write(dir.path().join("readme.md"), "not an image").unwrap();

    let list = SourceList::from_dir(dir.path()).unwrap();
    assert_eq!(list.len(), 2);

    let loader = memory_loader();
    let (key, source) = list.get(0).unwrap();
    let buffer = loader.decode_bounded(source.as_ref(), key, 1000, 1000).unwrap();
    assert_eq!((buffer.width(), buffer.height()), (80, 20));
    assert_eq!(list.position(key), Some(0));
    assert!(source.identifier().ends_with("a.png"));
}
