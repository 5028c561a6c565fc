//! Decode request surface.
//!
//! The [`ImageLoader`] is the main entry point for image requests. It ties
//! the cache to the decode engine:
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                        ImageLoader                         │
//! │   1. Cache::lookup(key) ──── hit ────────────► buffer      │
//! │   2. DecodeEngine (sample factor + OOM retry)              │
//! │   3. Cache::store(key, buffer, format hint, quality)       │
//! └────────────────────────────────────────────────────────────┘
//!          │                    │                    │
//!          ▼                    ▼                    ▼
//!     ┌─────────┐        ┌──────────────┐     ┌────────────┐
//!     │  Cache  │        │ DecodeEngine │     │ TaskRunner │
//!     └─────────┘        └──────────────┘     └────────────┘
//! ```
//!
//! Synchronous calls run on the caller's thread; the `load_*` variants run
//! the same pipeline on a [`TaskRunner`].

mod list;

pub use list::SourceList;

use std::sync::Arc;

use tracing::debug;

use crate::cache::{clamp_quality, Cache, CacheKey, DEFAULT_JPEG_QUALITY};
use crate::decode::{DecodeEngine, ImageSource, PixelBuffer};
use crate::error::DecodeError;
use crate::task::{CancelToken, ResultContext, TaskHandle, TaskRunner};

// =============================================================================
// Load Request
// =============================================================================

/// How large the decoded image should be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Smallest power-of-two reduction that still covers the box
    Bounded { width: u32, height: u32 },

    /// Fixed sample factor, rounded up to a power of two
    Sampled(u32),
}

/// Result of a load, with where it came from.
#[derive(Debug, Clone)]
pub struct LoadResponse {
    pub buffer: PixelBuffer,

    /// Whether the buffer came from either cache tier
    pub cache_hit: bool,
}

// =============================================================================
// Image Loader
// =============================================================================

/// Cache-first image decoding.
///
/// Cheap to clone; clones share the same [`Cache`].
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use pixel_loader::cache::{Cache, CacheKey};
/// use pixel_loader::decode::FileSource;
/// use pixel_loader::loader::ImageLoader;
///
/// let cache = Arc::new(Cache::default());
/// cache.init_disk("/var/cache/app");
/// let loader = ImageLoader::new(cache);
///
/// let source = FileSource::new("photos/beach.jpg");
/// let thumb = loader.decode_bounded(&source, &CacheKey::new("beach"), 200, 200)?;
/// ```
#[derive(Clone)]
pub struct ImageLoader {
    cache: Arc<Cache>,
    engine: DecodeEngine,
    jpeg_quality: u8,
}

impl ImageLoader {
    pub fn new(cache: Arc<Cache>) -> Self {
        Self::with_engine(cache, DecodeEngine::new())
    }

    pub fn with_engine(cache: Arc<Cache>, engine: DecodeEngine) -> Self {
        Self {
            cache,
            engine,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }

    /// Set the JPEG quality for blobs persisted to disk (clamped to 1-100).
    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = clamp_quality(quality);
        self
    }

    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    pub fn jpeg_quality(&self) -> u8 {
        self.jpeg_quality
    }

    /// Look up `key`, decoding `source` and caching the result on a miss.
    pub fn load<S: ImageSource + ?Sized>(
        &self,
        source: &S,
        key: &CacheKey,
        target: Target,
    ) -> Result<LoadResponse, DecodeError> {
        if let Some(buffer) = self.cache.lookup(key) {
            return Ok(LoadResponse {
                buffer,
                cache_hit: true,
            });
        }

        let buffer = match target {
            Target::Bounded { width, height } => {
                self.engine.decode_bounded(source, width, height)?
            }
            Target::Sampled(factor) => self.engine.decode(source, factor)?,
        };

        debug!(
            key = key.as_str(),
            source = source.identifier(),
            width = buffer.width(),
            height = buffer.height(),
            "Decoded"
        );

        let hint = buffer.format_hint().to_string();
        self.cache
            .store(key, buffer.clone(), &hint, self.jpeg_quality);

        Ok(LoadResponse {
            buffer,
            cache_hit: false,
        })
    }

    /// Decode so the result covers `req_width` × `req_height`, cache-first.
    pub fn decode_bounded<S: ImageSource + ?Sized>(
        &self,
        source: &S,
        key: &CacheKey,
        req_width: u32,
        req_height: u32,
    ) -> Result<PixelBuffer, DecodeError> {
        let target = Target::Bounded {
            width: req_width,
            height: req_height,
        };
        self.load(source, key, target).map(|r| r.buffer)
    }

    /// Decode at a fixed sample factor, cache-first.
    pub fn decode_sampled<S: ImageSource + ?Sized>(
        &self,
        source: &S,
        key: &CacheKey,
        sample_factor: u32,
    ) -> Result<PixelBuffer, DecodeError> {
        self.load(source, key, Target::Sampled(sample_factor))
            .map(|r| r.buffer)
    }

    // =========================================================================
    // Background variants
    // =========================================================================

    /// Run [`load`](Self::load) on `runner`.
    pub fn spawn_load(
        &self,
        runner: &TaskRunner,
        source: Arc<dyn ImageSource>,
        key: CacheKey,
        target: Target,
    ) -> TaskHandle {
        let loader = self.clone();
        let task_key = key.clone();
        runner.submit(task_key, move || {
            loader.load(&*source, &key, target).map(|r| r.buffer)
        })
    }

    /// Background [`decode_bounded`](Self::decode_bounded).
    pub fn load_bounded(
        &self,
        runner: &TaskRunner,
        source: Arc<dyn ImageSource>,
        key: CacheKey,
        req_width: u32,
        req_height: u32,
    ) -> TaskHandle {
        let target = Target::Bounded {
            width: req_width,
            height: req_height,
        };
        self.spawn_load(runner, source, key, target)
    }

    /// Background [`decode_sampled`](Self::decode_sampled).
    pub fn load_sampled(
        &self,
        runner: &TaskRunner,
        source: Arc<dyn ImageSource>,
        key: CacheKey,
        sample_factor: u32,
    ) -> TaskHandle {
        self.spawn_load(runner, source, key, Target::Sampled(sample_factor))
    }

    /// Load in the background and run one of the callbacks on `ctx`.
    #[allow(clippy::too_many_arguments)]
    pub fn load_with_callbacks<S, E>(
        &self,
        runner: &TaskRunner,
        source: Arc<dyn ImageSource>,
        key: CacheKey,
        target: Target,
        ctx: &ResultContext,
        on_success: S,
        on_failure: E,
    ) -> CancelToken
    where
        S: FnOnce(PixelBuffer) + Send + 'static,
        E: FnOnce(DecodeError) + Send + 'static,
    {
        let loader = self.clone();
        let task_key = key.clone();
        runner.submit_with_callbacks(
            task_key,
            move || loader.load(&*source, &key, target).map(|r| r.buffer),
            ctx,
            on_success,
            on_failure,
        )
    }
}
