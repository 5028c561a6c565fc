//! # pixel-loader
//!
//! Decode large images into pixel buffers on demand without running out of
//! memory or decoding the same image twice.
//!
//! ## Features
//!
//! - **Sample-factor decoding**: images are decoded at the coarsest
//!   power-of-two reduction that still covers the requested box
//! - **Out-of-memory retry**: a decode that cannot allocate is retried at
//!   larger sample factors
//! - **Two-tier cache**: a byte-budgeted memory LRU in front of a
//!   quota-bounded disk store with a crash-recoverable journal
//! - **Background loading**: bounded worker pool with future handles or
//!   callbacks delivered on the caller's thread
//!
//! ## Architecture
//!
//! - [`decode`] - sample factor calculation, image sources, decode engine
//! - [`cache`] - memory tier, disk tier and journal, two-tier cache
//! - [`loader`] - cache-first decode surface and source lists
//! - [`task`] - background task runner and result delivery
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pixel_loader::{Cache, CacheKey, FileSource, ImageLoader};
//!
//! let cache = Arc::new(Cache::with_memory_budget(64 * 1024 * 1024));
//! cache.init_disk("/var/cache/my-app");
//!
//! let loader = ImageLoader::new(cache);
//! let source = FileSource::new("photos/beach.jpg");
//! let preview = loader
//!     .decode_bounded(&source, &CacheKey::new("beach"), 400, 300)
//!     .expect("decode failed");
//! println!("{}x{}", preview.width(), preview.height());
//! ```

pub mod cache;
pub mod config;
pub mod decode;
pub mod error;
pub mod loader;
pub mod task;

// Re-export commonly used types
pub use cache::{Cache, CacheKey, CacheStats, DiskConfig, DiskTier, MemoryTier};
pub use config::{BatchConfig, CacheArgs, Cli, Command, DecodeConfig, StatsConfig};
pub use decode::{
    calculate_sample_factor, DecodeEngine, DownsampleOptions, EncodedImage, FileSource,
    ImageSource, PixelBuffer,
};
pub use error::{CacheError, DecodeError, SourceError};
pub use loader::{ImageLoader, LoadResponse, SourceList, Target};
pub use task::{CancelToken, ResultContext, RunnerConfig, TaskHandle, TaskRunner};
