//! Configuration for the `pixel-loader` binary.
//!
//! The CLI is parsed with clap. Every shared flag can also be set through an
//! environment variable with the `PIXEL_` prefix:
//!
//! - `PIXEL_CACHE_DIR` - Storage root; blobs live in `<dir>/images` (default: .pixel-cache)
//! - `PIXEL_MEMORY_BUDGET` - Memory tier budget, e.g. `64MB` (default: 64MB)
//! - `PIXEL_DISK_QUOTA` - Disk tier quota, e.g. `10MB` (default: 10MB)
//! - `PIXEL_JPEG_QUALITY` - Quality of JPEG blobs (default: 100)
//! - `PIXEL_WORKERS` - Concurrent decodes for `batch` (default: 4)
//!
//! # Example
//!
//! ```ignore
//! use clap::Parser;
//! use pixel_loader::config::{Cli, Command};
//!
//! let cli = Cli::parse();
//! match cli.command {
//!     Command::Decode(config) => println!("decoding {}", config.path.display()),
//!     _ => {}
//! }
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::cache::{
    is_valid_quality, DiskConfig, DEFAULT_DISK_QUOTA, DEFAULT_JPEG_QUALITY, DEFAULT_MEMORY_BUDGET,
};
use crate::task::DEFAULT_WORKERS;

// =============================================================================
// Default Values
// =============================================================================

/// Default storage root.
pub const DEFAULT_CACHE_DIR: &str = ".pixel-cache";

/// Default bounding box edge for `batch`.
pub const DEFAULT_BATCH_EDGE: u32 = 256;

// =============================================================================
// CLI Arguments
// =============================================================================

/// pixel-loader - decode images through a memory + disk cache.
#[derive(Parser, Debug, Clone)]
#[command(name = "pixel-loader")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Decode one image through the cache and describe the result.
    Decode(DecodeConfig),

    /// Decode every image in a directory on background workers.
    Batch(BatchConfig),

    /// Show the contents of the disk cache.
    Stats(StatsConfig),

    /// Delete every cached blob.
    Clear(CacheArgs),
}

/// Flags shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct CacheArgs {
    /// Storage root. The disk tier lives in `<cache-dir>/images`.
    #[arg(long, default_value = DEFAULT_CACHE_DIR, env = "PIXEL_CACHE_DIR")]
    pub cache_dir: PathBuf,

    /// Memory tier budget (bytes, or with a KB/MB/GB suffix).
    #[arg(long, default_value_t = DEFAULT_MEMORY_BUDGET as u64, value_parser = parse_size, env = "PIXEL_MEMORY_BUDGET")]
    pub memory_budget: u64,

    /// Disk tier quota (bytes, or with a KB/MB/GB suffix).
    #[arg(long, default_value_t = DEFAULT_DISK_QUOTA, value_parser = parse_size, env = "PIXEL_DISK_QUOTA")]
    pub disk_quota: u64,

    /// JPEG quality for blobs of JPEG sources (1-100).
    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY, env = "PIXEL_JPEG_QUALITY")]
    pub jpeg_quality: u8,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl CacheArgs {
    /// Validate the shared flags and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.memory_budget == 0 {
            return Err("memory_budget must be greater than 0".to_string());
        }
        if usize::try_from(self.memory_budget).is_err() {
            return Err("memory_budget does not fit in this platform's address space".to_string());
        }
        if self.disk_quota == 0 {
            return Err("disk_quota must be greater than 0".to_string());
        }
        if !is_valid_quality(self.jpeg_quality) {
            return Err("jpeg_quality must be between 1 and 100".to_string());
        }
        if self.cache_dir.as_os_str().is_empty() {
            return Err("cache_dir must not be empty".to_string());
        }
        Ok(())
    }

    /// Memory budget in bytes (call `validate()` first).
    pub fn memory_budget_bytes(&self) -> usize {
        usize::try_from(self.memory_budget).unwrap_or(usize::MAX)
    }

    pub fn disk_config(&self) -> DiskConfig {
        DiskConfig::with_quota(self.disk_quota)
    }
}

/// Arguments of `decode`.
#[derive(Args, Debug, Clone)]
pub struct DecodeConfig {
    /// Image file to decode.
    pub path: PathBuf,

    /// Cache key (defaults to the path).
    #[arg(long)]
    pub key: Option<String>,

    /// Width of the bounding box the result must cover.
    #[arg(long, requires = "height", conflicts_with = "sample_factor")]
    pub width: Option<u32>,

    /// Height of the bounding box the result must cover.
    #[arg(long, requires = "width")]
    pub height: Option<u32>,

    /// Fixed power-of-two sample factor.
    #[arg(long)]
    pub sample_factor: Option<u32>,

    /// Print the result as JSON.
    #[arg(long, default_value_t = false)]
    pub json: bool,

    #[command(flatten)]
    pub cache: CacheArgs,
}

impl DecodeConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.cache.validate()?;
        if let Some(factor) = self.sample_factor {
            validate_sample_factor(factor)?;
        }
        if self.width == Some(0) || self.height == Some(0) {
            return Err("width and height must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Cache key for the decoded image.
    pub fn cache_key(&self) -> String {
        self.key
            .clone()
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// Arguments of `batch`.
#[derive(Args, Debug, Clone)]
pub struct BatchConfig {
    /// Directory of images to decode.
    pub dir: PathBuf,

    /// Width of the bounding box each result must cover.
    #[arg(long, default_value_t = DEFAULT_BATCH_EDGE)]
    pub width: u32,

    /// Height of the bounding box each result must cover.
    #[arg(long, default_value_t = DEFAULT_BATCH_EDGE)]
    pub height: u32,

    /// Maximum number of concurrent decodes.
    #[arg(long, default_value_t = DEFAULT_WORKERS, env = "PIXEL_WORKERS")]
    pub workers: usize,

    /// Run tasks for the same key one after another.
    #[arg(long, default_value_t = false)]
    pub coalesce: bool,

    #[command(flatten)]
    pub cache: CacheArgs,
}

impl BatchConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.cache.validate()?;
        if self.workers == 0 {
            return Err("workers must be greater than 0".to_string());
        }
        if self.width == 0 || self.height == 0 {
            return Err("width and height must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Arguments of `stats`.
#[derive(Args, Debug, Clone)]
pub struct StatsConfig {
    /// Print the statistics as JSON.
    #[arg(long, default_value_t = false)]
    pub json: bool,

    #[command(flatten)]
    pub cache: CacheArgs,
}

fn validate_sample_factor(factor: u32) -> Result<(), String> {
    if factor == 0 || !factor.is_power_of_two() {
        return Err(format!(
            "sample_factor must be a power of two, got {}",
            factor
        ));
    }
    Ok(())
}

/// Parse a byte size such as `1048576`, `512KB` or `64MB`.
///
/// Suffixes are binary multiples and case-insensitive; `KiB`/`MiB`/`GiB` and
/// a bare `K`/`M`/`G` are accepted too.
pub fn parse_size(value: &str) -> Result<u64, String> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, suffix) = value.split_at(split);

    let number: u64 = digits
        .parse()
        .map_err(|_| format!("invalid size {:?}", value))?;
    let multiplier: u64 = match suffix.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => 1024,
        "M" | "MB" | "MIB" => 1024 * 1024,
        "G" | "GB" | "GIB" => 1024 * 1024 * 1024,
        other => return Err(format!("unknown size suffix {:?}", other)),
    };

    number
        .checked_mul(multiplier)
        .ok_or_else(|| format!("size {:?} is too large", value))
}

// =============================================================================
// Tests
// =============================================================================
