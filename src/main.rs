//! pixel-loader - decode images through a memory + disk cache.
//!
//! This binary wires the cache, decode engine and task runner together and
//! exposes them as subcommands.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pixel_loader::{
    cache::{Cache, CacheKey, DiskTier, MemoryTier, DISK_CACHE_DIR},
    config::{BatchConfig, CacheArgs, Cli, Command, DecodeConfig, StatsConfig},
    decode::FileSource,
    loader::{ImageLoader, SourceList, Target},
    task::{RunnerConfig, TaskRunner},
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Command::Decode(config) => run_decode(config),
        Command::Batch(config) => run_batch(config).await,
        Command::Stats(config) => run_stats(config),
        Command::Clear(config) => run_clear(config),
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "pixel_loader=debug"
    } else {
        "pixel_loader=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build the cache for the shared flags and attach its disk tier.
fn open_cache(args: &CacheArgs) -> Arc<Cache> {
    let cache = Arc::new(Cache::new(
        MemoryTier::with_capacity(args.memory_budget_bytes()),
        args.disk_config(),
    ));
    if !cache.init_disk(&args.cache_dir) {
        warn!("Disk cache unavailable, continuing memory-only");
    }
    cache
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}

// =============================================================================
// Decode Command
// =============================================================================

fn run_decode(config: DecodeConfig) -> ExitCode {
    init_logging(config.cache.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let cache = open_cache(&config.cache);
    let loader = ImageLoader::new(cache.clone()).with_jpeg_quality(config.cache.jpeg_quality);

    let target = match (config.width, config.height, config.sample_factor) {
        (Some(width), Some(height), _) => Target::Bounded { width, height },
        (_, _, Some(factor)) => Target::Sampled(factor),
        _ => Target::Sampled(1),
    };

    let source = FileSource::new(&config.path);
    let key = CacheKey::new(config.cache_key());
    let started = Instant::now();

    let response = match loader.load(&source, &key, target) {
        Ok(response) => response,
        Err(e) => {
            error!(path = %config.path.display(), "Decode failed: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let elapsed = started.elapsed();
    cache.close();

    let buffer = &response.buffer;
    if config.json {
        let json = serde_json::json!({
            "key": key.as_str(),
            "width": buffer.width(),
            "height": buffer.height(),
            "channels": buffer.channels(),
            "size_bytes": buffer.size_bytes(),
            "format": buffer.format_hint(),
            "cache_hit": response.cache_hit,
            "elapsed_ms": elapsed.as_millis() as u64,
        });
        match serde_json::to_string_pretty(&json) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                error!("Failed to serialize result: {}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        println!("Key:        {}", key);
        println!("Dimensions: {}x{}", buffer.width(), buffer.height());
        println!("Channels:   {}", buffer.channels());
        println!("Size:       {}", format_bytes(buffer.size_bytes() as u64));
        println!("Format:     {}", buffer.format_hint());
        println!(
            "Source:     {}",
            if response.cache_hit { "cache" } else { "decoded" }
        );
        println!("Elapsed:    {:.1?}", elapsed);
    }

    ExitCode::SUCCESS
}

// =============================================================================
// Batch Command
// =============================================================================

async fn run_batch(config: BatchConfig) -> ExitCode {
    init_logging(config.cache.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let sources = match SourceList::from_dir(&config.dir) {
        Ok(sources) => sources,
        Err(e) => {
            error!(dir = %config.dir.display(), "Failed to list images: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if sources.is_empty() {
        warn!(dir = %config.dir.display(), "No images found");
        return ExitCode::SUCCESS;
    }

    let cache = open_cache(&config.cache);
    let loader = ImageLoader::new(cache.clone()).with_jpeg_quality(config.cache.jpeg_quality);
    let runner = TaskRunner::new(RunnerConfig {
        workers: config.workers,
        coalesce: config.coalesce,
    });

    info!(
        images = sources.len(),
        workers = config.workers,
        "Decoding {}x{} previews",
        config.width,
        config.height
    );

    let started = Instant::now();
    let handles: Vec<_> = sources
        .iter()
        .map(|(key, source)| {
            loader.load_bounded(
                &runner,
                source.clone(),
                key.clone(),
                config.width,
                config.height,
            )
        })
        .collect();

    let mut failures = 0usize;
    for (index, handle) in handles.into_iter().enumerate() {
        let key = sources
            .key_at(index)
            .map(|k| k.as_str())
            .unwrap_or_default();
        match handle.await {
            Ok(buffer) => println!(
                "[{:>4}] {}x{} {}",
                index,
                buffer.width(),
                buffer.height(),
                key
            ),
            Err(e) => {
                failures += 1;
                println!("[{:>4}] failed: {} ({})", index, key, e);
            }
        }
    }

    runner.shutdown().await;
    cache.close();

    let stats = cache.stats();
    println!();
    println!(
        "{} image(s), {} failed, {:.1?}",
        sources.len(),
        failures,
        started.elapsed()
    );
    println!(
        "Memory: {} entries, {}",
        stats.memory_entries,
        format_bytes(stats.memory_bytes as u64)
    );
    println!(
        "Disk:   {} entries, {}",
        stats.disk_entries,
        format_bytes(stats.disk_bytes)
    );

    if failures > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

// =============================================================================
// Stats Command
// =============================================================================

fn run_stats(config: StatsConfig) -> ExitCode {
    init_logging(config.cache.verbose);

    if let Err(e) = config.cache.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let dir = config.cache.cache_dir.join(DISK_CACHE_DIR);
    let tier = match DiskTier::open(&dir, config.cache.disk_config()) {
        Ok(tier) => tier,
        Err(e) => {
            error!(dir = %dir.display(), "Failed to open disk cache: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if config.json {
        let json = serde_json::json!({
            "dir": dir.display().to_string(),
            "entries": tier.len(),
            "size_bytes": tier.size(),
            "quota_bytes": tier.quota(),
        });
        match serde_json::to_string_pretty(&json) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                error!("Failed to serialize stats: {}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        println!("Disk cache: {}", dir.display());
        println!("Entries:    {}", tier.len());
        println!(
            "Size:       {} of {}",
            format_bytes(tier.size()),
            format_bytes(tier.quota())
        );
    }

    ExitCode::SUCCESS
}

// =============================================================================
// Clear Command
// =============================================================================

fn run_clear(config: CacheArgs) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let dir = config.cache_dir.join(DISK_CACHE_DIR);
    let mut tier = match DiskTier::open(&dir, config.disk_config()) {
        Ok(tier) => tier,
        Err(e) => {
            error!(dir = %dir.display(), "Failed to open disk cache: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let entries = tier.len();
    let size = tier.size();
    if let Err(e) = tier.clear() {
        error!(dir = %dir.display(), "Failed to clear disk cache: {}", e);
        return ExitCode::FAILURE;
    }

    println!(
        "Removed {} entries ({}) from {}",
        entries,
        format_bytes(size),
        dir.display()
    );
    ExitCode::SUCCESS
}
