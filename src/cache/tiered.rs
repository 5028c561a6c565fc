//! Two-tier cache: memory in front of disk.
//!
//! # Lookup
//!
//! ```text
//! lookup(key)
//!   ├─ MemoryTier hit ──────────────────────────────► buffer
//!   ├─ DiskTier hit ─► decode blob ─► promote to memory ─► buffer
//!   └─ miss ────────────────────────────────────────► None
//! ```
//!
//! # Degradation
//!
//! Disk problems never reach the caller. A blob that fails to decode is
//! invalidated and reported as a miss, a failed write is logged, and a
//! journal failure disables the disk tier for the rest of the session.

use std::path::Path;
use std::sync::{Mutex, OnceLock, PoisonError};

use tracing::{debug, info, warn};

use super::codec::{decode_blob, encode_blob, DiskFormat};
use super::disk::{DiskConfig, DiskTier};
use super::key::CacheKey;
use super::memory::MemoryTier;
use super::stats::{CacheStats, LookupCounters};
use crate::decode::PixelBuffer;

/// Subdirectory of the storage root that holds the disk tier.
pub const DISK_CACHE_DIR: &str = "images";

/// Memory + disk cache for decoded buffers.
///
/// Build one per application and share it as `Arc<Cache>`. The disk tier is
/// attached later with [`Cache::init_disk`]; until then the cache is
/// memory-only.
pub struct Cache {
    memory: MemoryTier,
    disk_config: DiskConfig,

    /// Set once by `init_disk`; `None` inside means opening failed
    disk: OnceLock<Option<Mutex<DiskTier>>>,

    counters: LookupCounters,
}

impl Cache {
    pub fn new(memory: MemoryTier, disk_config: DiskConfig) -> Self {
        Self {
            memory,
            disk_config,
            disk: OnceLock::new(),
            counters: LookupCounters::default(),
        }
    }

    /// Memory-only cache with a budget of `max_size` bytes.
    pub fn with_memory_budget(max_size: usize) -> Self {
        Self::new(MemoryTier::with_capacity(max_size), DiskConfig::default())
    }

    /// Attach the disk tier under `<storage_root>/images`.
    ///
    /// Only the first call has an effect; later calls are logged and
    /// ignored. Returns `true` if this call opened the disk tier. When the
    /// tier cannot be opened the cache stays memory-only.
    pub fn init_disk(&self, storage_root: impl AsRef<Path>) -> bool {
        let dir = storage_root.as_ref().join(DISK_CACHE_DIR);
        let mut initialized_here = false;

        let slot = self.disk.get_or_init(|| {
            initialized_here = true;
            match DiskTier::open(&dir, self.disk_config.clone()) {
                Ok(tier) => Some(Mutex::new(tier)),
                Err(e) => {
                    warn!(
                        dir = %dir.display(),
                        "Failed to open disk cache, continuing memory-only: {}",
                        e
                    );
                    None
                }
            }
        });

        if !initialized_here {
            warn!(
                dir = %dir.display(),
                "Disk cache already initialized, ignoring"
            );
            return false;
        }
        slot.is_some()
    }

    /// Whether a healthy disk tier is attached.
    pub fn is_disk_enabled(&self) -> bool {
        self.with_disk(|disk| !disk.is_disabled()).unwrap_or(false)
    }

    fn with_disk<R>(&self, f: impl FnOnce(&mut DiskTier) -> R) -> Option<R> {
        let disk = self.disk.get()?.as_ref()?;
        let mut guard = disk.lock().unwrap_or_else(PoisonError::into_inner);
        Some(f(&mut guard))
    }

    /// Find a buffer in memory, then on disk.
    ///
    /// Disk hits are promoted into the memory tier, unless the key was
    /// stored or invalidated while the blob was being decoded.
    pub fn lookup(&self, key: &CacheKey) -> Option<PixelBuffer> {
        if let Some(buffer) = self.memory.get(key) {
            self.counters.memory_hit();
            debug!(key = key.as_str(), "Memory cache hit");
            return Some(buffer);
        }

        let Some((blob, generation)) = self.with_disk(|disk| disk.get_versioned(key)).flatten()
        else {
            self.counters.miss();
            debug!(key = key.as_str(), "Cache miss");
            return None;
        };

        // Decoding runs outside the disk lock
        match decode_blob(&blob) {
            Ok(buffer) => {
                self.counters.disk_hit();
                debug!(key = key.as_str(), size = blob.len(), "Disk cache hit");
                let promoted = self.with_disk(|disk| {
                    let current = disk.generation(key) == Some(generation);
                    if current {
                        self.memory.put(key.clone(), buffer.clone());
                    }
                    current
                });
                if promoted != Some(true) {
                    debug!(key = key.as_str(), "Blob replaced while decoding, not promoted");
                }
                Some(buffer)
            }
            Err(e) => {
                warn!(key = key.as_str(), "Dropping unreadable blob: {}", e);
                self.with_disk(|disk| {
                    if disk.generation(key) == Some(generation) {
                        if let Err(e) = disk.remove(key) {
                            warn!(key = key.as_str(), "Failed to remove blob: {}", e);
                        }
                    }
                });
                self.counters.miss();
                None
            }
        }
    }

    /// Store a buffer in memory and, when the disk tier is attached, on disk.
    ///
    /// `format_hint` is the mime type of the source. JPEG sources are stored
    /// as JPEG at `quality`, other images as PNG. Non-image hints are kept
    /// in memory only.
    ///
    /// With a disk tier, both tiers are updated under the disk lock, so
    /// concurrent writes to one key land in the same order in both.
    pub fn store(&self, key: &CacheKey, buffer: PixelBuffer, format_hint: &str, quality: u8) {
        if !self.has_disk() {
            self.memory.put(key.clone(), buffer);
            return;
        }

        let blob = match DiskFormat::from_mime(format_hint) {
            Some(format) => match encode_blob(&buffer, format, quality) {
                Ok(blob) => Some((format, blob)),
                Err(e) => {
                    warn!(key = key.as_str(), "Failed to encode blob: {}", e);
                    None
                }
            },
            None => {
                warn!(
                    key = key.as_str(),
                    format_hint, "Not an image type, skipping disk cache"
                );
                None
            }
        };

        let updated = self.with_disk(|disk| {
            match &blob {
                Some((format, blob)) => match disk.put(key, blob) {
                    Ok(()) => {
                        debug!(key = key.as_str(), size = blob.len(), ?format, "Stored blob");
                    }
                    Err(e) => {
                        warn!(key = key.as_str(), "Failed to persist blob: {}", e);
                        let _ = disk.remove(key);
                    }
                },
                // A previous blob for the key would now be stale
                None => {
                    if let Err(e) = disk.remove(key) {
                        warn!(key = key.as_str(), "Failed to remove blob: {}", e);
                    }
                }
            }
            self.memory.put(key.clone(), buffer.clone());
        });
        if updated.is_none() {
            self.memory.put(key.clone(), buffer);
        }
    }

    /// Remove a key from both tiers.
    pub fn invalidate(&self, key: &CacheKey) {
        let updated = self.with_disk(|disk| {
            if let Err(e) = disk.remove(key) {
                warn!(key = key.as_str(), "Failed to remove blob: {}", e);
            }
            self.memory.remove(key);
        });
        if updated.is_none() {
            self.memory.remove(key);
        }
        debug!(key = key.as_str(), "Invalidated");
    }

    fn has_disk(&self) -> bool {
        self.disk.get().is_some_and(Option::is_some)
    }

    /// Empty both tiers.
    pub fn clear(&self) {
        let cleared = self.with_disk(|disk| {
            if let Err(e) = disk.clear() {
                warn!("Failed to clear disk cache: {}", e);
            }
            self.memory.clear();
        });
        if cleared.is_none() {
            self.memory.clear();
        }
        info!("Cache cleared");
    }

    /// Flush and sync the disk journal.
    pub fn close(&self) {
        if let Some(Err(e)) = self.with_disk(|disk| disk.close()) {
            warn!("Failed to sync disk cache: {}", e);
        }
    }

    /// Snapshot of tier sizes and lookup counters.
    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats {
            memory_entries: self.memory.len(),
            memory_bytes: self.memory.size(),
            memory_budget: self.memory.capacity(),
            disk_quota: self.disk_config.quota_bytes,
            ..CacheStats::default()
        };
        self.with_disk(|disk| {
            stats.disk_enabled = !disk.is_disabled();
            stats.disk_entries = disk.len();
            stats.disk_bytes = disk.size();
        });
        self.counters.fill(&mut stats);
        stats
    }

    pub fn memory(&self) -> &MemoryTier {
        &self.memory
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new(MemoryTier::new(), DiskConfig::default())
    }
}
