//! Caching for decoded images.
//!
//! # Architecture
//!
//! ```text
//! Cache
//!   ├── MemoryTier   byte-budgeted LRU of PixelBuffers
//!   └── DiskTier     quota-bounded LRU of encoded blobs
//!         └── journal   DIRTY / CLEAN / REMOVE log for crash recovery
//! ```
//!
//! Keys are caller-chosen strings ([`CacheKey`]). On disk a key is
//! addressed by the SHA-256 digest of the key, so arbitrary keys map to
//! safe file names.

mod codec;
mod disk;
mod journal;
mod key;
mod memory;
mod stats;
mod tiered;

pub use codec::{
    clamp_quality, decode_blob, encode_blob, is_valid_quality, DiskFormat, DEFAULT_JPEG_QUALITY,
    MAX_JPEG_QUALITY, MIN_JPEG_QUALITY,
};
pub use disk::{
    DiskConfig, DiskTier, DEFAULT_COMPACT_MIN_RECORDS, DEFAULT_COMPACT_RATIO, DEFAULT_DISK_QUOTA,
};
pub use journal::{
    replay, DiskRecord, JournalOp, RecoveryWarning, ReplayReport, JOURNAL_FILE, JOURNAL_MAGIC,
    JOURNAL_TMP_FILE, JOURNAL_VERSION,
};
pub use key::CacheKey;
pub use memory::{MemoryTier, DEFAULT_MEMORY_BUDGET};
pub use stats::CacheStats;
pub use tiered::{Cache, DISK_CACHE_DIR};
