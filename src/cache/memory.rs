//! In-memory tier for decoded pixel buffers.
//!
//! This module provides a byte-budgeted LRU cache, so recently shown images
//! are returned without touching the disk tier or the decoder.
//!
//! # Size-Based Eviction
//!
//! The tier tracks the total size of cached buffers in bytes and evicts
//! least-recently-used entries before an insert would exceed the budget. A
//! buffer larger than the whole budget is never cached.

use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};

use lru::LruCache;
use tracing::debug;

use super::key::CacheKey;
use crate::decode::PixelBuffer;

/// Default memory budget: 64MB
pub const DEFAULT_MEMORY_BUDGET: usize = 64 * 1024 * 1024;

struct MemoryState {
    entries: LruCache<CacheKey, PixelBuffer>,
    size: usize,
}

/// LRU cache for decoded buffers with a byte budget.
///
/// All operations are synchronous and hold the lock only for the map
/// mutation. The tier can be shared across threads behind an `Arc`.
///
/// # Example
///
/// ```
/// use pixel_loader::cache::{CacheKey, MemoryTier};
/// use pixel_loader::decode::PixelBuffer;
///
/// let tier = MemoryTier::with_capacity(1024);
/// let key = CacheKey::new("res/42");
/// let buffer = PixelBuffer::new(4, 4, 4, vec![0u8; 64], "image/png").unwrap();
///
/// assert!(tier.put(key.clone(), buffer.clone()));
/// assert_eq!(tier.get(&key), Some(buffer));
/// ```
pub struct MemoryTier {
    state: Mutex<MemoryState>,

    /// Maximum total size in bytes
    max_size: usize,
}

impl MemoryTier {
    /// Create a tier with the default budget (64MB).
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MEMORY_BUDGET)
    }

    /// Create a tier with a budget of `max_size` bytes.
    pub fn with_capacity(max_size: usize) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                entries: LruCache::unbounded(),
                size: 0,
            }),
            max_size,
        }
    }

    /// Create a tier with a byte budget and a cap on the number of entries.
    pub fn with_capacity_and_entries(max_size: usize, max_entries: NonZeroUsize) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                entries: LruCache::new(max_entries),
                size: 0,
            }),
            max_size,
        }
    }

    /// Size the budget as one eighth of the memory available to the process,
    /// leaving the rest for decoding and the application.
    pub fn for_available_memory(available_bytes: usize) -> Self {
        Self::with_capacity(available_bytes / 8)
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get a buffer and mark it most recently used.
    pub fn get(&self, key: &CacheKey) -> Option<PixelBuffer> {
        self.lock().entries.get(key).cloned()
    }

    /// Check for a key without updating LRU order.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.lock().entries.contains(key)
    }

    /// Insert a buffer, evicting least-recently-used entries until it fits.
    ///
    /// Returns `false` if the buffer alone exceeds the budget. It is not
    /// cached in that case and any older entry for the key is dropped.
    pub fn put(&self, key: CacheKey, buffer: PixelBuffer) -> bool {
        let buffer_size = buffer.size_bytes();
        let mut state = self.lock();

        if let Some(old) = state.entries.pop(&key) {
            state.size = state.size.saturating_sub(old.size_bytes());
        }

        if buffer_size > self.max_size {
            debug!(
                key = key.as_str(),
                size = buffer_size,
                budget = self.max_size,
                "Buffer exceeds memory budget, not cached"
            );
            return false;
        }

        while state.size + buffer_size > self.max_size {
            match state.entries.pop_lru() {
                Some((evicted_key, evicted)) => {
                    state.size = state.size.saturating_sub(evicted.size_bytes());
                    debug!(key = evicted_key.as_str(), "Evicted from memory tier");
                }
                None => break,
            }
        }

        // Entry-count cap may push out one more entry
        if let Some((_, evicted)) = state.entries.push(key, buffer) {
            state.size = state.size.saturating_sub(evicted.size_bytes());
        }
        state.size += buffer_size;
        true
    }

    /// Remove a buffer, returning it if it was cached.
    pub fn remove(&self, key: &CacheKey) -> Option<PixelBuffer> {
        let mut state = self.lock();
        let buffer = state.entries.pop(key)?;
        state.size = state.size.saturating_sub(buffer.size_bytes());
        Some(buffer)
    }

    /// Clear all entries.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.size = 0;
    }

    /// Number of cached buffers.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Current total size of cached buffers in bytes.
    pub fn size(&self) -> usize {
        self.lock().size
    }

    /// Budget in bytes.
    pub fn capacity(&self) -> usize {
        self.max_size
    }
}

impl Default for MemoryTier {
    fn default() -> Self {
        Self::new()
    }
}
