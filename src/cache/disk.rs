//! Durable disk tier with a crash-recoverable journal.
//!
//! # Layout
//!
//! ```text
//! <dir>/journal          append-only operation log
//! <dir>/journal.tmp      compaction scratch file
//! <dir>/<digest>         one committed blob per key
//! <dir>/<digest>.tmp     blob being written
//! ```
//!
//! # Write Protocol
//!
//! A blob is written to `<digest>.tmp`, then `DIRTY` is journaled, the temp
//! file is renamed over `<digest>` (and the directory synced), and
//! `CLEAN <digest> <size>` is journaled and synced. Readers only see blobs
//! whose `CLEAN` line was written, so a crash or power loss at any point
//! leaves either the previous blob or nothing.
//!
//! # Recovery
//!
//! [`DiskTier::open`] replays the journal, drops unfinished writes and blobs
//! whose length disagrees with the journal, deletes orphaned files, and
//! rewrites the journal if anything had to be repaired.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use lru::LruCache;
use tracing::{debug, error, info, warn};

use super::journal::{
    replay, sync_dir, DiskRecord, JournalOp, JournalWriter, ReplayReport, JOURNAL_FILE,
    JOURNAL_TMP_FILE,
};
use super::key::{is_digest, CacheKey};
use crate::error::CacheError;

/// Default disk quota: 10MB
pub const DEFAULT_DISK_QUOTA: u64 = 10 * 1024 * 1024;

/// Default minimum number of records written before compaction is considered.
pub const DEFAULT_COMPACT_MIN_RECORDS: u64 = 2000;

/// Default ratio of records written to live keys that triggers compaction.
pub const DEFAULT_COMPACT_RATIO: u64 = 2;

const TMP_SUFFIX: &str = ".tmp";

// =============================================================================
// Configuration
// =============================================================================

/// Disk tier settings.
#[derive(Debug, Clone)]
pub struct DiskConfig {
    /// Maximum total blob size in bytes
    pub quota_bytes: u64,

    /// Records written since the last compaction must reach this count...
    pub compact_min_records: u64,

    /// ...and exceed this multiple of the live key count before compacting.
    pub compact_ratio: u64,

    /// Written into the journal header. A journal written by another
    /// version is discarded on open.
    pub app_version: String,
}

impl DiskConfig {
    pub fn with_quota(quota_bytes: u64) -> Self {
        Self {
            quota_bytes,
            ..Self::default()
        }
    }
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            quota_bytes: DEFAULT_DISK_QUOTA,
            compact_min_records: DEFAULT_COMPACT_MIN_RECORDS,
            compact_ratio: DEFAULT_COMPACT_RATIO,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

// =============================================================================
// Disk Tier
// =============================================================================

/// Key → blob store on local storage.
///
/// `DiskTier` is single-writer: every method takes `&mut self`, and shared
/// use goes through a mutex so journal lines are appended in order.
pub struct DiskTier {
    dir: PathBuf,
    config: DiskConfig,

    /// Committed records in LRU order
    index: LruCache<String, DiskRecord>,

    /// Total committed blob size in bytes
    size: u64,

    /// `None` once the tier has been disabled
    journal: Option<JournalWriter>,

    /// Records written since the journal was last compacted
    records_since_compaction: u64,

    /// Last generation handed to a committed write
    generation: u64,
}

impl DiskTier {
    /// Open (or create) the disk tier in `dir`, recovering from the journal.
    ///
    /// Malformed journal lines are logged and skipped. Only failing to
    /// create the directory or write a fresh journal is an error.
    pub fn open(dir: impl Into<PathBuf>, config: DiskConfig) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let journal_path = dir.join(JOURNAL_FILE);
        let report = match fs::read(&journal_path) {
            Ok(raw) => {
                let contents = String::from_utf8_lossy(&raw);
                match replay(&contents, &config.app_version) {
                    Ok(report) => Some(report),
                    Err(e) => {
                        warn!(dir = %dir.display(), "Discarding disk cache: {}", e);
                        delete_cache_files(&dir)?;
                        None
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        let mut tier = Self {
            dir,
            config,
            index: LruCache::unbounded(),
            size: 0,
            journal: None,
            records_since_compaction: 0,
            generation: 0,
        };

        match report {
            Some(report) => tier.recover(report)?,
            None => {
                tier.journal = Some(JournalWriter::rewrite(
                    &tier.dir,
                    &tier.config.app_version,
                    &[],
                )?);
            }
        }

        tier.evict_to_quota();

        info!(
            dir = %tier.dir.display(),
            entries = tier.index.len(),
            size = tier.size,
            "Opened disk cache"
        );
        Ok(tier)
    }

    /// Rebuild the index from a replayed journal.
    fn recover(&mut self, report: ReplayReport) -> Result<(), CacheError> {
        for warning in &report.warnings {
            warn!(dir = %self.dir.display(), "Recovery warning: {}", warning);
        }

        let mut repaired = !report.warnings.is_empty() || !report.discarded.is_empty();

        for digest in &report.discarded {
            debug!(digest = digest.as_str(), "Discarding unfinished cache entry");
            remove_file_if_exists(&self.dir.join(digest));
            remove_file_if_exists(&self.tmp_path(digest));
        }

        for record in report.records {
            let path = self.dir.join(&record.blob_path);
            match fs::metadata(&path) {
                Ok(meta) if meta.len() == record.size_bytes => {
                    self.size += record.size_bytes;
                    self.index.push(record.digest.clone(), record);
                }
                Ok(meta) => {
                    warn!(
                        digest = record.digest.as_str(),
                        expected = record.size_bytes,
                        actual = meta.len(),
                        "Blob length does not match journal, discarding"
                    );
                    remove_file_if_exists(&path);
                    repaired = true;
                }
                Err(_) => {
                    warn!(
                        digest = record.digest.as_str(),
                        "Blob missing for committed record, discarding"
                    );
                    repaired = true;
                }
            }
        }

        self.delete_orphans()?;

        if repaired {
            self.rewrite_journal()?;
        } else {
            let live = self.index.len() as u64;
            self.journal = Some(JournalWriter::open_append(&self.dir, report.op_count)?);
            self.records_since_compaction = report.op_count.saturating_sub(live);
        }
        Ok(())
    }

    /// Delete temp files and blobs that no record points at.
    fn delete_orphans(&self) -> Result<(), CacheError> {
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };

            let orphan = match name.strip_suffix(TMP_SUFFIX) {
                Some(stem) => is_digest(stem),
                None => is_digest(name) && !self.index.contains(name),
            };
            if orphan {
                debug!(file = name, "Deleting orphaned cache file");
                remove_file_if_exists(&entry.path());
            }
        }
        Ok(())
    }

    /// Read the blob for `key`, marking it most recently used.
    ///
    /// A blob that cannot be read is dropped from the index and reported as
    /// a miss.
    pub fn get(&mut self, key: &CacheKey) -> Option<Bytes> {
        self.get_versioned(key).map(|(blob, _)| blob)
    }

    /// Like [`get`](Self::get), also returning the write generation of the
    /// blob. The generation changes whenever the key is written or removed.
    pub fn get_versioned(&mut self, key: &CacheKey) -> Option<(Bytes, u64)> {
        if self.journal.is_none() {
            return None;
        }
        let digest = key.digest();
        let record = self.index.get(&digest)?;
        let path = self.dir.join(&record.blob_path);
        let expected = record.size_bytes;
        let generation = record.generation;

        match fs::read(&path) {
            Ok(data) if data.len() as u64 == expected => Some((Bytes::from(data), generation)),
            Ok(data) => {
                warn!(
                    key = key.as_str(),
                    expected,
                    actual = data.len(),
                    "Blob changed on disk, dropping entry"
                );
                self.drop_record(&digest);
                None
            }
            Err(e) => {
                warn!(key = key.as_str(), "Failed to read blob: {}", e);
                self.drop_record(&digest);
                None
            }
        }
    }

    /// Whether a committed blob exists for `key`, without touching LRU order.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.journal.is_some() && self.index.contains(&key.digest())
    }

    /// Write generation of the committed blob for `key`, without touching
    /// LRU order. `None` if there is no blob.
    pub fn generation(&self, key: &CacheKey) -> Option<u64> {
        if self.journal.is_none() {
            return None;
        }
        self.index.peek(&key.digest()).map(|record| record.generation)
    }

    /// Store `blob` under `key`, replacing any previous blob.
    ///
    /// Evicts least-recently-used blobs afterwards if the quota is exceeded,
    /// and compacts the journal when enough redundant records piled up.
    pub fn put(&mut self, key: &CacheKey, blob: &[u8]) -> Result<(), CacheError> {
        if self.journal.is_none() {
            return Err(CacheError::Disabled);
        }
        let digest = key.digest();
        let tmp_path = self.tmp_path(&digest);
        let final_path = self.dir.join(&digest);

        if let Err(e) = write_synced(&tmp_path, blob) {
            remove_file_if_exists(&tmp_path);
            warn!(key = key.as_str(), "Failed to write blob: {}", e);
            return Err(e.into());
        }

        if let Err(e) = self.append(JournalOp::Dirty(digest.clone())) {
            remove_file_if_exists(&tmp_path);
            return Err(e);
        }

        if let Err(e) = fs::rename(&tmp_path, &final_path).and_then(|_| sync_dir(&self.dir)) {
            warn!(key = key.as_str(), "Failed to commit blob: {}", e);
            remove_file_if_exists(&tmp_path);
            remove_file_if_exists(&final_path);
            if let Some(old) = self.index.pop(&digest) {
                self.size = self.size.saturating_sub(old.size_bytes);
            }
            self.append(JournalOp::Remove(digest))?;
            return Err(e.into());
        }

        let size = blob.len() as u64;
        let sequence = self.append(JournalOp::Clean(digest.clone(), size))?;
        self.sync_journal()?;

        if let Some(old) = self.index.pop(&digest) {
            self.size = self.size.saturating_sub(old.size_bytes);
        }
        self.generation += 1;
        let mut record = DiskRecord::clean(digest.clone(), size, sequence);
        record.generation = self.generation;
        self.index.push(digest, record);
        self.size += size;

        self.evict_to_quota();
        self.compact_if_needed();
        Ok(())
    }

    /// Delete the blob for `key`. A missing blob is not an error.
    pub fn remove(&mut self, key: &CacheKey) -> Result<(), CacheError> {
        if self.journal.is_none() {
            return Ok(());
        }
        let digest = key.digest();
        if self.index.contains(&digest) {
            self.drop_record(&digest);
            self.compact_if_needed();
        }
        Ok(())
    }

    /// Delete every blob and start an empty journal.
    pub fn clear(&mut self) -> Result<(), CacheError> {
        if self.journal.is_none() {
            return Err(CacheError::Disabled);
        }
        self.index.clear();
        self.size = 0;
        self.journal = None;

        let result = delete_cache_files(&self.dir).and_then(|_| self.rewrite_journal());
        if let Err(ref e) = result {
            error!(dir = %self.dir.display(), "Failed to clear disk cache: {}", e);
        }
        result
    }

    /// Flush and sync the journal. The tier stays usable.
    pub fn close(&mut self) -> Result<(), CacheError> {
        if let Some(journal) = self.journal.as_mut() {
            journal.sync()?;
        }
        Ok(())
    }

    /// Remove a record, delete its blob and journal the removal.
    fn drop_record(&mut self, digest: &str) {
        if let Some(record) = self.index.pop(digest) {
            self.size = self.size.saturating_sub(record.size_bytes);
            remove_file_if_exists(&self.dir.join(&record.blob_path));
            // A failing journal disables the tier; nothing else to undo
            let _ = self.append(JournalOp::Remove(digest.to_string()));
        }
    }

    fn evict_to_quota(&mut self) {
        while self.size > self.config.quota_bytes {
            let Some((digest, _)) = self.index.peek_lru() else {
                break;
            };
            let digest = digest.clone();
            debug!(digest = digest.as_str(), "Evicting blob over disk quota");
            self.drop_record(&digest);
            if self.journal.is_none() {
                break;
            }
        }
    }

    fn compact_if_needed(&mut self) {
        let live = self.index.len() as u64;
        if self.records_since_compaction >= self.config.compact_min_records
            && self.records_since_compaction > live.saturating_mul(self.config.compact_ratio)
        {
            debug!(
                records = self.records_since_compaction,
                live, "Compacting disk cache journal"
            );
            // A failed rewrite has already disabled the tier
            let _ = self.rewrite_journal();
        }
    }

    /// Write a fresh journal holding one `CLEAN` line per live record.
    fn rewrite_journal(&mut self) -> Result<(), CacheError> {
        let mut records: Vec<DiskRecord> = self.index.iter().rev().map(|(_, r)| r.clone()).collect();
        for (sequence, record) in records.iter_mut().enumerate() {
            record.sequence = sequence as u64;
        }

        match JournalWriter::rewrite(&self.dir, &self.config.app_version, &records) {
            Ok(writer) => {
                self.index.clear();
                for record in records {
                    self.index.push(record.digest.clone(), record);
                }
                self.journal = Some(writer);
                self.records_since_compaction = 0;
                Ok(())
            }
            Err(e) => {
                self.disable(&e);
                Err(e.into())
            }
        }
    }

    /// Sync the journal so a committed `CLEAN` survives power loss.
    fn sync_journal(&mut self) -> Result<(), CacheError> {
        let journal = self.journal.as_mut().ok_or(CacheError::Disabled)?;
        if let Err(e) = journal.sync() {
            self.disable(&e);
            return Err(e.into());
        }
        Ok(())
    }

    fn append(&mut self, op: JournalOp) -> Result<u64, CacheError> {
        let journal = self.journal.as_mut().ok_or(CacheError::Disabled)?;
        match journal.append(&op) {
            Ok(sequence) => {
                self.records_since_compaction += 1;
                Ok(sequence)
            }
            Err(e) => {
                self.disable(&e);
                Err(e.into())
            }
        }
    }

    /// Stop using the disk for the rest of the session.
    fn disable(&mut self, cause: &io::Error) {
        error!(
            dir = %self.dir.display(),
            "Disk cache journal failed, disabling disk cache: {}",
            cause
        );
        self.journal = None;
        self.index.clear();
        self.size = 0;
    }

    fn tmp_path(&self, digest: &str) -> PathBuf {
        self.dir.join(format!("{}{}", digest, TMP_SUFFIX))
    }

    /// Number of committed blobs.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Total committed blob size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn quota(&self) -> u64 {
        self.config.quota_bytes
    }

    /// Whether a journal failure disabled the tier.
    pub fn is_disabled(&self) -> bool {
        self.journal.is_none()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

// =============================================================================
// File Helpers
// =============================================================================

fn write_synced(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(data)?;
    file.sync_all()
}

fn remove_file_if_exists(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), "Failed to delete cache file: {}", e);
        }
    }
}

/// Delete the journal files, blobs and temp files in `dir`. Other files are
/// left alone.
fn delete_cache_files(dir: &Path) -> Result<(), CacheError> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };

        let ours = name == JOURNAL_FILE
            || name == JOURNAL_TMP_FILE
            || is_digest(name)
            || name.strip_suffix(TMP_SUFFIX).is_some_and(is_digest);
        if ours {
            remove_file_if_exists(&entry.path());
        }
    }
    Ok(())
}
