//! Crash recovery integration tests.
//!
//! Each test builds a disk cache, damages it the way a crash or a bad disk
//! would, and reopens it through [`Cache::init_disk`]. Damaged entries must
//! read as misses without errors; intact entries must survive.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use tempfile::TempDir;

use pixel_loader::cache::{
    Cache, CacheKey, DiskConfig, DiskTier, MemoryTier, DISK_CACHE_DIR, JOURNAL_FILE,
};
use pixel_loader::decode::PixelBuffer;

use super::test_utils::gradient;

fn open(root: &TempDir) -> Cache {
    let cache = Cache::new(MemoryTier::with_capacity(1024 * 1024), DiskConfig::default());
    assert!(cache.init_disk(root.path()));
    cache
}

fn disk_dir(root: &TempDir) -> PathBuf {
    root.path().join(DISK_CACHE_DIR)
}

fn append_journal(root: &TempDir, text: &str) {
    let mut journal = OpenOptions::new()
        .append(true)
        .open(disk_dir(root).join(JOURNAL_FILE))
        .unwrap();
    journal.write_all(text.as_bytes()).unwrap();
}

fn seed(root: &TempDir, names: &[&str]) {
    let cache = open(root);
    for name in names {
        let buffer = PixelBuffer::from_rgba(gradient(12, 12), "image/png");
        cache.store(&CacheKey::new(*name), buffer, "image/png", 100);
    }
    cache.close();
}

#[test]
fn test_trailing_dirty_without_blob() {
    let root = TempDir::new().unwrap();
    seed(&root, &["kept"]);

    let lost = CacheKey::new("lost");
    append_journal(&root, &format!("DIRTY {}\n", lost.digest()));

    let cache = open(&root);
    assert!(cache.lookup(&lost).is_none());
    assert!(cache.lookup(&CacheKey::new("kept")).is_some());
}

#[test]
fn test_dirty_with_partial_temp_file() {
    let root = TempDir::new().unwrap();
    seed(&root, &["kept"]);

    let lost = CacheKey::new("lost");
    let tmp = disk_dir(&root).join(format!("{}.tmp", lost.digest()));
    fs::write(&tmp, b"\x89PNG partial").unwrap();
    append_journal(&root, &format!("DIRTY {}\n", lost.digest()));

    let cache = open(&root);
    assert!(cache.lookup(&lost).is_none());
    assert!(!tmp.exists());
}

#[test]
fn test_interrupted_overwrite_drops_entry() {
    let root = TempDir::new().unwrap();
    seed(&root, &["img"]);

    // Crash between DIRTY and CLEAN of a rewrite
    let key = CacheKey::new("img");
    append_journal(&root, &format!("DIRTY {}\n", key.digest()));

    let cache = open(&root);
    assert!(cache.lookup(&key).is_none());
    assert!(!disk_dir(&root).join(key.digest()).exists());
}

#[test]
fn test_truncated_blob() {
    let root = TempDir::new().unwrap();
    seed(&root, &["short", "fine"]);

    let blob = disk_dir(&root).join(CacheKey::new("short").digest());
    let data = fs::read(&blob).unwrap();
    fs::write(&blob, &data[..data.len() / 2]).unwrap();

    let cache = open(&root);
    assert!(cache.lookup(&CacheKey::new("short")).is_none());
    assert!(cache.lookup(&CacheKey::new("fine")).is_some());
}

#[test]
fn test_truncated_journal_line() {
    let root = TempDir::new().unwrap();
    seed(&root, &["fine"]);

    let partial = CacheKey::new("partial");
    append_journal(&root, &format!("CLEAN {} 12", partial.digest()));

    let cache = open(&root);
    assert!(cache.lookup(&partial).is_none());
    assert!(cache.lookup(&CacheKey::new("fine")).is_some());
}

#[test]
fn test_garbage_lines_are_skipped() {
    let root = TempDir::new().unwrap();
    seed(&root, &["a", "b"]);

    append_journal(&root, "NONSENSE\n\nCLEAN zz 1\n");

    let cache = open(&root);
    assert!(cache.lookup(&CacheKey::new("a")).is_some());
    assert!(cache.lookup(&CacheKey::new("b")).is_some());
}

#[test]
fn test_blob_corrupted_in_place() {
    let root = TempDir::new().unwrap();
    seed(&root, &["img"]);

    // Same length, garbage content: passes the length check, fails to decode
    let blob = disk_dir(&root).join(CacheKey::new("img").digest());
    let len = fs::metadata(&blob).unwrap().len() as usize;
    fs::write(&blob, vec![0u8; len]).unwrap();

    let cache = open(&root);
    assert!(cache.lookup(&CacheKey::new("img")).is_none());
    assert_eq!(cache.stats().disk_entries, 0);
}

#[test]
fn test_recovery_rewrites_journal() {
    let root = TempDir::new().unwrap();
    seed(&root, &["kept"]);

    let lost = CacheKey::new("lost");
    append_journal(&root, &format!("DIRTY {}\n", lost.digest()));
    drop(open(&root));

    let journal = fs::read_to_string(disk_dir(&root).join(JOURNAL_FILE)).unwrap();
    assert!(!journal.contains(&lost.digest()));

    // A second recovery has nothing left to repair
    let tier = DiskTier::open(disk_dir(&root), DiskConfig::default()).unwrap();
    assert_eq!(tier.len(), 1);
}

#[test]
fn test_unreadable_journal_header_starts_empty() {
    let root = TempDir::new().unwrap();
    seed(&root, &["img"]);

    fs::write(disk_dir(&root).join(JOURNAL_FILE), b"\0\0\0garbage").unwrap();

    let cache = open(&root);
    assert!(cache.lookup(&CacheKey::new("img")).is_none());
    assert_eq!(cache.stats().disk_entries, 0);

    // The fresh cache is usable
    let buffer = PixelBuffer::from_rgba(gradient(4, 4), "image/png");
    cache.store(&CacheKey::new("new"), buffer, "image/png", 100);
    assert_eq!(cache.stats().disk_entries, 1);
}
