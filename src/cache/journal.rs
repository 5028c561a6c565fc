//! Append-only journal for the disk tier.
//!
//! # Format
//!
//! The journal is a text file. It starts with a four line header:
//!
//! ```text
//! pixel-loader.journal
//! 1
//! <application version>
//!
//! ```
//!
//! followed by one operation per line:
//!
//! - `DIRTY <digest>`: a blob write started
//! - `CLEAN <digest> <size>`: the blob was committed with `size` bytes
//! - `REMOVE <digest>`: the blob was deleted
//!
//! Lines are only ever appended. Replaying the file from the top rebuilds
//! the disk tier's index; the last operation for a digest wins. A `DIRTY`
//! with no later `CLEAN` or `REMOVE` marks a write that never finished.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use super::key::is_digest;
use crate::error::CacheError;

/// Journal file name inside the cache directory.
pub const JOURNAL_FILE: &str = "journal";

/// Scratch file written during compaction.
pub const JOURNAL_TMP_FILE: &str = "journal.tmp";

/// First header line.
pub const JOURNAL_MAGIC: &str = "pixel-loader.journal";

/// Second header line. Bump when the line format changes.
pub const JOURNAL_VERSION: &str = "1";

const DIRTY: &str = "DIRTY";
const CLEAN: &str = "CLEAN";
const REMOVE: &str = "REMOVE";

// =============================================================================
// Records
// =============================================================================

/// One journal operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalOp {
    Dirty(String),
    Clean(String, u64),
    Remove(String),
}

impl JournalOp {
    /// Digest the operation applies to.
    pub fn digest(&self) -> &str {
        match self {
            JournalOp::Dirty(d) | JournalOp::Clean(d, _) | JournalOp::Remove(d) => d,
        }
    }

    /// Parse one journal line (without the trailing newline).
    pub fn parse(line: &str) -> Result<Self, String> {
        let mut parts = line.split(' ');
        let op = parts.next().unwrap_or_default();
        let digest = parts
            .next()
            .filter(|d| is_digest(d))
            .ok_or_else(|| format!("missing or invalid digest in {:?}", line))?
            .to_string();

        let parsed = match op {
            DIRTY => JournalOp::Dirty(digest),
            REMOVE => JournalOp::Remove(digest),
            CLEAN => {
                let size = parts
                    .next()
                    .and_then(|s| s.parse::<u64>().ok())
                    .ok_or_else(|| format!("invalid size in {:?}", line))?;
                JournalOp::Clean(digest, size)
            }
            other => return Err(format!("unknown operation {:?}", other)),
        };

        if parts.next().is_some() {
            return Err(format!("trailing fields in {:?}", line));
        }
        Ok(parsed)
    }
}

impl fmt::Display for JournalOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JournalOp::Dirty(d) => write!(f, "{} {}", DIRTY, d),
            JournalOp::Clean(d, size) => write!(f, "{} {} {}", CLEAN, d, size),
            JournalOp::Remove(d) => write!(f, "{} {}", REMOVE, d),
        }
    }
}

/// Index entry for one blob in the disk tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskRecord {
    /// Key digest, also the blob file name
    pub digest: String,

    /// Blob path relative to the cache directory
    pub blob_path: PathBuf,

    /// Committed blob length in bytes
    pub size_bytes: u64,

    /// Journal position of the record's latest operation
    pub sequence: u64,

    /// A write was started but not committed
    pub dirty: bool,

    /// Write generation within the current session, not persisted
    pub generation: u64,
}

impl DiskRecord {
    pub fn clean(digest: String, size_bytes: u64, sequence: u64) -> Self {
        Self {
            blob_path: PathBuf::from(&digest),
            digest,
            size_bytes,
            sequence,
            dirty: false,
            generation: 0,
        }
    }
}

/// A journal line that could not be applied during replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryWarning {
    /// 1-based line number in the journal file
    pub line: usize,
    pub message: String,
}

impl fmt::Display for RecoveryWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "journal line {}: {}", self.line, self.message)
    }
}

/// Outcome of replaying a journal.
#[derive(Debug, Default)]
pub struct ReplayReport {
    /// Committed records, least recently written first
    pub records: Vec<DiskRecord>,

    /// Digests dropped during replay (unfinished writes, malformed lines)
    pub discarded: Vec<String>,

    pub warnings: Vec<RecoveryWarning>,

    /// Number of operation lines read, valid or not
    pub op_count: u64,
}

// =============================================================================
// Replay
// =============================================================================

fn header_lines(app_version: &str) -> [String; 4] {
    [
        JOURNAL_MAGIC.to_string(),
        JOURNAL_VERSION.to_string(),
        app_version.to_string(),
        String::new(),
    ]
}

/// Replay the journal text.
///
/// Fails only when the header does not match; bad operation lines become
/// [`RecoveryWarning`]s and the digest they name is left out of the index.
pub fn replay(contents: &str, app_version: &str) -> Result<ReplayReport, CacheError> {
    let mut lines = contents.split_inclusive('\n');

    for expected in header_lines(app_version) {
        let actual = lines.next().unwrap_or_default();
        if actual.strip_suffix('\n') != Some(expected.as_str()) {
            return Err(CacheError::JournalHeader(format!(
                "expected {:?}, found {:?}",
                expected,
                actual.trim_end()
            )));
        }
    }

    let mut report = ReplayReport::default();
    // digest -> (size if clean, sequence, dirty)
    let mut live: HashMap<String, (Option<u64>, u64, bool)> = HashMap::new();
    let mut excluded: HashSet<String> = HashSet::new();

    for (offset, raw) in lines.enumerate() {
        let line_number = offset + 5;
        let sequence = report.op_count;
        report.op_count += 1;

        let Some(line) = raw.strip_suffix('\n') else {
            report.warnings.push(RecoveryWarning {
                line: line_number,
                message: "truncated final line".to_string(),
            });
            exclude_named_digest(raw, &mut excluded);
            continue;
        };

        match JournalOp::parse(line) {
            Ok(JournalOp::Dirty(digest)) => {
                let size = live.get(&digest).and_then(|(size, _, _)| *size);
                live.insert(digest, (size, sequence, true));
            }
            Ok(JournalOp::Clean(digest, size)) => {
                live.insert(digest, (Some(size), sequence, false));
            }
            Ok(JournalOp::Remove(digest)) => {
                live.remove(&digest);
            }
            Err(message) => {
                report.warnings.push(RecoveryWarning {
                    line: line_number,
                    message,
                });
                exclude_named_digest(line, &mut excluded);
            }
        }
    }

    for (digest, (size, sequence, dirty)) in live {
        if dirty || excluded.contains(&digest) {
            report.discarded.push(digest);
            continue;
        }
        if let Some(size) = size {
            report.records.push(DiskRecord::clean(digest, size, sequence));
        }
    }
    for digest in excluded {
        if !report.discarded.contains(&digest) {
            report.discarded.push(digest);
        }
    }

    report.records.sort_by_key(|r| r.sequence);
    report.discarded.sort();
    Ok(report)
}

/// If a bad line still names a digest, keep that digest out of the index.
fn exclude_named_digest(line: &str, excluded: &mut HashSet<String>) {
    if let Some(token) = line.split(' ').nth(1) {
        let token = token.trim_end();
        if is_digest(token) {
            excluded.insert(token.to_string());
        }
    }
}

// =============================================================================
// Writer
// =============================================================================

/// Appends operations to the journal file.
///
/// Every append is flushed to the OS before it returns. The disk tier also
/// syncs after each `CLEAN`, so a committed write survives power loss.
pub struct JournalWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    next_sequence: u64,
}

impl JournalWriter {
    /// Open `dir/journal` for appending. `next_sequence` continues the
    /// numbering of the operations already in the file.
    pub fn open_append(dir: &Path, next_sequence: u64) -> io::Result<Self> {
        let path = dir.join(JOURNAL_FILE);
        let file = OpenOptions::new().append(true).create(true).open(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            next_sequence,
        })
    }

    /// Replace the journal with a header followed by a `CLEAN` line per
    /// record, then open it for appending.
    ///
    /// The new journal is written to `journal.tmp`, synced, and renamed over
    /// the old one, so a crash leaves either the old or the new journal.
    pub fn rewrite(dir: &Path, app_version: &str, records: &[DiskRecord]) -> io::Result<Self> {
        let tmp_path = dir.join(JOURNAL_TMP_FILE);
        {
            let mut tmp = BufWriter::new(File::create(&tmp_path)?);
            for line in header_lines(app_version) {
                writeln!(tmp, "{}", line)?;
            }
            for record in records {
                writeln!(
                    tmp,
                    "{}",
                    JournalOp::Clean(record.digest.clone(), record.size_bytes)
                )?;
            }
            tmp.flush()?;
            tmp.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, dir.join(JOURNAL_FILE))?;
        sync_dir(dir)?;
        Self::open_append(dir, records.len() as u64)
    }

    /// Append one operation and return its sequence number.
    pub fn append(&mut self, op: &JournalOp) -> io::Result<u64> {
        writeln!(self.writer, "{}", op)?;
        self.writer.flush()?;
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        Ok(sequence)
    }

    /// Flush and fsync the journal file.
    pub fn sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Fsync a directory so renames inside it are durable.
#[cfg(unix)]
pub(crate) fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

/// Directories cannot be opened for syncing here; renames are left to the OS.
#[cfg(not(unix))]
pub(crate) fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}
