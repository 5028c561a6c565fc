use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use image::ImageFormat;

use crate::cache::CacheKey;
use crate::decode::{FileSource, ImageSource};

/// Ordered `(key, source)` pairs with positional access.
///
/// Positions are stable: entries are only appended, so an index handed out
/// to a caller keeps naming the same image.
#[derive(Clone, Default)]
pub struct SourceList {
    entries: Vec<(CacheKey, Arc<dyn ImageSource>)>,
}

impl SourceList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every file in `dir` with a recognized image extension, sorted by
    /// path. Keys are the file paths.
    pub fn from_dir(dir: impl AsRef<Path>) -> io::Result<Self> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() && ImageFormat::from_path(&path).is_ok() {
                paths.push(path);
            }
        }
        paths.sort();

        let mut list = Self::new();
        for path in paths {
            let key = CacheKey::new(path.display().to_string());
            list.push(key, Arc::new(FileSource::new(path)));
        }
        Ok(list)
    }

    pub fn push(&mut self, key: CacheKey, source: Arc<dyn ImageSource>) {
        self.entries.push((key, source));
    }

    /// Entry at `index`.
    pub fn get(&self, index: usize) -> Option<(&CacheKey, &Arc<dyn ImageSource>)> {
        self.entries.get(index).map(|(key, source)| (key, source))
    }

    pub fn key_at(&self, index: usize) -> Option<&CacheKey> {
        self.entries.get(index).map(|(key, _)| key)
    }

    pub fn source_at(&self, index: usize) -> Option<&Arc<dyn ImageSource>> {
        self.entries.get(index).map(|(_, source)| source)
    }

    /// Index of the first entry with `key`.
    pub fn position(&self, key: &CacheKey) -> Option<usize> {
        self.entries.iter().position(|(k, _)| k == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CacheKey, &Arc<dyn ImageSource>)> {
        self.entries.iter().map(|(key, source)| (key, source))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
