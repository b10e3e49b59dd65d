//! Per-accessor table cache.
//!
//! Entries are keyed by dataset category and validated against the resolved
//! path plus the file's modification time and size. There is no eviction
//! besides [`Cache::clear`] and no locking: the owning accessor takes `&mut self`.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use super::layout::DatasetCategory;
use super::model::NamedArrayTable;

/// What a cached table was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStamp {
    pub modified: Option<SystemTime>,
    pub len: u64,
}

impl FileStamp {
    pub fn of(path: &Path) -> io::Result<Self> {
        let meta = fs::metadata(path)?;
        Ok(Self {
            modified: meta.modified().ok(),
            len: meta.len(),
        })
    }
}

#[derive(Debug)]
struct CacheEntry {
    path: PathBuf,
    stamp: FileStamp,
    table: Arc<NamedArrayTable>,
}

#[derive(Debug, Default)]
pub struct Cache {
    entries: HashMap<DatasetCategory, CacheEntry>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached table if it was loaded from `path` with an identical stamp.
    pub fn get(
        &self,
        category: DatasetCategory,
        path: &Path,
        stamp: FileStamp,
    ) -> Option<Arc<NamedArrayTable>> {
        self.entries
            .get(&category)
            .filter(|e| e.path == path && e.stamp == stamp)
            .map(|e| Arc::clone(&e.table))
    }

    /// Store a table, replacing any previous entry for the category.
    pub fn insert(
        &mut self,
        category: DatasetCategory,
        path: PathBuf,
        stamp: FileStamp,
        table: NamedArrayTable,
    ) -> Arc<NamedArrayTable> {
        let table = Arc::new(table);
        self.entries.insert(
            category,
            CacheEntry {
                path,
                stamp,
                table: Arc::clone(&table),
            },
        );
        table
    }

    pub fn invalidate(&mut self, category: DatasetCategory) {
        self.entries.remove(&category);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
