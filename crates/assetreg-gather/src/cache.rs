//! Gather cache for skipping unchanged containers.

use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use dashmap::DashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Stamp {
    size: u64,
    modified: SystemTime,
}

impl Stamp {
    fn of(metadata: &Metadata) -> Self {
        Self {
            size: metadata.len(),
            modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        }
    }
}

/// Size and modification stamps of containers gathered so far.
///
/// Shared by every worker thread.
#[derive(Debug, Default)]
pub struct GatherCache {
    entries: DashMap<PathBuf, Stamp>,
}

impl GatherCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `path` was gathered before with the same size and mtime.
    pub fn is_unchanged(&self, path: &Path, metadata: &Metadata) -> bool {
        self.entries
            .get(path)
            .is_some_and(|stamp| *stamp == Stamp::of(metadata))
    }

    /// Remember the stamp of a successfully gathered container.
    pub fn record(&self, path: &Path, metadata: &Metadata) {
        self.entries.insert(path.to_path_buf(), Stamp::of(metadata));
    }

    /// Forget one container.
    pub fn invalidate(&self, path: &Path) {
        self.entries.remove(path);
    }

    /// Forget every container under `dir`.
    pub fn invalidate_prefix(&self, dir: &Path) {
        self.entries.retain(|path, _| !path.starts_with(dir));
    }

    /// Number of remembered containers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is remembered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forget everything.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_unchanged_until_modified() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("A.asset");
        fs::write(&file, "{}").unwrap();

        let cache = GatherCache::new();
        let meta = fs::metadata(&file).unwrap();
        assert!(!cache.is_unchanged(&file, &meta));
        cache.record(&file, &meta);
        assert!(cache.is_unchanged(&file, &meta));

        fs::write(&file, "{ \"assets\": [] }").unwrap();
        let meta = fs::metadata(&file).unwrap();
        assert!(!cache.is_unchanged(&file, &meta));
    }

    #[test]
    fn test_invalidate_prefix() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("Maps")).unwrap();
        let inner = temp.path().join("Maps/L1.asset");
        let outer = temp.path().join("B.asset");
        fs::write(&inner, "{}").unwrap();
        fs::write(&outer, "{}").unwrap();

        let cache = GatherCache::new();
        cache.record(&inner, &fs::metadata(&inner).unwrap());
        cache.record(&outer, &fs::metadata(&outer).unwrap());

        cache.invalidate_prefix(&temp.path().join("Maps"));
        assert_eq!(cache.len(), 1);
        cache.invalidate(&outer);
        assert!(cache.is_empty());
    }
}
