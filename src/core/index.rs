//! In-memory file index: relative path -> last known checksum, size and mtime

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

/// Last known identity of one project file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub hash: String,
    pub size: i64,
    /// Modification time, Unix seconds
    pub mtime: i64,
}

/// One row of a project file listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectFile {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    pub size: i64,
    pub mtime: i64,
}

/// Path -> FileInfo map guarded by a single lock.
///
/// Callers do their filesystem and hashing work outside of this type and only
/// publish results through `set`/`delete`, so the lock is never held across I/O.
#[derive(Debug, Default)]
pub struct FileIndex {
    entries: RwLock<HashMap<String, FileInfo>>,
}

impl FileIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(entries: HashMap<String, FileInfo>) -> Self {
        Self {
            entries: RwLock::new(entries),
        }
    }

    pub async fn get(&self, path: &str) -> Option<FileInfo> {
        self.entries.read().await.get(path).cloned()
    }

    pub async fn set(&self, path: &str, info: FileInfo) {
        self.entries.write().await.insert(path.to_string(), info);
    }

    pub async fn delete(&self, path: &str) {
        self.entries.write().await.remove(path);
    }

    /// Removes every entry nested under `dir`. Only paths starting with
    /// `dir + "/"` match, so `a/bx` survives `delete_dir("a/b")`.
    pub async fn delete_dir(&self, dir: &str) -> usize {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|path, _| !path.starts_with(&prefix));
        before - entries.len()
    }

    /// Drops entries whose path is not in `keep`, returning how many were removed.
    pub async fn retain_paths(&self, keep: &HashSet<&str>) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|path, _| keep.contains(path.as_str()));
        before - entries.len()
    }

    pub async fn total_size(&self) -> i64 {
        self.entries.read().await.values().map(|info| info.size).sum()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Cloned copy of the whole map, used for snapshots and size projections
    pub async fn snapshot(&self) -> HashMap<String, FileInfo> {
        self.entries.read().await.clone()
    }

    pub async fn listing(&self) -> Vec<ProjectFile> {
        self.entries
            .read()
            .await
            .iter()
            .map(|(path, info)| ProjectFile {
                path: path.clone(),
                hash: Some(info.hash.clone()),
                size: info.size,
                mtime: info.mtime,
            })
            .collect()
    }
}
