use crate::config::ScanConfig;
use crate::error::{Result, StoreError};
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};
use walkdir::WalkDir;

/// Size and mtime of a file found on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScannedFile {
    pub size: i64,
    pub mtime: i64,
}

/// Modification time in Unix seconds (negative before the epoch)
pub fn mtime_secs(metadata: &std::fs::Metadata) -> std::io::Result<i64> {
    let modified = metadata.modified()?;
    Ok(chrono::DateTime::<chrono::Utc>::from(modified).timestamp())
}

/// Turns a path relative to the project root into the index key form (`/` separated)
pub fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Project tree scanner
#[derive(Debug, Clone)]
pub struct FileScanner {
    control_dir: String,
    backup_suffix: String,
    excluded: Option<Regex>,
}

impl FileScanner {
    pub fn new(control_dir: &str, config: &ScanConfig) -> Self {
        let excluded = if config.excluded_extensions.is_empty() {
            None
        } else {
            let alternatives: Vec<String> = config
                .excluded_extensions
                .iter()
                .map(|ext| regex::escape(ext.trim_start_matches('.')))
                .collect();
            // escaped alternatives always form a valid pattern
            Regex::new(&format!(r"(?i)\.({})$", alternatives.join("|"))).ok()
        };

        Self {
            control_dir: control_dir.trim_matches('/').to_string(),
            backup_suffix: config.backup_suffix.clone(),
            excluded,
        }
    }

    /// Whether a relative path is kept out of listings and the index
    pub fn should_exclude(&self, rel_path: &str) -> bool {
        if rel_path == self.control_dir || rel_path.starts_with(&format!("{}/", self.control_dir)) {
            return true;
        }
        if !self.backup_suffix.is_empty() && rel_path.ends_with(&self.backup_suffix) {
            return true;
        }
        self.excluded
            .as_ref()
            .map(|re| re.is_match(rel_path))
            .unwrap_or(false)
    }

    /// Walks the project tree and returns every regular file that is not excluded.
    /// Any walk error aborts the scan.
    pub async fn scan(&self, root: &Path) -> Result<HashMap<String, ScannedFile>> {
        let scanner = self.clone();
        let root = root.to_path_buf();
        tokio::task::spawn_blocking(move || scanner.scan_blocking(&root))
            .await
            .map_err(|e| StoreError::other("scan task", e))?
    }

    fn scan_blocking(&self, root: &Path) -> Result<HashMap<String, ScannedFile>> {
        let scan_error = |e: std::io::Error| StoreError::io(format!("scanning {}", root.display()), e);

        let mut files = HashMap::new();
        let mut excluded_count = 0usize;

        let walker = WalkDir::new(root)
            .follow_links(false)
            .min_depth(1)
            .into_iter()
            // don't descend into the control directory at all
            .filter_entry(|entry| {
                !(entry.depth() == 1
                    && entry.file_type().is_dir()
                    && entry.file_name().to_str() == Some(self.control_dir.as_str()))
            });

        for entry in walker {
            let entry = entry.map_err(|e| scan_error(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let rel_path = match entry.path().strip_prefix(root) {
                Ok(p) => normalize_path(p),
                Err(_) => continue,
            };

            if self.should_exclude(&rel_path) {
                debug!("excluded: {}", rel_path);
                excluded_count += 1;
                continue;
            }

            let metadata = entry.metadata().map_err(|e| scan_error(e.into()))?;
            files.insert(
                rel_path,
                ScannedFile {
                    size: metadata.len() as i64,
                    mtime: mtime_secs(&metadata).map_err(scan_error)?,
                },
            );
        }

        info!(
            "scanned {:?}: {} files, {} excluded",
            root,
            files.len(),
            excluded_count
        );
        Ok(files)
    }
}

impl Default for FileScanner {
    fn default() -> Self {
        Self::new(".gisquick", &ScanConfig::default())
    }
}
