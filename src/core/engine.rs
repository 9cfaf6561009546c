//! Synchronization engine: applies client change batches to a project tree
//! and keeps its file index and metadata in step.
//!
//! Batches are not transactional. Every uploaded file is written to a temp
//! file and renamed into place once verified, but a failure halfway through
//! a batch leaves the files handled before it committed.

use crate::config::StoreConfig;
use crate::core::cache::IndexCache;
use crate::core::checksum::{digest_hex, ChecksumProvider};
use crate::core::index::{FileIndex, FileInfo, ProjectFile};
use crate::core::lock::ProjectLocks;
use crate::core::scanner::{mtime_secs, FileScanner};
use crate::core::upload::UploadSource;
use crate::error::{Result, StoreError};
use crate::storage::{validate_path, MetadataStore, ProjectInfo, ProjectState};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::InspectReader;
use tracing::{debug, info, warn};

/// Upload staging directory inside the control directory
const TMP_DIR: &str = "tmp";

/// A file the client is about to send
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileUpdate {
    pub path: String,
    pub size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

/// One synchronization request: files to upload, then paths to remove
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeBatch {
    #[serde(default)]
    pub updates: Vec<FileUpdate>,
    #[serde(default)]
    pub removes: Vec<String>,
}

/// Project size after `batch`, computed from the index alone
pub fn projected_size(entries: &HashMap<String, FileInfo>, batch: &ChangeBatch) -> i64 {
    let mut sizes: HashMap<&str, i64> = entries
        .iter()
        .map(|(path, info)| (path.as_str(), info.size))
        .collect();
    for path in &batch.removes {
        sizes.remove(path.as_str());
    }
    for update in &batch.updates {
        sizes.insert(update.path.as_str(), update.size);
    }
    sizes.values().sum()
}

fn sorted(mut files: Vec<ProjectFile>) -> Vec<ProjectFile> {
    files.sort_by(|a, b| a.path.cmp(&b.path));
    files
}

pub struct SyncEngine {
    projects_root: PathBuf,
    control_dir: String,
    max_project_size: i64,
    metadata: Arc<dyn MetadataStore>,
    cache: Arc<IndexCache>,
    checksums: Arc<ChecksumProvider>,
    scanner: FileScanner,
    locks: ProjectLocks,
}

impl SyncEngine {
    pub fn new(
        config: &StoreConfig,
        metadata: Arc<dyn MetadataStore>,
        cache: Arc<IndexCache>,
        checksums: Arc<ChecksumProvider>,
    ) -> Self {
        Self {
            projects_root: config.projects_root.clone(),
            control_dir: config.control_dir.clone(),
            max_project_size: config.max_project_size,
            metadata,
            cache,
            checksums,
            scanner: FileScanner::new(&config.control_dir, &config.scan),
            locks: ProjectLocks::new(),
        }
    }

    fn project_dir(&self, project: &str) -> PathBuf {
        self.projects_root.join(project)
    }

    /// Rejects paths that could escape the project or touch its control files
    fn check_path(&self, path: &str) -> Result<()> {
        validate_path(path)?;
        if path == self.control_dir || path.starts_with(&format!("{}/", self.control_dir)) {
            return Err(StoreError::InvalidPath(path.to_string()));
        }
        Ok(())
    }

    /// Uploads `batch.updates` in order from `uploads`, then applies
    /// `batch.removes`. Returns the project listing afterwards.
    pub async fn apply_batch(
        &self,
        project: &str,
        batch: &ChangeBatch,
        uploads: &mut dyn UploadSource,
    ) -> Result<Vec<ProjectFile>> {
        let _guard = self.locks.acquire(project).await;
        let started = Instant::now();

        let mut info = self.metadata.get_info(project).await?;
        let index = self.cache.get(project).await?;

        for path in batch
            .updates
            .iter()
            .map(|u| u.path.as_str())
            .chain(batch.removes.iter().map(String::as_str))
        {
            self.check_path(path)?;
        }
        if let Some(update) = batch.updates.iter().find(|u| u.size < 0) {
            return Err(StoreError::IntegrityMismatch(format!(
                "{}: negative size {}",
                update.path, update.size
            )));
        }

        if !batch.updates.is_empty() && self.max_project_size > 0 {
            let projected = projected_size(&index.snapshot().await, batch);
            if projected > self.max_project_size {
                warn!(
                    project,
                    "rejecting batch: {} bytes over the {} byte limit",
                    projected,
                    self.max_project_size
                );
                return Err(StoreError::SizeLimitExceeded {
                    projected,
                    limit: self.max_project_size,
                });
            }
        }

        for update in &batch.updates {
            self.receive_file(project, &index, update, uploads).await?;
        }
        for path in &batch.removes {
            self.remove_path(project, &index, path).await?;
        }

        self.commit(project, &mut info, &index, !batch.updates.is_empty())
            .await?;
        info!(
            project,
            "applied batch: {} uploaded, {} removed in {:?}",
            batch.updates.len(),
            batch.removes.len(),
            started.elapsed()
        );
        Ok(sorted(index.listing().await))
    }

    /// Removes files or whole directories. Missing paths are not an error.
    pub async fn remove_files(&self, project: &str, paths: &[String]) -> Result<Vec<ProjectFile>> {
        let _guard = self.locks.acquire(project).await;

        let mut info = self.metadata.get_info(project).await?;
        let index = self.cache.get(project).await?;
        for path in paths {
            self.check_path(path)?;
        }

        for path in paths {
            self.remove_path(project, &index, path).await?;
        }
        self.commit(project, &mut info, &index, false).await?;
        Ok(sorted(index.listing().await))
    }

    /// Lists the files on disk. With `checksum`, hashes are served from the
    /// index while a file's mtime is unchanged and recomputed otherwise.
    pub async fn list_project_files(&self, project: &str, checksum: bool) -> Result<Vec<ProjectFile>> {
        let _guard = self.locks.acquire(project).await;

        if !self.metadata.exists(project).await {
            return Err(StoreError::NotFound(project.to_string()));
        }
        let index = self.cache.get(project).await?;
        let root = self.project_dir(project);
        let files = self.scanner.scan(&root).await?;

        let mut changed = false;
        let mut listing = Vec::with_capacity(files.len());
        for (path, file) in &files {
            let hash = if checksum {
                let cached = index
                    .get(path)
                    .await
                    .filter(|entry| entry.mtime == file.mtime);
                let hash = match cached {
                    Some(entry) => entry.hash,
                    None => {
                        debug!(project, path = %path, "rehashing changed file");
                        let hash = self.checksums.checksum(&root.join(path)).await?;
                        index
                            .set(
                                path,
                                FileInfo {
                                    hash: hash.clone(),
                                    size: file.size,
                                    mtime: file.mtime,
                                },
                            )
                            .await;
                        changed = true;
                        hash
                    }
                };
                Some(hash)
            } else {
                None
            };

            listing.push(ProjectFile {
                path: path.clone(),
                hash,
                size: file.size,
                mtime: file.mtime,
            });
        }

        let on_disk: HashSet<&str> = files.keys().map(String::as_str).collect();
        let purged = index.retain_paths(&on_disk).await;
        if purged > 0 {
            debug!(project, "dropped {} vanished files from the index", purged);
            changed = true;
        }

        if changed {
            self.save_snapshot(project, &index).await;
            let mut info = self.metadata.get_info(project).await?;
            info.size = index.total_size().await;
            self.metadata.save_info(project, &info).await?;
        }
        Ok(sorted(listing))
    }

    /// Forgets the project's cached index and deletes its tree
    pub async fn delete_project(&self, project: &str) -> Result<()> {
        let _guard = self.locks.acquire(project).await;
        self.cache.remove(project).await;
        self.metadata.delete(project).await
    }

    async fn receive_file(
        &self,
        project: &str,
        index: &FileIndex,
        update: &FileUpdate,
        uploads: &mut dyn UploadSource,
    ) -> Result<()> {
        let (path, reader) = uploads.next_file().await?.ok_or_else(|| {
            StoreError::IntegrityMismatch(format!("no content received for {}", update.path))
        })?;
        if path != update.path {
            return Err(StoreError::IntegrityMismatch(format!(
                "expected {}, received {}",
                update.path, path
            )));
        }

        let root = self.project_dir(project);
        let dest = root.join(&update.path);
        let tmp_dir = root.join(&self.control_dir).join(TMP_DIR);
        fs::create_dir_all(&tmp_dir)
            .await
            .map_err(|e| StoreError::io(format!("creating {}", tmp_dir.display()), e))?;

        // keep the file name so extension-based tools still recognize it
        let file_name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp_path = tmp_dir.join(format!("{}-{}", uuid::Uuid::new_v4(), file_name));
        let temp_guard = scopeguard::guard(temp_path.clone(), |path| {
            let _ = std::fs::remove_file(path);
        });
        let context = || format!("writing {}", dest.display());

        let strategy = self.checksums.strategy_for(&dest).clone();
        let mut hasher = blake3::Hasher::new();
        let written = {
            let mut file = fs::File::create(&temp_path)
                .await
                .map_err(|e| StoreError::io(context(), e))?;
            let streams = strategy.streams();
            let mut reader = InspectReader::new(reader, |chunk: &[u8]| {
                if streams {
                    hasher.update(chunk);
                }
            });
            let written = tokio::io::copy(&mut reader, &mut file)
                .await
                .map_err(|e| StoreError::io(context(), e))?;
            file.flush().await.map_err(|e| StoreError::io(context(), e))?;
            written as i64
        };

        if written != update.size {
            return Err(StoreError::IntegrityMismatch(format!(
                "{}: declared {} bytes, received {}",
                update.path, update.size, written
            )));
        }

        let hash = if strategy.streams() {
            digest_hex(&hasher)
        } else {
            strategy.checksum(&temp_path).await?
        };
        if let Some(expected) = &update.hash {
            if *expected != hash {
                return Err(StoreError::IntegrityMismatch(format!(
                    "{}: declared hash {}, computed {}",
                    update.path, expected, hash
                )));
            }
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(context(), e))?;
        }
        fs::rename(&temp_path, &dest)
            .await
            .map_err(|e| StoreError::io(context(), e))?;
        scopeguard::ScopeGuard::into_inner(temp_guard);

        let metadata = fs::metadata(&dest)
            .await
            .map_err(|e| StoreError::io(context(), e))?;
        let mtime = mtime_secs(&metadata).map_err(|e| StoreError::io(context(), e))?;

        index
            .set(
                &update.path,
                FileInfo {
                    hash,
                    size: update.size,
                    mtime,
                },
            )
            .await;
        debug!(project, path = %update.path, "stored {} bytes", written);
        Ok(())
    }

    async fn remove_path(&self, project: &str, index: &FileIndex, path: &str) -> Result<()> {
        let abs_path = self.project_dir(project).join(path);
        let context = || format!("removing {}", abs_path.display());

        match fs::symlink_metadata(&abs_path).await {
            Ok(meta) if meta.is_dir() => {
                fs::remove_dir_all(&abs_path)
                    .await
                    .map_err(|e| StoreError::io(context(), e))?;
                let removed = index.delete_dir(path).await;
                debug!(project, path, "removed directory with {} indexed files", removed);
            }
            Ok(_) => {
                match fs::remove_file(&abs_path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(StoreError::io(context(), e)),
                }
                index.delete(path).await;
                debug!(project, path, "removed file");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                index.delete(path).await;
                index.delete_dir(path).await;
                debug!(project, path, "already absent");
            }
            Err(e) => return Err(StoreError::io(context(), e)),
        }
        Ok(())
    }

    /// Saves the snapshot and the project record after a mutation. A snapshot
    /// failure only costs a rebuild later; a record failure is returned.
    async fn commit(
        &self,
        project: &str,
        info: &mut ProjectInfo,
        index: &FileIndex,
        uploaded: bool,
    ) -> Result<()> {
        self.save_snapshot(project, index).await;

        info.size = index.total_size().await;
        if uploaded && info.state == ProjectState::Empty {
            info.state.advance(ProjectState::Staged);
        }
        info.touch();
        self.metadata.save_info(project, info).await
    }

    async fn save_snapshot(&self, project: &str, index: &FileIndex) {
        if let Err(e) = self.cache.persist(project, index).await {
            warn!(project, "saving files index: {}", e);
        }
    }
}
