use std::sync::Arc;

pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod storage;

pub use config::StoreConfig;
pub use core::{ChangeBatch, FileUpdate, ProjectFile, SyncEngine};
pub use error::{Result, StoreError};
pub use storage::{LocalProjectStore, MetadataStore, ProjectInfo, ProjectState};

use crate::core::{ChecksumProvider, IndexCache};

/// Services shared by every request handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<StoreConfig>,
    pub store: Arc<LocalProjectStore>,
    pub cache: Arc<IndexCache>,
    pub engine: Arc<SyncEngine>,
}

impl AppState {
    pub fn new(config: StoreConfig) -> Self {
        let checksums = Arc::new(ChecksumProvider::from_config(&config.checksum));
        let store = Arc::new(LocalProjectStore::new(
            config.projects_root.clone(),
            &config.control_dir,
        ));
        let cache = Arc::new(IndexCache::from_config(&config, checksums.clone()));
        let engine = Arc::new(SyncEngine::new(
            &config,
            store.clone(),
            cache.clone(),
            checksums,
        ));

        Self {
            config: Arc::new(config),
            store,
            cache,
            engine,
        }
    }

    /// Starts the background tasks of the index cache
    pub fn start(&self) {
        tracing::info!(
            "project store at {:?} (size limit: {})",
            self.config.projects_root,
            self.config.max_project_size
        );
        self.cache.start();
    }

    /// Flushes cached indexes and stops background tasks (call on shutdown)
    pub async fn cleanup(&self) {
        tracing::info!("shutting down project store");
        if let Err(e) = self.cache.shutdown().await {
            tracing::error!("flushing file indexes: {}", e);
        }
        tracing::info!("shutdown complete");
    }
}
