//! Per-project index cache
//!
//! Indexes are loaded lazily, from the snapshot in the project's control
//! directory or, when there is none, by rescanning and rehashing the tree.
//! Entries live for a fixed TTL counted from creation; reads do not extend it.
//! Expired entries are handed to a persistence worker through a queue so a
//! slow snapshot write never holds up the sweep.

use crate::config::StoreConfig;
use crate::core::checksum::ChecksumProvider;
use crate::core::index::{FileIndex, FileInfo};
use crate::core::lock::ProjectLocks;
use crate::core::scanner::FileScanner;
use crate::error::{Result, StoreError};
use crate::storage::write_json_atomic;
use futures::{StreamExt, TryStreamExt};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Snapshot file name inside the control directory
pub const SNAPSHOT_FILE: &str = "filesmap.json";

/// Files hashed at once during a full rebuild
const REHASH_CONCURRENCY: usize = 4;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============ Snapshots ============

/// Reads a snapshot; `Ok(None)` when the file does not exist
pub async fn read_snapshot(path: &Path) -> Result<Option<HashMap<String, FileInfo>>> {
    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::io(format!("reading {}", path.display()), e)),
    };
    serde_json::from_slice(&data)
        .map(Some)
        .map_err(|e| StoreError::io(format!("parsing {}", path.display()), e.into()))
}

/// Writes a snapshot into an existing control directory. A missing directory
/// is `NotFound`, so a late write never brings back a deleted project.
pub async fn write_snapshot(path: &Path, index: &FileIndex) -> Result<()> {
    if let Some(dir) = path.parent() {
        if !tokio::fs::try_exists(dir).await.unwrap_or(false) {
            return Err(StoreError::NotFound(dir.display().to_string()));
        }
    }
    let entries = index.snapshot().await;
    write_json_atomic(path, &entries).await
}

// ============ Loader ============

/// Builds a project's index from its snapshot or from the files on disk
pub struct IndexLoader {
    projects_root: PathBuf,
    control_dir: String,
    scanner: FileScanner,
    checksums: Arc<ChecksumProvider>,
}

impl IndexLoader {
    pub fn new(config: &StoreConfig, scanner: FileScanner, checksums: Arc<ChecksumProvider>) -> Self {
        Self {
            projects_root: config.projects_root.clone(),
            control_dir: config.control_dir.clone(),
            scanner,
            checksums,
        }
    }

    pub fn snapshot_path(&self, project: &str) -> PathBuf {
        self.projects_root
            .join(project)
            .join(&self.control_dir)
            .join(SNAPSHOT_FILE)
    }

    pub async fn load(&self, project: &str) -> Result<FileIndex> {
        info!(project, "loading files index");
        match read_snapshot(&self.snapshot_path(project)).await {
            Ok(Some(entries)) => return Ok(FileIndex::from_map(entries)),
            Ok(None) => info!(project, "no index snapshot, rebuilding"),
            Err(e) => warn!(project, "unusable index snapshot, rebuilding: {}", e),
        }
        self.rebuild(project).await
    }

    /// Scans the project and hashes every file it finds
    pub async fn rebuild(&self, project: &str) -> Result<FileIndex> {
        let root = self.projects_root.join(project);
        let files = self.scanner.scan(&root).await?;
        let started = Instant::now();

        let entries: HashMap<String, FileInfo> = futures::stream::iter(files)
            .map(|(path, file)| {
                let abs_path = root.join(&path);
                async move {
                    let hash = self.checksums.checksum(&abs_path).await?;
                    Ok::<_, StoreError>((
                        path,
                        FileInfo {
                            hash,
                            size: file.size,
                            mtime: file.mtime,
                        },
                    ))
                }
            })
            .buffer_unordered(REHASH_CONCURRENCY)
            .try_collect()
            .await?;

        info!(
            project,
            "rebuilt files index: {} files in {:?}",
            entries.len(),
            started.elapsed()
        );
        Ok(FileIndex::from_map(entries))
    }
}

// ============ Cache ============

struct Slot {
    created: Instant,
    cell: Arc<OnceCell<Arc<FileIndex>>>,
}

impl Slot {
    fn is_expired(&self, ttl: Duration) -> bool {
        // entries still loading are never expired
        self.cell.initialized() && self.created.elapsed() >= ttl
    }
}

struct Shared {
    ttl: Duration,
    loader: IndexLoader,
    slots: Mutex<HashMap<String, Slot>>,
    /// Expired indexes not yet written by the worker. A miss adopts them
    /// instead of reading a snapshot that may be behind.
    evicted: Mutex<HashMap<String, Arc<FileIndex>>>,
    persist_tx: mpsc::UnboundedSender<String>,
    /// Serializes snapshot writes per project; each write takes its copy of
    /// the index under this lock, so a later write never carries older state.
    writes: ProjectLocks,
}

enum Lookup {
    Ready(Arc<FileIndex>),
    Load(Arc<OnceCell<Arc<FileIndex>>>),
}

impl Shared {
    fn slot_for(&self, project: &str) -> Lookup {
        let mut slots = lock(&self.slots);
        if let Some(slot) = slots.get(project) {
            if !self.evictable(project, slot) {
                // cloned under the slots lock so the sweep sees this holder
                return match slot.cell.get() {
                    Some(index) => Lookup::Ready(index.clone()),
                    None => Lookup::Load(slot.cell.clone()),
                };
            }
            if let Some(slot) = slots.remove(project) {
                self.evict(project, slot);
            }
        }

        let cell = Arc::new(OnceCell::new());
        slots.insert(
            project.to_string(),
            Slot {
                created: Instant::now(),
                cell: cell.clone(),
            },
        );
        Lookup::Load(cell)
    }

    /// Expired and not held by any operation. Idle holders are the slot
    /// itself plus the pending-eviction entry when it is the same index.
    fn evictable(&self, project: &str, slot: &Slot) -> bool {
        if !slot.is_expired(self.ttl) {
            return false;
        }
        let Some(index) = slot.cell.get() else {
            return false;
        };
        let pending = lock(&self.evicted)
            .get(project)
            .is_some_and(|p| Arc::ptr_eq(p, index));
        Arc::strong_count(index) <= 1 + usize::from(pending)
    }

    async fn save(&self, project: &str, index: &FileIndex) -> Result<()> {
        let _guard = self.writes.acquire(project).await;
        write_snapshot(&self.loader.snapshot_path(project), index).await
    }

    async fn load(&self, project: &str) -> Result<Arc<FileIndex>> {
        let adopted = lock(&self.evicted).get(project).cloned();
        if let Some(index) = adopted {
            debug!(project, "reusing evicted index");
            return Ok(index);
        }
        Ok(Arc::new(self.loader.load(project).await?))
    }

    fn discard_failed(&self, project: &str, cell: &Arc<OnceCell<Arc<FileIndex>>>) {
        let mut slots = lock(&self.slots);
        let failed = slots
            .get(project)
            .is_some_and(|slot| Arc::ptr_eq(&slot.cell, cell) && !slot.cell.initialized());
        if failed {
            slots.remove(project);
        }
    }

    /// Queues an expired slot for persistence. Never touches the disk.
    fn evict(&self, project: &str, slot: Slot) {
        let Some(index) = slot.cell.get() else {
            return;
        };
        lock(&self.evicted).insert(project.to_string(), index.clone());
        if self.persist_tx.send(project.to_string()).is_err() {
            warn!(project, "persistence queue closed, evicted index not saved");
        }
    }

    fn sweep(&self) -> usize {
        let mut slots = lock(&self.slots);
        let expired: Vec<String> = slots
            .iter()
            .filter(|(project, slot)| self.evictable(project, slot))
            .map(|(project, _)| project.clone())
            .collect();
        for project in &expired {
            if let Some(slot) = slots.remove(project) {
                self.evict(project, slot);
            }
        }
        expired.len()
    }

    async fn persist_evicted(&self, project: &str) {
        let Some(index) = lock(&self.evicted).get(project).cloned() else {
            return;
        };
        match self.save(project, &index).await {
            Ok(()) => info!(project, "saved evicted files index"),
            Err(e) if e.is_not_found() => debug!(project, "project gone, evicted index dropped"),
            Err(e) => error!(project, "saving files index: {}", e),
        }

        let mut evicted = lock(&self.evicted);
        if evicted
            .get(project)
            .is_some_and(|pending| Arc::ptr_eq(pending, &index))
        {
            evicted.remove(project);
        }
    }
}

/// Process-wide cache of project file indexes
pub struct IndexCache {
    shared: Arc<Shared>,
    sweep_interval: Duration,
    persist_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl IndexCache {
    pub fn new(loader: IndexLoader, ttl: Duration, sweep_interval: Duration) -> Self {
        let (persist_tx, persist_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                ttl,
                loader,
                slots: Mutex::new(HashMap::new()),
                evicted: Mutex::new(HashMap::new()),
                persist_tx,
                writes: ProjectLocks::new(),
            }),
            sweep_interval,
            persist_rx: Mutex::new(Some(persist_rx)),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn from_config(config: &StoreConfig, checksums: Arc<ChecksumProvider>) -> Self {
        let scanner = FileScanner::new(&config.control_dir, &config.scan);
        Self::new(
            IndexLoader::new(config, scanner, checksums),
            config.index.ttl(),
            config.index.sweep_interval(),
        )
    }

    /// Spawns the expiry sweep and the persistence worker
    pub fn start(&self) {
        let Some(mut persist_rx) = lock(&self.persist_rx).take() else {
            warn!("index cache already started");
            return;
        };

        let shared = self.shared.clone();
        let cancel = self.cancel.clone();
        let interval = self.sweep_interval;
        let sweeper = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let expired = shared.sweep();
                        if expired > 0 {
                            debug!("expired {} cached indexes", expired);
                        }
                    }
                }
            }
        });

        let shared = self.shared.clone();
        let cancel = self.cancel.clone();
        let worker = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    Some(project) = persist_rx.recv() => shared.persist_evicted(&project).await,
                    _ = cancel.cancelled() => {
                        // drain what was already evicted before stopping
                        while let Ok(project) = persist_rx.try_recv() {
                            shared.persist_evicted(&project).await;
                        }
                        break;
                    }
                }
            }
        });

        lock(&self.tasks).extend([sweeper, worker]);
        info!(
            "index cache started (ttl {:?}, sweep every {:?})",
            self.shared.ttl, self.sweep_interval
        );
    }

    /// Live index of a project, loading it when absent or expired.
    /// Concurrent callers share one load; a failed load is not cached.
    pub async fn get(&self, project: &str) -> Result<Arc<FileIndex>> {
        let cell = match self.shared.slot_for(project) {
            Lookup::Ready(index) => return Ok(index),
            Lookup::Load(cell) => cell,
        };
        let result = cell
            .get_or_try_init(|| self.shared.load(project))
            .await
            .cloned();
        if result.is_err() {
            self.shared.discard_failed(project, &cell);
        }
        result
    }

    /// Writes a project's index snapshot now, ordered with the worker's writes
    pub async fn persist(&self, project: &str, index: &FileIndex) -> Result<()> {
        self.shared.save(project, index).await
    }

    /// Drops a project's entry without persisting it. Waits for a snapshot
    /// write already in progress, so none lands after this returns.
    pub async fn remove(&self, project: &str) {
        let _guard = self.shared.writes.acquire(project).await;
        lock(&self.shared.slots).remove(project);
        lock(&self.shared.evicted).remove(project);
    }

    /// Collects expired entries immediately instead of waiting for the sweep
    pub fn expire_now(&self) -> usize {
        self.shared.sweep()
    }

    pub fn len(&self) -> usize {
        lock(&self.shared.slots).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Persists every live and every evicted-but-unsaved index. All are
    /// attempted; the first failure is returned.
    pub async fn flush_all(&self) -> Result<usize> {
        let mut pending: HashMap<String, Arc<FileIndex>> = lock(&self.shared.evicted).clone();
        {
            let slots = lock(&self.shared.slots);
            for (project, slot) in slots.iter() {
                if let Some(index) = slot.cell.get() {
                    pending.insert(project.clone(), index.clone());
                }
            }
        }

        let mut first_error = None;
        let mut saved = 0;
        for (project, index) in &pending {
            match self.persist(project, index).await {
                Ok(()) => saved += 1,
                Err(e) => {
                    error!(project = %project, "flushing files index: {}", e);
                    first_error.get_or_insert(e);
                }
            }
        }
        info!("flushed {} of {} files indexes", saved, pending.len());
        match first_error {
            Some(e) => Err(e),
            None => Ok(saved),
        }
    }

    /// Stops the background tasks and drops every entry. Entries still live
    /// are not persisted; call `flush_all` first (or `shutdown`) for that.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let tasks: Vec<JoinHandle<()>> = lock(&self.tasks).drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!("index cache task ended abnormally: {}", e);
            }
        }
        lock(&self.shared.slots).clear();
        lock(&self.shared.evicted).clear();
        info!("index cache stopped");
    }

    pub async fn shutdown(&self) -> Result<()> {
        let flushed = self.flush_all().await;
        self.stop().await;
        flushed.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::checksum::ChecksumStrategy;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting(AtomicUsize);

    #[async_trait]
    impl ChecksumStrategy for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        async fn checksum(&self, path: &Path) -> Result<String> {
            self.0.fetch_add(1, Ordering::SeqCst);
            let data = tokio::fs::read(path)
                .await
                .map_err(|e| StoreError::io("reading", e))?;
            Ok(format!("len:{}", data.len()))
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        counter: Arc<Counting>,
        config: StoreConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let config = StoreConfig::default().with_projects_root(dir.path());
            let project = dir.path().join("alice/roads");
            std::fs::create_dir_all(project.join(".gisquick")).unwrap();
            std::fs::create_dir_all(project.join("data")).unwrap();
            std::fs::write(project.join("roads.qgs"), b"<qgis/>").unwrap();
            std::fs::write(project.join("data/roads.csv"), b"a,b\n1,2\n").unwrap();
            Self {
                dir,
                counter: Arc::new(Counting::default()),
                config,
            }
        }

        fn cache(&self, ttl: Duration, sweep: Duration) -> IndexCache {
            let checksums = Arc::new(ChecksumProvider::new(self.counter.clone()));
            let loader = IndexLoader::new(&self.config, FileScanner::default(), checksums);
            IndexCache::new(loader, ttl, sweep)
        }

        fn snapshot_path(&self) -> PathBuf {
            self.dir.path().join("alice/roads/.gisquick").join(SNAPSHOT_FILE)
        }

        fn calls(&self) -> usize {
            self.counter.0.load(Ordering::SeqCst)
        }
    }

    fn entry(hash: &str, size: i64, mtime: i64) -> FileInfo {
        FileInfo {
            hash: hash.to_string(),
            size,
            mtime,
        }
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SNAPSHOT_FILE);
        let index = FileIndex::new();
        index.set("a.txt", entry("h1", 10, 100)).await;
        index.set("dir/b.gpkg", entry("dbhash:abc", 2048, -5)).await;

        write_snapshot(&path, &index).await.unwrap();
        let loaded = read_snapshot(&path).await.unwrap().unwrap();
        assert_eq!(loaded, index.snapshot().await);

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["a.txt"], serde_json::json!({"hash": "h1", "size": 10, "mtime": 100}));

        assert!(read_snapshot(&dir.path().join("missing.json"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_rebuild_without_snapshot() {
        let fx = Fixture::new();
        let cache = fx.cache(Duration::from_secs(60), Duration::from_secs(60));

        let index = cache.get("alice/roads").await.unwrap();
        assert_eq!(index.len().await, 2);
        assert_eq!(index.get("roads.qgs").await.unwrap().hash, "len:7");
        assert_eq!(fx.calls(), 2);

        // second access is served from memory
        let again = cache.get("alice/roads").await.unwrap();
        assert!(Arc::ptr_eq(&index, &again));
        assert_eq!(fx.calls(), 2);
    }

    #[tokio::test]
    async fn test_loads_snapshot_without_hashing() {
        let fx = Fixture::new();
        std::fs::write(
            fx.snapshot_path(),
            r#"{"roads.qgs": {"hash": "H1", "size": 7, "mtime": 100}}"#,
        )
        .unwrap();

        let cache = fx.cache(Duration::from_secs(60), Duration::from_secs(60));
        let index = cache.get("alice/roads").await.unwrap();
        assert_eq!(index.get("roads.qgs").await.unwrap().hash, "H1");
        assert_eq!(index.len().await, 1);
        assert_eq!(fx.calls(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_rebuilds() {
        let fx = Fixture::new();
        std::fs::write(fx.snapshot_path(), "{ truncated").unwrap();

        let cache = fx.cache(Duration::from_secs(60), Duration::from_secs(60));
        let index = cache.get("alice/roads").await.unwrap();
        assert_eq!(index.len().await, 2);
        assert_eq!(fx.calls(), 2);
    }

    #[tokio::test]
    async fn test_loader_failure_is_not_cached() {
        let fx = Fixture::new();
        let cache = fx.cache(Duration::from_secs(60), Duration::from_secs(60));

        let err = cache.get("alice/missing").await.unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));
        assert!(cache.is_empty());

        // once the project appears the next access loads it
        std::fs::create_dir_all(fx.dir.path().join("alice/missing")).unwrap();
        let index = cache.get("alice/missing").await.unwrap();
        assert!(index.is_empty().await);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_gets_share_one_load() {
        let fx = Fixture::new();
        let cache = fx.cache(Duration::from_secs(60), Duration::from_secs(60));

        let (a, b) = tokio::join!(cache.get("alice/roads"), cache.get("alice/roads"));
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(fx.calls(), 2);
    }

    #[tokio::test]
    async fn test_expiry_persists_snapshot() {
        let fx = Fixture::new();
        let cache = fx.cache(Duration::from_millis(50), Duration::from_millis(10));
        cache.start();

        let index = cache.get("alice/roads").await.unwrap();
        index.set("extra.txt", entry("X", 3, 1)).await;
        drop(index);
        assert!(!fx.snapshot_path().exists());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(cache.is_empty());
        let saved = read_snapshot(&fx.snapshot_path()).await.unwrap().unwrap();
        assert_eq!(saved.get("extra.txt"), Some(&entry("X", 3, 1)));

        // reloading reads the snapshot, nothing is rehashed
        let reloaded = cache.get("alice/roads").await.unwrap();
        assert_eq!(reloaded.len().await, 3);
        assert_eq!(fx.calls(), 2);
        cache.stop().await;
    }

    #[tokio::test]
    async fn test_access_does_not_extend_ttl() {
        let fx = Fixture::new();
        let cache = fx.cache(Duration::from_millis(100), Duration::from_millis(10));
        cache.start();

        cache.get("alice/roads").await.unwrap();
        for _ in 0..8 {
            tokio::time::sleep(Duration::from_millis(25)).await;
            cache.get("alice/roads").await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(fx.snapshot_path().exists());
        cache.stop().await;
    }

    #[tokio::test]
    async fn test_evicted_index_is_adopted_before_it_is_written() {
        let fx = Fixture::new();
        // not started: nothing drains the persistence queue
        let cache = fx.cache(Duration::from_millis(20), Duration::from_secs(60));

        let index = cache.get("alice/roads").await.unwrap();
        index.set("fresh.txt", entry("F", 1, 1)).await;
        drop(index);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.expire_now(), 1);
        assert!(!fx.snapshot_path().exists());

        let adopted = cache.get("alice/roads").await.unwrap();
        assert!(adopted.get("fresh.txt").await.is_some());
        assert_eq!(fx.calls(), 2);
    }

    #[tokio::test]
    async fn test_remove_discards_without_persisting() {
        let fx = Fixture::new();
        let cache = fx.cache(Duration::from_secs(60), Duration::from_secs(60));
        cache.start();
        cache.get("alice/roads").await.unwrap();

        cache.remove("alice/roads").await;
        assert!(cache.is_empty());
        cache.stop().await;
        assert!(!fx.snapshot_path().exists());
    }

    #[tokio::test]
    async fn test_index_in_use_is_not_evicted() {
        let fx = Fixture::new();
        let cache = fx.cache(Duration::from_millis(20), Duration::from_secs(60));

        let held = cache.get("alice/roads").await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.expire_now(), 0);

        // an expired lookup while held still returns the live index
        let again = cache.get("alice/roads").await.unwrap();
        assert!(Arc::ptr_eq(&held, &again));
        held.set("late.txt", entry("L", 1, 1)).await;

        drop(held);
        drop(again);
        assert_eq!(cache.expire_now(), 1);
        let adopted = cache.get("alice/roads").await.unwrap();
        assert!(adopted.get("late.txt").await.is_some());
    }

    #[tokio::test]
    async fn test_snapshot_never_recreates_deleted_project() {
        let fx = Fixture::new();
        let cache = fx.cache(Duration::from_millis(20), Duration::from_millis(5));
        cache.start();
        cache.get("alice/roads").await.unwrap();

        std::fs::remove_dir_all(fx.dir.path().join("alice/roads")).unwrap();
        let err = cache
            .persist("alice/roads", &FileIndex::new())
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        // the worker drops the evicted index instead of writing it
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(cache.is_empty());
        assert!(!fx.dir.path().join("alice/roads").exists());
        cache.stop().await;
    }

    #[tokio::test]
    async fn test_stop_drops_and_shutdown_flushes() {
        let fx = Fixture::new();
        let cache = fx.cache(Duration::from_secs(60), Duration::from_secs(60));
        cache.start();
        cache.get("alice/roads").await.unwrap();
        cache.stop().await;
        assert!(cache.is_empty());
        assert!(!fx.snapshot_path().exists());

        let cache = fx.cache(Duration::from_secs(60), Duration::from_secs(60));
        cache.start();
        cache.get("alice/roads").await.unwrap();
        cache.shutdown().await.unwrap();
        assert!(cache.is_empty());
        assert_eq!(
            read_snapshot(&fx.snapshot_path()).await.unwrap().unwrap().len(),
            2
        );
    }
}
