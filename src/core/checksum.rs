//! File checksums: BLAKE3 by default, an external integrity tool for
//! package formats whose bytes are not a stable identity

use crate::config::ChecksumConfig;
use crate::error::{Result, StoreError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use tracing::debug;

/// Prefix of tokens produced by the external integrity tool
pub const DBHASH_PREFIX: &str = "dbhash:";

/// One way of turning a file into a content token
#[async_trait]
pub trait ChecksumStrategy: Send + Sync {
    fn name(&self) -> &str;

    async fn checksum(&self, path: &Path) -> Result<String>;

    /// True when the token equals `digest_hex` of the raw bytes, so uploads
    /// can be hashed while they are written instead of re-read afterwards.
    fn streams(&self) -> bool {
        false
    }
}

/// Full BLAKE3 hex digest of the raw bytes
pub fn digest_hex(hasher: &blake3::Hasher) -> String {
    hasher.finalize().to_hex().to_string()
}

/// BLAKE3 over the file content, read once in fixed-size chunks
#[derive(Debug, Default, Clone)]
pub struct ContentHash;

#[async_trait]
impl ChecksumStrategy for ContentHash {
    fn name(&self) -> &str {
        "blake3"
    }

    async fn checksum(&self, path: &Path) -> Result<String> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let file = std::fs::File::open(&path)
                .map_err(|e| StoreError::io(format!("opening {}", path.display()), e))?;
            let mut hasher = blake3::Hasher::new();
            hasher
                .update_reader(file)
                .map_err(|e| StoreError::io(format!("hashing {}", path.display()), e))?;
            Ok(digest_hex(&hasher))
        })
        .await
        .map_err(|e| StoreError::other("hash task", e))?
    }

    fn streams(&self) -> bool {
        true
    }
}

/// Runs an external tool with the file path as its only argument and takes
/// the first whitespace-separated token of its stdout as the hash.
#[derive(Debug, Clone)]
pub struct ExternalTool {
    program: PathBuf,
}

impl ExternalTool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl ChecksumStrategy for ExternalTool {
    fn name(&self) -> &str {
        "dbhash"
    }

    async fn checksum(&self, path: &Path) -> Result<String> {
        let context = || format!("running {} on {}", self.program.display(), path.display());

        let output = Command::new(&self.program)
            .arg(path)
            .output()
            .await
            .map_err(|e| StoreError::io(context(), e))?;

        if !output.status.success() {
            return Err(StoreError::other(
                context(),
                format!(
                    "exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let token = stdout
            .split_whitespace()
            .next()
            .ok_or_else(|| StoreError::other(context(), "no hash in output"))?;

        Ok(format!("{}{}", DBHASH_PREFIX, token))
    }
}

/// Picks a strategy by (case-insensitive) file extension, falling back to a default
#[derive(Clone)]
pub struct ChecksumProvider {
    default: Arc<dyn ChecksumStrategy>,
    by_extension: HashMap<String, Arc<dyn ChecksumStrategy>>,
}

impl ChecksumProvider {
    pub fn new(default: Arc<dyn ChecksumStrategy>) -> Self {
        Self {
            default,
            by_extension: HashMap::new(),
        }
    }

    pub fn from_config(config: &ChecksumConfig) -> Self {
        let tool: Arc<dyn ChecksumStrategy> = Arc::new(ExternalTool::new(&config.tool));
        config
            .extensions
            .iter()
            .fold(Self::new(Arc::new(ContentHash)), |provider, ext| {
                provider.with_strategy(ext, tool.clone())
            })
    }

    pub fn with_strategy(mut self, extension: &str, strategy: Arc<dyn ChecksumStrategy>) -> Self {
        self.by_extension.insert(
            extension.trim_start_matches('.').to_lowercase(),
            strategy,
        );
        self
    }

    pub fn strategy_for(&self, path: &Path) -> &Arc<dyn ChecksumStrategy> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(|e| self.by_extension.get(&e.to_lowercase()))
            .unwrap_or(&self.default)
    }

    pub async fn checksum(&self, path: &Path) -> Result<String> {
        let strategy = self.strategy_for(path);
        debug!(path = %path.display(), strategy = strategy.name(), "computing checksum");
        strategy.checksum(path).await
    }
}

impl Default for ChecksumProvider {
    fn default() -> Self {
        Self::from_config(&ChecksumConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed(&'static str, AtomicUsize);

    #[async_trait]
    impl ChecksumStrategy for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn checksum(&self, _path: &Path) -> Result<String> {
            self.1.fetch_add(1, Ordering::SeqCst);
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn test_content_hash_matches_blake3() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        let data = vec![7u8; 200_000];
        std::fs::write(&path, &data).unwrap();

        let token = ContentHash.checksum(&path).await.unwrap();
        assert_eq!(token, blake3::hash(&data).to_hex().to_string());
        assert_eq!(token.len(), 64);
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ContentHash
            .checksum(&dir.path().join("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));
    }

    #[tokio::test]
    async fn test_extension_routing_is_case_insensitive() {
        let special = Arc::new(Fixed("special", AtomicUsize::new(0)));
        let provider = ChecksumProvider::new(Arc::new(Fixed("plain", AtomicUsize::new(0))))
            .with_strategy(".gpkg", special.clone());

        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            provider.checksum(&dir.path().join("layers.GPKG")).await.unwrap(),
            "special"
        );
        assert_eq!(
            provider.checksum(&dir.path().join("layers.gpkg")).await.unwrap(),
            "special"
        );
        assert_eq!(
            provider.checksum(&dir.path().join("project.qgs")).await.unwrap(),
            "plain"
        );
        assert_eq!(special.1.load(Ordering::SeqCst), 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_external_tool_token() {
        // `echo` prints its argument, so the first token is the path itself
        let tool = ExternalTool::new("echo");
        let token = tool.checksum(Path::new("/tmp/x.gpkg")).await.unwrap();
        assert_eq!(token, "dbhash:/tmp/x.gpkg");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_external_tool_failure() {
        let err = ExternalTool::new("false")
            .checksum(Path::new("/tmp/x.gpkg"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));

        let err = ExternalTool::new("/nonexistent/dbhash")
            .checksum(Path::new("/tmp/x.gpkg"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_external_tool_empty_output() {
        let err = ExternalTool::new("true")
            .checksum(Path::new("/tmp/x.gpkg"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));
    }
}
