pub mod local;

use crate::error::{Result, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub use local::LocalProjectStore;

// ============ Project metadata ============

/// Publication lifecycle, only ever moves forward
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectState {
    #[default]
    Empty,
    Staged,
    Published,
}

impl ProjectState {
    /// Moves to `next` unless that would go backwards. Returns true on change.
    pub fn advance(&mut self, next: ProjectState) -> bool {
        if next > *self {
            *self = next;
            true
        } else {
            false
        }
    }
}

impl std::fmt::Display for ProjectState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProjectState::Empty => write!(f, "empty"),
            ProjectState::Staged => write!(f, "staged"),
            ProjectState::Published => write!(f, "published"),
        }
    }
}

/// Project bookkeeping record (`project.json`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectInfo {
    #[serde(default)]
    pub title: String,
    #[serde(rename = "qgis_file", alias = "source_file", default)]
    pub source_file: String,
    #[serde(default)]
    pub projection: serde_json::Value,
    #[serde(default)]
    pub state: ProjectState,
    #[serde(default)]
    pub size: i64,
    pub created: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<DateTime<Utc>>,
    #[serde(default)]
    pub thumbnail: bool,
    #[serde(default)]
    pub authentication: String,
}

impl ProjectInfo {
    pub fn new(descriptor: &ProjectDescriptor) -> Self {
        Self {
            title: descriptor.title.clone(),
            source_file: descriptor.file.clone(),
            projection: descriptor.projection.clone(),
            state: ProjectState::Empty,
            size: 0,
            created: Utc::now(),
            last_update: None,
            thumbnail: false,
            authentication: String::new(),
        }
    }

    pub fn touch(&mut self) {
        self.last_update = Some(Utc::now());
    }
}

/// Fields the store reads out of the uploaded project descriptor (`qgis.json`)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectDescriptor {
    pub title: String,
    pub file: String,
    #[serde(default)]
    pub project_hash: Option<String>,
    pub projection: serde_json::Value,
}

impl ProjectDescriptor {
    pub fn parse(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(|e| StoreError::InvalidMetadata(e.to_string()))
    }
}

/// Fields the store reads out of the publish settings (`settings.json`)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsSummary {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub auth: AuthSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthSettings {
    #[serde(rename = "type", default)]
    pub kind: String,
}

impl SettingsSummary {
    pub fn parse(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(|e| StoreError::InvalidMetadata(e.to_string()))
    }
}

// ============ Collaborator interface ============

/// Access to the per-project bookkeeping record used by the sync engine
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn exists(&self, project: &str) -> bool;

    /// Returns `NotFound` when the project has no record
    async fn get_info(&self, project: &str) -> Result<ProjectInfo>;

    async fn save_info(&self, project: &str, info: &ProjectInfo) -> Result<()>;

    /// Removes the project with all its files; missing projects are not an error
    async fn delete(&self, project: &str) -> Result<()>;
}

// ============ Helpers ============

/// Rejects empty, absolute and parent-escaping relative paths
pub fn validate_path(path: &str) -> Result<()> {
    let invalid = path.is_empty()
        || path.starts_with('/')
        || path.contains('\\')
        || path.contains('\0')
        || path
            .split('/')
            .any(|part| part.is_empty() || part == "." || part == "..");
    if invalid {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    Ok(())
}

/// Serializes `value` next to `path` and renames it into place
pub async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let context = || format!("writing {}", path.display());
    let data = serde_json::to_vec(value).map_err(|e| StoreError::io(context(), e.into()))?;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StoreError::io(context(), e))?;
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = path.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

    if let Err(e) = tokio::fs::write(&temp_path, &data).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(StoreError::io(context(), e));
    }
    if let Err(e) = tokio::fs::rename(&temp_path, path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(StoreError::io(context(), e));
    }
    Ok(())
}

/// Reads and parses a JSON document, mapping a missing file to `NotFound`
pub async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StoreError::NotFound(path.display().to_string()))
        }
        Err(e) => return Err(StoreError::io(format!("reading {}", path.display()), e)),
    };
    serde_json::from_slice(&data)
        .map_err(|e| StoreError::io(format!("parsing {}", path.display()), e.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_only_moves_forward() {
        let mut state = ProjectState::Empty;
        assert!(state.advance(ProjectState::Staged));
        assert!(!state.advance(ProjectState::Staged));
        assert!(!state.advance(ProjectState::Empty));
        assert_eq!(state, ProjectState::Staged);
        assert!(state.advance(ProjectState::Published));
        assert!(!state.advance(ProjectState::Staged));
        assert_eq!(state.to_string(), "published");
    }

    #[test]
    fn test_validate_path() {
        for ok in ["a.txt", "data/layers.gpkg", "a/b/c.csv", ".hidden"] {
            assert!(validate_path(ok).is_ok(), "{}", ok);
        }
        for bad in ["", "/etc/passwd", "../x", "a/../../x", "a//b", "./a", "a\\b", "dir/"] {
            assert!(validate_path(bad).is_err(), "{}", bad);
        }
    }

    #[test]
    fn test_project_info_json() {
        let json = r#"{"title":"Roads","qgis_file":"roads.qgs","state":"staged","size":12,
            "created":"2024-05-01T10:00:00Z","thumbnail":true,"authentication":"users"}"#;
        let info: ProjectInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.source_file, "roads.qgs");
        assert_eq!(info.state, ProjectState::Staged);
        assert!(info.last_update.is_none());

        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["state"], "staged");
        assert_eq!(value["qgis_file"], "roads.qgs");
    }

    #[test]
    fn test_descriptor_requires_core_fields() {
        let ok = ProjectDescriptor::parse(br#"{"title": "T", "file": "t.qgs", "projection": {}}"#);
        assert_eq!(ok.unwrap().file, "t.qgs");

        let err = ProjectDescriptor::parse(br#"{"title": "T", "projection": {}}"#).unwrap_err();
        assert!(matches!(err, StoreError::InvalidMetadata(_)));
    }

    #[tokio::test]
    async fn test_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("doc.json");
        write_json_atomic(&path, &serde_json::json!({"a": 1})).await.unwrap();
        let value: serde_json::Value = read_json(&path).await.unwrap();
        assert_eq!(value["a"], 1);

        let err = read_json::<serde_json::Value>(&dir.path().join("missing.json"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        // no temp files left behind
        let leftovers = std::fs::read_dir(dir.path().join("nested")).unwrap().count();
        assert_eq!(leftovers, 1);
    }
}
