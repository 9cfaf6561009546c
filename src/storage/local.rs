use super::{
    read_json, validate_path, write_json_atomic, MetadataStore, ProjectDescriptor, ProjectInfo,
    ProjectState, SettingsSummary,
};
use crate::error::{Result, StoreError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::{error, info};

const PROJECT_FILE: &str = "project.json";
const DESCRIPTOR_FILE: &str = "qgis.json";
const SETTINGS_FILE: &str = "settings.json";
const SCRIPTS_FILE: &str = "scripts.json";
const THUMBNAIL_FILE: &str = "thumbnail";

/// Project metadata kept as JSON documents in each project's control directory
pub struct LocalProjectStore {
    projects_root: PathBuf,
    control_dir: String,
}

impl LocalProjectStore {
    pub fn new(projects_root: impl Into<PathBuf>, control_dir: &str) -> Self {
        Self {
            projects_root: projects_root.into(),
            control_dir: control_dir.to_string(),
        }
    }

    pub fn projects_root(&self) -> &Path {
        &self.projects_root
    }

    pub fn project_dir(&self, project: &str) -> PathBuf {
        self.projects_root.join(project)
    }

    pub fn control_path(&self, project: &str, file: &str) -> PathBuf {
        self.project_dir(project).join(&self.control_dir).join(file)
    }

    pub fn thumbnail_path(&self, project: &str) -> PathBuf {
        self.control_path(project, THUMBNAIL_FILE)
    }

    /// Creates the project directory and its initial metadata from the
    /// uploaded descriptor document.
    pub async fn create(&self, project: &str, descriptor: &[u8]) -> Result<ProjectInfo> {
        validate_path(project)?;
        if self.exists(project).await {
            return Err(StoreError::AlreadyExists(project.to_string()));
        }

        let parsed = ProjectDescriptor::parse(descriptor).inspect_err(|e| {
            error!(project, "parsing project descriptor: {}", e);
        })?;

        let control = self.project_dir(project).join(&self.control_dir);
        fs::create_dir_all(&control)
            .await
            .map_err(|e| StoreError::io(format!("creating {}", control.display()), e))?;

        self.write_raw(project, DESCRIPTOR_FILE, descriptor).await?;

        let info = ProjectInfo::new(&parsed);
        self.save_info(project, &info).await?;
        info!(project, "created project");
        Ok(info)
    }

    /// Projects of one owner: subdirectories that carry a project record
    pub async fn user_projects(&self, owner: &str) -> Result<Vec<String>> {
        validate_path(owner)?;
        let owner_dir = self.projects_root.join(owner);
        let mut entries = match fs::read_dir(&owner_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io("listing projects", e)),
        };

        let mut projects = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io("listing projects", e))?
        {
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            if !is_dir {
                continue;
            }
            let name = format!("{}/{}", owner, entry.file_name().to_string_lossy());
            if self.exists(&name).await {
                projects.push(name);
            }
        }
        projects.sort();
        Ok(projects)
    }

    /// Replaces the descriptor document and refreshes the fields copied from it
    pub async fn update_meta(&self, project: &str, descriptor: &[u8]) -> Result<ProjectInfo> {
        let mut info = self.get_info(project).await?;
        let parsed = ProjectDescriptor::parse(descriptor)?;
        self.write_raw(project, DESCRIPTOR_FILE, descriptor).await?;

        info.source_file = parsed.file;
        info.projection = parsed.projection;
        info.title = parsed.title;
        info.touch();
        self.save_info(project, &info).await?;
        Ok(info)
    }

    pub async fn get_descriptor(&self, project: &str) -> Result<serde_json::Value> {
        read_json(&self.control_path(project, DESCRIPTOR_FILE)).await
    }

    /// Stores publish settings; the project becomes published
    pub async fn update_settings(&self, project: &str, settings: &[u8]) -> Result<ProjectInfo> {
        let mut info = self.get_info(project).await?;
        let summary = SettingsSummary::parse(settings)?;
        self.write_raw(project, SETTINGS_FILE, settings).await?;

        info.state.advance(ProjectState::Published);
        info.authentication = summary.auth.kind;
        info.title = summary.title;
        info.touch();
        self.save_info(project, &info).await?;
        Ok(info)
    }

    pub async fn get_settings(&self, project: &str) -> Result<serde_json::Value> {
        read_json(&self.control_path(project, SETTINGS_FILE)).await
    }

    /// Custom scripts document, `None` when the project has none
    pub async fn get_scripts(&self, project: &str) -> Result<Option<serde_json::Value>> {
        match read_json(&self.control_path(project, SCRIPTS_FILE)).await {
            Ok(scripts) => Ok(Some(scripts)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn update_scripts(&self, project: &str, scripts: &serde_json::Value) -> Result<()> {
        if !self.exists(project).await {
            return Err(StoreError::NotFound(project.to_string()));
        }
        write_json_atomic(&self.control_path(project, SCRIPTS_FILE), scripts).await
    }

    pub async fn save_thumbnail<R>(&self, project: &str, mut reader: R) -> Result<ProjectInfo>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut info = self.get_info(project).await?;
        let path = self.thumbnail_path(project);
        let context = || format!("saving thumbnail {}", path.display());

        let mut file = fs::File::create(&path)
            .await
            .map_err(|e| StoreError::io(context(), e))?;
        tokio::io::copy(&mut reader, &mut file)
            .await
            .map_err(|e| StoreError::io(context(), e))?;
        file.flush().await.map_err(|e| StoreError::io(context(), e))?;

        info.thumbnail = true;
        info.touch();
        self.save_info(project, &info).await?;
        Ok(info)
    }

    async fn write_raw(&self, project: &str, file: &str, data: &[u8]) -> Result<()> {
        // documents are stored as received, only validated as JSON
        let value: serde_json::Value = serde_json::from_slice(data)
            .map_err(|e| StoreError::InvalidMetadata(e.to_string()))?;
        write_json_atomic(&self.control_path(project, file), &value).await
    }
}

#[async_trait]
impl MetadataStore for LocalProjectStore {
    async fn exists(&self, project: &str) -> bool {
        validate_path(project).is_ok()
            && fs::try_exists(self.control_path(project, PROJECT_FILE))
                .await
                .unwrap_or(false)
    }

    async fn get_info(&self, project: &str) -> Result<ProjectInfo> {
        validate_path(project)?;
        read_json(&self.control_path(project, PROJECT_FILE))
            .await
            .map_err(|e| match e {
                StoreError::NotFound(_) => StoreError::NotFound(project.to_string()),
                other => other,
            })
    }

    async fn save_info(&self, project: &str, info: &ProjectInfo) -> Result<()> {
        validate_path(project)?;
        write_json_atomic(&self.control_path(project, PROJECT_FILE), info).await
    }

    /// Removes the whole project tree
    async fn delete(&self, project: &str) -> Result<()> {
        validate_path(project)?;
        let dir = self.project_dir(project);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!(project, "deleted project");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(format!("removing {}", dir.display()), e)),
        }
    }
}
