use crate::core::io::Storage;
use crate::core::project::Project;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;

/// One line of the archive listing.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectSummary {
    pub id: String,
    pub name: String,
    pub title: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Saved projects, one JSON document per project id.
pub struct ProjectArchive {
    storage: Arc<dyn Storage>,
    folder: String,
}

impl ProjectArchive {
    pub fn new(storage: Arc<dyn Storage>, folder: impl Into<String>) -> Self {
        Self {
            storage,
            folder: folder.into(),
        }
    }

    fn path_for(&self, id: &str) -> Result<String> {
        if id.is_empty() || id.contains(['/', '\\']) || id.contains("..") {
            return Err(anyhow!("Invalid project id: {:?}", id));
        }
        let path = Path::new(&self.folder).join(format!("{}.json", id));
        Ok(path.to_string_lossy().to_string())
    }

    pub async fn save(&self, project: &Project) -> Result<()> {
        let path = self.path_for(&project.id)?;
        let content = project.to_json()?;
        self.storage.write(&path, content.as_bytes()).await?;
        log::debug!("Saved project {} to {}", project.id, path);
        Ok(())
    }

    pub async fn load(&self, id: &str) -> Result<Project> {
        let path = self.path_for(id)?;
        if !self.storage.exists(&path).await? {
            return Err(anyhow!("Project {} not found in archive", id));
        }
        let bytes = self.storage.read(&path).await?;
        let content = String::from_utf8(bytes).context("Archived project is not UTF-8")?;
        Project::from_json(&content)
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let path = self.path_for(id)?;
        self.storage.delete(&path).await
    }

    /// Archived projects, most recently updated first. Unreadable entries are skipped.
    pub async fn list(&self) -> Result<Vec<ProjectSummary>> {
        let entries = self.storage.list_files(&self.folder, "json").await?;
        let mut summaries = Vec::new();
        for entry in &entries {
            let parsed = self
                .storage
                .read(entry)
                .await
                .and_then(|bytes| Ok(String::from_utf8(bytes)?))
                .and_then(|content| Project::from_json(&content));
            match parsed {
                Ok(project) => summaries.push(ProjectSummary {
                    title: project.story.as_ref().map(|s| s.title.clone()),
                    id: project.id,
                    name: project.name,
                    updated_at: project.updated_at,
                }),
                Err(e) => log::warn!("Skipping unreadable archive entry {}: {:#}", entry, e),
            }
        }
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    pub fn export_json(project: &Project) -> Result<String> {
        project.to_json()
    }

    /// Imports an exported project, filling missing optional fields.
    pub async fn import_json(&self, json: &str) -> Result<Project> {
        let project = Project::from_json(json)?;
        self.save(&project).await?;
        Ok(project)
    }
}
