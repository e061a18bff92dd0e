//! Workspace Resolver: turns a caller's `workspace_id?` /
//! `create_workspace?` pair into a concrete directory and id, following
//! the decision table below.
//!
//! | workspace_id | create_workspace | Action |
//! |---|---|---|
//! | empty | false | use project default |
//! | empty | true | generate a UUID, create, return |
//! | specified, exists | either | return it |
//! | specified, missing | false | error |
//! | specified, missing | true | create with the given UUID |

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::info;
use uuid::Uuid;

use oubliette_session::model::{Project, Workspace, WorkspaceId};

use crate::atomic::atomic_write_json;
use crate::error::{OublietteError, OublietteResult};

pub struct ResolvedWorkspace {
    pub id: WorkspaceId,
    pub path: PathBuf,
    pub created: bool,
}

pub struct WorkspaceResolver {
    workspaces_root: PathBuf,
}

impl WorkspaceResolver {
    pub fn new(workspaces_root: PathBuf) -> Self {
        Self { workspaces_root }
    }

    fn dir(&self, id: &str) -> PathBuf {
        self.workspaces_root.join(id)
    }

    fn metadata_path(&self, id: &str) -> PathBuf {
        self.dir(id).join("metadata.json")
    }

    pub async fn exists(&self, id: &str) -> bool {
        self.metadata_path(id).exists()
    }

    /// Applies the decision table above. `project` supplies the default
    /// workspace id and the isolation/seed-file settings used only when a
    /// workspace is actually created.
    pub async fn resolve(
        &self,
        project: &Project,
        workspace_id: Option<&str>,
        create_workspace: bool,
        project_root: &Path,
    ) -> OublietteResult<ResolvedWorkspace> {
        match (workspace_id, create_workspace) {
            (None, false) => {
                let id = project.default_workspace_id.clone();
                if !self.exists(&id).await {
                    self.create(&id, project, project_root).await?;
                    return Ok(ResolvedWorkspace { id, path: self.dir_for(&id), created: true });
                }
                Ok(ResolvedWorkspace { id: id.clone(), path: self.dir_for(&id), created: false })
            }
            (None, true) => {
                let id = Uuid::new_v4().to_string();
                self.create(&id, project, project_root).await?;
                Ok(ResolvedWorkspace { id: id.clone(), path: self.dir_for(&id), created: true })
            }
            (Some(id), _) if self.exists(id).await => {
                Ok(ResolvedWorkspace { id: id.to_string(), path: self.dir_for(id), created: false })
            }
            (Some(_id), false) => Err(OublietteError::not_found(format!(
                "workspace {} does not exist and create_workspace was not set",
                _id
            ))),
            (Some(id), true) => {
                self.create(id, project, project_root).await?;
                Ok(ResolvedWorkspace { id: id.to_string(), path: self.dir_for(id), created: true })
            }
        }
    }

    fn dir_for(&self, id: &str) -> PathBuf {
        self.dir(id)
    }

    /// Creates a workspace directory, writes its metadata atomically, and
    /// — when `project.workspace_isolation` is set — seeds `AGENTS.md` and
    /// `openspec/` from the project root exactly once.
    async fn create(&self, id: &str, project: &Project, project_root: &Path) -> OublietteResult<()> {
        let dir = self.dir(id);
        fs::create_dir_all(&dir).await?;

        let workspace = Workspace::new(id.to_string());
        atomic_write_json(&self.metadata_path(id), &workspace).await?;

        if project.workspace_isolation {
            self.seed_isolation_files(&dir, project_root).await?;
        }

        info!(workspace_id = id, project_id = %project.project_id, "workspace created");
        Ok(())
    }

    async fn seed_isolation_files(&self, workspace_dir: &Path, project_root: &Path) -> OublietteResult<()> {
        let agents_md = project_root.join("AGENTS.md");
        if agents_md.exists() {
            fs::copy(&agents_md, workspace_dir.join("AGENTS.md")).await?;
        }

        let openspec = project_root.join("openspec");
        if openspec.exists() {
            copy_dir_recursive(&openspec, &workspace_dir.join("openspec")).await?;
        }

        Ok(())
    }

    pub async fn touch_last_session(&self, id: &str) -> OublietteResult<()> {
        let path = self.metadata_path(id);
        let bytes = fs::read(&path).await?;
        let mut workspace: Workspace = serde_json::from_slice(&bytes)?;
        workspace.last_session_at = Some(chrono::Utc::now());
        atomic_write_json(&path, &workspace).await
    }

    pub async fn delete(&self, id: &str) -> OublietteResult<()> {
        let dir = self.dir(id);
        if let Err(e) = fs::remove_dir_all(&dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(OublietteError::Io(e));
            }
        }
        Ok(())
    }
}

fn copy_dir_recursive<'a>(src: &'a Path, dst: &'a Path) -> std::pin::Pin<Box<dyn std::future::Future<Output = OublietteResult<()>> + Send + 'a>> {
    Box::pin(async move {
        fs::create_dir_all(dst).await?;
        let mut entries = fs::read_dir(src).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            let target = dst.join(entry.file_name());
            if file_type.is_dir() {
                copy_dir_recursive(&entry.path(), &target).await?;
            } else {
                fs::copy(entry.path(), target).await?;
            }
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(default_id: &str) -> Project {
        Project::new("p1".to_string(), default_id.to_string())
    }

    #[tokio::test]
    async fn empty_id_no_create_uses_project_default() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = WorkspaceResolver::new(dir.path().join("workspaces"));
        let project = project("default-ws");
        let resolved = resolver.resolve(&project, None, false, dir.path()).await.unwrap();
        assert_eq!(resolved.id, "default-ws");
        assert!(resolver.exists("default-ws").await);
    }

    #[tokio::test]
    async fn empty_id_with_create_generates_uuid() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = WorkspaceResolver::new(dir.path().join("workspaces"));
        let project = project("default-ws");
        let resolved = resolver.resolve(&project, None, true, dir.path()).await.unwrap();
        assert!(Uuid::parse_str(&resolved.id).is_ok());
    }

    #[tokio::test]
    async fn missing_specified_id_without_create_errors() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = WorkspaceResolver::new(dir.path().join("workspaces"));
        let project = project("default-ws");
        let err = resolver.resolve(&project, Some("missing"), false, dir.path()).await.unwrap_err();
        assert!(matches!(err, OublietteError::NotFound(_)));
    }

    #[tokio::test]
    async fn missing_specified_id_with_create_uses_given_id() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = WorkspaceResolver::new(dir.path().join("workspaces"));
        let project = project("default-ws");
        let resolved = resolver.resolve(&project, Some("custom-id"), true, dir.path()).await.unwrap();
        assert_eq!(resolved.id, "custom-id");
    }

    #[tokio::test]
    async fn existing_id_returns_regardless_of_create_flag() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = WorkspaceResolver::new(dir.path().join("workspaces"));
        let project = project("default-ws");
        resolver.resolve(&project, Some("w1"), true, dir.path()).await.unwrap();
        let resolved = resolver.resolve(&project, Some("w1"), false, dir.path()).await.unwrap();
        assert!(!resolved.created);
    }

    #[tokio::test]
    async fn isolation_seeds_agents_md() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("AGENTS.md"), "be nice").await.unwrap();
        let resolver = WorkspaceResolver::new(dir.path().join("workspaces"));
        let mut project = project("default-ws");
        project.workspace_isolation = true;
        let resolved = resolver.resolve(&project, None, true, dir.path()).await.unwrap();
        assert!(resolved.path.join("AGENTS.md").exists());
    }
}
