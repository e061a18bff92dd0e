//! Project metadata persistence: `projects/<project_id>/metadata.json`.
//!
//! A project is otherwise an external collaborator, but this core still
//! needs to read and write that file whenever it resolves a workspace or
//! enforces recursion limits. `ProjectStore` is the minimal
//! load/create/update surface that supports that — no scheduling, no
//! billing, no display metadata.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::warn;

use oubliette_session::active_session::ActiveSessionChecker;
use oubliette_session::model::{Project, ProjectId};

use crate::atomic::atomic_write_json;
use crate::error::{OublietteError, OublietteResult};

pub struct ProjectStore {
    projects_dir: PathBuf,
    checker: Arc<dyn ActiveSessionChecker>,
    /// Per-project create/update lock, mirroring the per-session lock map
    /// in `session_manager::lock` but keyed on project id and scoped to
    /// this store alone (project metadata writes are rare and small).
    lock: RwLock<()>,
}

impl ProjectStore {
    pub fn new(projects_dir: PathBuf, checker: Arc<dyn ActiveSessionChecker>) -> Self {
        Self {
            projects_dir,
            checker,
            lock: RwLock::new(()),
        }
    }

    fn metadata_path(&self, project_id: &ProjectId) -> PathBuf {
        self.projects_dir.join(project_id).join("metadata.json")
    }

    pub async fn load(&self, project_id: &ProjectId) -> OublietteResult<Project> {
        let path = self.metadata_path(project_id);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|_| OublietteError::not_found(format!("project {project_id}")))?;
        serde_json::from_slice(&bytes).map_err(OublietteError::from)
    }

    /// Creates a project with defaults if it doesn't already exist, or
    /// returns the existing one. Used by the workspace resolver and the
    /// `spawn` handler when a caller references a project id for the
    /// first time.
    pub async fn get_or_create(&self, project_id: &ProjectId, default_workspace_id: impl Into<String>) -> OublietteResult<Project> {
        let _guard = self.lock.write().await;
        if let Ok(project) = self.load(project_id).await {
            return Ok(project);
        }
        let project = Project::new(project_id.clone(), default_workspace_id.into());
        atomic_write_json(&self.metadata_path(project_id), &project).await?;
        Ok(project)
    }

    pub async fn save(&self, project: &Project) -> OublietteResult<()> {
        let _guard = self.lock.write().await;
        atomic_write_json(&self.metadata_path(&project.project_id), project).await
    }

    /// Refuses deletion while any session for the project is registered
    /// in the active session manager — asked through the injected
    /// `ActiveSessionChecker` capability rather than a direct dependency,
    /// avoiding a cyclic dependency between the project and session
    /// managers.
    pub async fn delete(&self, project_id: &ProjectId) -> OublietteResult<()> {
        if self.checker.has_active_sessions(project_id).await {
            return Err(OublietteError::conflict(format!(
                "project {project_id} has active sessions"
            )));
        }
        let _guard = self.lock.write().await;
        let dir = self.projects_dir.join(project_id);
        if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(OublietteError::Io(e));
            }
        }
        Ok(())
    }

    pub async fn exists(&self, project_id: &ProjectId) -> bool {
        self.metadata_path(project_id).exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct NeverActive;

    #[async_trait]
    impl ActiveSessionChecker for NeverActive {
        async fn has_active_sessions(&self, _project_id: &ProjectId) -> bool {
            false
        }
        async fn count_active_for_project(&self, _project_id: &ProjectId) -> usize {
            0
        }
    }

    struct AlwaysActive;

    #[async_trait]
    impl ActiveSessionChecker for AlwaysActive {
        async fn has_active_sessions(&self, _project_id: &ProjectId) -> bool {
            true
        }
        async fn count_active_for_project(&self, _project_id: &ProjectId) -> usize {
            1
        }
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::new(dir.path().to_path_buf(), Arc::new(NeverActive));
        let p1 = store.get_or_create(&"p1".to_string(), "w1").await.unwrap();
        let p2 = store.get_or_create(&"p1".to_string(), "w2").await.unwrap();
        assert_eq!(p1.default_workspace_id, p2.default_workspace_id);
    }

    #[tokio::test]
    async fn delete_fails_with_active_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::new(dir.path().to_path_buf(), Arc::new(AlwaysActive));
        store.get_or_create(&"p1".to_string(), "w1").await.unwrap();
        let err = store.delete(&"p1".to_string()).await.unwrap_err();
        assert!(matches!(err, OublietteError::Conflict(_)));
    }

    #[tokio::test]
    async fn delete_succeeds_without_active_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::new(dir.path().to_path_buf(), Arc::new(NeverActive));
        store.get_or_create(&"p1".to_string(), "w1").await.unwrap();
        store.delete(&"p1".to_string()).await.unwrap();
        assert!(!store.exists(&"p1".to_string()).await);
    }
}
