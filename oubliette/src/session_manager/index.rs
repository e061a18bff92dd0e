//! The session index: `<data_dir>/sessions_index.json`, the authoritative
//! `session_id -> (project_id, workspace_id, status)` map. Kept as a
//! small in-memory table guarded by one `RwLock` and mirrored to disk on
//! every mutation; saves are fire-and-forget (write + rename, no fsync) —
//! an index rebuild from a directory scan is always available as a
//! fallback, so durability here is best-effort by design.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio::sync::RwLock;
use tracing::warn;

use oubliette_session::model::{ProjectId, SessionId, SessionIndexEntry, SessionStatus, WorkspaceId};

use crate::atomic::atomic_write_json;
use crate::error::OublietteResult;

struct Inner {
    entries: HashMap<SessionId, SessionIndexEntry>,
}

/// The on-disk session index, loaded once at startup and kept in sync with
/// every session create/update/delete.
pub struct SessionIndex {
    path: PathBuf,
    inner: RwLock<Inner>,
}

impl SessionIndex {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            inner: RwLock::new(Inner { entries: HashMap::new() }),
        }
    }

    /// Loads the index file if present. A missing or corrupt file is
    /// treated as an empty index (first run, or recovery needed) rather
    /// than a fatal error — `recover_stale`'s slow path handles rebuilding
    /// it from a directory scan.
    pub async fn load(path: PathBuf) -> Self {
        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<Vec<SessionIndexEntry>>(&bytes) {
                Ok(list) => list.into_iter().map(|e| (e.session_id.clone(), e)).collect(),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "session index is corrupt, starting empty");
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };
        Self {
            path,
            inner: RwLock::new(Inner { entries }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.entries.is_empty()
    }

    pub async fn get(&self, session_id: &SessionId) -> Option<SessionIndexEntry> {
        self.inner.read().await.entries.get(session_id).cloned()
    }

    pub async fn get_by_status(&self, status: SessionStatus) -> Vec<SessionIndexEntry> {
        self.inner
            .read()
            .await
            .entries
            .values()
            .filter(|e| e.status == status)
            .cloned()
            .collect()
    }

    /// Inserts or replaces an entry and persists the index. Errors from
    /// the save are logged, never propagated — index save failures are
    /// best-effort and never block the calling operation.
    pub async fn upsert(&self, entry: SessionIndexEntry) {
        let mut inner = self.inner.write().await;
        inner.entries.insert(entry.session_id.clone(), entry);
        let snapshot: Vec<SessionIndexEntry> = inner.entries.values().cloned().collect();
        drop(inner);
        self.persist(&snapshot).await;
    }

    pub async fn remove(&self, session_id: &SessionId) {
        let mut inner = self.inner.write().await;
        inner.entries.remove(session_id);
        let snapshot: Vec<SessionIndexEntry> = inner.entries.values().cloned().collect();
        drop(inner);
        self.persist(&snapshot).await;
    }

    pub async fn entries_for_project(&self, project_id: &ProjectId) -> Vec<SessionIndexEntry> {
        self.inner
            .read()
            .await
            .entries
            .values()
            .filter(|e| &e.project_id == project_id)
            .cloned()
            .collect()
    }

    pub async fn entries_for_workspace(&self, project_id: &ProjectId, workspace_id: &WorkspaceId) -> Vec<SessionIndexEntry> {
        self.inner
            .read()
            .await
            .entries
            .values()
            .filter(|e| &e.project_id == project_id && &e.workspace_id == workspace_id)
            .cloned()
            .collect()
    }

    async fn persist(&self, entries: &[SessionIndexEntry]) {
        if let Err(e) = atomic_write_json(&self.path, entries).await {
            warn!(path = %self.path.display(), error = %e, "failed to persist session index (best-effort)");
        }
    }

    #[allow(dead_code)]
    async fn try_persist(&self, entries: &[SessionIndexEntry]) -> OublietteResult<()> {
        atomic_write_json(&self.path, entries).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, status: SessionStatus) -> SessionIndexEntry {
        SessionIndexEntry {
            session_id: id.to_string(),
            project_id: "p1".to_string(),
            workspace_id: "w1".to_string(),
            status,
        }
    }

    #[tokio::test]
    async fn upsert_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let index = SessionIndex::new(dir.path().join("sessions_index.json"));
        index.upsert(entry("s1", SessionStatus::Active)).await;
        assert!(index.get(&"s1".to_string()).await.is_some());
    }

    #[tokio::test]
    async fn load_from_disk_after_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions_index.json");
        let index = SessionIndex::new(path.clone());
        index.upsert(entry("s1", SessionStatus::Active)).await;

        let reloaded = SessionIndex::load(path).await;
        assert!(reloaded.get(&"s1".to_string()).await.is_some());
    }

    #[tokio::test]
    async fn remove_drops_entry() {
        let dir = tempfile::tempdir().unwrap();
        let index = SessionIndex::new(dir.path().join("sessions_index.json"));
        index.upsert(entry("s1", SessionStatus::Active)).await;
        index.remove(&"s1".to_string()).await;
        assert!(index.get(&"s1".to_string()).await.is_none());
    }

    #[tokio::test]
    async fn get_by_status_filters() {
        let dir = tempfile::tempdir().unwrap();
        let index = SessionIndex::new(dir.path().join("sessions_index.json"));
        index.upsert(entry("s1", SessionStatus::Active)).await;
        index.upsert(entry("s2", SessionStatus::Completed)).await;
        let active = index.get_by_status(SessionStatus::Active).await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].session_id, "s1");
    }
}
