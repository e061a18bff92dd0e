//! Session Manager: durable storage of session metadata plus
//! the O(1) `sessions_index.json` lookup index, with per-session
//! concurrent-safe read/write and crash recovery.
//!
//! One file per session at `projects/<project_id>/sessions/<session_id>.json`;
//! one index file at `<data_dir>/sessions_index.json`. Every read-modify-write
//! on a session happens under that session's entry in `SessionLockMap`, so a
//! `load` racing a `continue` either sees the file before or after the
//! write, never a torn one.

pub mod index;
pub mod lock;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, info, warn};

use oubliette_session::model::{
    ProjectId, Session, SessionId, SessionIndexEntry, SessionStatus, SessionSummary, ToolPolicy, Turn,
};

use crate::atomic::atomic_write_json;
use crate::config::OublietteConfig;
use crate::error::{OublietteError, OublietteResult};
use index::SessionIndex;
use lock::SessionLockMap;

/// The non-streaming agent-runtime path used for a session's *first* turn
/// `create`: this runs independent of the streaming executor path, because nothing has
/// subscribed to a streamed event channel yet at session-creation time —
/// the caller is blocked on the call and wants the turn's result text back
/// directly. Concrete implementations live outside this crate, same as
/// `Runtime`/`StreamingExecutor`.
#[async_trait]
pub trait InitialTurnRunner: Send + Sync {
    async fn run_first_turn(&self, container_id: Option<&str>, prompt: &str) -> OublietteResult<TurnOutcome>;
}

pub struct TurnOutcome {
    pub result_text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// The agent-runtime-side identifier for this conversation, if the
    /// runtime assigns one independently of our `session_id`.
    pub runtime_session_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub workspace_id: Option<String>,
    pub parent_session_id: Option<SessionId>,
    pub depth: u32,
    pub model: Option<String>,
    pub autonomy_level: Option<String>,
    pub reasoning_level: Option<String>,
    pub tool_policy: ToolPolicy,
}

pub struct SessionManager {
    config: Arc<OublietteConfig>,
    index: SessionIndex,
    locks: SessionLockMap,
}

impl SessionManager {
    /// Loads the index (or starts with an empty one) but does not run
    /// stale recovery; callers invoke `recover_stale` once at startup,
    /// after the active session manager exists, per the session lifecycle.
    pub async fn new(config: Arc<OublietteConfig>) -> Self {
        let index = SessionIndex::load(config.sessions_index_path()).await;
        Self {
            config,
            index,
            locks: SessionLockMap::new(),
        }
    }

    fn generate_session_id() -> SessionId {
        let now = chrono::Utc::now().format("%Y%m%dT%H%M%S%.3f");
        let suffix: u64 = rand::rng().random();
        format!("sess_{now}_{suffix:016x}")
    }

    /// Creates a new session. Requires `opts.workspace_id` to already be
    /// resolved (the Workspace Resolver runs before this is called); fails
    /// with `InvalidInput` otherwise.
    pub async fn create(
        &self,
        project_id: &ProjectId,
        container_id: Option<String>,
        prompt: &str,
        opts: CreateOptions,
        runner: &dyn InitialTurnRunner,
    ) -> OublietteResult<Session> {
        let workspace_id = opts
            .workspace_id
            .clone()
            .ok_or_else(|| OublietteError::invalid_input("create requires an already-resolved workspace_id"))?;

        if let Some(parent_id) = &opts.parent_session_id {
            let parent = self.load(parent_id).await?;
            if opts.depth != parent.depth + 1 {
                return Err(OublietteError::invalid_input(format!(
                    "child depth {} must equal parent depth {} + 1",
                    opts.depth, parent.depth
                )));
            }
        }

        let session_id = Self::generate_session_id();
        let outcome = runner.run_first_turn(container_id.as_deref(), prompt).await?;

        let mut session = Session::new(
            session_id.clone(),
            project_id.clone(),
            workspace_id,
            opts.parent_session_id.clone(),
            opts.depth,
            container_id,
        );
        session.model = opts.model;
        session.autonomy_level = opts.autonomy_level;
        session.reasoning_level = opts.reasoning_level;
        session.tool_policy = opts.tool_policy;
        session.runtime_session_id = outcome.runtime_session_id;

        let mut turn = Turn::new(0, prompt.to_string());
        turn.ended_at = Some(chrono::Utc::now());
        turn.result_text = Some(outcome.result_text);
        turn.input_tokens = outcome.input_tokens;
        turn.output_tokens = outcome.output_tokens;
        session.append_turn(turn);

        let _guard = self.locks.write(&session_id).await;
        self.save_session(&session).await?;

        if let Some(parent_id) = &opts.parent_session_id {
            self.add_child_session(parent_id, &session_id).await?;
        }

        info!(session_id = %session_id, project_id = %project_id, "session created");
        Ok(session)
    }

    /// Continues an existing session. Acquires the per-session write lock for the
    /// entire read-modify-write so a concurrent `load` never observes a
    /// session with an appended-but-unpersisted turn.
    pub async fn continue_session(&self, session_id: &SessionId, prompt: &str, runner: &dyn InitialTurnRunner) -> OublietteResult<Turn> {
        let _guard = self.locks.write(session_id).await;
        let mut session = self.read_session_file(session_id).await?;
        if session.status != SessionStatus::Active {
            return Err(OublietteError::Conflict(format!(
                "session {session_id} is {} , not active",
                session.status
            )));
        }

        let outcome = runner.run_first_turn(session.container_id.as_deref(), prompt).await?;
        let turn_number = session.turns.len() as u32;
        let mut turn = Turn::new(turn_number, prompt.to_string());
        turn.ended_at = Some(chrono::Utc::now());
        turn.result_text = Some(outcome.result_text);
        turn.input_tokens = outcome.input_tokens;
        turn.output_tokens = outcome.output_tokens;
        session.append_turn(turn.clone());

        self.save_session(&session).await?;
        Ok(turn)
    }

    /// Loads a session: indexed path first, falling back to a
    /// directory scan (and re-indexing on success) when the index entry is
    /// missing or stale.
    pub async fn load(&self, session_id: &SessionId) -> OublietteResult<Session> {
        if !is_valid_session_id(session_id) {
            return Err(OublietteError::invalid_input(format!("malformed session id: {session_id}")));
        }

        if let Some(entry) = self.index.get(session_id).await {
            match self.read_session_file_for(&entry.project_id, session_id).await {
                Ok(session) => return Ok(session),
                Err(OublietteError::NotFound(_)) => {
                    warn!(session_id = %session_id, "index entry stale, file missing; dropping and falling back to scan");
                    self.index.remove(session_id).await;
                }
                Err(e) => return Err(e),
            }
        }

        let (project_id, session) = self.scan_for_session(session_id).await?;
        self.index
            .upsert(SessionIndexEntry {
                session_id: session_id.clone(),
                project_id,
                workspace_id: session.workspace_id.clone(),
                status: session.status,
            })
            .await;
        Ok(session)
    }

    async fn read_session_file(&self, session_id: &SessionId) -> OublietteResult<Session> {
        if let Some(entry) = self.index.get(session_id).await {
            return self.read_session_file_for(&entry.project_id, session_id).await;
        }
        self.scan_for_session(session_id).await.map(|(_, s)| s)
    }

    async fn read_session_file_for(&self, project_id: &ProjectId, session_id: &SessionId) -> OublietteResult<Session> {
        let path = self.config.session_file_path(project_id, session_id);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|_| OublietteError::not_found(format!("session {session_id}")))?;
        serde_json::from_slice(&bytes).map_err(OublietteError::from)
    }

    /// Recovery fallback when the index doesn't know where a session
    /// lives: scan every project's `sessions/` directory for the file.
    async fn scan_for_session(&self, session_id: &SessionId) -> OublietteResult<(ProjectId, Session)> {
        let projects_dir = self.config.projects_dir();
        let mut entries = match tokio::fs::read_dir(&projects_dir).await {
            Ok(entries) => entries,
            Err(_) => return Err(OublietteError::not_found(format!("session {session_id}"))),
        };
        while let Ok(Some(project_entry)) = entries.next_entry().await {
            if !project_entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let project_id = project_entry.file_name().to_string_lossy().to_string();
            let path = self.config.session_file_path(&project_id, session_id);
            if let Ok(bytes) = tokio::fs::read(&path).await {
                if let Ok(session) = serde_json::from_slice::<Session>(&bytes) {
                    return Ok((project_id, session));
                }
            }
        }
        Err(OublietteError::not_found(format!("session {session_id}")))
    }

    /// Lists sessions for a project: a view without the full turn list, optionally
    /// filtered by status.
    pub async fn list(&self, project_id: &ProjectId, status: Option<SessionStatus>) -> OublietteResult<Vec<SessionSummary>> {
        let dir = self.config.sessions_dir(project_id);
        let mut out = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(OublietteError::Io(e)),
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = match tokio::fs::read(&path).await {
                Ok(b) => b,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable session file");
                    continue;
                }
            };
            let session: Session = match serde_json::from_slice(&bytes) {
                Ok(s) => s,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping corrupt session file");
                    continue;
                }
            };
            if status.is_some_and(|s| s != session.status) {
                continue;
            }
            out.push(SessionSummary::from(&session));
        }
        Ok(out)
    }

    /// Ends a session: idempotent — ending an already-completed or
    /// already-failed session is a no-op, not an error.
    pub async fn end(&self, session_id: &SessionId) -> OublietteResult<()> {
        let _guard = self.locks.write(session_id).await;
        let mut session = self.read_session_file(session_id).await?;
        if session.status != SessionStatus::Active {
            return Ok(());
        }
        session.status = SessionStatus::Completed;
        session.touch();
        self.save_session(&session).await
    }

    pub async fn mark_failed(&self, session_id: &SessionId) -> OublietteResult<()> {
        let _guard = self.locks.write(session_id).await;
        let mut session = self.read_session_file(session_id).await?;
        session.status = SessionStatus::Failed;
        session.touch();
        self.save_session(&session).await
    }

    /// Registers a child session: loads both ends, rejects unless
    /// `child.depth == parent.depth + 1`, appends the child id, persists
    /// the parent.
    pub async fn add_child_session(&self, parent_id: &SessionId, child_id: &SessionId) -> OublietteResult<()> {
        let child = self.load(child_id).await?;
        let _guard = self.locks.write(parent_id).await;
        let mut parent = self.read_session_file(parent_id).await?;
        if child.depth != parent.depth + 1 {
            return Err(OublietteError::invalid_input(format!(
                "child {child_id} has depth {} but parent {parent_id} has depth {}",
                child.depth, parent.depth
            )));
        }
        if !parent.child_session_ids.contains(child_id) {
            parent.child_session_ids.push(child_id.clone());
        }
        parent.touch();
        self.save_session(&parent).await
    }

    /// Appends a turn whose result isn't known yet (the streaming path:
    /// the first token of output may be minutes away). `complete_turn`
    /// fills it in once the executor's `completion` event arrives.
    pub async fn append_pending_turn(&self, session_id: &SessionId, prompt: &str) -> OublietteResult<u32> {
        let _guard = self.locks.write(session_id).await;
        let mut session = self.read_session_file(session_id).await?;
        let turn_number = session.turns.len() as u32;
        session.turns.push(Turn::new(turn_number, prompt.to_string()));
        session.touch();
        self.save_session(&session).await?;
        Ok(turn_number)
    }

    /// Fills in the most recently appended pending turn (the one with
    /// `result_text == None`) once its completion event arrives. A no-op,
    /// logged rather than failed, if every turn already has a result —
    /// the event-collection task that calls this races the session's own
    /// lifecycle and must not abort a session's notification path over it.
    pub async fn complete_turn(
        &self,
        session_id: &SessionId,
        result_text: String,
        input_tokens: u64,
        output_tokens: u64,
    ) -> OublietteResult<()> {
        let _guard = self.locks.write(session_id).await;
        let mut session = self.read_session_file(session_id).await?;
        let Some(turn) = session.turns.iter_mut().rev().find(|t| t.result_text.is_none()) else {
            warn!(session_id = %session_id, "complete_turn called with no pending turn");
            return Ok(());
        };
        turn.result_text = Some(result_text);
        turn.ended_at = Some(chrono::Utc::now());
        turn.input_tokens = input_tokens;
        turn.output_tokens = output_tokens;
        session.input_tokens += input_tokens;
        session.output_tokens += output_tokens;
        session.touch();
        self.save_session(&session).await
    }

    /// Reactivates a previously completed session for a resume (the
    /// §4.5 step 5): flips status back to active without touching turns.
    pub async fn reactivate(&self, session_id: &SessionId, runtime_session_id: Option<String>) -> OublietteResult<Session> {
        let _guard = self.locks.write(session_id).await;
        let mut session = self.read_session_file(session_id).await?;
        session.status = SessionStatus::Active;
        if runtime_session_id.is_some() {
            session.runtime_session_id = runtime_session_id;
        }
        session.touch();
        self.save_session(&session).await?;
        Ok(session)
    }

    /// Finds the most recently updated completed session for a workspace
    /// with a known `runtime_session_id` — the resume candidate for
    /// spawn/message routing resume path).
    pub async fn find_resumable(&self, project_id: &ProjectId, workspace_id: &str) -> OublietteResult<Option<Session>> {
        let mut best: Option<Session> = None;
        for entry in self.index.entries_for_workspace(project_id, workspace_id).await {
            if entry.status != SessionStatus::Completed {
                continue;
            }
            let Ok(session) = self.read_session_file_for(&entry.project_id, &entry.session_id).await else {
                continue;
            };
            if session.runtime_session_id.is_none() {
                continue;
            }
            if best.as_ref().is_none_or(|b| session.updated_at > b.updated_at) {
                best = Some(session);
            }
        }
        Ok(best)
    }

    /// Atomic write protocol: write to
    /// `<path>.tmp`, best-effort strip any extended attributes that would
    /// block `rename` on some filesystems (a no-op on the filesystems this
    /// workspace actually ships against; kept as a documented seam rather
    /// than a real syscall so we don't pull in a platform xattr dependency
    /// the rest of the stack has no other use for), then `rename` onto the
    /// final path. The index entry is only updated after the rename
    /// succeeds.
    pub async fn save_session(&self, session: &Session) -> OublietteResult<()> {
        let path = self.config.session_file_path(&session.project_id, &session.session_id);
        atomic_write_json(&path, session).await?;
        self.index
            .upsert(SessionIndexEntry {
                session_id: session.session_id.clone(),
                project_id: session.project_id.clone(),
                workspace_id: session.workspace_id.clone(),
                status: session.status,
            })
            .await;
        Ok(())
    }

    /// Recovers stale sessions, run once at startup after loading the
    /// index. Fast path walks `index.get_by_status(active)`; the slow
    /// path (recursive scan) only runs if the index came up empty, which
    /// means either a first run or index corruption.
    pub async fn recover_stale(&self, max_age: chrono::Duration) -> OublietteResult<usize> {
        if self.index.is_empty().await {
            self.rebuild_index_from_scan().await?;
        }

        let mut count = 0;
        let now = chrono::Utc::now();
        for entry in self.index.get_by_status(SessionStatus::Active).await {
            let _guard = self.locks.write(&entry.session_id).await;
            match self.read_session_file_for(&entry.project_id, &entry.session_id).await {
                Ok(mut session) => {
                    if now - session.updated_at > max_age {
                        session.status = SessionStatus::Failed;
                        session.touch();
                        self.save_session(&session).await?;
                        count += 1;
                        warn!(session_id = %entry.session_id, "recovered stale active session as failed");
                    }
                }
                Err(OublietteError::NotFound(_)) => {
                    debug!(session_id = %entry.session_id, "index entry points at missing file during recovery, dropping");
                    self.index.remove(&entry.session_id).await;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(count)
    }

    async fn rebuild_index_from_scan(&self) -> OublietteResult<()> {
        let projects_dir = self.config.projects_dir();
        let mut project_entries = match tokio::fs::read_dir(&projects_dir).await {
            Ok(entries) => entries,
            Err(_) => return Ok(()),
        };
        while let Ok(Some(project_entry)) = project_entries.next_entry().await {
            if !project_entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let project_id = project_entry.file_name().to_string_lossy().to_string();
            let sessions_dir = self.config.sessions_dir(&project_id);
            let mut session_entries = match tokio::fs::read_dir(&sessions_dir).await {
                Ok(entries) => entries,
                Err(_) => continue,
            };
            while let Ok(Some(session_entry)) = session_entries.next_entry().await {
                let path = session_entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let Ok(bytes) = tokio::fs::read(&path).await else { continue };
                let Ok(session) = serde_json::from_slice::<Session>(&bytes) else { continue };
                self.index
                    .upsert(SessionIndexEntry {
                        session_id: session.session_id.clone(),
                        project_id: project_id.clone(),
                        workspace_id: session.workspace_id.clone(),
                        status: session.status,
                    })
                    .await;
            }
        }
        Ok(())
    }

    /// Deletes old sessions: deletes files whose status is
    /// not active and whose `updated_at` predates `max_age`. The index
    /// entry is removed before the file is unlinked.
    pub async fn cleanup_old_sessions(&self, project_id: &ProjectId, max_age: chrono::Duration) -> OublietteResult<usize> {
        let now = chrono::Utc::now();
        let mut deleted = 0;
        for entry in self.index.entries_for_project(project_id).await {
            if entry.status == SessionStatus::Active {
                continue;
            }
            let _guard = self.locks.write(&entry.session_id).await;
            let Ok(session) = self.read_session_file_for(&entry.project_id, &entry.session_id).await else {
                self.index.remove(&entry.session_id).await;
                continue;
            };
            if now - session.updated_at < max_age {
                continue;
            }
            self.index.remove(&entry.session_id).await;
            let path = self.config.session_file_path(&entry.project_id, &entry.session_id);
            tokio::fs::remove_file(&path).await.ok();
            deleted += 1;
        }
        Ok(deleted)
    }

    pub async fn cleanup_all_old_sessions(&self, max_age: chrono::Duration) -> OublietteResult<HashMap<ProjectId, usize>> {
        let mut by_project: HashMap<ProjectId, usize> = HashMap::new();
        let projects_dir = self.config.projects_dir();
        let mut entries = match tokio::fs::read_dir(&projects_dir).await {
            Ok(entries) => entries,
            Err(_) => return Ok(by_project),
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            if !entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let project_id = entry.file_name().to_string_lossy().to_string();
            let deleted = self.cleanup_old_sessions(&project_id, max_age).await?;
            if deleted > 0 {
                by_project.insert(project_id, deleted);
            }
        }
        Ok(by_project)
    }

    pub fn config(&self) -> &Arc<OublietteConfig> {
        &self.config
    }
}

fn is_valid_session_id(session_id: &str) -> bool {
    !session_id.is_empty()
        && session_id.len() < 256
        && session_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoRunner;

    #[async_trait]
    impl InitialTurnRunner for EchoRunner {
        async fn run_first_turn(&self, _container_id: Option<&str>, prompt: &str) -> OublietteResult<TurnOutcome> {
            Ok(TurnOutcome {
                result_text: format!("echo: {prompt}"),
                input_tokens: 1,
                output_tokens: 1,
                runtime_session_id: Some("rt-1".to_string()),
            })
        }
    }

    async fn manager() -> (tempfile::TempDir, SessionManager) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = OublietteConfig::load().unwrap_or_else(|_| panic!("config should load with defaults"));
        config.home = dir.path().to_path_buf();
        let manager = SessionManager::new(Arc::new(config)).await;
        (dir, manager)
    }

    #[tokio::test]
    async fn create_persists_and_indexes() {
        let (_dir, manager) = manager().await;
        let opts = CreateOptions { workspace_id: Some("w1".into()), ..Default::default() };
        let session = manager.create(&"p1".to_string(), None, "hi", opts, &EchoRunner).await.unwrap();
        assert_eq!(session.turns.len(), 1);
        assert_eq!(session.turns[0].result_text.as_deref(), Some("echo: hi"));

        let loaded = manager.load(&session.session_id).await.unwrap();
        assert_eq!(loaded.session_id, session.session_id);
    }

    #[tokio::test]
    async fn create_without_workspace_id_fails() {
        let (_dir, manager) = manager().await;
        let opts = CreateOptions::default();
        let err = manager.create(&"p1".to_string(), None, "hi", opts, &EchoRunner).await.unwrap_err();
        assert!(matches!(err, OublietteError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn continue_appends_turn_and_rejects_non_active() {
        let (_dir, manager) = manager().await;
        let opts = CreateOptions { workspace_id: Some("w1".into()), ..Default::default() };
        let session = manager.create(&"p1".to_string(), None, "hi", opts, &EchoRunner).await.unwrap();

        manager.continue_session(&session.session_id, "again", &EchoRunner).await.unwrap();
        let loaded = manager.load(&session.session_id).await.unwrap();
        assert_eq!(loaded.turns.len(), 2);

        manager.end(&session.session_id).await.unwrap();
        let err = manager.continue_session(&session.session_id, "nope", &EchoRunner).await.unwrap_err();
        assert!(matches!(err, OublietteError::Conflict(_)));
    }

    #[tokio::test]
    async fn end_is_idempotent() {
        let (_dir, manager) = manager().await;
        let opts = CreateOptions { workspace_id: Some("w1".into()), ..Default::default() };
        let session = manager.create(&"p1".to_string(), None, "hi", opts, &EchoRunner).await.unwrap();
        manager.end(&session.session_id).await.unwrap();
        manager.end(&session.session_id).await.unwrap();
        let loaded = manager.load(&session.session_id).await.unwrap();
        assert_eq!(loaded.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn add_child_session_enforces_depth_invariant() {
        let (_dir, manager) = manager().await;
        let root_opts = CreateOptions { workspace_id: Some("w1".into()), ..Default::default() };
        let root = manager.create(&"p1".to_string(), None, "hi", root_opts, &EchoRunner).await.unwrap();

        let child_opts = CreateOptions {
            workspace_id: Some("w1".into()),
            parent_session_id: Some(root.session_id.clone()),
            depth: 1,
            ..Default::default()
        };
        let child = manager.create(&"p1".to_string(), None, "hi", child_opts, &EchoRunner).await.unwrap();

        let parent = manager.load(&root.session_id).await.unwrap();
        assert_eq!(parent.child_session_ids, vec![child.session_id.clone()]);
    }

    #[tokio::test]
    async fn load_missing_session_is_not_found() {
        let (_dir, manager) = manager().await;
        let err = manager.load(&"does-not-exist".to_string()).await.unwrap_err();
        assert!(matches!(err, OublietteError::NotFound(_)));
    }

    #[tokio::test]
    async fn recover_stale_fails_old_active_sessions() {
        let (_dir, manager) = manager().await;
        let opts = CreateOptions { workspace_id: Some("w1".into()), ..Default::default() };
        let session = manager.create(&"p1".to_string(), None, "hi", opts, &EchoRunner).await.unwrap();

        // Backdate updated_at past the recovery window.
        let mut stale = manager.load(&session.session_id).await.unwrap();
        stale.updated_at = chrono::Utc::now() - chrono::Duration::hours(2);
        manager.save_session(&stale).await.unwrap();

        let recovered = manager.recover_stale(chrono::Duration::minutes(30)).await.unwrap();
        assert_eq!(recovered, 1);
        let reloaded = manager.load(&session.session_id).await.unwrap();
        assert_eq!(reloaded.status, SessionStatus::Failed);
    }

    #[tokio::test]
    async fn cleanup_old_sessions_never_deletes_active() {
        let (_dir, manager) = manager().await;
        let opts = CreateOptions { workspace_id: Some("w1".into()), ..Default::default() };
        let session = manager.create(&"p1".to_string(), None, "hi", opts, &EchoRunner).await.unwrap();

        let mut old = manager.load(&session.session_id).await.unwrap();
        old.updated_at = chrono::Utc::now() - chrono::Duration::days(30);
        manager.save_session(&old).await.unwrap();

        let deleted = manager.cleanup_old_sessions(&"p1".to_string(), chrono::Duration::days(1)).await.unwrap();
        assert_eq!(deleted, 0);
        assert!(manager.load(&session.session_id).await.is_ok());
    }

    #[tokio::test]
    async fn cleanup_old_sessions_deletes_old_completed() {
        let (_dir, manager) = manager().await;
        let opts = CreateOptions { workspace_id: Some("w1".into()), ..Default::default() };
        let session = manager.create(&"p1".to_string(), None, "hi", opts, &EchoRunner).await.unwrap();
        manager.end(&session.session_id).await.unwrap();

        let mut old = manager.load(&session.session_id).await.unwrap();
        old.updated_at = chrono::Utc::now() - chrono::Duration::days(30);
        manager.save_session(&old).await.unwrap();

        let deleted = manager.cleanup_old_sessions(&"p1".to_string(), chrono::Duration::days(1)).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(manager.load(&session.session_id).await.is_err());
    }
}
