//! In-memory state for sessions that currently have a running executor, plus
//! the manager that tracks all of them.
//!
//! An `ActiveSession` is deliberately split into three independent
//! `RwLock`s rather than one lock around a single struct: status/activity,
//! the executor handle, and caller-tool state change at different rates and
//! are read from different places (the idle sweeper only touches the
//! first, a resume only touches the second, and MCP caller-tool calls only
//! touch the third). A single lock would serialize all three against each
//! other for no reason.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::buffer::EventBuffer;
use crate::error::{SessionError, SessionResult};
use crate::executor::StreamingExecutor;
use crate::model::{ActiveStatus, ProjectId, SessionId, StreamEvent, WorkspaceId};

/// Invoked by the event-collection task whenever an event crosses the
/// notification filter (`StreamEvent::is_notifiable`). The active session
/// manager is agnostic to how notifications actually reach a caller (MCP
/// server-initiated notification, a relay push, ...); that's wired in by
/// whoever constructs the manager.
pub type NotifySink = Arc<dyn Fn(SessionId, StreamEvent) + Send + Sync>;

/// Per-session caller-tool negotiation state. Kept here rather than folded
/// into status/executor because it's written from MCP request-handling
/// tasks that have nothing to do with the event-collection loop.
#[derive(Debug, Default, Clone)]
pub struct CallerToolState {
    pub caller_id: Option<String>,
    pub tools_announced: bool,
}

struct StatusState {
    status: ActiveStatus,
    last_activity: chrono::DateTime<chrono::Utc>,
    /// Most recent non-empty assistant `message` event's text. Attached to
    /// a `completion` event as `final_text` when that event's own `text`
    /// is empty, so an MCP client always observes a final answer.
    last_assistant_text: Option<String>,
    /// Set once a `completion` has been pushed as a notification for the
    /// current turn; cleared as soon as the session re-enters `running`.
    /// Prevents a second completion in the same idle window from firing a
    /// duplicate notification.
    completion_notified: bool,
}

/// A session with a live executor attached. Holds the event buffer for that
/// executor's output and the bookkeeping the event-collection task and idle
/// sweeper need.
pub struct ActiveSession {
    pub session_id: SessionId,
    pub project_id: ProjectId,
    pub workspace_id: WorkspaceId,
    pub depth: u32,

    pub buffer: EventBuffer,

    status: RwLock<StatusState>,
    executor: RwLock<Option<(u64, Arc<dyn StreamingExecutor>)>>,
    caller_tool: RwLock<CallerToolState>,

    /// Bumped every time the executor is replaced (e.g. on resume). The
    /// event-collection task compares this generation against the one it
    /// captured at spawn time and exits on mismatch instead of continuing
    /// to drain a stale executor.
    executor_generation: std::sync::atomic::AtomicU64,

    collector_shutdown: Notify,
}

impl ActiveSession {
    pub fn new(
        session_id: SessionId,
        project_id: ProjectId,
        workspace_id: WorkspaceId,
        depth: u32,
        buffer_capacity: usize,
    ) -> Self {
        Self {
            session_id,
            project_id,
            workspace_id,
            depth,
            buffer: EventBuffer::new(buffer_capacity),
            status: RwLock::new(StatusState {
                status: ActiveStatus::Running,
                last_activity: chrono::Utc::now(),
                last_assistant_text: None,
                completion_notified: false,
            }),
            executor: RwLock::new(None),
            caller_tool: RwLock::new(CallerToolState::default()),
            executor_generation: std::sync::atomic::AtomicU64::new(0),
            collector_shutdown: Notify::new(),
        }
    }

    pub async fn status(&self) -> ActiveStatus {
        self.status.read().await.status
    }

    pub async fn last_activity(&self) -> chrono::DateTime<chrono::Utc> {
        self.status.read().await.last_activity
    }

    pub async fn set_status(&self, status: ActiveStatus) {
        let mut s = self.status.write().await;
        s.status = status;
        s.last_activity = chrono::Utc::now();
        if status == ActiveStatus::Running {
            s.completion_notified = false;
        }
    }

    async fn touch(&self) {
        self.status.write().await.last_activity = chrono::Utc::now();
    }

    async fn record_assistant_text(&self, event: &StreamEvent) {
        if event.is_assistant_message() {
            self.status.write().await.last_assistant_text = event.text.clone();
        }
    }

    pub async fn last_assistant_text(&self) -> Option<String> {
        self.status.read().await.last_assistant_text.clone()
    }

    /// Returns `true` and marks the latch the first time it's called after
    /// the session entered `running`; `false` on every subsequent call
    /// until the next `running` transition resets it. Used to suppress
    /// duplicate `completion` notifications within one turn.
    async fn take_completion_notify(&self) -> bool {
        let mut s = self.status.write().await;
        if s.completion_notified {
            false
        } else {
            s.completion_notified = true;
            true
        }
    }

    /// Installs a new executor and returns the generation assigned to it.
    /// Any event-collection task still reading the previous executor will
    /// observe the generation mismatch on its next loop iteration and stop.
    pub async fn install_executor(&self, executor: Arc<dyn StreamingExecutor>) -> u64 {
        let generation = self
            .executor_generation
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
            + 1;
        *self.executor.write().await = Some((generation, executor));
        self.collector_shutdown.notify_waiters();
        generation
    }

    pub async fn current_executor(&self) -> Option<Arc<dyn StreamingExecutor>> {
        self.executor.read().await.as_ref().map(|(_, e)| e.clone())
    }

    fn current_generation(&self) -> u64 {
        self.executor_generation.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub async fn send_message(&self, text: &str) -> SessionResult<()> {
        let executor = self.current_executor().await.ok_or_else(|| SessionError::InvalidState {
            status: "no_executor".to_string(),
            operation: "message".to_string(),
        })?;
        executor.send_message(text).await?;
        self.set_status(ActiveStatus::Running).await;
        Ok(())
    }

    pub async fn caller_tool_state(&self) -> CallerToolState {
        self.caller_tool.read().await.clone()
    }

    pub async fn set_caller_tool_state(&self, state: CallerToolState) {
        *self.caller_tool.write().await = state;
    }
}

/// Injected into the session manager so that it can ask "does this project
/// have any live sessions" without depending on `ActiveSessionManager`
/// concretely, avoiding a Project Manager <-> Session Manager cycle.
#[async_trait::async_trait]
pub trait ActiveSessionChecker: Send + Sync {
    async fn has_active_sessions(&self, project_id: &ProjectId) -> bool;
    async fn count_active_for_project(&self, project_id: &ProjectId) -> usize;
}

struct Registry {
    sessions: HashMap<SessionId, Arc<ActiveSession>>,
    by_project: HashMap<ProjectId, Vec<SessionId>>,
    /// Keyed by `(project_id, workspace_id)`, not `workspace_id` alone:
    /// workspace ids are only unique within a project, and at most one
    /// active session is visible per `(project_id, workspace_id)` pair.
    by_workspace: HashMap<(ProjectId, WorkspaceId), SessionId>,
    collectors: HashMap<SessionId, JoinHandle<()>>,
}

/// Tracks every session that currently has a live executor attached.
/// Persistence (what happens when a session ends or the process restarts)
/// is the session manager's job; this only tracks what's alive right now.
pub struct ActiveSessionManager {
    registry: RwLock<Registry>,
    notify: NotifySink,
    idle_timeout: Duration,
    default_buffer_capacity: usize,
}

impl ActiveSessionManager {
    pub fn new(notify: NotifySink, idle_timeout: Duration, default_buffer_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            registry: RwLock::new(Registry {
                sessions: HashMap::new(),
                by_project: HashMap::new(),
                by_workspace: HashMap::new(),
                collectors: HashMap::new(),
            }),
            notify,
            idle_timeout,
            default_buffer_capacity,
        })
    }

    /// Registers a new active session, failing if `max_agents` for the
    /// project would be exceeded. Spawns the event-collection task against
    /// whatever executor is installed on the session (or none yet, in which
    /// case the caller must call `install_executor` before messages flow).
    pub async fn register(
        self: &Arc<Self>,
        session_id: SessionId,
        project_id: ProjectId,
        workspace_id: WorkspaceId,
        depth: u32,
        max_agents: usize,
    ) -> SessionResult<Arc<ActiveSession>> {
        let mut registry = self.registry.write().await;
        let current = registry.by_project.get(&project_id).map(|v| v.len()).unwrap_or(0);
        if current >= max_agents {
            return Err(SessionError::Conflict {
                reason: format!("project {project_id} already has {current} active sessions (max {max_agents})"),
            });
        }
        let session = Arc::new(ActiveSession::new(
            session_id.clone(),
            project_id.clone(),
            workspace_id.clone(),
            depth,
            self.default_buffer_capacity,
        ));
        registry.sessions.insert(session_id.clone(), session.clone());
        registry.by_project.entry(project_id.clone()).or_default().push(session_id.clone());
        registry.by_workspace.insert((project_id, workspace_id), session_id.clone());
        drop(registry);

        self.spawn_collector(session.clone(), 0).await;
        Ok(session)
    }

    pub async fn get(&self, session_id: &SessionId) -> Option<Arc<ActiveSession>> {
        self.registry.read().await.sessions.get(session_id).cloned()
    }

    pub async fn get_by_workspace(&self, project_id: &ProjectId, workspace_id: &WorkspaceId) -> Option<Arc<ActiveSession>> {
        let registry = self.registry.read().await;
        let key = (project_id.clone(), workspace_id.clone());
        let session_id = registry.by_workspace.get(&key)?;
        registry.sessions.get(session_id).cloned()
    }

    pub async fn send_message(&self, session_id: &SessionId, text: &str) -> SessionResult<()> {
        let session = self
            .get(session_id)
            .await
            .ok_or_else(|| SessionError::NotFound { id: session_id.clone() })?;
        session.send_message(text).await
    }

    /// Installs a fresh executor on an already-registered session (used on
    /// resume) and re-spawns the collector against the new generation. The
    /// old collector notices the generation bump and exits on its own.
    pub async fn restart_executor(
        &self,
        session_id: &SessionId,
        executor: Arc<dyn StreamingExecutor>,
    ) -> SessionResult<()> {
        let session = self
            .get(session_id)
            .await
            .ok_or_else(|| SessionError::NotFound { id: session_id.clone() })?;
        let generation = session.install_executor(executor).await;
        self.spawn_collector(session, generation).await;
        Ok(())
    }

    pub async fn remove(&self, session_id: &SessionId) -> Option<Arc<ActiveSession>> {
        let mut registry = self.registry.write().await;
        let session = registry.sessions.remove(session_id)?;
        if let Some(ids) = registry.by_project.get_mut(&session.project_id) {
            ids.retain(|id| id != session_id);
        }
        let key = (session.project_id.clone(), session.workspace_id.clone());
        if registry.by_workspace.get(&key) == Some(session_id) {
            registry.by_workspace.remove(&key);
        }
        if let Some(handle) = registry.collectors.remove(session_id) {
            handle.abort();
        }
        Some(session)
    }

    pub async fn list(&self) -> Vec<Arc<ActiveSession>> {
        self.registry.read().await.sessions.values().cloned().collect()
    }

    /// Spawns the task that drains `events()`/`errors()` for the executor
    /// currently installed on `session`, appending to its buffer and
    /// advancing status. Exits cleanly when the session's executor
    /// generation no longer matches `expected_generation`, which happens
    /// exactly once, right after a `restart_executor` call replaces it.
    ///
    /// There is a narrow window, documented rather than closed, where this
    /// task can observe one more event from the old executor after a
    /// replacement than a stricter design would allow; see the session
    /// manager's resume path for why that's acceptable here.
    async fn spawn_collector(self: &Arc<Self>, session: Arc<ActiveSession>, expected_generation: u64) {
        let manager = self.clone();
        let session_id = session.session_id.clone();
        let handle = tokio::spawn(async move {
            let Some(executor) = session.current_executor().await else {
                debug!(session_id = %session.session_id, "no executor installed, collector exiting");
                return;
            };
            if session.current_generation() != expected_generation && expected_generation != 0 {
                // a newer executor was installed between spawn and the first
                // poll; let that generation's own collector run instead.
                return;
            }
            let mut events = executor.events();
            let mut errors = executor.errors();
            // Once `errors` closes (all senders dropped), `errors.recv()`
            // resolves `Ready(None)` on every poll forever; left in the
            // `select!` unconditionally that starves the `events` branch
            // into a busy spin. Stop polling it once we've seen the close.
            let mut errors_closed = false;
            loop {
                if session.current_generation() != expected_generation {
                    debug!(session_id = %session.session_id, "executor replaced, collector exiting");
                    break;
                }
                tokio::select! {
                    biased;
                    _ = session.collector_shutdown.notified() => {
                        continue;
                    }
                    maybe_event = events.recv() => {
                        match maybe_event {
                            Some(mut event) => {
                                session.touch().await;
                                session.record_assistant_text(&event).await;
                                let was_idle = session.status().await == ActiveStatus::Idle;
                                if event.event_type == crate::model::EventType::Completion {
                                    session.set_status(ActiveStatus::Idle).await;
                                } else if was_idle && event.is_work() {
                                    session.set_status(ActiveStatus::Running).await;
                                }

                                let mut notifiable = event.is_notifiable();
                                if event.event_type == crate::model::EventType::Completion {
                                    if event.text.as_deref().unwrap_or("").is_empty() {
                                        event.final_text = session.last_assistant_text().await;
                                    }
                                    // Only the first completion per turn crosses
                                    // into a push notification.
                                    notifiable = session.take_completion_notify().await;
                                }

                                session.buffer.append(event.clone()).await;
                                if notifiable {
                                    (manager.notify)(session_id.clone(), event);
                                }
                            }
                            None => {
                                info!(session_id = %session_id, "event stream closed, session completed");
                                session.set_status(ActiveStatus::Completed).await;
                                break;
                            }
                        }
                    }
                    maybe_error = errors.recv(), if !errors_closed => {
                        match maybe_error {
                            Some(err) => {
                                warn!(session_id = %session_id, error = %err, "executor error");
                                session.set_status(ActiveStatus::Failed).await;
                                break;
                            }
                            None => {
                                // Error channel closed without an event channel
                                // close. Stop selecting on it and keep draining
                                // `events` until it closes too.
                                errors_closed = true;
                            }
                        }
                    }
                }
            }
        });
        self.registry.write().await.collectors.insert(session.session_id.clone(), handle);
    }

    /// Marks any session idle for longer than `idle_timeout` as timed out.
    /// Intended to run as a single periodic background task for the whole
    /// manager, not per-session.
    pub async fn sweep_idle(&self) {
        let now = chrono::Utc::now();
        let sessions = self.list().await;
        for session in sessions {
            let status = session.status().await;
            if status != ActiveStatus::Idle {
                continue;
            }
            let elapsed = now.signed_duration_since(session.last_activity().await);
            if elapsed.to_std().unwrap_or(Duration::ZERO) > self.idle_timeout {
                warn!(session_id = %session.session_id, "session idle timeout");
                session.set_status(ActiveStatus::TimedOut).await;
            }
        }
    }

    /// Runs `sweep_idle` on a fixed interval until cancelled. Spawn this
    /// once at startup.
    pub fn spawn_idle_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                manager.sweep_idle().await;
            }
        })
    }
}

#[async_trait::async_trait]
impl ActiveSessionChecker for ActiveSessionManager {
    async fn has_active_sessions(&self, project_id: &ProjectId) -> bool {
        self.registry
            .read()
            .await
            .by_project
            .get(project_id)
            .is_some_and(|v| !v.is_empty())
    }

    async fn count_active_for_project(&self, project_id: &ProjectId) -> usize {
        self.registry.read().await.by_project.get(project_id).map(|v| v.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutorError;
    use crate::model::EventType;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Mutex;

    struct MockExecutor {
        events_tx: Mutex<Option<mpsc::Sender<StreamEvent>>>,
        events_rx: Mutex<Option<mpsc::Receiver<StreamEvent>>>,
        errors_rx: Mutex<Option<mpsc::Receiver<ExecutorError>>>,
        closed: AtomicBool,
    }

    impl MockExecutor {
        fn new() -> (Arc<Self>, mpsc::Sender<StreamEvent>) {
            let (etx, erx) = mpsc::channel(16);
            let (_err_tx, err_rx) = mpsc::channel(1);
            let sender = etx.clone();
            (
                Arc::new(Self {
                    events_tx: Mutex::new(Some(etx)),
                    events_rx: Mutex::new(Some(erx)),
                    errors_rx: Mutex::new(Some(err_rx)),
                    closed: AtomicBool::new(false),
                }),
                sender,
            )
        }
    }

    #[async_trait::async_trait]
    impl StreamingExecutor for MockExecutor {
        async fn send_message(&self, _text: &str) -> SessionResult<()> {
            Ok(())
        }

        fn events(&self) -> mpsc::Receiver<StreamEvent> {
            self.events_rx.try_lock().unwrap().take().expect("events() called once")
        }

        fn errors(&self) -> mpsc::Receiver<ExecutorError> {
            self.errors_rx.try_lock().unwrap().take().expect("errors() called once")
        }

        async fn close(&self) -> SessionResult<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn runtime_session_id(&self) -> Option<String> {
            None
        }
    }

    fn noop_notify() -> NotifySink {
        Arc::new(|_, _| {})
    }

    #[tokio::test]
    async fn register_enforces_max_agents() {
        let manager = ActiveSessionManager::new(noop_notify(), Duration::from_secs(60), 100);
        manager
            .register("s1".into(), "p1".into(), "w1".into(), 1, 1)
            .await
            .unwrap();
        let err = manager
            .register("s2".into(), "p1".into(), "w2".into(), 1, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Conflict { .. }));
    }

    #[tokio::test]
    async fn event_collection_appends_and_notifies() {
        let manager = ActiveSessionManager::new(noop_notify(), Duration::from_secs(60), 100);
        let session = manager
            .register("s1".into(), "p1".into(), "w1".into(), 1, 10)
            .await
            .unwrap();
        let (executor, tx) = MockExecutor::new();
        manager.restart_executor(&"s1".to_string(), executor).await.unwrap();

        tx.send(StreamEvent {
            event_type: EventType::Message,
            text: Some("hi".into()),
            tool_name: None,
            role: Some("assistant".into()),
            final_text: None,
        })
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(session.buffer.len().await, 1);
    }

    #[tokio::test]
    async fn remove_drops_workspace_and_project_indices() {
        let manager = ActiveSessionManager::new(noop_notify(), Duration::from_secs(60), 100);
        manager
            .register("s1".into(), "p1".into(), "w1".into(), 1, 10)
            .await
            .unwrap();
        assert!(manager.get_by_workspace(&"p1".to_string(), &"w1".to_string()).await.is_some());
        manager.remove(&"s1".to_string()).await;
        assert!(manager.get_by_workspace(&"p1".to_string(), &"w1".to_string()).await.is_none());
        assert!(!manager.has_active_sessions(&"p1".to_string()).await);
    }
}
