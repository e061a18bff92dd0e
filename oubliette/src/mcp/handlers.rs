//! Orchestration logic behind the `session` and `caller_tool_response`
//! tools, independent of MCP framing. `mcp::server` is the
//! only caller; it translates between `rmcp`'s tool-call plumbing and the
//! methods here.

use std::sync::Arc;

use tracing::{info, warn};

use oubliette_session::active_session::NotifySink;
use oubliette_session::buffer::BufferError;
use oubliette_session::model::{ActiveStatus, EventType, SessionStatus, StreamEvent};
use oubliette_session::relay::caller_tool::CallerToolRelay;
use oubliette_session::relay::jsonrpc::RequestId;
use oubliette_session::{ActiveSessionManager, SessionError, SessionResult};

use crate::agent_launcher::{AgentLauncher, AsInitialTurnRunner};
use crate::config::OublietteConfig;
use crate::error::{OublietteError, OublietteResult};
use crate::project::ProjectStore;
use crate::session_manager::{CreateOptions, SessionManager};
use crate::workspace::WorkspaceResolver;

use super::types::{
    CallerToolResponseParams, CleanupParams, EndParams, EventView, EventsParams, GetParams, ListParams, SessionRequest,
    SessionToolOutput, SpawnParams,
};

/// Default lookback for a bare `cleanup` call that doesn't specify
/// `max_age_secs`.
const DEFAULT_CLEANUP_MAX_AGE_SECS: i64 = 7 * 24 * 3600;

pub struct SessionHandlers {
    pub config: Arc<OublietteConfig>,
    pub sessions: Arc<SessionManager>,
    pub active: Arc<ActiveSessionManager>,
    pub projects: Arc<ProjectStore>,
    pub launcher: Arc<dyn AgentLauncher>,
    pub caller_tools: Arc<CallerToolRelay>,
    /// Pushes a synthetic `StreamEvent` to a session's event buffer and any
    /// connected MCP peer. Reused here to surface a `caller_tool` call the
    /// same way an agent-originated tool call would appear in
    /// `events`, rather than inventing a second notification path.
    pub notify: NotifySink,
}

impl SessionHandlers {
    /// Single entry point for every `session` action, used both by the MCP
    /// `session` tool and by `oubliette_call_tool` arriving over the relay
    /// so the two surfaces can't drift.
    pub async fn dispatch(&self, request: SessionRequest) -> OublietteResult<SessionToolOutput> {
        match request {
            SessionRequest::Spawn(p) => self.spawn_or_message("spawn", p).await,
            SessionRequest::Message(p) => self.spawn_or_message("message", p).await,
            SessionRequest::Get(p) => self.get(p).await,
            SessionRequest::List(p) => self.list(p).await,
            SessionRequest::End(p) => self.end(p).await,
            SessionRequest::Events(p) => self.events(p).await,
            SessionRequest::Cleanup(p) => self.cleanup(p).await,
        }
    }

    /// Forwards a `caller_tool` call from an in-container
    /// agent to whichever external MCP client announced `tool_name` under
    /// `caller_id`, and blocks until `caller_tool_response` resolves it or
    /// the relay's default timeout elapses. `session_id` identifies the
    /// relay connection for disconnect-driven cancellation; it's distinct
    /// from `caller_id`, which only namespaces the tool name.
    pub async fn dispatch_caller_tool(
        &self,
        session_id: &str,
        caller_id: &str,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> SessionResult<serde_json::Value> {
        let request_id = RequestId::String(uuid::Uuid::new_v4().to_string());
        let rx = self.caller_tools.register_call(request_id.clone(), session_id.to_string()).await;

        let payload = serde_json::json!({
            "request_id": request_id,
            "caller_id": caller_id,
            "tool": tool_name,
            "arguments": arguments,
        });
        (self.notify)(
            session_id.to_string(),
            StreamEvent {
                event_type: EventType::ToolCall,
                text: Some(payload.to_string()),
                tool_name: Some(format!("{caller_id}_{tool_name}")),
                role: None,
                final_text: None,
            },
        );

        self.caller_tools.await_call(&request_id, rx).await
    }

    /// `spawn` and `message` share one routing policy: a
    /// `message` with no active session for the workspace behaves exactly
    /// like a `spawn`.
    pub async fn spawn_or_message(&self, action: &str, params: SpawnParams) -> OublietteResult<SessionToolOutput> {
        let project = self.projects.get_or_create(&params.project_id, "default").await?;
        let project_root = self.config.projects_dir().join(&params.project_id);
        let workspaces = WorkspaceResolver::new(self.config.workspaces_dir(&params.project_id));
        let resolved = workspaces
            .resolve(&project, params.workspace_id.as_deref(), params.create_workspace.unwrap_or(false), &project_root)
            .await?;

        if let Some(caller_id) = &params.caller_id {
            if let Some(tools) = params.caller_tools.clone() {
                self.caller_tools.announce_tools(caller_id, tools).await;
            }
        }

        // Step 2/3: an active session already owns this workspace.
        if let Some(active) = self.active.get_by_workspace(&params.project_id, &resolved.id).await {
            if active.status().await.is_deliverable() {
                self.active.send_message(&active.session_id, &params.message).await?;
                self.sessions.append_pending_turn(&active.session_id, &params.message).await?;
                return self.session_output(action, &active.session_id).await;
            }
            // Not deliverable (completed/failed/timed out) but still
            // registered: fall through to resume/respawn below, same as if
            // nothing were registered. Drop the stale entry first so the
            // replacement can claim the workspace slot.
            self.active.remove(&active.session_id).await;
        }

        let resume = params.resume.unwrap_or(true);
        if resume {
            if let Some(completed) = self.sessions.find_resumable(&params.project_id, &resolved.id).await? {
                return self.resume_session(&project, completed, &params.message).await;
            }
        }

        self.spawn_fresh(&project, &resolved.id, params).await
    }

    async fn resume_session(
        &self,
        project: &oubliette_session::model::Project,
        completed: oubliette_session::model::Session,
        message: &str,
    ) -> OublietteResult<SessionToolOutput> {
        let executor = self.launcher.resume_executor(&completed).await?;
        let runtime_session_id = executor.runtime_session_id();
        let session = self.sessions.reactivate(&completed.session_id, runtime_session_id).await?;
        self.sessions.append_pending_turn(&session.session_id, message).await?;

        self.active
            .register(
                session.session_id.clone(),
                session.project_id.clone(),
                session.workspace_id.clone(),
                session.depth,
                project.max_agents as usize,
            )
            .await?;
        self.active.restart_executor(&session.session_id, executor).await?;
        self.active.send_message(&session.session_id, message).await?;

        info!(session_id = %session.session_id, "resumed session");
        self.session_output("spawn", &session.session_id).await
    }

    async fn spawn_fresh(
        &self,
        project: &oubliette_session::model::Project,
        workspace_id: &str,
        params: SpawnParams,
    ) -> OublietteResult<SessionToolOutput> {
        if let Some(parent_id) = &params.parent_session_id {
            let parent = self.sessions.load(parent_id).await?;
            let depth = params.depth.unwrap_or(parent.depth + 1);
            if depth != parent.depth + 1 {
                return Err(OublietteError::invalid_input(format!(
                    "child depth {depth} must equal parent depth {} + 1",
                    parent.depth
                )));
            }
            if depth > project.max_depth {
                return Err(OublietteError::conflict(format!(
                    "depth {depth} exceeds project max_depth {}",
                    project.max_depth
                )));
            }
            if parent.child_session_ids.len() as u32 >= project.max_agents {
                return Err(OublietteError::conflict(format!(
                    "parent session {parent_id} already has {} children (max {})",
                    parent.child_session_ids.len(),
                    project.max_agents
                )));
            }
        } else if params.depth.is_some_and(|d| d != 0) {
            return Err(OublietteError::invalid_input("depth may only be set alongside parent_session_id"));
        }

        let opts = CreateOptions {
            workspace_id: Some(workspace_id.to_string()),
            parent_session_id: params.parent_session_id.clone(),
            depth: params.depth.unwrap_or(0),
            model: params.model.clone(),
            autonomy_level: params.autonomy_level.clone(),
            reasoning_level: params.reasoning_level.clone(),
            tool_policy: Default::default(),
        };

        let session = self
            .sessions
            .create(&params.project_id, None, &params.message, opts, &AsInitialTurnRunner(self.launcher.as_ref()))
            .await?;

        self.active
            .register(
                session.session_id.clone(),
                session.project_id.clone(),
                session.workspace_id.clone(),
                session.depth,
                project.max_agents as usize,
            )
            .await?;
        let executor = self.launcher.start_executor(&session).await?;
        self.active.restart_executor(&session.session_id, executor).await?;

        info!(session_id = %session.session_id, project_id = %params.project_id, "session spawned");
        self.session_output("spawn", &session.session_id).await
    }

    pub async fn get(&self, params: GetParams) -> OublietteResult<SessionToolOutput> {
        let session = self.sessions.load(&params.session_id).await?;
        let mut out = SessionToolOutput::for_action("get");
        out.session_id = Some(session.session_id.clone());
        out.status = Some(session.status.to_string());
        out.session = Some(session);
        Ok(out)
    }

    pub async fn list(&self, params: ListParams) -> OublietteResult<SessionToolOutput> {
        let status = match params.status.as_deref() {
            None => None,
            Some("active") => Some(SessionStatus::Active),
            Some("completed") => Some(SessionStatus::Completed),
            Some("failed") => Some(SessionStatus::Failed),
            Some(other) => return Err(OublietteError::invalid_input(format!("unknown status filter: {other}"))),
        };
        let sessions = self.sessions.list(&params.project_id, status).await?;
        let mut out = SessionToolOutput::for_action("list");
        out.sessions = sessions;
        Ok(out)
    }

    /// Marks completed, closes the executor, and drops the in-memory
    /// active-session state. Idempotent: ending an already-ended session is
    /// a no-op at the Session Manager layer.
    pub async fn end(&self, params: EndParams) -> OublietteResult<SessionToolOutput> {
        if let Some(active) = self.active.get(&params.session_id).await {
            if let Some(executor) = active.current_executor().await {
                executor.close().await?;
            }
            self.active.remove(&params.session_id).await;
        }
        self.sessions.end(&params.session_id).await?;
        let mut out = SessionToolOutput::for_action("end");
        out.session_id = Some(params.session_id);
        Ok(out)
    }

    /// `events`: `After(since_index)` against the active
    /// session's buffer, with `-1` meaning "everything currently buffered."
    /// `include_children` interleaves each direct child's buffer under the
    /// same cursor, annotated with its own `session_id`; a child that has
    /// already purged past that cursor is skipped rather than failing the
    /// whole call, since the cursor wasn't chosen with that child in mind.
    pub async fn events(&self, params: EventsParams) -> OublietteResult<SessionToolOutput> {
        let Some(active) = self.active.get(&params.session_id).await else {
            return self.events_for_ended_session(params).await;
        };

        let (mut events, last_index) = read_buffer(&active.buffer, params.since_index).await?;
        let mut views: Vec<EventView> = events.drain(..).map(|e| EventView::from_buffered(e, None)).collect();

        if params.include_children.unwrap_or(false) {
            let session = self.sessions.load(&params.session_id).await?;
            for child_id in &session.child_session_ids {
                let Some(child) = self.active.get(child_id).await else { continue };
                match read_buffer(&child.buffer, params.since_index).await {
                    Ok((child_events, _)) => {
                        views.extend(child_events.into_iter().map(|e| EventView::from_buffered(e, Some(child_id.clone()))));
                    }
                    Err(SessionError::Purged { .. }) => {
                        warn!(session_id = %params.session_id, child_id, "skipping purged child events");
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            views.sort_by_key(|e| e.index);
        }

        let status = active.status().await;
        let mut out = SessionToolOutput::for_action("events");
        out.session_id = Some(params.session_id);
        out.status = Some(active_status_str(status).to_string());
        out.last_index = Some(last_index as i64);
        out.events = views;
        out.completed = Some(status == ActiveStatus::Completed);
        out.failed = Some(matches!(status, ActiveStatus::Failed | ActiveStatus::TimedOut));
        Ok(out)
    }

    async fn events_for_ended_session(&self, params: EventsParams) -> OublietteResult<SessionToolOutput> {
        let session = self.sessions.load(&params.session_id).await?;
        let mut out = SessionToolOutput::for_action("events");
        out.session_id = Some(session.session_id);
        out.status = Some(session.status.to_string());
        out.last_index = Some(params.since_index);
        out.completed = Some(session.status == SessionStatus::Completed);
        out.failed = Some(session.status == SessionStatus::Failed);
        Ok(out)
    }

    pub async fn cleanup(&self, params: CleanupParams) -> OublietteResult<SessionToolOutput> {
        let max_age = chrono::Duration::seconds(params.max_age_secs.unwrap_or(DEFAULT_CLEANUP_MAX_AGE_SECS));
        let mut out = SessionToolOutput::for_action("cleanup");
        let deleted = match &params.project_id {
            Some(project_id) => self.sessions.cleanup_old_sessions(project_id, max_age).await?,
            None => self.sessions.cleanup_all_old_sessions(max_age).await?.into_values().sum(),
        };
        out.deleted = Some(deleted);
        Ok(out)
    }

    /// Resolves a `caller_tool_response` call arriving back from the
    /// external MCP client, unblocking whichever in-container agent call is
    /// waiting on it.
    pub async fn caller_tool_response(&self, params: CallerToolResponseParams) -> OublietteResult<()> {
        use oubliette_session::relay::jsonrpc::{JsonRpcError, RequestId};

        let request_id: RequestId = serde_json::from_value(params.request_id)
            .map_err(|e| OublietteError::invalid_input(format!("invalid request_id: {e}")))?;
        let result = match (params.result, params.error) {
            (Some(value), _) => Ok(value),
            (None, Some(message)) => Err(JsonRpcError::internal(message)),
            (None, None) => Err(JsonRpcError::internal("caller_tool_response carried neither result nor error")),
        };
        self.caller_tools.complete(&request_id, result).await;
        Ok(())
    }

    async fn session_output(&self, action: &str, session_id: &str) -> OublietteResult<SessionToolOutput> {
        let session = self.sessions.load(session_id).await?;
        let mut out = SessionToolOutput::for_action(action);
        out.session_id = Some(session.session_id.clone());
        out.status = Some(session.status.to_string());
        Ok(out)
    }
}

fn active_status_str(status: ActiveStatus) -> &'static str {
    match status {
        ActiveStatus::Running => "running",
        ActiveStatus::Idle => "idle",
        ActiveStatus::Paused => "paused",
        ActiveStatus::Completed => "completed",
        ActiveStatus::Failed => "failed",
        ActiveStatus::TimedOut => "timed_out",
    }
}

async fn read_buffer(
    buffer: &oubliette_session::EventBuffer,
    since_index: i64,
) -> Result<(Vec<oubliette_session::buffer::BufferedEvent>, u64), SessionError> {
    if since_index < 0 {
        Ok(buffer.all().await)
    } else {
        buffer.after(since_index as u64).await.map_err(|BufferError::Purged { oldest_available }| SessionError::Purged {
            oldest_available,
        })
    }
}

impl EventView {
    fn from_buffered(e: oubliette_session::buffer::BufferedEvent, origin_session_id: Option<String>) -> Self {
        Self {
            index: e.index,
            timestamp: e.timestamp,
            event_type: event_type_str(e.event.event_type).to_string(),
            text: e.event.text,
            tool_name: e.event.tool_name,
            role: e.event.role,
            origin_session_id,
        }
    }
}

fn event_type_str(event_type: oubliette_session::model::EventType) -> &'static str {
    use oubliette_session::model::EventType;
    match event_type {
        EventType::System => "system",
        EventType::Message => "message",
        EventType::Delta => "delta",
        EventType::ToolCall => "tool_call",
        EventType::ToolResult => "tool_result",
        EventType::Completion => "completion",
        EventType::Error => "error",
    }
}
