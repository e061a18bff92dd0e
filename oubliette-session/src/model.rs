//! Persisted and in-memory data model shared by the session manager, the
//! active session manager, and the MCP tool handlers.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type SessionId = String;
pub type ProjectId = String;
pub type WorkspaceId = String;

/// Session lifecycle status, persisted on disk and mirrored in the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
    Failed,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// One prompt/response cycle within a session. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub turn_number: u32,
    pub prompt: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub result_text: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Turn {
    pub fn new(turn_number: u32, prompt: String) -> Self {
        Self {
            turn_number,
            prompt,
            started_at: Utc::now(),
            ended_at: None,
            result_text: None,
            input_tokens: 0,
            output_tokens: 0,
        }
    }
}

/// Optional tool allow/deny configuration carried on a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolPolicy {
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
}

/// A persisted agent conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    pub project_id: ProjectId,
    pub workspace_id: WorkspaceId,

    pub parent_session_id: Option<SessionId>,
    #[serde(default)]
    pub child_session_ids: Vec<SessionId>,
    pub depth: u32,

    pub container_id: Option<String>,
    pub runtime_session_id: Option<String>,

    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    pub turns: Vec<Turn>,
    pub input_tokens: u64,
    pub output_tokens: u64,

    pub model: Option<String>,
    pub autonomy_level: Option<String>,
    pub reasoning_level: Option<String>,
    #[serde(default)]
    pub tool_policy: ToolPolicy,
}

impl Session {
    /// Mints a new root or child session record. Callers append the first
    /// turn themselves once the synchronous spawn path completes.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: SessionId,
        project_id: ProjectId,
        workspace_id: WorkspaceId,
        parent_session_id: Option<SessionId>,
        depth: u32,
        container_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            project_id,
            workspace_id,
            parent_session_id,
            child_session_ids: Vec::new(),
            depth,
            container_id,
            runtime_session_id: None,
            status: SessionStatus::Active,
            created_at: now,
            updated_at: now,
            turns: Vec::new(),
            input_tokens: 0,
            output_tokens: 0,
            model: None,
            autonomy_level: None,
            reasoning_level: None,
            tool_policy: ToolPolicy::default(),
        }
    }

    pub fn append_turn(&mut self, turn: Turn) {
        self.input_tokens += turn.input_tokens;
        self.output_tokens += turn.output_tokens;
        self.turns.push(turn);
        self.updated_at = Utc::now();
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// A lightweight view of a session used by `list`, without the full turn
/// history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub project_id: ProjectId,
    pub workspace_id: WorkspaceId,
    pub status: SessionStatus,
    pub depth: u32,
    pub turn_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Session> for SessionSummary {
    fn from(s: &Session) -> Self {
        Self {
            session_id: s.session_id.clone(),
            project_id: s.project_id.clone(),
            workspace_id: s.workspace_id.clone(),
            status: s.status,
            depth: s.depth,
            turn_count: s.turns.len(),
            created_at: s.created_at,
            updated_at: s.updated_at,
        }
    }
}

/// The authoritative `session_id -> location/status` map, persisted as a
/// single JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionIndexEntry {
    pub session_id: SessionId,
    pub project_id: ProjectId,
    pub workspace_id: WorkspaceId,
    pub status: SessionStatus,
}

/// An isolated directory under a project; unit of file-system scoping for an
/// agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub created_at: DateTime<Utc>,
    pub last_session_at: Option<DateTime<Utc>>,
    pub external_id: Option<String>,
    pub source: Option<String>,
}

impl Workspace {
    pub fn new(id: WorkspaceId) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            last_session_at: None,
            external_id: None,
            source: None,
        }
    }
}

/// Recursion and isolation configuration for a project. Everything else
/// about a project (auth, billing, display name, ...) is out of scope here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub project_id: ProjectId,
    pub default_workspace_id: WorkspaceId,
    pub max_depth: u32,
    pub max_agents: u32,
    pub max_cost_usd: f64,
    pub workspace_isolation: bool,
    #[serde(default)]
    pub protected_paths: Vec<String>,
    pub container_image: String,
}

impl Project {
    pub fn new(project_id: ProjectId, default_workspace_id: WorkspaceId) -> Self {
        Self {
            project_id,
            default_workspace_id,
            max_depth: 3,
            max_agents: 8,
            max_cost_usd: 5.0,
            workspace_isolation: true,
            protected_paths: Vec::new(),
            container_image: "oubliette/agent-runtime:latest".to_string(),
        }
    }
}

/// The runtime status of an `ActiveSession`, distinct from the persisted
/// `SessionStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActiveStatus {
    Running,
    Idle,
    Paused,
    Completed,
    Failed,
    TimedOut,
}

impl ActiveStatus {
    pub fn is_deliverable(self) -> bool {
        matches!(self, ActiveStatus::Running | ActiveStatus::Idle)
    }
}

/// The event kinds carried by a `BufferedEvent`. See the notification filter
/// in `active_session` for which of these cross into MCP push notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    System,
    Message,
    Delta,
    ToolCall,
    ToolResult,
    Completion,
    Error,
}

/// The payload of a single streamed event from an executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_text: Option<String>,
}

impl StreamEvent {
    pub fn is_work(&self) -> bool {
        matches!(
            self.event_type,
            EventType::Message
                | EventType::Delta
                | EventType::ToolCall
                | EventType::ToolResult
                | EventType::Error
        )
    }

    pub fn is_assistant_message(&self) -> bool {
        self.event_type == EventType::Message
            && self.role.as_deref() == Some("assistant")
            && self.text.as_deref().is_some_and(|t| !t.is_empty())
    }

    pub fn is_notifiable(&self) -> bool {
        matches!(
            self.event_type,
            EventType::Completion | EventType::ToolCall | EventType::ToolResult | EventType::Error
        )
    }
}

/// Extra metadata passed through `spawn`/`message` routing, not persisted
/// verbatim: the caller-tool schema set a session negotiates with its
/// external MCP client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallerToolDescriptor {
    pub caller_id: String,
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

pub type Metadata = HashMap<String, serde_json::Value>;
