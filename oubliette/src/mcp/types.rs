//! Request/response shapes for the `session` and `caller_tool_response`
//! tools. One unified `session` tool with an `action`
//! discriminator rather than one tool per verb.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use oubliette_session::model::{CallerToolDescriptor, Session, SessionSummary};

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SessionRequest {
    Spawn(SpawnParams),
    Message(SpawnParams),
    Get(GetParams),
    List(ListParams),
    End(EndParams),
    Events(EventsParams),
    Cleanup(CleanupParams),
}

/// Shared by `spawn` and `message`: `message` behaves like `spawn`
/// when no active session exists for the workspace, so both
/// actions take the same parameter set.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SpawnParams {
    #[schemars(description = "Project this session belongs to")]
    pub project_id: String,
    #[schemars(description = "Workspace id; omit to use/create the project default")]
    pub workspace_id: Option<String>,
    #[schemars(description = "Create the workspace if it doesn't exist")]
    pub create_workspace: Option<bool>,
    #[schemars(description = "The user message / prompt to deliver")]
    pub message: String,
    #[schemars(description = "Resume a completed session for this workspace if one exists (default true)")]
    pub resume: Option<bool>,
    #[schemars(description = "Parent session id, for a recursively spawned child")]
    pub parent_session_id: Option<String>,
    #[schemars(description = "Depth of this session; required alongside parent_session_id")]
    pub depth: Option<u32>,
    pub model: Option<String>,
    pub autonomy_level: Option<String>,
    pub reasoning_level: Option<String>,
    #[schemars(description = "Caller id under which caller_tools are namespaced")]
    pub caller_id: Option<String>,
    #[schemars(description = "Tool schemas this MCP client will execute itself when the agent calls them")]
    pub caller_tools: Option<Vec<CallerToolDescriptor>>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetParams {
    pub session_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListParams {
    pub project_id: String,
    #[schemars(description = "Filter by status: active | completed | failed")]
    pub status: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct EndParams {
    pub session_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct EventsParams {
    pub session_id: String,
    #[schemars(description = "-1 for the first poll; otherwise the last_index from the previous response")]
    pub since_index: i64,
    #[schemars(description = "Interleave events from child sessions, annotated with their session_id")]
    pub include_children: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CleanupParams {
    #[schemars(description = "Omit to clean up every project")]
    pub project_id: Option<String>,
    #[schemars(description = "Sessions older than this many seconds are eligible; default 7 days")]
    pub max_age_secs: Option<i64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CallerToolResponseParams {
    pub session_id: String,
    pub request_id: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

/// One event as surfaced through the `events` action's response array.
/// `origin_session_id` is only populated when `include_children` pulled
/// this event in from a session other than the one requested.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct EventView {
    pub index: u64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin_session_id: Option<String>,
}

/// Single output shape for every `session` action, anchored on the
/// `events` schema and extended with the other actions' payloads as
/// optional fields, in the style of a single `{action, message, data}`
/// tool output.
#[derive(Debug, Default, Serialize, JsonSchema)]
pub struct SessionToolOutput {
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_index: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<EventView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sessions: Vec<SessionSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<Session>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted: Option<usize>,
}

impl SessionToolOutput {
    pub fn for_action(action: &str) -> Self {
        Self { action: action.to_string(), ..Default::default() }
    }
}
