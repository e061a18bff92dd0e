//! Wires `SessionHandlers` into an `rmcp` tool router and a Streamable HTTP
//! `axum` app. The reverse relay's `oubliette_session::relay::jsonrpc`
//! module hand-rolls JSON-RPC over a bare socket, since there is no
//! Streamable HTTP transport to plug into there. The host-facing surface
//! instead uses `rmcp`'s `#[tool_router]`/`#[tool_handler]` macros, since
//! `rmcp` is this workspace's chosen MCP SDK rather than a hand-rolled
//! transport.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use rmcp::handler::server::tool::{Parameters, ToolRouter};
use rmcp::model::{CallToolResult, Content, Implementation, ProtocolVersion, ServerCapabilities, ServerInfo};
use rmcp::service::{Peer, RequestContext, RoleServer};
use rmcp::transport::streamable_http_server::session::local::LocalSessionManager;
use rmcp::transport::streamable_http_server::{StreamableHttpServerConfig, StreamableHttpService};
use rmcp::{tool, tool_handler, tool_router, ErrorData};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::handlers::SessionHandlers;
use super::types::{CallerToolResponseParams, SessionRequest, SessionToolOutput};

/// Keyed by session id so a pushed notification (a completed turn, or a
/// forwarded `caller_tool` call) can reach whichever MCP
/// connection is currently attached to that session. Populated from each
/// `spawn`/`message` tool call's `RequestContext`; entries for ended
/// sessions are dropped on `end`.
pub type PeerRegistry = Arc<RwLock<HashMap<String, Peer<RoleServer>>>>;

#[derive(Clone)]
pub struct OublietteMcpServer {
    handlers: Arc<SessionHandlers>,
    peers: PeerRegistry,
    tool_router: ToolRouter<Self>,
}

impl OublietteMcpServer {
    pub fn new(handlers: Arc<SessionHandlers>, peers: PeerRegistry) -> Self {
        Self { handlers, peers, tool_router: Self::tool_router() }
    }
}

#[tool_router]
impl OublietteMcpServer {
    #[tool(
        description = "Spawn, message, inspect, list, end, poll events for, or clean up agent sessions running inside isolated containers. `action` selects the verb; see each action's fields for its parameters."
    )]
    async fn session(
        &self,
        Parameters(request): Parameters<SessionRequest>,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        let is_spawn_like = matches!(request, SessionRequest::Spawn(_) | SessionRequest::Message(_));
        let is_end = matches!(request, SessionRequest::End(_));

        let output = self.handlers.dispatch(request).await.map_err(|e| e.to_mcp_error())?;

        if let Some(session_id) = &output.session_id {
            if is_spawn_like {
                self.peers.write().await.insert(session_id.clone(), context.peer.clone());
            } else if is_end {
                self.peers.write().await.remove(session_id);
            }
        }

        Ok(json_result(&output))
    }

    #[tool(
        description = "Resolve a pending caller_tool call: the external client answers a tool invocation an in-container agent asked it to run on its behalf."
    )]
    async fn caller_tool_response(&self, Parameters(params): Parameters<CallerToolResponseParams>) -> Result<CallToolResult, ErrorData> {
        self.handlers.caller_tool_response(params).await.map_err(|e| e.to_mcp_error())?;
        Ok(CallToolResult::success(vec![Content::text("{}")]))
    }
}

fn json_result(output: &SessionToolOutput) -> CallToolResult {
    match serde_json::to_string(output) {
        Ok(json) => CallToolResult::success(vec![Content::text(json)]),
        Err(e) => CallToolResult::error(vec![Content::text(format!("failed to serialize response: {e}"))]),
    }
}

#[tool_handler]
impl rmcp::ServerHandler for OublietteMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "oubliette".into(),
                title: Some("Oubliette agent orchestrator".into()),
                version: env!("CARGO_PKG_VERSION").into(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Orchestrates autonomous AI coding agents inside isolated containers. Use the `session` tool to \
                 spawn, message, inspect, list, end, and poll events from agent sessions, and `caller_tool_response` \
                 to answer tool calls an agent forwarded back to you."
                    .to_string(),
            ),
        }
    }
}

/// Builds the Streamable HTTP MCP service, mounted at `/mcp`, plus whatever
/// the caller merges in alongside it (`ops::router` for health/status).
pub fn build_app(handlers: Arc<SessionHandlers>, peers: PeerRegistry) -> Router {
    let service_factory = move || Ok(OublietteMcpServer::new(handlers.clone(), peers.clone()));
    let session_manager = Arc::new(LocalSessionManager::default());
    let config = StreamableHttpServerConfig {
        sse_keep_alive: Some(Duration::from_secs(15)),
        stateful_mode: true,
        cancellation_token: CancellationToken::new(),
    };
    let mcp_service = StreamableHttpService::new(service_factory, session_manager, config);
    Router::new().nest_service("/mcp", mcp_service)
}

/// Builds the `NotifySink` a fresh/resumed session's executor is installed
/// with: persists completed turns (streamed turns beyond the synchronous
/// first one `SessionManager::create` already records) and, best-effort,
/// pushes a log notification to whatever peer is currently registered for
/// the session. The MCP logging-notification call here isn't exercised by
/// anything in this workspace's retrieved reference material; a failure to
/// notify is logged and otherwise ignored; the `events` poll remains the
/// authoritative channel regardless of whether the push lands.
pub fn build_notify_sink(sessions: Arc<crate::session_manager::SessionManager>, peers: PeerRegistry) -> oubliette_session::NotifySink {
    use oubliette_session::model::EventType;

    Arc::new(move |session_id, event| {
        let sessions = sessions.clone();
        let peers = peers.clone();
        tokio::spawn(async move {
            if event.event_type == EventType::Completion {
                let text = event.final_text.clone().or_else(|| event.text.clone()).unwrap_or_default();
                if let Err(e) = sessions.complete_turn(&session_id, text, 0, 0).await {
                    warn!(session_id, error = %e, "failed to persist streamed turn completion");
                }
            }

            if !event.is_notifiable() {
                return;
            }
            let Some(peer) = peers.read().await.get(&session_id).cloned() else { return };
            let payload = serde_json::json!({
                "session_id": session_id,
                "type": event_type_label(event.event_type),
                "text": event.text,
                "tool_name": event.tool_name,
            });
            if let Err(e) = peer
                .notify_logging_message(rmcp::model::LoggingMessageNotificationParam {
                    level: rmcp::model::LoggingLevel::Info,
                    logger: Some("oubliette".to_string()),
                    data: payload,
                })
                .await
            {
                warn!(session_id, error = %e, "failed to push session notification to MCP peer");
            }
        });
    })
}

fn event_type_label(event_type: oubliette_session::model::EventType) -> &'static str {
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
