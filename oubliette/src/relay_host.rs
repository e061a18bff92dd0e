//! Host-side half of the reverse socket relay.
//!
//! `oubliette_session::relay::socket::SocketRelay` runs inside the container
//! and only pairs and splices bytes; it never parses JSON-RPC. The bytes it
//! splices between the host's upstream connection and the in-container
//! proxy's downstream connection are opaque to it, which means *this* side
//! of the upstream connection is where `session_message`/`session_events`/
//! `caller_tool`/`oubliette_tools`/`oubliette_call_tool` actually get
//! interpreted and answered.
//!
//! Dialing the container's published socket is a concrete `AgentLauncher`'s
//! job, since only it knows when a container's relay socket has been
//! published (`container::Runtime::publish_socket`). This module owns what
//! happens once that connection exists.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::{info, warn};

use oubliette_session::relay::caller_tool::methods;
use oubliette_session::relay::jsonrpc::{self, JsonRpcError, JsonRpcMessage, JsonRpcResponse, RequestId};

use crate::error::OublietteResult;
use crate::mcp::handlers::SessionHandlers;
use crate::mcp::types::{EventsParams, SessionRequest, SpawnParams};

/// Dials `host_socket_path` (the host-visible path a container's relay
/// socket was published to), announces itself as the upstream side for
/// `session_id`, and serves relay RPCs until the connection closes.
pub async fn connect_and_serve(
    host_socket_path: &str,
    session_id: &str,
    project_id: &str,
    depth: u32,
    handlers: Arc<SessionHandlers>,
) -> OublietteResult<()> {
    let mut stream = UnixStream::connect(host_socket_path).await?;
    stream
        .write_all(format!("OUBLIETTE-UPSTREAM {session_id} {project_id} {depth}\n").as_bytes())
        .await?;
    serve(stream, session_id.to_string(), handlers).await
}

async fn serve(stream: UnixStream, session_id: String, handlers: Arc<SessionHandlers>) -> OublietteResult<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let message = match jsonrpc::parse_line(&line) {
            Ok(m) => m,
            Err(e) => {
                warn!(session_id, error = %e, "malformed relay message, dropping connection");
                break;
            }
        };

        let JsonRpcMessage::Request(request) = message else {
            // Responses/notifications from the agent side carry no id we
            // owe a reply to (e.g. `caller_tools_config`, handled up front
            // in `spawn_or_message` instead, since it only ever arrives
            // alongside a spawn/message call today).
            continue;
        };

        let result = dispatch(&request.method, request.params.unwrap_or(serde_json::Value::Null), &session_id, &handlers).await;
        let response = match result {
            Ok(value) => JsonRpcResponse::ok(request.id, value),
            Err(err) => JsonRpcResponse::err(request.id, err),
        };
        let line = jsonrpc::encode_line(&JsonRpcMessage::Response(response))?;
        write_half.write_all(line.as_bytes()).await?;
    }

    handlers.caller_tools.cancel_client(&session_id).await;
    info!(session_id, "relay upstream connection closed");
    Ok(())
}

async fn dispatch(
    method: &str,
    params: serde_json::Value,
    session_id: &str,
    handlers: &Arc<SessionHandlers>,
) -> Result<serde_json::Value, JsonRpcError> {
    match method {
        methods::SESSION_MESSAGE => {
            let mut spawn_params: SpawnParams =
                serde_json::from_value(params).map_err(|e| JsonRpcError::invalid_params(e.to_string()))?;
            // A child spawned/messaged from inside a running agent is always
            // scoped to that agent's own session as parent.
            spawn_params.parent_session_id.get_or_insert_with(|| session_id.to_string());
            to_rpc_result(handlers.dispatch(SessionRequest::Spawn(spawn_params)).await)
        }
        methods::SESSION_EVENTS => {
            let params: EventsParams = serde_json::from_value(params).map_err(|e| JsonRpcError::invalid_params(e.to_string()))?;
            to_rpc_result(handlers.dispatch(SessionRequest::Events(params)).await)
        }
        methods::CALLER_TOOL => {
            let params: CallerToolCallParams =
                serde_json::from_value(params).map_err(|e| JsonRpcError::invalid_params(e.to_string()))?;
            handlers
                .dispatch_caller_tool(session_id, &params.caller_id, &params.tool_name, params.arguments)
                .await
                .map_err(|e| JsonRpcError::internal(e.to_string()))
        }
        methods::OUBLIETTE_TOOLS => Ok(oubliette_tools_schema()),
        methods::OUBLIETTE_CALL_TOOL => {
            let request: SessionRequest = serde_json::from_value(params).map_err(|e| JsonRpcError::invalid_params(e.to_string()))?;
            to_rpc_result(handlers.dispatch(request).await)
        }
        other => Err(JsonRpcError::method_not_found(other)),
    }
}

fn to_rpc_result(result: OublietteResult<crate::mcp::types::SessionToolOutput>) -> Result<serde_json::Value, JsonRpcError> {
    match result {
        Ok(output) => serde_json::to_value(output).map_err(|e| JsonRpcError::internal(e.to_string())),
        Err(e) => Err(JsonRpcError::internal(e.to_string())),
    }
}

#[derive(Debug, serde::Deserialize)]
struct CallerToolCallParams {
    caller_id: String,
    tool_name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

/// Static introspection payload for `oubliette_tools`, generated from the
/// same `SessionRequest` schema the `session` MCP tool advertises so the two
/// surfaces can't drift apart.
fn oubliette_tools_schema() -> serde_json::Value {
    let schema = schemars::schema_for!(SessionRequest);
    serde_json::to_value(schema).unwrap_or(serde_json::Value::Null)
}
