//! Caller-tool relay: lets an in-container agent invoke tools implemented by
//! the external MCP client that spawned it, round-tripping the call over
//! the paired relay socket.
//!
//! Pending calls are tracked in one-shot response channels keyed by
//! request id. A client disconnect cancels every request still pending for
//! that client rather than leaving them to time out individually.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};
use tracing::warn;

use crate::error::{SessionError, SessionResult};
use crate::model::CallerToolDescriptor;
use crate::relay::jsonrpc::{JsonRpcError, RequestId};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Methods served by an in-container agent over the paired relay socket.
pub mod methods {
    pub const SESSION_MESSAGE: &str = "session_message";
    pub const SESSION_EVENTS: &str = "session_events";
    pub const CALLER_TOOL: &str = "caller_tool";
    pub const OUBLIETTE_TOOLS: &str = "oubliette_tools";
    pub const OUBLIETTE_CALL_TOOL: &str = "oubliette_call_tool";
    /// Server-to-container notification, sent once before the first
    /// `tools/list` so the in-container MCP surface can advertise
    /// caller-namespaced tools immediately.
    pub const CALLER_TOOLS_CONFIG: &str = "caller_tools_config";
}

type PendingResult = Result<serde_json::Value, JsonRpcError>;

struct PendingCall {
    client_id: String,
    responder: oneshot::Sender<PendingResult>,
}

/// Tracks in-flight `caller_tool` calls for every connected client.
pub struct CallerToolRelay {
    pending: Mutex<HashMap<RequestId, PendingCall>>,
    /// Tool schemas each client has announced, namespaced `{caller_id}_{tool}`
    /// when surfaced to the in-container agent.
    tool_sets: Mutex<HashMap<String, Vec<CallerToolDescriptor>>>,
    timeout: Duration,
}

impl CallerToolRelay {
    pub fn new(timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(HashMap::new()),
            tool_sets: Mutex::new(HashMap::new()),
            timeout,
        })
    }

    pub fn with_default_timeout() -> Arc<Self> {
        Self::new(DEFAULT_TIMEOUT)
    }

    /// Registers the tool schemas a client makes available, replacing any
    /// prior set for that client. Called on `caller_tools_config`.
    pub async fn announce_tools(&self, client_id: &str, tools: Vec<CallerToolDescriptor>) {
        self.tool_sets.lock().await.insert(client_id.to_string(), tools);
    }

    /// Returns every announced tool across every connected client, with
    /// names namespaced `{caller_id}_{tool}` so two clients can't collide.
    pub async fn namespaced_tools(&self) -> Vec<(String, CallerToolDescriptor)> {
        let sets = self.tool_sets.lock().await;
        sets.iter()
            .flat_map(|(caller_id, tools)| {
                tools.iter().map(move |t| (format!("{caller_id}_{}", t.name), t.clone()))
            })
            .collect()
    }

    /// Registers a pending call and returns a receiver the caller should
    /// await with a timeout. `complete` or `cancel_client` resolves it.
    pub async fn register_call(&self, request_id: RequestId, client_id: String) -> oneshot::Receiver<PendingResult> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(request_id, PendingCall { client_id, responder: tx });
        rx
    }

    /// Called when the client's response for `request_id` arrives over the
    /// relay socket.
    pub async fn complete(&self, request_id: &RequestId, result: PendingResult) {
        if let Some(pending) = self.pending.lock().await.remove(request_id) {
            let _ = pending.responder.send(result);
        }
    }

    /// Cancels every pending call belonging to `client_id`, used when that
    /// client's relay connection drops.
    pub async fn cancel_client(&self, client_id: &str) {
        let mut pending = self.pending.lock().await;
        let stale: Vec<RequestId> = pending
            .iter()
            .filter(|(_, p)| p.client_id == client_id)
            .map(|(id, _)| id.clone())
            .collect();
        for id in stale {
            if let Some(p) = pending.remove(&id) {
                warn!(client_id, request_id = %id, "cancelling pending caller-tool call on disconnect");
                let _ = p.responder.send(Err(JsonRpcError::internal("caller disconnected")));
            }
        }
    }

    /// Awaits a previously registered call, applying the relay's default
    /// timeout. On timeout or channel-drop, prunes `request_id` from
    /// `pending` itself — `complete`/`cancel_client` only ever get to do
    /// that when the response (or disconnect) actually races the timeout.
    pub async fn await_call(&self, request_id: &RequestId, rx: oneshot::Receiver<PendingResult>) -> SessionResult<serde_json::Value> {
        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(err))) => Err(SessionError::Transient { reason: err.message }),
            Ok(Err(_)) => {
                self.pending.lock().await.remove(request_id);
                Err(SessionError::Transient { reason: "caller-tool response channel dropped".to_string() })
            }
            Err(_) => {
                self.pending.lock().await.remove(request_id);
                Err(SessionError::Transient { reason: "caller-tool call timed out".to_string() })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn complete_resolves_the_matching_call() {
        let relay = CallerToolRelay::new(Duration::from_secs(5));
        let id = RequestId::Number(1);
        let rx = relay.register_call(id.clone(), "client-a".to_string()).await;
        relay.complete(&id, Ok(serde_json::json!({"ok": true}))).await;
        let result = relay.await_call(&id, rx).await.unwrap();
        assert_eq!(result, serde_json::json!({"ok": true}));
    }

    #[tokio::test]
    async fn cancel_client_resolves_pending_calls_with_error() {
        let relay = CallerToolRelay::new(Duration::from_secs(5));
        let id = RequestId::Number(1);
        let rx = relay.register_call(id.clone(), "client-a".to_string()).await;
        relay.cancel_client("client-a").await;
        let err = relay.await_call(&id, rx).await.unwrap_err();
        assert!(matches!(err, SessionError::Transient { .. }));
    }

    #[tokio::test]
    async fn await_call_prunes_pending_entry_on_timeout() {
        let relay = CallerToolRelay::new(Duration::from_millis(10));
        let id = RequestId::Number(1);
        let rx = relay.register_call(id.clone(), "client-a".to_string()).await;
        let err = relay.await_call(&id, rx).await.unwrap_err();
        assert!(matches!(err, SessionError::Transient { .. }));
        assert!(!relay.pending.lock().await.contains_key(&id));
    }

    #[tokio::test]
    async fn namespaced_tools_prefixes_caller_id() {
        let relay = CallerToolRelay::new(Duration::from_secs(5));
        relay
            .announce_tools(
                "acme",
                vec![CallerToolDescriptor {
                    caller_id: "acme".to_string(),
                    name: "search".to_string(),
                    description: "search docs".to_string(),
                    input_schema: serde_json::json!({}),
                }],
            )
            .await;
        let tools = relay.namespaced_tools().await;
        assert_eq!(tools[0].0, "acme_search");
    }
}
