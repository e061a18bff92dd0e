//! The `StreamingExecutor` capability: whatever actually runs an agent turn
//! inside a container and streams its output back. Concrete executors (a
//! container exec attached to a coding-agent CLI, a mock for tests) live
//! outside this crate; this module only defines the seam.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::SessionResult;
use crate::model::StreamEvent;

/// A turn-level failure surfaced out-of-band from the event stream, e.g. the
/// underlying process crashed or the container was killed.
#[derive(Debug, Clone, thiserror::Error)]
#[error("executor error: {0}")]
pub struct ExecutorError(pub String);

/// Something capable of carrying on a conversation with an agent process and
/// streaming its output.
///
/// Implementations are expected to be cheaply cloneable handles (e.g. an
/// `Arc` around a channel pair), since the active session manager replaces
/// the executor on resume without tearing down the struct.
#[async_trait]
pub trait StreamingExecutor: Send + Sync {
    /// Sends a prompt to the agent. Returns once the executor has accepted
    /// it, not once the agent has replied — replies arrive via `events()`.
    async fn send_message(&self, text: &str) -> SessionResult<()>;

    /// A channel of streamed events for this executor's lifetime. Each call
    /// should return a receiver tied to the same underlying stream; the
    /// event-collection task calls this once per executor generation.
    fn events(&self) -> mpsc::Receiver<StreamEvent>;

    /// A channel of out-of-band executor errors (process crash, container
    /// killed). Closing this channel without an error is equivalent to a
    /// clean exit.
    fn errors(&self) -> mpsc::Receiver<ExecutorError>;

    /// Idempotent shutdown. Safe to call more than once and from more than
    /// one task.
    async fn close(&self) -> SessionResult<()>;

    /// The executor-side identifier for this conversation, if the runtime
    /// assigns one independently of our `session_id` (used to resume after a
    /// process restart).
    fn runtime_session_id(&self) -> Option<String>;
}
