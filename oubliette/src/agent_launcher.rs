//! The one capability boundary this core cannot implement itself: starting
//! and resuming an actual agent process. `StreamingExecutor` and the
//! non-streaming first-turn path are external collaborators consumed
//! through a capability interface — concrete agent protocols (OpenCode
//! HTTP+SSE, Droid JSON-RPC) are deliberately out of scope here.
//!
//! `AgentLauncher` is the seam a deployment plugs a concrete adapter into.
//! It extends `InitialTurnRunner` (the session manager's synchronous
//! first-turn contract) with the two calls the MCP handlers need to bring
//! up a streaming executor for an active session.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use oubliette_session::executor::StreamingExecutor;
use oubliette_session::model::Session;

use crate::error::{OublietteError, OublietteResult};
use crate::session_manager::InitialTurnRunner;

#[async_trait]
pub trait AgentLauncher: InitialTurnRunner {
    /// Starts a fresh executor for a session that has no runtime history
    /// yet (a session whose first turn was just recorded by `create`).
    async fn start_executor(&self, session: &Session) -> OublietteResult<Arc<dyn StreamingExecutor>>;

    /// Starts an executor that resumes `session.runtime_session_id` on the
    /// underlying agent runtime, for the spawn/message resume path.
    async fn resume_executor(&self, session: &Session) -> OublietteResult<Arc<dyn StreamingExecutor>>;
}

/// Placeholder launcher wired in until a concrete agent-runtime adapter is
/// configured. Every call fails with a clearly-labelled error rather than
/// panicking or silently no-opping, so a deployment missing its adapter
/// fails loudly at the first spawn instead of persisting half-started
/// sessions.
pub struct UnconfiguredAgentLauncher;

#[async_trait]
impl InitialTurnRunner for UnconfiguredAgentLauncher {
    async fn run_first_turn(
        &self,
        _container_id: Option<&str>,
        _prompt: &str,
    ) -> OublietteResult<crate::session_manager::TurnOutcome> {
        warn!("no AgentLauncher configured; rejecting first-turn execution");
        Err(OublietteError::Other(anyhow::anyhow!(
            "no agent runtime adapter is configured for this deployment"
        )))
    }
}

#[async_trait]
impl AgentLauncher for UnconfiguredAgentLauncher {
    async fn start_executor(&self, _session: &Session) -> OublietteResult<Arc<dyn StreamingExecutor>> {
        Err(OublietteError::Other(anyhow::anyhow!(
            "no agent runtime adapter is configured for this deployment"
        )))
    }

    async fn resume_executor(&self, _session: &Session) -> OublietteResult<Arc<dyn StreamingExecutor>> {
        Err(OublietteError::Other(anyhow::anyhow!(
            "no agent runtime adapter is configured for this deployment"
        )))
    }
}

/// Adapts a `&dyn AgentLauncher` into a `&dyn InitialTurnRunner` for
/// `SessionManager::create`/`continue_session`, which only need the
/// first-turn contract. A plain reference coercion from `&dyn AgentLauncher`
/// to `&dyn InitialTurnRunner` isn't available since the two are distinct
/// trait objects; this wrapper just forwards the one method instead.
pub struct AsInitialTurnRunner<'a>(pub &'a dyn AgentLauncher);

#[async_trait]
impl InitialTurnRunner for AsInitialTurnRunner<'_> {
    async fn run_first_turn(&self, container_id: Option<&str>, prompt: &str) -> OublietteResult<crate::session_manager::TurnOutcome> {
        self.0.run_first_turn(container_id, prompt).await
    }
}
