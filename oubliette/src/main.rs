use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::sync::RwLock;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use oubliette::agent_launcher::{AgentLauncher, UnconfiguredAgentLauncher};
use oubliette::cli::{Cli, Commands};
use oubliette::config::OublietteConfig;
use oubliette::mcp::{self, SessionHandlers};
use oubliette::ops;
use oubliette::project::ProjectStore;
use oubliette::session_manager::SessionManager;
use oubliette::{container_proxy, relay_host};
use oubliette_session::relay::caller_tool::CallerToolRelay;
use oubliette_session::relay::socket::SocketRelay;
use oubliette_session::ActiveSessionManager;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match &cli.command {
        Commands::Serve { home } => serve(home.clone()).await,
        Commands::Relay { socket } => relay(socket).await,
        Commands::Proxy { socket, project_id } => container_proxy::run(socket, project_id).await.map_err(Into::into),
    }
}

fn init_tracing(verbose: bool) {
    let log_level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false).compact();
    let filter_layer = tracing_subscriber::EnvFilter::from_default_env().add_directive(log_level.into());
    tracing_subscriber::registry().with(filter_layer).with(fmt_layer).init();
}

/// Runs the host-side MCP server: wires the Session Manager, Active Session
/// Manager, Project Store, and caller-tool relay together, mounts the
/// `session`/`caller_tool_response` tools plus `/health`/`/status`, and
/// serves them over HTTP.
async fn serve(home: Option<std::path::PathBuf>) -> Result<()> {
    if let Some(home) = home {
        std::env::set_var("OUBLIETTE_HOME", home);
    }
    let config = Arc::new(OublietteConfig::load()?);
    tokio::fs::create_dir_all(config.projects_dir()).await?;

    let sessions = Arc::new(SessionManager::new(config.clone()).await);
    let peers: mcp::PeerRegistry = Arc::new(RwLock::new(HashMap::new()));
    let notify = mcp::build_notify_sink(sessions.clone(), peers.clone());
    let active = ActiveSessionManager::new(notify, config.idle_timeout(), config.event_buffer_capacity);

    let recovered = sessions.recover_stale(chrono::Duration::zero()).await?;
    if recovered > 0 {
        info!(recovered, "reconciled stale active sessions on startup");
    }
    active.spawn_idle_sweeper(std::time::Duration::from_secs(60));

    let projects = Arc::new(ProjectStore::new(config.projects_dir(), active.clone()));
    let launcher: Arc<dyn AgentLauncher> = Arc::new(UnconfiguredAgentLauncher);
    let caller_tools = CallerToolRelay::with_default_timeout();

    let handlers = Arc::new(SessionHandlers {
        config: config.clone(),
        sessions: sessions.clone(),
        active: active.clone(),
        projects,
        launcher,
        caller_tools,
        notify: mcp::build_notify_sink(sessions.clone(), peers.clone()),
    });

    let app = mcp::build_app(handlers.clone(), peers).merge(ops::router(ops::OpsState { active }));

    let bind_addr = format!("{}:{}", config.bind_host, config.mcp_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(bind_addr, "oubliette MCP server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Runs the in-container reverse socket relay: pairs the
/// host's upstream connection with the in-container proxy's downstream
/// connection and splices bytes between them. Intended as a container
/// entrypoint process, not an operator-facing command.
async fn relay(socket: &str) -> Result<()> {
    let relay = SocketRelay::new();
    relay.listen_and_pair(socket).await.map_err(Into::into)
}

// Re-exported so a concrete `AgentLauncher` (outside this workspace's scope)
// can drive the host side of the relay once it publishes a container's
// socket; kept here rather than only in `relay_host` so `cargo doc` surfaces
// it alongside the other entrypoints.
#[allow(unused_imports)]
use relay_host::connect_and_serve as _unused_relay_host_entrypoint;
