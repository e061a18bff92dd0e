//! CLI bootstrap: the minimal `clap` surface needed to start the three
//! processes this workspace's wire-up actually launches. Installer,
//! version upgrade, and daemon bootstrapping live outside this crate.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "oubliette")]
#[command(about = "Orchestrates autonomous AI coding agents inside isolated containers, over MCP")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Verbose (debug-level) logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the host-side MCP server: Session Manager, Active Session
    /// Manager, and the `session`/`caller_tool_response` tools over
    /// Streamable HTTP.
    Serve {
        /// Override `OUBLIETTE_HOME` for this run.
        #[arg(long)]
        home: Option<PathBuf>,
    },

    /// Run the in-container reverse socket relay: pairs the host's
    /// upstream connection with the in-container proxy's downstream
    /// connection. Intended as the container entrypoint
    /// alongside `proxy`, not something an operator runs directly.
    Relay {
        /// Path to the in-container UNIX socket to listen on.
        #[arg(long, default_value = oubliette_session::relay::socket::DEFAULT_SOCKET_PATH)]
        socket: String,
    },

    /// Run the in-container MCP proxy: the thin stdio-facing process the
    /// agent talks to, which forwards tool calls over the paired relay
    /// socket.
    Proxy {
        #[arg(long, default_value = oubliette_session::relay::socket::DEFAULT_SOCKET_PATH)]
        socket: String,
        #[arg(long, env = "OUBLIETTE_PROJECT_ID")]
        project_id: String,
    },
}
