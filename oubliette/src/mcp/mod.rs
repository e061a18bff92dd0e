//! The MCP tool surface: a unified `session` tool plus
//! `caller_tool_response`, exposed over Streamable HTTP via `rmcp`.
//!
//! `handlers` holds the orchestration logic (spawn/message routing,
//! depth enforcement, event polling) independent of any MCP framing;
//! `server` wires that logic into an `rmcp::ServerHandler` and an axum
//! app. `types` (the request/response shapes) predates this module and
//! is kept alongside it.

pub mod handlers;
pub mod server;
pub mod types;

pub use handlers::SessionHandlers;
pub use server::{build_app, build_notify_sink, OublietteMcpServer, PeerRegistry};
