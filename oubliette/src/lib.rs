//! Oubliette — orchestrates autonomous AI coding agents inside isolated
//! containers and exposes them over the Model Context Protocol (HTTP).
//!
//! This crate is the binary-side half of the workspace: persistence
//! (`session_manager`), project/workspace metadata, the container
//! `Runtime` capability, the MCP tool surface, and the in-container
//! relay wiring. The reusable primitives it's built on — the event
//! buffer, `ActiveSession`/`ActiveSessionManager`, `StreamingExecutor`,
//! and the reverse socket relay — live in `oubliette_session`.

pub mod agent_launcher;
pub mod atomic;
pub mod cli;
pub mod config;
pub mod container;
pub mod container_proxy;
pub mod error;
pub mod mcp;
pub mod ops;
pub mod project;
pub mod relay_host;
pub mod session_manager;
pub mod workspace;

pub use error::{OublietteError, OublietteResult};
