//! Error kinds shared by the session/streaming orchestration layer.
//!
//! The variants here map onto the semantic error kinds an MCP caller needs to
//! distinguish (invalid input, not found, conflict, purged, transient, fatal);
//! they are not a one-to-one mirror of every internal failure type.

use thiserror::Error;

use crate::model::SessionId;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found: {id}")]
    NotFound { id: SessionId },

    #[error("invalid session state for {operation}: {status}")]
    InvalidState { status: String, operation: String },

    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("conflict: {reason}")]
    Conflict { reason: String },

    #[error("failed to acquire session lock: {reason}")]
    LockError { reason: String },

    #[error("events purged, oldest available index is {oldest_available}")]
    Purged { oldest_available: u64 },

    #[error("executor error: {reason}")]
    Transient { reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type SessionResult<T> = Result<T, SessionError>;
