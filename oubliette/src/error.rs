//! Top-level error type for the orchestrator binary.
//!
//! Variants map onto the error kinds an MCP caller needs to distinguish
//! (invalid input, not found, conflict, transient, fatal) plus a handful of
//! infrastructure failures (`Io`, `SerdeJson`, `Config`) that `#[from]`
//! straight through. `to_mcp_error` is the single place that translates a
//! kind into the `rmcp` error surface.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OublietteError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Session(#[from] oubliette_session::SessionError),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("container runtime error: {0}")]
    Runtime(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type OublietteResult<T> = Result<T, OublietteError>;

impl OublietteError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Whether retrying the same call without changing inputs might
    /// succeed. Used by relay/MCP plumbing deciding whether to surface a
    /// retry hint to the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OublietteError::Io(_) | OublietteError::Runtime(_) | OublietteError::Session(oubliette_session::SessionError::Transient { .. })
        )
    }

    /// Maps this error onto an `rmcp` tool-call error, preserving the kind
    /// distinction in the numeric code so a caller can branch on it without
    /// string-matching the message.
    pub fn to_mcp_error(&self) -> rmcp::ErrorData {
        use rmcp::model::ErrorCode;
        let code = match self {
            OublietteError::InvalidInput(_) => ErrorCode::INVALID_PARAMS,
            OublietteError::NotFound(_) => ErrorCode(-32001),
            OublietteError::Conflict(_) => ErrorCode(-32002),
            OublietteError::Session(oubliette_session::SessionError::Purged { .. }) => ErrorCode(-32003),
            OublietteError::Session(oubliette_session::SessionError::Transient { .. }) | OublietteError::Runtime(_) => {
                ErrorCode(-32004)
            }
            _ => ErrorCode::INTERNAL_ERROR,
        };
        rmcp::ErrorData::new(code, self.to_string(), None)
    }
}
