//! Session and streaming orchestration primitives: the event buffer, active
//! session state, the `StreamingExecutor` seam, and the reverse socket
//! relay an in-container agent uses to call back out.
//!
//! This crate has no knowledge of HTTP, MCP tool schemas, or container
//! runtimes; those live in the `oubliette` binary crate, which depends on
//! this one for the primitives above.

pub mod active_session;
pub mod buffer;
pub mod error;
pub mod executor;
pub mod model;
pub mod relay;

pub use active_session::{ActiveSession, ActiveSessionChecker, ActiveSessionManager, NotifySink};
pub use buffer::EventBuffer;
pub use error::{SessionError, SessionResult};
pub use executor::{ExecutorError, StreamingExecutor};
