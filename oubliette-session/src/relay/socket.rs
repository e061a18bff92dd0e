//! Reverse socket relay: pairs a host-initiated "upstream" connection with
//! an agent-initiated "downstream" connection over a single in-container
//! UNIX socket, then splices bytes between them.
//!
//! The relay never parses JSON-RPC itself once a pair is formed — framing
//! and method dispatch live one layer up, in the caller-tool relay. This
//! module only does connection pairing and opaque byte copying.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::error::{SessionError, SessionResult};
use crate::model::{ProjectId, SessionId};

pub const DEFAULT_SOCKET_PATH: &str = "/mcp/relay.sock";

const UPSTREAM_HEADER_PREFIX: &str = "OUBLIETTE-UPSTREAM";
const DOWNSTREAM_HEADER_PREFIX: &str = "OUBLIETTE-DOWNSTREAM";

/// Parsed from the first line of a connection, identifying which side of a
/// pair it is and what it claims to belong to.
#[derive(Debug, Clone)]
pub enum RelayHeader {
    Upstream {
        session_id: SessionId,
        project_id: ProjectId,
        depth: u32,
    },
    Downstream {
        project_id: ProjectId,
    },
}

pub fn parse_header(line: &str) -> Option<RelayHeader> {
    let mut parts = line.trim().split_whitespace();
    match parts.next()? {
        UPSTREAM_HEADER_PREFIX => {
            let session_id = parts.next()?.to_string();
            let project_id = parts.next()?.to_string();
            let depth: u32 = parts.next()?.parse().ok()?;
            Some(RelayHeader::Upstream { session_id, project_id, depth })
        }
        DOWNSTREAM_HEADER_PREFIX => {
            let project_id = parts.next()?.to_string();
            Some(RelayHeader::Downstream { project_id })
        }
        _ => None,
    }
}

/// A connection that has announced itself but not yet been paired.
struct PendingUpstream {
    session_id: SessionId,
    project_id: ProjectId,
    depth: u32,
    stream: UnixStream,
}

struct PendingDownstream {
    project_id: ProjectId,
    stream: UnixStream,
}

struct Queues {
    upstreams: VecDeque<PendingUpstream>,
    downstreams: VecDeque<PendingDownstream>,
}

/// Owns the listener and the two pairing queues. One instance per
/// container; `accept_loop` should be spawned once at startup.
pub struct SocketRelay {
    queues: Mutex<Queues>,
}

impl SocketRelay {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            queues: Mutex::new(Queues {
                upstreams: VecDeque::new(),
                downstreams: VecDeque::new(),
            }),
        })
    }

    pub async fn listen_and_pair(self: &Arc<Self>, socket_path: &str) -> SessionResult<()> {
        let _ = std::fs::remove_file(socket_path);
        let listener = UnixListener::bind(socket_path)
            .map_err(|e| SessionError::Other(anyhow::anyhow!("bind {socket_path}: {e}")))?;
        info!(socket_path, "relay listening");
        loop {
            let (stream, _addr) = listener
                .accept()
                .await
                .map_err(|e| SessionError::Other(anyhow::anyhow!("accept: {e}")))?;
            let relay = self.clone();
            tokio::spawn(async move {
                if let Err(e) = relay.handle_new_connection(stream).await {
                    warn!(error = %e, "relay connection setup failed");
                }
            });
        }
    }

    async fn handle_new_connection(self: Arc<Self>, mut stream: UnixStream) -> SessionResult<()> {
        let header_line = read_header_line(&mut stream).await?;
        let header = parse_header(&header_line)
            .ok_or_else(|| SessionError::InvalidInput { reason: format!("bad relay header: {header_line}") })?;

        match header {
            RelayHeader::Upstream { session_id, project_id, depth } => {
                self.offer_upstream(PendingUpstream { session_id, project_id, depth, stream }).await
            }
            RelayHeader::Downstream { project_id } => {
                self.offer_downstream(PendingDownstream { project_id, stream }).await
            }
        }
    }

    async fn offer_upstream(self: Arc<Self>, upstream: PendingUpstream) -> SessionResult<()> {
        let mut queues = self.queues.lock().await;
        if let Some(pos) = queues.downstreams.iter().position(|d| d.project_id == upstream.project_id) {
            let downstream = queues.downstreams.remove(pos).unwrap();
            drop(queues);
            splice(upstream, downstream).await;
        } else {
            debug!(session_id = %upstream.session_id, "queueing upstream, no downstream yet");
            queues.upstreams.push_back(upstream);
        }
        Ok(())
    }

    async fn offer_downstream(self: Arc<Self>, downstream: PendingDownstream) -> SessionResult<()> {
        let mut queues = self.queues.lock().await;
        if let Some(pos) = queues.upstreams.iter().position(|u| u.project_id == downstream.project_id) {
            let upstream = queues.upstreams.remove(pos).unwrap();
            drop(queues);
            splice(upstream, downstream).await;
        } else {
            debug!(project_id = %downstream.project_id, "queueing downstream, no upstream yet");
            queues.downstreams.push_back(downstream);
        }
        Ok(())
    }
}

/// Reads the header line byte-by-byte directly off the stream, never
/// through a `BufReader`. A `BufReader` would pull ahead into its own fill
/// buffer and, once dropped, silently discard any body bytes it read past
/// the header's `\n` — and the agent's first JSON-RPC request can arrive
/// in the same write as the header. One byte at a time is the only way to
/// stop exactly at the newline and leave everything after it on the
/// socket for `splice`'s raw `into_split` halves to read.
async fn read_header_line(stream: &mut UnixStream) -> SessionResult<String> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = stream
            .read(&mut byte)
            .await
            .map_err(|e| SessionError::Other(anyhow::anyhow!("read relay header: {e}")))?;
        if n == 0 {
            if line.is_empty() {
                return Err(SessionError::InvalidInput { reason: "relay connection closed before header".to_string() });
            }
            break;
        }
        if byte[0] == b'\n' {
            break;
        }
        line.push(byte[0]);
    }
    String::from_utf8(line).map_err(|e| SessionError::InvalidInput { reason: format!("relay header is not valid utf-8: {e}") })
}

/// Splices bytes bidirectionally between a paired upstream and downstream
/// until either side closes. Runs to completion on the task it's spawned
/// from; callers should `tokio::spawn` this.
async fn splice(upstream: PendingUpstream, downstream: PendingDownstream) {
    let session_id = upstream.session_id.clone();
    info!(session_id = %session_id, depth = upstream.depth, "relay pair formed");
    let (mut up_read, mut up_write) = upstream.stream.into_split();
    let (mut down_read, mut down_write) = downstream.stream.into_split();

    let (done_tx1, done_rx1) = oneshot::channel::<()>();
    let (done_tx2, done_rx2) = oneshot::channel::<()>();

    let up_to_down = tokio::spawn(async move {
        let _ = tokio::io::copy(&mut up_read, &mut down_write).await;
        let _ = down_write.shutdown().await;
        let _ = done_tx1.send(());
    });
    let down_to_up = tokio::spawn(async move {
        let _ = tokio::io::copy(&mut down_read, &mut up_write).await;
        let _ = up_write.shutdown().await;
        let _ = done_tx2.send(());
    });

    let _ = tokio::join!(done_rx1, done_rx2);
    up_to_down.abort();
    down_to_up.abort();
    info!(session_id = %session_id, "relay pair closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_upstream_header() {
        let header = parse_header("OUBLIETTE-UPSTREAM sess-1 proj-1 2").unwrap();
        match header {
            RelayHeader::Upstream { session_id, project_id, depth } => {
                assert_eq!(session_id, "sess-1");
                assert_eq!(project_id, "proj-1");
                assert_eq!(depth, 2);
            }
            _ => panic!("expected upstream"),
        }
    }

    #[test]
    fn parses_downstream_header() {
        let header = parse_header("OUBLIETTE-DOWNSTREAM proj-1").unwrap();
        match header {
            RelayHeader::Downstream { project_id } => assert_eq!(project_id, "proj-1"),
            _ => panic!("expected downstream"),
        }
    }

    #[test]
    fn rejects_malformed_header() {
        assert!(parse_header("GARBAGE").is_none());
        assert!(parse_header("OUBLIETTE-UPSTREAM only-one-field").is_none());
    }
}
