//! In-container MCP proxy: the process an agent runtime
//! spawns as its own MCP stdio server. It never parses the JSON-RPC that
//! flows through it — same philosophy as
//! `oubliette_session::relay::socket`'s splice, one layer further out: this
//! dials the local relay socket as the downstream side, announces itself,
//! and then copies bytes between its own stdio and that connection. The
//! agent's JSON-RPC calls travel opaquely through to `relay_host`, which is
//! the side that actually understands them.

use tokio::io::{self, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::info;

use crate::error::OublietteResult;

/// Connects to `socket_path` (the in-container relay socket
/// `oubliette relay` is listening on), announces the downstream side for
/// `project_id`, then splices stdin/stdout against the paired connection
/// until either side closes.
pub async fn run(socket_path: &str, project_id: &str) -> OublietteResult<()> {
    let mut stream = UnixStream::connect(socket_path).await?;
    stream.write_all(format!("OUBLIETTE-DOWNSTREAM {project_id}\n").as_bytes()).await?;
    info!(project_id, socket_path, "proxy connected, bridging stdio");

    let (mut sock_read, mut sock_write) = stream.into_split();
    let mut stdin = io::stdin();
    let mut stdout = io::stdout();

    let stdin_to_sock = async {
        let result = io::copy(&mut stdin, &mut sock_write).await;
        let _ = sock_write.shutdown().await;
        result
    };
    let sock_to_stdout = async {
        let result = io::copy(&mut sock_read, &mut stdout).await;
        let _ = stdout.shutdown().await;
        result
    };

    tokio::select! {
        r = stdin_to_sock => { r?; }
        r = sock_to_stdout => { r?; }
    }
    Ok(())
}
