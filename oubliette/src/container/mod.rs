//! The `Runtime` capability: container runtimes are treated as an external
//! collaborator consumed through a capability interface rather than
//! something this core implements protocol-by-protocol. This module
//! defines that interface and ships a Docker-backed implementation
//! (`docker`, via `bollard`) so the workspace is runnable end-to-end
//! rather than a trait stub.
//!
//! Everything here is gated behind the `container` feature; without it the
//! orchestrator still builds and serves the session/workspace MCP surface,
//! it just has no runtime to launch agents into.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod config;
#[cfg(feature = "container")]
pub mod docker;

pub use config::ContainerConfig;
#[cfg(feature = "container")]
pub use docker::DockerContainerProvider;

/// A container the runtime knows about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Container {
    pub id: String,
    pub name: String,
    pub status: ContainerStatus,
    pub image: String,
    pub env: HashMap<String, String>,
    pub volumes: Vec<VolumeMapping>,
    pub network: NetworkConfig,
    pub resources: ResourceLimits,
    /// Host filesystem path the runtime published the in-container relay
    /// socket to, once `publish_socket` has been called for this
    /// container. `None` until then.
    pub relay_socket_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ContainerStatus {
    Created,
    Running,
    Paused,
    Stopped,
    Removing,
    Error(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeMapping {
    pub host_path: String,
    pub container_path: String,
    pub read_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub mode: NetworkMode,
    pub network_name: Option<String>,
    pub ports: Vec<PortMapping>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NetworkMode {
    Bridge,
    Host,
    None,
    Custom(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortMapping {
    pub host_port: u16,
    pub container_port: u16,
    pub protocol: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub cpu_limit: Option<f64>,
    pub memory_limit: Option<i64>,
    pub memory_swap_limit: Option<i64>,
    pub cpu_shares: Option<i64>,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_limit: Some(1.0),
            memory_limit: Some(512 * 1024 * 1024),
            memory_swap_limit: None,
            cpu_shares: Some(1024),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub message: String,
    pub stream: LogStream,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LogStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerStats {
    pub cpu_percent: f64,
    pub memory_usage: u64,
    pub memory_limit: u64,
    pub network_io: NetworkIO,
    pub disk_io: DiskIO,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkIO {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskIO {
    pub read_bytes: u64,
    pub write_bytes: u64,
}

/// The container-runtime capability consumed by the orchestration core:
/// blocking, synchronous calls that may fail; it never parses
/// runtime-specific formats itself. Method names (`create/start/stop/
/// remove/exec/inspect/logs/status/build/pull/ping`) describe the literal
/// capability surface rather than any particular backend's naming.
#[async_trait]
pub trait Runtime: Send + Sync {
    async fn create(&self, name: &str, config: &ContainerConfig) -> anyhow::Result<Container>;
    async fn start(&self, container_id: &str) -> anyhow::Result<()>;
    async fn stop(&self, container_id: &str) -> anyhow::Result<()>;
    async fn remove(&self, container_id: &str) -> anyhow::Result<()>;
    async fn exec(&self, container_id: &str, command: Vec<String>) -> anyhow::Result<String>;
    async fn inspect(&self, container_id: &str) -> anyhow::Result<Container>;
    async fn logs(&self, container_id: &str, tail: Option<usize>) -> anyhow::Result<Vec<LogEntry>>;
    async fn status(&self, container_id: &str) -> anyhow::Result<ContainerStatus>;
    /// Builds the configured agent image if it doesn't already exist
    /// locally; a no-op for runtimes without a build step of their own.
    async fn build(&self, image: &str, context_dir: &str) -> anyhow::Result<()>;
    async fn pull(&self, image: &str) -> anyhow::Result<()>;
    async fn ping(&self) -> anyhow::Result<()>;

    /// Publishes the in-container relay socket to a host filesystem path
    /// so the server can dial it as the upstream side of
    /// the reverse socket relay. Mechanism is runtime-specific (native
    /// socket publication vs. bind-mounting the socket directory); callers
    /// only rely on the returned host path existing once this resolves.
    async fn publish_socket(&self, container_id: &str, container_socket_path: &str) -> anyhow::Result<String>;

    async fn list(&self, filter: Option<String>) -> anyhow::Result<Vec<Container>>;
    async fn stats(&self, container_id: &str) -> anyhow::Result<ContainerStats>;
    async fn copy_to(&self, container_id: &str, src_path: &str, dest_path: &str) -> anyhow::Result<()>;
    async fn copy_from(&self, container_id: &str, src_path: &str, dest_path: &str) -> anyhow::Result<()>;
}

/// High-level helper pairing a `Runtime` with the set of containers it has
/// launched for active sessions. Kept thin: all policy (which image, which
/// mounts) lives in the caller that builds a `ContainerConfig`.
pub struct ContainerManager {
    runtime: Box<dyn Runtime>,
    containers: HashMap<String, Container>,
}

impl ContainerManager {
    pub fn new(runtime: Box<dyn Runtime>) -> Self {
        Self {
            runtime,
            containers: HashMap::new(),
        }
    }

    pub async fn create_session_container(
        &mut self,
        session_id: &str,
        config: ContainerConfig,
    ) -> anyhow::Result<String> {
        let name = format!("oubliette-session-{session_id}");
        let container = self.runtime.create(&name, &config).await?;
        let container_id = container.id.clone();
        self.containers.insert(session_id.to_string(), container);
        self.runtime.start(&container_id).await?;
        Ok(container_id)
    }

    pub async fn remove_session_container(&mut self, session_id: &str) -> anyhow::Result<()> {
        let Some(container) = self.containers.remove(session_id) else {
            return Ok(());
        };
        self.runtime.stop(&container.id).await?;
        self.runtime.remove(&container.id).await?;
        Ok(())
    }

    pub fn container_id(&self, session_id: &str) -> Option<&str> {
        self.containers.get(session_id).map(|c| c.id.as_str())
    }

    pub async fn publish_relay_socket(&mut self, session_id: &str, container_socket_path: &str) -> anyhow::Result<String> {
        let container_id = self
            .containers
            .get(session_id)
            .map(|c| c.id.clone())
            .ok_or_else(|| anyhow::anyhow!("no container for session {session_id}"))?;
        let host_path = self.runtime.publish_socket(&container_id, container_socket_path).await?;
        if let Some(c) = self.containers.get_mut(session_id) {
            c.relay_socket_path = Some(host_path.clone());
        }
        Ok(host_path)
    }
}
