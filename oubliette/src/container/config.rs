//! `ContainerConfig`: what a session's container looks like before it's
//! created. `for_agent`-style per-role construction becomes `for_session`
//! here — same shape, different axis: one container per session rather
//! than per role.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::container::{NetworkConfig, NetworkMode, ResourceLimits, VolumeMapping};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    pub image: String,
    pub working_dir: String,
    pub env: HashMap<String, String>,
    pub volumes: Vec<VolumeMapping>,
    pub network: NetworkConfig,
    pub resources: ResourceLimits,
    pub command: Option<Vec<String>>,
    pub labels: HashMap<String, String>,
    pub restart_policy: RestartPolicy,
    pub security_opts: Vec<String>,
    pub cap_add: Vec<String>,
    pub cap_drop: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RestartPolicy {
    No,
    Always,
    OnFailure { max_retries: u32 },
    UnlessStopped,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::OnFailure { max_retries: 3 }
    }
}

impl ContainerConfig {
    pub fn new(image: String) -> Self {
        let mut labels = HashMap::new();
        labels.insert("app".to_string(), "oubliette".to_string());
        labels.insert("managed-by".to_string(), "oubliette".to_string());

        Self {
            image,
            working_dir: "/workspace".to_string(),
            env: HashMap::new(),
            volumes: Vec::new(),
            network: NetworkConfig {
                mode: NetworkMode::Bridge,
                network_name: Some("oubliette-network".to_string()),
                ports: Vec::new(),
            },
            resources: ResourceLimits::default(),
            command: None,
            labels,
            restart_policy: RestartPolicy::default(),
            security_opts: vec!["no-new-privileges".to_string()],
            cap_add: Vec::new(),
            cap_drop: vec!["ALL".to_string()],
        }
    }

    /// Configuration for one session's container: mounts the workspace
    /// directory, injects the environment variables the in-container proxy
    /// needs, and labels the container with the project and session it
    /// belongs to.
    pub fn for_session(
        image: String,
        project_id: &str,
        session_id: &str,
        workspace_host_path: &str,
        api_key: Option<&str>,
    ) -> Self {
        let mut config = Self::new(image);
        config.env.insert("OUBLIETTE_PROJECT_ID".to_string(), project_id.to_string());
        if let Some(key) = api_key {
            config.env.insert("OUBLIETTE_API_KEY".to_string(), key.to_string());
        }
        config.labels.insert("project-id".to_string(), project_id.to_string());
        config.labels.insert("session-id".to_string(), session_id.to_string());
        config.add_volume(workspace_host_path.to_string(), "/workspace".to_string(), false);
        config
    }

    pub fn add_volume(&mut self, host_path: String, container_path: String, read_only: bool) {
        self.volumes.push(VolumeMapping {
            host_path,
            container_path,
            read_only,
        });
    }

    pub fn add_port(&mut self, host_port: u16, container_port: u16) {
        self.network.ports.push(crate::container::PortMapping {
            host_port,
            container_port,
            protocol: "tcp".to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn for_session_mounts_workspace_and_labels_ids() {
        let config = ContainerConfig::for_session(
            "oubliette/agent-runtime:latest".to_string(),
            "proj-1",
            "sess-1",
            "/data/projects/proj-1/workspaces/w1",
            Some("key-123"),
        );
        assert_eq!(config.volumes.len(), 1);
        assert_eq!(config.env.get("OUBLIETTE_PROJECT_ID").unwrap(), "proj-1");
        assert_eq!(config.env.get("OUBLIETTE_API_KEY").unwrap(), "key-123");
        assert_eq!(config.labels.get("session-id").unwrap(), "sess-1");
    }
}
