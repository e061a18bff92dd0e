//! Configuration loading: `config` crate layering over environment
//! variables, with `OUBLIETTE_HOME` (falling back to the platform data
//! directory via `dirs`) as the root for everything persisted to disk.

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{OublietteError, OublietteResult};

#[derive(Debug, Clone, Deserialize)]
pub struct OublietteConfig {
    /// Root directory for session/project/workspace persistence.
    #[serde(default = "default_home")]
    pub home: PathBuf,

    /// Container runtime backend: currently only `"docker"` is implemented.
    #[serde(default = "default_container_runtime")]
    pub container_runtime: String,

    /// Host/port the MCP Streamable HTTP service and the health/status
    /// endpoints bind to.
    #[serde(default = "default_bind_host")]
    pub bind_host: String,
    #[serde(default = "default_mcp_port")]
    pub mcp_port: u16,
    #[serde(default = "default_ipc_port")]
    pub ipc_port: u16,

    /// Default capacity of a session's event buffer, unless a project
    /// overrides it.
    #[serde(default = "default_event_buffer_capacity")]
    pub event_buffer_capacity: usize,

    /// How long an active session may sit idle before the sweeper marks it
    /// timed out.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Optional API key required on inbound MCP requests. `None` disables
    /// the check, which is only appropriate for local/dev use.
    pub api_key: Option<String>,
}

fn default_home() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("oubliette"))
        .unwrap_or_else(|| PathBuf::from(".oubliette"))
}

fn default_container_runtime() -> String {
    "docker".to_string()
}

fn default_bind_host() -> String {
    "127.0.0.1".to_string()
}

fn default_mcp_port() -> u16 {
    9400
}

fn default_ipc_port() -> u16 {
    9401
}

fn default_event_buffer_capacity() -> usize {
    oubliette_session::buffer::DEFAULT_CAPACITY
}

fn default_idle_timeout_secs() -> u64 {
    600
}

impl OublietteConfig {
    /// Loads configuration from (lowest to highest precedence): built-in
    /// defaults, `<home>/config.json` if present, then `OUBLIETTE_*`
    /// environment variables.
    pub fn load() -> OublietteResult<Self> {
        let home = std::env::var("OUBLIETTE_HOME").map(PathBuf::from).unwrap_or_else(|_| default_home());
        let metadata_path = home.join("config.json");

        let mut builder = config::Config::builder()
            .set_default("home", home.to_string_lossy().to_string())
            .map_err(config_err)?
            .set_default("container_runtime", default_container_runtime())
            .map_err(config_err)?
            .set_default("bind_host", default_bind_host())
            .map_err(config_err)?
            .set_default("mcp_port", default_mcp_port() as i64)
            .map_err(config_err)?
            .set_default("ipc_port", default_ipc_port() as i64)
            .map_err(config_err)?
            .set_default("event_buffer_capacity", default_event_buffer_capacity() as i64)
            .map_err(config_err)?
            .set_default("idle_timeout_secs", default_idle_timeout_secs() as i64)
            .map_err(config_err)?;

        if metadata_path.exists() {
            builder = builder.add_source(config::File::from(metadata_path.clone()));
        }

        builder = builder.add_source(config::Environment::with_prefix("OUBLIETTE").separator("_"));

        let settings = builder.build().map_err(config_err)?;
        settings
            .try_deserialize()
            .map_err(|e| OublietteError::Config(format!("failed to parse configuration: {e}")))
    }

    pub fn projects_dir(&self) -> PathBuf {
        self.home.join("projects")
    }

    pub fn sessions_dir(&self, project_id: &str) -> PathBuf {
        self.projects_dir().join(project_id).join("sessions")
    }

    pub fn workspaces_dir(&self, project_id: &str) -> PathBuf {
        self.projects_dir().join(project_id).join("workspaces")
    }

    pub fn sessions_index_path(&self) -> PathBuf {
        self.home.join("sessions_index.json")
    }

    pub fn session_file_path(&self, project_id: &str, session_id: &str) -> PathBuf {
        self.sessions_dir(project_id).join(format!("{session_id}.json"))
    }

    pub fn project_metadata_path(&self, project_id: &str) -> PathBuf {
        self.projects_dir().join(project_id).join("metadata.json")
    }

    pub fn idle_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.idle_timeout_secs)
    }
}

fn config_err(e: config::ConfigError) -> OublietteError {
    OublietteError::Config(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_home_is_under_platform_data_dir_or_relative_fallback() {
        let home = default_home();
        assert!(home.ends_with("oubliette") || home == PathBuf::from(".oubliette"));
    }
}
