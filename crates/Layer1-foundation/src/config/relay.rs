//! Relay Config - engine configuration
//!
//! Loaded from `config.json` in the global store merged with the project
//! store. Every field has a default, so partial files are fine.

use crate::storage::{load_file, JsonStore};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Config file name inside a store
pub const RELAY_CONFIG_FILE: &str = "config.json";

/// Registry name of the task-tracking server
pub const TASK_SERVICE: &str = "taskService";

/// Registry name of the knowledge/context server
pub const CONTEXT_SERVICE: &str = "contextService";

// ============================================================================
// Relay Config
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelayConfig {
    pub bridge: BridgeConfig,
    pub orchestrator: OrchestratorConfig,
    pub supervisor: SupervisorConfig,
    pub servers: ServersConfig,
}

impl RelayConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Global config overlaid with the current project's config
    pub fn load() -> Result<Self> {
        let mut merged = Value::Object(Default::default());

        match JsonStore::global() {
            Ok(global) => {
                if let Some(value) = global.load_optional::<Value>(RELAY_CONFIG_FILE)? {
                    debug!(
                        path = %global.file_path(RELAY_CONFIG_FILE).display(),
                        "Loaded global config"
                    );
                    merge_json(&mut merged, value);
                }
            }
            Err(e) => warn!(error = %e, "Global config store unavailable, skipping"),
        }

        match JsonStore::current_project() {
            Ok(project) => {
                if let Some(value) = project.load_optional::<Value>(RELAY_CONFIG_FILE)? {
                    debug!(
                        path = %project.file_path(RELAY_CONFIG_FILE).display(),
                        "Loaded project config"
                    );
                    merge_json(&mut merged, value);
                }
            }
            Err(e) => warn!(error = %e, "Project config store unavailable, skipping"),
        }

        Self::from_value(merged)
    }

    /// Load a single explicit config file
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let value: Value = load_file(path.as_ref())?;
        Self::from_value(value)
    }

    fn from_value(value: Value) -> Result<Self> {
        let config: RelayConfig = serde_json::from_value(value)
            .map_err(|e| Error::Config(format!("Invalid relay config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.orchestrator.max_concurrent == 0 {
            return Err(Error::Config(
                "orchestrator.maxConcurrent must be at least 1".to_string(),
            ));
        }
        if self.bridge.binary.trim().is_empty() {
            return Err(Error::Config("bridge.binary must not be empty".to_string()));
        }
        for (name, server) in [
            (TASK_SERVICE, &self.servers.task_service),
            (CONTEXT_SERVICE, &self.servers.context_service),
        ] {
            if server.mode == ClientMode::Remote && server.command.is_none() {
                return Err(Error::Config(format!(
                    "servers.{}.command is required in remote mode",
                    name
                )));
            }
            if server.health_check_interval_ms == Some(0) {
                return Err(Error::Config(format!(
                    "servers.{}.healthCheckIntervalMs must be positive (null disables checks)",
                    name
                )));
            }
            if server.request_timeout_ms == 0 {
                return Err(Error::Config(format!(
                    "servers.{}.requestTimeoutMs must be positive",
                    name
                )));
            }
            if let Some(retry) = &server.retry {
                if retry.backoff_multiplier < 1.0 {
                    return Err(Error::Config(format!(
                        "servers.{}.retry.backoffMultiplier must be >= 1",
                        name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Recursively overlay `overlay` onto `base`; objects merge, everything else replaces
pub fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

// ============================================================================
// Command bridge
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeConfig {
    /// Executable of the command-execution CLI
    pub binary: String,
    /// Arguments placed before the command text
    pub args: Vec<String>,
    pub working_directory: Option<PathBuf>,
    /// Overlay on top of the inherited environment
    pub env: HashMap<String, String>,
    /// Per-invocation timeout for direct `execute` calls
    pub timeout_ms: Option<u64>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            binary: "claude".to_string(),
            args: Vec::new(),
            working_directory: None,
            env: HashMap::new(),
            timeout_ms: None,
        }
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrchestratorConfig {
    pub max_concurrent: usize,
    /// Watchdog per task; `None` disables it
    pub task_timeout_ms: Option<u64>,
    /// Approve finished tasks with the task service right after marking them done
    pub auto_approve: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            task_timeout_ms: Some(300_000),
            auto_approve: true,
        }
    }
}

// ============================================================================
// Supervisor
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SupervisorConfig {
    /// Hard deadline for one client's whole retry loop
    pub init_timeout_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            init_timeout_ms: 30_000,
        }
    }
}

// ============================================================================
// Capability servers
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServersConfig {
    pub task_service: ServerConfig,
    pub context_service: ServerConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientMode {
    #[default]
    Mock,
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub mode: ClientMode,
    /// Server executable (remote mode)
    pub command: Option<String>,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub required: bool,
    pub retry: Option<RetryConfig>,
    /// `None` disables health checks for this server
    pub health_check_interval_ms: Option<u64>,
    pub request_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            mode: ClientMode::Mock,
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
            required: false,
            retry: Some(RetryConfig::default()),
            health_check_interval_ms: Some(30_000),
            request_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.orchestrator.max_concurrent, 3);
        assert!(config.orchestrator.auto_approve);
        assert_eq!(config.supervisor.init_timeout_ms, 30_000);
        assert_eq!(config.servers.task_service.mode, ClientMode::Mock);
        assert_eq!(
            config.servers.context_service.health_check_interval_ms,
            Some(30_000)
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "orchestrator": { "maxConcurrent": 5 }, "bridge": { "binary": "sh", "args": ["-c"] } }"#,
        )
        .unwrap();

        let config = RelayConfig::load_from(&path).unwrap();
        assert_eq!(config.orchestrator.max_concurrent, 5);
        assert!(config.orchestrator.auto_approve);
        assert_eq!(config.bridge.binary, "sh");
        assert_eq!(config.bridge.args, vec!["-c".to_string()]);
    }

    #[test]
    fn test_merge_json_overlays_nested_objects() {
        let mut base = json!({
            "orchestrator": { "maxConcurrent": 2, "autoApprove": true },
            "bridge": { "binary": "claude" }
        });
        merge_json(
            &mut base,
            json!({ "orchestrator": { "autoApprove": false }, "bridge": { "args": ["-p"] } }),
        );

        assert_eq!(base["orchestrator"]["maxConcurrent"], 2);
        assert_eq!(base["orchestrator"]["autoApprove"], false);
        assert_eq!(base["bridge"]["binary"], "claude");
        assert_eq!(base["bridge"]["args"][0], "-p");
    }

    #[test]
    fn test_validate_rejects_remote_without_command() {
        let mut config = RelayConfig::default();
        config.servers.task_service.mode = ClientMode::Remote;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        config.servers.task_service.command = Some("npx".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_health_interval() {
        let mut config = RelayConfig::default();
        config.servers.context_service.health_check_interval_ms = Some(0);
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        config.servers.context_service.health_check_interval_ms = None;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_rejects_zero_health_interval() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "servers": { "taskService": { "healthCheckIntervalMs": 0 } } }"#,
        )
        .unwrap();

        assert!(matches!(RelayConfig::load_from(&path), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let mut config = RelayConfig::default();
        config.orchestrator.max_concurrent = 0;
        assert!(config.validate().is_err());
    }
}
