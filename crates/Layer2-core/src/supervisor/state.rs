//! Supervisor state, status snapshots and events

use super::retry::RetryPolicy;
use chrono::{DateTime, Utc};
use relay_foundation::ClientMode;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Per-client bookkeeping kept by the supervisor
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientState {
    pub name: String,
    pub status: ConnectionStatus,
    pub last_connected: Option<DateTime<Utc>>,
    pub last_health_check: Option<DateTime<Utc>>,
    /// Failed connect attempts and failed probes since the last success
    pub error_count: u32,
    pub required: bool,
}

impl ClientState {
    pub fn new(name: impl Into<String>, required: bool) -> Self {
        Self {
            name: name.into(),
            status: ConnectionStatus::Disconnected,
            last_connected: None,
            last_health_check: None,
            error_count: 0,
            required,
        }
    }

    pub(crate) fn mark_connected(&mut self) {
        self.status = ConnectionStatus::Connected;
        self.last_connected = Some(Utc::now());
        self.error_count = 0;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerInitResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of `initialize_all`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InitializationResult {
    /// False only when a required client failed
    pub success: bool,
    pub servers: BTreeMap<String, ServerInitResult>,
}

/// Per-server summary for `get_status`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    pub status: ConnectionStatus,
    /// Last successful connect; kept across disconnects
    pub last_connected: Option<DateTime<Utc>>,
    /// Last health check that ran, whatever its result
    pub last_health_check: Option<DateTime<Utc>>,
    /// Failures since the last successful connect
    pub error_count: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SupervisorStatus {
    pub initialized: bool,
    pub servers: BTreeMap<String, ServerStatus>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedServerStatus {
    #[serde(flatten)]
    pub state: ClientState,
    pub mode: ClientMode,
    pub retry_policy: Option<RetryPolicy>,
    /// `None` when health checks are disabled
    pub health_check_interval_ms: Option<u64>,
    pub health_check_active: bool,
    pub reconnecting: bool,
}

/// Notifications for observers of the supervisor
#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    Initialized(InitializationResult),
    ServerDisconnected { name: String, error: String },
    ServerReconnected { name: String },
}

impl SupervisorEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SupervisorEvent::Initialized(_) => "initialized",
            SupervisorEvent::ServerDisconnected { .. } => "serverDisconnected",
            SupervisorEvent::ServerReconnected { .. } => "serverReconnected",
        }
    }
}
