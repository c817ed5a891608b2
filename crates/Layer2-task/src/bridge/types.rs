//! Command bridge types

use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Handle of one spawned process in the bridge arena
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.0[..8.min(self.0.len())])
    }
}

/// Per-invocation overrides on top of the bridge configuration
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    pub working_directory: Option<PathBuf>,
    /// Overlay on top of the bridge environment
    pub env: HashMap<String, String>,
    pub timeout: Option<Duration>,
}

impl ExecuteOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Buffered result of [`CommandBridge::execute`](super::CommandBridge::execute)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    /// Exit code 0
    pub success: bool,
    /// stdout lines joined with `\n`
    pub output: String,
    /// stderr, if any was written
    pub error: Option<String>,
    /// `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
    pub duration: Duration,
}

/// How a process ended
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessExit {
    pub success: bool,
    pub exit_code: Option<i32>,
    /// Terminated through `kill` / `kill_all`
    pub killed: bool,
    /// Terminated because `ExecuteOptions::timeout` elapsed
    pub timed_out: bool,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEventKind {
    /// One stdout line
    Output(String),
    /// One stderr line
    Error(String),
    /// Always the last event of a correlation
    Complete(ProcessExit),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BridgeEvent {
    pub correlation_id: CorrelationId,
    pub kind: BridgeEventKind,
}

impl BridgeEvent {
    pub fn is_complete(&self) -> bool {
        matches!(self.kind, BridgeEventKind::Complete(_))
    }
}
