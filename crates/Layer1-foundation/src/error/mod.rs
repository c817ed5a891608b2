//! Error types for Relay
//!
//! One taxonomy shared by the supervisor, the capability clients, the command
//! bridge and the orchestrator.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Relay error type
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Capability servers
    // ========================================================================
    #[error("Connection to '{server}' failed: {message}")]
    Connection { server: String, message: String },

    #[error("Health check for '{server}' failed: {message}")]
    HealthCheck { server: String, message: String },

    #[error("Client '{0}' is not initialized")]
    NotInitialized(String),

    #[error("Remote call {server}.{operation} failed: {message}")]
    RemoteCall {
        server: String,
        operation: String,
        message: String,
    },

    #[error("Unknown server: {0}")]
    UnknownServer(String),

    // ========================================================================
    // Command execution
    // ========================================================================
    #[error("Failed to spawn '{command}': {message}")]
    Spawn { command: String, message: String },

    /// Displays the captured stderr, or the exit code when stderr is empty
    #[error("{}", describe_failure(.exit_code, .stderr))]
    ExecutionFailure {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Timeout: {0}")]
    Timeout(String),

    // ========================================================================
    // Tasks
    // ========================================================================
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: String,
        from: String,
        to: String,
    },

    // ========================================================================
    // Configuration
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // External
    // ========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Errors worth another connection attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Connection { .. }
                | Error::HealthCheck { .. }
                | Error::Timeout(_)
                | Error::RemoteCall { .. }
        )
    }

    pub fn connection(server: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Connection {
            server: server.into(),
            message: message.into(),
        }
    }

    pub fn health_check(server: impl Into<String>, message: impl Into<String>) -> Self {
        Error::HealthCheck {
            server: server.into(),
            message: message.into(),
        }
    }

    pub fn remote_call(
        server: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Error::RemoteCall {
            server: server.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn spawn(command: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Spawn {
            command: command.into(),
            message: message.into(),
        }
    }
}

fn describe_failure(exit_code: &Option<i32>, stderr: &str) -> String {
    if !stderr.is_empty() {
        return stderr.to_string();
    }
    match exit_code {
        Some(code) => format!("Process exited with code {}", code),
        None => "Process terminated by signal".to_string(),
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Internal(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Internal(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::connection("taskService", "refused").is_retryable());
        assert!(Error::Timeout("init".into()).is_retryable());
        assert!(!Error::UnknownServer("nope".into()).is_retryable());
        assert!(!Error::spawn("claude", "not found").is_retryable());
    }

    #[test]
    fn test_display_includes_context() {
        let err = Error::remote_call("contextService", "search", "boom");
        assert_eq!(
            err.to_string(),
            "Remote call contextService.search failed: boom"
        );

        let err = Error::ExecutionFailure {
            exit_code: Some(1),
            stderr: "boom".into(),
        };
        assert_eq!(err.to_string(), "boom");

        let err = Error::ExecutionFailure {
            exit_code: Some(3),
            stderr: String::new(),
        };
        assert_eq!(err.to_string(), "Process exited with code 3");

        let err = Error::ExecutionFailure {
            exit_code: None,
            stderr: String::new(),
        };
        assert_eq!(err.to_string(), "Process terminated by signal");
    }
}
