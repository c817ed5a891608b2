//! Capability clients
//!
//! A capability client is the engine's handle on one external service. Two
//! services exist: `taskService` (request planning and task bookkeeping) and
//! `contextService` (a searchable knowledge store). Each can run against an
//! in-process mock backend or a remote server spoken to over stdio.
//!
//! - [`CapabilityClient`]: connection lifecycle plus an untyped `call`
//! - [`MockClient`] / [`RemoteClient`]: the two implementations
//! - [`TaskServiceClient`] / [`ContextServiceClient`]: typed operations on top

mod context_service;
mod mock;
mod remote;
mod task_service;
mod transport;
pub mod types;

pub use context_service::{
    ContextEntry, ContextServiceClient, ContextUpdate, MockContextBackend, NewContextEntry,
    SearchFilters,
};
pub use mock::{MockBackend, MockClient};
pub use remote::RemoteClient;
pub use task_service::{
    MockTaskBackend, PlannedTask, RemoteRequest, RemoteTask, TaskServiceClient,
};
pub use transport::StdioTransport;

use async_trait::async_trait;
use relay_foundation::{ClientMode, Result, ServerConfig, CONTEXT_SERVICE, TASK_SERVICE};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Connection lifecycle and untyped operation dispatch for one service
#[async_trait]
pub trait CapabilityClient: Send + Sync {
    /// Registry name (`taskService`, `contextService`, ...)
    fn name(&self) -> &str;

    fn mode(&self) -> ClientMode;

    /// Whether the last connect succeeded and nothing has closed it since
    fn is_connected(&self) -> bool;

    /// Establish the connection; connecting an already connected client is a no-op
    async fn connect(&self) -> Result<()>;

    /// Cheap liveness probe
    async fn health_check(&self) -> Result<()>;

    /// Invoke `operation` with JSON arguments
    async fn call(&self, operation: &str, args: Value) -> Result<Value>;

    /// Release the connection; idempotent
    async fn disconnect(&self) -> Result<()>;
}

/// Build the client for `name` described by `config`
///
/// Mock clients get the in-memory backend matching the service name; any
/// other name gets an empty context store.
pub fn build_client(name: &str, config: &ServerConfig) -> Arc<dyn CapabilityClient> {
    match config.mode {
        ClientMode::Remote => {
            let command = config.command.clone().unwrap_or_default();
            Arc::new(RemoteClient::new(
                name,
                command,
                config.args.clone(),
                config.env.clone(),
                Duration::from_millis(config.request_timeout_ms),
            ))
        }
        ClientMode::Mock => {
            let backend: Box<dyn MockBackend> = match name {
                TASK_SERVICE => Box::new(MockTaskBackend::new()),
                CONTEXT_SERVICE => Box::new(MockContextBackend::new()),
                _ => Box::new(MockContextBackend::new()),
            };
            Arc::new(MockClient::new(name, backend))
        }
    }
}
