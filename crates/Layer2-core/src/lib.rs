//! relay-core: capability clients and the connection supervisor
//!
//! Layer2 - connections to external capability servers
//!
//! # Modules
//!
//! - `capability`: [`CapabilityClient`] trait, mock and remote (stdio JSON-RPC)
//!   implementations, typed task/context service clients
//! - `supervisor`: [`ConnectionSupervisor`] with retry, health checks and
//!   reconnection
//!
//! # Example
//!
//! ```ignore
//! use relay_core::ConnectionSupervisor;
//! use relay_foundation::RelayConfig;
//! use std::sync::Arc;
//!
//! let supervisor = Arc::new(ConnectionSupervisor::from_config(&RelayConfig::load()?));
//! let result = supervisor.initialize_all().await;
//! if !result.success {
//!     // a required server is down
//! }
//!
//! let tasks = supervisor.task_service()?;
//! let request_id = tasks.request_planning("Ship it", &[], None).await?;
//! ```

pub mod capability;
pub mod supervisor;

pub use capability::{
    build_client, CapabilityClient, ContextEntry, ContextServiceClient, ContextUpdate,
    MockBackend, MockClient, MockContextBackend, MockTaskBackend, NewContextEntry, PlannedTask,
    RemoteClient, RemoteRequest, RemoteTask, SearchFilters, TaskServiceClient,
};
pub use supervisor::{
    retry_with_policy, ClientState, ConnectionStatus, ConnectionSupervisor,
    DetailedServerStatus, InitializationResult, RetryPolicy, ServerInitResult, ServerStatus,
    SupervisorEvent, SupervisorStatus,
};
