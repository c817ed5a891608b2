//! # relay-foundation
//!
//! Foundation layer for Relay:
//! - Error: the shared error taxonomy (`Error`, `Result`)
//! - Config: engine configuration (`RelayConfig`) with global + project merge
//! - Storage: `JsonStore` for reading and writing JSON config files

pub mod config;
pub mod error;
pub mod storage;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Config
// ============================================================================
pub use config::{
    merge_json, BridgeConfig, ClientMode, OrchestratorConfig, RelayConfig, RetryConfig,
    ServerConfig, ServersConfig, SupervisorConfig, CONTEXT_SERVICE, RELAY_CONFIG_FILE,
    TASK_SERVICE,
};

// ============================================================================
// Storage
// ============================================================================
pub use storage::JsonStore;
