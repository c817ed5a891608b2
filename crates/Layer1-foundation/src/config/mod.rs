//! Config - engine configuration
//!
//! - `relay.rs` - RelayConfig and its sections

mod relay;

pub use relay::{
    merge_json, BridgeConfig, ClientMode, OrchestratorConfig, RelayConfig, RetryConfig,
    ServerConfig, ServersConfig, SupervisorConfig, CONTEXT_SERVICE, RELAY_CONFIG_FILE,
    TASK_SERVICE,
};
