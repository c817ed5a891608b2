//! Engine - wires the supervisor, bridge and orchestrator together

use crate::bridge::CommandBridge;
use crate::orchestrator::TaskOrchestrator;
use relay_core::{ConnectionSupervisor, InitializationResult, SupervisorStatus};
use relay_foundation::{RelayConfig, Result};
use std::sync::Arc;
use tracing::info;

pub struct Engine {
    config: RelayConfig,
    supervisor: Arc<ConnectionSupervisor>,
    bridge: Arc<CommandBridge>,
    orchestrator: TaskOrchestrator,
}

impl Engine {
    pub fn from_config(config: &RelayConfig) -> Result<Self> {
        config.validate()?;

        let supervisor = Arc::new(ConnectionSupervisor::from_config(config));
        let bridge = Arc::new(CommandBridge::new(config.bridge.clone()));
        let orchestrator = TaskOrchestrator::new(
            Arc::clone(&supervisor),
            Arc::clone(&bridge),
            config.orchestrator.clone(),
        );

        Ok(Self {
            config: config.clone(),
            supervisor,
            bridge,
            orchestrator,
        })
    }

    /// Connect every capability client
    ///
    /// A failed optional server leaves `success` true; tasks created while
    /// the task service is down fall back to local ids.
    pub async fn start(&self) -> InitializationResult {
        let result = self.supervisor.initialize_all().await;
        info!(
            success = result.success,
            servers = result.servers.len(),
            "Engine started"
        );
        result
    }

    /// Kill running processes, then close every client connection
    pub async fn shutdown(&self) {
        let killed = self.bridge.kill_all().await;
        self.supervisor.disconnect_all().await;
        info!(killed, "Engine stopped");
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn supervisor(&self) -> &Arc<ConnectionSupervisor> {
        &self.supervisor
    }

    pub fn bridge(&self) -> &Arc<CommandBridge> {
        &self.bridge
    }

    pub fn orchestrator(&self) -> &TaskOrchestrator {
        &self.orchestrator
    }

    pub fn status(&self) -> SupervisorStatus {
        self.supervisor.get_status()
    }
}
