//! Remote client - capability server behind a stdio JSON-RPC transport

use super::transport::StdioTransport;
use super::types::{ToolCallResult, PROTOCOL_VERSION};
use super::CapabilityClient;
use async_trait::async_trait;
use parking_lot::RwLock;
use relay_foundation::{ClientMode, Error, Result};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub struct RemoteClient {
    name: String,
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    request_timeout: Duration,
    transport: RwLock<Option<Arc<StdioTransport>>>,
}

impl RemoteClient {
    pub fn new(
        name: impl Into<String>,
        command: impl Into<String>,
        args: Vec<String>,
        env: HashMap<String, String>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args,
            env,
            request_timeout,
            transport: RwLock::new(None),
        }
    }

    fn live_transport(&self) -> Option<Arc<StdioTransport>> {
        self.transport
            .read()
            .as_ref()
            .filter(|t| t.is_connected())
            .cloned()
    }

    async fn handshake(&self, transport: &StdioTransport) -> Result<()> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "relay",
                "version": env!("CARGO_PKG_VERSION"),
            }
        });
        let result = transport.request("initialize", Some(params)).await?;
        debug!("Server '{}' initialize result: {}", self.name, result);
        transport.notify("notifications/initialized", None).await
    }
}

#[async_trait]
impl CapabilityClient for RemoteClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn mode(&self) -> ClientMode {
        ClientMode::Remote
    }

    fn is_connected(&self) -> bool {
        self.live_transport().is_some()
    }

    async fn connect(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        // Stale transport from a dead process
        let stale = self.transport.write().take();
        if let Some(stale) = stale {
            stale.close().await;
        }

        if self.command.is_empty() {
            return Err(Error::connection(&self.name, "no command configured"));
        }

        let transport = StdioTransport::spawn(
            &self.name,
            &self.command,
            &self.args,
            &self.env,
            self.request_timeout,
        )?;

        if let Err(e) = self.handshake(&transport).await {
            transport.close().await;
            return Err(Error::connection(&self.name, format!("initialize failed: {}", e)));
        }

        *self.transport.write() = Some(Arc::new(transport));
        info!("Connected to capability server '{}'", self.name);
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        let transport = self
            .live_transport()
            .ok_or_else(|| Error::health_check(&self.name, "not connected"))?;
        transport
            .request("ping", None)
            .await
            .map(|_| ())
            .map_err(|e| Error::health_check(&self.name, e.to_string()))
    }

    async fn call(&self, operation: &str, args: Value) -> Result<Value> {
        let transport = self
            .live_transport()
            .ok_or_else(|| Error::NotInitialized(self.name.clone()))?;

        let raw = transport
            .request(
                "tools/call",
                Some(json!({ "name": operation, "arguments": args })),
            )
            .await?;

        let result: ToolCallResult = serde_json::from_value(raw).map_err(|e| {
            Error::remote_call(&self.name, operation, format!("malformed result: {}", e))
        })?;

        if result.is_error {
            let message = result.text().unwrap_or("unknown error").to_string();
            return Err(Error::remote_call(&self.name, operation, message));
        }

        Ok(result.into_value())
    }

    async fn disconnect(&self) -> Result<()> {
        let transport = self.transport.write().take();
        if let Some(transport) = transport {
            transport.close().await;
            info!("Disconnected from capability server '{}'", self.name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(command: &str) -> RemoteClient {
        RemoteClient::new(
            "taskService",
            command,
            Vec::new(),
            HashMap::new(),
            Duration::from_millis(500),
        )
    }

    #[tokio::test]
    async fn test_call_before_connect() {
        let client = client("task-server");
        let err = client.call("list_requests", json!({})).await.unwrap_err();
        assert!(matches!(err, Error::NotInitialized(_)));
        assert!(matches!(
            client.health_check().await,
            Err(Error::HealthCheck { .. })
        ));
    }

    #[tokio::test]
    async fn test_connect_missing_binary_fails() {
        let client = client("/nonexistent/relay-capability-server");
        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, Error::Connection { .. }));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_disconnect_without_connect() {
        let client = client("task-server");
        client.disconnect().await.unwrap();
        client.disconnect().await.unwrap();
    }
}
