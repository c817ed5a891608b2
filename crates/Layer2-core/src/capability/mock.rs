//! In-process mock client

use super::CapabilityClient;
use async_trait::async_trait;
use relay_foundation::{ClientMode, Error, Result};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Synchronous operation handler behind a [`MockClient`]
pub trait MockBackend: Send + Sync {
    fn handle(&self, operation: &str, args: Value) -> Result<Value>;
}

/// Client whose operations are served by an in-memory backend
///
/// Connecting always succeeds. Calls made before `connect` fail with
/// [`Error::NotInitialized`] just like a remote client would.
pub struct MockClient {
    name: String,
    connected: AtomicBool,
    backend: Box<dyn MockBackend>,
}

impl MockClient {
    pub fn new(name: impl Into<String>, backend: Box<dyn MockBackend>) -> Self {
        Self {
            name: name.into(),
            connected: AtomicBool::new(false),
            backend,
        }
    }
}

#[async_trait]
impl CapabilityClient for MockClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn mode(&self) -> ClientMode {
        ClientMode::Mock
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> Result<()> {
        debug!("Mock client '{}' connected", self.name);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(Error::health_check(&self.name, "not connected"))
        }
    }

    async fn call(&self, operation: &str, args: Value) -> Result<Value> {
        if !self.is_connected() {
            return Err(Error::NotInitialized(self.name.clone()));
        }
        self.backend.handle(operation, args)
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    impl MockBackend for Echo {
        fn handle(&self, operation: &str, args: Value) -> Result<Value> {
            Ok(json!({ "operation": operation, "args": args }))
        }
    }

    #[tokio::test]
    async fn test_call_requires_connect() {
        let client = MockClient::new("echo", Box::new(Echo));
        let err = client.call("anything", json!({})).await.unwrap_err();
        assert!(matches!(err, Error::NotInitialized(name) if name == "echo"));
        assert!(client.health_check().await.is_err());

        client.connect().await.unwrap();
        let value = client.call("anything", json!({"a": 1})).await.unwrap();
        assert_eq!(value["operation"], "anything");
        assert_eq!(value["args"]["a"], 1);
        assert!(client.health_check().await.is_ok());
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let client = MockClient::new("echo", Box::new(Echo));
        client.connect().await.unwrap();
        client.disconnect().await.unwrap();
        client.disconnect().await.unwrap();
        assert!(!client.is_connected());
    }
}
