//! Stdio transport - JSON-RPC with a child process over stdin/stdout
//!
//! One writer task owns stdin, one reader task owns stdout and routes each
//! response to the pending request with the same id. stderr is drained into
//! debug logs so a chatty server never blocks on a full pipe.

use super::types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use parking_lot::Mutex;
use relay_foundation::{Error, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

pub struct StdioTransport {
    server: String,
    request_id: AtomicU64,
    child: Mutex<Option<Child>>,
    stdin_tx: mpsc::Sender<String>,
    pending: PendingMap,
    connected: Arc<AtomicBool>,
    request_timeout: Duration,
}

impl StdioTransport {
    /// Spawn the server process and start the I/O tasks
    pub fn spawn(
        server: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        request_timeout: Duration,
    ) -> Result<Self> {
        info!("Spawning capability server '{}': {} {:?}", server, command, args);

        let mut child = Command::new(command)
            .args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::connection(server, format!("failed to spawn '{}': {}", command, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::connection(server, "failed to capture stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::connection(server, "failed to capture stdout"))?;
        let stderr = child.stderr.take();

        let (stdin_tx, mut stdin_rx) = mpsc::channel::<String>(32);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let connected = Arc::new(AtomicBool::new(true));

        // stdin writer
        let connected_for_writer = Arc::clone(&connected);
        let mut writer = stdin;
        tokio::spawn(async move {
            while let Some(msg) = stdin_rx.recv().await {
                if let Err(e) = writer.write_all(msg.as_bytes()).await {
                    error!("Failed to write to server stdin: {}", e);
                    connected_for_writer.store(false, Ordering::SeqCst);
                    break;
                }
                if let Err(e) = writer.flush().await {
                    error!("Failed to flush server stdin: {}", e);
                    connected_for_writer.store(false, Ordering::SeqCst);
                    break;
                }
            }
        });

        // stdout reader
        let pending_for_reader = Arc::clone(&pending);
        let connected_for_reader = Arc::clone(&connected);
        let server_name = server.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                match serde_json::from_str::<JsonRpcResponse>(&line) {
                    Ok(response) => {
                        if let Some(id) = response.id {
                            if let Some(sender) = pending_for_reader.lock().remove(&id) {
                                let _ = sender.send(response);
                            }
                        }
                    }
                    Err(e) => debug!("Non JSON-RPC line from '{}': {}", server_name, e),
                }
            }
            connected_for_reader.store(false, Ordering::SeqCst);
            // Dropping the senders fails every in-flight request
            pending_for_reader.lock().clear();
            info!("Capability server '{}' closed stdout", server_name);
        });

        if let Some(stderr) = stderr {
            let server_name = server.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(server = %server_name, "stderr: {}", line);
                }
            });
        }

        Ok(Self {
            server: server.to_string(),
            request_id: AtomicU64::new(1),
            child: Mutex::new(Some(child)),
            stdin_tx,
            pending,
            connected,
            request_timeout,
        })
    }

    fn next_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Send a request and wait for its response
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        if !self.is_connected() {
            return Err(Error::remote_call(&self.server, method, "transport not connected"));
        }

        let id = self.next_id();
        let request = JsonRpcRequest::new(id, method, params);
        let msg = serde_json::to_string(&request)?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        debug!("Sending request to '{}': {}", self.server, msg);
        if self.stdin_tx.send(format!("{}\n", msg)).await.is_err() {
            self.pending.lock().remove(&id);
            return Err(Error::remote_call(&self.server, method, "stdin writer closed"));
        }

        let response = match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                return Err(Error::remote_call(&self.server, method, "response channel closed"))
            }
            Err(_) => {
                self.pending.lock().remove(&id);
                return Err(Error::remote_call(
                    &self.server,
                    method,
                    format!("timed out after {:?}", self.request_timeout),
                ));
            }
        };

        if let Some(error) = response.error {
            return Err(Error::remote_call(
                &self.server,
                method,
                format!("error {}: {}", error.code, error.message),
            ));
        }

        Ok(response.result.unwrap_or(Value::Null))
    }

    /// Send a notification (no response expected)
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::remote_call(&self.server, method, "transport not connected"));
        }

        let msg = serde_json::to_string(&JsonRpcNotification::new(method, params))?;
        self.stdin_tx
            .send(format!("{}\n", msg))
            .await
            .map_err(|_| Error::remote_call(&self.server, method, "stdin writer closed"))
    }

    /// Kill the server process; safe to call more than once
    pub async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.pending.lock().clear();

        let child = self.child.lock().take();
        if let Some(mut child) = child {
            if let Err(e) = child.kill().await {
                debug!("Kill of '{}' failed (already exited?): {}", self.server, e);
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    /// Server that reads requests and never answers
    fn silent_server(timeout: Duration) -> StdioTransport {
        StdioTransport::spawn(
            "taskService",
            "sh",
            &["-c".to_string(), "cat > /dev/null".to_string()],
            &HashMap::new(),
            timeout,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_request_timeout_is_remote_call_error() {
        let transport = silent_server(Duration::from_millis(50));
        let err = transport.request("ping", None).await.unwrap_err();

        match err {
            Error::RemoteCall {
                server,
                operation,
                message,
            } => {
                assert_eq!(server, "taskService");
                assert_eq!(operation, "ping");
                assert!(message.contains("timed out"));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(transport.is_connected());

        transport.close().await;
        assert!(!transport.is_connected());
        assert!(matches!(
            transport.request("ping", None).await,
            Err(Error::RemoteCall { .. })
        ));
    }
}
