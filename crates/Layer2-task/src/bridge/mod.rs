//! Command bridge - runs the external command-execution CLI
//!
//! Every invocation spawns `<binary> <args...> <command>` and gets a
//! [`CorrelationId`]. A runner task owns the child process and waits on
//! three things at once: process exit, a kill request, and the optional
//! timeout. Output is read line by line and delivered in order; the
//! `Complete` event of a correlation is always its last.
//!
//! Process handles live in an arena keyed by correlation id: inserted on
//! spawn, removed on exit or kill.

mod types;

pub use types::{
    BridgeEvent, BridgeEventKind, CorrelationId, ExecuteOptions, ExecutionResult, ProcessExit,
};

use parking_lot::RwLock;
use relay_foundation::{BridgeConfig, Error, Result};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 256;

/// How long output is still read after a kill
const KILL_GRACE: Duration = Duration::from_millis(200);

type EventCallback = Arc<dyn Fn(BridgeEvent) + Send + Sync>;
type Arena = Arc<RwLock<HashMap<CorrelationId, ProcessHandle>>>;

struct ProcessHandle {
    /// Kill requests; the runner acks once the signal was sent
    kill_tx: mpsc::Sender<oneshot::Sender<bool>>,
    command: String,
    started_at: Instant,
}

/// Delivers events of one correlation to its callback and to subscribers
#[derive(Clone)]
struct Emitter {
    correlation_id: CorrelationId,
    callback: EventCallback,
    events: broadcast::Sender<BridgeEvent>,
}

impl Emitter {
    fn emit(&self, kind: BridgeEventKind) {
        let event = BridgeEvent {
            correlation_id: self.correlation_id.clone(),
            kind,
        };
        (self.callback)(event.clone());
        let _ = self.events.send(event);
    }
}

pub struct CommandBridge {
    config: BridgeConfig,
    processes: Arena,
    events: broadcast::Sender<BridgeEvent>,
}

impl CommandBridge {
    pub fn new(config: BridgeConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config,
            processes: Arc::new(RwLock::new(HashMap::new())),
            events,
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.events.subscribe()
    }

    /// Run `command` to completion and buffer its output
    ///
    /// A non-zero exit is a `success: false` result, not an error. The
    /// timeout is `options.timeout`, falling back to the configured one.
    pub async fn execute(&self, command: &str, options: ExecuteOptions) -> Result<ExecutionResult> {
        let timeout = options
            .timeout
            .or_else(|| self.config.timeout_ms.map(Duration::from_millis));
        let options = ExecuteOptions { timeout, ..options };

        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = self.execute_stream(
            command,
            move |event| {
                let _ = tx.send(event);
            },
            options,
        )?;

        let mut output = Vec::new();
        let mut stderr = Vec::new();
        while let Some(event) = rx.recv().await {
            match event.kind {
                BridgeEventKind::Output(line) => output.push(line),
                BridgeEventKind::Error(line) => stderr.push(line),
                BridgeEventKind::Complete(exit) => {
                    if exit.timed_out {
                        return Err(Error::Timeout(format!(
                            "command {} exceeded {:?}",
                            id,
                            timeout.unwrap_or_default()
                        )));
                    }

                    let error = if stderr.is_empty() {
                        exit.killed.then(|| "process was killed".to_string())
                    } else {
                        Some(stderr.join("\n"))
                    };
                    return Ok(ExecutionResult {
                        success: exit.success,
                        output: output.join("\n"),
                        error,
                        exit_code: exit.exit_code,
                        duration: exit.duration,
                    });
                }
            }
        }

        Err(Error::Internal(format!(
            "command {} ended without a completion event",
            id
        )))
    }

    /// Spawn `command` and stream its events to `on_event`
    ///
    /// Returns right after the spawn. Spawn failures are returned here and
    /// produce no events.
    pub fn execute_stream<F>(
        &self,
        command: &str,
        on_event: F,
        options: ExecuteOptions,
    ) -> Result<CorrelationId>
    where
        F: Fn(BridgeEvent) + Send + Sync + 'static,
    {
        let mut cmd = Command::new(&self.config.binary);
        cmd.args(&self.config.args)
            .arg(command)
            .envs(&self.config.env)
            .envs(&options.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = options
            .working_directory
            .as_ref()
            .or(self.config.working_directory.as_ref())
        {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::spawn(&self.config.binary, e.to_string()))?;

        let correlation_id = CorrelationId::new();
        let (kill_tx, kill_rx) = mpsc::channel(1);
        self.processes.write().insert(
            correlation_id.clone(),
            ProcessHandle {
                kill_tx,
                command: command.to_string(),
                started_at: Instant::now(),
            },
        );

        debug!(
            correlation_id = %correlation_id,
            binary = %self.config.binary,
            "Spawned command"
        );

        let emitter = Emitter {
            correlation_id: correlation_id.clone(),
            callback: Arc::new(on_event),
            events: self.events.clone(),
        };
        let readers = spawn_readers(&mut child, &emitter);

        tokio::spawn(run_process(
            child,
            readers,
            kill_rx,
            options.timeout,
            emitter,
            Arc::clone(&self.processes),
        ));

        Ok(correlation_id)
    }

    /// Terminate one process
    ///
    /// Returns after the kill signal was sent; `false` when the id is unknown
    /// or the process already exited.
    pub async fn kill(&self, id: &CorrelationId) -> bool {
        let kill_tx = match self.processes.read().get(id) {
            Some(handle) => handle.kill_tx.clone(),
            None => return false,
        };

        let (ack_tx, ack_rx) = oneshot::channel();
        if kill_tx.send(ack_tx).await.is_err() {
            return false;
        }
        ack_rx.await.unwrap_or(false)
    }

    /// Terminate every tracked process; returns how many were killed
    pub async fn kill_all(&self) -> usize {
        let ids = self.running();
        let results = futures::future::join_all(ids.iter().map(|id| self.kill(id))).await;
        let killed = results.into_iter().filter(|k| *k).count();
        if killed > 0 {
            info!("Killed {} running commands", killed);
        }
        killed
    }

    /// Correlation ids of live processes
    pub fn running(&self) -> Vec<CorrelationId> {
        self.processes.read().keys().cloned().collect()
    }

    pub fn is_running(&self, id: &CorrelationId) -> bool {
        self.processes.read().contains_key(id)
    }

    /// Command text and age of a live process
    pub fn describe(&self, id: &CorrelationId) -> Option<(String, Duration)> {
        self.processes
            .read()
            .get(id)
            .map(|h| (h.command.clone(), h.started_at.elapsed()))
    }
}

fn spawn_readers(child: &mut Child, emitter: &Emitter) -> Vec<tokio::task::JoinHandle<()>> {
    let mut readers = Vec::with_capacity(2);

    if let Some(stdout) = child.stdout.take() {
        readers.push(tokio::spawn(read_lines(
            stdout,
            emitter.clone(),
            BridgeEventKind::Output,
        )));
    }

    if let Some(stderr) = child.stderr.take() {
        readers.push(tokio::spawn(read_lines(
            stderr,
            emitter.clone(),
            BridgeEventKind::Error,
        )));
    }

    readers
}

/// Emit one event per line until EOF
///
/// Lines are decoded lossily so a stray non-UTF-8 byte never stops the
/// pipe from being drained.
async fn read_lines<R>(pipe: R, emitter: Emitter, kind: fn(String) -> BridgeEventKind)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                    if buf.last() == Some(&b'\r') {
                        buf.pop();
                    }
                }
                emitter.emit(kind(String::from_utf8_lossy(&buf).into_owned()));
            }
            Err(e) => {
                warn!(
                    correlation_id = %emitter.correlation_id,
                    error = %e,
                    "Failed to read command output"
                );
                break;
            }
        }
    }
}

async fn run_process(
    mut child: Child,
    mut readers: Vec<tokio::task::JoinHandle<()>>,
    mut kill_rx: mpsc::Receiver<oneshot::Sender<bool>>,
    timeout: Option<Duration>,
    emitter: Emitter,
    processes: Arena,
) {
    let started = Instant::now();
    let id = emitter.correlation_id.clone();

    let deadline = async {
        match timeout {
            Some(timeout) => tokio::time::sleep(timeout).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    let mut killed = false;
    let mut timed_out = false;

    let status = tokio::select! {
        status = child.wait() => status,
        Some(ack) = kill_rx.recv() => {
            let sent = child.start_kill().is_ok();
            processes.write().remove(&id);
            killed = true;
            let _ = ack.send(sent);
            debug!(correlation_id = %id, "Kill requested");
            child.wait().await
        }
        _ = &mut deadline => {
            warn!(correlation_id = %id, ?timeout, "Command timed out, killing");
            let _ = child.start_kill();
            timed_out = true;
            child.wait().await
        }
    };

    processes.write().remove(&id);

    // Drain output before completing. A killed process may leave children
    // holding the pipes open, so stop reading after a grace period.
    if killed || timed_out {
        let drained =
            tokio::time::timeout(KILL_GRACE, futures::future::join_all(readers.iter_mut())).await;
        if drained.is_err() {
            readers.iter().for_each(|reader| reader.abort());
        }
    } else {
        for reader in readers {
            let _ = reader.await;
        }
    }

    let exit_code = match &status {
        Ok(status) => status.code(),
        Err(e) => {
            warn!(correlation_id = %id, error = %e, "Failed to wait for command");
            None
        }
    };
    let exit = ProcessExit {
        success: !killed && !timed_out && exit_code == Some(0),
        exit_code,
        killed,
        timed_out,
        duration: started.elapsed(),
    };

    debug!(correlation_id = %id, ?exit_code, killed, timed_out, "Command finished");
    emitter.emit(BridgeEventKind::Complete(exit));
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn shell_bridge() -> CommandBridge {
        CommandBridge::new(BridgeConfig {
            binary: "sh".to_string(),
            args: vec!["-c".to_string()],
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_execute_success() {
        let bridge = shell_bridge();
        let result = bridge
            .execute("echo hello; echo world", ExecuteOptions::default())
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.output, "hello\nworld");
        assert_eq!(result.exit_code, Some(0));
        assert!(result.error.is_none());
        assert!(bridge.running().is_empty());
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_not_an_error() {
        let bridge = shell_bridge();
        let result = bridge
            .execute("echo boom >&2; exit 1", ExecuteOptions::default())
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.exit_code, Some(1));
        assert_eq!(result.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let bridge = CommandBridge::new(BridgeConfig {
            binary: "/nonexistent/relay-cli-binary".to_string(),
            ..Default::default()
        });
        let err = bridge
            .execute("anything", ExecuteOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let bridge = shell_bridge();
        let started = Instant::now();
        let err = bridge
            .execute(
                "sleep 5",
                ExecuteOptions::default().with_timeout(Duration::from_millis(100)),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(4));
        assert!(bridge.running().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_utf8_does_not_stop_output() {
        let bridge = shell_bridge();
        let result = bridge
            .execute(
                "printf 'a\\n\\377\\nafter\\n'; sleep 0.2; echo done",
                ExecuteOptions::default(),
            )
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.output, "a\n\u{FFFD}\nafter\ndone");
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_working_directory_and_env() {
        let dir = std::env::temp_dir();
        let bridge = shell_bridge();
        let result = bridge
            .execute(
                "pwd; echo $RELAY_TEST_VALUE",
                ExecuteOptions::default()
                    .with_working_directory(&dir)
                    .with_env("RELAY_TEST_VALUE", "42"),
            )
            .await
            .unwrap();

        let lines: Vec<&str> = result.output.lines().collect();
        let expected = dir.canonicalize().unwrap();
        assert_eq!(
            std::path::Path::new(lines[0]).canonicalize().unwrap(),
            expected
        );
        assert_eq!(lines[1], "42");
    }

    #[tokio::test]
    async fn test_stream_delivers_output_then_complete() {
        let bridge = shell_bridge();
        let events = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, done_rx) = oneshot::channel();
        let done_tx = Mutex::new(Some(done_tx));

        let sink = Arc::clone(&events);
        let id = bridge
            .execute_stream(
                "echo one; echo two; echo three",
                move |event| {
                    let complete = event.is_complete();
                    sink.lock().push(event.kind);
                    if complete {
                        if let Some(tx) = done_tx.lock().take() {
                            let _ = tx.send(());
                        }
                    }
                },
                ExecuteOptions::default(),
            )
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), done_rx)
            .await
            .unwrap()
            .unwrap();

        let events = events.lock();
        assert_eq!(events.len(), 4);
        assert_eq!(events[0], BridgeEventKind::Output("one".into()));
        assert_eq!(events[1], BridgeEventKind::Output("two".into()));
        assert_eq!(events[2], BridgeEventKind::Output("three".into()));
        assert!(matches!(&events[3], BridgeEventKind::Complete(exit) if exit.success));
        assert!(!bridge.is_running(&id));
    }

    #[tokio::test]
    async fn test_kill_is_idempotent() {
        let bridge = shell_bridge();
        let mut rx = bridge.subscribe();
        let id = bridge
            .execute_stream("sleep 5", |_| {}, ExecuteOptions::default())
            .unwrap();
        assert!(bridge.is_running(&id));
        assert_eq!(bridge.describe(&id).unwrap().0, "sleep 5");

        assert!(bridge.kill(&id).await);
        assert!(!bridge.is_running(&id));
        assert!(!bridge.kill(&id).await);

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match event.kind {
            BridgeEventKind::Complete(exit) => {
                assert!(exit.killed);
                assert!(!exit.success);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_kill_all() {
        let bridge = shell_bridge();
        for _ in 0..3 {
            bridge
                .execute_stream("sleep 5", |_| {}, ExecuteOptions::default())
                .unwrap();
        }
        assert_eq!(bridge.running().len(), 3);
        assert_eq!(bridge.kill_all().await, 3);
        assert!(bridge.running().is_empty());
        assert_eq!(bridge.kill_all().await, 0);
        assert!(!bridge.kill(&CorrelationId::new()).await);
    }
}
