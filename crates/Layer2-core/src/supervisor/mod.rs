//! Connection Supervisor
//!
//! Owns the registry of named capability clients and keeps them connected:
//!
//! - initial connect with retry and exponential backoff, raced against a
//!   per-client deadline
//! - a periodic health probe per client, with autonomous reconnection
//! - aggregate and per-client status snapshots
//!
//! Registry state sits behind a `parking_lot` lock that is never held across
//! an `.await`. Health timers are plain tokio tasks holding a `Weak` back to
//! the supervisor, so dropping the supervisor also stops them.

mod retry;
mod state;

pub use retry::{retry_with_policy, RetryPolicy};
pub use state::{
    ClientState, ConnectionStatus, DetailedServerStatus, InitializationResult, ServerInitResult,
    ServerStatus, SupervisorEvent, SupervisorStatus,
};

use crate::capability::{
    build_client, CapabilityClient, ContextServiceClient, TaskServiceClient,
};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use relay_foundation::{Error, RelayConfig, Result, CONTEXT_SERVICE, TASK_SERVICE};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const EVENT_CAPACITY: usize = 64;

struct ServerEntry {
    client: Arc<dyn CapabilityClient>,
    state: ClientState,
    retry_policy: Option<RetryPolicy>,
    health_check_interval: Option<Duration>,
    reconnecting: bool,
}

pub struct ConnectionSupervisor {
    entries: RwLock<BTreeMap<String, ServerEntry>>,
    health_checks: Mutex<HashMap<String, JoinHandle<()>>>,
    init_timeout: Duration,
    events: broadcast::Sender<SupervisorEvent>,
}

impl ConnectionSupervisor {
    pub fn new(init_timeout: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            entries: RwLock::new(BTreeMap::new()),
            health_checks: Mutex::new(HashMap::new()),
            init_timeout,
            events,
        }
    }

    /// Supervisor with `taskService` and `contextService` registered per config
    pub fn from_config(config: &RelayConfig) -> Self {
        let supervisor = Self::new(Duration::from_millis(config.supervisor.init_timeout_ms));

        for (name, server) in [
            (TASK_SERVICE, &config.servers.task_service),
            (CONTEXT_SERVICE, &config.servers.context_service),
        ] {
            supervisor.register_client(
                name,
                build_client(name, server),
                server.required,
                server.retry.as_ref().map(RetryPolicy::from),
                server.health_check_interval_ms.map(Duration::from_millis),
            );
        }

        supervisor
    }

    /// Add `client` under `name` in the disconnected state
    ///
    /// Re-registering a name replaces the previous entry and stops its timer.
    pub fn register_client(
        &self,
        name: impl Into<String>,
        client: Arc<dyn CapabilityClient>,
        required: bool,
        retry_policy: Option<RetryPolicy>,
        health_check_interval: Option<Duration>,
    ) {
        let name = name.into();
        let health_check_interval = health_check_interval.filter(|interval| {
            if interval.is_zero() {
                warn!(server = %name, "Zero health check interval, health checks disabled");
            }
            !interval.is_zero()
        });
        debug!(
            server = %name,
            mode = ?client.mode(),
            required,
            "Registering capability client"
        );

        if let Some(handle) = self.health_checks.lock().remove(&name) {
            handle.abort();
        }

        self.entries.write().insert(
            name.clone(),
            ServerEntry {
                client,
                state: ClientState::new(name, required),
                retry_policy,
                health_check_interval,
                reconnecting: false,
            },
        );
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: SupervisorEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Connect every registered client
    pub async fn initialize_all(self: &Arc<Self>) -> InitializationResult {
        let names: Vec<(String, bool)> = self
            .entries
            .read()
            .iter()
            .map(|(name, entry)| (name.clone(), entry.state.required))
            .collect();

        info!("Initializing {} capability clients", names.len());

        let attempts = names.iter().map(|(name, _)| self.initialize_server(name));
        let outcomes = futures::future::join_all(attempts).await;

        let mut result = InitializationResult {
            success: true,
            servers: BTreeMap::new(),
        };

        for ((name, required), outcome) in names.into_iter().zip(outcomes) {
            let server = match outcome {
                Ok(()) => ServerInitResult {
                    success: true,
                    error: None,
                },
                Err(e) => {
                    if required {
                        error!(server = %name, error = %e, "Required capability client failed");
                        result.success = false;
                    } else {
                        warn!(server = %name, error = %e, "Optional capability client unavailable");
                    }
                    ServerInitResult {
                        success: false,
                        error: Some(e.to_string()),
                    }
                }
            };
            result.servers.insert(name, server);
        }

        info!(success = result.success, "Capability clients initialized");
        self.emit(SupervisorEvent::Initialized(result.clone()));
        result
    }

    /// Connect one client with its retry policy under the init deadline
    ///
    /// On success the client is marked connected and its health timer is
    /// started if it has an interval and none is running yet.
    pub async fn initialize_server(self: &Arc<Self>, name: &str) -> Result<()> {
        let (client, policy) = {
            let mut entries = self.entries.write();
            let entry = entries
                .get_mut(name)
                .ok_or_else(|| Error::UnknownServer(name.to_string()))?;
            if entry.state.status != ConnectionStatus::Connected {
                entry.state.status = ConnectionStatus::Connecting;
            }
            (Arc::clone(&entry.client), entry.retry_policy.clone())
        };

        let attempt = retry_with_policy(policy.as_ref(), name, || {
            let client = Arc::clone(&client);
            async move {
                let result = client.connect().await;
                if result.is_err() {
                    self.record_failure(name);
                }
                result
            }
        });

        let result = match tokio::time::timeout(self.init_timeout, attempt).await {
            Ok(result) => result,
            Err(_) => {
                // The attempt in flight was cancelled and never recorded
                self.record_failure(name);
                Err(Error::Timeout(format!(
                    "initialization of '{}' exceeded {:?}",
                    name, self.init_timeout
                )))
            }
        };

        match result {
            Ok(()) => {
                let (reconnected, interval) = {
                    let mut entries = self.entries.write();
                    let Some(entry) = entries.get_mut(name) else {
                        return Ok(());
                    };
                    let was_connected = entry.state.status == ConnectionStatus::Connected;
                    let recovering = entry.state.last_connected.is_some();
                    entry.state.mark_connected();
                    (
                        !was_connected && recovering,
                        entry.health_check_interval,
                    )
                };

                info!(server = %name, "Capability client connected");
                if reconnected {
                    self.emit(SupervisorEvent::ServerReconnected {
                        name: name.to_string(),
                    });
                }
                if let Some(interval) = interval {
                    self.start_health_check(name, interval);
                }
                Ok(())
            }
            Err(e) => {
                if let Some(entry) = self.entries.write().get_mut(name) {
                    if entry.state.status != ConnectionStatus::Connected {
                        entry.state.status = ConnectionStatus::Error;
                    }
                }
                Err(e)
            }
        }
    }

    fn record_failure(&self, name: &str) {
        if let Some(entry) = self.entries.write().get_mut(name) {
            entry.state.error_count += 1;
        }
    }

    fn start_health_check(self: &Arc<Self>, name: &str, interval: Duration) {
        let mut timers = self.health_checks.lock();
        if timers.contains_key(name) {
            return;
        }

        debug!(server = %name, ?interval, "Starting health checks");
        let weak = Arc::downgrade(self);
        let server = name.to_string();
        let handle = tokio::spawn(Self::health_loop(weak, server, interval));
        timers.insert(name.to_string(), handle);
    }

    async fn health_loop(supervisor: Weak<Self>, name: String, interval: Duration) {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick completes immediately
        timer.tick().await;

        loop {
            timer.tick().await;
            let Some(supervisor) = supervisor.upgrade() else {
                break;
            };
            supervisor.run_health_check(&name).await;
        }
    }

    /// One health probe and its state transition
    async fn run_health_check(self: &Arc<Self>, name: &str) {
        let client = match self.entries.read().get(name) {
            Some(entry) => Arc::clone(&entry.client),
            None => return,
        };

        let probe = client.health_check().await;

        let mut event = None;
        let mut reconnect = false;
        {
            let mut entries = self.entries.write();
            let Some(entry) = entries.get_mut(name) else {
                return;
            };
            entry.state.last_health_check = Some(Utc::now());

            match &probe {
                Ok(()) => {
                    if entry.state.status != ConnectionStatus::Connected {
                        entry.state.mark_connected();
                        event = Some(SupervisorEvent::ServerReconnected {
                            name: name.to_string(),
                        });
                    }
                }
                Err(e) => {
                    entry.state.error_count += 1;
                    if entry.state.status == ConnectionStatus::Connected {
                        entry.state.status = ConnectionStatus::Disconnected;
                        event = Some(SupervisorEvent::ServerDisconnected {
                            name: name.to_string(),
                            error: e.to_string(),
                        });
                    }
                    if !entry.reconnecting {
                        entry.reconnecting = true;
                        reconnect = true;
                    }
                }
            }
        }

        match &event {
            Some(SupervisorEvent::ServerDisconnected { error, .. }) => {
                warn!(server = %name, %error, "Capability server disconnected")
            }
            Some(SupervisorEvent::ServerReconnected { .. }) => {
                info!(server = %name, "Capability server reachable again")
            }
            _ => {}
        }
        if let Some(event) = event {
            self.emit(event);
        }

        if reconnect {
            let supervisor = Arc::clone(self);
            let name = name.to_string();
            tokio::spawn(async move { supervisor.reconnect(&name).await });
        }
    }

    async fn reconnect(self: Arc<Self>, name: &str) {
        info!(server = %name, "Attempting reconnection");
        let result = self.initialize_server(name).await;

        if let Some(entry) = self.entries.write().get_mut(name) {
            entry.reconnecting = false;
        }

        if let Err(e) = result {
            warn!(
                server = %name,
                error = %e,
                "Reconnection failed, next health check will retry"
            );
        }
    }

    /// Client registered under `name`, connected or not
    pub fn get_client(&self, name: &str) -> Result<Arc<dyn CapabilityClient>> {
        let entries = self.entries.read();
        let entry = entries
            .get(name)
            .ok_or_else(|| Error::UnknownServer(name.to_string()))?;
        if entry.state.status != ConnectionStatus::Connected {
            warn!(
                server = %name,
                status = %entry.state.status,
                "Handing out capability client that is not connected"
            );
        }
        Ok(Arc::clone(&entry.client))
    }

    pub fn task_service(&self) -> Result<TaskServiceClient> {
        self.get_client(TASK_SERVICE).map(TaskServiceClient::new)
    }

    pub fn context_service(&self) -> Result<ContextServiceClient> {
        self.get_client(CONTEXT_SERVICE).map(ContextServiceClient::new)
    }

    /// Stop every timer and disconnect every client, best effort
    pub async fn disconnect_all(&self) {
        let timers: Vec<JoinHandle<()>> =
            self.health_checks.lock().drain().map(|(_, h)| h).collect();
        for handle in timers {
            handle.abort();
        }

        let clients: Vec<(String, Arc<dyn CapabilityClient>)> = self
            .entries
            .read()
            .iter()
            .map(|(name, entry)| (name.clone(), Arc::clone(&entry.client)))
            .collect();

        let disconnects = clients.iter().map(|(name, client)| async move {
            if let Err(e) = client.disconnect().await {
                warn!(server = %name, error = %e, "Disconnect failed");
            }
        });
        futures::future::join_all(disconnects).await;

        for entry in self.entries.write().values_mut() {
            entry.state.status = ConnectionStatus::Disconnected;
            entry.reconnecting = false;
        }
        info!("All capability clients disconnected");
    }

    pub fn get_status(&self) -> SupervisorStatus {
        let entries = self.entries.read();
        let servers: BTreeMap<String, ServerStatus> = entries
            .iter()
            .map(|(name, entry)| {
                (
                    name.clone(),
                    ServerStatus {
                        status: entry.state.status,
                        last_connected: entry.state.last_connected,
                        last_health_check: entry.state.last_health_check,
                        error_count: entry.state.error_count,
                    },
                )
            })
            .collect();

        SupervisorStatus {
            initialized: servers
                .values()
                .any(|s| s.status == ConnectionStatus::Connected),
            servers,
        }
    }

    pub fn get_detailed_status(&self) -> BTreeMap<String, DetailedServerStatus> {
        let timers = self.health_checks.lock();
        let entries = self.entries.read();
        entries
            .iter()
            .map(|(name, entry)| {
                (
                    name.clone(),
                    DetailedServerStatus {
                        state: entry.state.clone(),
                        mode: entry.client.mode(),
                        retry_policy: entry.retry_policy.clone(),
                        health_check_interval_ms: entry
                            .health_check_interval
                            .map(|interval| interval.as_millis() as u64),
                        health_check_active: timers.contains_key(name),
                        reconnecting: entry.reconnecting,
                    },
                )
            })
            .collect()
    }

    /// Snapshot of one client's state
    pub fn client_state(&self, name: &str) -> Option<ClientState> {
        self.entries.read().get(name).map(|e| e.state.clone())
    }
}

impl Drop for ConnectionSupervisor {
    fn drop(&mut self) {
        for (_, handle) in self.health_checks.get_mut().drain() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{MockClient, MockTaskBackend};
    use async_trait::async_trait;
    use relay_foundation::ClientMode;
    use serde_json::Value;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    /// Client whose connect and probe fail while `down` is set
    struct FlakyClient {
        name: String,
        down: AtomicBool,
        /// Probes to fail before `down` takes over
        failing_probes: AtomicU32,
        connected: AtomicBool,
        connects: AtomicU32,
    }

    impl FlakyClient {
        fn new(name: &str, down: bool) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                down: AtomicBool::new(down),
                failing_probes: AtomicU32::new(0),
                connected: AtomicBool::new(false),
                connects: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl CapabilityClient for FlakyClient {
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
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.down.load(Ordering::SeqCst) {
                return Err(Error::connection(&self.name, "refused"));
            }
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn health_check(&self) -> Result<()> {
            let pending = self.failing_probes.load(Ordering::SeqCst);
            if pending > 0 {
                self.failing_probes.store(pending - 1, Ordering::SeqCst);
                return Err(Error::health_check(&self.name, "probe failed"));
            }
            if self.down.load(Ordering::SeqCst) {
                return Err(Error::health_check(&self.name, "down"));
            }
            Ok(())
        }

        async fn call(&self, _operation: &str, _args: Value) -> Result<Value> {
            Ok(Value::Null)
        }

        async fn disconnect(&self) -> Result<()> {
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        }
    }

    fn fast_retry() -> Option<RetryPolicy> {
        Some(RetryPolicy {
            max_retries: 3,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            backoff_multiplier: 2.0,
        })
    }

    fn supervisor() -> Arc<ConnectionSupervisor> {
        Arc::new(ConnectionSupervisor::new(Duration::from_secs(5)))
    }

    async fn wait_for_event(
        rx: &mut broadcast::Receiver<SupervisorEvent>,
    ) -> SupervisorEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for supervisor event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_required_client_failure_fails_initialization() {
        let supervisor = supervisor();
        let task = FlakyClient::new(TASK_SERVICE, true);
        let context = FlakyClient::new(CONTEXT_SERVICE, true);
        supervisor.register_client(TASK_SERVICE, task.clone(), true, fast_retry(), None);
        supervisor.register_client(CONTEXT_SERVICE, context.clone(), false, fast_retry(), None);

        let mut rx = supervisor.subscribe();
        let result = supervisor.initialize_all().await;

        assert!(!result.success);
        assert!(!result.servers[TASK_SERVICE].success);
        assert!(!result.servers[CONTEXT_SERVICE].success);
        assert!(result.servers[TASK_SERVICE].error.is_some());

        // 1 attempt + 3 retries each
        assert_eq!(task.connects.load(Ordering::SeqCst), 4);
        let state = supervisor.client_state(TASK_SERVICE).unwrap();
        assert_eq!(state.status, ConnectionStatus::Error);
        assert_eq!(state.error_count, 4);

        match wait_for_event(&mut rx).await {
            SupervisorEvent::Initialized(event) => assert_eq!(event, result),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_optional_client_failure_keeps_success() {
        let supervisor = supervisor();
        let task = FlakyClient::new(TASK_SERVICE, false);
        let context = FlakyClient::new(CONTEXT_SERVICE, true);
        supervisor.register_client(TASK_SERVICE, task, true, fast_retry(), None);
        supervisor.register_client(CONTEXT_SERVICE, context, false, None, None);

        let result = supervisor.initialize_all().await;
        assert!(result.success);
        assert!(result.servers[TASK_SERVICE].success);
        assert!(!result.servers[CONTEXT_SERVICE].success);

        let status = supervisor.get_status();
        assert!(status.initialized);
        assert_eq!(
            status.servers[TASK_SERVICE].status,
            ConnectionStatus::Connected
        );
        assert_eq!(status.servers[CONTEXT_SERVICE].error_count, 1);
    }

    #[tokio::test]
    async fn test_init_timeout_races_retry_loop() {
        let supervisor = Arc::new(ConnectionSupervisor::new(Duration::from_millis(30)));
        let client = FlakyClient::new(TASK_SERVICE, true);
        let slow_retry = RetryPolicy {
            max_retries: 5,
            initial_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 1.0,
        };
        supervisor.register_client(TASK_SERVICE, client, true, Some(slow_retry), None);

        let err = supervisor.initialize_server(TASK_SERVICE).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert_eq!(
            supervisor.client_state(TASK_SERVICE).unwrap().status,
            ConnectionStatus::Error
        );
    }

    #[tokio::test]
    async fn test_health_check_failure_then_reconnect() {
        let supervisor = supervisor();
        let client = FlakyClient::new(CONTEXT_SERVICE, false);
        supervisor.register_client(
            CONTEXT_SERVICE,
            client.clone(),
            false,
            fast_retry(),
            Some(Duration::from_millis(20)),
        );
        assert!(supervisor.initialize_all().await.success);

        let mut rx = supervisor.subscribe();
        client.failing_probes.store(1, Ordering::SeqCst);

        match wait_for_event(&mut rx).await {
            SupervisorEvent::ServerDisconnected { name, error } => {
                assert_eq!(name, CONTEXT_SERVICE);
                assert!(error.contains("probe failed"));
            }
            other => panic!("unexpected event {:?}", other),
        }
        match wait_for_event(&mut rx).await {
            SupervisorEvent::ServerReconnected { name } => assert_eq!(name, CONTEXT_SERVICE),
            other => panic!("unexpected event {:?}", other),
        }

        // Let a few healthy ticks pass; nothing else may be emitted
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());

        let state = supervisor.client_state(CONTEXT_SERVICE).unwrap();
        assert_eq!(state.status, ConnectionStatus::Connected);
        assert_eq!(state.error_count, 0);
        assert!(state.last_health_check.is_some());

        supervisor.disconnect_all().await;
    }

    #[tokio::test]
    async fn test_outage_emits_single_reconnect() {
        let supervisor = supervisor();
        let client = FlakyClient::new(TASK_SERVICE, false);
        supervisor.register_client(
            TASK_SERVICE,
            client.clone(),
            false,
            None,
            Some(Duration::from_millis(15)),
        );
        supervisor.initialize_all().await;

        let mut rx = supervisor.subscribe();
        client.down.store(true, Ordering::SeqCst);
        assert!(matches!(
            wait_for_event(&mut rx).await,
            SupervisorEvent::ServerDisconnected { .. }
        ));

        // Several failed probes and reconnects while down
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(rx.try_recv().is_err());
        assert!(supervisor.client_state(TASK_SERVICE).unwrap().error_count >= 2);

        client.down.store(false, Ordering::SeqCst);
        assert!(matches!(
            wait_for_event(&mut rx).await,
            SupervisorEvent::ServerReconnected { .. }
        ));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(supervisor.client_state(TASK_SERVICE).unwrap().error_count, 0);

        supervisor.disconnect_all().await;
    }

    #[tokio::test]
    async fn test_zero_interval_disables_health_checks() {
        let supervisor = supervisor();
        let client = FlakyClient::new(TASK_SERVICE, false);
        supervisor.register_client(
            TASK_SERVICE,
            client.clone(),
            false,
            None,
            Some(Duration::ZERO),
        );
        assert!(supervisor.initialize_all().await.success);

        let detailed = &supervisor.get_detailed_status()[TASK_SERVICE];
        assert!(!detailed.health_check_active);
        assert_eq!(detailed.health_check_interval_ms, None);
        assert_eq!(
            supervisor.client_state(TASK_SERVICE).unwrap().status,
            ConnectionStatus::Connected
        );

        supervisor.disconnect_all().await;
    }

    #[tokio::test]
    async fn test_detailed_status_serializes_millis() {
        let supervisor = supervisor();
        let client = FlakyClient::new(TASK_SERVICE, false);
        supervisor.register_client(
            TASK_SERVICE,
            client,
            true,
            Some(RetryPolicy::default()),
            Some(Duration::from_secs(30)),
        );

        let json = serde_json::to_value(supervisor.get_detailed_status()).unwrap();
        let status = &json[TASK_SERVICE];
        assert_eq!(status["healthCheckIntervalMs"], 30_000);
        assert_eq!(status["retryPolicy"]["initialDelayMs"], 1000);
        assert_eq!(status["retryPolicy"]["maxDelayMs"], 10_000);
        assert_eq!(status["status"], "disconnected");
    }

    #[tokio::test]
    async fn test_get_client_unknown_and_unconnected() {
        let supervisor = supervisor();
        assert!(matches!(
            supervisor.get_client("nope"),
            Err(Error::UnknownServer(_))
        ));

        let client = Arc::new(MockClient::new(
            TASK_SERVICE,
            Box::new(MockTaskBackend::new()),
        ));
        supervisor.register_client(TASK_SERVICE, client, false, None, None);

        // Handed out even though never connected
        let handle = supervisor.get_client(TASK_SERVICE).unwrap();
        assert!(!handle.is_connected());
        let err = supervisor
            .task_service()
            .unwrap()
            .list_requests()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotInitialized(_)));
    }

    #[tokio::test]
    async fn test_disconnect_all_stops_timers() {
        let supervisor = supervisor();
        let client = FlakyClient::new(TASK_SERVICE, false);
        supervisor.register_client(
            TASK_SERVICE,
            client.clone(),
            true,
            None,
            Some(Duration::from_millis(10)),
        );
        supervisor.initialize_all().await;
        assert!(supervisor.get_detailed_status()[TASK_SERVICE].health_check_active);

        supervisor.disconnect_all().await;

        let detailed = supervisor.get_detailed_status();
        assert!(!detailed[TASK_SERVICE].health_check_active);
        assert_eq!(detailed[TASK_SERVICE].state.status, ConnectionStatus::Disconnected);
        assert!(!client.is_connected());
        assert!(!supervisor.get_status().initialized);
    }

    #[tokio::test]
    async fn test_from_config_registers_mock_services() {
        let supervisor = Arc::new(ConnectionSupervisor::from_config(&RelayConfig::default()));
        let result = supervisor.initialize_all().await;
        assert!(result.success);
        assert_eq!(result.servers.len(), 2);

        let requests = supervisor.task_service().unwrap().list_requests().await.unwrap();
        assert!(requests.is_empty());
        assert!(supervisor
            .context_service()
            .unwrap()
            .search("anything", None)
            .await
            .unwrap()
            .is_empty());

        supervisor.disconnect_all().await;
    }
}
