//! Task Orchestrator - bounded, queued execution of tasks through the bridge
//!
//! Features:
//! - Task creation mirrored into the task service, with a local fallback
//! - `max_concurrent` bound with a strict FIFO queue
//! - Per-task event pump that owns the watchdog
//! - Lossy broadcast plus lossless per-watcher event delivery
//! - Cancellation that kills the process before marking the task
//! - Completion reported back to the task service
//!
//! All bookkeeping lives in one `parking_lot` mutex. Every state change is a
//! single critical section and the lock is never held across an `.await`.
//! The bridge spawn happens inside the section that starts a task, so an
//! execution is never visible without its correlation id.

use crate::bridge::{BridgeEvent, BridgeEventKind, CommandBridge, CorrelationId, ExecuteOptions, ProcessExit};
use crate::event::{OutputStream, TaskEvent};
use crate::state::TaskStatus;
use crate::task::{Task, TaskId, TaskPriority};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use relay_core::{ConnectionSupervisor, PlannedTask};
use relay_foundation::{Error, OrchestratorConfig, Result};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 1024;

/// Run status of an in-flight task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    /// Kill requested by cancel or the watchdog
    Cancelling,
    Completed,
    Failed,
}

/// Ephemeral record of one dispatched task
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub task_id: TaskId,
    /// Bridge handle of the spawned process
    pub correlation_id: CorrelationId,
    pub started_at: DateTime<Utc>,
    pub status: ExecutionStatus,
    /// Task service request the task belongs to; `None` for local tasks
    pub request_id: Option<String>,
}

/// Snapshot returned by `get_stats`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorStats {
    /// Executions holding a slot, cancelling ones included
    pub running: usize,
    pub queued: usize,
    pub max_concurrent: usize,
    /// Stored tasks of every status
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

#[derive(Default)]
struct OrchestratorState {
    tasks: HashMap<TaskId, Task>,
    executions: HashMap<TaskId, Execution>,
    queue: VecDeque<TaskId>,
}

/// Spawned task whose bridge events still need a pump
struct Launched {
    task_id: TaskId,
    events: mpsc::UnboundedReceiver<BridgeEvent>,
}

enum CancelPlan {
    /// Never started; already marked cancelled
    NotStarted(Task),
    Kill(CorrelationId),
    AlreadyStopping,
}

#[derive(Clone)]
pub struct TaskOrchestrator {
    supervisor: Arc<ConnectionSupervisor>,
    bridge: Arc<CommandBridge>,
    config: Arc<OrchestratorConfig>,
    state: Arc<Mutex<OrchestratorState>>,
    events: broadcast::Sender<TaskEvent>,
    watchers: Arc<Mutex<Vec<mpsc::UnboundedSender<TaskEvent>>>>,
}

impl TaskOrchestrator {
    pub fn new(
        supervisor: Arc<ConnectionSupervisor>,
        bridge: Arc<CommandBridge>,
        config: OrchestratorConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            supervisor,
            bridge,
            config: Arc::new(config),
            state: Arc::new(Mutex::new(OrchestratorState::default())),
            events,
            watchers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Bounded broadcast of task events
    ///
    /// A receiver that falls more than 1024 events behind skips the oldest
    /// ones and sees `RecvError::Lagged`. Use [`watch`](Self::watch) when
    /// every output line matters.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    /// Unbounded receiver that gets every task event emitted from now on
    ///
    /// Dropping the receiver unregisters it.
    pub fn watch(&self) -> mpsc::UnboundedReceiver<TaskEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.watchers.lock().push(tx);
        rx
    }

    fn emit(&self, event: TaskEvent) {
        debug!(event = event.name(), task_id = %event.task_id(), "Task event");
        self.watchers
            .lock()
            .retain(|watcher| watcher.send(event.clone()).is_ok());
        let _ = self.events.send(event);
    }

    fn task_timeout(&self) -> Option<Duration> {
        self.config.task_timeout_ms.map(Duration::from_millis)
    }

    // ========================================================================
    // Creation
    // ========================================================================

    /// Create a task and dispatch it (or queue it when at capacity)
    ///
    /// Returns once dispatched, not once finished.
    pub async fn create_and_execute(
        &self,
        title: &str,
        description: &str,
        priority: Option<TaskPriority>,
    ) -> Result<Task> {
        let task = self.create_task(title, description, priority).await;
        self.execute_task(&task.id)?;
        Ok(self.get_task(&task.id).unwrap_or(task))
    }

    /// Create and store a pending task without dispatching it
    ///
    /// The task is registered with the task service when it is reachable;
    /// otherwise a `local-` task is created and the failure is logged.
    pub async fn create_task(
        &self,
        title: &str,
        description: &str,
        priority: Option<TaskPriority>,
    ) -> Task {
        let task = match self.register_remote(title, description).await {
            Ok(task) => task,
            Err(e) => {
                warn!(error = %e, "Task service unavailable, creating local task");
                Task::new(TaskId::local(), title, description)
            }
        }
        .with_priority(priority.unwrap_or_default());

        info!(task_id = %task.id, title = %task.title, "Task created");
        self.state.lock().tasks.insert(task.id.clone(), task.clone());
        task
    }

    async fn register_remote(&self, title: &str, description: &str) -> Result<Task> {
        let service = self.supervisor.task_service()?;
        let request_id = service
            .request_planning(title, &[PlannedTask::new(title, description)], None)
            .await?;
        let remote = service
            .get_next_task(&request_id)
            .await?
            .ok_or_else(|| Error::Internal(format!("request {} returned no task", request_id)))?;

        Ok(Task::new(TaskId::from(remote.id), remote.title, remote.description)
            .with_request_id(request_id))
    }

    /// Attach context ids to a pending task; duplicates are ignored
    pub fn link_context(&self, id: &TaskId, context_ids: Vec<String>) -> Result<Task> {
        let mut state = self.state.lock();
        let task = state
            .tasks
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("task {}", id)))?;

        if !task.status.is_pending() {
            return Err(Error::InvalidTransition {
                task_id: id.to_string(),
                from: task.status.to_string(),
                to: "linked".to_string(),
            });
        }

        for context_id in context_ids {
            if !task.context_ids.contains(&context_id) {
                task.context_ids.push(context_id);
            }
        }
        task.updated_at = Utc::now();
        Ok(task.clone())
    }

    /// Remove a pending (possibly queued) task
    pub fn delete_task(&self, id: &TaskId) -> Result<Task> {
        let mut state = self.state.lock();
        let status = state
            .tasks
            .get(id)
            .map(|t| t.status)
            .ok_or_else(|| Error::NotFound(format!("task {}", id)))?;

        if status != TaskStatus::Pending {
            return Err(Error::InvalidTransition {
                task_id: id.to_string(),
                from: status.to_string(),
                to: "deleted".to_string(),
            });
        }

        state.queue.retain(|queued| queued != id);
        let task = state
            .tasks
            .remove(id)
            .ok_or_else(|| Error::NotFound(format!("task {}", id)))?;
        info!(task_id = %id, "Task deleted");
        Ok(task)
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Dispatch a stored task, or queue it when no slot is free
    ///
    /// Must be called from within a tokio runtime. Spawn failures fail the
    /// task and are reported through `TaskEvent::Failed`, not returned.
    pub fn execute_task(&self, id: &TaskId) -> Result<()> {
        let launched = {
            let mut state = self.state.lock();
            let status = state
                .tasks
                .get(id)
                .map(|t| t.status)
                .ok_or_else(|| Error::NotFound(format!("task {}", id)))?;

            if state.executions.contains_key(id) {
                warn!(task_id = %id, "Task is already running");
                return Ok(());
            }
            if state.queue.contains(id) {
                warn!(task_id = %id, "Task is already queued");
                return Ok(());
            }
            if status != TaskStatus::Pending {
                return Err(Error::InvalidTransition {
                    task_id: id.to_string(),
                    from: status.to_string(),
                    to: TaskStatus::InProgress.to_string(),
                });
            }

            if state.executions.len() >= self.config.max_concurrent || !state.queue.is_empty() {
                state.queue.push_back(id.clone());
                info!(task_id = %id, queued = state.queue.len(), "Task queued");
                return Ok(());
            }

            self.begin(&mut state, id)?
        };

        match launched {
            Some(launched) => self.spawn_pump(launched),
            None => self.drain(),
        }
        Ok(())
    }

    /// pending -> in_progress, spawn the command and record the execution
    ///
    /// Runs inside the caller's critical section. `Ok(None)` when the spawn
    /// failed; the task is then already failed and reported.
    fn begin(&self, state: &mut OrchestratorState, id: &TaskId) -> Result<Option<Launched>> {
        let task = state
            .tasks
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("task {}", id)))?;
        task.start()?;
        self.emit(TaskEvent::Started { task: task.clone() });

        let (tx, rx) = mpsc::unbounded_channel();
        let spawned = self.bridge.execute_stream(
            &task.command(),
            move |event| {
                let _ = tx.send(event);
            },
            ExecuteOptions::default(),
        );

        match spawned {
            Ok(correlation_id) => {
                info!(task_id = %id, correlation_id = %correlation_id, "Task started");
                let execution = Execution {
                    task_id: id.clone(),
                    correlation_id,
                    started_at: Utc::now(),
                    status: ExecutionStatus::Running,
                    request_id: task.request_id.clone(),
                };
                state.executions.insert(id.clone(), execution);
                Ok(Some(Launched {
                    task_id: id.clone(),
                    events: rx,
                }))
            }
            Err(e) => {
                warn!(task_id = %id, error = %e, "Failed to spawn task command");
                let error = e.to_string();
                task.fail(error.clone())?;
                self.emit(TaskEvent::Failed {
                    task: task.clone(),
                    error,
                });
                Ok(None)
            }
        }
    }

    fn spawn_pump(&self, launched: Launched) {
        tokio::spawn(self.clone().pump(
            launched.task_id,
            launched.events,
            self.task_timeout(),
        ));
    }

    /// Dispatch queued tasks while slots are free
    fn drain(&self) {
        loop {
            let launched = {
                let mut state = self.state.lock();
                if state.executions.len() >= self.config.max_concurrent {
                    return;
                }
                let Some(id) = state.queue.pop_front() else {
                    return;
                };
                debug!(task_id = %id, "Dispatching queued task");
                match self.begin(&mut state, &id) {
                    Ok(Some(launched)) => launched,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(task_id = %id, error = %e, "Dropping queued task");
                        continue;
                    }
                }
            };
            self.spawn_pump(launched);
        }
    }

    /// Forward bridge events of one task, in order, and arm its watchdog
    async fn pump(
        self,
        id: TaskId,
        mut rx: mpsc::UnboundedReceiver<BridgeEvent>,
        timeout: Option<Duration>,
    ) {
        let watchdog = async {
            match timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(watchdog);

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        loop {
            tokio::select! {
                event = rx.recv() => match event.map(|e| e.kind) {
                    Some(BridgeEventKind::Output(line)) => {
                        stdout.push(line.clone());
                        self.emit(TaskEvent::Output {
                            task_id: id.clone(),
                            stream: OutputStream::Stdout,
                            data: line,
                        });
                    }
                    Some(BridgeEventKind::Error(line)) => {
                        stderr.push(line.clone());
                        self.emit(TaskEvent::Output {
                            task_id: id.clone(),
                            stream: OutputStream::Stderr,
                            data: line,
                        });
                    }
                    Some(BridgeEventKind::Complete(exit)) => {
                        self.on_complete(&id, exit, stdout.join("\n"), stderr.join("\n"))
                            .await;
                        return;
                    }
                    None => return,
                },
                _ = &mut watchdog => {
                    self.on_timeout(&id, timeout.unwrap_or_default()).await;
                    return;
                }
            }
        }
    }

    async fn on_complete(&self, id: &TaskId, exit: ProcessExit, stdout: String, stderr: String) {
        let outcome = {
            let mut state = self.state.lock();
            match state.executions.get(id) {
                Some(execution) if execution.status == ExecutionStatus::Running => {}
                // Gone, or a cancel/watchdog owns the ending
                _ => return,
            }
            let Some(mut execution) = state.executions.remove(id) else {
                return;
            };
            let Some(task) = state.tasks.get_mut(id) else {
                return;
            };

            let result = if exit.success {
                execution.status = ExecutionStatus::Completed;
                task.complete().map(|_| None)
            } else {
                execution.status = ExecutionStatus::Failed;
                let error = if stderr.is_empty() && exit.killed {
                    "Process was killed".to_string()
                } else {
                    Error::ExecutionFailure {
                        exit_code: exit.exit_code,
                        stderr,
                    }
                    .to_string()
                };
                task.fail(error.clone()).map(|_| Some(error))
            };

            match result {
                Ok(error) => (task.clone(), execution, error),
                Err(e) => {
                    warn!(task_id = %id, error = %e, "Ignoring completion");
                    return;
                }
            }
        };

        let (task, execution, error) = outcome;
        debug!(
            task_id = %id,
            status = ?execution.status,
            duration_ms = exit.duration.as_millis() as u64,
            "Execution finished"
        );

        match error {
            None => {
                info!(task_id = %id, "Task completed");
                if let Some(request_id) = &execution.request_id {
                    self.report_done(request_id, id, &stdout).await;
                }
                self.emit(TaskEvent::Completed { task });
            }
            Some(error) => {
                warn!(task_id = %id, %error, "Task failed");
                self.emit(TaskEvent::Failed { task, error });
            }
        }

        self.drain();
    }

    /// mark done, then approve when configured; failures are logged
    async fn report_done(&self, request_id: &str, id: &TaskId, output: &str) {
        let service = match self.supervisor.task_service() {
            Ok(service) => service,
            Err(e) => {
                warn!(task_id = %id, error = %e, "Cannot report completion");
                return;
            }
        };

        let details = (!output.is_empty()).then_some(output);
        if let Err(e) = service.mark_task_done(request_id, id.as_str(), details).await {
            warn!(task_id = %id, error = %e, "Failed to mark task done");
            return;
        }

        if self.config.auto_approve {
            if let Err(e) = service.approve_task_completion(request_id, id.as_str()).await {
                warn!(task_id = %id, error = %e, "Failed to approve task completion");
            }
        }
    }

    async fn on_timeout(&self, id: &TaskId, timeout: Duration) {
        let correlation_id = {
            let mut state = self.state.lock();
            match state.executions.get_mut(id) {
                Some(execution) if execution.status == ExecutionStatus::Running => {
                    execution.status = ExecutionStatus::Cancelling;
                    execution.correlation_id.clone()
                }
                _ => return,
            }
        };

        warn!(task_id = %id, ?timeout, "Task timed out, killing process");
        self.bridge.kill(&correlation_id).await;

        let error = Error::Timeout(format!("task exceeded {:?}", timeout)).to_string();
        let failed = {
            let mut state = self.state.lock();
            state.executions.remove(id);
            state
                .tasks
                .get_mut(id)
                .and_then(|task| task.fail(error.clone()).ok().map(|_| task.clone()))
        };

        if let Some(task) = failed {
            self.emit(TaskEvent::Failed { task, error });
        }
        self.drain();
    }

    // ========================================================================
    // Cancellation
    // ========================================================================

    /// Cancel a queued or running task
    ///
    /// A running task's process is killed before the task is marked
    /// cancelled.
    pub async fn cancel_task(&self, id: &TaskId) -> Result<()> {
        let plan = {
            let mut state = self.state.lock();
            if !state.tasks.contains_key(id) {
                return Err(Error::NotFound(format!("task {}", id)));
            }

            if let Some(execution) = state.executions.get_mut(id) {
                if execution.status == ExecutionStatus::Cancelling {
                    CancelPlan::AlreadyStopping
                } else {
                    execution.status = ExecutionStatus::Cancelling;
                    CancelPlan::Kill(execution.correlation_id.clone())
                }
            } else {
                state.queue.retain(|queued| queued != id);
                let task = state
                    .tasks
                    .get_mut(id)
                    .ok_or_else(|| Error::NotFound(format!("task {}", id)))?;
                task.cancel()?;
                CancelPlan::NotStarted(task.clone())
            }
        };

        match plan {
            CancelPlan::AlreadyStopping => {
                debug!(task_id = %id, "Task is already stopping");
                Ok(())
            }
            CancelPlan::NotStarted(task) => {
                info!(task_id = %id, "Queued task cancelled");
                self.emit(TaskEvent::Cancelled { task });
                Ok(())
            }
            CancelPlan::Kill(correlation_id) => {
                let killed = self.bridge.kill(&correlation_id).await;
                debug!(task_id = %id, killed, "Kill delivered");

                let cancelled = {
                    let mut state = self.state.lock();
                    state.executions.remove(id);
                    match state.tasks.get_mut(id) {
                        Some(task) => task.cancel().map(|_| task.clone()),
                        None => Err(Error::NotFound(format!("task {}", id))),
                    }
                };

                let result = match cancelled {
                    Ok(task) => {
                        info!(task_id = %id, "Running task cancelled");
                        self.emit(TaskEvent::Cancelled { task });
                        Ok(())
                    }
                    Err(e) => Err(e),
                };
                self.drain();
                result
            }
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn get_task(&self, id: &TaskId) -> Option<Task> {
        self.state.lock().tasks.get(id).cloned()
    }

    /// All tasks, oldest first
    pub fn list_tasks(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.state.lock().tasks.values().cloned().collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        tasks
    }

    pub fn get_running_tasks(&self) -> Vec<Task> {
        let state = self.state.lock();
        let mut tasks: Vec<Task> = state
            .executions
            .keys()
            .filter_map(|id| state.tasks.get(id).cloned())
            .collect();
        tasks.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        tasks
    }

    /// Queued tasks in dispatch order
    pub fn get_queued_tasks(&self) -> Vec<Task> {
        let state = self.state.lock();
        state
            .queue
            .iter()
            .filter_map(|id| state.tasks.get(id).cloned())
            .collect()
    }

    pub fn get_execution(&self, id: &TaskId) -> Option<Execution> {
        self.state.lock().executions.get(id).cloned()
    }

    pub fn get_stats(&self) -> OrchestratorStats {
        let state = self.state.lock();
        let mut stats = OrchestratorStats {
            running: state.executions.len(),
            queued: state.queue.len(),
            max_concurrent: self.config.max_concurrent,
            total: state.tasks.len(),
            ..Default::default()
        };
        for task in state.tasks.values() {
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::InProgress => stats.in_progress += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }
}
