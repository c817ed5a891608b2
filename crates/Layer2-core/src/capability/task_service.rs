//! Task service - request planning and task bookkeeping

use super::{CapabilityClient, MockBackend};
use parking_lot::Mutex;
use relay_foundation::{Error, Result, TASK_SERVICE};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

pub mod ops {
    pub const REQUEST_PLANNING: &str = "request_planning";
    pub const GET_NEXT_TASK: &str = "get_next_task";
    pub const MARK_TASK_DONE: &str = "mark_task_done";
    pub const APPROVE_TASK_COMPLETION: &str = "approve_task_completion";
    pub const LIST_REQUESTS: &str = "list_requests";
}

/// Task handed to `request_planning`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedTask {
    pub title: String,
    pub description: String,
}

impl PlannedTask {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
        }
    }
}

/// Task as the task service knows it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteTask {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_details: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// One planning request and the tasks planned under it
pub struct RemoteRequest {
    /// Some servers report this as `id`
    #[serde(alias = "id")]
    pub request_id: String,
    /// Request text as given to `request_planning`
    #[serde(default)]
    pub original_request: String,
    /// In planning order
    #[serde(default)]
    pub tasks: Vec<RemoteTask>,
    /// Every task is done and approved
    #[serde(default)]
    pub completed: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlanningResponse {
    request_id: String,
}

#[derive(Debug, Deserialize)]
struct NextTaskResponse {
    #[serde(default)]
    task: Option<RemoteTask>,
}

#[derive(Debug, Deserialize)]
struct ListRequestsResponse {
    #[serde(default)]
    requests: Vec<RemoteRequest>,
}

/// Typed operations on the `taskService` client
#[derive(Clone)]
pub struct TaskServiceClient {
    client: Arc<dyn CapabilityClient>,
}

impl TaskServiceClient {
    pub fn new(client: Arc<dyn CapabilityClient>) -> Self {
        Self { client }
    }

    pub fn inner(&self) -> &Arc<dyn CapabilityClient> {
        &self.client
    }

    async fn call<T: DeserializeOwned>(&self, operation: &str, args: Value) -> Result<T> {
        let value = self.client.call(operation, args).await?;
        serde_json::from_value(value).map_err(|e| {
            Error::remote_call(
                self.client.name(),
                operation,
                format!("unexpected response: {}", e),
            )
        })
    }

    /// Register a request split into `tasks`; returns the request id
    pub async fn request_planning(
        &self,
        original_request: &str,
        tasks: &[PlannedTask],
        split_details: Option<&str>,
    ) -> Result<String> {
        let response: PlanningResponse = self
            .call(
                ops::REQUEST_PLANNING,
                json!({
                    "originalRequest": original_request,
                    "tasks": tasks,
                    "splitDetails": split_details,
                }),
            )
            .await?;
        Ok(response.request_id)
    }

    /// Next unfinished task of a request, `None` once all are done
    pub async fn get_next_task(&self, request_id: &str) -> Result<Option<RemoteTask>> {
        let response: NextTaskResponse = self
            .call(ops::GET_NEXT_TASK, json!({ "requestId": request_id }))
            .await?;
        Ok(response.task)
    }

    pub async fn mark_task_done(
        &self,
        request_id: &str,
        task_id: &str,
        completed_details: Option<&str>,
    ) -> Result<()> {
        self.client
            .call(
                ops::MARK_TASK_DONE,
                json!({
                    "requestId": request_id,
                    "taskId": task_id,
                    "completedDetails": completed_details,
                }),
            )
            .await
            .map(|_| ())
    }

    pub async fn approve_task_completion(&self, request_id: &str, task_id: &str) -> Result<()> {
        self.client
            .call(
                ops::APPROVE_TASK_COMPLETION,
                json!({ "requestId": request_id, "taskId": task_id }),
            )
            .await
            .map(|_| ())
    }

    pub async fn list_requests(&self) -> Result<Vec<RemoteRequest>> {
        let response: ListRequestsResponse = self.call(ops::LIST_REQUESTS, json!({})).await?;
        Ok(response.requests)
    }
}

// ============================================================================
// Mock backend
// ============================================================================

#[derive(Default)]
struct MockTaskState {
    requests: BTreeMap<String, RemoteRequest>,
    next_request: u64,
    next_task: u64,
}

/// In-memory task service
#[derive(Default)]
pub struct MockTaskBackend {
    state: Mutex<MockTaskState>,
}

impl MockTaskBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn fail(operation: &str, message: impl Into<String>) -> Error {
        Error::remote_call(TASK_SERVICE, operation, message)
    }

    fn str_arg<'a>(args: &'a Value, key: &str, operation: &str) -> Result<&'a str> {
        args.get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| Self::fail(operation, format!("missing '{}'", key)))
    }
}

impl MockBackend for MockTaskBackend {
    fn handle(&self, operation: &str, args: Value) -> Result<Value> {
        let mut state = self.state.lock();

        match operation {
            ops::REQUEST_PLANNING => {
                let original_request = Self::str_arg(&args, "originalRequest", operation)?;
                let planned: Vec<PlannedTask> =
                    serde_json::from_value(args.get("tasks").cloned().unwrap_or(Value::Null))
                        .map_err(|e| Self::fail(operation, format!("invalid tasks: {}", e)))?;

                state.next_request += 1;
                let request_id = format!("req-{}", state.next_request);
                let mut tasks = Vec::with_capacity(planned.len());
                for task in planned {
                    state.next_task += 1;
                    tasks.push(RemoteTask {
                        id: format!("task-{}", state.next_task),
                        title: task.title,
                        description: task.description,
                        done: false,
                        approved: false,
                        completed_details: None,
                    });
                }

                state.requests.insert(
                    request_id.clone(),
                    RemoteRequest {
                        request_id: request_id.clone(),
                        original_request: original_request.to_string(),
                        tasks,
                        completed: false,
                    },
                );
                Ok(json!({ "requestId": request_id }))
            }
            ops::GET_NEXT_TASK => {
                let request_id = Self::str_arg(&args, "requestId", operation)?;
                let request = state
                    .requests
                    .get(request_id)
                    .ok_or_else(|| Self::fail(operation, format!("request {} not found", request_id)))?;

                match request.tasks.iter().find(|t| !t.done) {
                    Some(task) => Ok(json!({ "status": "next_task", "task": task })),
                    None => Ok(json!({ "status": "all_tasks_done" })),
                }
            }
            ops::MARK_TASK_DONE => {
                let request_id = Self::str_arg(&args, "requestId", operation)?;
                let task_id = Self::str_arg(&args, "taskId", operation)?;
                let details = args
                    .get("completedDetails")
                    .and_then(Value::as_str)
                    .map(str::to_string);

                let request = state
                    .requests
                    .get_mut(request_id)
                    .ok_or_else(|| Self::fail(operation, format!("request {} not found", request_id)))?;
                let task = request
                    .tasks
                    .iter_mut()
                    .find(|t| t.id == task_id)
                    .ok_or_else(|| Self::fail(operation, format!("task {} not found", task_id)))?;
                if task.done {
                    return Err(Self::fail(operation, format!("task {} is already done", task_id)));
                }
                task.done = true;
                task.completed_details = details;
                Ok(json!({ "status": "task_marked_done", "task": task }))
            }
            ops::APPROVE_TASK_COMPLETION => {
                let request_id = Self::str_arg(&args, "requestId", operation)?;
                let task_id = Self::str_arg(&args, "taskId", operation)?;

                let request = state
                    .requests
                    .get_mut(request_id)
                    .ok_or_else(|| Self::fail(operation, format!("request {} not found", request_id)))?;
                let task = request
                    .tasks
                    .iter_mut()
                    .find(|t| t.id == task_id)
                    .ok_or_else(|| Self::fail(operation, format!("task {} not found", task_id)))?;
                if !task.done {
                    return Err(Self::fail(operation, format!("task {} is not done yet", task_id)));
                }
                task.approved = true;
                let task = task.clone();
                request.completed = request.tasks.iter().all(|t| t.approved);
                Ok(json!({ "status": "task_approved", "task": task }))
            }
            ops::LIST_REQUESTS => {
                let requests: Vec<&RemoteRequest> = state.requests.values().collect();
                Ok(json!({ "requests": requests }))
            }
            other => Err(Self::fail(other, "unknown operation")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::MockClient;

    async fn connected_service() -> TaskServiceClient {
        let client = MockClient::new(TASK_SERVICE, Box::new(MockTaskBackend::new()));
        client.connect().await.unwrap();
        TaskServiceClient::new(Arc::new(client))
    }

    #[tokio::test]
    async fn test_plan_done_approve_flow() {
        let service = connected_service().await;

        let request_id = service
            .request_planning(
                "Refactor parser",
                &[
                    PlannedTask::new("Split lexer", "Move lexer into its own module"),
                    PlannedTask::new("Add tests", "Cover the new module"),
                ],
                None,
            )
            .await
            .unwrap();
        assert_eq!(request_id, "req-1");

        let first = service.get_next_task(&request_id).await.unwrap().unwrap();
        assert_eq!(first.title, "Split lexer");

        service
            .mark_task_done(&request_id, &first.id, Some("done"))
            .await
            .unwrap();
        service
            .approve_task_completion(&request_id, &first.id)
            .await
            .unwrap();

        let second = service.get_next_task(&request_id).await.unwrap().unwrap();
        assert_eq!(second.title, "Add tests");
        service.mark_task_done(&request_id, &second.id, None).await.unwrap();
        assert!(service.get_next_task(&request_id).await.unwrap().is_none());

        let requests = service.list_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].original_request, "Refactor parser");
        assert!(requests[0].tasks[0].approved);
        assert!(!requests[0].completed);
    }

    #[tokio::test]
    async fn test_approve_before_done_fails() {
        let service = connected_service().await;
        let request_id = service
            .request_planning("r", &[PlannedTask::new("t", "d")], Some("single step"))
            .await
            .unwrap();
        let task = service.get_next_task(&request_id).await.unwrap().unwrap();

        let err = service
            .approve_task_completion(&request_id, &task.id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RemoteCall { .. }));
    }

    #[tokio::test]
    async fn test_unknown_request() {
        let service = connected_service().await;
        let err = service.get_next_task("req-404").await.unwrap_err();
        assert!(err.to_string().contains("req-404"));
    }
}
