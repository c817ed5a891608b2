//! Task definition and types

use crate::state::TaskStatus;
use chrono::{DateTime, Utc};
use relay_foundation::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier for a task
///
/// Either the id the task service assigned, or `local-<uuid>` for tasks
/// created while the service was unreachable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Generate a new local TaskId
    pub fn local() -> Self {
        Self(format!("local-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_local(&self) -> bool {
        self.0.starts_with("local-")
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Informational only; dispatch order is FIFO regardless of priority
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    High,
    #[default]
    Medium,
    Low,
}

impl std::str::FromStr for TaskPriority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "high" => Ok(TaskPriority::High),
            "medium" => Ok(TaskPriority::Medium),
            "low" => Ok(TaskPriority::Low),
            other => Err(Error::Config(format!("unknown priority '{}'", other))),
        }
    }
}

/// A unit of work dispatched to the command bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    /// 0-100; set while in progress and to 100 on completion
    pub progress: Option<u8>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Last error message
    pub error: Option<String>,
    /// Context entries prepended to the command as a preamble
    #[serde(default)]
    pub context_ids: Vec<String>,
    /// Upstream request in the task service, if the task is mirrored there
    pub request_id: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Task {
    /// Create a pending task
    pub fn new(id: TaskId, title: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            title: title.into(),
            description: description.into(),
            status: TaskStatus::Pending,
            priority: TaskPriority::default(),
            progress: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            error: None,
            context_ids: Vec::new(),
            request_id: None,
            metadata: Map::new(),
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context_ids(mut self, context_ids: Vec<String>) -> Self {
        self.context_ids = context_ids;
        self
    }

    fn transition(&mut self, next: TaskStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                task_id: self.id.to_string(),
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }

        let now = Utc::now();
        self.status = next;
        self.updated_at = now;
        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        Ok(())
    }

    /// pending -> in_progress; sets `started_at`
    pub fn start(&mut self) -> Result<()> {
        self.transition(TaskStatus::InProgress)?;
        self.started_at = Some(self.updated_at);
        self.progress = Some(0);
        Ok(())
    }

    /// in_progress -> completed
    pub fn complete(&mut self) -> Result<()> {
        self.transition(TaskStatus::Completed)?;
        self.progress = Some(100);
        Ok(())
    }

    /// in_progress -> failed
    pub fn fail(&mut self, error: impl Into<String>) -> Result<()> {
        self.transition(TaskStatus::Failed)?;
        self.error = Some(error.into());
        Ok(())
    }

    /// pending | in_progress -> cancelled
    pub fn cancel(&mut self) -> Result<()> {
        self.transition(TaskStatus::Cancelled)
    }

    /// Text handed to the command bridge
    pub fn command(&self) -> String {
        if self.context_ids.is_empty() {
            self.description.clone()
        } else {
            format!(
                "With context: {}\n\n{}",
                self.context_ids.join(", "),
                self.description
            )
        }
    }

    /// Get execution duration if task has started
    pub fn duration(&self) -> Option<Duration> {
        let start = self.started_at?;
        let end = self.completed_at.unwrap_or_else(Utc::now);
        Some((end - start).to_std().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_started_at_set_once() {
        let mut task = Task::new(TaskId::local(), "t", "echo hi");
        assert!(task.started_at.is_none());

        task.start().unwrap();
        let started = task.started_at;
        assert!(started.is_some());
        assert_eq!(task.status, TaskStatus::InProgress);

        assert!(task.start().is_err());
        assert_eq!(task.started_at, started);
    }

    #[test]
    fn test_single_terminal_state() {
        let mut task = Task::new(TaskId::local(), "t", "d");
        task.start().unwrap();
        task.complete().unwrap();
        let completed = task.completed_at;
        assert_eq!(task.progress, Some(100));

        assert!(matches!(
            task.fail("late"),
            Err(Error::InvalidTransition { .. })
        ));
        assert!(task.cancel().is_err());
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.completed_at, completed);
        assert!(task.error.is_none());
    }

    #[test]
    fn test_pending_cancel_skips_start() {
        let mut task = Task::new(TaskId::local(), "t", "d");
        task.cancel().unwrap();
        assert!(task.started_at.is_none());
        assert!(task.completed_at.is_some());
        assert!(task.duration().is_none());
    }

    #[test]
    fn test_pending_cannot_complete() {
        let mut task = Task::new(TaskId::from("task-1"), "t", "d");
        let err = task.complete().unwrap_err();
        assert!(err.to_string().contains("pending -> completed"));
        assert!(!task.id.is_local());
    }

    #[test]
    fn test_command_with_context_preamble() {
        let task = Task::new(TaskId::local(), "t", "Fix the parser")
            .with_context_ids(vec!["ctx-1".into(), "ctx-2".into()]);
        assert_eq!(task.command(), "With context: ctx-1, ctx-2\n\nFix the parser");

        let plain = Task::new(TaskId::local(), "t", "Fix the parser");
        assert_eq!(plain.command(), "Fix the parser");
    }

    #[test]
    fn test_priority_parse() {
        assert_eq!("HIGH".parse::<TaskPriority>().unwrap(), TaskPriority::High);
        assert!("urgent".parse::<TaskPriority>().is_err());
        assert_eq!(TaskPriority::default(), TaskPriority::Medium);
    }
}
