//! Task events for the view layer

use crate::task::{Task, TaskId};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Lifecycle notifications
///
/// Per task the order is `Started`, any number of `Output`, then exactly one
/// of `Completed`, `Failed` or `Cancelled`. A task cancelled while still
/// queued only gets `Cancelled`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum TaskEvent {
    Started {
        task: Task,
    },
    Output {
        task_id: TaskId,
        stream: OutputStream,
        data: String,
    },
    Completed {
        task: Task,
    },
    Failed {
        task: Task,
        error: String,
    },
    Cancelled {
        task: Task,
    },
}

impl TaskEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TaskEvent::Started { .. } => "task:started",
            TaskEvent::Output { .. } => "task:output",
            TaskEvent::Completed { .. } => "task:completed",
            TaskEvent::Failed { .. } => "task:failed",
            TaskEvent::Cancelled { .. } => "task:cancelled",
        }
    }

    pub fn task_id(&self) -> &TaskId {
        match self {
            TaskEvent::Output { task_id, .. } => task_id,
            TaskEvent::Started { task }
            | TaskEvent::Completed { task }
            | TaskEvent::Failed { task, .. }
            | TaskEvent::Cancelled { task } => &task.id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskEvent::Completed { .. } | TaskEvent::Failed { .. } | TaskEvent::Cancelled { .. }
        )
    }
}
