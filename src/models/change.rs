use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::Task;

/// Which partition a task lives in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Completed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
        }
    }

    pub fn of(completed: bool) -> Self {
        if completed {
            Self::Completed
        } else {
            Self::Pending
        }
    }
}

/// The kind of change a [`TaskChanged`] notification reports.
///
/// `Updated` and `Moved` are single logical events even though the registry
/// performs them as a remove followed by an add.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskChangeKind {
    Created,
    Removed,
    Updated { previous_due_date: NaiveDateTime },
    Moved { from: TaskState, to: TaskState },
}

/// Notification published by the task registry.
///
/// For `Removed` the task is the one that was dropped; for every other kind it
/// is the task as it now stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskChanged {
    pub task: Task,
    #[serde(flatten)]
    pub kind: TaskChangeKind,
}

impl TaskChanged {
    pub fn created(task: Task) -> Self {
        Self {
            task,
            kind: TaskChangeKind::Created,
        }
    }

    pub fn removed(task: Task) -> Self {
        Self {
            task,
            kind: TaskChangeKind::Removed,
        }
    }
}
