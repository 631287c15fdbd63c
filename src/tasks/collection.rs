use std::collections::HashMap;

use chrono::NaiveDateTime;

use crate::error::TaskError;
use crate::models::{NodeRef, Task, TaskChanged, TaskKey, TaskState, TreeId};

/// One partition of the tasks (pending or completed).
///
/// # Invariants
/// - No two tasks share a `(node, due_date)` key.
/// - A node appears at most once.
/// - Every stored task's `completed` flag matches the partition.
#[derive(Debug)]
pub struct TaskCollection {
    state: TaskState,
    tasks: HashMap<TaskKey, Task>,
    by_node: HashMap<NodeRef, NaiveDateTime>,
}

impl TaskCollection {
    pub fn new(state: TaskState) -> Self {
        Self {
            state,
            tasks: HashMap::new(),
            by_node: HashMap::new(),
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Inserts `task`, rejecting a key or node that is already present.
    pub fn add(&mut self, task: Task) -> Result<TaskChanged, TaskError> {
        let task = task.with_completed(self.state == TaskState::Completed);
        if let Some(existing) = self.by_node.get(&task.node) {
            return Err(TaskError::DuplicateIdentity {
                node: task.node,
                due_date: *existing,
            });
        }
        self.by_node.insert(task.node, task.due_date);
        self.tasks.insert(task.key(), task);
        Ok(TaskChanged::created(task))
    }

    pub fn remove(
        &mut self,
        node: NodeRef,
        due_date: NaiveDateTime,
    ) -> Result<TaskChanged, TaskError> {
        let task = self
            .tasks
            .remove(&TaskKey { node, due_date })
            .ok_or(TaskError::NotFound { node, due_date })?;
        self.by_node.remove(&node);
        Ok(TaskChanged::removed(task))
    }

    pub fn find(&self, node: NodeRef, due_date: NaiveDateTime) -> Option<Task> {
        self.tasks.get(&TaskKey { node, due_date }).copied()
    }

    /// The task held for `node`, whatever its due date.
    pub fn find_node(&self, node: NodeRef) -> Option<Task> {
        self.by_node
            .get(&node)
            .and_then(|due_date| self.find(node, *due_date))
    }

    /// Snapshot ordered by due date, then node.
    pub fn all(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.tasks.values().copied().collect();
        tasks.sort_by_key(|t| (t.due_date, t.node));
        tasks
    }

    /// Removes every task whose node belongs to `tree`.
    pub fn remove_tree(&mut self, tree: TreeId) -> Vec<TaskChanged> {
        let keys: Vec<TaskKey> = self
            .tasks
            .keys()
            .filter(|k| k.node.tree == tree)
            .copied()
            .collect();
        let mut removed: Vec<TaskChanged> = keys
            .into_iter()
            .filter_map(|k| self.remove(k.node, k.due_date).ok())
            .collect();
        removed.sort_by_key(|c| (c.task.due_date, c.task.node));
        removed
    }
}
