use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::NaiveDateTime;

use super::TaskCollection;
use crate::error::TaskError;
use crate::models::{NodeRef, Task, TaskChangeKind, TaskChanged, TaskState, TreeId};

/// Callback registered by a view to hear about task changes.
pub type TaskListener = Arc<dyn Fn(&TaskChanged) + Send + Sync>;

/// Handle returned by [`TaskRegistry::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Partitions {
    pending: TaskCollection,
    completed: TaskCollection,
}

impl Partitions {
    fn get_mut(&mut self, state: TaskState) -> &mut TaskCollection {
        match state {
            TaskState::Pending => &mut self.pending,
            TaskState::Completed => &mut self.completed,
        }
    }

    fn locate(&self, node: NodeRef, due_date: NaiveDateTime) -> Option<TaskState> {
        if self.pending.find(node, due_date).is_some() {
            Some(TaskState::Pending)
        } else if self.completed.find(node, due_date).is_some() {
            Some(TaskState::Completed)
        } else {
            None
        }
    }

    fn find_node(&self, node: NodeRef) -> Option<Task> {
        self.pending
            .find_node(node)
            .or_else(|| self.completed.find_node(node))
    }
}

/// All tasks, pending and completed, as views see them.
///
/// Views may read and subscribe. Mutations are crate-private and come only
/// from the attribute sync bridge. Each mutation is applied to both partitions
/// under one lock and then published as exactly one [`TaskChanged`], so a
/// subscriber never sees a task in both partitions or in neither halfway
/// through a move.
pub struct TaskRegistry {
    partitions: RwLock<Partitions>,
    listeners: Mutex<Vec<(ListenerId, TaskListener)>>,
    next_listener: AtomicU64,
    publish: Mutex<()>,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            partitions: RwLock::new(Partitions {
                pending: TaskCollection::new(TaskState::Pending),
                completed: TaskCollection::new(TaskState::Completed),
            }),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
            publish: Mutex::new(()),
        }
    }

    // ============================================================
    // Read side
    // ============================================================

    pub fn pending(&self) -> Vec<Task> {
        self.read().pending.all()
    }

    pub fn completed(&self) -> Vec<Task> {
        self.read().completed.all()
    }

    /// Pending tasks followed by completed ones.
    pub fn all(&self) -> Vec<Task> {
        let partitions = self.read();
        let mut tasks = partitions.pending.all();
        tasks.extend(partitions.completed.all());
        tasks
    }

    pub fn len(&self) -> usize {
        let partitions = self.read();
        partitions.pending.len() + partitions.completed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn find(&self, node: NodeRef, due_date: NaiveDateTime) -> Option<Task> {
        let partitions = self.read();
        partitions
            .pending
            .find(node, due_date)
            .or_else(|| partitions.completed.find(node, due_date))
    }

    pub fn find_node(&self, node: NodeRef) -> Option<Task> {
        self.read().find_node(node)
    }

    pub fn subscribe(&self, listener: TaskListener) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .expect("listener lock poisoned")
            .push((id, listener));
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().expect("listener lock poisoned");
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    // ============================================================
    // Write side (attribute sync bridge only)
    // ============================================================

    pub(crate) fn insert(&self, task: Task) -> Result<TaskChanged, TaskError> {
        self.apply(|partitions| {
            let other = match task.state() {
                TaskState::Pending => &partitions.completed,
                TaskState::Completed => &partitions.pending,
            };
            if let Some(existing) = other.find_node(task.node) {
                return Err(TaskError::DuplicateIdentity {
                    node: existing.node,
                    due_date: existing.due_date,
                });
            }
            partitions.get_mut(task.state()).add(task)
        })
    }

    pub(crate) fn remove(
        &self,
        node: NodeRef,
        due_date: NaiveDateTime,
    ) -> Result<TaskChanged, TaskError> {
        self.apply(|partitions| {
            let state = partitions
                .locate(node, due_date)
                .ok_or(TaskError::NotFound { node, due_date })?;
            partitions.get_mut(state).remove(node, due_date)
        })
    }

    /// Re-keys the task at `(node, previous)` to `due_date`, placing it in the
    /// partition matching `completed`.
    pub(crate) fn update(
        &self,
        node: NodeRef,
        previous: NaiveDateTime,
        due_date: NaiveDateTime,
        completed: bool,
    ) -> Result<TaskChanged, TaskError> {
        self.apply(|partitions| {
            let from = partitions
                .locate(node, previous)
                .ok_or(TaskError::NotFound {
                    node,
                    due_date: previous,
                })?;
            let removed = partitions.get_mut(from).remove(node, previous)?;
            let to = TaskState::of(completed);
            match partitions.get_mut(to).add(Task::new(node, due_date, completed)) {
                Ok(added) => Ok(TaskChanged {
                    task: added.task,
                    kind: TaskChangeKind::Updated {
                        previous_due_date: previous,
                    },
                }),
                Err(e) => {
                    let _ = partitions.get_mut(from).add(removed.task);
                    Err(e)
                }
            }
        })
    }

    /// Moves the task of `node` to the partition matching `completed`.
    ///
    /// Returns `Ok(None)` when the node has no task or is already there.
    pub(crate) fn set_completed(
        &self,
        node: NodeRef,
        completed: bool,
    ) -> Result<Option<TaskChanged>, TaskError> {
        let to = TaskState::of(completed);
        let moved = self.apply(|partitions| {
            let Some(task) = partitions.find_node(node) else {
                return Ok(Vec::new());
            };
            let from = task.state();
            if from == to {
                return Ok(Vec::new());
            }
            partitions.get_mut(from).remove(node, task.due_date)?;
            let added = match partitions.get_mut(to).add(task.with_completed(completed)) {
                Ok(added) => added,
                Err(e) => {
                    let _ = partitions.get_mut(from).add(task);
                    return Err(e);
                }
            };
            Ok(vec![TaskChanged {
                task: added.task,
                kind: TaskChangeKind::Moved { from, to },
            }])
        })?;
        Ok(moved.into_iter().next())
    }

    /// Drops every task belonging to `tree`, publishing one `Removed` each.
    pub(crate) fn purge_tree(&self, tree: TreeId) -> Vec<TaskChanged> {
        self.apply(|partitions| {
            let mut removed = partitions.pending.remove_tree(tree);
            removed.extend(partitions.completed.remove_tree(tree));
            Ok(removed)
        })
        .unwrap_or_default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Partitions> {
        self.partitions.read().expect("registry lock poisoned")
    }

    /// Runs `f` under the write lock, then publishes what it returned after the
    /// lock is released.
    fn apply<C: Published>(
        &self,
        f: impl FnOnce(&mut Partitions) -> Result<C, TaskError>,
    ) -> Result<C, TaskError> {
        let _publish = self.publish.lock().expect("registry publish lock poisoned");
        let outcome = {
            let mut partitions = self.partitions.write().expect("registry lock poisoned");
            f(&mut partitions)?
        };
        let changes = outcome.changes();
        if !changes.is_empty() {
            let listeners: Vec<TaskListener> = self
                .listeners
                .lock()
                .expect("listener lock poisoned")
                .iter()
                .map(|(_, l)| l.clone())
                .collect();
            for change in changes {
                tracing::trace!(node = %change.task.node, kind = ?change.kind, "Task changed");
                for listener in &listeners {
                    listener(change);
                }
            }
        }
        Ok(outcome)
    }
}

/// Outcome of a registry mutation that carries notifications to publish.
trait Published {
    fn changes(&self) -> &[TaskChanged];
}

impl Published for TaskChanged {
    fn changes(&self) -> &[TaskChanged] {
        std::slice::from_ref(self)
    }
}

impl Published for Vec<TaskChanged> {
    fn changes(&self) -> &[TaskChanged] {
        self
    }
}
