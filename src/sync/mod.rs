//! Translates node attribute changes into task registry mutations.
//!
//! # Responsibility
//! - Watch the due-date and completion attributes of one tree.
//! - Create, remove, re-key and move tasks so the registry always mirrors the
//!   nodes that carry a valid due date.
//!
//! # Invariants
//! - Events are handled strictly in arrival order.
//! - A missing task on removal or update is a benign race and never an error
//!   for the caller.
//! - Unparsable due dates never produce a task.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use serde::Serialize;

use crate::config::TaskConfig;
use crate::due_date::DueDateCalculator;
use crate::error::TaskError;
use crate::models::{AttributeChange, AttributeChangeEvent, NodeRef, Task, TaskAttributes, TreeId};
use crate::tasks::TaskRegistry;
use crate::tree::{ensure_attribute_spec, DocumentTree, SubscriptionId};

/// Running counters of what a bridge has done, for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub created: u64,
    pub removed: u64,
    pub updated: u64,
    pub moved: u64,
    pub not_found: u64,
    pub duplicates: u64,
    pub invalid_values: u64,
    pub escalations: u64,
}

/// Keeps the registry in step with one tree for as long as it is attached.
pub struct AttributeSyncBridge {
    tree: Arc<dyn DocumentTree>,
    subscription: SubscriptionId,
    handler: Arc<SyncHandler>,
}

impl AttributeSyncBridge {
    /// Registers the task attributes on `tree`, ingests the due dates already
    /// present and subscribes to further changes.
    pub fn attach(
        tree: Arc<dyn DocumentTree>,
        registry: Arc<TaskRegistry>,
        config: &TaskConfig,
    ) -> Self {
        let attributes = config.attributes();
        ensure_attribute_spec(tree.as_ref(), attributes.due_date_spec());
        ensure_attribute_spec(tree.as_ref(), attributes.completion_spec());

        let handler = Arc::new(SyncHandler {
            tree_id: tree.id(),
            tree: Arc::downgrade(&tree),
            registry,
            attributes,
            calculator: config.calculator(),
            escalation_threshold: config.invalid_value_escalation_threshold.max(1),
            stats: Mutex::new(SyncStats::default()),
            invalid_values: Mutex::new(HashMap::new()),
        });

        let listener = handler.clone();
        let subscription = tree.subscribe(Arc::new(move |event: &AttributeChangeEvent| {
            listener.handle(event)
        }));
        handler.ingest(tree.as_ref());
        tracing::info!(tree = %handler.tree_id, %subscription, "Attached task sync bridge");

        Self {
            tree,
            subscription,
            handler,
        }
    }

    pub fn tree_id(&self) -> TreeId {
        self.handler.tree_id
    }

    pub fn stats(&self) -> SyncStats {
        *self.handler.stats.lock().expect("stats lock poisoned")
    }

    /// Unsubscribes and purges every task of this tree from the registry.
    /// Returns the number of tasks removed.
    pub fn detach(self) -> usize {
        self.tree.unsubscribe(self.subscription);
        let purged = self.handler.registry.purge_tree(self.handler.tree_id).len();
        tracing::info!(tree = %self.handler.tree_id, purged, "Detached task sync bridge");
        purged
    }
}

impl Drop for AttributeSyncBridge {
    fn drop(&mut self) {
        self.tree.unsubscribe(self.subscription);
    }
}

struct SyncHandler {
    tree_id: TreeId,
    tree: Weak<dyn DocumentTree>,
    registry: Arc<TaskRegistry>,
    attributes: TaskAttributes,
    calculator: DueDateCalculator,
    escalation_threshold: u32,
    stats: Mutex<SyncStats>,
    invalid_values: Mutex<HashMap<NodeRef, u32>>,
}

impl SyncHandler {
    fn handle(&self, event: &AttributeChangeEvent) {
        if event.node.tree != self.tree_id {
            return;
        }
        if event.attribute == self.attributes.due_date {
            self.on_due_date(event.node, &event.change);
        } else if event.attribute == self.attributes.completion {
            self.on_completion(event.node, &event.change);
        }
    }

    /// Picks up due dates set before the subscription existed. Runs after
    /// subscribing, so a node the listener has already seen is skipped and the
    /// value is re-read in case it changed since the scan.
    fn ingest(&self, tree: &dyn DocumentTree) {
        let spec = self.attributes.due_date_spec();
        for (node, _) in tree.nodes_with_attribute(&self.attributes.due_date) {
            let node = NodeRef::new(self.tree_id, node);
            if self.registry.find_node(node).is_some() {
                continue;
            }
            let Some(value) = tree.get_attribute(node.node, &spec) else {
                continue;
            };
            self.on_due_date(node, &AttributeChange::Added { new: value });
        }
    }

    fn on_due_date(&self, node: NodeRef, change: &AttributeChange) {
        let outcome = match change {
            AttributeChange::Added { new } => self.added(node, new),
            AttributeChange::Removed { old } => self.removed(node, old),
            AttributeChange::ValueUpdated { old, new } => self.updated(node, old, new),
        };
        if let Err(e) = outcome {
            self.report(node, e);
        }
    }

    fn on_completion(&self, node: NodeRef, change: &AttributeChange) {
        let completed = match change {
            AttributeChange::Added { .. } => true,
            AttributeChange::Removed { .. } if !self.node_exists(node) => {
                // Node deletion: the due date's own Removed drops the task.
                return;
            }
            AttributeChange::Removed { .. } => false,
            AttributeChange::ValueUpdated { .. } => return,
        };
        match self.registry.set_completed(node, completed) {
            Ok(Some(_)) => self.count(|s| s.moved += 1),
            Ok(None) => {}
            Err(e) => self.report(node, e),
        }
    }

    fn added(&self, node: NodeRef, new: &str) -> Result<(), TaskError> {
        let due_date = self.calculator.parse(new)?;
        self.forget_invalid(node);
        let completed = self.is_completed(node);
        self.registry.insert(Task::new(node, due_date, completed))?;
        self.count(|s| s.created += 1);
        Ok(())
    }

    fn removed(&self, node: NodeRef, old: &str) -> Result<(), TaskError> {
        self.forget_invalid(node);
        let Ok(due_date) = self.calculator.parse(old) else {
            tracing::debug!(%node, value = old, "Removed due date never produced a task");
            return Ok(());
        };
        self.registry.remove(node, due_date)?;
        self.count(|s| s.removed += 1);
        Ok(())
    }

    fn updated(&self, node: NodeRef, old: &str, new: &str) -> Result<(), TaskError> {
        let previous = self.calculator.parse(old).ok();
        let due_date = match self.calculator.parse(new) {
            Ok(due_date) => due_date,
            Err(invalid) => {
                if let Some(previous) = previous {
                    match self.registry.remove(node, previous) {
                        Ok(_) => self.count(|s| s.removed += 1),
                        Err(e) => self.report(node, e),
                    }
                }
                return Err(invalid);
            }
        };
        self.forget_invalid(node);
        let completed = self.is_completed(node);

        let Some(previous) = previous else {
            self.registry.insert(Task::new(node, due_date, completed))?;
            self.count(|s| s.created += 1);
            return Ok(());
        };

        match self.registry.update(node, previous, due_date, completed) {
            Ok(_) => {
                self.count(|s| s.updated += 1);
                Ok(())
            }
            Err(e @ TaskError::NotFound { .. }) => {
                self.report(node, e);
                self.registry.insert(Task::new(node, due_date, completed))?;
                self.count(|s| s.created += 1);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn node_exists(&self, node: NodeRef) -> bool {
        self.tree
            .upgrade()
            .is_some_and(|tree| tree.node_exists(node.node))
    }

    fn is_completed(&self, node: NodeRef) -> bool {
        match self.tree.upgrade() {
            Some(tree) => Task::is_completed(tree.as_ref(), node.node, &self.attributes),
            None => false,
        }
    }

    fn report(&self, node: NodeRef, error: TaskError) {
        match &error {
            TaskError::NotFound { .. } => {
                self.count(|s| s.not_found += 1);
                tracing::debug!(%node, "Ignoring change for untracked task: {}", error);
            }
            TaskError::DuplicateIdentity { .. } => {
                self.count(|s| s.duplicates += 1);
                tracing::error!(%node, "Task registry out of step with tree: {}", error);
            }
            TaskError::InvalidAttributeValue { .. } => {
                self.count(|s| s.invalid_values += 1);
                let seen = {
                    let mut invalid = self.invalid_values.lock().expect("invalid lock poisoned");
                    let seen = invalid.entry(node).or_insert(0);
                    *seen += 1;
                    *seen
                };
                if seen >= self.escalation_threshold {
                    self.count(|s| s.escalations += 1);
                    tracing::error!(%node, occurrences = seen, "Repeated invalid due date: {}", error);
                } else {
                    tracing::warn!(%node, "Skipping task with invalid due date: {}", error);
                }
            }
        }
    }

    fn forget_invalid(&self, node: NodeRef) {
        self.invalid_values
            .lock()
            .expect("invalid lock poisoned")
            .remove(&node);
    }

    fn count(&self, f: impl FnOnce(&mut SyncStats)) {
        f(&mut self.stats.lock().expect("stats lock poisoned"));
    }
}
