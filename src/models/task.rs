use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::{AttributeSpec, NodeId, NodeRef, TaskState};
use crate::due_date::{format_due_date, DueDateCalculator, QuickDate};
use crate::error::{TaskError, TreeError};
use crate::tree::{ensure_attribute_spec, DocumentTree};

/// Name of the attribute whose presence makes a node a task.
pub const DUE_DATE_ATTRIBUTE: &str = "Due Date";
/// Name of the attribute that marks a task as done.
pub const COMPLETION_DATE_ATTRIBUTE: &str = "Completion Date";

/// The attribute names the task engine watches on every tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskAttributes {
    pub due_date: String,
    pub completion: String,
}

impl Default for TaskAttributes {
    fn default() -> Self {
        Self {
            due_date: DUE_DATE_ATTRIBUTE.to_string(),
            completion: COMPLETION_DATE_ATTRIBUTE.to_string(),
        }
    }
}

impl TaskAttributes {
    pub fn due_date_spec(&self) -> AttributeSpec {
        AttributeSpec::system_date_time(&self.due_date)
    }

    pub fn completion_spec(&self) -> AttributeSpec {
        AttributeSpec::system_date_time(&self.completion)
    }
}

/// Lookup identity of a task inside one collection.
///
/// The due date is part of the key because removal and update notifications
/// carry the previous value, which is what locates the stored task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskKey {
    pub node: NodeRef,
    pub due_date: NaiveDateTime,
}

/// A node's due-date obligation.
///
/// Tasks are projections of node attributes and are never stored on their
/// own. All writes go through the node (see the associated functions below)
/// and come back as attribute-change notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Task {
    pub node: NodeRef,
    pub due_date: NaiveDateTime,
    pub completed: bool,
}

impl Task {
    pub fn new(node: NodeRef, due_date: NaiveDateTime, completed: bool) -> Self {
        Self {
            node,
            due_date,
            completed,
        }
    }

    pub fn key(&self) -> TaskKey {
        TaskKey {
            node: self.node,
            due_date: self.due_date,
        }
    }

    pub fn state(&self) -> TaskState {
        TaskState::of(self.completed)
    }

    /// Same task in the other partition.
    pub fn with_completed(self, completed: bool) -> Self {
        Self { completed, ..self }
    }

    /// Builds the task for `node` from its attributes.
    ///
    /// Returns `Ok(None)` for a node without a due date and
    /// `InvalidAttributeValue` when the stored value does not parse.
    pub fn read(
        tree: &dyn DocumentTree,
        node: NodeId,
        attributes: &TaskAttributes,
        calculator: &DueDateCalculator,
    ) -> Result<Option<Task>, TaskError> {
        let Some(raw) = tree.get_attribute(node, &attributes.due_date_spec()) else {
            return Ok(None);
        };
        let due_date = calculator.parse(&raw)?;
        Ok(Some(Task::new(
            NodeRef::new(tree.id(), node),
            due_date,
            Self::is_completed(tree, node, attributes),
        )))
    }

    /// Whether `node` carries the completion marker.
    pub fn is_completed(
        tree: &dyn DocumentTree,
        node: NodeId,
        attributes: &TaskAttributes,
    ) -> bool {
        tree.get_attribute(node, &attributes.completion_spec()).is_some()
    }

    pub fn set_due_date(
        tree: &dyn DocumentTree,
        node: NodeId,
        attributes: &TaskAttributes,
        due_date: NaiveDateTime,
    ) -> Result<(), TreeError> {
        let spec = ensure_attribute_spec(tree, attributes.due_date_spec());
        tree.set_attribute(node, &spec, format_due_date(due_date))
    }

    /// Moves the due date to a quick date without losing a chosen time of day.
    pub fn apply_quick_date(
        tree: &dyn DocumentTree,
        node: NodeId,
        attributes: &TaskAttributes,
        calculator: &DueDateCalculator,
        kind: QuickDate,
        now: NaiveDateTime,
    ) -> Result<NaiveDateTime, TreeError> {
        if !tree.node_exists(node) {
            return Err(TreeError::NodeNotFound(node));
        }
        let existing = tree
            .get_attribute(node, &attributes.due_date_spec())
            .and_then(|raw| calculator.parse(&raw).ok());
        let due_date = calculator.quick(kind, now, existing);
        Self::set_due_date(tree, node, attributes, due_date)?;
        Ok(due_date)
    }

    pub fn clear_due_date(
        tree: &dyn DocumentTree,
        node: NodeId,
        attributes: &TaskAttributes,
    ) -> Result<bool, TreeError> {
        tree.delete_attribute(node, &attributes.due_date)
    }

    /// Stamps the completion marker with `now`.
    pub fn complete(
        tree: &dyn DocumentTree,
        node: NodeId,
        attributes: &TaskAttributes,
        now: NaiveDateTime,
    ) -> Result<(), TreeError> {
        let spec = ensure_attribute_spec(tree, attributes.completion_spec());
        tree.set_attribute(node, &spec, format_due_date(now))
    }

    pub fn reopen(
        tree: &dyn DocumentTree,
        node: NodeId,
        attributes: &TaskAttributes,
    ) -> Result<bool, TreeError> {
        tree.delete_attribute(node, &attributes.completion)
    }
}
