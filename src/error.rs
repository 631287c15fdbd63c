use chrono::NaiveDateTime;
use thiserror::Error;

use crate::models::{NodeId, NodeRef, TreeId};

/// Faults raised while keeping the task collections in step with the tree.
///
/// Only [`TaskError::DuplicateIdentity`] signals a broken invariant. The other
/// two are expected under racy or malformed input and are recovered locally.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("no task for node {node} due {due_date}")]
    NotFound {
        node: NodeRef,
        due_date: NaiveDateTime,
    },

    #[error("task for node {node} due {due_date} is already tracked")]
    DuplicateIdentity {
        node: NodeRef,
        due_date: NaiveDateTime,
    },

    #[error("invalid due date value {value:?}")]
    InvalidAttributeValue { value: String },
}

/// Errors reported by a host document tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("tree {0} not found")]
    TreeNotFound(TreeId),

    #[error("node {0} not found")]
    NodeNotFound(NodeId),

    #[error("attribute {0:?} is not defined on this tree")]
    UnknownAttribute(String),

    #[error("the root node cannot be deleted")]
    RootNode,
}
