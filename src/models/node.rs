use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of one document tree (an open map).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TreeId(pub Uuid);

impl TreeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TreeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identity of a node, stable for the node's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub Uuid);

impl NodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Handle to a node somewhere in a tree.
///
/// A `NodeRef` never keeps the node alive. Resolving it goes through the
/// owning [`DocumentTree`](crate::tree::DocumentTree), so a task whose node
/// has been deleted is detected instead of dangling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeRef {
    pub tree: TreeId,
    pub node: NodeId,
}

impl NodeRef {
    pub fn new(tree: TreeId, node: NodeId) -> Self {
        Self { tree, node }
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tree, self.node)
    }
}

/// Declared value type of an attribute.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttributeDataType {
    Text,
    DateTime,
}

/// Whether a node may carry several values for one attribute.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ListOption {
    NoList,
    List,
}

/// An attribute definition registered on a tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttributeSpec {
    pub name: String,
    pub required: bool,
    pub data_type: AttributeDataType,
    pub list_option: ListOption,
    /// System attributes are managed by plugins rather than edited by hand.
    pub system_owned: bool,
}

impl AttributeSpec {
    /// A single-valued, system-owned date-time attribute.
    pub fn system_date_time(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
            data_type: AttributeDataType::DateTime,
            list_option: ListOption::NoList,
            system_owned: true,
        }
    }
}

/// What happened to one attribute of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttributeChange {
    Added { new: String },
    Removed { old: String },
    ValueUpdated { old: String, new: String },
}

/// Notification delivered by a tree to its attribute listeners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeChangeEvent {
    pub node: NodeRef,
    pub attribute: String,
    pub change: AttributeChange,
}
