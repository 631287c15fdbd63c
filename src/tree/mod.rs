//! The host document tree, seen from the task engine.
//!
//! [`DocumentTree`] is the whole surface the engine consumes: attribute specs,
//! attribute reads and writes, and attribute-change subscriptions. [`MapTree`]
//! is an in-memory host used by the binary, the HTTP API and the tests.

mod map_tree;
mod snapshot;

use std::fmt;
use std::sync::Arc;

pub use map_tree::*;
pub use snapshot::*;

use crate::error::TreeError;
use crate::models::{AttributeChangeEvent, AttributeSpec, NodeId, TreeId};

/// Callback invoked for every attribute change on a tree.
pub type AttributeListener = Arc<dyn Fn(&AttributeChangeEvent) + Send + Sync>;

/// Handle returned by [`DocumentTree::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// A hierarchical document whose nodes carry named attributes.
///
/// Implementations deliver attribute-change notifications for one tree in the
/// order the changes happened, never concurrently with each other, and after
/// the change is visible through `get_attribute`. Listeners must not mutate
/// the tree from inside the callback.
pub trait DocumentTree: Send + Sync {
    fn id(&self) -> TreeId;

    fn attribute_spec(&self, name: &str) -> Option<AttributeSpec>;

    /// Registers `spec`, or returns the spec already registered under its name.
    fn create_attribute_spec(&self, spec: AttributeSpec) -> AttributeSpec;

    fn node_exists(&self, node: NodeId) -> bool;

    fn node_text(&self, node: NodeId) -> Option<String>;

    fn get_attribute(&self, node: NodeId, spec: &AttributeSpec) -> Option<String>;

    fn set_attribute(
        &self,
        node: NodeId,
        spec: &AttributeSpec,
        value: String,
    ) -> Result<(), TreeError>;

    /// Returns whether the attribute was present.
    fn delete_attribute(&self, node: NodeId, name: &str) -> Result<bool, TreeError>;

    /// Every node carrying `name`, with its current value.
    fn nodes_with_attribute(&self, name: &str) -> Vec<(NodeId, String)>;

    fn subscribe(&self, listener: AttributeListener) -> SubscriptionId;

    /// Returns whether the subscription existed.
    fn unsubscribe(&self, id: SubscriptionId) -> bool;
}

/// Looks up `spec` by name and registers it when the tree does not know it yet.
pub fn ensure_attribute_spec(tree: &dyn DocumentTree, spec: AttributeSpec) -> AttributeSpec {
    match tree.attribute_spec(&spec.name) {
        Some(existing) => existing,
        None => tree.create_attribute_spec(spec),
    }
}
