use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::NaiveDateTime;

use super::{AttributeListener, DocumentTree, NodeSnapshot, SubscriptionId, TreeSnapshot};
use crate::due_date::format_due_date;
use crate::error::TreeError;
use crate::models::{AttributeChange, AttributeChangeEvent, AttributeSpec, NodeId, NodeRef, TreeId};

/// Attribute written on sub-tasks for the start of their time window.
pub const START_DATE_ATTRIBUTE: &str = "Start Date";
/// Attribute written on sub-tasks for the end of their time window.
pub const END_DATE_ATTRIBUTE: &str = "End Date";

/// In-memory mind map: a rooted node hierarchy with per-node attributes.
///
/// Mutations and their notifications are serialized through one sequence
/// lock, so listeners see each tree's changes one at a time and in order.
pub struct MapTree {
    id: TreeId,
    name: String,
    state: Mutex<TreeState>,
    listeners: Mutex<Vec<(SubscriptionId, AttributeListener)>>,
    next_subscription: AtomicU64,
    sequence: Mutex<()>,
}

impl std::fmt::Debug for MapTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapTree")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

struct TreeState {
    root: NodeId,
    nodes: HashMap<NodeId, MapNode>,
    specs: Vec<AttributeSpec>,
}

struct MapNode {
    parent: Option<NodeId>,
    text: String,
    children: Vec<NodeId>,
    attributes: BTreeMap<String, String>,
}

impl MapNode {
    fn new(parent: Option<NodeId>, text: String) -> Self {
        Self {
            parent,
            text,
            children: Vec::new(),
            attributes: BTreeMap::new(),
        }
    }
}

impl TreeState {
    fn node_mut(&mut self, id: NodeId) -> Result<&mut MapNode, TreeError> {
        self.nodes.get_mut(&id).ok_or(TreeError::NodeNotFound(id))
    }

    fn has_spec(&self, name: &str) -> bool {
        self.specs.iter().any(|s| s.name == name)
    }

    fn insert_snapshot(&mut self, parent: Option<NodeId>, snapshot: NodeSnapshot) -> NodeId {
        let id = NodeId::new();
        let mut node = MapNode::new(parent, snapshot.text);
        node.attributes = snapshot.attributes;
        self.nodes.insert(id, node);
        for child in snapshot.children {
            let child_id = self.insert_snapshot(Some(id), child);
            if let Some(node) = self.nodes.get_mut(&id) {
                node.children.push(child_id);
            }
        }
        id
    }

    fn export(&self, id: NodeId) -> NodeSnapshot {
        let Some(node) = self.nodes.get(&id) else {
            return NodeSnapshot::new("");
        };
        NodeSnapshot {
            id: Some(id),
            text: node.text.clone(),
            attributes: node.attributes.clone(),
            children: node.children.iter().map(|c| self.export(*c)).collect(),
        }
    }

    fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if let Some(node) = self.nodes.get(&next) {
                out.push(next);
                stack.extend(node.children.iter().rev().copied());
            }
        }
        out
    }
}

impl MapTree {
    /// Creates a map whose root node carries `name` as its text.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let root = NodeId::new();
        let mut nodes = HashMap::new();
        nodes.insert(root, MapNode::new(None, name.clone()));
        Self::with_state(
            name,
            TreeState {
                root,
                nodes,
                specs: Vec::new(),
            },
        )
    }

    pub fn from_snapshot(snapshot: TreeSnapshot) -> Self {
        let mut state = TreeState {
            root: NodeId::new(),
            nodes: HashMap::new(),
            specs: snapshot.attribute_specs,
        };
        state.root = state.insert_snapshot(None, snapshot.root);
        Self::with_state(snapshot.name, state)
    }

    fn with_state(name: String, state: TreeState) -> Self {
        Self {
            id: TreeId::new(),
            name,
            state: Mutex::new(state),
            listeners: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
            sequence: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> NodeId {
        self.state.lock().expect("tree lock poisoned").root
    }

    pub fn node_count(&self) -> usize {
        self.state.lock().expect("tree lock poisoned").nodes.len()
    }

    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        let state = self.state.lock().expect("tree lock poisoned");
        state
            .nodes
            .get(&node)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        let state = self.state.lock().expect("tree lock poisoned");
        state.nodes.get(&node).and_then(|n| n.parent)
    }

    pub fn snapshot(&self) -> TreeSnapshot {
        let state = self.state.lock().expect("tree lock poisoned");
        TreeSnapshot {
            name: self.name.clone(),
            attribute_specs: state.specs.clone(),
            root: state.export(state.root),
        }
    }

    pub fn add_node(&self, parent: NodeId, text: impl Into<String>) -> Result<NodeId, TreeError> {
        let text = text.into();
        self.mutate(|state, _| {
            let id = NodeId::new();
            state.node_mut(parent)?.children.push(id);
            state.nodes.insert(id, MapNode::new(Some(parent), text));
            Ok(id)
        })
    }

    pub fn set_node_text(&self, node: NodeId, text: impl Into<String>) -> Result<(), TreeError> {
        let text = text.into();
        self.mutate(|state, _| {
            state.node_mut(node)?.text = text;
            Ok(())
        })
    }

    /// Deletes `node` and its whole subtree. Every attribute carried by a
    /// deleted node is reported as removed.
    pub fn delete_node(&self, node: NodeId) -> Result<(), TreeError> {
        let tree = self.id;
        self.mutate(|state, events| {
            if node == state.root {
                return Err(TreeError::RootNode);
            }
            let parent = state
                .nodes
                .get(&node)
                .ok_or(TreeError::NodeNotFound(node))?
                .parent;
            if let Some(parent) = parent.and_then(|p| state.nodes.get_mut(&p)) {
                parent.children.retain(|c| *c != node);
            }
            for id in state.subtree(node) {
                let Some(removed) = state.nodes.remove(&id) else {
                    continue;
                };
                for (attribute, old) in removed.attributes {
                    events.push(AttributeChangeEvent {
                        node: NodeRef::new(tree, id),
                        attribute,
                        change: AttributeChange::Removed { old },
                    });
                }
            }
            Ok(())
        })
    }

    /// Creates a child of `parent` spanning `start..end`.
    pub fn add_sub_task(
        &self,
        parent: NodeId,
        text: impl Into<String>,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<NodeId, TreeError> {
        let node = self.add_node(parent, text)?;
        let start_spec = self.create_attribute_spec(AttributeSpec::system_date_time(
            START_DATE_ATTRIBUTE,
        ));
        let end_spec =
            self.create_attribute_spec(AttributeSpec::system_date_time(END_DATE_ATTRIBUTE));
        self.set_attribute(node, &start_spec, format_due_date(start))?;
        self.set_attribute(node, &end_spec, format_due_date(end))?;
        Ok(node)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().expect("listener lock poisoned").len()
    }

    /// Applies `f` under the state lock, then delivers the events it queued
    /// once the lock is released.
    fn mutate<R>(
        &self,
        f: impl FnOnce(&mut TreeState, &mut Vec<AttributeChangeEvent>) -> Result<R, TreeError>,
    ) -> Result<R, TreeError> {
        let _sequence = self.sequence.lock().expect("tree sequence lock poisoned");
        let mut events = Vec::new();
        let result = {
            let mut state = self.state.lock().expect("tree lock poisoned");
            f(&mut state, &mut events)?
        };
        self.notify(&events);
        Ok(result)
    }

    fn notify(&self, events: &[AttributeChangeEvent]) {
        if events.is_empty() {
            return;
        }
        let listeners: Vec<AttributeListener> = self
            .listeners
            .lock()
            .expect("listener lock poisoned")
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for event in events {
            for listener in &listeners {
                listener(event);
            }
        }
    }
}

impl DocumentTree for MapTree {
    fn id(&self) -> TreeId {
        self.id
    }

    fn attribute_spec(&self, name: &str) -> Option<AttributeSpec> {
        let state = self.state.lock().expect("tree lock poisoned");
        state.specs.iter().find(|s| s.name == name).cloned()
    }

    fn create_attribute_spec(&self, spec: AttributeSpec) -> AttributeSpec {
        let mut state = self.state.lock().expect("tree lock poisoned");
        if let Some(existing) = state.specs.iter().find(|s| s.name == spec.name) {
            return existing.clone();
        }
        tracing::debug!(tree = %self.id, attribute = %spec.name, "Registered attribute spec");
        state.specs.push(spec.clone());
        spec
    }

    fn node_exists(&self, node: NodeId) -> bool {
        let state = self.state.lock().expect("tree lock poisoned");
        state.nodes.contains_key(&node)
    }

    fn node_text(&self, node: NodeId) -> Option<String> {
        let state = self.state.lock().expect("tree lock poisoned");
        state.nodes.get(&node).map(|n| n.text.clone())
    }

    fn get_attribute(&self, node: NodeId, spec: &AttributeSpec) -> Option<String> {
        let state = self.state.lock().expect("tree lock poisoned");
        state
            .nodes
            .get(&node)
            .and_then(|n| n.attributes.get(&spec.name).cloned())
    }

    fn set_attribute(
        &self,
        node: NodeId,
        spec: &AttributeSpec,
        value: String,
    ) -> Result<(), TreeError> {
        let tree = self.id;
        self.mutate(|state, events| {
            if !state.has_spec(&spec.name) {
                return Err(TreeError::UnknownAttribute(spec.name.clone()));
            }
            let target = state.node_mut(node)?;
            let change = match target.attributes.insert(spec.name.clone(), value.clone()) {
                None => AttributeChange::Added { new: value },
                Some(old) if old == value => return Ok(()),
                Some(old) => AttributeChange::ValueUpdated { old, new: value },
            };
            events.push(AttributeChangeEvent {
                node: NodeRef::new(tree, node),
                attribute: spec.name.clone(),
                change,
            });
            Ok(())
        })
    }

    fn delete_attribute(&self, node: NodeId, name: &str) -> Result<bool, TreeError> {
        let tree = self.id;
        self.mutate(|state, events| {
            let Some(old) = state.node_mut(node)?.attributes.remove(name) else {
                return Ok(false);
            };
            events.push(AttributeChangeEvent {
                node: NodeRef::new(tree, node),
                attribute: name.to_string(),
                change: AttributeChange::Removed { old },
            });
            Ok(true)
        })
    }

    fn nodes_with_attribute(&self, name: &str) -> Vec<(NodeId, String)> {
        let state = self.state.lock().expect("tree lock poisoned");
        state
            .subtree(state.root)
            .into_iter()
            .filter_map(|id| {
                state
                    .nodes
                    .get(&id)
                    .and_then(|n| n.attributes.get(name))
                    .map(|v| (id, v.clone()))
            })
            .collect()
    }

    fn subscribe(&self, listener: AttributeListener) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .expect("listener lock poisoned")
            .push((id, listener));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.lock().expect("listener lock poisoned");
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }
}
