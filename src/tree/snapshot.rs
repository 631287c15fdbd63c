use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::{AttributeSpec, NodeId};

/// JSON description of a whole map, used to seed a [`MapTree`](super::MapTree).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeSnapshot {
    pub name: String,
    /// Attribute definitions. Values stored under a name missing here are
    /// kept as-is and stay undeclared until someone registers a spec for it.
    #[serde(default)]
    pub attribute_specs: Vec<AttributeSpec>,
    pub root: NodeSnapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSnapshot {
    /// Filled in when exporting; ignored on load.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<NodeId>,
    pub text: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeSnapshot>,
}

impl NodeSnapshot {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: None,
            text: text.into(),
            attributes: BTreeMap::new(),
            children: Vec::new(),
        }
    }
}
