use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::config::TaskConfig;
use crate::due_date::TaskBucket;
use crate::engine::TaskEngine;
use crate::error::TreeError;
use crate::models::{NodeId, NodeRef, Task, TreeId};
use crate::scheduler::Clock;
use crate::tree::{DocumentTree, MapTree, TreeSnapshot};

/// A task as views render it: resolved node text plus its current bucket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskView {
    pub tree_id: TreeId,
    pub node_id: NodeId,
    pub text: String,
    pub due_date: NaiveDateTime,
    pub completed: bool,
    pub bucket: TaskBucket,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MapSummary {
    pub id: TreeId,
    pub name: String,
    pub root_id: NodeId,
    pub node_count: usize,
}

/// Pending tasks per bucket, computed on each refresh.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BucketCounts {
    pub overdue: usize,
    pub today: usize,
    pub tomorrow: usize,
    pub this_week: usize,
    pub later: usize,
}

impl BucketCounts {
    fn add(&mut self, bucket: TaskBucket) {
        match bucket {
            TaskBucket::Overdue => self.overdue += 1,
            TaskBucket::Today => self.today += 1,
            TaskBucket::Tomorrow => self.tomorrow += 1,
            TaskBucket::ThisWeek => self.this_week += 1,
            TaskBucket::Later => self.later += 1,
        }
    }
}

/// The maps open in this process, wired to one task engine.
#[derive(Clone)]
pub struct Workspace {
    engine: Arc<TaskEngine>,
    maps: Arc<RwLock<BTreeMap<TreeId, Arc<MapTree>>>>,
    clock: Arc<dyn Clock>,
}

impl Workspace {
    pub fn new(config: TaskConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            engine: Arc::new(TaskEngine::new(config)),
            maps: Arc::new(RwLock::new(BTreeMap::new())),
            clock,
        }
    }

    pub fn engine(&self) -> &Arc<TaskEngine> {
        &self.engine
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    /// Adds `map` to the workspace and starts tracking its tasks.
    pub fn open_map(&self, map: MapTree) -> Arc<MapTree> {
        let map = Arc::new(map);
        self.maps
            .write()
            .expect("workspace lock poisoned")
            .insert(map.id(), map.clone());
        self.engine.on_tree_created(map.clone());
        tracing::info!(tree = %map.id(), name = map.name(), "Opened map");
        map
    }

    pub fn create_map(&self, name: impl Into<String>) -> Arc<MapTree> {
        self.open_map(MapTree::new(name))
    }

    pub fn load_map(&self, path: &Path) -> Result<Arc<MapTree>> {
        let snapshot = load_snapshot(path)?;
        Ok(self.open_map(MapTree::from_snapshot(snapshot)))
    }

    /// Closes a map. Returns how many tasks went with it.
    pub fn close_map(&self, id: TreeId) -> Result<usize, TreeError> {
        self.maps
            .write()
            .expect("workspace lock poisoned")
            .remove(&id)
            .ok_or(TreeError::TreeNotFound(id))?;
        let purged = self.engine.on_tree_deleted(id).unwrap_or(0);
        tracing::info!(tree = %id, purged, "Closed map");
        Ok(purged)
    }

    pub fn map(&self, id: TreeId) -> Result<Arc<MapTree>, TreeError> {
        self.maps
            .read()
            .expect("workspace lock poisoned")
            .get(&id)
            .cloned()
            .ok_or(TreeError::TreeNotFound(id))
    }

    pub fn summaries(&self) -> Vec<MapSummary> {
        self.maps
            .read()
            .expect("workspace lock poisoned")
            .values()
            .map(|m| summarize(m))
            .collect()
    }

    pub fn all_tasks(&self) -> Vec<TaskView> {
        self.views(self.engine.registry().all())
    }

    pub fn pending_tasks(&self) -> Vec<TaskView> {
        self.views(self.engine.registry().pending())
    }

    pub fn completed_tasks(&self) -> Vec<TaskView> {
        self.views(self.engine.registry().completed())
    }

    pub fn task_for(&self, tree: TreeId, node: NodeId) -> Option<TaskView> {
        let task = self
            .engine
            .registry()
            .find_node(NodeRef::new(tree, node))?;
        self.views(vec![task]).into_iter().next()
    }

    /// Re-evaluates the bucket of every pending task against the clock.
    pub fn bucket_counts(&self) -> BucketCounts {
        let now = self.now();
        let mut counts = BucketCounts::default();
        for task in self.engine.registry().pending() {
            counts.add(TaskBucket::classify(task.due_date, now));
        }
        counts
    }

    fn views(&self, tasks: Vec<Task>) -> Vec<TaskView> {
        let now = self.now();
        let maps = self.maps.read().expect("workspace lock poisoned");
        tasks
            .into_iter()
            .map(|task| TaskView {
                tree_id: task.node.tree,
                node_id: task.node.node,
                text: maps
                    .get(&task.node.tree)
                    .and_then(|m| m.node_text(task.node.node))
                    .unwrap_or_default(),
                due_date: task.due_date,
                completed: task.completed,
                bucket: TaskBucket::classify(task.due_date, now),
            })
            .collect()
    }
}

pub fn summarize(map: &MapTree) -> MapSummary {
    MapSummary {
        id: map.id(),
        name: map.name().to_string(),
        root_id: map.root(),
        node_count: map.node_count(),
    }
}

pub fn load_snapshot(path: &Path) -> Result<TreeSnapshot> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read map file {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse map file {}", path.display()))
}
