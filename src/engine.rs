use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::config::TaskConfig;
use crate::due_date::DueDateCalculator;
use crate::models::{TaskAttributes, TreeId};
use crate::scheduler::{Clock, RefreshScheduler};
use crate::sync::{AttributeSyncBridge, SyncStats};
use crate::tasks::TaskRegistry;
use crate::tree::DocumentTree;

/// The task plugin as a whole: one registry, one bridge per open tree and the
/// daily refresh timer.
pub struct TaskEngine {
    config: TaskConfig,
    registry: Arc<TaskRegistry>,
    bridges: Mutex<HashMap<TreeId, AttributeSyncBridge>>,
    scheduler: Mutex<Option<Arc<RefreshScheduler>>>,
}

impl TaskEngine {
    pub fn new(config: TaskConfig) -> Self {
        Self {
            config,
            registry: Arc::new(TaskRegistry::new()),
            bridges: Mutex::new(HashMap::new()),
            scheduler: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &TaskConfig {
        &self.config
    }

    pub fn attributes(&self) -> TaskAttributes {
        self.config.attributes()
    }

    pub fn calculator(&self) -> DueDateCalculator {
        self.config.calculator()
    }

    pub fn registry(&self) -> Arc<TaskRegistry> {
        self.registry.clone()
    }

    /// Starts tracking `tree`. Returns `false` if it was already tracked.
    pub fn on_tree_created(&self, tree: Arc<dyn DocumentTree>) -> bool {
        let mut bridges = self.bridges.lock().expect("bridge lock poisoned");
        let id = tree.id();
        if bridges.contains_key(&id) {
            return false;
        }
        let bridge = AttributeSyncBridge::attach(tree, self.registry.clone(), &self.config);
        bridges.insert(id, bridge);
        true
    }

    /// Stops tracking `tree` and drops its tasks. Returns how many tasks were
    /// removed, or `None` if the tree was not tracked.
    pub fn on_tree_deleted(&self, tree: TreeId) -> Option<usize> {
        let bridge = self
            .bridges
            .lock()
            .expect("bridge lock poisoned")
            .remove(&tree)?;
        Some(bridge.detach())
    }

    pub fn is_tracking(&self, tree: TreeId) -> bool {
        self.bridges
            .lock()
            .expect("bridge lock poisoned")
            .contains_key(&tree)
    }

    pub fn sync_stats(&self, tree: TreeId) -> Option<SyncStats> {
        self.bridges
            .lock()
            .expect("bridge lock poisoned")
            .get(&tree)
            .map(|b| b.stats())
    }

    /// Creates and starts the refresh scheduler, or returns the running one.
    /// Must be called from within a tokio runtime.
    pub fn start_refresh(&self, clock: &dyn Clock) -> Arc<RefreshScheduler> {
        let mut slot = self.scheduler.lock().expect("scheduler lock poisoned");
        if let Some(existing) = slot.as_ref() {
            return existing.clone();
        }
        let scheduler = Arc::new(RefreshScheduler::new(clock));
        scheduler.start();
        *slot = Some(scheduler.clone());
        scheduler
    }

    /// Cancels the refresh scheduler and detaches every tree.
    pub async fn shutdown(&self) {
        let scheduler = self.scheduler.lock().expect("scheduler lock poisoned").take();
        if let Some(scheduler) = scheduler {
            scheduler.shutdown().await;
        }
        let bridges: Vec<AttributeSyncBridge> = self
            .bridges
            .lock()
            .expect("bridge lock poisoned")
            .drain()
            .map(|(_, b)| b)
            .collect();
        let purged: usize = bridges.into_iter().map(|b| b.detach()).sum();
        tracing::info!(purged, "Task engine shut down");
    }
}
