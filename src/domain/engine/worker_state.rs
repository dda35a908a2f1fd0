use std::collections::HashMap;

use crate::domain::engine::pool::TaskHandle;
use crate::domain::utils::id::{NodeTreeId, WorkerName};

/// Per-worker bookkeeping of submitted tasks.
///
/// Launch tasks are keyed by nodetree uuid and node name. A handle stays until the node reaches a
/// terminal state or is reset, so a node is never launched twice at once.
#[derive(Debug)]
pub struct WorkerState {
    pub name: WorkerName,
    futures: HashMap<NodeTreeId, HashMap<String, TaskHandle>>,
    /// Output exposure tasks; dropped once done.
    background: Vec<TaskHandle>,
}

impl WorkerState {
    pub fn new(name: WorkerName) -> Self {
        WorkerState { name, futures: HashMap::new(), background: Vec::new() }
    }

    pub fn track(&mut self, nodetree: NodeTreeId, node: String, handle: TaskHandle) {
        self.futures.entry(nodetree).or_default().insert(node, handle);
    }

    pub fn track_background(&mut self, handle: TaskHandle) {
        self.background.retain(|h| !h.is_done());
        self.background.push(handle);
    }

    pub fn get(&self, nodetree: &NodeTreeId, node: &str) -> Option<&TaskHandle> {
        self.futures.get(nodetree)?.get(node)
    }

    pub fn take(&mut self, nodetree: &NodeTreeId, node: &str) -> Option<TaskHandle> {
        let per_tree = self.futures.get_mut(nodetree)?;
        let handle = per_tree.remove(node);
        if per_tree.is_empty() {
            self.futures.remove(nodetree);
        }
        handle
    }

    /// Number of tracked tasks that have not finished yet.
    pub fn active(&self) -> usize {
        let launches = self.futures.values().flat_map(|m| m.values()).filter(|h| !h.is_done()).count();
        launches + self.background.iter().filter(|h| !h.is_done()).count()
    }

    pub async fn wait_all(&self) {
        for handle in self.futures.values().flat_map(|m| m.values()) {
            handle.wait().await;
        }
        for handle in &self.background {
            handle.wait().await;
        }
    }
}
