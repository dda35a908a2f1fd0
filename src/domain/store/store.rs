use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::domain::model::node::{NodeAction, NodeRecord, NodeState};
use crate::domain::model::nodetree::{NodeTreeRecord, NodeTreeState};
use crate::domain::store::socket_data::SocketData;
use crate::domain::utils::id::{NodeId, NodeTreeId, SocketId, WorkerName};
use crate::error::{Error, Result};
use crate::loader::parser::{parse_json_file, write_json_file};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WorkerRecord {
    pub name: WorkerName,
    /// RFC 3339 timestamp of the last heartbeat.
    pub last_update: String,
}

#[derive(Serialize, Deserialize, Debug, Default)]
struct StoreInner {
    nodetrees: BTreeMap<NodeTreeId, NodeTreeRecord>,
    nodes: BTreeMap<NodeId, NodeRecord>,
    /// Output values keyed by output-socket uuid.
    data: BTreeMap<SocketId, SocketData>,
    logs: BTreeMap<NodeId, String>,
    workers: BTreeMap<WorkerName, WorkerRecord>,
}

/// In-process document store for nodetree and node records.
///
/// Cloning the store clones the handle; every clone sees the same records. All records sit behind
/// a single lock and writers replace whole fields, so concurrent writes are last-write-wins.
#[derive(Debug, Clone, Default)]
pub struct Store {
    inner: Arc<RwLock<StoreInner>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert_nodetree(&self, nodetree: NodeTreeRecord, nodes: Vec<NodeRecord>) {
        let mut guard = self.write();
        for node in nodes {
            guard.nodes.insert(node.uuid.clone(), node);
        }
        guard.nodetrees.insert(nodetree.uuid.clone(), nodetree);
    }

    pub fn nodetree(&self, uuid: &NodeTreeId) -> Option<NodeTreeRecord> {
        self.read().nodetrees.get(uuid).cloned()
    }

    pub fn nodetree_ids(&self) -> Vec<NodeTreeId> {
        self.read().nodetrees.keys().cloned().collect()
    }

    pub fn node(&self, uuid: &NodeId) -> Option<NodeRecord> {
        self.read().nodes.get(uuid).cloned()
    }

    pub fn node_by_name(&self, nodetree: &NodeTreeId, name: &str) -> Result<NodeRecord> {
        let guard = self.read();
        let record = guard.nodetrees.get(nodetree).ok_or_else(|| Error::UnknownNodeTree(nodetree.to_string()))?;
        let summary = record.nodes.get(name).ok_or_else(|| unknown_node(nodetree, name))?;
        guard.nodes.get(&summary.uuid).cloned().ok_or_else(|| unknown_node(nodetree, name))
    }

    /// Every node record of a nodetree, in name order.
    pub fn nodes_of(&self, nodetree: &NodeTreeId) -> Vec<NodeRecord> {
        let guard = self.read();
        let Some(record) = guard.nodetrees.get(nodetree) else {
            return Vec::new();
        };
        record.nodes.values().filter_map(|summary| guard.nodes.get(&summary.uuid).cloned()).collect()
    }

    /// Writes `key = value` onto the node record and mirrors state/action onto the nodetree summary.
    pub fn set_node_field(&self, nodetree: &NodeTreeId, name: &str, key: &str, value: &str) -> Result<()> {
        let mut guard = self.write();
        let inner = &mut *guard;

        let tree = inner.nodetrees.get_mut(nodetree).ok_or_else(|| Error::UnknownNodeTree(nodetree.to_string()))?;
        let summary = tree.nodes.get_mut(name).ok_or_else(|| unknown_node(nodetree, name))?;
        let node = inner.nodes.get_mut(&summary.uuid).ok_or_else(|| unknown_node(nodetree, name))?;

        node.set_field(key, value)?;
        summary.state = node.state;
        summary.action = node.action;
        Ok(())
    }

    pub fn set_node_hash(&self, node: &NodeId, hash: &str) -> Result<()> {
        let mut guard = self.write();
        let record = guard.nodes.get_mut(node).ok_or_else(|| Error::UnknownNode { nodetree: String::new(), node: node.to_string() })?;
        record.hash = Some(hash.to_string());
        Ok(())
    }

    /// Puts a node back to CREATED and forgets its hash and output values.
    pub fn reset_node(&self, nodetree: &NodeTreeId, name: &str) -> Result<()> {
        let mut guard = self.write();
        let inner = &mut *guard;

        let tree = inner.nodetrees.get_mut(nodetree).ok_or_else(|| Error::UnknownNodeTree(nodetree.to_string()))?;
        let summary = tree.nodes.get_mut(name).ok_or_else(|| unknown_node(nodetree, name))?;
        let node = inner.nodes.get_mut(&summary.uuid).ok_or_else(|| unknown_node(nodetree, name))?;

        node.state = NodeState::Created;
        node.action = NodeAction::None;
        node.hash = None;
        summary.state = node.state;
        summary.action = node.action;
        for output in &node.outputs {
            inner.data.remove(&output.uuid);
        }
        Ok(())
    }

    pub fn save_socket_data(&self, socket: &SocketId, data: SocketData) {
        self.write().data.insert(socket.clone(), data);
    }

    pub fn socket_data(&self, socket: &SocketId) -> Option<SocketData> {
        self.read().data.get(socket).cloned()
    }

    /// A FINISHED node, other than `exclude`, whose recorded hash equals `hash`.
    pub fn find_finished_by_hash(&self, hash: &str, exclude: &NodeId) -> Option<NodeRecord> {
        self.read()
            .nodes
            .values()
            .find(|n| &n.uuid != exclude && n.state == NodeState::Finished && n.hash.as_deref() == Some(hash))
            .cloned()
    }

    /// Appends one timestamped line to the node's log artifact.
    pub fn append_log(&self, node: &NodeId, line: &str) {
        let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        let mut guard = self.write();
        let log = guard.logs.entry(node.clone()).or_default();
        log.push_str(&format!("[{}] {}\n", stamp, line));
    }

    pub fn read_log(&self, node: &NodeId) -> String {
        self.read().logs.get(node).cloned().unwrap_or_default()
    }

    pub fn set_nodetree_state(&self, nodetree: &NodeTreeId, state: NodeTreeState) -> Result<()> {
        let mut guard = self.write();
        let record = guard.nodetrees.get_mut(nodetree).ok_or_else(|| Error::UnknownNodeTree(nodetree.to_string()))?;
        record.state = state;
        Ok(())
    }

    pub fn touch_worker(&self, name: &WorkerName) {
        let record = WorkerRecord { name: name.clone(), last_update: chrono::Utc::now().to_rfc3339() };
        self.write().workers.insert(name.clone(), record);
    }

    pub fn worker(&self, name: &WorkerName) -> Option<WorkerRecord> {
        self.read().workers.get(name).cloned()
    }

    pub fn save_snapshot(&self, path: impl AsRef<Path>) -> Result<()> {
        let guard = self.read();
        write_json_file(path, &*guard)
    }

    pub fn load_snapshot(path: impl AsRef<Path>) -> Result<Self> {
        let inner: StoreInner = parse_json_file(path)?;
        Ok(Store { inner: Arc::new(RwLock::new(inner)) })
    }
}

fn unknown_node(nodetree: &NodeTreeId, name: &str) -> Error {
    Error::UnknownNode { nodetree: nodetree.to_string(), node: name.to_string() }
}
