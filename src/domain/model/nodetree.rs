use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::str::FromStr;

use crate::domain::model::node::{Link, NodeAction, NodeState, NodeType};
use crate::domain::utils::id::{NodeId, NodeTreeId};
use crate::error::{Error, Result};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeTreeState {
    Created,
    Running,
    Finished,
    Failed,
    Cancelled,
}

impl NodeTreeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeTreeState::Created => "CREATED",
            NodeTreeState::Running => "RUNNING",
            NodeTreeState::Finished => "FINISHED",
            NodeTreeState::Failed => "FAILED",
            NodeTreeState::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, NodeTreeState::Finished | NodeTreeState::Failed | NodeTreeState::Cancelled)
    }
}

impl fmt::Display for NodeTreeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeTreeState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "CREATED" => Ok(NodeTreeState::Created),
            "RUNNING" => Ok(NodeTreeState::Running),
            "FINISHED" => Ok(NodeTreeState::Finished),
            "FAILED" => Ok(NodeTreeState::Failed),
            "CANCELLED" => Ok(NodeTreeState::Cancelled),
            other => Err(Error::InvalidValue { field: "nodetree state".to_string(), value: other.to_string() }),
        }
    }
}

/// Per-node view kept on the nodetree record.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NodeSummary {
    pub uuid: NodeId,
    pub state: NodeState,
    pub action: NodeAction,
    #[serde(default)]
    pub node_type: NodeType,
}

/// Group node in another nodetree that owns this (sub-)nodetree.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ParentLink {
    pub nodetree: NodeTreeId,
    pub node: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NodeTreeRecord {
    pub uuid: NodeTreeId,
    pub name: String,
    pub state: NodeTreeState,
    pub nodes: BTreeMap<String, NodeSummary>,
    #[serde(default)]
    pub links: Vec<Link>,
    #[serde(default)]
    pub parent: Option<ParentLink>,
}

impl NodeTreeRecord {
    pub fn parents_of(&self, name: &str) -> BTreeSet<String> {
        self.links.iter().filter(|l| l.to_node == name).map(|l| l.from_node.clone()).collect()
    }

    pub fn children_of(&self, name: &str) -> BTreeSet<String> {
        self.links.iter().filter(|l| l.from_node == name).map(|l| l.to_node.clone()).collect()
    }

    /// All nodes reachable from `name`, excluding `name` itself.
    pub fn descendants_of(&self, name: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<String> = self.children_of(name).into_iter().collect();

        while let Some(next) = queue.pop_front() {
            if next == name || !seen.insert(next.clone()) {
                continue;
            }
            queue.extend(self.children_of(&next));
        }

        seen
    }

    /// A node is ready when it was never started and every parent finished or was skipped.
    pub fn is_ready(&self, name: &str) -> bool {
        let Some(summary) = self.nodes.get(name) else {
            return false;
        };
        if summary.state != NodeState::Created {
            return false;
        }
        self.parents_of(name).iter().all(|p| self.nodes.get(p).is_some_and(|s| s.state.unblocks_children()))
    }

    pub fn ready_nodes(&self) -> Vec<String> {
        self.nodes.keys().filter(|name| self.is_ready(name)).cloned().collect()
    }

    /// Derives the nodetree state from its nodes.
    ///
    /// Nodes downstream of a FAILED or CANCELLED node can never start, so they do not keep
    /// the nodetree RUNNING.
    pub fn analyze_state(&self) -> NodeTreeState {
        if self.nodes.values().all(|n| n.state.unblocks_children()) {
            return NodeTreeState::Finished;
        }

        let mut blocked = BTreeSet::new();
        for (name, summary) in &self.nodes {
            if matches!(summary.state, NodeState::Failed | NodeState::Cancelled) {
                blocked.extend(self.descendants_of(name));
            }
        }

        let active = self.nodes.iter().any(|(name, summary)| match summary.state {
            NodeState::Running => true,
            NodeState::Created => !blocked.contains(name),
            _ => false,
        });
        if active {
            return NodeTreeState::Running;
        }

        if self.nodes.values().any(|n| n.state == NodeState::Failed) {
            NodeTreeState::Failed
        } else if self.nodes.values().any(|n| n.state == NodeState::Cancelled) {
            NodeTreeState::Cancelled
        } else {
            NodeTreeState::Running
        }
    }

    /// Counts per node state, in display order.
    pub fn state_counts(&self) -> Vec<(NodeState, usize)> {
        [NodeState::Created, NodeState::Running, NodeState::Finished, NodeState::Failed, NodeState::Cancelled, NodeState::Skipped]
            .into_iter()
            .map(|state| (state, self.nodes.values().filter(|n| n.state == state).count()))
            .collect()
    }
}
