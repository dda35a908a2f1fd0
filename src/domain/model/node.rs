use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::domain::utils::id::{ComputerName, NodeId, NodeTreeId, SocketId};
use crate::error::{Error, Result};

/// Lifecycle stage of a node.
///
/// ```text
/// CREATED --(LAUNCH)--> RUNNING --(success)--> FINISHED
///                              \--(error)----> FAILED
/// RUNNING --(cancel before start)--> CANCELLED
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeState {
    Created,
    Running,
    Finished,
    Failed,
    Cancelled,
    Skipped,
}

impl NodeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeState::Created => "CREATED",
            NodeState::Running => "RUNNING",
            NodeState::Finished => "FINISHED",
            NodeState::Failed => "FAILED",
            NodeState::Cancelled => "CANCELLED",
            NodeState::Skipped => "SKIPPED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, NodeState::Finished | NodeState::Failed | NodeState::Cancelled | NodeState::Skipped)
    }

    /// States that let downstream nodes start.
    pub fn unblocks_children(&self) -> bool {
        matches!(self, NodeState::Finished | NodeState::Skipped)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "CREATED" => Ok(NodeState::Created),
            "RUNNING" => Ok(NodeState::Running),
            "FINISHED" => Ok(NodeState::Finished),
            "FAILED" => Ok(NodeState::Failed),
            "CANCELLED" => Ok(NodeState::Cancelled),
            "SKIPPED" => Ok(NodeState::Skipped),
            other => Err(Error::InvalidValue { field: "state".to_string(), value: other.to_string() }),
        }
    }
}

/// Externally requested intent for a node.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeAction {
    None,
    Launch,
    ExposeOutputs,
    Cancel,
    Reset,
    Skip,
}

impl NodeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeAction::None => "NONE",
            NodeAction::Launch => "LAUNCH",
            NodeAction::ExposeOutputs => "EXPOSE_OUTPUTS",
            NodeAction::Cancel => "CANCEL",
            NodeAction::Reset => "RESET",
            NodeAction::Skip => "SKIP",
        }
    }
}

impl fmt::Display for NodeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "NONE" => Ok(NodeAction::None),
            "LAUNCH" => Ok(NodeAction::Launch),
            "EXPOSE_OUTPUTS" => Ok(NodeAction::ExposeOutputs),
            "CANCEL" => Ok(NodeAction::Cancel),
            "RESET" => Ok(NodeAction::Reset),
            "SKIP" => Ok(NodeAction::Skip),
            other => Err(Error::InvalidValue { field: "action".to_string(), value: other.to_string() }),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeType {
    #[default]
    Normal,
    /// Wraps a sub-nodetree; outputs are attached by `EXPOSE_OUTPUTS`.
    Group,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorKind {
    #[default]
    Function,
    Runnable,
    /// Handles its own remote dispatch, so it always runs in-process.
    RemoteAware,
}

/// Reference to an executor in the `ExecutorRegistry`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExecutorRef {
    pub key: String,
    #[serde(default)]
    pub kind: ExecutorKind,
    #[serde(default)]
    pub version: Option<String>,
}

impl ExecutorRef {
    pub fn function(key: impl Into<String>) -> Self {
        ExecutorRef { key: key.into(), kind: ExecutorKind::Function, version: None }
    }
}

/// Directed edge `(from_node, from_socket) -> (to_node, to_socket)` inside one nodetree.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct Link {
    pub from_node: String,
    pub from_socket: String,
    pub to_node: String,
    pub to_socket: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct InputSocket {
    pub name: String,
    #[serde(default)]
    pub links: Vec<Link>,
    /// Value used when the socket has no incoming link.
    #[serde(default)]
    pub value: Option<Value>,
    /// Transient inputs are passed to the executor but never take part in the cache hash.
    #[serde(default)]
    pub transient: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct OutputSocket {
    pub uuid: SocketId,
    pub name: String,
    #[serde(default)]
    pub links: Vec<Link>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct SchedulerSpec {
    /// Remote computer to run on; local execution when absent.
    #[serde(default)]
    pub computer: Option<ComputerName>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GroupOutput {
    pub node: String,
    pub socket: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NodeMetadata {
    pub nodetree_uuid: NodeTreeId,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub kwargs: Vec<String>,
    #[serde(default)]
    pub node_type: NodeType,
    #[serde(default)]
    pub use_cache: bool,
    #[serde(default)]
    pub sub_nodetree: Option<NodeTreeId>,
    #[serde(default)]
    pub group_outputs: Vec<GroupOutput>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NodeRecord {
    pub uuid: NodeId,
    pub name: String,
    pub state: NodeState,
    pub action: NodeAction,
    pub executor: Option<ExecutorRef>,
    pub inputs: Vec<InputSocket>,
    pub outputs: Vec<OutputSocket>,
    #[serde(default)]
    pub scheduler: SchedulerSpec,
    pub metadata: NodeMetadata,
    #[serde(default)]
    pub hash: Option<String>,
    /// Keys written by node messages that have no dedicated field.
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl NodeRecord {
    pub fn is_group(&self) -> bool {
        self.metadata.node_type == NodeType::Group
    }

    pub fn nodetree(&self) -> &NodeTreeId {
        &self.metadata.nodetree_uuid
    }

    pub fn output_by_name(&self, name: &str) -> Option<&OutputSocket> {
        self.outputs.iter().find(|o| o.name == name)
    }

    pub fn input_by_name(&self, name: &str) -> Option<&InputSocket> {
        self.inputs.iter().find(|i| i.name == name)
    }

    /// Applies `key = value` as a full assignment, so applying the same pair twice is a no-op.
    pub fn set_field(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "state" => self.state = value.parse()?,
            "action" => self.action = value.parse()?,
            "hash" => self.hash = Some(value.to_string()),
            other => {
                self.extra.insert(other.to_string(), value.to_string());
            }
        }
        Ok(())
    }
}
