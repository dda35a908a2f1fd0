use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::model::node::ExecutorKind;

/// Submission format of a workflow.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct NodeTreeDto {
    pub name: String,
    pub nodes: Vec<NodeDto>,
    #[serde(default)]
    pub links: Vec<LinkDto>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct NodeDto {
    pub name: String,

    #[serde(default)]
    pub executor: Option<ExecutorDto>,

    #[serde(default)]
    pub inputs: Vec<InputDto>,
    #[serde(default)]
    pub outputs: Vec<String>,

    /// Input sockets passed positionally, in order.
    #[serde(default)]
    pub args: Vec<String>,
    /// Input sockets passed by name.
    #[serde(default)]
    pub kwargs: Vec<String>,

    #[serde(default)]
    pub computer: Option<String>,
    #[serde(default)]
    pub use_cache: bool,

    /// Present for group nodes.
    #[serde(default)]
    pub sub_nodetree: Option<Box<NodeTreeDto>>,
    #[serde(default)]
    pub group_outputs: Vec<GroupOutputDto>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ExecutorDto {
    pub key: String,
    #[serde(default)]
    pub kind: ExecutorKind,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct InputDto {
    pub name: String,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub transient: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LinkDto {
    pub from_node: String,
    pub from_socket: String,
    pub to_node: String,
    pub to_socket: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GroupOutputDto {
    pub node: String,
    pub socket: String,
}
