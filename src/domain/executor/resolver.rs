use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::domain::executor::registry::CallArgs;
use crate::domain::model::node::{NodeRecord, NodeState};
use crate::domain::store::socket_data::{SocketData, canonical_hash};
use crate::domain::store::store::Store;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedInput {
    pub value: Value,
    pub hash: String,
    pub transient: bool,
}

/// Input values of a node in socket order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedInputs {
    pub entries: Vec<(String, ResolvedInput)>,
}

impl ResolvedInputs {
    pub fn get(&self, name: &str) -> Option<&ResolvedInput> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, input)| input)
    }
}

/// Input hashes laid out the way the executor is called.
///
/// Positional arguments keep their position; a transient one leaves `None` in its slot so the
/// remaining positions do not shift.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HashableCall {
    pub args: Vec<Option<String>>,
    pub kwargs: BTreeMap<String, String>,
}

/// Result of mapping inputs onto the executor's calling convention.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitCall {
    pub call: CallArgs,
    pub hashable: HashableCall,
}

/// Follows every input link to the upstream output value.
///
/// Unlinked inputs take their declared default (`null` when absent). Links from SKIPPED nodes are
/// ignored. Any other upstream node must be FINISHED with a stored value.
pub fn resolve_inputs(store: &Store, node: &NodeRecord) -> Result<ResolvedInputs> {
    let mut entries = Vec::with_capacity(node.inputs.len());

    for input in &node.inputs {
        let mut upstream: Vec<SocketData> = Vec::with_capacity(input.links.len());

        for link in &input.links {
            let not_ready = |reason: String| Error::InputNotReadyError { node: node.name.clone(), socket: input.name.clone(), reason };

            let source = store.node_by_name(node.nodetree(), &link.from_node)?;
            match source.state {
                NodeState::Finished => {}
                NodeState::Skipped => continue,
                other => return Err(not_ready(format!("upstream node '{}' is {}", source.name, other))),
            }

            let socket = source
                .output_by_name(&link.from_socket)
                .ok_or_else(|| not_ready(format!("upstream node '{}' has no output '{}'", source.name, link.from_socket)))?;
            let data = store
                .socket_data(&socket.uuid)
                .ok_or_else(|| not_ready(format!("no value stored for {}.{}", source.name, link.from_socket)))?;
            upstream.push(data);
        }

        let resolved = match upstream.len() {
            0 => {
                let value = input.value.clone().unwrap_or(Value::Null);
                let hash = canonical_hash(&value);
                ResolvedInput { value, hash, transient: input.transient }
            }
            1 => {
                let data = upstream.remove(0);
                ResolvedInput { value: data.value, hash: data.hash, transient: input.transient }
            }
            _ => {
                let value = merge_values(upstream.into_iter().map(|d| d.value));
                let hash = canonical_hash(&value);
                ResolvedInput { value, hash, transient: input.transient }
            }
        };
        entries.push((input.name.clone(), resolved));
    }

    Ok(ResolvedInputs { entries })
}

/// Arrays are concatenated, objects merged (later keys win), anything else is appended to a list.
fn merge_values(values: impl Iterator<Item = Value>) -> Value {
    let mut merged: Option<Value> = None;
    for value in values {
        merged = Some(match (merged, value) {
            (None, v) => v,
            (Some(Value::Array(mut acc)), Value::Array(items)) => {
                acc.extend(items);
                Value::Array(acc)
            }
            (Some(Value::Array(mut acc)), v) => {
                acc.push(v);
                Value::Array(acc)
            }
            (Some(Value::Object(mut acc)), Value::Object(items)) => {
                acc.extend(items);
                Value::Object(acc)
            }
            (Some(first), v) => Value::Array(vec![first, v]),
        });
    }
    merged.unwrap_or(Value::Null)
}

pub fn split_args_kwargs(inputs: &ResolvedInputs, args: &[String], kwargs: &[String]) -> Result<SplitCall> {
    let mut call = CallArgs { args: Vec::with_capacity(args.len()), kwargs: Map::new() };
    let mut hashable = HashableCall::default();

    for name in args {
        let input = inputs.get(name).ok_or_else(|| Error::UnknownSocket(name.clone()))?;
        call.args.push(input.value.clone());
        hashable.args.push((!input.transient).then(|| input.hash.clone()));
    }

    for name in kwargs {
        let input = inputs.get(name).ok_or_else(|| Error::UnknownSocket(name.clone()))?;
        call.kwargs.insert(name.clone(), input.value.clone());
        if !input.transient {
            hashable.kwargs.insert(name.clone(), input.hash.clone());
        }
    }

    Ok(SplitCall { call, hashable })
}
