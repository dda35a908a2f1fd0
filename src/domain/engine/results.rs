use serde_json::Value;

use crate::domain::model::node::NodeRecord;
use crate::domain::store::socket_data::SocketData;
use crate::domain::store::store::Store;
use crate::error::{Error, Result};

/// Stores an executor result on the node's output sockets.
///
/// No outputs: nothing is stored. One output: the whole value. Several outputs: an array with one
/// entry per output, or an object with one key per output name. Everything is checked before the
/// first write.
pub fn save_node_results(store: &Store, node: &NodeRecord, result: Value) -> Result<()> {
    let values: Vec<Value> = match node.outputs.len() {
        0 => return Ok(()),
        1 => vec![result],
        expected => match result {
            Value::Array(items) if items.len() == expected => items,
            Value::Object(mut map) => {
                let mut values = Vec::with_capacity(expected);
                for output in &node.outputs {
                    let value = map.remove(&output.name).ok_or_else(|| Error::OutputMismatch {
                        node: node.name.clone(),
                        expected,
                        got: format!("an object without key '{}'", output.name),
                    })?;
                    values.push(value);
                }
                values
            }
            other => return Err(Error::OutputMismatch { node: node.name.clone(), expected, got: describe(&other) }),
        },
    };

    for (output, value) in node.outputs.iter().zip(values) {
        store.save_socket_data(&output.uuid, SocketData::new(value));
    }
    Ok(())
}

fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(_) => "a boolean".to_string(),
        Value::Number(_) => "a number".to_string(),
        Value::String(_) => "a string".to_string(),
        Value::Array(items) => format!("an array of {} values", items.len()),
        Value::Object(_) => "an object".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::node::{NodeAction, NodeMetadata, NodeState, NodeType, OutputSocket, SchedulerSpec};
    use crate::domain::utils::id::{NodeId, NodeTreeId, SocketId};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn node_with_outputs(names: &[&str]) -> NodeRecord {
        NodeRecord {
            uuid: NodeId::new("n"),
            name: "n".to_string(),
            state: NodeState::Running,
            action: NodeAction::Launch,
            executor: None,
            inputs: vec![],
            outputs: names.iter().map(|n| OutputSocket { uuid: SocketId::new(format!("s-{}", n)), name: n.to_string(), links: vec![] }).collect(),
            scheduler: SchedulerSpec::default(),
            metadata: NodeMetadata {
                nodetree_uuid: NodeTreeId::new("nt"),
                args: vec![],
                kwargs: vec![],
                node_type: NodeType::Normal,
                use_cache: false,
                sub_nodetree: None,
                group_outputs: vec![],
            },
            hash: None,
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn single_output_takes_the_whole_value() {
        let store = Store::new();
        let node = node_with_outputs(&["result"]);
        save_node_results(&store, &node, json!([1, 2])).unwrap();
        assert_eq!(store.socket_data(&SocketId::new("s-result")).unwrap().value, json!([1, 2]));
    }

    #[test]
    fn several_outputs_by_index_or_name() {
        let store = Store::new();
        let node = node_with_outputs(&["sum", "diff"]);

        save_node_results(&store, &node, json!([5, -1])).unwrap();
        assert_eq!(store.socket_data(&SocketId::new("s-diff")).unwrap().value, json!(-1));

        save_node_results(&store, &node, json!({"diff": 2, "sum": 8})).unwrap();
        assert_eq!(store.socket_data(&SocketId::new("s-sum")).unwrap().value, json!(8));
    }

    #[test]
    fn wrong_shape_is_a_mismatch() {
        let store = Store::new();
        let node = node_with_outputs(&["a", "b"]);
        assert!(matches!(save_node_results(&store, &node, json!(3)), Err(Error::OutputMismatch { expected: 2, .. })));
        assert!(matches!(save_node_results(&store, &node, json!([1, 2, 3])), Err(Error::OutputMismatch { .. })));
        assert!(matches!(save_node_results(&store, &node, json!({"a": 1})), Err(Error::OutputMismatch { .. })));
        assert!(store.socket_data(&SocketId::new("s-a")).is_none());
    }
}
