use std::fmt;

use crate::domain::model::node::{NodeAction, NodeState};
use crate::domain::model::nodetree::NodeTreeState;
use crate::domain::utils::id::{NodeTreeId, WorkerName};
use crate::error::{Error, Result};

/// Body of a `node` message: `<node_name>:<key>:<value>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeMessageBody {
    pub node: String,
    pub key: String,
    pub value: String,
}

/// Body of a `nodetree` or `worker` message: `<key>:<value>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValueBody {
    pub key: String,
    pub value: String,
}

/// A queue message, `<target>,<category>,<body>` on the wire.
///
/// The wire format has no escaping. Parsing splits a bounded number of times, so only the last
/// field (the value) may contain `,` or `:`; the constructors refuse names and keys that would
/// make the encoding ambiguous.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Node { nodetree: NodeTreeId, body: NodeMessageBody },
    NodeTree { nodetree: NodeTreeId, body: KeyValueBody },
    Worker { worker: WorkerName, body: KeyValueBody },
}

impl Message {
    pub fn parse(raw: &str) -> Result<Self> {
        let mut parts = raw.splitn(3, ',');
        let (Some(target), Some(category), Some(body)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(malformed(raw, "expected '<uuid>,<category>,<body>'"));
        };
        if target.is_empty() {
            return Err(malformed(raw, "empty target"));
        }

        match category {
            "node" => {
                let mut fields = body.splitn(3, ':');
                let (Some(node), Some(key), Some(value)) = (fields.next(), fields.next(), fields.next()) else {
                    return Err(malformed(raw, "node body must be '<node_name>:<key>:<value>'"));
                };
                if node.is_empty() || key.is_empty() {
                    return Err(malformed(raw, "empty node name or key"));
                }
                Ok(Message::Node {
                    nodetree: NodeTreeId::new(target),
                    body: NodeMessageBody { node: node.to_string(), key: key.to_string(), value: value.to_string() },
                })
            }
            "nodetree" => Ok(Message::NodeTree { nodetree: NodeTreeId::new(target), body: parse_key_value(raw, body)? }),
            "worker" => Ok(Message::Worker { worker: WorkerName::new(target), body: parse_key_value(raw, body)? }),
            other => Err(malformed(raw, &format!("unknown category '{}'", other))),
        }
    }

    pub fn node_field(nodetree: &NodeTreeId, node: &str, key: &str, value: &str) -> Result<Self> {
        check_token("nodetree", nodetree.as_str(), &[','])?;
        check_token("node name", node, &[',', ':'])?;
        check_token("key", key, &[',', ':'])?;
        Ok(Message::Node {
            nodetree: nodetree.clone(),
            body: NodeMessageBody { node: node.to_string(), key: key.to_string(), value: value.to_string() },
        })
    }

    pub fn node_state(nodetree: &NodeTreeId, node: &str, state: NodeState) -> Result<Self> {
        Self::node_field(nodetree, node, "state", state.as_str())
    }

    pub fn node_action(nodetree: &NodeTreeId, node: &str, action: NodeAction) -> Result<Self> {
        Self::node_field(nodetree, node, "action", action.as_str())
    }

    pub fn nodetree_action(nodetree: &NodeTreeId, action: &str) -> Result<Self> {
        check_token("nodetree", nodetree.as_str(), &[','])?;
        Ok(Message::NodeTree { nodetree: nodetree.clone(), body: KeyValueBody { key: "action".to_string(), value: action.to_string() } })
    }

    pub fn nodetree_state(nodetree: &NodeTreeId, state: NodeTreeState) -> Result<Self> {
        check_token("nodetree", nodetree.as_str(), &[','])?;
        Ok(Message::NodeTree { nodetree: nodetree.clone(), body: KeyValueBody { key: "state".to_string(), value: state.as_str().to_string() } })
    }

    pub fn worker_action(worker: &WorkerName, action: &str) -> Result<Self> {
        check_token("worker", worker.as_str(), &[','])?;
        Ok(Message::Worker { worker: worker.clone(), body: KeyValueBody { key: "action".to_string(), value: action.to_string() } })
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Node { nodetree, body } => write!(f, "{},node,{}:{}:{}", nodetree, body.node, body.key, body.value),
            Message::NodeTree { nodetree, body } => write!(f, "{},nodetree,{}:{}", nodetree, body.key, body.value),
            Message::Worker { worker, body } => write!(f, "{},worker,{}:{}", worker, body.key, body.value),
        }
    }
}

/// Best-effort recovery of the node a malformed `node` message was aimed at.
pub fn implicated_node(raw: &str) -> Option<(NodeTreeId, String)> {
    let mut parts = raw.splitn(3, ',');
    let (target, category, body) = (parts.next()?, parts.next()?, parts.next()?);
    if category != "node" || target.is_empty() {
        return None;
    }
    let (node, _) = body.split_once(':')?;
    if node.is_empty() {
        return None;
    }
    Some((NodeTreeId::new(target), node.to_string()))
}

fn parse_key_value(raw: &str, body: &str) -> Result<KeyValueBody> {
    match body.split_once(':') {
        Some((key, value)) if !key.is_empty() => Ok(KeyValueBody { key: key.to_string(), value: value.to_string() }),
        _ => Err(malformed(raw, "body must be '<key>:<value>'")),
    }
}

fn check_token(field: &str, token: &str, forbidden: &[char]) -> Result<()> {
    if token.is_empty() || token.contains(forbidden) {
        return Err(Error::InvalidValue { field: field.to_string(), value: token.to_string() });
    }
    Ok(())
}

fn malformed(raw: &str, reason: &str) -> Error {
    Error::MalformedMessage { message: raw.to_string(), reason: reason.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_node_message() {
        let msg = Message::parse("nt1,node,foo:state:RUNNING").unwrap();
        let Message::Node { nodetree, body } = &msg else { panic!("expected node message") };
        assert_eq!(nodetree.as_str(), "nt1");
        assert_eq!(body.node, "foo");
        assert_eq!(body.key, "state");
        assert_eq!(body.value, "RUNNING");
        assert_eq!(msg.to_string(), "nt1,node,foo:state:RUNNING");
    }

    #[test]
    fn value_may_contain_separators() {
        let msg = Message::parse("nt1,node,foo:path:/tmp/a,b:c").unwrap();
        let Message::Node { body, .. } = msg else { panic!("expected node message") };
        assert_eq!(body.value, "/tmp/a,b:c");
    }

    #[test]
    fn rejects_malformed_input() {
        for raw in ["nt1,node,badformat", "nt1,node", "justtext", ",node,a:b:c", "nt1,gossip,a:b", "nt1,worker,nokey"] {
            assert!(matches!(Message::parse(raw), Err(Error::MalformedMessage { .. })), "{raw}");
        }
    }

    #[test]
    fn constructors_refuse_separator_in_names() {
        let nt = NodeTreeId::new("nt1");
        assert!(Message::node_field(&nt, "a:b", "state", "RUNNING").is_err());
        assert!(Message::node_field(&nt, "a", "st,ate", "RUNNING").is_err());
        assert!(Message::node_field(&nt, "a", "note", "x:y,z").is_ok());
    }

    #[test]
    fn worker_and_nodetree_messages() {
        let stop = Message::worker_action(&WorkerName::new("w1"), "STOP").unwrap();
        assert_eq!(stop.to_string(), "w1,worker,action:STOP");
        assert_eq!(Message::parse(&stop.to_string()).unwrap(), stop);

        let launch = Message::nodetree_action(&NodeTreeId::new("nt1"), "LAUNCH").unwrap();
        assert_eq!(launch.to_string(), "nt1,nodetree,action:LAUNCH");
    }

    #[test]
    fn implicated_node_needs_a_colon() {
        assert_eq!(implicated_node("nt1,node,foo:state:BOGUS"), Some((NodeTreeId::new("nt1"), "foo".to_string())));
        assert_eq!(implicated_node("nt1,node,badformat"), None);
        assert_eq!(implicated_node("nt1,worker,action:STOP"), None);
    }
}
