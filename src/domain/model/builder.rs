use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use crate::api::nodetree_dto::{NodeDto, NodeTreeDto};
use crate::domain::executor::registry::ExecutorRegistry;
use crate::domain::model::node::{
    ExecutorRef, GroupOutput, InputSocket, Link, NodeAction, NodeMetadata, NodeRecord, NodeState, NodeType, OutputSocket, SchedulerSpec,
};
use crate::domain::model::nodetree::{NodeSummary, NodeTreeRecord, NodeTreeState, ParentLink};
use crate::domain::store::store::Store;
use crate::domain::utils::id::{ComputerName, NodeId, NodeTreeId, SocketId};
use crate::error::{Error, Result};

/// Records produced from one submitted nodetree. The root nodetree comes first, followed by the
/// sub-nodetrees of its group nodes.
#[derive(Debug, Clone)]
pub struct BuiltNodeTree {
    pub nodetrees: Vec<(NodeTreeRecord, Vec<NodeRecord>)>,
}

impl BuiltNodeTree {
    pub fn root(&self) -> Option<&NodeTreeRecord> {
        self.nodetrees.first().map(|(nt, _)| nt)
    }
}

/// Converts a submission into store records with fresh uuids.
pub fn build_nodetree(dto: &NodeTreeDto, parent: Option<ParentLink>) -> Result<BuiltNodeTree> {
    check_structure(dto)?;

    let uuid = NodeTreeId::generate();
    let mut built = BuiltNodeTree { nodetrees: Vec::new() };
    let mut children = Vec::new();

    let mut summaries = BTreeMap::new();
    let mut records = Vec::with_capacity(dto.nodes.len());
    let links: Vec<Link> = dto
        .links
        .iter()
        .map(|l| Link { from_node: l.from_node.clone(), from_socket: l.from_socket.clone(), to_node: l.to_node.clone(), to_socket: l.to_socket.clone() })
        .collect();

    for node_dto in &dto.nodes {
        let mut record = build_node(node_dto, &uuid, &links);

        if let Some(sub) = &node_dto.sub_nodetree {
            let sub_built = build_nodetree(sub, Some(ParentLink { nodetree: uuid.clone(), node: node_dto.name.clone() }))?;
            if let Some(sub_root) = sub_built.root() {
                record.metadata.sub_nodetree = Some(sub_root.uuid.clone());
            }
            children.extend(sub_built.nodetrees);
        }

        summaries.insert(
            record.name.clone(),
            NodeSummary { uuid: record.uuid.clone(), state: record.state, action: record.action, node_type: record.metadata.node_type },
        );
        records.push(record);
    }

    let nodetree = NodeTreeRecord { uuid, name: dto.name.clone(), state: NodeTreeState::Created, nodes: summaries, links, parent };
    built.nodetrees.push((nodetree, records));
    built.nodetrees.extend(children);

    Ok(built)
}

fn build_node(dto: &NodeDto, nodetree: &NodeTreeId, links: &[Link]) -> NodeRecord {
    let inputs = dto
        .inputs
        .iter()
        .map(|input| InputSocket {
            name: input.name.clone(),
            links: links.iter().filter(|l| l.to_node == dto.name && l.to_socket == input.name).cloned().collect(),
            value: input.value.clone(),
            transient: input.transient,
        })
        .collect();

    let outputs = dto
        .outputs
        .iter()
        .map(|name| OutputSocket {
            uuid: SocketId::generate(),
            name: name.clone(),
            links: links.iter().filter(|l| l.from_node == dto.name && &l.from_socket == name).cloned().collect(),
        })
        .collect();

    let node_type = if dto.sub_nodetree.is_some() { NodeType::Group } else { NodeType::Normal };

    NodeRecord {
        uuid: NodeId::generate(),
        name: dto.name.clone(),
        state: NodeState::Created,
        action: NodeAction::None,
        executor: dto.executor.as_ref().map(|e| ExecutorRef { key: e.key.clone(), kind: e.kind, version: e.version.clone() }),
        inputs,
        outputs,
        scheduler: SchedulerSpec { computer: dto.computer.as_deref().map(ComputerName::new) },
        metadata: NodeMetadata {
            nodetree_uuid: nodetree.clone(),
            args: dto.args.clone(),
            kwargs: dto.kwargs.clone(),
            node_type,
            use_cache: dto.use_cache,
            sub_nodetree: None,
            group_outputs: dto.group_outputs.iter().map(|g| GroupOutput { node: g.node.clone(), socket: g.socket.clone() }).collect(),
        },
        hash: None,
        extra: BTreeMap::new(),
    }
}

/// Builds the nodetree and stores every record. Returns the uuid of the root nodetree.
pub fn submit(store: &Store, dto: &NodeTreeDto) -> Result<NodeTreeId> {
    let built = build_nodetree(dto, None)?;
    let root = built.root().map(|nt| nt.uuid.clone()).ok_or_else(|| invalid(dto, "nothing was built"))?;

    for (nodetree, nodes) in built.nodetrees {
        log::info!("[Builder] Storing nodetree '{}' ({}) with {} nodes", nodetree.name, nodetree.uuid, nodes.len());
        store.insert_nodetree(nodetree, nodes);
    }

    Ok(root)
}

/// Structural checks plus executor lookups, recursing into group nodes.
pub fn validate(dto: &NodeTreeDto, registry: &ExecutorRegistry) -> Result<()> {
    check_structure(dto)?;

    for node in &dto.nodes {
        match (&node.executor, &node.sub_nodetree) {
            (_, Some(sub)) => validate(sub, registry)?,
            (Some(executor), None) => {
                if !registry.contains(&executor.key) {
                    return Err(Error::UnknownExecutorError(executor.key.clone()));
                }
            }
            (None, None) => return Err(invalid(dto, &format!("node '{}' has neither an executor nor a sub-nodetree", node.name))),
        }
    }

    Ok(())
}

fn check_structure(dto: &NodeTreeDto) -> Result<()> {
    let mut by_name: HashMap<&str, &NodeDto> = HashMap::new();
    for node in &dto.nodes {
        if node.name.is_empty() || node.name.contains([':', ',']) {
            return Err(invalid(dto, &format!("node name '{}' must be non-empty and free of ':' and ','", node.name)));
        }
        if by_name.insert(node.name.as_str(), node).is_some() {
            return Err(invalid(dto, &format!("duplicate node name '{}'", node.name)));
        }
    }

    for node in &dto.nodes {
        for arg in node.args.iter().chain(node.kwargs.iter()) {
            if !node.inputs.iter().any(|i| &i.name == arg) {
                return Err(invalid(dto, &format!("node '{}' passes '{}' which is not one of its inputs", node.name, arg)));
            }
        }

        if let Some(sub) = &node.sub_nodetree {
            if node.group_outputs.len() != node.outputs.len() {
                return Err(invalid(dto, &format!("group node '{}' maps {} of {} outputs", node.name, node.group_outputs.len(), node.outputs.len())));
            }
            for mapped in &node.group_outputs {
                let known = sub.nodes.iter().any(|n| n.name == mapped.node && n.outputs.contains(&mapped.socket));
                if !known {
                    return Err(invalid(dto, &format!("group node '{}' exposes unknown output {}.{}", node.name, mapped.node, mapped.socket)));
                }
            }
        }
    }

    for link in &dto.links {
        let from = by_name.get(link.from_node.as_str()).filter(|n| n.outputs.contains(&link.from_socket));
        let to = by_name.get(link.to_node.as_str()).filter(|n| n.inputs.iter().any(|i| i.name == link.to_socket));
        if from.is_none() || to.is_none() {
            return Err(invalid(
                dto,
                &format!("dangling link {}.{} -> {}.{}", link.from_node, link.from_socket, link.to_node, link.to_socket),
            ));
        }
    }

    check_acyclic(dto)
}

/// Kahn's algorithm; any node left with incoming edges sits on a cycle.
fn check_acyclic(dto: &NodeTreeDto) -> Result<()> {
    let mut in_degree: BTreeMap<&str, usize> = dto.nodes.iter().map(|n| (n.name.as_str(), 0)).collect();
    let mut edges: BTreeSet<(&str, &str)> = BTreeSet::new();
    for link in &dto.links {
        if edges.insert((link.from_node.as_str(), link.to_node.as_str())) {
            *in_degree.entry(link.to_node.as_str()).or_insert(0) += 1;
        }
    }

    let mut queue: VecDeque<&str> = in_degree.iter().filter(|(_, d)| **d == 0).map(|(n, _)| *n).collect();
    let mut visited = 0;

    while let Some(node) = queue.pop_front() {
        visited += 1;
        for (_, to) in edges.iter().filter(|(from, _)| *from == node) {
            if let Some(degree) = in_degree.get_mut(to) {
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(to);
                }
            }
        }
    }

    if visited != in_degree.len() {
        let on_cycle: Vec<&str> = in_degree.iter().filter(|(_, d)| **d > 0).map(|(n, _)| *n).collect();
        return Err(invalid(dto, &format!("links form a cycle through {:?}", on_cycle)));
    }
    Ok(())
}

fn invalid(dto: &NodeTreeDto, reason: &str) -> Error {
    Error::InvalidNodeTree { nodetree: dto.name.clone(), reason: reason.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::nodetree_dto::{ExecutorDto, GroupOutputDto, InputDto, LinkDto};
    use crate::domain::executor::builtin::builtin_registry;
    use crate::domain::model::node::ExecutorKind;
    use serde_json::json;

    fn add_node(name: &str) -> NodeDto {
        NodeDto {
            name: name.to_string(),
            executor: Some(ExecutorDto { key: "math.add".to_string(), kind: ExecutorKind::Function, version: None }),
            inputs: vec![
                InputDto { name: "x".to_string(), value: Some(json!(1)), transient: false },
                InputDto { name: "y".to_string(), value: Some(json!(2)), transient: false },
            ],
            outputs: vec!["result".to_string()],
            args: vec!["x".to_string(), "y".to_string()],
            kwargs: vec![],
            computer: None,
            use_cache: false,
            sub_nodetree: None,
            group_outputs: vec![],
        }
    }

    fn link(from: &str, to: &str) -> LinkDto {
        LinkDto { from_node: from.to_string(), from_socket: "result".to_string(), to_node: to.to_string(), to_socket: "x".to_string() }
    }

    #[test]
    fn links_are_attached_to_both_ends() {
        let dto = NodeTreeDto { name: "chain".to_string(), nodes: vec![add_node("a"), add_node("b")], links: vec![link("a", "b")] };
        let built = build_nodetree(&dto, None).unwrap();
        assert_eq!(built.nodetrees.len(), 1);

        let (nodetree, nodes) = &built.nodetrees[0];
        assert_eq!(nodetree.nodes.len(), 2);
        let a = nodes.iter().find(|n| n.name == "a").unwrap();
        let b = nodes.iter().find(|n| n.name == "b").unwrap();
        assert_eq!(a.outputs[0].links.len(), 1);
        assert_eq!(b.input_by_name("x").unwrap().links.len(), 1);
        assert!(b.input_by_name("y").unwrap().links.is_empty());
        assert_eq!(b.nodetree(), &nodetree.uuid);
    }

    #[test]
    fn group_nodes_build_their_sub_nodetree() {
        let sub = NodeTreeDto { name: "inner".to_string(), nodes: vec![add_node("inner_add")], links: vec![] };
        let mut group = add_node("group");
        group.executor = None;
        group.args.clear();
        group.sub_nodetree = Some(Box::new(sub));
        group.group_outputs = vec![GroupOutputDto { node: "inner_add".to_string(), socket: "result".to_string() }];

        let dto = NodeTreeDto { name: "outer".to_string(), nodes: vec![group], links: vec![] };
        let built = build_nodetree(&dto, None).unwrap();
        assert_eq!(built.nodetrees.len(), 2);

        let (outer, outer_nodes) = &built.nodetrees[0];
        let (inner, _) = &built.nodetrees[1];
        assert!(outer_nodes[0].is_group());
        assert_eq!(outer_nodes[0].metadata.sub_nodetree.as_ref(), Some(&inner.uuid));
        assert_eq!(inner.parent.as_ref().map(|p| &p.nodetree), Some(&outer.uuid));
    }

    #[test]
    fn rejects_cycles_and_dangling_links() {
        let cyclic = NodeTreeDto { name: "cyclic".to_string(), nodes: vec![add_node("a"), add_node("b")], links: vec![link("a", "b"), link("b", "a")] };
        assert!(matches!(build_nodetree(&cyclic, None), Err(Error::InvalidNodeTree { .. })));

        let dangling = NodeTreeDto { name: "dangling".to_string(), nodes: vec![add_node("a")], links: vec![link("a", "ghost")] };
        assert!(matches!(build_nodetree(&dangling, None), Err(Error::InvalidNodeTree { .. })));

        let duplicate = NodeTreeDto { name: "dup".to_string(), nodes: vec![add_node("a"), add_node("a")], links: vec![] };
        assert!(matches!(build_nodetree(&duplicate, None), Err(Error::InvalidNodeTree { .. })));
    }

    #[test]
    fn validate_reports_unknown_executors() {
        let mut node = add_node("a");
        node.executor = Some(ExecutorDto { key: "does.not.exist".to_string(), kind: ExecutorKind::Function, version: None });
        let dto = NodeTreeDto { name: "bad".to_string(), nodes: vec![node], links: vec![] };

        let registry = builtin_registry();
        assert!(matches!(validate(&dto, &registry), Err(Error::UnknownExecutorError(key)) if key == "does.not.exist"));
    }
}
