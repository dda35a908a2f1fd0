use serde_json::json;

use crate::domain::executor::resolver::HashableCall;
use crate::domain::model::node::{ExecutorRef, NodeRecord};
use crate::domain::store::socket_data::canonical_hash;
use crate::domain::store::store::Store;
use crate::error::Result;

/// Hash of executor identity plus the input hashes in calling order. Positional arguments are
/// hashed in order and keywords by name, so keyword order never matters but argument order and
/// placement do.
pub fn compute_hash(executor: &ExecutorRef, hashable: &HashableCall) -> String {
    let document = json!({
        "executor": {
            "key": executor.key,
            "kind": executor.kind,
            "version": executor.version,
        },
        "args": hashable.args,
        "kwargs": hashable.kwargs,
    });
    canonical_hash(&document)
}

/// A FINISHED node with the same hash, when the node opted into caching.
///
/// Two nodes launched at the same time with the same hash both run; only a node that already
/// finished can be reused.
pub fn find_cache_hit(store: &Store, node: &NodeRecord, hash: &str) -> Option<NodeRecord> {
    if !node.metadata.use_cache {
        return None;
    }
    store.find_finished_by_hash(hash, &node.uuid)
}

/// Copies the outputs of `hit` onto `node`, socket by socket in declaration order.
///
/// Returns `false` without writing anything when the two nodes do not line up (different output
/// count or a missing cached value); the caller then runs the executor instead.
pub fn reuse_cached_result(store: &Store, node: &NodeRecord, hit: &NodeRecord) -> Result<bool> {
    if node.outputs.len() != hit.outputs.len() {
        log::warn!("[Cache] Node '{}' has {} outputs, cache hit '{}' has {}; not reusing", node.name, node.outputs.len(), hit.name, hit.outputs.len());
        return Ok(false);
    }

    let mut copied = Vec::with_capacity(node.outputs.len());
    for (target, source) in node.outputs.iter().zip(&hit.outputs) {
        match store.socket_data(&source.uuid) {
            Some(data) => copied.push((target.uuid.clone(), data)),
            None => {
                log::warn!("[Cache] Cache hit '{}' has no value for output '{}'; not reusing", hit.name, source.name);
                return Ok(false);
            }
        }
    }

    for (socket, data) in copied {
        store.save_socket_data(&socket, data);
    }
    if let Some(hash) = &hit.hash {
        store.set_node_hash(&node.uuid, hash)?;
    }
    store.append_log(&node.uuid, &format!("Reused results of node '{}' ({})", hit.name, hit.uuid));

    Ok(true)
}
