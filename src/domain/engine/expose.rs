use crate::domain::engine::context::EngineContext;
use crate::domain::model::node::NodeState;
use crate::domain::queue::message::Message;
use crate::domain::utils::id::NodeTreeId;
use crate::error::{Error, Result};

/// Copies the mapped outputs of a group's sub-nodetree onto the group node, then reports FINISHED.
pub struct ExposeOutputsTask {
    ctx: EngineContext,
    nodetree: NodeTreeId,
    node: String,
}

impl ExposeOutputsTask {
    pub fn new(ctx: EngineContext, nodetree: NodeTreeId, node: String) -> Self {
        ExposeOutputsTask { ctx, nodetree, node }
    }

    pub async fn run(self) {
        let state = match self.expose() {
            Ok(count) => {
                log::info!("[Expose {}/{}] Exposed {} output(s)", self.nodetree, self.node, count);
                NodeState::Finished
            }
            Err(e) => {
                log::error!("[Expose {}/{}] {}", self.nodetree, self.node, e);
                if let Ok(node) = self.ctx.store.node_by_name(&self.nodetree, &self.node) {
                    self.ctx.store.append_log(&node.uuid, &format!("Exposing outputs failed: {}", e));
                }
                NodeState::Failed
            }
        };
        self.ctx.emit(Message::node_state(&self.nodetree, &self.node, state));
    }

    fn expose(&self) -> Result<usize> {
        let store = &self.ctx.store;
        let node = store.node_by_name(&self.nodetree, &self.node)?;
        let sub = node.metadata.sub_nodetree.clone().ok_or_else(|| Error::InvalidNodeTree {
            nodetree: self.nodetree.to_string(),
            reason: format!("'{}' is not a group node", node.name),
        })?;

        let mut copied = Vec::with_capacity(node.outputs.len());
        for (output, mapping) in node.outputs.iter().zip(&node.metadata.group_outputs) {
            let child = store.node_by_name(&sub, &mapping.node)?;
            let not_ready = |reason: String| Error::InputNotReadyError { node: node.name.clone(), socket: output.name.clone(), reason };

            let socket = child.output_by_name(&mapping.socket).ok_or_else(|| not_ready(format!("'{}' has no output '{}'", child.name, mapping.socket)))?;
            let data = store.socket_data(&socket.uuid).ok_or_else(|| not_ready(format!("no value stored for {}.{}", child.name, mapping.socket)))?;
            copied.push((output.uuid.clone(), data));
        }

        let count = copied.len();
        for (socket, data) in copied {
            store.save_socket_data(&socket, data);
        }
        store.append_log(&node.uuid, &format!("Exposed {} output(s) of sub-nodetree {}", count, sub));
        Ok(count)
    }
}
