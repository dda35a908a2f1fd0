use serde_json::Value;

use crate::domain::engine::context::EngineContext;
use crate::domain::engine::remote_launch::run_remote;
use crate::domain::engine::results::save_node_results;
use crate::domain::executor::cache::{compute_hash, find_cache_hit, reuse_cached_result};
use crate::domain::executor::registry::{CallArgs, ExecutionContext, Executor};
use crate::domain::executor::resolver::{resolve_inputs, split_args_kwargs};
use crate::domain::model::node::{ExecutorKind, ExecutorRef, NodeRecord, NodeState};
use crate::domain::queue::message::Message;
use crate::domain::remote::computer::Computer;
use crate::domain::utils::id::NodeTreeId;
use crate::error::{Error, Result};

enum Outcome {
    Finished,
    /// The group waits for its sub-nodetree.
    GroupStarted,
}

/// Where the executor of a node runs.
enum Target {
    Local(Executor),
    Remote(Computer),
}

/// Unit of work the pool runs for one launched node.
pub struct NodeLaunchTask {
    ctx: EngineContext,
    nodetree: NodeTreeId,
    node: String,
}

impl NodeLaunchTask {
    pub fn new(ctx: EngineContext, nodetree: NodeTreeId, node: String) -> Self {
        NodeLaunchTask { ctx, nodetree, node }
    }

    /// Runs the launch and reports the outcome as a state message. Never returns an error: failures
    /// are written to the node log and reported as FAILED.
    pub async fn run(self) {
        match self.execute().await {
            Ok(Outcome::Finished) => self.emit_state(NodeState::Finished),
            Ok(Outcome::GroupStarted) => {}
            Err(e) => {
                log::error!("[Launch {}/{}] {}", self.nodetree, self.node, e);
                if let Ok(node) = self.ctx.store.node_by_name(&self.nodetree, &self.node) {
                    self.ctx.store.append_log(&node.uuid, &format!("Launch failed: {}", e));
                }
                self.emit_state(NodeState::Failed);
            }
        }
    }

    fn emit_state(&self, state: NodeState) {
        self.ctx.emit(Message::node_state(&self.nodetree, &self.node, state));
    }

    async fn execute(&self) -> Result<Outcome> {
        let store = &self.ctx.store;
        let node = store.node_by_name(&self.nodetree, &self.node)?;

        if node.is_group() {
            return self.start_group(&node);
        }

        let executor = node.executor.clone().ok_or_else(|| Error::UnknownExecutorError(format!("<none declared by node '{}'>", node.name)))?;
        let target = self.target(&node, &executor)?;

        let inputs = resolve_inputs(store, &node)?;
        let split = split_args_kwargs(&inputs, &node.metadata.args, &node.metadata.kwargs)?;
        let hash = compute_hash(&executor, &split.hashable);

        if let Some(hit) = find_cache_hit(store, &node, &hash) {
            if reuse_cached_result(store, &node, &hit)? {
                tracing::info!(node = %node.name, nodetree = %self.nodetree, hash = %hash, source = %hit.name, "reused cached result");
                return Ok(Outcome::Finished);
            }
        }

        store.set_node_hash(&node.uuid, &hash)?;
        self.emit_state(NodeState::Running);

        let value = match target {
            Target::Local(executor) => {
                tracing::info!(node = %node.name, nodetree = %self.nodetree, hash = %hash, executor = %executor_key(&node), "running locally");
                store.append_log(&node.uuid, &format!("Running '{}' locally", executor_key(&node)));
                self.run_local(&node, executor, split.call).await?
            }
            Target::Remote(computer) => {
                tracing::info!(node = %node.name, nodetree = %self.nodetree, hash = %hash, computer = %computer.name, "running remotely");
                store.append_log(&node.uuid, &format!("Running '{}' on computer '{}'", executor.key, computer.name));
                run_remote(&self.ctx, &node, &executor, &split.call, &computer).await?
            }
        };

        store.append_log(&node.uuid, &format!("Result: {}", value));
        save_node_results(store, &node, value)?;
        Ok(Outcome::Finished)
    }

    /// Local unless the node names a computer; remote-aware executors always run here.
    fn target(&self, node: &NodeRecord, executor: &ExecutorRef) -> Result<Target> {
        match &node.scheduler.computer {
            Some(name) if executor.kind != ExecutorKind::RemoteAware => Ok(Target::Remote(self.ctx.computers.get(name)?.clone())),
            _ => Ok(Target::Local(self.ctx.registry.resolve(executor)?)),
        }
    }

    async fn run_local(&self, node: &NodeRecord, executor: Executor, call: CallArgs) -> Result<Value> {
        let exec_ctx = ExecutionContext {
            node: node.name.clone(),
            node_uuid: node.uuid.clone(),
            nodetree: self.nodetree.clone(),
            computer: node.scheduler.computer.clone(),
        };

        let joined = tokio::task::spawn_blocking(move || executor.invoke(&exec_ctx, &call)).await;
        match joined {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(Error::ExecutorFailed { node: node.name.clone(), message: format!("{:#}", e) }),
            Err(e) => Err(Error::ExecutorFailed { node: node.name.clone(), message: format!("executor panicked: {}", e) }),
        }
    }

    fn start_group(&self, node: &NodeRecord) -> Result<Outcome> {
        let sub = node.metadata.sub_nodetree.clone().ok_or_else(|| Error::InvalidNodeTree {
            nodetree: self.nodetree.to_string(),
            reason: format!("group node '{}' has no sub-nodetree", node.name),
        })?;

        self.ctx.store.append_log(&node.uuid, &format!("Launching sub-nodetree {}", sub));
        self.emit_state(NodeState::Running);
        self.ctx.emit(Message::nodetree_action(&sub, "LAUNCH"));
        Ok(Outcome::GroupStarted)
    }
}

fn executor_key(node: &NodeRecord) -> &str {
    node.executor.as_ref().map_or("<none>", |e| e.key.as_str())
}
