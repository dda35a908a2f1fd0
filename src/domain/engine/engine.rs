use crate::domain::engine::context::EngineContext;
use crate::domain::engine::expose::ExposeOutputsTask;
use crate::domain::engine::launch_task::NodeLaunchTask;
use crate::domain::engine::pool::{CancelOutcome, TaskPool};
use crate::domain::engine::worker_state::WorkerState;
use crate::domain::model::node::{NodeAction, NodeState};
use crate::domain::model::nodetree::NodeTreeState;
use crate::domain::queue::message::{KeyValueBody, Message, NodeMessageBody, implicated_node};
use crate::domain::utils::id::{NodeTreeId, WorkerName};
use crate::error::{Error, Result};

/// What happened to one queue message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Processed {
    Applied,
    /// The message failed and the implicated node was marked FAILED.
    Failed,
    /// The message failed and no node could be blamed.
    Dropped,
    /// The worker was asked to stop.
    Stop,
}

/// Message consumer of one worker.
///
/// Applies queued messages to the store one at a time and hands node execution to the task pool.
/// `process` never returns an error: every failure is logged and turned into persisted state.
pub struct Engine {
    ctx: EngineContext,
    pool: TaskPool,
    state: WorkerState,
}

impl Engine {
    pub fn new(ctx: EngineContext, pool_size: usize) -> Self {
        let state = WorkerState::new(ctx.worker.clone());
        Engine { ctx, pool: TaskPool::new(pool_size), state }
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    pub fn worker_state(&self) -> &WorkerState {
        &self.state
    }

    /// Waits until every task submitted so far has finished.
    pub async fn wait_idle(&self) {
        self.state.wait_all().await;
    }

    pub fn process(&mut self, raw: &str) -> Processed {
        log::debug!("[Worker {}] <- {}", self.ctx.worker, raw);

        let message = match Message::parse(raw) {
            Ok(message) => message,
            Err(e) => return self.reject(raw, e),
        };

        let result = match &message {
            Message::Node { nodetree, body } => self.apply_node_message(nodetree, body),
            Message::NodeTree { nodetree, body } => self.apply_nodetree_message(nodetree, body),
            Message::Worker { worker, body } => return self.apply_worker_message(worker, body),
        };

        match result {
            Ok(()) => Processed::Applied,
            Err(e) => self.reject(raw, e),
        }
    }

    /// Logs a failed message and writes FAILED onto the node it names, if any.
    fn reject(&mut self, raw: &str, error: Error) -> Processed {
        log::error!("[Worker {}] Failed to process '{}': {}", self.ctx.worker, raw, error);

        let Some((nodetree, node)) = implicated_node(raw) else {
            log::warn!("[Worker {}] No node to blame for '{}'; message dropped", self.ctx.worker, raw);
            return Processed::Dropped;
        };

        match self.ctx.store.set_node_field(&nodetree, &node, "state", NodeState::Failed.as_str()) {
            Ok(()) => {
                self.log_node(&nodetree, &node, &format!("Message '{}' failed: {}", raw, error));
                if let Err(e) = self.after_terminal_state(&nodetree, &node) {
                    log::error!("[Worker {}] Follow-up of FAILED node '{}' failed: {}", self.ctx.worker, node, e);
                }
                Processed::Failed
            }
            Err(e) => {
                log::warn!("[Worker {}] Could not mark '{}' FAILED ({}); message dropped", self.ctx.worker, node, e);
                Processed::Dropped
            }
        }
    }

    /// Writes `key = value` onto the node. Actions are dispatched after being recorded; terminal
    /// states trigger scheduling of the node's children.
    pub fn apply_node_message(&mut self, nodetree: &NodeTreeId, body: &NodeMessageBody) -> Result<()> {
        if body.key == "action" {
            let Ok(action) = body.value.parse::<NodeAction>() else {
                log::warn!("[Worker {}] Ignoring unknown action '{}' for node '{}'", self.ctx.worker, body.value, body.node);
                return Ok(());
            };
            self.ctx.store.set_node_field(nodetree, &body.node, "action", action.as_str())?;
            self.log_node(nodetree, &body.node, &format!("action = {}", action));
            return self.apply_node_action(nodetree, &body.node, action);
        }

        self.ctx.store.set_node_field(nodetree, &body.node, &body.key, &body.value)?;
        self.log_node(nodetree, &body.node, &format!("{} = {}", body.key, body.value));

        if body.key == "state" {
            let state: NodeState = body.value.parse()?;
            if state.is_terminal() {
                self.after_terminal_state(nodetree, &body.node)?;
            }
        }
        Ok(())
    }

    pub fn apply_node_action(&mut self, nodetree: &NodeTreeId, node: &str, action: NodeAction) -> Result<()> {
        match action {
            NodeAction::None => Ok(()),
            NodeAction::Launch => self.launch_node(nodetree, node),
            NodeAction::ExposeOutputs => {
                let task = ExposeOutputsTask::new(self.ctx.clone(), nodetree.clone(), node.to_string());
                let handle = self.pool.submit(task.run());
                self.state.track_background(handle);
                Ok(())
            }
            NodeAction::Cancel => self.cancel_node(nodetree, node),
            NodeAction::Reset => self.reset_node(nodetree, node),
            NodeAction::Skip => self.skip_node(nodetree, node),
        }
    }

    fn launch_node(&mut self, nodetree: &NodeTreeId, node: &str) -> Result<()> {
        let record = self.ctx.store.node_by_name(nodetree, node)?;
        if record.state == NodeState::Running {
            log::info!("[Worker {}] Node '{}' is already RUNNING; LAUNCH ignored", self.ctx.worker, node);
            return Ok(());
        }
        if self.state.get(nodetree, node).is_some() {
            log::info!("[Worker {}] Node '{}' already has a launch in flight; LAUNCH ignored", self.ctx.worker, node);
            return Ok(());
        }

        self.ctx.store.set_node_field(nodetree, node, "action", NodeAction::Launch.as_str())?;
        let task = NodeLaunchTask::new(self.ctx.clone(), nodetree.clone(), node.to_string());
        let handle = self.pool.submit(task.run());
        self.state.track(nodetree.clone(), node.to_string(), handle);

        log::info!("[Worker {}] Submitted node '{}' of nodetree {}", self.ctx.worker, node, nodetree);
        Ok(())
    }

    /// Stops a launch that has not started yet. A running launch keeps control of its own terminal
    /// state and a finished node is left as it is.
    pub fn cancel_node(&mut self, nodetree: &NodeTreeId, node: &str) -> Result<()> {
        let record = self.ctx.store.node_by_name(nodetree, node)?;

        let outcome = match self.state.get(nodetree, node) {
            Some(handle) => handle.cancel(),
            None if record.state.is_terminal() => CancelOutcome::AlreadyFinished,
            None if record.state == NodeState::Running => CancelOutcome::AlreadyRunning,
            None => CancelOutcome::Cancelled,
        };

        match outcome {
            CancelOutcome::Cancelled => {
                self.log_node(nodetree, node, "Cancelled before it started");
                self.ctx.emit(Message::node_state(nodetree, node, NodeState::Cancelled));
            }
            CancelOutcome::AlreadyRunning => {
                log::warn!("[Worker {}] Node '{}' is already running; cancellation does not apply", self.ctx.worker, node);
                self.log_node(nodetree, node, "Cancel requested while running; the running task is not interrupted");
            }
            CancelOutcome::AlreadyFinished => {
                log::info!("[Worker {}] Node '{}' already finished as {}; state left unchanged", self.ctx.worker, node, record.state);
                self.log_node(nodetree, node, "Cancel requested after the task finished; state left unchanged");
            }
        }
        Ok(())
    }

    /// Puts the node and everything downstream of it back to CREATED.
    fn reset_node(&mut self, nodetree: &NodeTreeId, node: &str) -> Result<()> {
        let tree = self.ctx.store.nodetree(nodetree).ok_or_else(|| Error::UnknownNodeTree(nodetree.to_string()))?;

        let mut targets = vec![node.to_string()];
        targets.extend(tree.descendants_of(node));
        for name in &targets {
            if let Some(handle) = self.state.take(nodetree, name) {
                if handle.cancel() == CancelOutcome::AlreadyRunning {
                    log::warn!("[Worker {}] Reset node '{}' while its task is still running", self.ctx.worker, name);
                }
            }
            self.ctx.store.reset_node(nodetree, name)?;
            self.log_node(nodetree, name, "Reset to CREATED");
        }

        self.refresh_nodetree_state(nodetree)
    }

    /// Marks the node and all of its descendants SKIPPED.
    fn skip_node(&mut self, nodetree: &NodeTreeId, node: &str) -> Result<()> {
        let tree = self.ctx.store.nodetree(nodetree).ok_or_else(|| Error::UnknownNodeTree(nodetree.to_string()))?;

        let mut targets = vec![node.to_string()];
        targets.extend(tree.descendants_of(node));
        for name in &targets {
            let state = tree.nodes.get(name).map(|s| s.state);
            if matches!(state, Some(NodeState::Running) | Some(NodeState::Finished)) {
                log::info!("[Worker {}] Not skipping '{}', it is {:?}", self.ctx.worker, name, state);
                continue;
            }
            if let Some(handle) = self.state.take(nodetree, name) {
                handle.cancel();
            }
            self.ctx.store.set_node_field(nodetree, name, "state", NodeState::Skipped.as_str())?;
            self.log_node(nodetree, name, "Skipped");
        }

        self.after_terminal_state(nodetree, node)
    }

    /// Forgets the node's task, launches children that became ready and re-derives the nodetree
    /// state.
    fn after_terminal_state(&mut self, nodetree: &NodeTreeId, node: &str) -> Result<()> {
        self.state.take(nodetree, node);
        self.launch_ready(nodetree)?;
        self.refresh_nodetree_state(nodetree)
    }

    /// Launches every ready node of a RUNNING nodetree.
    fn launch_ready(&mut self, nodetree: &NodeTreeId) -> Result<()> {
        let tree = self.ctx.store.nodetree(nodetree).ok_or_else(|| Error::UnknownNodeTree(nodetree.to_string()))?;
        if tree.state != NodeTreeState::Running {
            return Ok(());
        }

        for name in tree.ready_nodes() {
            if self.state.get(nodetree, &name).is_some() {
                continue;
            }
            self.launch_node(nodetree, &name)?;
        }
        Ok(())
    }

    fn refresh_nodetree_state(&mut self, nodetree: &NodeTreeId) -> Result<()> {
        let tree = self.ctx.store.nodetree(nodetree).ok_or_else(|| Error::UnknownNodeTree(nodetree.to_string()))?;
        if tree.state == NodeTreeState::Created {
            return Ok(());
        }

        let analyzed = tree.analyze_state();
        if analyzed == tree.state {
            return Ok(());
        }

        self.ctx.store.set_nodetree_state(nodetree, analyzed)?;
        log::info!("[Worker {}] Nodetree '{}' ({}) is now {}", self.ctx.worker, tree.name, nodetree, analyzed);
        if analyzed.is_terminal() && tree.parent.is_some() {
            self.ctx.emit(Message::nodetree_state(nodetree, analyzed));
        }
        Ok(())
    }

    fn apply_nodetree_message(&mut self, nodetree: &NodeTreeId, body: &KeyValueBody) -> Result<()> {
        match (body.key.as_str(), body.value.as_str()) {
            ("action", "LAUNCH") => {
                self.ctx.store.set_nodetree_state(nodetree, NodeTreeState::Running)?;
                log::info!("[Worker {}] Launching nodetree {}", self.ctx.worker, nodetree);
                self.launch_ready(nodetree)?;
                self.refresh_nodetree_state(nodetree)
            }
            ("action", "CANCEL") => {
                let tree = self.ctx.store.nodetree(nodetree).ok_or_else(|| Error::UnknownNodeTree(nodetree.to_string()))?;
                for (name, summary) in &tree.nodes {
                    if !summary.state.is_terminal() {
                        self.cancel_node(nodetree, name)?;
                    }
                }
                Ok(())
            }
            ("action", "RESET") => {
                let tree = self.ctx.store.nodetree(nodetree).ok_or_else(|| Error::UnknownNodeTree(nodetree.to_string()))?;
                for name in tree.nodes.keys() {
                    if let Some(handle) = self.state.take(nodetree, name) {
                        handle.cancel();
                    }
                    self.ctx.store.reset_node(nodetree, name)?;
                }
                self.ctx.store.set_nodetree_state(nodetree, NodeTreeState::Created)
            }
            ("state", value) => {
                let state: NodeTreeState = value.parse()?;
                self.ctx.store.set_nodetree_state(nodetree, state)?;
                self.forward_to_parent(nodetree, state)
            }
            _ => {
                log::warn!("[Worker {}] Ignoring nodetree message '{}:{}' for {}", self.ctx.worker, body.key, body.value, nodetree);
                Ok(())
            }
        }
    }

    /// A finished sub-nodetree lets its group node expose outputs; a failed or cancelled one takes
    /// the group node with it.
    fn forward_to_parent(&mut self, nodetree: &NodeTreeId, state: NodeTreeState) -> Result<()> {
        let tree = self.ctx.store.nodetree(nodetree).ok_or_else(|| Error::UnknownNodeTree(nodetree.to_string()))?;
        let Some(parent) = tree.parent else {
            return Ok(());
        };

        let message = match state {
            NodeTreeState::Finished => Message::node_action(&parent.nodetree, &parent.node, NodeAction::ExposeOutputs),
            NodeTreeState::Failed => Message::node_state(&parent.nodetree, &parent.node, NodeState::Failed),
            NodeTreeState::Cancelled => Message::node_state(&parent.nodetree, &parent.node, NodeState::Cancelled),
            NodeTreeState::Created | NodeTreeState::Running => return Ok(()),
        };
        self.ctx.emit(message);
        Ok(())
    }

    fn apply_worker_message(&mut self, worker: &WorkerName, body: &KeyValueBody) -> Processed {
        if worker != &self.ctx.worker {
            log::warn!("[Worker {}] Received a message addressed to worker '{}'", self.ctx.worker, worker);
        }

        match (body.key.as_str(), body.value.as_str()) {
            ("action", "STOP") => {
                log::info!("[Worker {}] Stop requested", self.ctx.worker);
                Processed::Stop
            }
            ("action", "UPDATE") => {
                self.ctx.store.touch_worker(&self.ctx.worker);
                Processed::Applied
            }
            _ => {
                log::warn!("[Worker {}] Ignoring worker message '{}:{}'", self.ctx.worker, body.key, body.value);
                Processed::Dropped
            }
        }
    }

    fn log_node(&self, nodetree: &NodeTreeId, node: &str, line: &str) {
        if let Ok(record) = self.ctx.store.node_by_name(nodetree, node) {
            self.ctx.store.append_log(&record.uuid, line);
        }
    }
}
