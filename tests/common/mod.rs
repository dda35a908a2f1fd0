#![allow(dead_code)]

use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use nodeflow::api::nodetree_dto::{ExecutorDto, GroupOutputDto, InputDto, LinkDto, NodeDto, NodeTreeDto};
use nodeflow::domain::engine::context::EngineContext;
use nodeflow::domain::engine::engine::{Engine, Processed};
use nodeflow::domain::executor::builtin::builtin_registry;
use nodeflow::domain::executor::registry::ExecutorRegistry;
use nodeflow::domain::model::builder;
use nodeflow::domain::model::node::{ExecutorKind, NodeRecord};
use nodeflow::domain::queue::message_queue::MessageQueue;
use nodeflow::domain::remote::computer::ComputerRegistry;
use nodeflow::domain::store::store::Store;
use nodeflow::domain::utils::id::{NodeTreeId, WorkerName};

pub const WORKER: &str = "test-worker";

/// Engine wired to an in-memory store and queue. Messages are pumped by hand with `settle`.
pub struct Harness {
    pub engine: Engine,
    pub queue: MessageQueue,
    pub store: Store,
    pub worker: WorkerName,
    pub calls: Arc<AtomicUsize>,
}

impl Harness {
    pub fn new(pool_size: usize) -> Self {
        Self::with_computers(pool_size, ComputerRegistry::new(), std::env::temp_dir().join("nodeflow-tests"))
    }

    pub fn with_computers(pool_size: usize, computers: ComputerRegistry, staging_dir: PathBuf) -> Self {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = builtin_registry();
        register_counted_add(&mut registry, calls.clone());

        let worker = WorkerName::new(WORKER);
        let queue = MessageQueue::new();
        let store = Store::new();
        let ctx = EngineContext {
            worker: worker.clone(),
            store: store.clone(),
            registry: Arc::new(registry),
            computers: Arc::new(computers),
            sender: queue.sender(&worker),
            staging_dir,
        };

        Harness { engine: Engine::new(ctx, pool_size), queue, store, worker, calls }
    }

    pub fn submit(&self, dto: &NodeTreeDto) -> NodeTreeId {
        builder::submit(&self.store, dto).unwrap()
    }

    pub fn send(&self, message: impl Into<String>) {
        self.queue.send(&self.worker, message);
    }

    /// Processes everything already queued without waiting for tasks.
    pub fn pump(&mut self) -> Vec<Processed> {
        let mut outcomes = Vec::new();
        while let Some(delivery) = self.queue.try_receive(&self.worker) {
            outcomes.push(self.engine.process(&delivery.message));
            self.queue.ack(&self.worker, delivery.id);
        }
        outcomes
    }

    /// Pumps messages and waits for tasks until nothing is queued or running.
    pub async fn settle(&mut self) {
        let settled = tokio::time::timeout(Duration::from_secs(20), async {
            loop {
                self.pump();
                self.engine.wait_idle().await;
                if self.queue.is_empty(&self.worker) && self.engine.worker_state().active() == 0 {
                    break;
                }
            }
        })
        .await;
        assert!(settled.is_ok(), "engine did not settle");
    }

    /// Pumps messages until `done` holds.
    pub async fn pump_until(&mut self, mut done: impl FnMut(&Harness) -> bool) {
        for _ in 0..400 {
            self.pump();
            if done(self) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    pub fn node(&self, nodetree: &NodeTreeId, name: &str) -> NodeRecord {
        self.store.node_by_name(nodetree, name).unwrap()
    }

    pub fn output(&self, nodetree: &NodeTreeId, name: &str, socket: &str) -> Option<Value> {
        let node = self.node(nodetree, name);
        let socket = node.output_by_name(socket)?;
        self.store.socket_data(&socket.uuid).map(|d| d.value)
    }

    pub fn log(&self, nodetree: &NodeTreeId, name: &str) -> String {
        self.store.read_log(&self.node(nodetree, name).uuid)
    }
}

/// `test.counted_add` adds like `math.add` and counts its invocations.
fn register_counted_add(registry: &mut ExecutorRegistry, calls: Arc<AtomicUsize>) {
    registry.register_fn("test.counted_add", move |call| {
        calls.fetch_add(1, Ordering::SeqCst);
        let x = call.get(0, "x").and_then(Value::as_i64).unwrap_or_default();
        let y = call.get(1, "y").and_then(Value::as_i64).unwrap_or_default();
        Ok(json!(x + y))
    });
}

pub fn executor(key: &str) -> Option<ExecutorDto> {
    Some(ExecutorDto { key: key.to_string(), kind: ExecutorKind::Function, version: None })
}

pub fn input(name: &str, value: Value) -> InputDto {
    InputDto { name: name.to_string(), value: Some(value), transient: false }
}

pub fn node(name: &str, key: &str, inputs: Vec<InputDto>, outputs: &[&str]) -> NodeDto {
    NodeDto {
        name: name.to_string(),
        executor: executor(key),
        args: inputs.iter().map(|i| i.name.clone()).collect(),
        inputs,
        outputs: outputs.iter().map(|o| o.to_string()).collect(),
        kwargs: vec![],
        computer: None,
        use_cache: false,
        sub_nodetree: None,
        group_outputs: vec![],
    }
}

pub fn add_node(name: &str, x: i64, y: i64) -> NodeDto {
    node(name, "math.add", vec![input("x", json!(x)), input("y", json!(y))], &["result"])
}

pub fn sleep_node(name: &str, seconds: f64) -> NodeDto {
    node(name, "builtin.sleep", vec![input("seconds", json!(seconds))], &["result"])
}

pub fn link(from: &str, from_socket: &str, to: &str, to_socket: &str) -> LinkDto {
    LinkDto { from_node: from.to_string(), from_socket: from_socket.to_string(), to_node: to.to_string(), to_socket: to_socket.to_string() }
}

pub fn nodetree(name: &str, nodes: Vec<NodeDto>, links: Vec<LinkDto>) -> NodeTreeDto {
    NodeTreeDto { name: name.to_string(), nodes, links }
}

/// Group node wrapping `sub` and exposing the given child outputs.
pub fn group_node(name: &str, sub: NodeTreeDto, exposed: &[(&str, &str, &str)]) -> NodeDto {
    NodeDto {
        name: name.to_string(),
        executor: None,
        inputs: vec![],
        outputs: exposed.iter().map(|(output, _, _)| output.to_string()).collect(),
        args: vec![],
        kwargs: vec![],
        computer: None,
        use_cache: false,
        sub_nodetree: Some(Box::new(sub)),
        group_outputs: exposed.iter().map(|(_, node, socket)| GroupOutputDto { node: node.to_string(), socket: socket.to_string() }).collect(),
    }
}

pub fn launch_nodetree(nodetree: &NodeTreeId) -> String {
    format!("{},nodetree,action:LAUNCH", nodetree)
}

pub fn node_message(nodetree: &NodeTreeId, node: &str, key: &str, value: &str) -> String {
    format!("{},node,{}:{}:{}", nodetree, node, key, value)
}
