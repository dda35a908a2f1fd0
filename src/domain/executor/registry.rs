use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::domain::model::node::ExecutorRef;
use crate::domain::utils::id::{ComputerName, NodeId, NodeTreeId};
use crate::error::{Error, Result};

/// Arguments handed to an executor, already split by the node's calling convention.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
}

impl CallArgs {
    /// Positional argument `index`, falling back to keyword `name`.
    pub fn get(&self, index: usize, name: &str) -> Option<&Value> {
        self.args.get(index).or_else(|| self.kwargs.get(name))
    }
}

/// What a runnable executor knows about the node it runs for.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub node: String,
    pub node_uuid: NodeId,
    pub nodetree: NodeTreeId,
    pub computer: Option<ComputerName>,
}

pub type ExecutorFn = Arc<dyn Fn(&CallArgs) -> anyhow::Result<Value> + Send + Sync>;

/// Executor that needs to know where it runs.
pub trait Runnable: Send + Sync {
    fn run(&self, ctx: &ExecutionContext, call: &CallArgs) -> anyhow::Result<Value>;
}

#[derive(Clone)]
pub enum Executor {
    Function(ExecutorFn),
    Runnable(Arc<dyn Runnable>),
}

impl Executor {
    pub fn invoke(&self, ctx: &ExecutionContext, call: &CallArgs) -> anyhow::Result<Value> {
        match self {
            Executor::Function(f) => f(call),
            Executor::Runnable(r) => r.run(ctx, call),
        }
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Executor::Function(_) => f.write_str("Executor::Function"),
            Executor::Runnable(_) => f.write_str("Executor::Runnable"),
        }
    }
}

/// Maps stable executor keys to callables. Filled once at startup; lookups of unknown keys fail.
#[derive(Debug, Clone, Default)]
pub struct ExecutorRegistry {
    entries: HashMap<String, Executor>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_fn<F>(&mut self, key: &str, f: F) -> &mut Self
    where
        F: Fn(&CallArgs) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.entries.insert(key.to_string(), Executor::Function(Arc::new(f)));
        self
    }

    pub fn register_runnable(&mut self, key: &str, runnable: impl Runnable + 'static) -> &mut Self {
        self.entries.insert(key.to_string(), Executor::Runnable(Arc::new(runnable)));
        self
    }

    pub fn resolve(&self, executor: &ExecutorRef) -> Result<Executor> {
        self.entries.get(&executor.key).cloned().ok_or_else(|| Error::UnknownExecutorError(executor.key.clone()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    impl Runnable for Echo {
        fn run(&self, ctx: &ExecutionContext, _call: &CallArgs) -> anyhow::Result<Value> {
            Ok(json!(ctx.node))
        }
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext { node: "n".to_string(), node_uuid: NodeId::new("u"), nodetree: NodeTreeId::new("nt"), computer: None }
    }

    #[test]
    fn resolves_functions_and_runnables() {
        let mut registry = ExecutorRegistry::new();
        registry.register_fn("double", |call| Ok(json!(call.args[0].as_i64().unwrap_or(0) * 2))).register_runnable("echo", Echo);

        let call = CallArgs { args: vec![json!(4)], kwargs: Map::new() };
        let double = registry.resolve(&ExecutorRef::function("double")).unwrap();
        assert_eq!(double.invoke(&ctx(), &call).unwrap(), json!(8));

        let echo = registry.resolve(&ExecutorRef::function("echo")).unwrap();
        assert_eq!(echo.invoke(&ctx(), &call).unwrap(), json!("n"));
        assert_eq!(registry.keys(), vec!["double".to_string(), "echo".to_string()]);
    }

    #[test]
    fn unknown_key_fails_closed() {
        let registry = ExecutorRegistry::new();
        assert!(matches!(registry.resolve(&ExecutorRef::function("os.system")), Err(Error::UnknownExecutorError(_))));
    }
}
