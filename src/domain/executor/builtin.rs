use anyhow::{Context, anyhow, bail};
use serde_json::{Value, json};
use std::process::Command;
use std::time::Duration;

use crate::domain::executor::registry::{CallArgs, ExecutionContext, ExecutorRegistry, Runnable};

/// Executors shipped with the engine. Both the worker and `exec-job` resolve keys against this set.
pub fn builtin_registry() -> ExecutorRegistry {
    let mut registry = ExecutorRegistry::new();
    registry
        .register_fn("math.add", |call| arithmetic(call, |a, b| a.checked_add(b), |a, b| a + b))
        .register_fn("math.multiply", |call| arithmetic(call, |a, b| a.checked_mul(b), |a, b| a * b))
        .register_fn("math.sum", sum)
        .register_fn("builtin.identity", |call| Ok(call.get(0, "value").cloned().unwrap_or(Value::Null)))
        .register_fn("builtin.sleep", sleep)
        .register_fn("builtin.fail", |call| {
            let message = call.get(0, "message").and_then(Value::as_str).unwrap_or("failed on request");
            Err(anyhow!("{}", message))
        })
        .register_runnable("shell.run", ShellCommand);
    registry
}

fn number(call: &CallArgs, index: usize, name: &str) -> anyhow::Result<Value> {
    let value = call.get(index, name).with_context(|| format!("missing argument '{}'", name))?;
    if !value.is_number() {
        bail!("argument '{}' is not a number: {}", name, value);
    }
    Ok(value.clone())
}

fn arithmetic(call: &CallArgs, int_op: fn(i64, i64) -> Option<i64>, float_op: fn(f64, f64) -> f64) -> anyhow::Result<Value> {
    let x = number(call, 0, "x")?;
    let y = number(call, 1, "y")?;

    if let (Some(a), Some(b)) = (x.as_i64(), y.as_i64()) {
        if let Some(result) = int_op(a, b) {
            return Ok(json!(result));
        }
    }
    let (a, b) = (x.as_f64().unwrap_or_default(), y.as_f64().unwrap_or_default());
    Ok(json!(float_op(a, b)))
}

fn sum(call: &CallArgs) -> anyhow::Result<Value> {
    let values = call.get(0, "values").and_then(Value::as_array).context("'values' must be an array")?;
    if values.iter().all(|v| v.is_i64()) {
        return Ok(json!(values.iter().filter_map(Value::as_i64).sum::<i64>()));
    }
    let mut total = 0.0;
    for v in values {
        total += v.as_f64().with_context(|| format!("not a number: {}", v))?;
    }
    Ok(json!(total))
}

fn sleep(call: &CallArgs) -> anyhow::Result<Value> {
    let secs = call.get(0, "seconds").and_then(Value::as_f64).unwrap_or(0.0);
    if !(0.0..=3600.0).contains(&secs) {
        bail!("sleep duration out of range: {}", secs);
    }
    std::thread::sleep(Duration::from_secs_f64(secs));
    Ok(json!(secs))
}

/// Runs `command` with `sh -c`. A nonzero exit status is an error.
struct ShellCommand;

impl Runnable for ShellCommand {
    fn run(&self, ctx: &ExecutionContext, call: &CallArgs) -> anyhow::Result<Value> {
        let command = call.get(0, "command").and_then(Value::as_str).context("'command' must be a string")?;
        log::debug!("[shell.run {}] {}", ctx.node, command);

        let output = Command::new("sh").arg("-c").arg(command).output().with_context(|| format!("could not spawn '{}'", command))?;
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !output.status.success() {
            bail!("'{}' exited with {}: {}", command, output.status, stderr);
        }
        Ok(json!({ "stdout": stdout, "stderr": stderr }))
    }
}
