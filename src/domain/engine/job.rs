use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

use crate::domain::executor::registry::{CallArgs, ExecutionContext, ExecutorRegistry};
use crate::domain::model::node::ExecutorRef;
use crate::domain::utils::id::{ComputerName, NodeId, NodeTreeId};
use crate::error::{Error, Result};
use crate::loader::parser::{parse_json_file, write_json_file};

pub const JOB_FILE: &str = "job.json";
pub const RESULT_FILE: &str = "result.json";
pub const SCRIPT_FILE: &str = "job.sh";

/// A node packaged for execution on another machine.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteJob {
    pub executor: ExecutorRef,
    pub args: CallArgs,
    pub node: String,
    pub node_uuid: NodeId,
    pub nodetree: NodeTreeId,
    #[serde(default)]
    pub computer: Option<ComputerName>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Ok,
    Error,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JobResult {
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobResult {
    pub fn ok(value: Value) -> Self {
        JobResult { status: JobStatus::Ok, value: Some(value), error: None }
    }

    pub fn error(message: impl Into<String>) -> Self {
        JobResult { status: JobStatus::Error, value: None, error: Some(message.into()) }
    }

    pub fn into_value(self, node: &str) -> Result<Value> {
        match self.status {
            JobStatus::Ok => Ok(self.value.unwrap_or(Value::Null)),
            JobStatus::Error => Err(Error::ExecutorFailed {
                node: node.to_string(),
                message: self.error.unwrap_or_else(|| "remote job failed without a message".to_string()),
            }),
        }
    }
}

/// Runs the job packaged in `dir` and writes `result.json` next to it.
///
/// Executor failures end up in the result file; only I/O and parse errors are returned.
pub fn exec_job(dir: &Path, registry: &ExecutorRegistry) -> Result<JobResult> {
    let job: RemoteJob = parse_json_file(dir.join(JOB_FILE))?;
    log::info!("[Job {}] Running '{}' for node '{}'", job.node_uuid, job.executor.key, job.node);

    let ctx = ExecutionContext { node: job.node.clone(), node_uuid: job.node_uuid.clone(), nodetree: job.nodetree.clone(), computer: job.computer.clone() };
    let result = match registry.resolve(&job.executor) {
        Ok(executor) => match executor.invoke(&ctx, &job.args) {
            Ok(value) => JobResult::ok(value),
            Err(e) => JobResult::error(format!("{:#}", e)),
        },
        Err(e) => JobResult::error(e.to_string()),
    };

    write_json_file(dir.join(RESULT_FILE), &result)?;
    log::info!("[Job {}] Finished with status {:?}", job.node_uuid, result.status);
    Ok(result)
}
