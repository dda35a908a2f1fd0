use serde_json::Value;
use std::path::Path;

use crate::domain::engine::context::EngineContext;
use crate::domain::engine::job::{JOB_FILE, JobResult, JobStatus, RESULT_FILE, RemoteJob, SCRIPT_FILE};
use crate::domain::executor::registry::CallArgs;
use crate::domain::model::node::{ExecutorRef, NodeRecord};
use crate::domain::remote::client::RemoteClient;
use crate::domain::remote::computer::{BatchScheduler, Computer};
use crate::domain::remote::slurm::{self, JobState};
use crate::error::{Error, Result};
use crate::loader::parser::{parse_json_file, write_json_file};

/// Runs one node on `computer` and returns the executor's value.
///
/// The session is always disconnected and the local staging directory removed, whatever the
/// outcome.
pub async fn run_remote(ctx: &EngineContext, node: &NodeRecord, executor: &ExecutorRef, call: &CallArgs, computer: &Computer) -> Result<Value> {
    let staging = ctx.staging_dir.join(node.uuid.as_str());
    tokio::fs::create_dir_all(&staging).await?;

    let job = RemoteJob {
        executor: executor.clone(),
        args: call.clone(),
        node: node.name.clone(),
        node_uuid: node.uuid.clone(),
        nodetree: node.nodetree().clone(),
        computer: Some(computer.name.clone()),
    };
    write_json_file(staging.join(JOB_FILE), &job)?;

    let mut client = RemoteClient::new(computer.clone());
    let result = dispatch(&mut client, ctx, node, &staging).await;
    client.disconnect().await;

    if let Err(e) = tokio::fs::remove_dir_all(&staging).await {
        log::warn!("[Remote {}] Could not remove staging directory '{}': {}", computer.name, staging.display(), e);
    }
    result
}

async fn dispatch(client: &mut RemoteClient, ctx: &EngineContext, node: &NodeRecord, staging: &Path) -> Result<Value> {
    client.connect().await?;

    let computer = client.computer().clone();
    let job_dir = computer.job_dir(node.uuid.as_str());
    // A reset node reuses its uuid; files of the previous run must not be read back as this run's result.
    client.remove_folder(&job_dir).await?;
    client.make_directory(&job_dir).await?;
    client.copy(&staging.join(JOB_FILE), &format!("{}/{}", job_dir, JOB_FILE)).await?;
    ctx.store.append_log(&node.uuid, &format!("Uploaded job to {}:{}", computer.hostname, job_dir));

    let command = format!("{} .", computer.runner);
    let (job_id, state) = match computer.scheduler {
        BatchScheduler::Direct => {
            let pid = client.submit_background(&command, &job_dir).await?;
            let state = client.wait_for_job(&pid, BatchScheduler::Direct).await?;
            (pid, state)
        }
        BatchScheduler::Slurm => {
            let script = staging.join(SCRIPT_FILE);
            tokio::fs::write(&script, slurm::batch_script(&node.name, &job_dir, &command)).await?;
            let remote_script = format!("{}/{}", job_dir, SCRIPT_FILE);
            client.put(&script, &remote_script).await?;

            let job_id = client.submit_batch_job(&remote_script).await?;
            let state = client.wait_for_job(&job_id, BatchScheduler::Slurm).await?;
            (job_id, state)
        }
    };
    ctx.store.append_log(&node.uuid, &format!("Remote job {} ended as {}", job_id, state));

    let local_result = staging.join(RESULT_FILE);
    if let Err(e) = client.get(&format!("{}/{}", job_dir, RESULT_FILE), &local_result).await {
        return Err(Error::RemoteExecutionError(match state {
            JobState::Failed => format!("job {} failed on '{}' without writing a result: {}", job_id, computer.name, e),
            _ => format!("job {} on '{}' left no readable result: {}", job_id, computer.name, e),
        }));
    }

    let result: JobResult = parse_json_file(&local_result)?;
    if state == JobState::Failed && result.status == JobStatus::Ok {
        return Err(Error::RemoteExecutionError(format!("job {} on '{}' was reported failed by the scheduler after writing its result", job_id, computer.name)));
    }
    result.into_value(&node.name)
}
