//! Text adapters for the batch-scheduler command line tools.
//!
//! Everything that scrapes `sbatch`, `scontrol` or `ps` output lives here.

use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

use crate::error::{Error, Result};

static SBATCH_JOB_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"Submitted batch job (\d+)").expect("sbatch pattern"));
static SCONTROL_STATE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"JobState=([A-Z_]+)").expect("scontrol pattern"));
static PID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^\s*(\d+)\s*$").expect("pid pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Done,
    Failed,
    Unknown,
}

impl JobState {
    pub fn is_finished(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Pending => "PENDING",
            JobState::Running => "RUNNING",
            JobState::Done => "DONE",
            JobState::Failed => "FAILED",
            JobState::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// Job id from `sbatch` output (`Submitted batch job 12345`).
pub fn parse_sbatch_job_id(output: &str) -> Result<String> {
    SBATCH_JOB_ID
        .captures(output)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| Error::RemoteExecutionError(format!("could not read a job id from sbatch output: '{}'", output.trim())))
}

/// Pid echoed by a background launch (`nohup ... & echo $!`).
pub fn parse_background_pid(output: &str) -> Result<String> {
    PID.captures_iter(output)
        .last()
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| Error::RemoteExecutionError(format!("could not read a pid from '{}'", output.trim())))
}

/// Job state from `scontrol show job <id>`. A job the controller no longer knows about has left
/// the queue, so it counts as done and the job's own result file decides the outcome.
pub fn parse_scontrol_state(output: &str) -> JobState {
    if output.contains("Invalid job id") {
        return JobState::Done;
    }
    let Some(state) = SCONTROL_STATE.captures(output).and_then(|c| c.get(1)) else {
        return JobState::Unknown;
    };

    match state.as_str() {
        "PENDING" | "CONFIGURING" | "REQUEUED" | "RESV_DEL_HOLD" | "SUSPENDED" => JobState::Pending,
        "RUNNING" | "COMPLETING" | "STAGE_OUT" => JobState::Running,
        "COMPLETED" => JobState::Done,
        "FAILED" | "CANCELLED" | "TIMEOUT" | "NODE_FAIL" | "OUT_OF_MEMORY" | "PREEMPTED" | "BOOT_FAIL" | "DEADLINE" => JobState::Failed,
        _ => JobState::Unknown,
    }
}

/// Process state from `ps -o stat= -p <pid>`. No output means the process is gone.
pub fn parse_ps_state(output: &str) -> JobState {
    let stat = output.trim();
    if stat.is_empty() || stat.starts_with('Z') {
        JobState::Done
    } else {
        JobState::Running
    }
}

pub fn sbatch_command(script: &str) -> String {
    format!("sbatch {}", shell_quote(script))
}

pub fn scontrol_command(job_id: &str) -> String {
    format!("scontrol show job {} 2>&1", shell_quote(job_id))
}

/// Falls back to `/proc/<pid>/stat` on hosts without `ps`.
pub fn ps_command(pid: &str) -> String {
    let pid = shell_quote(pid);
    format!("ps -o stat= -p {pid} 2>/dev/null || sed -n 's/^.*) \\(.\\).*$/\\1/p' /proc/{pid}/stat 2>/dev/null || true")
}

pub fn background_command(command: &str) -> String {
    format!("nohup sh -c {} > job.out 2> job.err < /dev/null & echo $!", shell_quote(command))
}

/// Slurm script that runs `command` inside `job_dir`.
pub fn batch_script(job_name: &str, job_dir: &str, command: &str) -> String {
    format!(
        "#!/bin/bash\n#SBATCH --job-name={}\n#SBATCH --output={}/job.out\n#SBATCH --error={}/job.err\n\ncd {}\n{}\n",
        job_name,
        job_dir,
        job_dir,
        shell_quote(job_dir),
        command
    )
}

/// Single-quotes `s` for POSIX shells.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sbatch_job_id() {
        assert_eq!(parse_sbatch_job_id("Submitted batch job 4242\n").unwrap(), "4242");
        assert!(parse_sbatch_job_id("sbatch: error: Batch job submission failed").is_err());
    }

    #[test]
    fn scontrol_states() {
        let running = "JobId=4242 JobName=node\n   UserId=me(1000) GroupId=me(1000)\n   JobState=RUNNING Reason=None Dependency=(null)";
        assert_eq!(parse_scontrol_state(running), JobState::Running);
        assert_eq!(parse_scontrol_state("JobState=PENDING Reason=Priority"), JobState::Pending);
        assert_eq!(parse_scontrol_state("JobState=COMPLETED Reason=None"), JobState::Done);
        assert_eq!(parse_scontrol_state("JobState=OUT_OF_MEMORY Reason=OutOfMemory"), JobState::Failed);
        assert_eq!(parse_scontrol_state("JobState=TIMEOUT"), JobState::Failed);
        assert_eq!(parse_scontrol_state("slurm_load_jobs error: Invalid job id specified"), JobState::Done);
        assert_eq!(parse_scontrol_state("garbage"), JobState::Unknown);
    }

    #[test]
    fn ps_states() {
        assert_eq!(parse_ps_state(""), JobState::Done);
        assert_eq!(parse_ps_state("Z+\n"), JobState::Done);
        assert_eq!(parse_ps_state("S\n"), JobState::Running);
    }

    #[test]
    fn background_pid_is_last_number() {
        assert_eq!(parse_background_pid("1234\n").unwrap(), "1234");
        assert_eq!(parse_background_pid("nohup: ignoring input\n5678\n").unwrap(), "5678");
        assert!(parse_background_pid("").is_err());
    }

    #[test]
    fn quoting_survives_single_quotes() {
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert!(batch_script("n1", "/scratch/n1", "nodeflow exec-job .").contains("cd '/scratch/n1'"));
    }
}
