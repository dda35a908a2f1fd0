use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::domain::remote::computer::{BatchScheduler, Computer, TransportKind};
use crate::domain::remote::local_transport::LocalTransport;
use crate::domain::remote::slurm::{self, JobState};
use crate::domain::remote::ssh_transport::SshTransport;
use crate::domain::remote::transport::RemoteTransport;
use crate::error::{Error, Result};

/// Session with one computer for the duration of a remote launch.
pub struct RemoteClient {
    computer: Computer,
    transport: Box<dyn RemoteTransport>,
    connected: bool,
}

impl RemoteClient {
    pub fn new(computer: Computer) -> Self {
        let transport: Box<dyn RemoteTransport> = match computer.transport {
            TransportKind::Ssh => Box::new(SshTransport::new(&computer)),
            TransportKind::Local => Box::new(LocalTransport::new("/")),
        };
        Self::with_transport(computer, transport)
    }

    pub fn with_transport(computer: Computer, transport: Box<dyn RemoteTransport>) -> Self {
        RemoteClient { computer, transport, connected: false }
    }

    pub fn computer(&self) -> &Computer {
        &self.computer
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Opens the session, retrying transport failures with the computer's backoff policy.
    pub async fn connect(&mut self) -> Result<()> {
        if self.connected {
            return Ok(());
        }
        let policy = self.computer.retry;
        let transport = &self.transport;
        policy.retry(&format!("connect to '{}'", self.computer.hostname), || transport.open()).await?;

        self.connected = true;
        log::info!("[Remote {}] Connected to {}@{}:{}", self.computer.name, self.computer.username, self.computer.hostname, self.computer.port);
        Ok(())
    }

    /// Closes the session. Safe to call any number of times; failures are only logged.
    pub async fn disconnect(&mut self) {
        if !self.connected {
            return;
        }
        self.connected = false;
        match self.transport.close().await {
            Ok(()) => log::info!("[Remote {}] Disconnected", self.computer.name),
            Err(e) => log::warn!("[Remote {}] Error while disconnecting: {}", self.computer.name, e),
        }
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.connected {
            Ok(())
        } else {
            Err(Error::RemoteExecutionError(format!("not connected to computer '{}'", self.computer.name)))
        }
    }

    pub async fn put(&self, local: &Path, remote: &str) -> Result<()> {
        self.ensure_connected()?;
        if !local.is_file() {
            return Err(Error::FileNotFoundError(local.to_path_buf()));
        }
        self.transport.upload(local, remote).await
    }

    pub async fn get(&self, remote: &str, local: &Path) -> Result<()> {
        self.ensure_connected()?;
        self.transport.download(remote, local).await
    }

    /// Copies a file or a whole directory tree, creating remote directories on the way.
    pub async fn copy(&self, local: &Path, remote: &str) -> Result<()> {
        self.ensure_connected()?;
        if !local.exists() {
            return Err(Error::FileNotFoundError(local.to_path_buf()));
        }

        if local.is_file() {
            if let Some((parent, _)) = remote.rsplit_once('/') {
                if !parent.is_empty() {
                    self.transport.mkdir(parent).await?;
                }
            }
            return self.transport.upload(local, remote).await;
        }

        let mut pending: Vec<(PathBuf, String)> = vec![(local.to_path_buf(), remote.trim_end_matches('/').to_string())];
        let mut files = 0usize;

        while let Some((dir, remote_dir)) = pending.pop() {
            self.transport.mkdir(&remote_dir).await?;

            let mut entries = Vec::new();
            let mut read_dir = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = read_dir.next_entry().await? {
                entries.push(entry);
            }
            entries.sort_by_key(|e| e.file_name());

            for entry in entries {
                let name = entry.file_name().to_string_lossy().into_owned();
                let target = format!("{}/{}", remote_dir, name);
                if entry.file_type().await?.is_dir() {
                    pending.push((entry.path(), target));
                } else {
                    self.transport.upload(&entry.path(), &target).await?;
                    files += 1;
                }
            }
        }

        log::debug!("[Remote {}] Copied {} file(s) from '{}' to '{}'", self.computer.name, files, local.display(), remote);
        Ok(())
    }

    pub async fn remove_file(&self, remote: &str) -> Result<()> {
        self.ensure_connected()?;
        self.transport.remove(remote, false).await
    }

    pub async fn remove_folder(&self, remote: &str) -> Result<()> {
        self.ensure_connected()?;
        self.transport.remove(remote, true).await
    }

    /// `mkdir -p`; an existing directory is fine.
    pub async fn make_directory(&self, remote: &str) -> Result<()> {
        self.ensure_connected()?;
        self.transport.mkdir(remote).await
    }

    /// Runs `command` in the computer's working directory and returns its trimmed stdout.
    pub async fn execute_command(&self, command: &str) -> Result<String> {
        self.execute_in(command, &self.computer.workdir).await
    }

    /// Like `execute_command`, in `cwd`. The exit status is not checked.
    ///
    /// The computer's `prepend_text` runs first in the same shell.
    pub async fn execute_in(&self, command: &str, cwd: &str) -> Result<String> {
        self.ensure_connected()?;
        let script = match &self.computer.prepend_text {
            Some(prelude) => format!("{}\n{}", prelude.trim_end(), command),
            None => command.to_string(),
        };
        let output = self.transport.exec(&script, cwd).await?;

        let stderr = output.stderr.trim();
        if !output.success() {
            log::warn!("[Remote {}] '{}' exited with {:?}: {}", self.computer.name, command, output.status, stderr);
        } else if !stderr.is_empty() {
            log::debug!("[Remote {}] '{}' stderr: {}", self.computer.name, command, stderr);
        }

        Ok(output.stdout.trim().to_string())
    }

    /// Submits `script` with `sbatch` from the script's directory and returns the job id.
    pub async fn submit_batch_job(&self, script: &str) -> Result<String> {
        let cwd = script.rsplit_once('/').map(|(dir, _)| dir).filter(|d| !d.is_empty()).unwrap_or(self.computer.workdir.as_str());
        let stdout = self.execute_in(&slurm::sbatch_command(script), cwd).await?;
        let job_id = slurm::parse_sbatch_job_id(&stdout)?;
        log::info!("[Remote {}] Submitted batch job {}", self.computer.name, job_id);
        Ok(job_id)
    }

    /// Starts `command` in the background inside `cwd` and returns its pid.
    pub async fn submit_background(&self, command: &str, cwd: &str) -> Result<String> {
        let stdout = self.execute_in(&slurm::background_command(command), cwd).await?;
        let pid = slurm::parse_background_pid(&stdout)?;
        log::info!("[Remote {}] Started background job {} in '{}'", self.computer.name, pid, cwd);
        Ok(pid)
    }

    pub async fn check_job_state(&self, job_id: &str, scheduler: BatchScheduler) -> Result<JobState> {
        let state = match scheduler {
            BatchScheduler::Slurm => slurm::parse_scontrol_state(&self.execute_command(&slurm::scontrol_command(job_id)).await?),
            BatchScheduler::Direct => slurm::parse_ps_state(&self.execute_command(&slurm::ps_command(job_id)).await?),
        };
        log::debug!("[Remote {}] Job {} is {}", self.computer.name, job_id, state);
        Ok(state)
    }

    /// Polls until the job is done or failed, backing off between polls.
    ///
    /// Fails with `JobTimeout` once the computer's job timeout has passed. Gives up with
    /// `JobState::Unknown` when the state stays unreadable for `max_attempts` polls in a row.
    pub async fn wait_for_job(&self, job_id: &str, scheduler: BatchScheduler) -> Result<JobState> {
        let started = Instant::now();
        let policy = self.computer.retry;
        let mut poll = 0u32;
        let mut unknown_in_a_row = 0u32;

        loop {
            let state = self.check_job_state(job_id, scheduler).await?;
            if state.is_finished() {
                return Ok(state);
            }

            if state == JobState::Unknown {
                unknown_in_a_row += 1;
                if unknown_in_a_row >= policy.max_attempts {
                    log::warn!("[Remote {}] Could not read the state of job {} {} times; giving up", self.computer.name, job_id, unknown_in_a_row);
                    return Ok(JobState::Unknown);
                }
            } else {
                unknown_in_a_row = 0;
            }

            if let Some(timeout) = self.computer.job_timeout {
                if started.elapsed() >= timeout {
                    return Err(Error::JobTimeout { job_id: job_id.to_string(), secs: timeout.as_secs() });
                }
            }

            tokio::time::sleep(policy.delay_for(poll)).await;
            poll = poll.saturating_add(1);
        }
    }
}
