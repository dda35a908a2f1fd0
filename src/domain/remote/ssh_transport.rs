use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;

use crate::domain::remote::computer::{Computer, Credential};
use crate::domain::remote::slurm::shell_quote;
use crate::domain::remote::transport::{CommandOutput, RemoteTransport, run_process};
use crate::error::{Error, Result};

/// OpenSSH client exit status for connection and authentication failures.
const SSH_FAILURE: i32 = 255;
/// `sshpass` exit status for a rejected password.
const SSHPASS_WRONG_PASSWORD: i32 = 5;
/// `sshpass` exit status for an unknown or changed host key.
const SSHPASS_HOST_KEY: i32 = 6;

/// Printed after every remote command with its exit status, so the command's own status can be
/// told apart from the ssh client's.
const STATUS_MARKER: &str = "__nodeflow_status=";

/// Talks to a computer through the system `ssh`/`scp` binaries.
///
/// `open` starts a control master so later commands reuse one authenticated connection. Password
/// credentials are passed to `sshpass` through the environment.
#[derive(Debug, Clone)]
pub struct SshTransport {
    host: String,
    port: u16,
    username: String,
    credential: Option<Credential>,
    control_path: PathBuf,
}

impl SshTransport {
    pub fn new(computer: &Computer) -> Self {
        let control_path = std::env::temp_dir().join(format!("nodeflow-ssh-{}-{}", computer.name, uuid::Uuid::new_v4().simple()));
        SshTransport {
            host: computer.hostname.clone(),
            port: computer.port,
            username: computer.username.clone(),
            credential: computer.credential.clone(),
            control_path,
        }
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.username, self.host)
    }

    fn base_command(&self, program: &str) -> Command {
        let mut cmd = match &self.credential {
            Some(Credential::Password(password)) => {
                let mut cmd = Command::new("sshpass");
                cmd.arg("-e").arg(program).env("SSHPASS", password);
                cmd
            }
            _ => Command::new(program),
        };

        cmd.arg("-o").arg(format!("ControlPath={}", self.control_path.display()));
        cmd.arg("-o").arg("StrictHostKeyChecking=accept-new");
        if let Some(Credential::KeyFile(key)) = &self.credential {
            cmd.arg("-o").arg("BatchMode=yes").arg("-i").arg(key);
        }
        cmd
    }

    fn ssh(&self) -> Command {
        let mut cmd = self.base_command("ssh");
        cmd.arg("-p").arg(self.port.to_string());
        cmd
    }

    fn scp(&self) -> Command {
        let mut cmd = self.base_command("scp");
        cmd.arg("-q").arg("-P").arg(self.port.to_string());
        cmd
    }

    fn uses_sshpass(&self) -> bool {
        matches!(self.credential, Some(Credential::Password(_)))
    }

    async fn spawn(&self, cmd: Command) -> Result<CommandOutput> {
        run_process(cmd, &self.host)
            .await
            .map_err(|e| Error::RemoteExecutionError(format!("could not start ssh client for '{}': {}", self.host, e)))
    }

    async fn run(&self, cmd: Command) -> Result<CommandOutput> {
        let output = self.spawn(cmd).await?;
        check_transport(&self.host, self.uses_sshpass(), output)
    }

    fn expect_success(&self, what: &str, output: CommandOutput) -> Result<()> {
        if output.success() {
            Ok(())
        } else {
            Err(Error::RemoteExecutionError(format!("{} on '{}' failed ({:?}): {}", what, self.host, output.status, output.stderr.trim())))
        }
    }
}

#[async_trait]
impl RemoteTransport for SshTransport {
    async fn open(&self) -> Result<()> {
        let mut cmd = self.ssh();
        cmd.arg("-o").arg("ControlMaster=auto").arg("-o").arg("ControlPersist=300").arg(self.destination()).arg("true");
        let output = self.run(cmd).await?;
        self.expect_success("connect", output)
    }

    async fn close(&self) -> Result<()> {
        let mut cmd = self.ssh();
        cmd.arg("-O").arg("exit").arg(self.destination());
        let output = run_process(cmd, &self.host).await?;
        if !output.success() {
            log::debug!("[SSH {}] control master already gone: {}", self.host, output.stderr.trim());
        }
        Ok(())
    }

    async fn upload(&self, local: &Path, remote: &str) -> Result<()> {
        let mut cmd = self.scp();
        cmd.arg(local).arg(format!("{}:{}", self.destination(), remote));
        let output = self.run(cmd).await?;
        self.expect_success(&format!("upload of '{}'", local.display()), output)
    }

    async fn download(&self, remote: &str, local: &Path) -> Result<()> {
        let mut cmd = self.scp();
        cmd.arg(format!("{}:{}", self.destination(), remote)).arg(local);
        let output = self.run(cmd).await?;
        self.expect_success(&format!("download of '{}'", remote), output)
    }

    async fn mkdir(&self, remote: &str) -> Result<()> {
        let output = self.exec(&format!("mkdir -p {}", shell_quote(remote)), ".").await?;
        self.expect_success(&format!("mkdir '{}'", remote), output)
    }

    async fn remove(&self, remote: &str, recursive: bool) -> Result<()> {
        let flags = if recursive { "-rf" } else { "-f" };
        let output = self.exec(&format!("rm {} {}", flags, shell_quote(remote)), ".").await?;
        self.expect_success(&format!("rm '{}'", remote), output)
    }

    async fn exec(&self, command: &str, cwd: &str) -> Result<CommandOutput> {
        let mut cmd = self.ssh();
        cmd.arg(self.destination()).arg(with_status_marker(command, cwd));
        let output = self.spawn(cmd).await?;
        match split_status_marker(&output) {
            Some(ran) => Ok(ran),
            None => check_transport(&self.host, self.uses_sshpass(), output),
        }
    }
}

/// Maps the ssh client's own failures onto transport errors; anything else belongs to the remote
/// command.
fn check_transport(host: &str, via_sshpass: bool, output: CommandOutput) -> Result<CommandOutput> {
    let reason = output.stderr.trim().to_string();
    match output.status {
        Some(SSHPASS_WRONG_PASSWORD) if via_sshpass => Err(Error::AuthenticationError { host: host.to_string(), reason: format!("password rejected: {}", reason) }),
        Some(SSHPASS_HOST_KEY) if via_sshpass => Err(Error::ConnectionError { host: host.to_string(), reason: format!("host key unknown or changed: {}", reason) }),
        Some(SSH_FAILURE) => {
            let lowered = reason.to_lowercase();
            if lowered.contains("permission denied") || lowered.contains("authentication failed") || lowered.contains("too many authentication failures") {
                Err(Error::AuthenticationError { host: host.to_string(), reason })
            } else {
                Err(Error::ConnectionError { host: host.to_string(), reason })
            }
        }
        _ => Ok(output),
    }
}

fn with_status_marker(command: &str, cwd: &str) -> String {
    format!("(cd {} && {}); printf '\\n{}%d\\n' \"$?\"", shell_quote(cwd), command, STATUS_MARKER)
}

/// Strips the status line added by `with_status_marker` and returns the command's own output.
/// `None` when the remote shell never printed it, i.e. the ssh client itself failed.
fn split_status_marker(output: &CommandOutput) -> Option<CommandOutput> {
    let at = output.stdout.rfind(&format!("\n{}", STATUS_MARKER))?;
    let status = output.stdout[at + 1 + STATUS_MARKER.len()..].trim().parse::<i32>().ok()?;
    Some(CommandOutput { stdout: output.stdout[..at].to_string(), stderr: output.stderr.clone(), status: Some(status) })
}
