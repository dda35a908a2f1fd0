use async_trait::async_trait;
use futures::StreamExt;
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::codec::{FramedRead, LinesCodec};

/// Output of one command on the remote side. A nonzero `status` is not an error at this level.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub status: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Shell and file transfer primitives of one computer.
///
/// Remote paths are plain strings in the remote host's syntax.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    async fn open(&self) -> crate::error::Result<()>;

    async fn close(&self) -> crate::error::Result<()>;

    async fn upload(&self, local: &Path, remote: &str) -> crate::error::Result<()>;

    async fn download(&self, remote: &str, local: &Path) -> crate::error::Result<()>;

    /// Creates `remote` and missing parents; an existing directory is not an error.
    async fn mkdir(&self, remote: &str) -> crate::error::Result<()>;

    async fn remove(&self, remote: &str, recursive: bool) -> crate::error::Result<()>;

    async fn exec(&self, command: &str, cwd: &str) -> crate::error::Result<CommandOutput>;
}

/// Runs `cmd` to completion. Stderr is read line by line and logged under `label` while stdout is
/// collected.
pub(crate) async fn run_process(mut cmd: Command, label: &str) -> std::io::Result<CommandOutput> {
    cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped()).kill_on_drop(true);
    let mut child = cmd.spawn()?;

    let mut stdout_pipe = child.stdout.take();
    let stderr_pipe = child.stderr.take();

    let read_stdout = async {
        let mut stdout = Vec::new();
        if let Some(pipe) = stdout_pipe.as_mut() {
            pipe.read_to_end(&mut stdout).await?;
        }
        Ok::<_, std::io::Error>(String::from_utf8_lossy(&stdout).into_owned())
    };

    let read_stderr = async {
        let mut lines = Vec::new();
        if let Some(pipe) = stderr_pipe {
            let mut framed = FramedRead::new(pipe, LinesCodec::new());
            while let Some(line) = framed.next().await {
                match line {
                    Ok(line) => {
                        log::debug!("[{}] stderr: {}", label, line);
                        lines.push(line);
                    }
                    Err(e) => {
                        log::warn!("[{}] could not decode stderr: {}", label, e);
                        break;
                    }
                }
            }
        }
        lines.join("\n")
    };

    let (stdout, stderr) = tokio::join!(read_stdout, read_stderr);
    let status = child.wait().await?;

    Ok(CommandOutput { stdout: stdout?, stderr, status: status.code() })
}
