use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::process::Command;

use crate::domain::remote::transport::{CommandOutput, RemoteTransport, run_process};
use crate::error::{Error, Result};

/// "Remote" side on the local filesystem. Remote paths are resolved below `root`; with a root of
/// `/` they are used as they are.
#[derive(Debug, Clone)]
pub struct LocalTransport {
    root: PathBuf,
}

impl LocalTransport {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalTransport { root: root.into() }
    }

    pub fn resolve(&self, remote: &str) -> PathBuf {
        self.root.join(remote.trim_start_matches('/'))
    }
}

#[async_trait]
impl RemoteTransport for LocalTransport {
    async fn open(&self) -> Result<()> {
        match fs::metadata(&self.root).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(Error::ConnectionError { host: "localhost".to_string(), reason: format!("'{}' is not a directory", self.root.display()) }),
            Err(e) => Err(Error::ConnectionError { host: "localhost".to_string(), reason: format!("'{}': {}", self.root.display(), e) }),
        }
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    async fn upload(&self, local: &Path, remote: &str) -> Result<()> {
        let target = self.resolve(remote);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(local, &target).await?;
        Ok(())
    }

    async fn download(&self, remote: &str, local: &Path) -> Result<()> {
        if let Some(parent) = local.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(self.resolve(remote), local).await?;
        Ok(())
    }

    async fn mkdir(&self, remote: &str) -> Result<()> {
        fs::create_dir_all(self.resolve(remote)).await?;
        Ok(())
    }

    async fn remove(&self, remote: &str, recursive: bool) -> Result<()> {
        let target = self.resolve(remote);
        let result = if recursive { fs::remove_dir_all(&target).await } else { fs::remove_file(&target).await };
        match result {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    async fn exec(&self, command: &str, cwd: &str) -> Result<CommandOutput> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command).current_dir(self.resolve(cwd));
        run_process(cmd, "localhost").await.map_err(|e| Error::RemoteExecutionError(format!("could not run '{}': {}", command, e)))
    }
}
