use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("File not found or could not be read: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse JSON: {0}")]
    DeserializationError(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Authentication to '{host}' failed: {reason}")]
    AuthenticationError { host: String, reason: String },

    #[error("Could not connect to '{host}': {reason}")]
    ConnectionError { host: String, reason: String },

    #[error("Remote execution failed: {0}")]
    RemoteExecutionError(String),

    #[error("Local file does not exist: {}", .0.display())]
    FileNotFoundError(PathBuf),

    #[error("Input '{socket}' of node '{node}' is not ready: {reason}")]
    InputNotReadyError { node: String, socket: String, reason: String },

    #[error("Node declares argument '{0}' but has no input socket with that name")]
    UnknownSocket(String),

    #[error("Unknown executor '{0}'")]
    UnknownExecutorError(String),

    #[error("Unknown computer '{0}'")]
    UnknownComputer(String),

    #[error("Unknown node '{node}' in nodetree '{nodetree}'")]
    UnknownNode { nodetree: String, node: String },

    #[error("Unknown nodetree '{0}'")]
    UnknownNodeTree(String),

    #[error("Malformed message '{message}': {reason}")]
    MalformedMessage { message: String, reason: String },

    #[error("Invalid value '{value}' for '{field}'")]
    InvalidValue { field: String, value: String },

    #[error("Node '{node}' produced {got} for {expected} output sockets")]
    OutputMismatch { node: String, expected: usize, got: String },

    #[error("Executor of node '{node}' failed: {message}")]
    ExecutorFailed { node: String, message: String },

    #[error("Batch job '{job_id}' did not finish within {secs}s")]
    JobTimeout { job_id: String, secs: u64 },

    #[error("Invalid nodetree '{nodetree}': {reason}")]
    InvalidNodeTree { nodetree: String, reason: String },
}

impl Error {
    /// Transport-level failures that may succeed when tried again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::ConnectionError { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
