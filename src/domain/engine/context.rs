use std::path::PathBuf;
use std::sync::Arc;

use crate::domain::executor::registry::ExecutorRegistry;
use crate::domain::queue::message::Message;
use crate::domain::queue::message_queue::QueueSender;
use crate::domain::remote::computer::ComputerRegistry;
use crate::domain::store::store::Store;
use crate::domain::utils::id::WorkerName;
use crate::error::Result;

/// Everything a worker and its tasks share. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EngineContext {
    pub worker: WorkerName,
    pub store: Store,
    pub registry: Arc<ExecutorRegistry>,
    pub computers: Arc<ComputerRegistry>,
    pub sender: QueueSender,
    /// Local directory where remote jobs are packaged.
    pub staging_dir: PathBuf,
}

impl EngineContext {
    /// Sends `message` to this worker's queue. A message that could not be encoded is logged and
    /// dropped.
    pub fn emit(&self, message: Result<Message>) {
        match message {
            Ok(message) => {
                log::debug!("[Worker {}] -> {}", self.worker, message);
                self.sender.send(&message);
            }
            Err(e) => log::error!("[Worker {}] Could not encode message: {}", self.worker, e),
        }
    }
}
