use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPhase {
    /// Waiting for a pool slot.
    Pending,
    Running,
    Finished,
    Cancelled,
}

impl TaskPhase {
    pub fn is_done(&self) -> bool {
        matches!(self, TaskPhase::Finished | TaskPhase::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The task never started and never will.
    Cancelled,
    AlreadyRunning,
    AlreadyFinished,
}

/// Bounded pool: at most `size` submitted tasks run at the same time.
#[derive(Debug, Clone)]
pub struct TaskPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl TaskPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        TaskPool { permits: Arc::new(Semaphore::new(size)), size }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn submit<F>(&self, task: F) -> TaskHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let phase = Arc::new(watch::Sender::new(TaskPhase::Pending));
        let permits = self.permits.clone();
        let task_phase = phase.clone();

        let join = tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            let started = task_phase.send_if_modified(|p| {
                if *p == TaskPhase::Pending {
                    *p = TaskPhase::Running;
                    true
                } else {
                    false
                }
            });
            if !started {
                return;
            }

            let _finish = FinishOnDrop(task_phase);
            task.await;
        });

        TaskHandle { phase, join }
    }
}

/// Marks the task finished even when it panics.
struct FinishOnDrop(Arc<watch::Sender<TaskPhase>>);

impl Drop for FinishOnDrop {
    fn drop(&mut self) {
        self.0.send_replace(TaskPhase::Finished);
    }
}

/// Tracks one submitted task.
#[derive(Debug)]
pub struct TaskHandle {
    phase: Arc<watch::Sender<TaskPhase>>,
    join: JoinHandle<()>,
}

impl TaskHandle {
    pub fn phase(&self) -> TaskPhase {
        *self.phase.borrow()
    }

    pub fn is_started(&self) -> bool {
        self.phase() != TaskPhase::Pending
    }

    pub fn is_done(&self) -> bool {
        self.phase().is_done()
    }

    /// Cancellation is cooperative: only a task still waiting for a slot can be stopped.
    pub fn cancel(&self) -> CancelOutcome {
        let cancelled = self.phase.send_if_modified(|p| {
            if *p == TaskPhase::Pending {
                *p = TaskPhase::Cancelled;
                true
            } else {
                false
            }
        });
        if cancelled {
            self.join.abort();
            return CancelOutcome::Cancelled;
        }

        match self.phase() {
            TaskPhase::Running => CancelOutcome::AlreadyRunning,
            TaskPhase::Cancelled => CancelOutcome::Cancelled,
            TaskPhase::Pending | TaskPhase::Finished => CancelOutcome::AlreadyFinished,
        }
    }

    pub async fn wait(&self) {
        let mut rx = self.phase.subscribe();
        // The sender lives in `self`, so the channel can not close while we wait.
        let _ = rx.wait_for(|p| p.is_done()).await;
    }
}
