use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

use crate::domain::queue::message::Message;
use crate::domain::utils::id::WorkerName;

/// A message handed to a consumer. It stays unacknowledged until `ack` is called with its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub id: u64,
    pub message: String,
}

#[derive(Debug, Default)]
struct WorkerQueue {
    pending: VecDeque<(u64, String)>,
    unacked: BTreeMap<u64, String>,
    next_id: u64,
    closed: bool,
    notify: Arc<Notify>,
}

/// Named per-worker queues with at-least-once delivery.
#[derive(Debug, Clone, Default)]
pub struct MessageQueue {
    queues: Arc<Mutex<HashMap<WorkerName, WorkerQueue>>>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<WorkerName, WorkerQueue>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn send(&self, worker: &WorkerName, message: impl Into<String>) {
        let mut guard = self.lock();
        let queue = guard.entry(worker.clone()).or_default();
        let id = queue.next_id;
        queue.next_id += 1;
        queue.pending.push_back((id, message.into()));
        queue.notify.notify_one();
    }

    /// Waits for the next message. Returns `None` once the queue is closed and drained.
    pub async fn receive(&self, worker: &WorkerName) -> Option<Delivery> {
        loop {
            let notify = {
                let mut guard = self.lock();
                let queue = guard.entry(worker.clone()).or_default();
                if let Some(delivery) = Self::pop(queue) {
                    return Some(delivery);
                }
                if queue.closed {
                    return None;
                }
                queue.notify.clone()
            };
            notify.notified().await;
        }
    }

    pub fn try_receive(&self, worker: &WorkerName) -> Option<Delivery> {
        let mut guard = self.lock();
        Self::pop(guard.entry(worker.clone()).or_default())
    }

    fn pop(queue: &mut WorkerQueue) -> Option<Delivery> {
        let (id, message) = queue.pending.pop_front()?;
        queue.unacked.insert(id, message.clone());
        Some(Delivery { id, message })
    }

    pub fn ack(&self, worker: &WorkerName, delivery_id: u64) -> bool {
        let mut guard = self.lock();
        guard.get_mut(worker).is_some_and(|q| q.unacked.remove(&delivery_id).is_some())
    }

    /// Puts every received but unacknowledged message back in front of the queue, oldest first.
    pub fn requeue_unacked(&self, worker: &WorkerName) -> usize {
        let mut guard = self.lock();
        let Some(queue) = guard.get_mut(worker) else {
            return 0;
        };
        let unacked = std::mem::take(&mut queue.unacked);
        let count = unacked.len();
        for (id, message) in unacked.into_iter().rev() {
            queue.pending.push_front((id, message));
        }
        if count > 0 {
            queue.notify.notify_one();
        }
        count
    }

    /// Number of messages waiting to be received.
    pub fn len(&self, worker: &WorkerName) -> usize {
        self.lock().get(worker).map_or(0, |q| q.pending.len())
    }

    pub fn is_empty(&self, worker: &WorkerName) -> bool {
        self.len(worker) == 0
    }

    /// Wakes a waiting `receive`, which returns `None` once the remaining messages are drained.
    pub fn close(&self, worker: &WorkerName) {
        let mut guard = self.lock();
        let queue = guard.entry(worker.clone()).or_default();
        queue.closed = true;
        queue.notify.notify_one();
    }

    pub fn sender(&self, worker: &WorkerName) -> QueueSender {
        QueueSender { queue: self.clone(), worker: worker.clone() }
    }
}

/// Handle bound to a single worker queue.
#[derive(Debug, Clone)]
pub struct QueueSender {
    queue: MessageQueue,
    worker: WorkerName,
}

impl QueueSender {
    pub fn send(&self, message: &Message) {
        self.queue.send(&self.worker, message.to_string());
    }

    pub fn worker(&self) -> &WorkerName {
        &self.worker
    }
}
