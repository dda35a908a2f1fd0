use actix::prelude::*;
use std::time::Duration;
use tokio::sync::oneshot;

use crate::domain::engine::engine::{Engine, Processed};
use crate::domain::queue::message_queue::{Delivery, MessageQueue};
use crate::domain::utils::id::WorkerName;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Asks the worker to stop after the message it is currently processing.
#[derive(Message)]
#[rtype(result = "()")]
pub struct StopWorker;

/// Number of launch and exposure tasks that are still running.
#[derive(Message)]
#[rtype(result = "usize")]
pub struct ActiveTasks;

/// Drives an `Engine` from its worker queue.
///
/// Messages are acknowledged only after they were applied, so whatever was received but not
/// acknowledged when a previous worker died is redelivered on start.
pub struct WorkerActor {
    engine: Engine,
    queue: MessageQueue,
    worker: WorkerName,
    shutdown: Option<oneshot::Sender<()>>,
}

impl WorkerActor {
    pub fn new(engine: Engine, queue: MessageQueue) -> Self {
        let worker = engine.context().worker.clone();
        WorkerActor { engine, queue, worker, shutdown: None }
    }

    /// `done` fires once the actor stopped.
    pub fn with_shutdown_signal(mut self, done: oneshot::Sender<()>) -> Self {
        self.shutdown = Some(done);
        self
    }
}

impl Actor for WorkerActor {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        let requeued = self.queue.requeue_unacked(&self.worker);
        if requeued > 0 {
            log::info!("[Worker {}] Redelivering {} unacknowledged message(s)", self.worker, requeued);
        }

        self.engine.context().store.touch_worker(&self.worker);
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, _ctx| {
            act.engine.context().store.touch_worker(&act.worker);
        });

        let deliveries = futures::stream::unfold((self.queue.clone(), self.worker.clone()), |(queue, worker)| async move {
            let delivery = queue.receive(&worker).await?;
            Some((delivery, (queue, worker)))
        });
        ctx.add_stream(deliveries);

        log::info!("[Worker {}] Started", self.worker);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        log::info!("[Worker {}] Stopped with {} task(s) still active", self.worker, self.engine.worker_state().active());
        if let Some(done) = self.shutdown.take() {
            let _ = done.send(());
        }
    }
}

impl StreamHandler<Delivery> for WorkerActor {
    fn handle(&mut self, delivery: Delivery, ctx: &mut Self::Context) {
        let outcome = self.engine.process(&delivery.message);
        self.queue.ack(&self.worker, delivery.id);

        if outcome == Processed::Stop {
            ctx.stop();
        }
    }

    fn finished(&mut self, ctx: &mut Self::Context) {
        log::info!("[Worker {}] Queue closed", self.worker);
        ctx.stop();
    }
}

impl Handler<StopWorker> for WorkerActor {
    type Result = ();

    fn handle(&mut self, _msg: StopWorker, ctx: &mut Self::Context) {
        ctx.stop();
    }
}

impl Handler<ActiveTasks> for WorkerActor {
    type Result = usize;

    fn handle(&mut self, _msg: ActiveTasks, _ctx: &mut Self::Context) -> usize {
        self.engine.worker_state().active()
    }
}
