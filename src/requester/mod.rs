//! Task consumer: subscription loop, worker pool and per-task processing
//!
//! [`RequesterService`] owns the whole consumer lifecycle. [`run`](RequesterService::run)
//! subscribes to the queue and feeds every delivered task to a bounded
//! [`WorkerPool`]; [`close`](RequesterService::close) stops deliveries, drains the
//! pool and then releases the store and queue handles.

mod dispatch;
mod pool;
mod processor;

pub use dispatch::{HttpExecutor, TaskExecutor};
pub use pool::WorkerPool;
pub use processor::{TaskOutcome, TaskProcessor};

use crate::config::RequesterConfig;
use crate::metrics::{MetricsSnapshot, RequesterMetrics};
use crate::queue::{Subscription, TaskReceiver};
use crate::store::TaskStore;
use crate::types::{Event, Task, TaskStatus};
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Consumer side of the pipeline
pub struct RequesterService {
    store: Arc<dyn TaskStore>,
    receiver: Arc<dyn TaskReceiver>,
    pool: Arc<WorkerPool>,
    processor: Arc<TaskProcessor>,
    metrics: Arc<RequesterMetrics>,
    event_tx: broadcast::Sender<Event>,
    handoff_capacity: usize,
    shutdown: CancellationToken,
    subscription: Mutex<Option<Subscription>>,
    /// Held by the run loop until its handoff channel is drained
    running: TaskTracker,
    draining: AtomicBool,
    closed: AtomicBool,
}

impl RequesterService {
    /// Wire a service from its collaborators
    ///
    /// Metrics and the event channel are owned by the caller so they can be
    /// shared with the HTTP surface.
    pub fn new(
        config: &RequesterConfig,
        store: Arc<dyn TaskStore>,
        receiver: Arc<dyn TaskReceiver>,
        executor: Arc<dyn TaskExecutor>,
        metrics: Arc<RequesterMetrics>,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        let processor = Arc::new(TaskProcessor::new(
            store.clone(),
            executor,
            metrics.clone(),
            event_tx.clone(),
        ));

        Self {
            store,
            receiver,
            pool: Arc::new(WorkerPool::new(config.workers)),
            processor,
            metrics,
            event_tx,
            handoff_capacity: config.handoff_capacity(),
            shutdown: CancellationToken::new(),
            subscription: Mutex::new(None),
            running: TaskTracker::new(),
            draining: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Subscribe to the queue and dispatch tasks until [`close`](Self::close)
    ///
    /// Returns once shutdown starts or the subscription ends on its own.
    /// Tasks arriving while every worker is busy are logged and dropped.
    /// Tasks still buffered in the handoff channel at shutdown were already
    /// acknowledged by the queue, so each one is dispatched once more and
    /// either runs or is counted as rejected.
    ///
    /// # Errors
    ///
    /// Fails if the subscription cannot be established or the service is
    /// already running.
    pub async fn run(&self) -> Result<()> {
        let (tx, mut rx) = mpsc::channel::<Task>(self.handoff_capacity);

        let _running = {
            let mut slot = self.subscription.lock().await;
            if slot.is_some() {
                return Err(Error::Other("requester is already running".into()));
            }
            if self.shutdown.is_cancelled() {
                return Err(Error::ShuttingDown);
            }
            let running = self.running.token();
            *slot = Some(self.receiver.subscribe(tx).await?);
            running
        };

        tracing::info!(
            workers = self.pool.size(),
            handoff_capacity = self.handoff_capacity,
            "Requester started"
        );

        loop {
            let task = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                task = rx.recv() => match task {
                    Some(task) => task,
                    None => {
                        tracing::warn!("Subscription ended, requester stops receiving tasks");
                        break;
                    }
                },
            };

            self.dispatch(task);
        }

        self.drain_handoff(&mut rx).await;
        Ok(())
    }

    /// Dispatch whatever is still buffered between the subscription and the pool
    async fn drain_handoff(&self, rx: &mut mpsc::Receiver<Task>) {
        rx.close();

        let mut leftover = 0usize;
        while let Some(task) = rx.recv().await {
            leftover += 1;
            self.dispatch(task);
        }
        if leftover > 0 {
            tracing::info!(leftover, "Dispatched tasks buffered at shutdown");
        }
    }

    fn dispatch(&self, task: Task) {
        let id = task.id;
        tracing::debug!(task_id = %id, "Task received");
        let _ = self.event_tx.send(Event::TaskReceived { id });

        let processor = self.processor.clone();
        match self.pool.submit(async move {
            processor.process(task).await;
        }) {
            Ok(()) => self.metrics.task_started(),
            Err(e) => {
                tracing::warn!(task_id = %id, error = %e, "Task rejected");
                self.metrics.task_rejected();
                let _ = self.event_tx.send(Event::TaskRejected {
                    id,
                    reason: e.to_string(),
                });
            }
        }
    }

    /// Stop taking tasks and wait for the ones already taken
    ///
    /// Cancels the subscription, waits for the run loop to hand off every
    /// buffered task, then waits for every in-flight task. The store and
    /// the queue stay open, so the monitoring API can keep reading them.
    /// Concurrent and repeated calls wait for the same drain.
    pub async fn drain(&self) {
        if !self.draining.swap(true, Ordering::SeqCst) {
            tracing::info!("Initiating requester shutdown");
            self.shutdown.cancel();
            let _ = self.event_tx.send(Event::Shutdown);
        }

        // 1. Stop deliveries
        let subscription = self.subscription.lock().await.take();
        if let Some(subscription) = subscription {
            subscription.join().await;
        }
        self.running.close();
        self.running.wait().await;

        // 2. Drain workers
        self.pool.stop_and_wait().await;
        tracing::info!("All in-flight tasks finished");
    }

    /// Stop the service
    ///
    /// [`drain`](Self::drain)s, then closes the store and the queue. Both
    /// closes are attempted even if one fails; failures are returned
    /// together as [`Error::Close`]. Only the first call does any work.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.drain().await;

        // 3. Release handles
        let (store_result, receiver_result) =
            futures::join!(self.store.close(), self.receiver.close());

        let errors: Vec<Error> = [store_result, receiver_result]
            .into_iter()
            .filter_map(|r| r.err())
            .collect();
        for e in &errors {
            tracing::error!(error = %e, "Failed to release resource during shutdown");
        }

        if errors.is_empty() {
            tracing::info!("Requester shutdown complete");
            Ok(())
        } else {
            Err(Error::Close(errors))
        }
    }

    /// Current counters, including workers in flight
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot(self.pool.active())
    }

    /// Encode this requester's metrics for a Prometheus scrape
    ///
    /// `stored` holds the record counts per status read from the store.
    pub fn render_metrics(&self, stored: &HashMap<TaskStatus, i64>) -> Result<String> {
        self.metrics.render(self.pool.active(), stored)
    }

    /// The worker pool
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }
}
