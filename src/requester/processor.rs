//! Per-task state machine: `new → in_process → {done | error}`

use super::dispatch::TaskExecutor;
use crate::metrics::RequesterMetrics;
use crate::store::TaskStore;
use crate::types::{Event, Task, TaskStatus};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::Instrument;

/// How a single delivery of a task ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The response was stored and the task is `done`
    Done,
    /// Dispatch failed and the task is `error`
    Failed,
    /// The `in_process` write failed; nothing was dispatched and the task stays `new`
    Aborted,
    /// The terminal write failed after the request was handled
    ///
    /// The task stays `in_process` until a redelivery records it.
    Unrecorded,
}

impl TaskOutcome {
    /// Every outcome, in label order
    pub const ALL: [TaskOutcome; 4] = [
        TaskOutcome::Done,
        TaskOutcome::Failed,
        TaskOutcome::Aborted,
        TaskOutcome::Unrecorded,
    ];

    /// Label value used in metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskOutcome::Done => "done",
            TaskOutcome::Failed => "failed",
            TaskOutcome::Aborted => "aborted",
            TaskOutcome::Unrecorded => "unrecorded",
        }
    }
}

/// Drives one task through its lifecycle
///
/// Every store write is an idempotent overwrite, so processing the same task
/// twice (a broker redelivery) converges on the same record.
pub struct TaskProcessor {
    store: Arc<dyn TaskStore>,
    executor: Arc<dyn TaskExecutor>,
    metrics: Arc<RequesterMetrics>,
    event_tx: broadcast::Sender<Event>,
}

impl TaskProcessor {
    /// Create a processor over shared collaborators
    pub fn new(
        store: Arc<dyn TaskStore>,
        executor: Arc<dyn TaskExecutor>,
        metrics: Arc<RequesterMetrics>,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            store,
            executor,
            metrics,
            event_tx,
        }
    }

    /// Process one delivery of `task`
    pub async fn process(&self, task: Task) -> TaskOutcome {
        let span = tracing::info_span!("task", task_id = %task.id);
        let started = Instant::now();

        let outcome = self.run(task).instrument(span).await;

        self.metrics.task_finished(outcome, started.elapsed());
        outcome
    }

    async fn run(&self, task: Task) -> TaskOutcome {
        let id = task.id;

        if let Err(e) = self.store.update_task_status(id, TaskStatus::InProcess).await {
            tracing::error!(
                status = %TaskStatus::InProcess,
                error = %e,
                "Failed to update task status, not dispatching"
            );
            let _ = self.event_tx.send(Event::TaskAborted {
                id,
                error: e.to_string(),
            });
            return TaskOutcome::Aborted;
        }
        let _ = self.event_tx.send(Event::TaskStarted { id });

        match self.executor.execute(&task).await {
            Ok(result) => {
                let status_code = result.status_code.unwrap_or_default();
                let content_length = result.content_length;

                if let Err(e) = self.store.update_task_result(&result).await {
                    tracing::error!(error = %e, "Failed to store task result");
                    return TaskOutcome::Unrecorded;
                }

                tracing::info!(status_code, content_length, "Task completed");
                let _ = self.event_tx.send(Event::TaskCompleted {
                    id,
                    status_code,
                    content_length,
                });
                TaskOutcome::Done
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to execute task");
                let _ = self.event_tx.send(Event::TaskFailed {
                    id,
                    error: e.to_string(),
                });

                if let Err(store_err) = self.store.update_task_status(id, TaskStatus::Error).await {
                    tracing::error!(
                        status = %TaskStatus::Error,
                        error = %store_err,
                        "Failed to update task status"
                    );
                    return TaskOutcome::Unrecorded;
                }
                TaskOutcome::Failed
            }
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{FakeExecutor, MemoryStore, StoreFault, sample_task};
    use crate::types::TaskResult;

    struct Harness {
        store: Arc<MemoryStore>,
        executor: Arc<FakeExecutor>,
        metrics: Arc<RequesterMetrics>,
        events: broadcast::Receiver<Event>,
        processor: TaskProcessor,
    }

    fn harness(executor: FakeExecutor) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let executor = Arc::new(executor);
        let metrics = Arc::new(RequesterMetrics::new().unwrap());
        let (event_tx, events) = broadcast::channel(64);
        let processor = TaskProcessor::new(
            store.clone(),
            executor.clone(),
            metrics.clone(),
            event_tx,
        );
        Harness {
            store,
            executor,
            metrics,
            events,
            processor,
        }
    }

    #[tokio::test]
    async fn test_successful_dispatch_ends_done_with_full_result() {
        let mut h = harness(FakeExecutor::responding(200, "pong"));
        let task = sample_task();
        h.store.seed_new(task.id);

        let outcome = h.processor.process(task.clone()).await;

        assert_eq!(outcome, TaskOutcome::Done);
        let record = h.store.record(task.id).unwrap();
        assert_eq!(record.status, TaskStatus::Done);
        assert_eq!(record.status_code, Some(200));
        assert_eq!(record.body, b"pong");
        assert_eq!(
            h.store.status_history(task.id),
            vec![TaskStatus::New, TaskStatus::InProcess, TaskStatus::Done]
        );
        assert_eq!(h.executor.calls(), 1);
        assert_eq!(h.metrics.snapshot(0).done, 1);

        assert!(matches!(h.events.recv().await.unwrap(), Event::TaskStarted { .. }));
        assert!(matches!(
            h.events.recv().await.unwrap(),
            Event::TaskCompleted { status_code: 200, .. }
        ));
    }

    #[tokio::test]
    async fn test_failed_dispatch_ends_error() {
        let h = harness(FakeExecutor::failing());
        let task = sample_task();
        h.store.seed_new(task.id);

        let outcome = h.processor.process(task.clone()).await;

        assert_eq!(outcome, TaskOutcome::Failed);
        assert_eq!(
            h.store.status_history(task.id),
            vec![TaskStatus::New, TaskStatus::InProcess, TaskStatus::Error]
        );
        assert_eq!(h.store.record(task.id).unwrap().status_code, None);
        assert_eq!(h.metrics.snapshot(0).failed, 1);
    }

    #[tokio::test]
    async fn test_in_process_write_failure_aborts_without_dispatch() {
        let h = harness(FakeExecutor::responding(200, ""));
        let task = sample_task();
        h.store.seed_new(task.id);
        h.store.fail_on(StoreFault::Status(TaskStatus::InProcess));

        let outcome = h.processor.process(task.clone()).await;

        assert_eq!(outcome, TaskOutcome::Aborted);
        assert_eq!(h.executor.calls(), 0, "must not dispatch");
        assert_eq!(h.store.record(task.id).unwrap().status, TaskStatus::New);
        assert_eq!(h.metrics.snapshot(0).aborted, 1);
    }

    #[tokio::test]
    async fn test_result_write_failure_leaves_task_in_process() {
        let h = harness(FakeExecutor::responding(200, "ok"));
        let task = sample_task();
        h.store.seed_new(task.id);
        h.store.fail_on(StoreFault::Result);

        let outcome = h.processor.process(task.clone()).await;

        assert_eq!(outcome, TaskOutcome::Unrecorded);
        assert_eq!(h.executor.calls(), 1);
        assert_eq!(h.store.record(task.id).unwrap().status, TaskStatus::InProcess);
    }

    #[tokio::test]
    async fn test_error_write_failure_is_swallowed() {
        let h = harness(FakeExecutor::failing());
        let task = sample_task();
        h.store.seed_new(task.id);
        h.store.fail_on(StoreFault::Status(TaskStatus::Error));

        let outcome = h.processor.process(task.clone()).await;

        assert_eq!(outcome, TaskOutcome::Unrecorded);
        assert_eq!(h.store.record(task.id).unwrap().status, TaskStatus::InProcess);
    }

    #[tokio::test]
    async fn test_redelivery_converges_on_the_same_terminal_record() {
        let h = harness(FakeExecutor::responding(201, "same"));
        let task = sample_task();
        h.store.seed_new(task.id);

        assert_eq!(h.processor.process(task.clone()).await, TaskOutcome::Done);
        let first: TaskResult = h.store.record(task.id).unwrap();
        assert_eq!(h.processor.process(task.clone()).await, TaskOutcome::Done);
        let second = h.store.record(task.id).unwrap();

        assert_eq!(first, second);
        assert_eq!(second.status, TaskStatus::Done);
        assert_eq!(h.executor.calls(), 2);
    }
}
