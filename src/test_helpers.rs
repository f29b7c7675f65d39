//! Shared fakes for unit tests: an in-memory store with injectable faults,
//! a scriptable executor and a recording queue sender.

use crate::error::{DatabaseError, DispatchError};
use crate::queue::TaskSender;
use crate::requester::TaskExecutor;
use crate::store::TaskStore;
use crate::types::{Headers, Method, Task, TaskId, TaskResult, TaskStatus};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::watch;

/// A GET task against a non-routable URL; fakes never dial it
pub(crate) fn sample_task() -> Task {
    Task {
        id: TaskId::new(),
        url: "http://target.invalid/ping".to_string(),
        method: Method::Get,
        headers: Headers::from([("Accept", "text/plain")]),
        body: String::new(),
    }
}

/// Store operation that should fail
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum StoreFault {
    Add,
    Status(TaskStatus),
    Result,
    Close,
}

/// In-memory [`TaskStore`] that records every status a task passes through
#[derive(Default)]
pub(crate) struct MemoryStore {
    records: Mutex<HashMap<TaskId, TaskResult>>,
    history: Mutex<HashMap<TaskId, Vec<TaskStatus>>>,
    faults: Mutex<Vec<StoreFault>>,
    closed: AtomicBool,
}

impl MemoryStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Insert a `new` record as the proxy would have
    pub(crate) fn seed_new(&self, id: TaskId) {
        self.write(TaskResult::with_status(id, TaskStatus::New));
    }

    pub(crate) fn fail_on(&self, fault: StoreFault) {
        self.faults.lock().unwrap().push(fault);
    }

    pub(crate) fn record(&self, id: TaskId) -> Option<TaskResult> {
        self.records.lock().unwrap().get(&id).cloned()
    }

    pub(crate) fn status_history(&self, id: TaskId) -> Vec<TaskStatus> {
        self.history
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn check(&self, fault: StoreFault) -> Result<()> {
        if self.faults.lock().unwrap().contains(&fault) {
            return Err(Error::Database(DatabaseError::QueryFailed(format!(
                "injected failure: {fault:?}"
            ))));
        }
        Ok(())
    }

    fn write(&self, record: TaskResult) {
        let mut history = self.history.lock().unwrap();
        let statuses = history.entry(record.id).or_default();
        if statuses.last() != Some(&record.status) {
            statuses.push(record.status);
        }
        self.records.lock().unwrap().insert(record.id, record);
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn add_task(&self, id: TaskId) -> Result<()> {
        self.check(StoreFault::Add)?;
        if self.records.lock().unwrap().contains_key(&id) {
            return Err(Error::Database(DatabaseError::ConstraintViolation(format!(
                "task {id} already exists"
            ))));
        }
        self.seed_new(id);
        Ok(())
    }

    async fn update_task_status(&self, id: TaskId, status: TaskStatus) -> Result<()> {
        self.check(StoreFault::Status(status))?;
        let existing = self.record(id);
        if let Some(mut record) = existing {
            record.status = status;
            self.write(record);
        }
        Ok(())
    }

    async fn update_task_result(&self, result: &TaskResult) -> Result<()> {
        self.check(StoreFault::Result)?;
        if self.record(result.id).is_some() {
            self.write(result.clone());
        }
        Ok(())
    }

    async fn get_task(&self, id: TaskId) -> Result<TaskResult> {
        self.record(id).ok_or_else(|| Error::NotFound(id.to_string()))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.check(StoreFault::Close)
    }
}

/// Scriptable [`TaskExecutor`]
///
/// A gated executor holds every call until [`release`](Self::release).
pub(crate) struct FakeExecutor {
    reply: Option<(u16, Vec<u8>)>,
    gate: watch::Sender<bool>,
    calls: AtomicU32,
}

impl FakeExecutor {
    pub(crate) fn responding(status_code: u16, body: &str) -> Self {
        Self {
            reply: Some((status_code, body.as_bytes().to_vec())),
            gate: watch::Sender::new(true),
            calls: AtomicU32::new(0),
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            reply: None,
            gate: watch::Sender::new(true),
            calls: AtomicU32::new(0),
        }
    }

    pub(crate) fn gated(status_code: u16, body: &str) -> Self {
        let executor = Self::responding(status_code, body);
        executor.gate.send_replace(false);
        executor
    }

    pub(crate) fn release(&self) {
        self.gate.send_replace(true);
    }

    pub(crate) fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Poll until at least `n` calls have started
    pub(crate) async fn wait_for_calls(&self, n: u32) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.calls() < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("executor was not called in time");
    }
}

#[async_trait]
impl TaskExecutor for FakeExecutor {
    async fn execute(&self, task: &Task) -> Result<TaskResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        match &self.reply {
            Some((status_code, body)) => Ok(TaskResult {
                id: task.id,
                status: TaskStatus::Done,
                status_code: Some(*status_code),
                headers: Headers::from([("Content-Type", "text/plain")]),
                body: body.clone(),
                content_length: body.len() as u64,
            }),
            None => Err(Error::Dispatch(DispatchError::InvalidRequest {
                task_id: task.id.to_string(),
                reason: "simulated dispatch failure".to_string(),
            })),
        }
    }
}

/// [`TaskSender`] that keeps every published task
#[derive(Default)]
pub(crate) struct RecordingSender {
    sent: Mutex<Vec<Task>>,
    fail: AtomicBool,
    closed: AtomicBool,
}

impl RecordingSender {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn failing() -> Self {
        let sender = Self::default();
        sender.fail.store(true, Ordering::SeqCst);
        sender
    }

    pub(crate) fn sent(&self) -> Vec<Task> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskSender for RecordingSender {
    async fn send_task(&self, task: &Task) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Queue("injected publish failure".to_string()));
        }
        self.sent.lock().unwrap().push(task.clone());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Queue("injected close failure".to_string()));
        }
        Ok(())
    }
}
