//! Bounded worker pool with non-blocking admission

use crate::{Error, Result};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Semaphore, TryAcquireError};
use tokio_util::task::TaskTracker;

/// Runs at most `size` futures at a time and refuses work beyond that
///
/// There is no internal backlog: [`submit`](Self::submit) either starts the
/// work on a free worker slot or fails immediately. The caller (the
/// subscription loop) must never block on a saturated pool.
#[derive(Debug)]
pub struct WorkerPool {
    /// One permit per worker slot
    slots: Arc<Semaphore>,
    /// Tracks in-flight workers so shutdown can wait for them
    tracker: TaskTracker,
    /// Cleared once shutdown starts
    accepting_new: AtomicBool,
    size: usize,
}

impl WorkerPool {
    /// Create a pool with `size` worker slots (at least one)
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            slots: Arc::new(Semaphore::new(size)),
            tracker: TaskTracker::new(),
            accepting_new: AtomicBool::new(true),
            size,
        }
    }

    /// Number of worker slots
    pub fn size(&self) -> usize {
        self.size
    }

    /// Workers currently executing
    pub fn active(&self) -> usize {
        self.tracker.len()
    }

    /// True until [`stop_and_wait`](Self::stop_and_wait) has been called
    pub fn is_accepting(&self) -> bool {
        self.accepting_new.load(Ordering::SeqCst)
    }

    /// Start `work` on a free worker
    ///
    /// # Errors
    ///
    /// - [`Error::Rejected`] when every worker is busy
    /// - [`Error::ShuttingDown`] once shutdown has started
    pub fn submit<F>(&self, work: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if !self.is_accepting() {
            return Err(Error::ShuttingDown);
        }

        let permit = self.slots.clone().try_acquire_owned().map_err(|e| match e {
            TryAcquireError::NoPermits => Error::Rejected { workers: self.size },
            TryAcquireError::Closed => Error::ShuttingDown,
        })?;

        self.tracker.spawn(async move {
            // Released when the work finishes or unwinds
            let _permit = permit;
            work.await;
        });

        Ok(())
    }

    /// Stop admitting work and wait for every in-flight worker to finish
    ///
    /// In-flight work is never cancelled. Calling this more than once is
    /// harmless; later calls wait for the same drain.
    pub async fn stop_and_wait(&self) {
        self.accepting_new.store(false, Ordering::SeqCst);
        self.slots.close();
        self.tracker.close();

        let in_flight = self.tracker.len();
        if in_flight > 0 {
            tracing::info!(in_flight, "Waiting for in-flight tasks to finish");
        }
        self.tracker.wait().await;
    }
}
