//! Requester metrics on a Prometheus registry
//!
//! Served in the text exposition format by the requester's `/metrics`
//! endpoint. Each [`RequesterMetrics`] owns its registry so several services
//! can live in one process.

use crate::requester::TaskOutcome;
use crate::types::TaskStatus;
use crate::Result;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use std::collections::HashMap;
use std::time::Duration;

/// Upper bounds (seconds) of the execution-duration buckets
pub const DURATION_BUCKETS: [f64; 6] = [0.1, 0.5, 1.0, 5.0, 10.0, 30.0];

/// Content type of [`RequesterMetrics::render`]
pub const CONTENT_TYPE: &str = prometheus::TEXT_FORMAT;

/// Instruments shared by the run loop and the task processor
#[derive(Clone, Debug)]
pub struct RequesterMetrics {
    registry: Registry,
    started: IntCounter,
    rejected: IntCounter,
    execute_duration: HistogramVec,
    in_flight: IntGauge,
    stored_tasks: IntGaugeVec,
}

impl RequesterMetrics {
    /// Create the instruments and register them on a fresh registry
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let started = IntCounter::with_opts(Opts::new(
            "requester_tasks_started",
            "Total number of tasks successfully started",
        ))?;
        let rejected = IntCounter::with_opts(Opts::new(
            "requester_tasks_rejected",
            "Total number of tasks rejected because every worker was busy",
        ))?;
        let execute_duration = HistogramVec::new(
            HistogramOpts::new(
                "requester_task_execute_duration",
                "Duration of task execution in seconds",
            )
            .buckets(DURATION_BUCKETS.to_vec()),
            &["task_result_status"],
        )?;
        let in_flight = IntGauge::with_opts(Opts::new(
            "requester_workers_in_flight",
            "Workers currently executing a task",
        ))?;
        let stored_tasks = IntGaugeVec::new(
            Opts::new("requester_stored_tasks", "Stored task records by status"),
            &["status"],
        )?;

        registry.register(Box::new(started.clone()))?;
        registry.register(Box::new(rejected.clone()))?;
        registry.register(Box::new(execute_duration.clone()))?;
        registry.register(Box::new(in_flight.clone()))?;
        registry.register(Box::new(stored_tasks.clone()))?;

        // Every outcome series is exported from the start, even at zero
        for outcome in TaskOutcome::ALL {
            execute_duration.with_label_values(&[outcome.as_str()]);
        }

        Ok(Self {
            registry,
            started,
            rejected,
            execute_duration,
            in_flight,
            stored_tasks,
        })
    }

    /// A task was admitted by the worker pool
    pub fn task_started(&self) {
        self.started.inc();
    }

    /// A task was refused by the worker pool
    pub fn task_rejected(&self) {
        self.rejected.inc();
    }

    /// A task finished processing with `outcome` after `elapsed`
    pub fn task_finished(&self, outcome: TaskOutcome, elapsed: Duration) {
        self.execute_duration
            .with_label_values(&[outcome.as_str()])
            .observe(elapsed.as_secs_f64());
    }

    /// Point-in-time copy of every counter
    ///
    /// `in_flight` is supplied by the caller from the worker pool.
    pub fn snapshot(&self, in_flight: usize) -> MetricsSnapshot {
        let finished = |outcome: TaskOutcome| {
            self.execute_duration
                .with_label_values(&[outcome.as_str()])
                .get_sample_count()
        };

        MetricsSnapshot {
            started: self.started.get(),
            rejected: self.rejected.get(),
            done: finished(TaskOutcome::Done),
            failed: finished(TaskOutcome::Failed),
            aborted: finished(TaskOutcome::Aborted),
            unrecorded: finished(TaskOutcome::Unrecorded),
            in_flight,
        }
    }

    /// Encode the registry in the Prometheus text format
    ///
    /// Gauges that are read rather than tracked (`in_flight` and the stored
    /// task counts) are set just before encoding.
    pub fn render(&self, in_flight: usize, stored: &HashMap<TaskStatus, i64>) -> Result<String> {
        self.in_flight.set(i64::try_from(in_flight).unwrap_or(i64::MAX));
        for (status, count) in stored {
            self.stored_tasks
                .with_label_values(&[status.as_str()])
                .set(*count);
        }

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| crate::Error::Other(format!("metrics are not valid UTF-8: {}", e)))
    }
}

/// Counter values of one requester
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Tasks admitted by the pool
    pub started: u64,
    /// Tasks refused because every worker was busy
    pub rejected: u64,
    /// Tasks finished with a stored result
    pub done: u64,
    /// Tasks whose dispatch failed
    pub failed: u64,
    /// Tasks not dispatched because the in-process write failed
    pub aborted: u64,
    /// Tasks whose terminal write failed
    pub unrecorded: u64,
    /// Workers currently executing a task
    pub in_flight: usize,
}
