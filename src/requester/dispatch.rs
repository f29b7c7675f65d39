//! Outbound HTTP dispatch with a fixed attempt budget

use crate::config::RequesterConfig;
use crate::error::DispatchError;
use crate::retry::with_fixed_attempts;
use crate::types::{Headers, Task, TaskResult, TaskStatus};
use crate::{Error, Result};
use async_trait::async_trait;
use std::time::Duration;

/// Executes the HTTP request described by a task
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Perform the request and capture the response as a `done` result
    ///
    /// Any response, whatever its status code, is a success. Errors are
    /// [`Error::Dispatch`]: an exhausted transport budget, a request that
    /// could not be built, or a response body that could not be read.
    async fn execute(&self, task: &Task) -> Result<TaskResult>;
}

/// [`TaskExecutor`] over a shared `reqwest` client
#[derive(Clone, Debug)]
pub struct HttpExecutor {
    client: reqwest::Client,
    attempts: u32,
}

impl HttpExecutor {
    /// Build an executor whose client times out each attempt after `timeout`
    ///
    /// `attempts` is floored to 1.
    pub fn new(timeout: Duration, attempts: u32) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Other(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self::with_client(client, attempts))
    }

    /// Build an executor from the requester configuration
    pub fn from_config(config: &RequesterConfig) -> Result<Self> {
        Self::new(config.http_timeout, config.attempts())
    }

    /// Use an existing client
    pub fn with_client(client: reqwest::Client, attempts: u32) -> Self {
        Self {
            client,
            attempts: attempts.max(1),
        }
    }

    /// Attempts made per task before giving up
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[async_trait]
impl TaskExecutor for HttpExecutor {
    async fn execute(&self, task: &Task) -> Result<TaskResult> {
        let invalid = |reason: String| {
            Error::Dispatch(DispatchError::InvalidRequest {
                task_id: task.id.to_string(),
                reason,
            })
        };

        // Construction errors are not transient; fail before the first attempt
        let url = reqwest::Url::parse(&task.url).map_err(|e| invalid(format!("bad url: {e}")))?;
        let headers = task.headers.to_header_map().map_err(invalid)?;
        let method = reqwest::Method::from(task.method);

        let response = with_fixed_attempts(self.attempts, |attempt| {
            // A fresh request per attempt, so no body is shared between attempts
            let request = self
                .client
                .request(method.clone(), url.clone())
                .headers(headers.clone())
                .body(task.body.clone());
            async move {
                tracing::debug!(attempt, "Sending request");
                request.send().await
            }
        })
        .await
        .map_err(|failure| {
            Error::Dispatch(DispatchError::Transport {
                attempts: failure.attempts,
                source: failure.error,
            })
        })?;

        let status_code = response.status().as_u16();
        let response_headers = Headers::from_header_map(response.headers());
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Dispatch(DispatchError::BodyRead(e)))?
            .to_vec();

        tracing::debug!(status_code, bytes = body.len(), "Response received");

        Ok(TaskResult {
            id: task.id,
            status: TaskStatus::Done,
            status_code: Some(status_code),
            headers: response_headers,
            content_length: body.len() as u64,
            body,
        })
    }
}
