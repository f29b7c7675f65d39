//! Fixed-budget retry for transient failures
//!
//! Outbound dispatch retries a failed attempt immediately, up to a fixed number
//! of attempts. There is no backoff between attempts: the per-attempt timeout
//! of the HTTP client already bounds how long a single attempt may take.
//!
//! # Example
//!
//! ```no_run
//! use task_relay::retry::{IsRetryable, with_fixed_attempts};
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{:?}", self)
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() -> Result<(), MyError> {
//! let value = with_fixed_attempts(3, |_attempt| async {
//!     Ok::<_, MyError>(())
//! })
//! .await
//! .map_err(|failure| failure.error)?;
//! # Ok(value)
//! # }
//! ```

use crate::error::{DispatchError, Error};
use std::future::Future;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (connection refused, reset, timeout before a response) should return `true`.
/// Permanent failures (malformed request, store errors, a broken response body) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Dispatch(e) => e.is_retryable(),
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
            ),
            // Store, queue, validation and lifecycle errors are terminal for a delivery
            _ => false,
        }
    }
}

impl IsRetryable for DispatchError {
    fn is_retryable(&self) -> bool {
        // A body read failure happens after the target already acted on the request
        matches!(self, DispatchError::Transport { .. })
    }
}

impl IsRetryable for reqwest::Error {
    fn is_retryable(&self) -> bool {
        // Anything raised by `send()` happened before a response was received
        !self.is_builder()
    }
}

/// The final error of a retried operation together with the number of attempts made
#[derive(Debug)]
pub struct RetryFailure<E> {
    /// Attempts performed, including the failing one
    pub attempts: u32,
    /// Error returned by the last attempt
    pub error: E,
}

/// Execute an async operation up to `attempts` times without delay between attempts
///
/// `attempts` is floored to 1, so the operation always runs at least once.
/// The closure receives the 1-based attempt number. A non-retryable error stops
/// the loop immediately; otherwise the error of the last attempt is returned once
/// the budget is exhausted.
pub async fn with_fixed_attempts<F, Fut, T, E>(
    attempts: u32,
    mut operation: F,
) -> Result<T, RetryFailure<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let budget = attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(attempts = attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if e.is_retryable() && attempt < budget => {
                tracing::warn!(
                    error = %e,
                    attempt,
                    max_attempts = budget,
                    "Attempt failed, retrying"
                );
                attempt += 1;
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = attempt,
                        "Operation failed after all attempts exhausted"
                    );
                } else {
                    tracing::error!(
                        error = %e,
                        attempt,
                        "Operation failed with non-retryable error"
                    );
                }
                return Err(RetryFailure { attempts: attempt, error: e });
            }
        }
    }
}
