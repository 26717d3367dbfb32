//! Deadlines, cancellation and bounded retry for backend calls.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Base delay between retry attempts; doubles each attempt.
pub const RETRY_BASE_DELAY: Duration = Duration::from_millis(200);

/// Upper bound on the delay between two attempts.
pub const RETRY_MAX_DELAY: Duration = Duration::from_secs(10);

/// Delay before the attempt following `attempt` (1-based).
pub fn backoff(attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    RETRY_BASE_DELAY.saturating_mul(factor).min(RETRY_MAX_DELAY)
}

/// Why a request stopped before the backend answered.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum Interrupted {
    #[error("request timed out after {0:?}")]
    TimedOut(Duration),

    #[error("request cancelled")]
    Cancelled,
}

/// Deadline and cancellation applied to one request.
#[derive(Debug, Clone)]
pub struct RequestScope {
    pub timeout: Duration,
    pub cancel: CancellationToken,
}

impl RequestScope {
    pub fn new(timeout: Duration, cancel: CancellationToken) -> Self {
        Self { timeout, cancel }
    }

    /// Runs `fut` until it completes, the deadline passes, or the scope is
    /// cancelled, whichever happens first.
    pub async fn run<T, E, F>(&self, fut: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<Interrupted>,
    {
        if self.cancel.is_cancelled() {
            return Err(Interrupted::Cancelled.into());
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Interrupted::Cancelled.into()),
            outcome = tokio::time::timeout(self.timeout, fut) => match outcome {
                Ok(result) => result,
                Err(_) => Err(Interrupted::TimedOut(self.timeout).into()),
            },
        }
    }

    /// Like [`run`](Self::run), retrying up to `attempts` times with
    /// exponential backoff while `retryable` says so.
    ///
    /// Only use for idempotent operations.
    pub async fn run_with_retry<T, E, F, Fut>(
        &self,
        attempts: u32,
        retryable: impl Fn(&E) -> bool,
        mut op: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<Interrupted> + std::fmt::Display,
    {
        let attempts = attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.run(op()).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < attempts && retryable(&e) => {
                    let delay = backoff(attempt);
                    debug!(attempt, error = %e, ?delay, "retrying request");
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(Interrupted::Cancelled.into()),
                        _ = sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}
