// src/retry.rs
//! Retry-until-success execution for everything that talks to the remote host.
//!
//! The remote system is flaky but eventually consistent, so the default
//! policy never gives up on its own. Callers stop a stuck loop through the
//! run's `CancellationToken`, or opt into a circuit breaker with
//! `max_attempts` / `max_elapsed`.

use anyhow::Result;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{is_fatal, ExtractError};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Fixed pause between attempts. `None` retries immediately.
    pub delay: Option<Duration>,
    pub max_attempts: Option<u32>,
    pub max_elapsed: Option<Duration>,
}

impl RetryPolicy {
    /// Unbounded, immediate retries.
    pub fn immediate() -> Self {
        Self::default()
    }

    /// Unbounded retries with a fixed pause, used by polling-style calls.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Option<Duration>) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_max_elapsed(mut self, max_elapsed: Option<Duration>) -> Self {
        self.max_elapsed = max_elapsed;
        self
    }

    fn exhausted(&self, attempts: u32, started: Instant) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
            || self.max_elapsed.is_some_and(|max| started.elapsed() >= max)
    }
}

/// Run `op` until it succeeds.
///
/// `op` receives the 1-based attempt number. Failures are logged with their
/// cause and discarded; fatal errors (see [`crate::error::is_fatal`]) are
/// returned immediately. Cancellation is checked before every attempt, while
/// an attempt is in flight and during the inter-attempt pause.
pub async fn retry_until_success<T, F, Fut>(
    operation: &str,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let started = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(cancelled(operation));
        }
        attempt += 1;

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled(operation)),
            outcome = op(attempt) => outcome,
        };

        let err = match outcome {
            Ok(value) => {
                if attempt > 1 {
                    info!(operation, attempt, elapsed = ?started.elapsed(), "succeeded after retries");
                }
                return Ok(value);
            }
            Err(err) if is_fatal(&err) => return Err(err),
            Err(err) => err,
        };

        warn!(operation, attempt, "attempt failed: {:#}", err);

        if policy.exhausted(attempt, started) {
            return Err(ExtractError::Exhausted {
                operation: operation.to_string(),
                attempts: attempt,
                last: err,
            }
            .into());
        }

        match policy.delay {
            Some(delay) => {
                debug!(operation, ?delay, "waiting before next attempt");
                tokio::select! {
                    _ = cancel.cancelled() => return Err(cancelled(operation)),
                    _ = sleep(delay) => {}
                }
            }
            None => tokio::task::yield_now().await,
        }
    }
}

fn cancelled(operation: &str) -> anyhow::Error {
    ExtractError::Cancelled {
        operation: operation.to_string(),
    }
    .into()
}
