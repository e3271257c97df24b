// src/fetch/barrier.rs
use anyhow::Result;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::ExtractError;
use crate::remote::{list_all_jobs, JobStatus, SessionCell};
use crate::retry::{retry_until_success, RetryPolicy};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarrierReport {
    pub polls: u32,
    pub elapsed: Duration,
    pub completed: usize,
    pub failed: usize,
}

/// Blocks until no job in the user's overview is still pending.
///
/// Job identities are not tracked: every poll reads the whole overview,
/// across all pages, and the barrier opens on the first snapshot without a
/// non-terminal job.
#[derive(Debug, Clone)]
pub struct JobCompletionBarrier {
    poll_interval: Duration,
    list_policy: RetryPolicy,
}

impl Default for JobCompletionBarrier {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl JobCompletionBarrier {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            list_policy: RetryPolicy::fixed(poll_interval),
        }
    }

    pub fn with_list_policy(mut self, policy: RetryPolicy) -> Self {
        self.list_policy = policy;
        self
    }

    #[tracing::instrument(level = "info", skip_all)]
    pub async fn await_all(
        &self,
        session: &SessionCell,
        cancel: &CancellationToken,
    ) -> Result<BarrierReport> {
        let start = Instant::now();
        let mut polls = 0;

        loop {
            polls += 1;
            let jobs = retry_until_success("list jobs", &self.list_policy, cancel, |_| async move {
                let mut session = session.lock().await;
                list_all_jobs(&mut **session).await
            })
            .await?;

            let pending = jobs.iter().filter(|j| !j.status.is_terminal()).count();
            if pending == 0 {
                let failed = jobs.iter().filter(|j| j.status == JobStatus::Failed).count();
                let report = BarrierReport {
                    polls,
                    elapsed: start.elapsed(),
                    completed: jobs.len() - failed,
                    failed,
                };
                info!(
                    polls,
                    completed = report.completed,
                    failed,
                    elapsed = ?report.elapsed,
                    "all background jobs finished"
                );
                return Ok(report);
            }

            info!(polls, pending, total = jobs.len(), "waiting for background jobs");
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(ExtractError::Cancelled {
                        operation: "await job completion".to_string(),
                    }
                    .into());
                }
                _ = sleep(self.poll_interval) => {}
            }
        }
    }
}
