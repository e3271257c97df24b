// src/scheduler/worker.rs
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::period::ReferencePeriod;
use crate::remote::{Session, SessionCell, SessionProvider, TransferChannel};
use crate::retry::{retry_until_success, RetryPolicy};
use crate::scheduler::WorkItem;
use crate::schema::ImportSchema;
use crate::variant::QuerySetup;

#[derive(Debug)]
pub enum WorkerOutcome {
    Completed,
    Failed(anyhow::Error),
    Panicked(String),
}

/// What a worker did before it exited.
#[derive(Debug)]
pub struct WorkerReport {
    pub worker_index: usize,
    /// Sub-batches accepted by the remote host.
    pub submitted: usize,
    pub outcome: WorkerOutcome,
}

impl WorkerReport {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, WorkerOutcome::Completed)
    }
}

/// Launches one worker per non-empty [`WorkItem`], each on its own remote
/// session, and waits for all of them.
#[derive(Clone)]
pub struct JobDistributionScheduler {
    provider: Arc<dyn SessionProvider>,
    setup: Arc<dyn QuerySetup>,
    transfer: TransferChannel,
    system: String,
    submit_policy: RetryPolicy,
    session_policy: RetryPolicy,
}

impl JobDistributionScheduler {
    pub fn new(
        provider: Arc<dyn SessionProvider>,
        setup: Arc<dyn QuerySetup>,
        transfer: TransferChannel,
        system: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            setup,
            transfer,
            system: system.into(),
            submit_policy: RetryPolicy::immediate(),
            session_policy: RetryPolicy::immediate(),
        }
    }

    pub fn with_submit_policy(mut self, policy: RetryPolicy) -> Self {
        self.submit_policy = policy;
        self
    }

    pub fn with_session_policy(mut self, policy: RetryPolicy) -> Self {
        self.session_policy = policy;
        self
    }

    /// Run every non-empty item to completion. Failed or panicked workers
    /// are logged and reported, never restarted.
    #[tracing::instrument(level = "info", skip(self, items, cancel), fields(workers = items.len()))]
    pub async fn launch(
        &self,
        title: &str,
        items: Vec<WorkItem>,
        cancel: &CancellationToken,
    ) -> Vec<WorkerReport> {
        let start = Instant::now();
        let mut handles = Vec::with_capacity(items.len());

        for item in items {
            if item.batch.is_empty() {
                debug!(worker = item.worker_index, "empty partition, not launched");
                continue;
            }
            let worker = self.clone();
            let title = title.to_string();
            let cancel = cancel.clone();
            let index = item.worker_index;
            handles.push((
                index,
                tokio::spawn(async move { worker.run(item, &title, &cancel).await }),
            ));
        }

        let mut reports = Vec::with_capacity(handles.len());
        for (worker_index, handle) in handles {
            let report = match handle.await {
                Ok(report) => report,
                Err(join_err) => WorkerReport {
                    worker_index,
                    submitted: 0,
                    outcome: WorkerOutcome::Panicked(join_err.to_string()),
                },
            };
            match &report.outcome {
                WorkerOutcome::Completed => {
                    info!(worker = worker_index, submitted = report.submitted, "worker finished")
                }
                WorkerOutcome::Failed(e) => {
                    error!(worker = worker_index, submitted = report.submitted, "worker failed: {:#}", e)
                }
                WorkerOutcome::Panicked(msg) => {
                    error!(worker = worker_index, "worker panicked: {}", msg)
                }
            }
            reports.push(report);
        }

        info!(
            submitted = reports.iter().map(|r| r.submitted).sum::<usize>(),
            elapsed = ?start.elapsed(),
            "all workers joined"
        );
        reports
    }

    async fn run(&self, item: WorkItem, title: &str, cancel: &CancellationToken) -> WorkerReport {
        let mut submitted = 0;
        let outcome = match self.submit_all(&item, title, cancel, &mut submitted).await {
            Ok(()) => WorkerOutcome::Completed,
            Err(e) => WorkerOutcome::Failed(e),
        };
        WorkerReport {
            worker_index: item.worker_index,
            submitted,
            outcome,
        }
    }

    async fn submit_all(
        &self,
        item: &WorkItem,
        title: &str,
        cancel: &CancellationToken,
        submitted: &mut usize,
    ) -> Result<()> {
        let number = item.session_number();
        let provider = &self.provider;
        let system = self.system.as_str();
        let session = retry_until_success("open session", &self.session_policy, cancel, move |_| {
            provider.session(system, number)
        })
        .await
        .with_context(|| format!("opening session {number} of {system}"))?;
        let session = SessionCell::new(session);

        for batch in item.sub_batches() {
            let session = &session;
            retry_until_success("submit background job", &self.submit_policy, cancel, |attempt| async move {
                let mut guard = session.lock().await;
                let session: &mut dyn Session = &mut **guard;
                if attempt > 1 {
                    warn!(session = session.name(), size = batch.len(), attempt, "resubmitting batch");
                }
                submit_batch(
                    session,
                    self.setup.as_ref(),
                    &self.transfer,
                    &item.schema,
                    batch,
                    &item.period,
                    title,
                )
                .await
            })
            .await?;
            *submitted += 1;
            debug!(worker = item.worker_index, size = batch.len(), "batch submitted");
        }
        Ok(())
    }
}

/// One submission unit: fresh transaction, saved variant, query setup,
/// background job.
async fn submit_batch(
    session: &mut dyn Session,
    setup: &dyn QuerySetup,
    transfer: &TransferChannel,
    schema: &ImportSchema,
    batch: &[String],
    period: &ReferencePeriod,
    title: &str,
) -> Result<()> {
    session
        .start_transaction(setup.transaction())
        .await
        .with_context(|| format!("starting {}", setup.transaction()))?;
    if setup.loads_variant() {
        session
            .load_variant(schema.variant())
            .await
            .with_context(|| format!("loading variant {}", schema.variant()))?;
    }
    setup
        .initialize_query(session, transfer, batch, period)
        .await
        .context("initializing query")?;
    session
        .submit_background_job(title)
        .await
        .context("scheduling background job")
}
