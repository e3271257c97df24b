// src/remote/mod.rs
//! The narrow contract the orchestrator needs from the remote host.
//!
//! The UI-automation adapter that actually drives the host's screens lives
//! outside this crate and implements [`SessionProvider`] / [`Session`].

pub mod memory;
pub mod transfer;

use anyhow::Result;
use async_trait::async_trait;

pub use transfer::{Clipboard, TransferChannel};

/// Lifecycle of a background job as shown by the job listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Submitted,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Map a status label of the job overview (`Planej.`, `Liber.`,
    /// `Pronto`, `Ativo`, `Concl.`, `Cancel.`, or their English forms).
    pub fn from_label(label: &str) -> Self {
        let label = label.trim().to_uppercase();
        if label.starts_with("CONCL") || label.starts_with("FINISH") {
            JobStatus::Completed
        } else if label.starts_with("CANCEL") || label.starts_with("ABORT") {
            JobStatus::Failed
        } else if label.starts_with("ATIV")
            || label.starts_with("ACTIV")
            || label.starts_with("PRONTO")
            || label.starts_with("READY")
        {
            JobStatus::Running
        } else {
            JobStatus::Submitted
        }
    }
}

/// One line of the job overview.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatusRow {
    pub title: String,
    pub status: JobStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobPage {
    pub jobs: Vec<JobStatusRow>,
    pub has_more: bool,
}

/// A spool request: the remote identifier plus the title the submitter gave
/// the job, which names the extraction that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobRecord {
    pub spool_id: String,
    pub title: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpoolPage {
    pub spools: Vec<JobRecord>,
    pub has_more: bool,
}

/// One connected screen session on the remote host. Sessions are owned by
/// a single worker and never shared.
#[async_trait]
pub trait Session: Send {
    fn name(&self) -> &str;

    async fn start_transaction(&mut self, code: &str) -> Result<()>;
    async fn press(&mut self, path: &str) -> Result<()>;
    async fn select(&mut self, path: &str) -> Result<()>;
    /// `None` when no element exists at `path`.
    async fn text(&mut self, path: &str) -> Result<Option<String>>;
    async fn set_text(&mut self, path: &str, value: &str) -> Result<()>;
    async fn set_selected(&mut self, path: &str, selected: bool) -> Result<()>;

    /// Clear the selection screen and load a saved selection variant.
    async fn load_variant(&mut self, variant: &str) -> Result<()>;
    /// Schedule the current selection as an immediate background job whose
    /// spool request carries `title`.
    async fn submit_background_job(&mut self, title: &str) -> Result<()>;

    /// One page of the current user's job overview.
    async fn list_jobs(&mut self, page: usize) -> Result<JobPage>;
    /// One page of the current user's spool requests.
    async fn list_spools(&mut self, page: usize) -> Result<SpoolPage>;
    /// Export every listed spool request as text into the landing directory.
    async fn export_spools(&mut self) -> Result<()>;
    /// Delete every job of the user; `true` once the overview is empty.
    async fn remove_jobs(&mut self) -> Result<bool>;
    /// Delete every spool request of the user; `true` once none are left.
    async fn remove_spools(&mut self) -> Result<bool>;
}

/// A session shared by the coordinator's sequential stages. Retried
/// operations re-lock it on every attempt.
pub type SessionCell = tokio::sync::Mutex<Box<dyn Session>>;

#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Attach to session `number` (1-based) of `system`.
    async fn session(&self, system: &str, number: u32) -> Result<Box<dyn Session>>;
}

/// Walk every page of the job overview.
pub async fn list_all_jobs(session: &mut dyn Session) -> Result<Vec<JobStatusRow>> {
    let mut jobs = Vec::new();
    let mut page = 0;
    loop {
        let JobPage { jobs: rows, has_more } = session.list_jobs(page).await?;
        jobs.extend(rows);
        if !has_more {
            return Ok(jobs);
        }
        page += 1;
    }
}

/// Walk every page of the spool listing.
pub async fn list_all_spools(session: &mut dyn Session) -> Result<Vec<JobRecord>> {
    let mut spools = Vec::new();
    let mut page = 0;
    loop {
        let SpoolPage { spools: rows, has_more } = session.list_spools(page).await?;
        spools.extend(rows);
        if !has_more {
            return Ok(spools);
        }
        page += 1;
    }
}
