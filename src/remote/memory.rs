// src/remote/memory.rs
//! In-process stand-in for the remote host.
//!
//! Jobs advance one status step each time the job overview is polled from
//! its first page, so a test controls how long the completion barrier
//! waits. Spool requests become visible once their job completes; failed
//! jobs leave none. Faults can be injected for sessions, submissions and
//! exports.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::PathBuf,
    sync::{Arc, Mutex, MutexGuard},
};
use tracing::debug;

use crate::remote::{
    Clipboard, JobPage, JobRecord, JobStatus, JobStatusRow, Session, SessionProvider, SpoolPage,
};

const FIRST_SPOOL_ID: u64 = 56_699_000;

#[derive(Debug, Default)]
pub struct MemoryClipboard(Mutex<String>);

impl Clipboard for MemoryClipboard {
    fn copy(&self, text: &str) -> Result<()> {
        let mut held = self
            .0
            .lock()
            .map_err(|_| anyhow!("clipboard lock poisoned"))?;
        *held = text.to_string();
        Ok(())
    }

    fn paste(&self) -> Result<String> {
        let held = self
            .0
            .lock()
            .map_err(|_| anyhow!("clipboard lock poisoned"))?;
        Ok(held.clone())
    }
}

/// Snapshot of a selection screen at the moment a job was submitted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmittedJob {
    pub session: u32,
    pub title: String,
    pub transaction: Option<String>,
    pub variant: Option<String>,
    pub fields: BTreeMap<String, String>,
    pub selected: BTreeMap<String, bool>,
    /// Text pasted from the clipboard into a bound multi-value dialog.
    pub pasted: Vec<String>,
}

/// Produces the exported text of the spool request a job leaves behind.
pub type SpoolContent = Arc<dyn Fn(&SubmittedJob) -> String + Send + Sync>;

#[derive(Debug, Default, Clone)]
struct Screen {
    transaction: Option<String>,
    variant: Option<String>,
    fields: BTreeMap<String, String>,
    selected: BTreeMap<String, bool>,
    pasted: Vec<String>,
}

#[derive(Debug)]
struct HostJob {
    title: String,
    polls: u32,
    fails: bool,
    removed: bool,
}

#[derive(Debug)]
struct HostSpool {
    id: String,
    title: String,
    job: usize,
    content: String,
    removed: bool,
}

#[derive(Default)]
struct HostState {
    screens: HashMap<u32, Screen>,
    submissions: Vec<SubmittedJob>,
    jobs: Vec<HostJob>,
    spools: Vec<HostSpool>,
    next_spool: u64,
    exports: u32,
    failing_sessions: u32,
    failing_submits: u32,
    short_exports: u32,
    garbled_exports: u32,
    failing_titles: Vec<String>,
}

#[derive(Clone)]
pub struct MemoryHost {
    state: Arc<Mutex<HostState>>,
    clipboard: Arc<MemoryClipboard>,
    landing_dir: PathBuf,
    content: SpoolContent,
    /// Button path -> field that receives the first pasted line.
    paste_bindings: Arc<HashMap<String, String>>,
    polls_to_finish: u32,
    page_size: usize,
}

impl MemoryHost {
    pub fn new(landing_dir: impl Into<PathBuf>) -> Self {
        Self {
            state: Arc::new(Mutex::new(HostState {
                next_spool: FIRST_SPOOL_ID,
                ..HostState::default()
            })),
            clipboard: Arc::new(MemoryClipboard::default()),
            landing_dir: landing_dir.into(),
            content: Arc::new(|_| String::new()),
            paste_bindings: Arc::new(HashMap::new()),
            polls_to_finish: 1,
            page_size: 48,
        }
    }

    /// Number of overview polls a job needs to reach a terminal state.
    pub fn with_polls_to_finish(mut self, polls: u32) -> Self {
        self.polls_to_finish = polls;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_content<F>(mut self, content: F) -> Self
    where
        F: Fn(&SubmittedJob) -> String + Send + Sync + 'static,
    {
        self.content = Arc::new(content);
        self
    }

    /// Pressing `button` pastes the clipboard: every line is recorded and
    /// the first one lands in `field`.
    pub fn with_paste_binding(mut self, button: &str, field: &str) -> Self {
        let mut bindings = (*self.paste_bindings).clone();
        bindings.insert(button.to_string(), field.to_string());
        self.paste_bindings = Arc::new(bindings);
        self
    }

    pub fn clipboard(&self) -> Arc<MemoryClipboard> {
        self.clipboard.clone()
    }

    pub fn fail_next_sessions(&self, count: u32) {
        self.state().failing_sessions = count;
    }

    pub fn fail_next_submissions(&self, count: u32) {
        self.state().failing_submits = count;
    }

    /// The next `count` exports drop one file.
    pub fn short_next_exports(&self, count: u32) {
        self.state().short_exports = count;
    }

    /// The next `count` exports write tables without a recognizable header.
    pub fn garble_next_exports(&self, count: u32) {
        self.state().garbled_exports = count;
    }

    /// Jobs whose title contains `needle` end cancelled.
    pub fn fail_jobs_titled(&self, needle: &str) {
        self.state().failing_titles.push(needle.to_string());
    }

    pub fn submissions(&self) -> Vec<SubmittedJob> {
        self.state().submissions.clone()
    }

    pub fn export_count(&self) -> u32 {
        self.state().exports
    }

    /// Jobs still listed in the overview.
    pub fn live_jobs(&self) -> usize {
        self.state().jobs.iter().filter(|j| !j.removed).count()
    }

    fn state(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn status(&self, job: &HostJob) -> JobStatus {
        if job.polls >= self.polls_to_finish {
            if job.fails {
                JobStatus::Failed
            } else {
                JobStatus::Completed
            }
        } else if job.polls <= 1 {
            JobStatus::Submitted
        } else {
            JobStatus::Running
        }
    }

    fn visible_spools(&self, state: &HostState) -> Vec<JobRecord> {
        state
            .spools
            .iter()
            .filter(|s| !s.removed && self.status(&state.jobs[s.job]) == JobStatus::Completed)
            .map(|s| JobRecord {
                spool_id: s.id.clone(),
                title: s.title.clone(),
            })
            .collect()
    }

    fn page<T: Clone>(&self, items: &[T], page: usize) -> (Vec<T>, bool) {
        let start = page * self.page_size;
        let end = (start + self.page_size).min(items.len());
        let slice = items.get(start..end).unwrap_or_default().to_vec();
        (slice, end < items.len())
    }
}

#[async_trait]
impl SessionProvider for MemoryHost {
    async fn session(&self, system: &str, number: u32) -> Result<Box<dyn Session>> {
        {
            let mut state = self.state();
            if state.failing_sessions > 0 {
                state.failing_sessions -= 1;
                bail!("session {number} of {system} is not available");
            }
            state.screens.entry(number).or_default();
        }
        Ok(Box::new(MemorySession {
            host: self.clone(),
            number,
            name: format!("{system}/ses[{number}]"),
        }))
    }
}

pub struct MemorySession {
    host: MemoryHost,
    number: u32,
    name: String,
}

impl MemorySession {
    fn with_screen<T>(&self, f: impl FnOnce(&mut Screen) -> T) -> T {
        let mut state = self.host.state();
        f(state.screens.entry(self.number).or_default())
    }
}

#[async_trait]
impl Session for MemorySession {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start_transaction(&mut self, code: &str) -> Result<()> {
        self.with_screen(|screen| {
            *screen = Screen {
                transaction: Some(code.to_string()),
                ..Screen::default()
            }
        });
        Ok(())
    }

    async fn press(&mut self, path: &str) -> Result<()> {
        let Some(field) = self.host.paste_bindings.get(path) else {
            return Ok(());
        };
        let pasted = self.host.clipboard.paste()?;
        let lines: Vec<String> = pasted.lines().map(str::to_string).collect();
        self.with_screen(|screen| {
            if let Some(first) = lines.first() {
                screen.fields.insert(field.clone(), first.clone());
            }
            screen.pasted = lines.clone();
        });
        Ok(())
    }

    async fn select(&mut self, path: &str) -> Result<()> {
        self.with_screen(|screen| {
            screen.selected.insert(path.to_string(), true);
        });
        Ok(())
    }

    async fn text(&mut self, path: &str) -> Result<Option<String>> {
        Ok(self.with_screen(|screen| screen.fields.get(path).cloned()))
    }

    async fn set_text(&mut self, path: &str, value: &str) -> Result<()> {
        self.with_screen(|screen| {
            screen.fields.insert(path.to_string(), value.to_string());
        });
        Ok(())
    }

    async fn set_selected(&mut self, path: &str, selected: bool) -> Result<()> {
        self.with_screen(|screen| {
            screen.selected.insert(path.to_string(), selected);
        });
        Ok(())
    }

    async fn load_variant(&mut self, variant: &str) -> Result<()> {
        self.with_screen(|screen| {
            screen.fields.clear();
            screen.selected.clear();
            screen.pasted.clear();
            screen.variant = Some(variant.to_string());
        });
        Ok(())
    }

    async fn submit_background_job(&mut self, title: &str) -> Result<()> {
        let mut state = self.host.state();
        if state.failing_submits > 0 {
            state.failing_submits -= 1;
            bail!("background job {title} was not scheduled");
        }
        let screen = state.screens.entry(self.number).or_default().clone();
        if screen.transaction.is_none() {
            bail!("no transaction started on {}", self.name);
        }

        let submitted = SubmittedJob {
            session: self.number,
            title: title.to_string(),
            transaction: screen.transaction,
            variant: screen.variant,
            fields: screen.fields,
            selected: screen.selected,
            pasted: screen.pasted,
        };
        let content = (self.host.content)(&submitted);
        let fails = state.failing_titles.iter().any(|n| title.contains(n.as_str()));

        let job = state.jobs.len();
        state.jobs.push(HostJob {
            title: title.to_string(),
            polls: 0,
            fails,
            removed: false,
        });
        let id = state.next_spool.to_string();
        state.next_spool += 1;
        state.spools.push(HostSpool {
            id,
            title: title.to_string(),
            job,
            content,
            removed: false,
        });
        state.submissions.push(submitted);
        debug!(session = self.number, title, "background job scheduled");
        Ok(())
    }

    async fn list_jobs(&mut self, page: usize) -> Result<JobPage> {
        let mut state = self.host.state();
        if page == 0 {
            for job in state.jobs.iter_mut().filter(|j| !j.removed) {
                job.polls += 1;
            }
        }
        let rows: Vec<JobStatusRow> = state
            .jobs
            .iter()
            .filter(|j| !j.removed)
            .map(|j| JobStatusRow {
                title: j.title.clone(),
                status: self.host.status(j),
            })
            .collect();
        let (jobs, has_more) = self.host.page(&rows, page);
        Ok(JobPage { jobs, has_more })
    }

    async fn list_spools(&mut self, page: usize) -> Result<SpoolPage> {
        let state = self.host.state();
        let visible = self.host.visible_spools(&state);
        let (spools, has_more) = self.host.page(&visible, page);
        Ok(SpoolPage { spools, has_more })
    }

    async fn export_spools(&mut self) -> Result<()> {
        let mut state = self.host.state();
        state.exports += 1;
        let mut visible = self.host.visible_spools(&state);
        if state.short_exports > 0 && !visible.is_empty() {
            state.short_exports -= 1;
            visible.pop();
        }
        let garbled = state.garbled_exports > 0 && !visible.is_empty();
        if garbled {
            state.garbled_exports -= 1;
        }

        fs::create_dir_all(&self.host.landing_dir)
            .with_context(|| format!("creating {}", self.host.landing_dir.display()))?;
        for record in visible {
            let content = if garbled {
                "|?????|????|\n|0001 |0042|\n"
            } else {
                state
                    .spools
                    .iter()
                    .find(|s| s.id == record.spool_id)
                    .map(|s| s.content.as_str())
                    .unwrap_or_default()
            };
            let path = self.host.landing_dir.join(format!("{}.txt", record.spool_id));
            fs::write(&path, content).with_context(|| format!("writing {}", path.display()))?;
        }
        Ok(())
    }

    async fn remove_jobs(&mut self) -> Result<bool> {
        let mut state = self.host.state();
        let finished: Vec<bool> = state
            .jobs
            .iter()
            .map(|j| self.host.status(j).is_terminal())
            .collect();
        for (job, done) in state.jobs.iter_mut().zip(finished) {
            if done {
                job.removed = true;
            }
        }
        Ok(state.jobs.iter().all(|j| j.removed))
    }

    async fn remove_spools(&mut self) -> Result<bool> {
        let mut state = self.host.state();
        for spool in state.spools.iter_mut() {
            spool.removed = true;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{list_all_jobs, list_all_spools};
    use tempfile::tempdir;

    #[tokio::test]
    async fn jobs_advance_per_poll_and_leave_spools() {
        let dir = tempdir().unwrap();
        let host = MemoryHost::new(dir.path())
            .with_polls_to_finish(3)
            .with_page_size(2)
            .with_content(|job| format!("report for {}", job.title));
        let mut session = host.session("ERP", 1).await.unwrap();
        session.start_transaction("IW67").await.unwrap();
        for title in ["A", "B", "C"] {
            session.submit_background_job(title).await.unwrap();
        }

        let statuses = |rows: Vec<JobStatusRow>| rows.into_iter().map(|r| r.status).collect::<Vec<_>>();
        assert_eq!(statuses(list_all_jobs(session.as_mut()).await.unwrap()), vec![JobStatus::Submitted; 3]);
        assert!(list_all_spools(session.as_mut()).await.unwrap().is_empty());
        assert_eq!(statuses(list_all_jobs(session.as_mut()).await.unwrap()), vec![JobStatus::Running; 3]);
        assert_eq!(statuses(list_all_jobs(session.as_mut()).await.unwrap()), vec![JobStatus::Completed; 3]);

        let spools = list_all_spools(session.as_mut()).await.unwrap();
        assert_eq!(spools.len(), 3);
        assert_eq!(spools[0].spool_id, FIRST_SPOOL_ID.to_string());

        session.export_spools().await.unwrap();
        let exported = fs::read_to_string(dir.path().join(format!("{}.txt", spools[1].spool_id))).unwrap();
        assert_eq!(exported, "report for B");

        assert!(session.remove_jobs().await.unwrap());
        assert!(session.remove_spools().await.unwrap());
        assert_eq!(host.live_jobs(), 0);
        assert!(list_all_spools(session.as_mut()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn paste_binding_fills_the_first_value() {
        let dir = tempdir().unwrap();
        let host = MemoryHost::new(dir.path()).with_paste_binding("btn[24]", "ctxtLOW");
        host.clipboard().copy("0380\r\n0030").unwrap();
        let mut session = host.session("ERP", 2).await.unwrap();
        session.start_transaction("IW67").await.unwrap();
        session.press("btn[24]").await.unwrap();
        assert_eq!(session.text("ctxtLOW").await.unwrap().as_deref(), Some("0380"));

        session.submit_background_job("X").await.unwrap();
        assert_eq!(host.submissions()[0].pasted, vec!["0380", "0030"]);
    }

    #[tokio::test]
    async fn injected_faults_are_consumed() {
        let dir = tempdir().unwrap();
        let host = MemoryHost::new(dir.path());
        host.fail_next_sessions(1);
        assert!(host.session("ERP", 1).await.is_err());
        let mut session = host.session("ERP", 1).await.unwrap();
        session.start_transaction("IW67").await.unwrap();
        host.fail_next_submissions(1);
        assert!(session.submit_background_job("A").await.is_err());
        session.submit_background_job("A").await.unwrap();
        host.fail_jobs_titled("B");
        session.submit_background_job("B").await.unwrap();

        let jobs = list_all_jobs(session.as_mut()).await.unwrap();
        assert_eq!(jobs[1].status, JobStatus::Failed);
        assert_eq!(list_all_spools(session.as_mut()).await.unwrap().len(), 1);

        host.garble_next_exports(1);
        session.export_spools().await.unwrap();
        let landed = dir.path().join("56699000.txt");
        assert!(fs::read_to_string(&landed).unwrap().starts_with("|?????|"));
        session.export_spools().await.unwrap();
        assert_eq!(fs::read_to_string(&landed).unwrap(), "");
        assert_eq!(host.export_count(), 2);
    }
}
