// src/fetch/retrieve.rs
use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::ExtractError;
use crate::fetch::{clear_landing_dir, landed_files};
use crate::remote::{list_all_spools, JobRecord, SessionCell};
use crate::retry::{retry_until_success, RetryPolicy};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalReport {
    pub attempts: u32,
    /// Landed files after renaming, sorted.
    pub files: Vec<PathBuf>,
}

/// Exports every spool request into the landing directory and names each
/// file after the job that produced it.
#[derive(Debug, Clone)]
pub struct SpoolRetrievalStage {
    landing_dir: PathBuf,
    policy: RetryPolicy,
}

impl SpoolRetrievalStage {
    pub fn new(landing_dir: impl Into<PathBuf>) -> Self {
        Self {
            landing_dir: landing_dir.into(),
            policy: RetryPolicy::immediate(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn landing_dir(&self) -> &Path {
        &self.landing_dir
    }

    /// Repeat full exports until exactly `expected` files land and
    /// `process` accepts them. A failure of either starts over from a
    /// cleared landing directory.
    #[tracing::instrument(level = "info", skip(self, session, cancel, process))]
    pub async fn retrieve<T, F, Fut>(
        &self,
        session: &SessionCell,
        expected: usize,
        cancel: &CancellationToken,
        process: F,
    ) -> Result<(RetrievalReport, T)>
    where
        F: Fn(Vec<PathBuf>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let start = Instant::now();
        let mut attempts = 0;
        let process = &process;

        let (files, output) = retry_until_success("retrieve spools", &self.policy, cancel, |attempt| {
            attempts = attempt;
            async move {
                let files = self.export_once(session, expected).await?;
                let output = process(files.clone()).await?;
                Ok((files, output))
            }
        })
        .await?;

        info!(attempts, files = files.len(), elapsed = ?start.elapsed(), "spools retrieved");
        Ok((RetrievalReport { attempts, files }, output))
    }

    /// One clear-export-count-rename round.
    pub async fn export_once(&self, session: &SessionCell, expected: usize) -> Result<Vec<PathBuf>> {
        let mut session = session.lock().await;
        clear_landing_dir(&self.landing_dir).await?;

        let spools = list_all_spools(&mut **session).await?;
        session.export_spools().await.context("exporting spools")?;

        let landed = landed_files(&self.landing_dir).await?;
        if landed.len() != expected {
            return Err(ExtractError::ExportCountMismatch {
                expected,
                found: landed.len(),
            }
            .into());
        }
        rename_landed(&landed, &spools).await
    }
}

/// Rename each file to `{spool_id}_{title}.txt` after the spool whose id
/// appears in its name. The longest id wins when several do.
async fn rename_landed(landed: &[PathBuf], spools: &[JobRecord]) -> Result<Vec<PathBuf>> {
    let mut moves = Vec::with_capacity(landed.len());
    let mut targets = HashSet::with_capacity(landed.len());
    for path in landed {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let Some(spool) = spools
            .iter()
            .filter(|s| !s.spool_id.is_empty() && name.contains(&s.spool_id))
            .max_by_key(|s| s.spool_id.len())
        else {
            bail!("no listed spool matches exported file {name}");
        };

        let target = path.with_file_name(landed_name(spool));
        if !targets.insert(target.clone()) {
            bail!("exported files collide on {}", target.display());
        }
        moves.push((path, target));
    }
    for (path, target) in &moves {
        if target != *path && landed.contains(target) {
            bail!("renaming {} would replace exported file {}", path.display(), target.display());
        }
    }

    let mut renamed = Vec::with_capacity(moves.len());
    for (path, target) in moves {
        if target != *path {
            fs::rename(path, &target)
                .await
                .with_context(|| format!("renaming {} to {}", path.display(), target.display()))?;
            debug!(from = %path.display(), to = %target.display(), "renamed spool file");
        }
        renamed.push(target);
    }
    renamed.sort();
    Ok(renamed)
}

fn landed_name(spool: &JobRecord) -> String {
    let title: String = spool
        .title
        .trim()
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c })
        .collect();
    format!("{}_{}.txt", spool.spool_id, title)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::memory::MemoryHost;
    use crate::remote::{list_all_jobs, SessionProvider};
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::tempdir;

    async fn finished_jobs(host: &MemoryHost, titles: &[&str]) -> SessionCell {
        let mut session = host.session("ERP", 1).await.unwrap();
        session.start_transaction("IW67").await.unwrap();
        for title in titles {
            session.submit_background_job(title).await.unwrap();
        }
        list_all_jobs(session.as_mut()).await.unwrap();
        SessionCell::new(session)
    }

    #[tokio::test]
    async fn all_expected_files_are_renamed() {
        let dir = tempdir().unwrap();
        let landing = dir.path().join("landing");
        let host = MemoryHost::new(&landing).with_content(|job| format!("Nota|\n{}|\n", job.title));
        let session = finished_jobs(&host, &["IW67_MEDL"; 5]).await;

        std::fs::create_dir_all(&landing).unwrap();
        std::fs::write(landing.join("stale.txt"), "left over").unwrap();

        let (report, ()) = SpoolRetrievalStage::new(&landing)
            .retrieve(&session, 5, &CancellationToken::new(), |_| async { Ok(()) })
            .await
            .unwrap();

        assert_eq!(report.attempts, 1);
        assert_eq!(report.files.len(), 5);
        assert_eq!(
            report.files[0].file_name().unwrap().to_string_lossy(),
            "56699000_IW67_MEDL.txt"
        );
        assert_eq!(landed_files(&landing).await.unwrap(), report.files);
    }

    #[tokio::test]
    async fn short_export_is_repeated_from_scratch() {
        let dir = tempdir().unwrap();
        let host = MemoryHost::new(dir.path());
        host.short_next_exports(1);
        let session = finished_jobs(&host, &["A", "B", "C", "D", "E"]).await;

        let (report, ()) = SpoolRetrievalStage::new(dir.path())
            .retrieve(&session, 5, &CancellationToken::new(), |_| async { Ok(()) })
            .await
            .unwrap();

        assert_eq!(report.attempts, 2);
        assert_eq!(host.export_count(), 2);
        assert_eq!(report.files.len(), 5);
    }

    #[tokio::test]
    async fn persistent_mismatch_exhausts_a_bounded_policy() {
        let dir = tempdir().unwrap();
        let host = MemoryHost::new(dir.path());
        let session = finished_jobs(&host, &["A", "B"]).await;

        let err = SpoolRetrievalStage::new(dir.path())
            .with_policy(RetryPolicy::immediate().with_max_attempts(Some(2)))
            .retrieve(&session, 3, &CancellationToken::new(), |_| async { Ok(()) })
            .await
            .unwrap_err();

        match err.downcast_ref::<ExtractError>() {
            Some(ExtractError::Exhausted { attempts, last, .. }) => {
                assert_eq!(*attempts, 2);
                assert!(matches!(
                    last.downcast_ref::<ExtractError>(),
                    Some(ExtractError::ExportCountMismatch { expected: 3, found: 2 })
                ));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejected_files_are_exported_again() {
        let dir = tempdir().unwrap();
        let host = MemoryHost::new(dir.path()).with_content(|job| format!("{}|\n", job.title));
        let session = finished_jobs(&host, &["A", "B"]).await;
        let rejections = AtomicU32::new(1);

        let (report, contents) = SpoolRetrievalStage::new(dir.path())
            .retrieve(&session, 2, &CancellationToken::new(), |files| {
                let reject = rejections
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
                async move {
                    if reject {
                        bail!("unreadable export");
                    }
                    let mut contents = Vec::new();
                    for file in files {
                        contents.push(fs::read_to_string(file).await?);
                    }
                    Ok(contents)
                }
            })
            .await
            .unwrap();

        assert_eq!(report.attempts, 2);
        assert_eq!(host.export_count(), 2);
        assert_eq!(contents, vec!["A|\n", "B|\n"]);
    }

    #[tokio::test]
    async fn colliding_targets_are_refused() {
        let dir = tempdir().unwrap();
        let first = dir.path().join("56699000.txt");
        let copy = dir.path().join("56699000 (1).txt");
        std::fs::write(&first, "one").unwrap();
        std::fs::write(&copy, "two").unwrap();
        let spools = vec![JobRecord {
            spool_id: "56699000".into(),
            title: "IW67_MEDL".into(),
        }];

        let err = rename_landed(&[first.clone(), copy.clone()], &spools)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("collide"));
        assert!(first.exists() && copy.exists());

        let occupied = dir.path().join("56699000_IW67_MEDL.txt");
        std::fs::write(&occupied, "three").unwrap();
        let spools = vec![
            JobRecord {
                spool_id: "56699000".into(),
                title: "IW67_MEDL".into(),
            },
            JobRecord {
                spool_id: "56699000_IW67_MEDL".into(),
                title: "X".into(),
            },
        ];
        assert!(rename_landed(&[first, occupied], &spools).await.is_err());
    }

    #[test]
    fn titles_are_made_file_safe() {
        let spool = JobRecord {
            spool_id: "42".into(),
            title: "IW67/MEDL".into(),
        };
        assert_eq!(landed_name(&spool), "42_IW67_MEDL.txt");
    }
}
