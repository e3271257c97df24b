// src/fetch/cleanup.rs
use anyhow::{bail, Result};
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::fetch::clear_landing_dir;
use crate::remote::SessionCell;
use crate::retry::{retry_until_success, RetryPolicy};

/// Remove the user's previous jobs and spool requests and empty the landing
/// directory, so the next barrier and export only see this run's work.
#[tracing::instrument(level = "info", skip_all, fields(landing = %landing_dir.display()))]
pub async fn cleanup(
    session: &SessionCell,
    landing_dir: &Path,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<()> {
    retry_until_success("remove jobs", policy, cancel, |_| async move {
        if !session.lock().await.remove_jobs().await? {
            bail!("job overview still lists active jobs");
        }
        Ok(())
    })
    .await?;

    retry_until_success("remove spools", policy, cancel, |_| async move {
        if !session.lock().await.remove_spools().await? {
            bail!("spool listing is not empty");
        }
        Ok(())
    })
    .await?;

    retry_until_success("clear landing directory", policy, cancel, |_| {
        clear_landing_dir(landing_dir)
    })
    .await?;

    info!("previous jobs, spools and exports removed");
    Ok(())
}
