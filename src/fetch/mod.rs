// src/fetch/mod.rs
//! Stages that talk to the remote host after submission: waiting for the
//! background jobs, exporting their spool output, and clearing leftovers.

pub mod barrier;
pub mod cleanup;
pub mod retrieve;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;

pub use barrier::{BarrierReport, JobCompletionBarrier};
pub use cleanup::cleanup;
pub use retrieve::{RetrievalReport, SpoolRetrievalStage};

/// Regular files directly inside `dir`, sorted by path. A missing directory
/// has no files.
pub async fn landed_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
        Err(e) => return Err(e).with_context(|| format!("listing {}", dir.display())),
    };
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// Delete every regular file directly in `dir`, creating it if needed.
/// Subdirectories are left alone: the landing dir may be the front end's
/// shared export folder.
pub async fn clear_landing_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)
        .await
        .with_context(|| format!("creating {}", dir.display()))?;
    for path in landed_files(dir).await? {
        fs::remove_file(&path)
            .await
            .with_context(|| format!("removing {}", path.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn clearing_leaves_an_empty_directory() {
        let dir = tempdir().unwrap();
        let landing = dir.path().join("landing");
        assert!(landed_files(&landing).await.unwrap().is_empty());

        clear_landing_dir(&landing).await.unwrap();
        std::fs::write(landing.join("b.txt"), "x").unwrap();
        std::fs::write(landing.join("a.txt"), "x").unwrap();
        std::fs::create_dir(landing.join("nested")).unwrap();
        assert_eq!(
            landed_files(&landing).await.unwrap(),
            vec![landing.join("a.txt"), landing.join("b.txt")]
        );

        clear_landing_dir(&landing).await.unwrap();
        assert!(landing.is_dir());
        assert!(landed_files(&landing).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn clearing_keeps_subdirectories() {
        let dir = tempdir().unwrap();
        let landing = dir.path().join("landing");
        std::fs::create_dir_all(landing.join("nested")).unwrap();
        std::fs::write(landing.join("nested").join("keep.txt"), "x").unwrap();
        std::fs::write(landing.join("56699000.txt"), "x").unwrap();

        clear_landing_dir(&landing).await.unwrap();

        assert!(!landing.join("56699000.txt").exists());
        assert!(landing.join("nested").join("keep.txt").is_file());
    }
}
