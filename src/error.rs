// src/error.rs
use std::path::PathBuf;

use thiserror::Error;

/// Conditions the orchestration needs to branch on. Everything else travels
/// as a plain `anyhow::Error` with context attached.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Invalid run parameters. Never retried.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("{operation} cancelled")]
    Cancelled { operation: String },

    #[error("{operation} gave up after {attempts} attempts: {last:#}")]
    Exhausted {
        operation: String,
        attempts: u32,
        last: anyhow::Error,
    },

    #[error("expected {expected} exported spool files, found {found}")]
    ExportCountMismatch { expected: usize, found: usize },

    #[error("no header line matching schema {transaction} in {}", path.display())]
    HeaderNotFound { transaction: String, path: PathBuf },
}

impl ExtractError {
    pub fn config(msg: impl Into<String>) -> Self {
        ExtractError::Config(msg.into())
    }

    /// True for errors that must abort the run instead of being retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ExtractError::Config(_) | ExtractError::Cancelled { .. })
    }
}

/// Returns true when `err` (or anything in its chain) is a fatal `ExtractError`.
pub fn is_fatal(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<ExtractError>())
        .any(ExtractError::is_fatal)
}
