// src/remote/transfer.rs
//! Exclusive access to the host's single input-transfer channel.
//!
//! Parameter lists reach the remote selection screens through a clipboard
//! that every worker shares. Whoever copies must also paste before anyone
//! else copies, so a worker holds a [`TransferGuard`] for the whole
//! copy-verify-paste sequence.

use anyhow::{bail, Result};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Copy/read-back attempts before giving up on a flaky clipboard.
const COPY_ATTEMPTS: usize = 5;

pub trait Clipboard: Send + Sync {
    fn copy(&self, text: &str) -> Result<()>;
    fn paste(&self) -> Result<String>;
}

#[derive(Clone)]
pub struct TransferChannel {
    clipboard: Arc<dyn Clipboard>,
    lock: Arc<Mutex<()>>,
}

impl TransferChannel {
    pub fn new(clipboard: Arc<dyn Clipboard>) -> Self {
        Self {
            clipboard,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Wait for exclusive use of the channel.
    pub async fn acquire(&self) -> TransferGuard<'_> {
        let lock = self.lock.lock().await;
        debug!("transfer channel acquired");
        TransferGuard {
            _lock: lock,
            clipboard: self.clipboard.as_ref(),
        }
    }
}

pub struct TransferGuard<'a> {
    _lock: MutexGuard<'a, ()>,
    clipboard: &'a dyn Clipboard,
}

impl TransferGuard<'_> {
    /// Place `values` on the channel one per line and confirm they arrived
    /// intact.
    pub fn put<S: AsRef<str>>(&self, values: &[S]) -> Result<()> {
        let text = values
            .iter()
            .map(|v| v.as_ref())
            .collect::<Vec<_>>()
            .join("\r\n");
        for _ in 0..COPY_ATTEMPTS {
            self.clipboard.copy(&text)?;
            if self.clipboard.paste()? == text {
                return Ok(());
            }
        }
        bail!("clipboard content did not match after {COPY_ATTEMPTS} copies")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::memory::MemoryClipboard;
    use std::time::Duration;

    #[tokio::test]
    async fn put_joins_values_with_crlf() {
        let clipboard = Arc::new(MemoryClipboard::default());
        let channel = TransferChannel::new(clipboard.clone());
        channel.acquire().await.put(&["0380", "0030"]).unwrap();
        assert_eq!(clipboard.paste().unwrap(), "0380\r\n0030");
    }

    #[tokio::test(start_paused = true)]
    async fn holders_are_serialized() {
        let channel = TransferChannel::new(Arc::new(MemoryClipboard::default()));
        let first = channel.acquire().await;

        let other = channel.clone();
        let waiter = tokio::spawn(async move {
            let guard = other.acquire().await;
            guard.put(&["B"]).unwrap();
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!waiter.is_finished());
        first.put(&["A"]).unwrap();
        drop(first);
        waiter.await.unwrap();
    }
}
