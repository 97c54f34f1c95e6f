//! Set-once abort signal
//!
//! Single writer (the abort watcher), many readers (every target task).
//! Readers poll [`AbortSignal::is_aborted`] at phase boundaries or await
//! [`AbortSignal::wait`] inside abort-aware sleeps.

use crate::error::ChaosError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Shared abort flag
#[derive(Debug, Clone)]
pub struct AbortSignal {
    flag: Arc<AtomicBool>,
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl AbortSignal {
    /// Create an unset signal
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Set the signal; returns `false` if it was already set
    pub fn trigger(&self) -> bool {
        if self
            .flag
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        self.tx.send_replace(true);
        true
    }

    /// Check if the signal is set
    #[inline]
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Return `Err(Aborted)` if the signal is set
    ///
    /// # Errors
    ///
    /// Returns [`ChaosError::Aborted`] once the signal has been triggered.
    pub fn check(&self) -> Result<(), ChaosError> {
        if self.is_aborted() {
            Err(ChaosError::Aborted)
        } else {
            Ok(())
        }
    }

    /// Wait until the signal is set
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Sleep for `duration` unless the signal fires first
    ///
    /// # Errors
    ///
    /// Returns [`ChaosError::Aborted`] if the signal is set before or during the sleep.
    pub async fn sleep(&self, duration: Duration) -> Result<(), ChaosError> {
        self.check()?;
        if duration.is_zero() {
            return Ok(());
        }
        tokio::select! {
            () = tokio::time::sleep(duration) => Ok(()),
            () = self.wait() => Err(ChaosError::Aborted),
        }
    }
}

impl Default for AbortSignal {
    fn default() -> Self {
        Self::new()
    }
}
