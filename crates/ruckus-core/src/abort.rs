//! Abort watcher and revert controller
//!
//! Spawned once per session. It waits on an abort source (SIGINT/SIGTERM in
//! the binary, any future in tests) and, if that fires before the session
//! finishes:
//!
//! 1. sets the session's [`AbortSignal`](crate::signal::AbortSignal)
//! 2. reverts every in-flight target with the fixed revert budget
//! 3. deletes the live helpers best-effort
//!
//! It returns an [`AbortOutcome`] instead of exiting; the caller maps it to a
//! process exit code. Target tasks observe the signal at their next phase
//! boundary and revert again on their own failure path; revert is
//! idempotent, so the second pass finds the target already restored.

use crate::context::SessionContext;
use crate::fault::revert_with_retry;
use crate::report::ChaosEvent;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;

/// Exit code when the session stopped before any injection
pub const EXIT_STOPPED_CLEAN: i32 = 0;
/// Exit code when chaos had been injected and was reverted
pub const EXIT_REVERTED: i32 = 1;

/// What the watcher did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbortOutcome {
    /// Whether any target had reached injection
    pub injected: bool,
    /// Targets reverted successfully
    pub reverted: Vec<String>,
    /// Helpers deleted
    pub deleted_helpers: Vec<String>,
    /// Reverts or deletions that failed
    pub failures: Vec<String>,
}

impl AbortOutcome {
    /// Process exit code for this outcome
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        if self.injected {
            EXIT_REVERTED
        } else {
            EXIT_STOPPED_CLEAN
        }
    }
}

/// Session abort watcher
#[derive(Debug)]
pub struct AbortWatcher {
    ctx: Arc<SessionContext>,
}

impl AbortWatcher {
    /// Create a watcher for a session
    #[must_use]
    pub fn new(ctx: Arc<SessionContext>) -> Self {
        Self { ctx }
    }

    /// Wait for `abort` or `finished`, whichever comes first
    ///
    /// Returns `None` when the session finished without an abort.
    pub async fn watch<A, F>(self, abort: A, finished: F) -> Option<AbortOutcome>
    where
        A: Future<Output = ()>,
        F: Future<Output = ()>,
    {
        tokio::select! {
            () = abort => Some(self.revert_in_flight().await),
            () = finished => None,
        }
    }

    /// Trigger the abort signal and revert everything in flight
    pub async fn revert_in_flight(&self) -> AbortOutcome {
        let ctx = self.ctx.as_ref();
        if ctx.abort.trigger() {
            tracing::warn!("[Abort]: Chaos injection stopped, reverting in-flight targets");
        }
        ctx.record(ChaosEvent::warning(
            "Abort",
            None,
            "chaos injection stopped by external signal",
        ));

        let pending = ctx.in_flight.pending();
        let reverts = pending.iter().map(|entry| async move {
            let result = revert_with_retry(
                ctx.fault.as_ref(),
                ctx.api.as_ref(),
                &entry.target,
                &entry.baseline,
            )
            .await;
            let deleted = ctx.helpers.force_delete(&entry.target.key()).await;
            (entry, result, deleted)
        });

        let mut outcome = AbortOutcome {
            injected: ctx.in_flight.injected_any(),
            ..AbortOutcome::default()
        };
        for (entry, result, deleted) in join_all(reverts).await {
            match result {
                Ok(_) => outcome.reverted.push(entry.target.name.clone()),
                Err(e) => outcome.failures.push(e.to_string()),
            }
            match deleted {
                Ok(Some(helper)) => outcome.deleted_helpers.push(helper),
                Ok(None) => {}
                Err(e) => outcome.failures.push(e.to_string()),
            }
        }

        tracing::warn!(
            reverted = outcome.reverted.len(),
            failures = outcome.failures.len(),
            "[Abort]: Revert pass finished"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_depends_on_injection() {
        assert_eq!(AbortOutcome::default().exit_code(), EXIT_STOPPED_CLEAN);
        let outcome = AbortOutcome {
            injected: true,
            ..AbortOutcome::default()
        };
        assert_eq!(outcome.exit_code(), EXIT_REVERTED);
    }
}
