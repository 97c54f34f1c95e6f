//! Results and events
//!
//! [`ChaosResult`] is the user-visible outcome of a session. Events are
//! emitted at phase boundaries through the [`EventRecorder`] seam.

use crate::phase::Phase;
use crate::types::{SessionId, Target, TargetKind, TargetStatus};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Stage-prefixed failure descriptions
pub mod fail_step {
    use crate::error::ChaosError;
    use crate::phase::Phase;

    /// Pre-chaos probe failure
    pub const PRE_CHAOS_PROBE: &str = "[pre-chaos]: failed in probe execution";
    /// Baseline could not be captured
    pub const PRE_CHAOS_TARGET: &str = "[pre-chaos]: failed to read target state";
    /// Helper creation failure
    pub const CREATE_HELPER: &str = "[chaos]: failed to launch helper pod(s)";
    /// Helper never became ready
    pub const HELPER_NOT_READY: &str = "[chaos]: unhealthy helper pod(s)";
    /// Helper ended failed
    pub const HELPER_FAILED: &str = "[chaos]: helper pod(s) failed, check helper pod logs";
    /// Helper outlived its budget
    pub const HELPER_TIMEOUT: &str = "[chaos]: helper pod(s) did not complete in time";
    /// Helper deletion failure
    pub const DELETE_HELPER: &str = "[chaos]: failed to delete helper pod(s)";
    /// During-chaos probe failure
    pub const DURING_CHAOS_PROBE: &str = "[chaos]: failed while running onchaos probes";
    /// Target did not come back
    pub const TARGET_NOT_RESTORED: &str = "[post-chaos]: target did not return to its pre-chaos state";
    /// Post-chaos probe failure
    pub const POST_CHAOS_PROBE: &str = "[post-chaos]: failed in probe execution";
    /// External abort
    pub const ABORTED: &str = "Chaos injection stopped!";

    /// Fail step for an error raised while in `phase`
    #[must_use]
    pub fn for_error(phase: Phase, error: &ChaosError) -> &'static str {
        match (phase, error) {
            (_, ChaosError::Aborted) => ABORTED,
            (_, ChaosError::HelperFailed { .. }) => HELPER_FAILED,
            (_, ChaosError::Cleanup { .. }) => DELETE_HELPER,
            (Phase::Pending | Phase::RampWait, _) => PRE_CHAOS_TARGET,
            (Phase::Injecting, _) => CREATE_HELPER,
            (Phase::AwaitingHealthy, _) => HELPER_NOT_READY,
            (Phase::Sustaining | Phase::Reverting, _) => HELPER_TIMEOUT,
            (Phase::Verifying | Phase::Completed | Phase::Failed, _) => TARGET_NOT_RESTORED,
        }
    }
}

/// Session verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    /// Every target completed
    Passed,
    /// At least one target or probe failed
    Failed,
    /// Aborted externally
    Stopped,
}

/// Per-target outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetReport {
    /// Target name
    pub name: String,
    /// Target namespace, zone or region
    pub namespace: String,
    /// Target kind
    pub kind: TargetKind,
    /// Bookkeeping status
    pub status: TargetStatus,
    /// Last lifecycle phase
    pub phase: Phase,
    /// Injection iterations that started
    pub iterations: u32,
    /// Failure description, if the target failed
    pub fail_step: Option<String>,
    /// Error text, if the target failed
    pub error: Option<String>,
    /// Non-fatal problems (revert, cleanup)
    pub warnings: Vec<String>,
}

impl TargetReport {
    /// Report for a target that never started
    #[must_use]
    pub fn skipped(target: &Target) -> Self {
        Self {
            name: target.name.clone(),
            namespace: target.namespace.clone(),
            kind: target.kind,
            status: TargetStatus::Skipped,
            phase: Phase::Pending,
            iterations: 0,
            fail_step: None,
            error: None,
            warnings: Vec::new(),
        }
    }

    /// Check if the target failed
    #[inline]
    #[must_use]
    pub fn failed(&self) -> bool {
        self.phase == Phase::Failed
    }
}

/// User-visible session result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChaosResult {
    /// Session identifier
    pub session_id: SessionId,
    /// Fault name
    pub experiment: String,
    /// Verdict
    pub verdict: Verdict,
    /// First failure description
    pub fail_step: Option<String>,
    /// Per-target outcomes in execution order
    pub targets: Vec<TargetReport>,
    /// Session-level warnings
    pub warnings: Vec<String>,
    /// Session start
    pub started_at: DateTime<Utc>,
    /// Session end
    pub finished_at: DateTime<Utc>,
}

impl ChaosResult {
    /// Count of targets in `status`
    #[must_use]
    pub fn count(&self, status: TargetStatus) -> usize {
        self.targets.iter().filter(|t| t.status == status).count()
    }

    /// Count of failed targets
    #[must_use]
    pub fn failed_targets(&self) -> usize {
        self.targets.iter().filter(|t| t.failed()).count()
    }
}

/// Event severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// Expected progress
    Normal,
    /// Something went wrong
    Warning,
}

/// Phase boundary event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChaosEvent {
    /// Stage or phase name
    pub stage: String,
    /// Target name, if the event is target-scoped
    pub target: Option<String>,
    /// Severity
    pub kind: EventKind,
    /// Human-readable message
    pub message: String,
}

impl ChaosEvent {
    /// Normal event
    #[must_use]
    pub fn normal(stage: impl Into<String>, target: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            target: target.map(str::to_string),
            kind: EventKind::Normal,
            message: message.into(),
        }
    }

    /// Warning event
    #[must_use]
    pub fn warning(stage: impl Into<String>, target: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Warning,
            ..Self::normal(stage, target, message)
        }
    }
}

/// Receives events at phase boundaries
#[cfg_attr(test, mockall::automock)]
pub trait EventRecorder: Send + Sync {
    /// Record one event
    fn record(&self, event: ChaosEvent);
}

/// Writes events to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingRecorder;

impl EventRecorder for TracingRecorder {
    fn record(&self, event: ChaosEvent) {
        let target = event.target.as_deref().unwrap_or("-");
        match event.kind {
            EventKind::Normal => {
                tracing::debug!(stage = %event.stage, target_name = target, "{}", event.message);
            }
            EventKind::Warning => {
                tracing::warn!(stage = %event.stage, target_name = target, "{}", event.message);
            }
        }
    }
}

/// Keeps events in memory
#[derive(Debug, Default)]
pub struct MemoryRecorder {
    events: Mutex<Vec<ChaosEvent>>,
}

impl MemoryRecorder {
    /// Create an empty recorder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded events
    #[must_use]
    pub fn events(&self) -> Vec<ChaosEvent> {
        self.events.lock().clone()
    }

    /// Events for one target
    #[must_use]
    pub fn for_target(&self, target: &str) -> Vec<ChaosEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.target.as_deref() == Some(target))
            .cloned()
            .collect()
    }
}

impl EventRecorder for MemoryRecorder {
    fn record(&self, event: ChaosEvent) {
        self.events.lock().push(event);
    }
}
