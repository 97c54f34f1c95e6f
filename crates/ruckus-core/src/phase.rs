//! Per-target lifecycle phases and their transition table

use crate::error::ChaosError;
use serde::{Deserialize, Serialize};

/// Lifecycle phase of a single target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Target resolved, baseline not yet captured
    Pending,
    /// Waiting out the ramp time
    RampWait,
    /// Creating the helper
    Injecting,
    /// Waiting for the helper to leave pending
    AwaitingHealthy,
    /// Fault active, helper being polled
    Sustaining,
    /// Undoing the fault and cleaning up the helper
    Reverting,
    /// Waiting for the target to report its baseline state
    Verifying,
    /// Finished cleanly
    Completed,
    /// Finished on the failure path
    Failed,
}

impl Phase {
    /// Check if no further transition is possible
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Check if a helper may exist while in this phase
    #[inline]
    #[must_use]
    pub fn is_injected(self) -> bool {
        matches!(
            self,
            Self::Injecting | Self::AwaitingHealthy | Self::Sustaining | Self::Reverting
        )
    }

    /// Log/report label
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::RampWait => "RampWait",
            Self::Injecting => "Injecting",
            Self::AwaitingHealthy => "AwaitingHealthy",
            Self::Sustaining => "Sustaining",
            Self::Reverting => "Reverting",
            Self::Verifying => "Verifying",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Validates a phase transition
///
/// # Errors
///
/// Returns [`ChaosError::IllegalTransition`] if `to` is not reachable from `from`.
pub fn validate_transition(from: Phase, to: Phase) -> Result<(), ChaosError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(ChaosError::IllegalTransition { from, to })
    }
}

/// Phases reachable from `from` in one step
///
/// `Sustaining -> Injecting` starts the next iteration. Every non-terminal
/// phase can fail; once a helper may exist the failure path goes through
/// `Reverting`.
#[must_use]
pub fn allowed_transitions(from: Phase) -> &'static [Phase] {
    use Phase::*;
    match from {
        Pending => &[RampWait, Failed],
        RampWait => &[Injecting, Reverting, Failed],
        Injecting => &[AwaitingHealthy, Reverting, Failed],
        AwaitingHealthy => &[Sustaining, Reverting, Failed],
        Sustaining => &[Injecting, Reverting, Failed],
        Reverting => &[Verifying, Failed],
        Verifying => &[Completed, Failed],
        Completed | Failed => &[],
    }
}
