//! Error types for Ruckus Core
//!
//! Errors fall into three groups:
//! - Session-fatal: bad configuration, nothing to target
//! - Target-scoped: helper never ready, injection failure, status timeouts
//! - Best-effort: revert and cleanup failures, surfaced as warnings

use crate::phase::Phase;

/// Main engine error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChaosError {
    /// Session parameters are unusable
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Resolver produced no targets
    #[error("no targets found matching {selector}")]
    NoTargetsFound { selector: String },

    /// Helper never reached a post-pending phase
    #[error("helper {helper} not ready: {reason}")]
    HelperNotReady { helper: String, reason: String },

    /// A bounded status poll ran out of attempts
    #[error("status check timed out after {attempts} attempt(s): {reason}")]
    StatusTimeout { attempts: u32, reason: String },

    /// Helper terminated in the failed phase
    #[error("helper {helper} failed: {reason}")]
    HelperFailed { helper: String, reason: String },

    /// Helper could not be created for a target
    #[error("injection into {target} failed: {reason}")]
    Injection { target: String, reason: String },

    /// Revert of a target did not succeed
    #[error("revert of {target} failed: {reason}")]
    Revert { target: String, reason: String },

    /// Helper deletion could not be confirmed
    #[error("cleanup of {selector} failed: {reason}")]
    Cleanup { selector: String, reason: String },

    /// A probe reported failure
    #[error("probe {probe} failed: {reason}")]
    Probe { probe: String, reason: String },

    /// State machine rejected a transition
    #[error("illegal phase transition {from} -> {to}")]
    IllegalTransition { from: Phase, to: Phase },

    /// External abort was observed
    #[error("chaos injection aborted")]
    Aborted,

    /// Control plane call failed
    #[error("control api error: {0}")]
    Control(String),
}

impl ChaosError {
    /// Check if the error ends the whole session before any target runs
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfiguration(_) | Self::NoTargetsFound { .. }
        )
    }

    /// Check if the error is confined to a single target
    #[inline]
    #[must_use]
    pub fn is_target_scoped(&self) -> bool {
        matches!(
            self,
            Self::HelperNotReady { .. }
                | Self::StatusTimeout { .. }
                | Self::HelperFailed { .. }
                | Self::Injection { .. }
                | Self::IllegalTransition { .. }
        )
    }

    /// Check if the error should only be reported as a warning
    #[inline]
    #[must_use]
    pub fn is_best_effort(&self) -> bool {
        matches!(self, Self::Revert { .. } | Self::Cleanup { .. })
    }

    /// Shorthand for a configuration error
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Shorthand for a control plane error
    pub fn control(msg: impl Into<String>) -> Self {
        Self::Control(msg.into())
    }
}
