//! Fault capability interface
//!
//! The lifecycle engine is generic over [`Fault`]; each experiment supplies
//! its helper payload, lifetime and revert behaviour. The default `observe`
//! and `revert` read and restore the target's state through the control
//! plane, which makes revert idempotent: a target already at its baseline is
//! left alone.

use crate::api::{ControlApi, Payload};
use crate::error::ChaosError;
use crate::retry::{retry, RetryPolicy};
use crate::types::{Target, TargetKind};
use std::time::Duration;

/// How a helper's run ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultLifetime {
    /// The helper exits on its own once the fault is done
    SelfTerminating,
    /// The helper runs until the engine ends the window
    Bounded,
}

/// Outcome of one revert call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevertAction {
    /// Fault undoes itself; nothing to do
    NoOp,
    /// Target already at its baseline
    AlreadyReverted,
    /// Target state restored
    Restored,
}

/// A fault the engine can inject
#[async_trait::async_trait]
pub trait Fault: Send + Sync {
    /// Fault name, used in helper names and labels
    fn name(&self) -> &str;

    /// Kind of target the fault acts on
    fn target_kind(&self) -> TargetKind;

    /// Helper payload for one sustain window on `target`
    fn payload(&self, target: &Target, window: Duration) -> Payload;

    /// How the helper's run ends
    fn lifetime(&self) -> FaultLifetime;

    /// Whether the fault undoes itself when the helper goes away
    fn self_reverting(&self) -> bool;

    /// Observe the target's current state
    async fn observe(&self, api: &dyn ControlApi, target: &Target) -> Result<String, ChaosError> {
        api.get_target(target.kind, &target.namespace, &target.name)
            .await?
            .map(|t| t.observed_state)
            .ok_or_else(|| ChaosError::control(format!("target {} not found", target.key())))
    }

    /// Restore `target` to `baseline`; safe to call repeatedly
    async fn revert(
        &self,
        api: &dyn ControlApi,
        target: &Target,
        baseline: &str,
    ) -> Result<RevertAction, ChaosError> {
        if self.self_reverting() {
            return Ok(RevertAction::NoOp);
        }
        let current = self.observe(api, target).await?;
        if current == baseline {
            return Ok(RevertAction::AlreadyReverted);
        }
        api.set_target_state(target, baseline).await?;
        Ok(RevertAction::Restored)
    }
}

/// Revert `target` with the fixed revert budget
///
/// # Errors
///
/// Returns [`ChaosError::Revert`] carrying the last failure once all
/// attempts are used.
pub async fn revert_with_retry(
    fault: &dyn Fault,
    api: &dyn ControlApi,
    target: &Target,
    baseline: &str,
) -> Result<RevertAction, ChaosError> {
    let action = retry(&RetryPolicy::revert(), |_| fault.revert(api, target, baseline))
        .await
        .map_err(|e| ChaosError::Revert {
            target: target.key(),
            reason: e.to_string(),
        })?;
    if action == RevertAction::Restored {
        metrics::counter!("ruckus_reverts_total", "fault" => fault.name().to_string()).increment(1);
    }
    tracing::info!(target_name = %target.name, ?action, "[Revert]: Target reverted");
    Ok(action)
}
