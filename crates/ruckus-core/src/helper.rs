//! Helper resource manager
//!
//! Owns the lifecycle of the ephemeral units that carry a fault:
//! - Creation with deterministic labels (one live helper per target)
//! - Readiness and completion polling
//! - Deletion per cleanup policy, confirmed by re-listing until gone
//! - Collective deletion of a parallel batch by its shared label
//!
//! The manager applies whatever cleanup policy its caller passes; it never
//! picks one itself.

use crate::api::{ControlApi, HelperPhase, HelperSpec, HelperStatus, Payload};
use crate::error::ChaosError;
use crate::fault::FaultLifetime;
use crate::labels::{Labels, Selector};
use crate::retry::{retry, retry_abortable, RetryPolicy};
use crate::signal::AbortSignal;
use crate::types::{CleanupPolicy, RunId, SessionId, Target};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Label naming a single helper
pub const NAME_LABEL: &str = "name";
/// Label shared by a batch (or a single serial helper)
pub const APP_LABEL: &str = "app";
/// Ownership label
pub const PART_OF_LABEL: &str = "app.kubernetes.io/part-of";
/// Session label
pub const SESSION_LABEL: &str = "chaos-session";

const PART_OF_VALUE: &str = "ruckus";

/// Shared label for a parallel batch, written once per batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchLabel {
    value: String,
}

impl BatchLabel {
    /// Create a batch label for `fault`
    #[must_use]
    pub fn new(fault: &str) -> Self {
        Self {
            value: format!("{fault}-helper-{}", RunId::generate()),
        }
    }

    /// Label value
    #[inline]
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Selector matching every helper of the batch
    #[must_use]
    pub fn selector(&self) -> Selector {
        Selector::all().eq(APP_LABEL, &self.value)
    }
}

/// A created helper
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperResource {
    /// Short run id
    pub run_id: RunId,
    /// Helper name
    pub name: String,
    /// Helper namespace
    pub namespace: String,
    /// Labels applied at creation
    pub labels: Labels,
    /// What the helper runs
    pub payload: Payload,
    /// Policy applied on release
    pub cleanup_policy: CleanupPolicy,
    /// Registry key of the target
    pub target_key: String,
}

impl HelperResource {
    /// Selector matching only this helper
    #[must_use]
    pub fn selector(&self) -> Selector {
        Selector::all().eq(NAME_LABEL, &self.name)
    }
}

/// What happened to a released helper
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// Deleted and confirmed gone
    Deleted,
    /// Kept per cleanup policy
    Retained,
}

/// Helper statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HelperStats {
    /// Total helpers created
    pub created: usize,
    /// Helpers deleted and confirmed gone
    pub deleted: usize,
    /// Helpers kept per policy
    pub retained: usize,
    /// Deletions that could not be confirmed
    pub cleanup_failures: usize,
}

/// Helper manager for one session
pub struct HelperManager {
    api: Arc<dyn ControlApi>,
    namespace: String,
    fault: String,
    session_id: SessionId,
    /// Live helpers keyed by target
    active: DashMap<String, HelperResource>,
    stats: Mutex<HelperStats>,
}

impl std::fmt::Debug for HelperManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HelperManager")
            .field("namespace", &self.namespace)
            .field("fault", &self.fault)
            .field("active", &self.active.len())
            .finish_non_exhaustive()
    }
}

impl HelperManager {
    /// Create a manager placing helpers in `namespace`
    #[must_use]
    pub fn new(
        api: Arc<dyn ControlApi>,
        namespace: impl Into<String>,
        fault: impl Into<String>,
        session_id: SessionId,
    ) -> Self {
        Self {
            api,
            namespace: namespace.into(),
            fault: fault.into(),
            session_id,
            active: DashMap::new(),
            stats: Mutex::new(HelperStats::default()),
        }
    }

    /// Namespace helpers are created in
    #[inline]
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Create a helper for `target`
    ///
    /// Without a batch label the helper gets its own `app` label derived from
    /// its run id.
    ///
    /// # Errors
    ///
    /// Returns [`ChaosError::Injection`] if the target already has a live
    /// helper or the control plane rejects the request.
    pub async fn create(
        &self,
        target: &Target,
        payload: Payload,
        cleanup_policy: CleanupPolicy,
        batch: Option<&BatchLabel>,
    ) -> Result<HelperResource, ChaosError> {
        let target_key = target.key();
        if let Some(existing) = self.active.get(&target_key) {
            return Err(ChaosError::Injection {
                target: target_key.clone(),
                reason: format!("helper {} is still live", existing.name),
            });
        }

        let run_id = RunId::generate();
        let name = format!("{}-helper-{run_id}", self.fault);
        let app = batch.map_or_else(|| name.clone(), |b| b.value().to_string());
        let labels = Labels::new()
            .with(NAME_LABEL, &name)
            .with(APP_LABEL, app)
            .with(PART_OF_LABEL, PART_OF_VALUE)
            .with(SESSION_LABEL, self.session_id.to_string());

        let spec = HelperSpec {
            name: name.clone(),
            namespace: self.namespace.clone(),
            labels: labels.clone(),
            target: target.clone(),
            payload: payload.clone(),
        };
        self.api
            .create_helper(&spec)
            .await
            .map_err(|e| ChaosError::Injection {
                target: target_key.clone(),
                reason: e.to_string(),
            })?;

        let helper = HelperResource {
            run_id,
            name,
            namespace: self.namespace.clone(),
            labels,
            payload,
            cleanup_policy,
            target_key: target_key.clone(),
        };
        self.active.insert(target_key, helper.clone());
        self.stats.lock().created += 1;
        metrics::counter!("ruckus_injections_total", "fault" => self.fault.clone()).increment(1);

        tracing::info!(
            helper = %helper.name,
            target_name = %target.name,
            command = %helper.payload.command_line(),
            "[Chaos]: Helper created"
        );
        Ok(helper)
    }

    /// Current status of `helper`, `None` if it no longer exists
    ///
    /// # Errors
    ///
    /// Returns control plane errors as-is.
    pub async fn observe(&self, helper: &HelperResource) -> Result<Option<HelperStatus>, ChaosError> {
        let list = self
            .api
            .list_helpers(&self.namespace, &helper.selector())
            .await?;
        Ok(list.into_iter().next())
    }

    /// Poll until `helper` leaves pending
    ///
    /// # Errors
    ///
    /// Returns [`ChaosError::HelperNotReady`] once the policy is exhausted, or
    /// [`ChaosError::Aborted`].
    pub async fn poll_ready(
        &self,
        helper: &HelperResource,
        policy: &RetryPolicy,
        abort: &AbortSignal,
    ) -> Result<HelperPhase, ChaosError> {
        let phase = retry_abortable(policy, abort, |_| self.ready_once(helper)).await?;
        tracing::info!(helper = %helper.name, ?phase, "[Status]: Helper is up");
        Ok(phase)
    }

    async fn ready_once(&self, helper: &HelperResource) -> Result<HelperPhase, ChaosError> {
        let status = self
            .observe(helper)
            .await?
            .ok_or_else(|| ChaosError::HelperNotReady {
                helper: helper.name.clone(),
                reason: "no helper found with matching labels".to_string(),
            })?;
        match status.phase {
            HelperPhase::Pending => Err(ChaosError::HelperNotReady {
                helper: helper.name.clone(),
                reason: "helper is in Pending state".to_string(),
            }),
            phase => Ok(phase),
        }
    }

    /// Poll `helper` through one sustain window
    ///
    /// A bounded helper that is still running when `window` ends counts as
    /// done. A self-terminating helper gets `window + grace` to finish.
    ///
    /// # Errors
    ///
    /// Returns [`ChaosError::HelperFailed`] if the helper ends failed,
    /// [`ChaosError::StatusTimeout`] if a self-terminating helper outlives
    /// its budget, or [`ChaosError::Aborted`].
    pub async fn poll_complete(
        &self,
        helper: &HelperResource,
        window: Duration,
        lifetime: FaultLifetime,
        grace: Duration,
        interval: Duration,
        abort: &AbortSignal,
    ) -> Result<HelperPhase, ChaosError> {
        let interval = interval.max(Duration::from_millis(1));
        let limit = match lifetime {
            FaultLifetime::Bounded => window,
            FaultLifetime::SelfTerminating => window + grace,
        };
        let times = u32::try_from(limit.as_millis().div_ceil(interval.as_millis()))
            .unwrap_or(u32::MAX)
            .saturating_add(1);
        let policy = RetryPolicy::new(times, interval);
        let started = Instant::now();

        let phase = retry_abortable(&policy, abort, |_| {
            self.complete_once(helper, started, window, lifetime, times)
        })
        .await?;

        if phase == HelperPhase::Failed {
            return Err(ChaosError::HelperFailed {
                helper: helper.name.clone(),
                reason: "helper exited in Failed phase".to_string(),
            });
        }
        Ok(phase)
    }

    async fn complete_once(
        &self,
        helper: &HelperResource,
        started: Instant,
        window: Duration,
        lifetime: FaultLifetime,
        attempts: u32,
    ) -> Result<HelperPhase, ChaosError> {
        let status = self
            .observe(helper)
            .await?
            .ok_or_else(|| ChaosError::HelperFailed {
                helper: helper.name.clone(),
                reason: "helper disappeared while sustaining".to_string(),
            })?;

        if status.phase.is_terminal() {
            return Ok(status.phase);
        }
        if lifetime == FaultLifetime::Bounded && started.elapsed() >= window {
            return Ok(status.phase);
        }
        Err(ChaosError::StatusTimeout {
            attempts,
            reason: format!("helper {} still {:?}", helper.name, status.phase),
        })
    }

    /// Release `helper` at the end of a target's run, per its cleanup policy
    ///
    /// # Errors
    ///
    /// Returns [`ChaosError::Cleanup`] if deletion fails or is not confirmed.
    pub async fn release(
        &self,
        helper: &HelperResource,
        failed: bool,
        policy: &RetryPolicy,
    ) -> Result<Release, ChaosError> {
        self.forget(helper);
        if !helper.cleanup_policy.should_delete(failed) {
            self.stats.lock().retained += 1;
            tracing::info!(helper = %helper.name, policy = ?helper.cleanup_policy, "[Cleanup]: Retaining helper");
            return Ok(Release::Retained);
        }
        self.delete_confirmed(helper, policy).await?;
        Ok(Release::Deleted)
    }

    /// Release `helper` between iterations
    ///
    /// A helper that is still running is always deleted so the next
    /// iteration never overlaps it; a finished helper follows its policy.
    ///
    /// # Errors
    ///
    /// Returns [`ChaosError::Cleanup`] if deletion fails or is not confirmed.
    pub async fn recycle(
        &self,
        helper: &HelperResource,
        policy: &RetryPolicy,
    ) -> Result<Release, ChaosError> {
        let running = self
            .observe(helper)
            .await
            .map_err(|e| self.cleanup_error(&helper.selector(), &e.to_string()))?
            .is_some_and(|s| !s.phase.is_terminal());
        if running {
            self.forget(helper);
            self.delete_confirmed(helper, policy).await?;
            return Ok(Release::Deleted);
        }
        self.release(helper, false, policy).await
    }

    /// Delete every helper of a batch by its shared label
    ///
    /// # Errors
    ///
    /// Returns [`ChaosError::Cleanup`] if deletion fails or is not confirmed.
    pub async fn delete_batch(
        &self,
        batch: &BatchLabel,
        helpers: &[HelperResource],
        policy: &RetryPolicy,
    ) -> Result<(), ChaosError> {
        for helper in helpers {
            self.forget(helper);
        }
        let selector = batch.selector();
        self.api
            .delete_helpers(&self.namespace, &selector)
            .await
            .map_err(|e| self.cleanup_error(&selector, &e.to_string()))?;
        self.wait_gone(&selector, policy).await?;
        self.stats.lock().deleted += helpers.len();
        tracing::info!(batch = %batch.value(), count = helpers.len(), "[Cleanup]: Batch deleted");
        Ok(())
    }

    /// Delete the live helper of `target_key` without waiting
    ///
    /// # Errors
    ///
    /// Returns [`ChaosError::Cleanup`] if the delete request fails.
    pub async fn force_delete(&self, target_key: &str) -> Result<Option<String>, ChaosError> {
        let Some((_, helper)) = self.active.remove(target_key) else {
            return Ok(None);
        };
        self.api
            .delete_helper(&self.namespace, &helper.name)
            .await
            .map_err(|e| self.cleanup_error(&helper.selector(), &e.to_string()))?;
        self.stats.lock().deleted += 1;
        Ok(Some(helper.name))
    }

    /// Live helper of `target_key`, if any
    #[must_use]
    pub fn live(&self, target_key: &str) -> Option<HelperResource> {
        self.active.get(target_key).map(|h| h.clone())
    }

    /// Number of live helpers
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Statistics snapshot
    #[must_use]
    pub fn stats(&self) -> HelperStats {
        self.stats.lock().clone()
    }

    fn forget(&self, helper: &HelperResource) {
        self.active
            .remove_if(&helper.target_key, |_, live| live.name == helper.name);
    }

    async fn delete_confirmed(
        &self,
        helper: &HelperResource,
        policy: &RetryPolicy,
    ) -> Result<(), ChaosError> {
        let selector = helper.selector();
        self.api
            .delete_helper(&self.namespace, &helper.name)
            .await
            .map_err(|e| self.cleanup_error(&selector, &e.to_string()))?;
        self.wait_gone(&selector, policy).await?;
        self.stats.lock().deleted += 1;
        tracing::debug!(helper = %helper.name, "[Cleanup]: Helper deleted");
        Ok(())
    }

    async fn wait_gone(&self, selector: &Selector, policy: &RetryPolicy) -> Result<(), ChaosError> {
        retry(policy, |_| self.gone_once(selector))
            .await
            .map_err(|e| match e {
                ChaosError::Cleanup { .. } => {
                    self.record_cleanup_failure();
                    e
                }
                other => self.cleanup_error(selector, &other.to_string()),
            })
    }

    async fn gone_once(&self, selector: &Selector) -> Result<(), ChaosError> {
        let remaining = self.api.list_helpers(&self.namespace, selector).await?;
        if remaining.is_empty() {
            Ok(())
        } else {
            Err(ChaosError::Cleanup {
                selector: selector.to_string(),
                reason: format!("{} helper(s) not yet terminated", remaining.len()),
            })
        }
    }

    fn cleanup_error(&self, selector: &Selector, reason: &str) -> ChaosError {
        self.record_cleanup_failure();
        ChaosError::Cleanup {
            selector: selector.to_string(),
            reason: reason.to_string(),
        }
    }

    fn record_cleanup_failure(&self) {
        self.stats.lock().cleanup_failures += 1;
        metrics::counter!("ruckus_helper_cleanup_failures_total", "fault" => self.fault.clone())
            .increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{HelperScript, SimCluster};
    use crate::types::TargetKind;

    fn setup(sim: SimCluster) -> (Arc<SimCluster>, HelperManager) {
        let sim = Arc::new(sim);
        let manager = HelperManager::new(sim.clone(), "chaos", "pod-delete", SessionId::new());
        (sim, manager)
    }

    fn pod() -> Target {
        Target::new(TargetKind::Pod, "default", "web-0", "Running")
    }

    fn payload() -> Payload {
        Payload::new("kill", ["web-0"]).with_duration(Duration::from_secs(5))
    }

    #[tokio::test(start_paused = true)]
    async fn second_create_for_same_target_rejected() {
        let (_, manager) = setup(SimCluster::new().with_target(pod()));
        let helper = manager
            .create(&pod(), payload(), CleanupPolicy::Always, None)
            .await
            .unwrap();
        assert_eq!(helper.run_id.as_str().len(), RunId::LEN);
        assert_eq!(helper.labels.get(PART_OF_LABEL), Some("ruckus"));

        let err = manager
            .create(&pod(), payload(), CleanupPolicy::Always, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ChaosError::Injection { .. }));
        assert_eq!(manager.active_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn never_ready_helper_times_out() {
        let (_, manager) = setup(
            SimCluster::new()
                .with_target(pod())
                .with_script("web-0", HelperScript::never_ready()),
        );
        let helper = manager
            .create(&pod(), payload(), CleanupPolicy::Always, None)
            .await
            .unwrap();
        let policy = RetryPolicy::new(5, Duration::from_secs(1));
        let err = manager
            .poll_ready(&helper, &policy, &AbortSignal::new())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ChaosError::HelperNotReady {
                helper: helper.name.clone(),
                reason: "helper is in Pending state".to_string()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn self_terminating_helper_completes() {
        let (_, manager) = setup(SimCluster::new().with_target(pod()));
        let helper = manager
            .create(&pod(), payload(), CleanupPolicy::Always, None)
            .await
            .unwrap();
        let abort = AbortSignal::new();
        manager
            .poll_ready(&helper, &RetryPolicy::new(10, Duration::from_secs(1)), &abort)
            .await
            .unwrap();
        let phase = manager
            .poll_complete(
                &helper,
                Duration::from_secs(5),
                FaultLifetime::SelfTerminating,
                Duration::from_secs(10),
                Duration::from_secs(1),
                &abort,
            )
            .await
            .unwrap();
        assert_eq!(phase, HelperPhase::Succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_helper_reported() {
        let (_, manager) = setup(
            SimCluster::new()
                .with_target(pod())
                .with_script("web-0", HelperScript::failing_after(Duration::from_secs(2))),
        );
        let helper = manager
            .create(&pod(), payload(), CleanupPolicy::Always, None)
            .await
            .unwrap();
        let err = manager
            .poll_complete(
                &helper,
                Duration::from_secs(10),
                FaultLifetime::SelfTerminating,
                Duration::from_secs(10),
                Duration::from_secs(1),
                &AbortSignal::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ChaosError::HelperFailed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn release_honors_policy() {
        let (sim, manager) = setup(SimCluster::new().with_target(pod()));
        let policy = RetryPolicy::new(3, Duration::from_secs(1));

        let helper = manager
            .create(&pod(), payload(), CleanupPolicy::OnFailure, None)
            .await
            .unwrap();
        assert_eq!(manager.release(&helper, false, &policy).await.unwrap(), Release::Retained);
        assert_eq!(sim.remaining_helpers(), 1);
        assert_eq!(manager.active_count(), 0);

        let helper = manager
            .create(&pod(), payload(), CleanupPolicy::OnFailure, None)
            .await
            .unwrap();
        assert_eq!(manager.release(&helper, true, &policy).await.unwrap(), Release::Deleted);
        assert_eq!(sim.remaining_helpers(), 1);
        assert_eq!(manager.stats().deleted, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_deletion_is_a_cleanup_error() {
        let (_, manager) = setup(
            SimCluster::new()
                .with_target(pod())
                .with_delete_lag(Duration::from_secs(60)),
        );
        let helper = manager
            .create(&pod(), payload(), CleanupPolicy::Always, None)
            .await
            .unwrap();
        let err = manager
            .release(&helper, false, &RetryPolicy::new(3, Duration::from_secs(1)))
            .await
            .unwrap_err();
        assert!(err.is_best_effort());
        assert_eq!(manager.stats().cleanup_failures, 1);
    }
}
