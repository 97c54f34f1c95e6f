//! Per-target fault lifecycle
//!
//! A [`TargetRun`] moves one target through
//! `Pending -> RampWait -> Injecting -> AwaitingHealthy -> Sustaining ->
//! Reverting -> Verifying -> Completed`, repeating the inject/sustain stretch
//! once per iteration. Every step is a public method that settles its own
//! failure, so executors can drive steps one by one (parallel batches) or
//! call [`TargetRun::drive`] (serial runs).
//!
//! # Failure path
//!
//! Any error, abort included, sends the target through `Reverting` (once a
//! helper may exist) and then to `Failed`. Revert and cleanup problems are
//! kept as warnings; they never stop the remaining steps.

use crate::context::SessionContext;
use crate::error::ChaosError;
use crate::fault::revert_with_retry;
use crate::helper::{BatchLabel, HelperResource};
use crate::phase::{validate_transition, Phase};
use crate::report::{fail_step, ChaosEvent, TargetReport};
use crate::retry::retry_abortable;
use crate::types::{Target, TargetStatus};
use std::time::Duration;
use tokio::time::Instant;

/// Lifecycle state of one target
#[derive(Debug)]
pub struct TargetRun {
    target: Target,
    baseline: Option<String>,
    phase: Phase,
    status: TargetStatus,
    helper: Option<HelperResource>,
    window: Duration,
    iterations: u32,
    sustained: Duration,
    failure: Option<(&'static str, ChaosError)>,
    warnings: Vec<String>,
}

impl TargetRun {
    /// Start tracking `target`
    #[must_use]
    pub fn new(target: Target) -> Self {
        Self {
            target,
            baseline: None,
            phase: Phase::Pending,
            status: TargetStatus::Targeted,
            helper: None,
            window: Duration::ZERO,
            iterations: 0,
            sustained: Duration::ZERO,
            failure: None,
            warnings: Vec::new(),
        }
    }

    /// The target
    #[inline]
    #[must_use]
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Current phase
    #[inline]
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Check if the run has not reached a terminal phase
    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.phase.is_terminal()
    }

    /// Check if the run has failed (or is on the failure path)
    #[inline]
    #[must_use]
    pub fn has_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// Current helper, if one is live
    #[must_use]
    pub fn helper(&self) -> Option<&HelperResource> {
        self.helper.as_ref()
    }

    /// Hand the helper over for collective cleanup
    pub fn take_helper(&mut self) -> Option<HelperResource> {
        self.helper.take()
    }

    /// Total time spent sustaining so far
    #[must_use]
    pub fn sustained(&self) -> Duration {
        self.sustained
    }

    /// Check if another sustain window fits the budget
    #[must_use]
    pub fn has_budget(&self, ctx: &SessionContext) -> bool {
        self.sustained < ctx.session.sustain_budget()
    }

    /// Run every step for this target alone, injecting up to `windows` times
    pub async fn drive(&mut self, ctx: &SessionContext, windows: u32) {
        self.prepare(ctx).await;
        for iteration in 0..windows.max(1) {
            if !self.is_active() {
                break;
            }
            if iteration > 0 {
                self.recycle(ctx).await;
            }
            if !self.is_active() || !self.has_budget(ctx) {
                break;
            }
            self.inject(ctx, None).await;
            self.await_healthy(ctx).await;
            self.sustain(ctx).await;
        }
        self.revert(ctx, true).await;
        self.verify(ctx).await;
    }

    /// Capture the baseline and wait out the ramp time
    pub async fn prepare(&mut self, ctx: &SessionContext) {
        if !self.is_active() {
            return;
        }
        let result = self.try_prepare(ctx).await;
        self.settle(ctx, result).await;
    }

    async fn try_prepare(&mut self, ctx: &SessionContext) -> Result<(), ChaosError> {
        ctx.abort.check()?;
        let baseline = ctx.fault.observe(ctx.api.as_ref(), &self.target).await?;
        self.target.observed_state.clone_from(&baseline);
        ctx.in_flight.register(&self.target, &baseline, self.phase);
        self.baseline = Some(baseline);

        self.advance(ctx, Phase::RampWait)?;
        let ramp = ctx.session.ramp_time;
        if !ramp.is_zero() {
            tracing::info!(
                target_name = %self.target.name,
                "[Ramp]: Waiting for the {}s ramp time before injecting chaos",
                ramp.as_secs()
            );
            ctx.abort.sleep(ramp).await?;
        }
        Ok(())
    }

    /// Create the helper for the next sustain window
    pub async fn inject(&mut self, ctx: &SessionContext, batch: Option<&BatchLabel>) {
        if !self.is_active() {
            return;
        }
        let result = self.try_inject(ctx, batch).await;
        self.settle(ctx, result).await;
    }

    async fn try_inject(
        &mut self,
        ctx: &SessionContext,
        batch: Option<&BatchLabel>,
    ) -> Result<(), ChaosError> {
        self.advance(ctx, Phase::Injecting)?;
        let remaining = ctx.session.sustain_budget().saturating_sub(self.sustained);
        self.window = ctx.session.sustain_window().min(remaining);
        self.iterations += 1;

        let payload = ctx.fault.payload(&self.target, self.window);
        let helper = ctx
            .helpers
            .create(&self.target, payload, ctx.session.cleanup_policy, batch)
            .await?;
        self.helper = Some(helper);
        self.status = TargetStatus::Injected;
        Ok(())
    }

    /// Wait for the helper to leave pending
    pub async fn await_healthy(&mut self, ctx: &SessionContext) {
        if !self.is_active() {
            return;
        }
        let result = self.try_await_healthy(ctx).await;
        self.settle(ctx, result).await;
    }

    async fn try_await_healthy(&mut self, ctx: &SessionContext) -> Result<(), ChaosError> {
        self.advance(ctx, Phase::AwaitingHealthy)?;
        let helper = self.live_helper()?;
        ctx.helpers
            .poll_ready(helper, &ctx.session.status_policy(), &ctx.abort)
            .await?;
        Ok(())
    }

    /// Poll the helper through the current window
    pub async fn sustain(&mut self, ctx: &SessionContext) {
        if !self.is_active() {
            return;
        }
        let result = self.try_sustain(ctx).await;
        self.settle(ctx, result).await;
    }

    async fn try_sustain(&mut self, ctx: &SessionContext) -> Result<(), ChaosError> {
        self.advance(ctx, Phase::Sustaining)?;
        tracing::info!(
            target_name = %self.target.name,
            iteration = self.iterations,
            "[Chaos]: Sustaining chaos for {}s",
            self.window.as_secs()
        );

        let started = Instant::now();
        let helper = self.live_helper()?;
        let outcome = ctx
            .helpers
            .poll_complete(
                helper,
                self.window,
                ctx.fault.lifetime(),
                ctx.session.timeout,
                ctx.session.poll_interval(),
                &ctx.abort,
            )
            .await;
        self.sustained += started.elapsed();
        outcome.map(|_| ())
    }

    /// Release the previous iteration's helper
    pub async fn recycle(&mut self, ctx: &SessionContext) {
        if !self.is_active() {
            return;
        }
        let Some(helper) = self.helper.take() else {
            return;
        };
        let policy = ctx.session.status_policy();
        if let Err(e) = ctx.helpers.recycle(&helper, &policy).await {
            self.helper = Some(helper);
            self.settle(ctx, Err(e)).await;
        }
    }

    /// Undo the fault; optionally release the helper too
    ///
    /// Parallel batches pass `release_helper = false` and delete their
    /// helpers collectively afterwards.
    pub async fn revert(&mut self, ctx: &SessionContext, release_helper: bool) {
        if !self.is_active() {
            return;
        }
        if let Err(e) = self.transition(ctx, Phase::Reverting) {
            self.settle(ctx, Err(e)).await;
            return;
        }
        self.revert_target(ctx).await;
        if release_helper {
            self.release_helper(ctx).await;
        }
    }

    /// Wait for the target to report its baseline state
    pub async fn verify(&mut self, ctx: &SessionContext) {
        if !self.is_active() {
            return;
        }
        let result = self.try_verify(ctx).await;
        self.settle(ctx, result).await;
    }

    async fn try_verify(&mut self, ctx: &SessionContext) -> Result<(), ChaosError> {
        self.transition(ctx, Phase::Verifying)?;
        let baseline = self.baseline.clone().unwrap_or_default();
        let target = &self.target;
        let observed = retry_abortable(&ctx.session.status_policy(), &ctx.abort, |_| {
            verify_once(ctx, target, &baseline)
        })
        .await?;
        self.target.observed_state = observed;
        tracing::info!(target_name = %self.target.name, "[Status]: Target is back to its pre-chaos state");
        self.transition(ctx, Phase::Completed)
    }

    /// Stop tracking and produce the report
    #[must_use]
    pub fn finish(self, ctx: &SessionContext) -> TargetReport {
        ctx.in_flight.remove(&self.target.key());
        let (fail_step, error) = match self.failure {
            Some((step, error)) => (Some(step.to_string()), Some(error.to_string())),
            None => (None, None),
        };
        TargetReport {
            name: self.target.name,
            namespace: self.target.namespace,
            kind: self.target.kind,
            status: self.status,
            phase: self.phase,
            iterations: self.iterations,
            fail_step,
            error,
            warnings: self.warnings,
        }
    }

    /// Record a best-effort problem
    pub fn warn(&mut self, ctx: &SessionContext, error: &ChaosError) {
        tracing::warn!(target_name = %self.target.name, error = %error, "Continuing after non-fatal error");
        ctx.record(ChaosEvent::warning(
            self.phase.label(),
            Some(&self.target.name),
            error.to_string(),
        ));
        self.warnings.push(error.to_string());
    }

    fn live_helper(&self) -> Result<&HelperResource, ChaosError> {
        self.helper.as_ref().ok_or_else(|| {
            ChaosError::control(format!("no live helper for {}", self.target.key()))
        })
    }

    /// Transition after checking the abort signal
    fn advance(&mut self, ctx: &SessionContext, to: Phase) -> Result<(), ChaosError> {
        ctx.abort.check()?;
        self.transition(ctx, to)
    }

    fn transition(&mut self, ctx: &SessionContext, to: Phase) -> Result<(), ChaosError> {
        validate_transition(self.phase, to)?;
        tracing::debug!(target_name = %self.target.name, from = %self.phase, to = %to, "Phase transition");
        ctx.record(ChaosEvent::normal(
            to.label(),
            Some(&self.target.name),
            format!("{} -> {}", self.phase, to),
        ));
        self.phase = to;
        ctx.in_flight.set_phase(&self.target.key(), to);
        Ok(())
    }

    async fn settle(&mut self, ctx: &SessionContext, result: Result<(), ChaosError>) {
        if let Err(error) = result {
            self.fail(ctx, error).await;
        }
    }

    async fn fail(&mut self, ctx: &SessionContext, error: ChaosError) {
        let step = fail_step::for_error(self.phase, &error);
        tracing::warn!(
            target_name = %self.target.name,
            phase = %self.phase,
            error = %error,
            "[Chaos]: Target failed"
        );
        ctx.record(ChaosEvent::warning(
            self.phase.label(),
            Some(&self.target.name),
            format!("{step}: {error}"),
        ));
        metrics::counter!("ruckus_targets_failed_total", "fault" => ctx.fault.name().to_string())
            .increment(1);
        if self.failure.is_none() {
            self.failure = Some((step, error));
        }

        match self.phase {
            Phase::Injecting | Phase::AwaitingHealthy | Phase::Sustaining => {
                if self.transition(ctx, Phase::Reverting).is_ok() {
                    self.revert_target(ctx).await;
                }
                self.release_helper(ctx).await;
            }
            Phase::Reverting => self.release_helper(ctx).await,
            _ => {}
        }
        if self.is_active() {
            let marked = self.transition(ctx, Phase::Failed);
            debug_assert!(marked.is_ok(), "{} has no edge to Failed", self.phase);
            if let Err(e) = marked {
                tracing::error!(
                    target_name = %self.target.name,
                    phase = %self.phase,
                    error = %e,
                    "[Chaos]: Could not mark target failed"
                );
            }
        }
    }

    async fn revert_target(&mut self, ctx: &SessionContext) {
        let Some(baseline) = self.baseline.clone() else {
            return;
        };
        match revert_with_retry(ctx.fault.as_ref(), ctx.api.as_ref(), &self.target, &baseline).await
        {
            Ok(_) => {
                if self.status == TargetStatus::Injected {
                    self.status = TargetStatus::Reverted;
                }
            }
            Err(e) => self.warn(ctx, &e),
        }
    }

    async fn release_helper(&mut self, ctx: &SessionContext) {
        let Some(helper) = self.helper.take() else {
            return;
        };
        let failed = self.has_failed();
        if let Err(e) = ctx
            .helpers
            .release(&helper, failed, &ctx.session.status_policy())
            .await
        {
            self.warn(ctx, &e);
        }
    }
}

async fn verify_once(
    ctx: &SessionContext,
    target: &Target,
    baseline: &str,
) -> Result<String, ChaosError> {
    let observed = ctx.fault.observe(ctx.api.as_ref(), target).await?;
    if observed == baseline {
        Ok(observed)
    } else {
        Err(ChaosError::StatusTimeout {
            attempts: ctx.session.status_policy().times(),
            reason: format!(
                "{} is {observed:?}, expected {baseline:?}",
                target.name
            ),
        })
    }
}
