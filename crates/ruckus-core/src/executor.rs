//! Concurrency executor
//!
//! Drives the resolved targets through their lifecycles.
//!
//! - **Serial**: one target at a time in resolver order, each running the
//!   session's full iteration count. After each target the shared clock is
//!   checked; once the chaos duration is spent (or the session is aborted)
//!   the remaining targets are reported as skipped.
//! - **Parallel**: one batch. Every target is prepared, then all helpers are
//!   created under a shared batch label, the slowest helper gates the
//!   sustain stage, all targets sustain together, and the batch is reverted
//!   and cleaned up together before each target is verified.
//!
//! A failing target never stops its siblings.

use crate::context::SessionContext;
use crate::error::ChaosError;
use crate::helper::{BatchLabel, HelperResource};
use crate::lifecycle::TargetRun;
use crate::probe::ProbeStage;
use crate::report::TargetReport;
use crate::types::{Sequence, Target};
use futures::future::join_all;
use std::sync::Arc;
use tokio::time::Instant;

/// What the executor hands back
#[derive(Debug, Default)]
pub struct ExecutionReport {
    /// Per-target reports in execution order
    pub targets: Vec<TargetReport>,
    /// First during-chaos probe failure
    pub probe_failure: Option<ChaosError>,
}

impl ExecutionReport {
    /// Check if any target failed
    #[must_use]
    pub fn any_failed(&self) -> bool {
        self.targets.iter().any(TargetReport::failed)
    }
}

/// Session executor
#[derive(Debug)]
pub struct Executor {
    ctx: Arc<SessionContext>,
}

impl Executor {
    /// Create an executor over a session context
    #[must_use]
    pub fn new(ctx: Arc<SessionContext>) -> Self {
        Self { ctx }
    }

    /// Run every target per the session's sequence
    pub async fn run(&self, targets: Vec<Target>) -> ExecutionReport {
        match self.ctx.session.sequence {
            Sequence::Serial => self.run_serial(targets).await,
            Sequence::Parallel => self.run_parallel(targets).await,
        }
    }

    async fn run_serial(&self, targets: Vec<Target>) -> ExecutionReport {
        let ctx = self.ctx.as_ref();
        let started = Instant::now();
        let mut report = ExecutionReport::default();
        let mut queue = targets.into_iter();

        tracing::info!(fault = ctx.fault.name(), "[Chaos]: Injecting chaos in serial mode");
        while let Some(target) = queue.next() {
            let spent = started.elapsed() >= ctx.session.chaos_duration;
            if !report.targets.is_empty() && (spent || ctx.abort.is_aborted()) {
                tracing::info!(
                    skipped = queue.len() + 1,
                    "[Chaos]: Chaos duration elapsed, skipping remaining targets"
                );
                report.targets.push(TargetReport::skipped(&target));
                report
                    .targets
                    .extend(queue.by_ref().map(|t| TargetReport::skipped(&t)));
                break;
            }

            let mut run = TargetRun::new(target);
            let (_, probe) = tokio::join!(
                run.drive(ctx, ctx.session.iterations()),
                ctx.probes.run(ProbeStage::DuringChaos, &ctx.session)
            );
            if let Err(e) = probe {
                report.probe_failure.get_or_insert(e);
            }
            report.targets.push(run.finish(ctx));
        }
        report
    }

    async fn run_parallel(&self, targets: Vec<Target>) -> ExecutionReport {
        let ctx = self.ctx.as_ref();
        let batch = BatchLabel::new(ctx.fault.name());
        let mut report = ExecutionReport::default();
        let mut runs: Vec<TargetRun> = targets.into_iter().map(TargetRun::new).collect();

        tracing::info!(
            fault = ctx.fault.name(),
            batch = %batch.value(),
            targets = runs.len(),
            "[Chaos]: Injecting chaos in parallel mode"
        );
        join_all(runs.iter_mut().map(|r| r.prepare(ctx))).await;

        for iteration in 0..ctx.session.iterations() {
            let mut batch_runs: Vec<&mut TargetRun> = runs
                .iter_mut()
                .filter(|r| r.is_active() && r.has_budget(ctx))
                .collect();
            if batch_runs.is_empty() {
                break;
            }

            if iteration > 0 {
                join_all(batch_runs.iter_mut().map(|r| r.recycle(ctx))).await;
            }
            join_all(batch_runs.iter_mut().map(|r| r.inject(ctx, Some(&batch)))).await;
            join_all(batch_runs.iter_mut().map(|r| r.await_healthy(ctx))).await;

            let sustain = join_all(batch_runs.iter_mut().map(|r| r.sustain(ctx)));
            if iteration == 0 {
                let (_, probe) = tokio::join!(
                    sustain,
                    ctx.probes.run(ProbeStage::DuringChaos, &ctx.session)
                );
                report.probe_failure = probe.err();
            } else {
                sustain.await;
            }
        }

        join_all(runs.iter_mut().map(|r| r.revert(ctx, false))).await;
        self.cleanup_batch(&batch, &mut runs).await;
        join_all(runs.iter_mut().map(|r| r.verify(ctx))).await;

        report.targets = runs.into_iter().map(|r| r.finish(ctx)).collect();
        report
    }

    /// Delete the batch's helpers, collectively when every one qualifies
    async fn cleanup_batch(&self, batch: &BatchLabel, runs: &mut [TargetRun]) {
        let ctx = self.ctx.as_ref();
        let policy = ctx.session.status_policy();
        let helpers: Vec<(usize, HelperResource)> = runs
            .iter_mut()
            .enumerate()
            .filter_map(|(i, r)| r.take_helper().map(|h| (i, h)))
            .collect();
        if helpers.is_empty() {
            return;
        }

        // A retained helper carries the batch label too.
        let collective = ctx.helpers.stats().retained == 0
            && helpers
                .iter()
                .all(|(i, h)| h.cleanup_policy.should_delete(runs[*i].has_failed()));

        if collective {
            let resources: Vec<HelperResource> = helpers.iter().map(|(_, h)| h.clone()).collect();
            if let Err(e) = ctx.helpers.delete_batch(batch, &resources, &policy).await {
                for (i, _) in &helpers {
                    runs[*i].warn(ctx, &e);
                }
            }
            return;
        }

        for (i, helper) in helpers {
            let failed = runs[i].has_failed();
            if let Err(e) = ctx.helpers.release(&helper, failed, &policy).await {
                runs[i].warn(ctx, &e);
            }
        }
    }
}
