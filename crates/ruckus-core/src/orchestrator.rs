//! Session orchestrator
//!
//! Ties the parts together for one session:
//!
//! 1. validate the session and resolve targets
//! 2. spawn the abort watcher
//! 3. run pre-chaos probes
//! 4. execute every target (serial or parallel)
//! 5. wait out the post-chaos ramp and run post-chaos probes
//! 6. collect the watcher's outcome and build the [`ChaosResult`]

use crate::abort::{AbortOutcome, AbortWatcher};
use crate::api::ControlApi;
use crate::context::SessionContext;
use crate::error::ChaosError;
use crate::executor::{ExecutionReport, Executor};
use crate::fault::Fault;
use crate::probe::{NoProbes, ProbeRunner, ProbeStage};
use crate::report::{
    fail_step, ChaosEvent, ChaosResult, EventRecorder, TargetReport, TracingRecorder, Verdict,
};
use crate::resolver::{resolve, TargetSpec};
use crate::session::ChaosSession;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Namespace helpers are created in unless configured
pub const DEFAULT_CHAOS_NAMESPACE: &str = "ruckus";

/// Exit code for a passed session
pub const EXIT_PASSED: i32 = 0;
/// Exit code for a failed session
pub const EXIT_FAILED: i32 = 1;

/// Session result plus what the abort watcher did, if it fired
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    /// User-visible result
    pub result: ChaosResult,
    /// Abort outcome, present only when the session was aborted
    pub abort: Option<AbortOutcome>,
}

impl SessionReport {
    /// Process exit code
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        if let Some(outcome) = &self.abort {
            return outcome.exit_code();
        }
        match self.result.verdict {
            Verdict::Passed => EXIT_PASSED,
            Verdict::Failed | Verdict::Stopped => EXIT_FAILED,
        }
    }
}

/// Runs chaos sessions for one fault
pub struct Orchestrator {
    api: Arc<dyn ControlApi>,
    fault: Arc<dyn Fault>,
    session: ChaosSession,
    namespace: String,
    recorder: Arc<dyn EventRecorder>,
    probes: Arc<dyn ProbeRunner>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("fault", &self.fault.name())
            .field("session", &self.session)
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Create an orchestrator with log-only events and no probes
    #[must_use]
    pub fn new(api: Arc<dyn ControlApi>, fault: Arc<dyn Fault>, session: ChaosSession) -> Self {
        Self {
            api,
            fault,
            session,
            namespace: DEFAULT_CHAOS_NAMESPACE.to_string(),
            recorder: Arc::new(TracingRecorder),
            probes: Arc::new(NoProbes),
        }
    }

    /// Set the helper namespace (builder)
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the event sink (builder)
    #[must_use]
    pub fn with_recorder(mut self, recorder: Arc<dyn EventRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    /// Set the probe runner (builder)
    #[must_use]
    pub fn with_probes(mut self, probes: Arc<dyn ProbeRunner>) -> Self {
        self.probes = probes;
        self
    }

    /// Session parameters
    #[must_use]
    pub fn session(&self) -> &ChaosSession {
        &self.session
    }

    /// Run one session against the targets `spec` resolves to
    ///
    /// `abort` completes when the session must stop (a signal in the binary).
    ///
    /// # Errors
    ///
    /// Only session-level problems are returned: invalid configuration, no
    /// matching targets, or control plane errors while resolving. Target
    /// failures are reported in the result.
    pub async fn run<A>(&self, spec: &TargetSpec, abort: A) -> Result<SessionReport, ChaosError>
    where
        A: Future<Output = ()> + Send + 'static,
    {
        self.session.validate()?;
        let started_at = Utc::now();
        let targets = resolve(self.api.as_ref(), spec).await?;

        let ctx = Arc::new(
            SessionContext::new(
                self.session.clone(),
                self.api.clone(),
                self.fault.clone(),
                &self.namespace,
            )
            .with_recorder(self.recorder.clone())
            .with_probes(self.probes.clone()),
        );
        tracing::info!(
            session = %ctx.id,
            fault = self.fault.name(),
            targets = targets.len(),
            sequence = ?self.session.sequence,
            "[Chaos]: Starting chaos session"
        );
        ctx.record(ChaosEvent::normal(
            "Session",
            None,
            format!("{} started on {} target(s)", self.fault.name(), targets.len()),
        ));

        let (finished_tx, finished_rx) = oneshot::channel::<()>();
        let watcher = tokio::spawn(AbortWatcher::new(ctx.clone()).watch(abort, async move {
            let _ = finished_rx.await;
        }));

        let mut session_failure: Option<(&'static str, ChaosError)> = None;
        let execution = match ctx.probes.run(ProbeStage::PreChaos, &ctx.session).await {
            Ok(()) => Executor::new(ctx.clone()).run(targets).await,
            Err(e) => {
                tracing::warn!(error = %e, "[Probe]: Pre-chaos probes failed, skipping injection");
                session_failure = Some((fail_step::PRE_CHAOS_PROBE, e));
                ExecutionReport {
                    targets: targets.iter().map(TargetReport::skipped).collect(),
                    probe_failure: None,
                }
            }
        };
        if let Some(e) = execution.probe_failure.clone() {
            session_failure.get_or_insert((fail_step::DURING_CHAOS_PROBE, e));
        }

        if session_failure.is_none() && !ctx.abort.is_aborted() {
            if let Err((step, e)) = self.post_chaos(&ctx).await {
                session_failure = Some((step, e));
            }
        }

        let _ = finished_tx.send(());
        let abort_outcome = watcher
            .await
            .map_err(|e| ChaosError::control(format!("abort watcher failed: {e}")))?;

        let result = self.assemble(&ctx, execution, session_failure, abort_outcome.as_ref(), started_at);
        tracing::info!(
            session = %ctx.id,
            verdict = ?result.verdict,
            failed = result.failed_targets(),
            "[Chaos]: Chaos session finished"
        );
        ctx.record(ChaosEvent::normal(
            "Session",
            None,
            format!("{} finished: {:?}", self.fault.name(), result.verdict),
        ));

        Ok(SessionReport {
            result,
            abort: abort_outcome,
        })
    }

    /// Post-chaos ramp, then post-chaos probes
    async fn post_chaos(&self, ctx: &SessionContext) -> Result<(), (&'static str, ChaosError)> {
        let ramp = ctx.session.ramp_time;
        if !ramp.is_zero() {
            tracing::info!(
                "[Ramp]: Waiting for the {}s ramp time after injecting chaos",
                ramp.as_secs()
            );
            if ctx.abort.sleep(ramp).await.is_err() {
                return Ok(());
            }
        }
        ctx.probes
            .run(ProbeStage::PostChaos, &ctx.session)
            .await
            .map_err(|e| (fail_step::POST_CHAOS_PROBE, e))
    }

    fn assemble(
        &self,
        ctx: &SessionContext,
        execution: ExecutionReport,
        session_failure: Option<(&'static str, ChaosError)>,
        abort: Option<&AbortOutcome>,
        started_at: chrono::DateTime<Utc>,
    ) -> ChaosResult {
        let mut warnings = Vec::new();
        if let Some((step, e)) = &session_failure {
            warnings.push(format!("{step}: {e}"));
        }
        if let Some(outcome) = abort {
            warnings.extend(outcome.failures.iter().cloned());
        }

        let first_target_failure = execution
            .targets
            .iter()
            .find(|t| t.failed())
            .and_then(|t| t.fail_step.clone());

        let (verdict, step) = if ctx.abort.is_aborted() {
            (Verdict::Stopped, Some(fail_step::ABORTED.to_string()))
        } else if let Some((step, _)) = session_failure {
            (Verdict::Failed, Some(step.to_string()))
        } else if let Some(step) = first_target_failure {
            (Verdict::Failed, Some(step))
        } else {
            (Verdict::Passed, None)
        };

        ChaosResult {
            session_id: ctx.id,
            experiment: self.fault.name().to_string(),
            verdict,
            fail_step: step,
            targets: execution.targets,
            warnings,
            started_at,
            finished_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogFault, Experiment};
    use crate::labels::Selector;
    use crate::probe::{ProbeSet, StateProbe};
    use crate::report::MemoryRecorder;
    use crate::sim::SimCluster;
    use crate::types::{Target, TargetKind, TargetStatus};
    use std::time::Duration;

    fn cluster(n: usize) -> Arc<SimCluster> {
        Arc::new(SimCluster::new().with_targets(
            (0..n).map(|i| Target::new(TargetKind::Pod, "default", format!("web-{i}"), "Running")),
        ))
    }

    fn session() -> ChaosSession {
        ChaosSession::new()
            .with_chaos_duration(Duration::from_secs(10))
            .with_chaos_interval(Duration::from_secs(10))
            .with_status_check(Duration::from_secs(30), Duration::from_secs(1))
    }

    #[tokio::test(start_paused = true)]
    async fn parallel_session_passes() {
        let sim = cluster(3);
        let orchestrator = Orchestrator::new(
            sim.clone(),
            Arc::new(CatalogFault::new(Experiment::PodCpuHog)),
            session(),
        );
        let spec = TargetSpec::by_selector(TargetKind::Pod, "default", Selector::all());

        let report = orchestrator
            .run(&spec, std::future::pending())
            .await
            .unwrap();

        assert_eq!(report.result.verdict, Verdict::Passed);
        assert_eq!(report.result.count(TargetStatus::Reverted), 3);
        assert_eq!(report.exit_code(), EXIT_PASSED);
        assert!(report.abort.is_none());
        assert_eq!(sim.remaining_helpers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn no_targets_is_a_session_error() {
        let orchestrator = Orchestrator::new(
            cluster(0),
            Arc::new(CatalogFault::new(Experiment::PodDelete)),
            session(),
        );
        let spec = TargetSpec::by_selector(TargetKind::Pod, "default", Selector::all());

        let err = orchestrator.run(&spec, std::future::pending()).await.unwrap_err();
        assert!(matches!(err, ChaosError::NoTargetsFound { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn pre_chaos_probe_failure_skips_injection() {
        let sim = cluster(2);
        let probe = StateProbe::new(
            "web-degraded",
            sim.clone(),
            TargetKind::Pod,
            "default",
            Selector::all(),
            "Degraded",
            vec![ProbeStage::PreChaos],
        );
        let recorder = Arc::new(MemoryRecorder::new());
        let orchestrator = Orchestrator::new(
            sim.clone(),
            Arc::new(CatalogFault::new(Experiment::PodDelete)),
            session(),
        )
        .with_recorder(recorder.clone())
        .with_probes(Arc::new(ProbeSet::new().with_probe(Arc::new(probe))));
        let spec = TargetSpec::by_selector(TargetKind::Pod, "default", Selector::all());

        let report = orchestrator.run(&spec, std::future::pending()).await.unwrap();

        assert_eq!(report.result.verdict, Verdict::Failed);
        assert_eq!(report.result.fail_step.as_deref(), Some(fail_step::PRE_CHAOS_PROBE));
        assert_eq!(report.result.count(TargetStatus::Skipped), 2);
        assert_eq!(sim.stats().helpers_created, 0);
        assert_eq!(report.exit_code(), EXIT_FAILED);
    }

    #[tokio::test(start_paused = true)]
    async fn abort_before_injection_exits_cleanly() {
        let sim = cluster(2);
        let orchestrator = Orchestrator::new(
            sim.clone(),
            Arc::new(CatalogFault::new(Experiment::PodDelete)),
            session().with_ramp_time(Duration::from_secs(60)),
        );
        let spec = TargetSpec::by_selector(TargetKind::Pod, "default", Selector::all());

        let report = orchestrator
            .run(&spec, tokio::time::sleep(Duration::from_secs(5)))
            .await
            .unwrap();

        assert_eq!(report.result.verdict, Verdict::Stopped);
        assert_eq!(report.result.fail_step.as_deref(), Some(fail_step::ABORTED));
        let outcome = report.abort.as_ref().unwrap();
        assert!(!outcome.injected);
        assert_eq!(report.exit_code(), 0);
        assert_eq!(sim.stats().helpers_created, 0);
    }
}
