//! End-to-end sessions against the simulated control plane

use pretty_assertions::assert_eq;
use ruckus_core::prelude::*;
use parking_lot::Mutex;
use ruckus_core::{
    fail_step, ChaosEvent, EventKind, EventRecorder, HelperScript, MemoryRecorder, Phase,
    ProbeSet, ProbeStage, TargetStatus,
};
use ruckus_test_utils::{
    fast_session, node_cluster, pod_cluster, CountingFault, StaticProbe, NAMESPACE,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn nginx() -> Selector {
    Selector::parse("app=nginx").unwrap()
}

/// Target names in the order their events first appear
fn event_order(recorder: &MemoryRecorder) -> Vec<String> {
    let mut order: Vec<String> = Vec::new();
    for event in recorder.events() {
        if let Some(target) = event.target {
            if order.last() != Some(&target) {
                order.push(target);
            }
        }
    }
    order
}

#[tokio::test(start_paused = true)]
async fn serial_session_processes_half_the_pods_one_at_a_time() {
    // Helpers exit early so every target finishes its windows well inside the duration
    let sim = Arc::new(
        pod_cluster(10)
            .with_default_script(HelperScript::default().with_run_for(Duration::from_secs(1))),
    );
    let recorder = Arc::new(MemoryRecorder::new());
    let session = fast_session()
        .with_chaos_duration(Duration::from_secs(120))
        .with_chaos_interval(Duration::from_secs(40))
        .with_sequence(Sequence::Serial);
    let orchestrator = Orchestrator::new(
        sim.clone(),
        Arc::new(CatalogFault::new(Experiment::PodCpuHog)),
        session,
    )
    .with_recorder(recorder.clone());
    let spec = TargetSpec::by_selector(TargetKind::Pod, NAMESPACE, nginx()).with_percentage(50);

    let report = orchestrator.run(&spec, std::future::pending()).await.unwrap();
    let result = &report.result;

    assert_eq!(result.verdict, Verdict::Passed);
    assert_eq!(result.targets.len(), 5);
    assert!(result.targets.iter().all(|t| t.phase.is_terminal() && !t.failed()));
    assert_eq!(result.count(TargetStatus::Reverted), 5);
    assert!(result.targets.iter().all(|t| t.iterations == 3));
    assert_eq!(report.exit_code(), 0);

    // Each target's events form one contiguous block
    let order = event_order(&recorder);
    assert_eq!(order.len(), 5);
    let names: Vec<_> = result.targets.iter().map(|t| t.name.clone()).collect();
    assert_eq!(order, names);

    assert_eq!(sim.stats().helpers_created, 15);
    assert_eq!(sim.stats().max_live_per_target, 1);
    assert_eq!(sim.remaining_helpers(), 0);
}

#[tokio::test(start_paused = true)]
async fn serial_target_runs_every_iteration() {
    let sim = Arc::new(pod_cluster(1));
    let session = fast_session()
        .with_chaos_duration(Duration::from_secs(30))
        .with_chaos_interval(Duration::from_secs(10))
        .with_sequence(Sequence::Serial);
    let orchestrator = Orchestrator::new(
        sim.clone(),
        Arc::new(CatalogFault::new(Experiment::PodCpuHog)),
        session,
    );
    let spec = TargetSpec::by_selector(TargetKind::Pod, NAMESPACE, nginx());

    let report = orchestrator.run(&spec, std::future::pending()).await.unwrap();
    let result = &report.result;

    assert_eq!(result.verdict, Verdict::Passed);
    assert_eq!(result.targets.len(), 1);
    assert_eq!(result.targets[0].iterations, 3);
    assert_eq!(result.targets[0].status, TargetStatus::Reverted);
    assert_eq!(sim.stats().helpers_created, 3);
    assert_eq!(sim.remaining_helpers(), 0);
}

#[tokio::test(start_paused = true)]
async fn serial_session_stops_issuing_targets_after_duration() {
    let sim = Arc::new(pod_cluster(5));
    let session = fast_session()
        .with_chaos_duration(Duration::from_secs(15))
        .with_sequence(Sequence::Serial);
    let orchestrator = Orchestrator::new(
        sim.clone(),
        Arc::new(CatalogFault::new(Experiment::PodCpuHog)),
        session,
    );
    let spec = TargetSpec::by_selector(TargetKind::Pod, NAMESPACE, nginx());

    let report = orchestrator.run(&spec, std::future::pending()).await.unwrap();
    let result = &report.result;

    assert_eq!(result.verdict, Verdict::Passed);
    assert_eq!(result.count(TargetStatus::Reverted), 2);
    assert_eq!(result.count(TargetStatus::Skipped), 3);
    assert_eq!(sim.stats().helpers_created, 2);
}

#[tokio::test(start_paused = true)]
async fn parallel_session_survives_one_unready_helper() {
    let sim = Arc::new(pod_cluster(3).with_script("nginx-1", HelperScript::never_ready()));
    let orchestrator = Orchestrator::new(
        sim.clone(),
        Arc::new(CatalogFault::new(Experiment::PodCpuHog)),
        fast_session(),
    );
    let spec = TargetSpec::by_selector(TargetKind::Pod, NAMESPACE, nginx());

    let report = orchestrator.run(&spec, std::future::pending()).await.unwrap();
    let result = &report.result;

    assert_eq!(result.verdict, Verdict::Failed);
    assert_eq!(result.fail_step.as_deref(), Some(fail_step::HELPER_NOT_READY));
    assert_eq!(result.failed_targets(), 1);

    let failed = result.targets.iter().find(|t| t.failed()).unwrap();
    assert_eq!(failed.name, "nginx-1");
    for name in ["nginx-0", "nginx-2"] {
        let target = result.targets.iter().find(|t| t.name == name).unwrap();
        assert_eq!(target.phase, Phase::Completed);
        assert_eq!(target.status, TargetStatus::Reverted);
    }

    assert_eq!(report.exit_code(), 1);
    assert_eq!(sim.remaining_helpers(), 0);
    assert_eq!(sim.stats().max_live_per_target, 1);
}

/// Records when each target entered each stage
#[derive(Default)]
struct StageClock {
    entries: Mutex<Vec<(String, String, Instant)>>,
}

impl StageClock {
    fn entered(&self, stage: &str) -> Vec<(String, Instant)> {
        self.entries
            .lock()
            .iter()
            .filter(|(s, _, _)| s == stage)
            .map(|(_, target, at)| (target.clone(), *at))
            .collect()
    }
}

impl EventRecorder for StageClock {
    fn record(&self, event: ChaosEvent) {
        if let Some(target) = event.target {
            self.entries.lock().push((event.stage, target, Instant::now()));
        }
    }
}

#[tokio::test(start_paused = true)]
async fn parallel_sustain_waits_for_slowest_helper() {
    let sim = Arc::new(pod_cluster(3).with_script(
        "nginx-2",
        HelperScript::default().with_ready_after(Duration::from_secs(5)),
    ));
    let clock = Arc::new(StageClock::default());
    let orchestrator = Orchestrator::new(
        sim.clone(),
        Arc::new(CatalogFault::new(Experiment::PodCpuHog)),
        fast_session(),
    )
    .with_recorder(clock.clone());
    let spec = TargetSpec::by_selector(TargetKind::Pod, NAMESPACE, nginx());

    let report = orchestrator.run(&spec, std::future::pending()).await.unwrap();
    assert_eq!(report.result.verdict, Verdict::Passed);

    let injecting = clock.entered(Phase::Injecting.label());
    assert_eq!(injecting.len(), 3);
    let slow_ready = injecting
        .iter()
        .find(|(target, _)| target == "nginx-2")
        .map(|(_, at)| *at + Duration::from_secs(5))
        .unwrap();

    // Fast helpers are ready after a second, but nobody sustains before nginx-2 runs
    let sustaining = clock.entered(Phase::Sustaining.label());
    assert_eq!(sustaining.len(), 3);
    for (target, at) in &sustaining {
        assert!(*at >= slow_ready, "{target} sustained before the slowest helper was ready");
    }
    let first = sustaining.iter().map(|(_, at)| *at).min().unwrap();
    let last = sustaining.iter().map(|(_, at)| *at).max().unwrap();
    assert_eq!(first, last);
}

#[tokio::test(start_paused = true)]
async fn abort_mid_sustain_reverts_in_flight_targets() {
    let sim = Arc::new(node_cluster(2));
    let fault = Arc::new(CountingFault::new(Arc::new(CatalogFault::new(
        Experiment::NodeTaint,
    ))));
    let recorder = Arc::new(MemoryRecorder::new());
    let session = fast_session()
        .with_chaos_duration(Duration::from_secs(60))
        .with_chaos_interval(Duration::ZERO);
    let orchestrator = Orchestrator::new(sim.clone(), fault.clone(), session)
        .with_recorder(recorder.clone());
    let spec = TargetSpec::by_selector(TargetKind::Node, "", Selector::all());

    let report = orchestrator
        .run(&spec, tokio::time::sleep(Duration::from_secs(20)))
        .await
        .unwrap();

    assert_eq!(report.result.verdict, Verdict::Stopped);
    assert_eq!(report.result.fail_step.as_deref(), Some(fail_step::ABORTED));

    let outcome = report.abort.as_ref().unwrap();
    assert!(outcome.injected);
    assert_eq!(outcome.reverted, vec!["node-0".to_string(), "node-1".to_string()]);
    assert!(outcome.failures.is_empty());
    assert_eq!(report.exit_code(), 1);

    assert_eq!(fault.reverted_targets(), vec!["node-0", "node-1"]);
    for name in ["node-0", "node-1"] {
        assert!(fault.reverts(name) >= 1);
        assert_eq!(sim.target(TargetKind::Node, "", name).unwrap().observed_state, "Ready");
    }
    assert_eq!(sim.remaining_helpers(), 0);
    assert!(recorder
        .events()
        .iter()
        .any(|e| e.stage == "Abort" && e.kind == EventKind::Warning));
}

#[tokio::test(start_paused = true)]
async fn during_chaos_probe_failure_fails_session_after_revert() {
    let sim = Arc::new(pod_cluster(2));
    let probes = ProbeSet::new().with_probe(Arc::new(StaticProbe::failing(
        "latency-slo",
        &[ProbeStage::DuringChaos],
    )));
    let orchestrator = Orchestrator::new(
        sim.clone(),
        Arc::new(CatalogFault::new(Experiment::PodNetworkLatency)),
        fast_session(),
    )
    .with_probes(Arc::new(probes));
    let spec = TargetSpec::by_selector(TargetKind::Pod, NAMESPACE, nginx());

    let report = orchestrator.run(&spec, std::future::pending()).await.unwrap();

    assert_eq!(report.result.verdict, Verdict::Failed);
    assert_eq!(
        report.result.fail_step.as_deref(),
        Some(fail_step::DURING_CHAOS_PROBE)
    );
    assert_eq!(report.result.count(TargetStatus::Reverted), 2);
    assert_eq!(sim.remaining_helpers(), 0);
}

#[tokio::test(start_paused = true)]
async fn on_success_policy_keeps_failed_helpers() {
    let sim = Arc::new(
        pod_cluster(2).with_script("nginx-0", HelperScript::failing_after(Duration::from_secs(2))),
    );
    let session = fast_session().with_cleanup_policy(CleanupPolicy::OnSuccess);
    let orchestrator = Orchestrator::new(
        sim.clone(),
        Arc::new(CatalogFault::new(Experiment::PodMemoryHog)),
        session,
    );
    let spec = TargetSpec::by_selector(TargetKind::Pod, NAMESPACE, nginx());

    let report = orchestrator.run(&spec, std::future::pending()).await.unwrap();

    assert_eq!(report.result.verdict, Verdict::Failed);
    assert_eq!(report.result.fail_step.as_deref(), Some(fail_step::HELPER_FAILED));
    assert_eq!(sim.stats().helpers_created, 2);
    assert_eq!(sim.remaining_helpers(), 1);
}
