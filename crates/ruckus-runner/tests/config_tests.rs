use pretty_assertions::assert_eq;
use rand::rngs::StdRng;
use rand::SeedableRng;
use ruckus_core::{
    ChaosError, CleanupPolicy, ControlApi, Experiment, Orchestrator, ProbeStage, Selector,
    Sequence, TargetKind, Verdict,
};
use ruckus_runner::{ConfigError, Inventory, Overrides, RunnerConfig};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    move |key| vars.get(key).cloned()
}

#[test]
fn test_defaults_match_experiment_defaults() {
    let config = RunnerConfig::layered(None, lookup(&[]), &Overrides::default()).unwrap();
    let session = config.session().unwrap();

    assert_eq!(session.chaos_duration, Duration::from_secs(30));
    assert_eq!(session.chaos_interval, Duration::from_secs(10));
    assert_eq!(session.ramp_time, Duration::ZERO);
    assert_eq!(session.sequence, Sequence::Parallel);
    assert_eq!(session.affected_percentage, 100);
    assert_eq!(session.timeout, Duration::from_secs(180));
    assert_eq!(session.delay, Duration::from_secs(2));
    assert_eq!(session.cleanup_policy, CleanupPolicy::Always);
    assert!(matches!(config.experiment(), Err(ConfigError::MissingExperiment)));
}

#[test]
fn test_layer_precedence() {
    let toml = r#"
        experiment = "pod-delete"
        total_chaos_duration = 60
        chaos_interval = 15
        sequence = "serial"
        app_label = "app=web"
    "#;
    let mut config = RunnerConfig::from_toml_str(toml).unwrap();
    config
        .apply_env(lookup(&[
            ("TOTAL_CHAOS_DURATION", "90"),
            ("SEQUENCE", "parallel"),
            ("JOB_CLEANUP_POLICY", "on-success"),
        ]))
        .unwrap();
    config.apply_overrides(&Overrides {
        duration: Some(120),
        ..Overrides::default()
    });

    let session = config.session().unwrap();
    // CLI beats env beats file
    assert_eq!(session.chaos_duration, Duration::from_secs(120));
    assert_eq!(session.sequence, Sequence::Parallel);
    // File value survives where nothing overrides it
    assert_eq!(session.chaos_interval, Duration::from_secs(15));
    assert_eq!(session.cleanup_policy, CleanupPolicy::OnSuccess);
    assert_eq!(config.experiment().unwrap(), Experiment::PodDelete);
}

#[test]
fn test_unsupported_sequence_is_rejected() {
    let config = RunnerConfig::layered(
        None,
        lookup(&[("SEQUENCE", "round-robin")]),
        &Overrides::default(),
    )
    .unwrap();

    let err = config.session().unwrap_err();
    assert!(matches!(err, ConfigError::Chaos(ChaosError::InvalidConfiguration(_))));
}

#[test]
fn test_random_sequence_resolves_once() {
    let config =
        RunnerConfig::layered(None, lookup(&[("SEQUENCE", "random")]), &Overrides::default())
            .unwrap();

    let mut rng = StdRng::seed_from_u64(7);
    let session = config.session_with(&mut rng).unwrap();
    assert!(matches!(session.sequence, Sequence::Serial | Sequence::Parallel));
}

#[test]
fn test_non_numeric_env_value() {
    let err = RunnerConfig::layered(
        None,
        lookup(&[("PODS_AFFECTED_PERC", "half")]),
        &Overrides::default(),
    )
    .unwrap_err();

    match err {
        ConfigError::InvalidValue { key, value, .. } => {
            assert_eq!(key, "PODS_AFFECTED_PERC");
            assert_eq!(value, "half");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_target_names_win_over_selector() {
    let config = RunnerConfig::layered(
        None,
        lookup(&[
            ("TARGET_PODS", "web-1, web-2"),
            ("APP_LABEL", "app=web"),
            ("APP_NAMESPACE", "shop"),
            ("PODS_AFFECTED_PERC", "0"),
        ]),
        &Overrides::default(),
    )
    .unwrap();

    let spec = config.target_spec(TargetKind::Pod).unwrap();
    assert_eq!(spec.names, vec!["web-1", "web-2"]);
    assert_eq!(spec.namespace, "shop");
}

#[test]
fn test_selector_spec_for_nodes_is_cluster_scoped() {
    let config = RunnerConfig::layered(
        None,
        lookup(&[("APP_LABEL", "role=worker"), ("PODS_AFFECTED_PERC", "50")]),
        &Overrides::default(),
    )
    .unwrap();

    let spec = config.target_spec(TargetKind::Node).unwrap();
    assert_eq!(spec.namespace, "");
    assert_eq!(spec.selector, Selector::parse("role=worker").unwrap());
    assert_eq!(spec.affected_percentage, 50);
}

#[test]
fn test_probes_from_file() {
    let toml = r#"
        experiment = "pod-cpu-hog"

        [[probes]]
        name = "web-running"
        selector = "app=nginx"
        expected = "Running"

        [[probes]]
        name = "web-during"
        selector = "app=nginx"
        expected = "Running"
        stages = ["DuringChaos"]
    "#;
    let config = RunnerConfig::from_toml_str(toml).unwrap();
    assert_eq!(
        config.probes[0].stages,
        vec![ProbeStage::PreChaos, ProbeStage::PostChaos]
    );

    let api: Arc<dyn ControlApi> = Arc::new(Inventory::demo().into_cluster());
    let probes = config.probes(&api, TargetKind::Pod).unwrap();
    assert_eq!(probes.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_session_from_env_and_inventory() {
    let inventory = Inventory::from_json(
        r#"{
            "targets": [
                { "kind": "pod", "namespace": "shop", "name": "cart-0", "labels": { "app": "cart" } },
                { "kind": "pod", "namespace": "shop", "name": "cart-1", "labels": { "app": "cart" } },
                { "kind": "pod", "namespace": "shop", "name": "cart-2", "labels": { "app": "cart" } }
            ],
            "scripts": { "cart-1": { "ready_after_ms": 3000 } }
        }"#,
    )
    .unwrap();
    let config = RunnerConfig::layered(
        None,
        lookup(&[
            ("TOTAL_CHAOS_DURATION", "20"),
            ("CHAOS_INTERVAL", "10"),
            ("APP_LABEL", "app=cart"),
            ("APP_NAMESPACE", "shop"),
            ("STATUS_CHECK_TIMEOUT", "30"),
            ("STATUS_CHECK_DELAY", "1"),
        ]),
        &Overrides {
            experiment: Some("pod-memory-hog".into()),
            ..Overrides::default()
        },
    )
    .unwrap();

    let experiment = config.experiment().unwrap();
    let spec = config.target_spec(experiment.target_kind()).unwrap();
    let api: Arc<dyn ControlApi> = Arc::new(inventory.into_cluster());
    let orchestrator = Orchestrator::new(
        api,
        Arc::new(config.fault().unwrap()),
        config.session().unwrap(),
    )
    .with_namespace(config.chaos_namespace.clone());

    let report = orchestrator.run(&spec, std::future::pending()).await.unwrap();

    assert_eq!(report.result.verdict, Verdict::Passed);
    assert_eq!(report.result.targets.len(), 3);
    assert!(report.result.targets.iter().all(|t| t.iterations == 2));
    assert_eq!(report.exit_code(), 0);
}
