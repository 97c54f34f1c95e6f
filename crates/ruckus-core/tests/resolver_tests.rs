use pretty_assertions::assert_eq;
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use ruckus_core::resolver::{affected_count, resolve, select_targets, TargetSpec};
use ruckus_core::{ChaosError, Selector, Target, TargetKind};
use ruckus_test_utils::{pod_cluster, pods, NAMESPACE};
use std::collections::HashSet;

#[test]
fn test_affected_count_rounds_up() {
    assert_eq!(affected_count(10, 50), 5);
    assert_eq!(affected_count(10, 51), 6);
    assert_eq!(affected_count(3, 1), 1);
    assert_eq!(affected_count(3, 100), 3);
    assert_eq!(affected_count(3, 250), 3);
    assert_eq!(affected_count(0, 50), 0);
}

#[test]
fn test_zero_percentage_is_invalid() {
    let err = select_targets(pods(3), 0, &Selector::all(), &mut rand::rng()).unwrap_err();
    assert!(matches!(err, ChaosError::InvalidConfiguration(_)));
}

#[tokio::test]
async fn test_explicit_names_ignore_percentage() {
    let sim = pod_cluster(5);
    let spec = TargetSpec::by_names(TargetKind::Pod, NAMESPACE, ["nginx-3", "nginx-1", "nginx-3"])
        .with_percentage(0);

    let targets = resolve(&sim, &spec).await.unwrap();
    let names: Vec<_> = targets.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["nginx-3", "nginx-1"]);
}

#[tokio::test]
async fn test_missing_name_is_reported() {
    let sim = pod_cluster(2);
    let spec = TargetSpec::by_names(TargetKind::Pod, NAMESPACE, ["nginx-0", "nginx-9"]);

    let err = resolve(&sim, &spec).await.unwrap_err();
    assert!(matches!(err, ChaosError::NoTargetsFound { .. }));
}

#[tokio::test]
async fn test_selector_without_matches() {
    let sim = pod_cluster(4);
    let spec = TargetSpec::by_selector(
        TargetKind::Pod,
        NAMESPACE,
        Selector::parse("app=redis").unwrap(),
    );

    let err = resolve(&sim, &spec).await.unwrap_err();
    assert_eq!(
        err,
        ChaosError::NoTargetsFound {
            selector: "app=redis".into()
        }
    );
}

fn candidates(n: usize) -> Vec<Target> {
    (0..n)
        .map(|i| Target::new(TargetKind::Pod, NAMESPACE, format!("pod-{i}"), "Running"))
        .collect()
}

proptest! {
    #[test]
    fn prop_selection_size_matches_percentage(total in 1usize..60, pct in 1u8..=100, seed: u64) {
        let mut rng = StdRng::seed_from_u64(seed);
        let picked = select_targets(candidates(total), pct, &Selector::all(), &mut rng).unwrap();

        prop_assert_eq!(picked.len(), affected_count(total, pct));
        prop_assert!(picked.len() >= 1 && picked.len() <= total);
    }

    #[test]
    fn prop_selection_is_unique_and_ordered(total in 1usize..60, pct in 1u8..=100, seed: u64) {
        let mut rng = StdRng::seed_from_u64(seed);
        let picked = select_targets(candidates(total), pct, &Selector::all(), &mut rng).unwrap();

        let keys: HashSet<_> = picked.iter().map(Target::key).collect();
        prop_assert_eq!(keys.len(), picked.len());

        let indices: Vec<usize> = picked
            .iter()
            .map(|t| t.name.trim_start_matches("pod-").parse().unwrap())
            .collect();
        prop_assert!(indices.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn prop_duplicates_do_not_inflate_selection(total in 1usize..30, seed: u64) {
        let mut doubled = candidates(total);
        doubled.extend(candidates(total));
        let mut rng = StdRng::seed_from_u64(seed);

        let picked = select_targets(doubled, 100, &Selector::all(), &mut rng).unwrap();
        prop_assert_eq!(picked.len(), total);
    }
}
