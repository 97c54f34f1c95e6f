//! Target resolution
//!
//! Turns a declarative [`TargetSpec`] into the ordered list of targets a
//! session acts on:
//! - explicit names win and ignore the percentage
//! - otherwise candidates come from the label selector and a uniform random
//!   sample of `ceil(total * pct / 100)` (at least one) is kept

use crate::api::ControlApi;
use crate::error::ChaosError;
use crate::labels::Selector;
use crate::types::{Target, TargetKind};
use rand::Rng;
use std::collections::HashSet;

/// Declarative target selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSpec {
    /// Kind of target
    pub kind: TargetKind,
    /// Namespace, zone or region to search
    pub namespace: String,
    /// Explicit target names
    pub names: Vec<String>,
    /// Label selector for candidate listing
    pub selector: Selector,
    /// Share of candidates to pick
    pub affected_percentage: u8,
}

impl TargetSpec {
    /// Select by label in `namespace`
    #[must_use]
    pub fn by_selector(kind: TargetKind, namespace: impl Into<String>, selector: Selector) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            names: Vec::new(),
            selector,
            affected_percentage: 100,
        }
    }

    /// Select explicit names in `namespace`
    #[must_use]
    pub fn by_names<I, S>(kind: TargetKind, namespace: impl Into<String>, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind,
            namespace: namespace.into(),
            names: names.into_iter().map(Into::into).collect(),
            selector: Selector::all(),
            affected_percentage: 100,
        }
    }

    /// Set affected percentage (builder)
    #[must_use]
    pub fn with_percentage(mut self, percentage: u8) -> Self {
        self.affected_percentage = percentage;
        self
    }
}

/// Number of targets to affect out of `total`
///
/// `ceil(total * pct / 100)` clamped to `[1, total]`; percentages above 100
/// are treated as 100. Returns 0 only when `total` is 0.
#[must_use]
pub fn affected_count(total: usize, percentage: u8) -> usize {
    if total == 0 {
        return 0;
    }
    let pct = usize::from(percentage.min(100));
    (total * pct).div_ceil(100).clamp(1, total)
}

/// Sample targets from `candidates`
///
/// Candidates are deduplicated by key first; the kept targets preserve
/// candidate order.
///
/// # Errors
///
/// Returns [`ChaosError::InvalidConfiguration`] for a zero percentage and
/// [`ChaosError::NoTargetsFound`] for an empty candidate list.
pub fn select_targets<R: Rng + ?Sized>(
    candidates: Vec<Target>,
    percentage: u8,
    selector: &Selector,
    rng: &mut R,
) -> Result<Vec<Target>, ChaosError> {
    if percentage == 0 {
        return Err(ChaosError::invalid(
            "affected percentage is 0 and no explicit targets were given",
        ));
    }

    let candidates = dedupe(candidates);
    if candidates.is_empty() {
        return Err(ChaosError::NoTargetsFound {
            selector: selector.to_string(),
        });
    }

    let count = affected_count(candidates.len(), percentage);
    let mut picked = rand::seq::index::sample(rng, candidates.len(), count).into_vec();
    picked.sort_unstable();

    let mut slots: Vec<Option<Target>> = candidates.into_iter().map(Some).collect();
    Ok(picked.into_iter().filter_map(|i| slots[i].take()).collect())
}

/// Resolve `spec` against the control plane
///
/// # Errors
///
/// Returns [`ChaosError::NoTargetsFound`] when nothing matches or a named
/// target does not exist, [`ChaosError::InvalidConfiguration`] for a zero
/// percentage without explicit names, and control plane errors as-is.
pub async fn resolve(api: &dyn ControlApi, spec: &TargetSpec) -> Result<Vec<Target>, ChaosError> {
    if !spec.names.is_empty() {
        return resolve_names(api, spec).await;
    }

    let candidates = api
        .list_targets(spec.kind, &spec.namespace, &spec.selector)
        .await?;
    let total = candidates.len();
    let targets = select_targets(
        candidates,
        spec.affected_percentage,
        &spec.selector,
        &mut rand::rng(),
    )?;

    tracing::info!(
        kind = %spec.kind,
        namespace = %spec.namespace,
        selector = %spec.selector,
        total,
        selected = targets.len(),
        "Resolved targets"
    );
    Ok(targets)
}

async fn resolve_names(api: &dyn ControlApi, spec: &TargetSpec) -> Result<Vec<Target>, ChaosError> {
    let mut seen = HashSet::new();
    let mut targets = Vec::new();

    for name in spec.names.iter().map(|n| n.trim()).filter(|n| !n.is_empty()) {
        if !seen.insert(name.to_string()) {
            continue;
        }
        let target = api
            .get_target(spec.kind, &spec.namespace, name)
            .await?
            .ok_or_else(|| ChaosError::NoTargetsFound {
                selector: format!("{}/{}", spec.namespace, name),
            })?;
        targets.push(target);
    }

    if targets.is_empty() {
        return Err(ChaosError::NoTargetsFound {
            selector: spec.names.join(","),
        });
    }
    tracing::info!(kind = %spec.kind, selected = targets.len(), "Resolved explicit targets");
    Ok(targets)
}

fn dedupe(candidates: Vec<Target>) -> Vec<Target> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|t| seen.insert(t.key()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn pods(n: usize) -> Vec<Target> {
        (0..n)
            .map(|i| Target::new(TargetKind::Pod, "default", format!("web-{i}"), "Running"))
            .collect()
    }

    #[test]
    fn affected_count_rounds_up() {
        assert_eq!(affected_count(10, 50), 5);
        assert_eq!(affected_count(10, 1), 1);
        assert_eq!(affected_count(3, 50), 2);
        assert_eq!(affected_count(10, 100), 10);
        assert_eq!(affected_count(10, 250), 10);
        assert_eq!(affected_count(0, 50), 0);
    }

    #[test]
    fn zero_percent_is_rejected() {
        let mut rng = StdRng::seed_from_u64(3);
        let result = select_targets(pods(4), 0, &Selector::all(), &mut rng);
        assert!(matches!(result, Err(ChaosError::InvalidConfiguration(_))));
    }

    #[test]
    fn empty_candidates_not_found() {
        let mut rng = StdRng::seed_from_u64(3);
        let result = select_targets(Vec::new(), 50, &Selector::parse("app=x").unwrap(), &mut rng);
        assert_eq!(
            result,
            Err(ChaosError::NoTargetsFound {
                selector: "app=x".to_string()
            })
        );
    }

    #[test]
    fn duplicates_removed_before_sampling() {
        let mut candidates = pods(2);
        candidates.extend(pods(2));
        let mut rng = StdRng::seed_from_u64(9);
        let picked = select_targets(candidates, 100, &Selector::all(), &mut rng).unwrap();
        assert_eq!(picked.len(), 2);
    }
}
