//! In-memory control plane
//!
//! [`SimCluster`] implements [`ControlApi`] over a scripted inventory. Helper
//! phases are derived from elapsed `tokio` time, so tests under a paused clock
//! run instantly. Each helper follows a [`HelperScript`]: pending for
//! `ready_after`, then running until its payload duration (or the scripted
//! run time) elapses, then exiting with the scripted phase.
//!
//! While a helper runs, its payload's [`FaultEffect`](crate::api::FaultEffect)
//! is applied to the target. Non-persistent effects are undone when the helper
//! exits or is deleted; persistent ones stay until `set_target_state`.

use crate::api::{ControlApi, HelperPhase, HelperSpec, HelperStatus};
use crate::error::ChaosError;
use crate::labels::Selector;
use crate::types::{Target, TargetKind};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;

/// Scripted helper behaviour
#[derive(Debug, Clone, PartialEq)]
pub struct HelperScript {
    /// Time spent pending after creation
    pub ready_after: Duration,
    /// Run time override; `None` uses the payload duration
    pub run_for: Option<Duration>,
    /// Phase the helper exits with
    pub exit: HelperPhase,
    /// Stay pending forever
    pub never_ready: bool,
}

impl HelperScript {
    /// Helper that never leaves pending
    #[must_use]
    pub fn never_ready() -> Self {
        Self {
            never_ready: true,
            ..Self::default()
        }
    }

    /// Helper that fails after running for `after`
    #[must_use]
    pub fn failing_after(after: Duration) -> Self {
        Self {
            run_for: Some(after),
            exit: HelperPhase::Failed,
            ..Self::default()
        }
    }

    /// Set readiness delay (builder)
    #[must_use]
    pub fn with_ready_after(mut self, ready_after: Duration) -> Self {
        self.ready_after = ready_after;
        self
    }

    /// Set run time override (builder)
    #[must_use]
    pub fn with_run_for(mut self, run_for: Duration) -> Self {
        self.run_for = Some(run_for);
        self
    }
}

impl Default for HelperScript {
    fn default() -> Self {
        Self {
            ready_after: Duration::from_secs(1),
            run_for: None,
            exit: HelperPhase::Succeeded,
            never_ready: false,
        }
    }
}

/// Counters for assertions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimStats {
    /// Helpers created
    pub helpers_created: usize,
    /// Helpers deleted
    pub helpers_deleted: usize,
    /// `set_target_state` calls, failed ones included
    pub set_state_calls: usize,
    /// Highest number of running or pending helpers seen on one target
    pub max_live_per_target: usize,
}

#[derive(Debug)]
struct SimHelper {
    spec: HelperSpec,
    script: HelperScript,
    created: Instant,
    deleted_at: Option<Instant>,
    prior_state: Option<String>,
    restored: bool,
}

impl SimHelper {
    fn phase_at(&self, now: Instant) -> HelperPhase {
        if self.script.never_ready {
            return HelperPhase::Pending;
        }
        let age = now.saturating_duration_since(self.created);
        if age < self.script.ready_after {
            return HelperPhase::Pending;
        }
        match self.script.run_for.or(self.spec.payload.duration) {
            Some(run) if age >= self.script.ready_after + run => self.script.exit,
            _ => HelperPhase::Running,
        }
    }

    fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Debug, Default)]
struct Inner {
    targets: BTreeMap<String, Target>,
    helpers: BTreeMap<(String, String), SimHelper>,
    scripts: HashMap<String, HelperScript>,
    default_script: HelperScript,
    delete_lag: Duration,
    create_failures: HashSet<String>,
    set_state_failures: HashMap<String, u32>,
    created: Vec<HelperSpec>,
    stats: SimStats,
}

impl Inner {
    /// Apply effects and retire deleted helpers as of `now`
    fn refresh(&mut self, now: Instant) {
        let Self {
            targets, helpers, ..
        } = self;

        for helper in helpers.values_mut() {
            let Some(effect) = helper.spec.payload.effect.clone() else {
                continue;
            };
            let phase = helper.phase_at(now);
            let Some(target) = targets.get_mut(&helper.spec.target.key()) else {
                continue;
            };

            if helper.prior_state.is_none() && !helper.is_deleted() && phase != HelperPhase::Pending {
                helper.prior_state = Some(target.observed_state.clone());
                target.observed_state.clone_from(&effect.state);
            }

            let stopped = phase.is_terminal() || helper.is_deleted();
            if stopped && !effect.persistent && !helper.restored {
                if let Some(prior) = &helper.prior_state {
                    if target.observed_state == effect.state {
                        target.observed_state.clone_from(prior);
                    }
                }
                helper.restored = true;
            }
        }

        let lag = self.delete_lag;
        self.helpers
            .retain(|_, h| h.deleted_at.map_or(true, |at| now < at + lag));
    }

    fn live_on(&self, target_key: &str, now: Instant) -> usize {
        self.helpers
            .values()
            .filter(|h| h.spec.target.key() == target_key)
            .filter(|h| !h.is_deleted() && !h.phase_at(now).is_terminal())
            .count()
    }

    fn mark_deleted(&mut self, key: &(String, String), now: Instant) {
        if let Some(helper) = self.helpers.get_mut(key) {
            if helper.deleted_at.is_none() {
                helper.deleted_at = Some(now);
                self.stats.helpers_deleted += 1;
            }
        }
    }
}

/// Scripted in-memory control plane
#[derive(Debug, Default)]
pub struct SimCluster {
    inner: Mutex<Inner>,
}

impl SimCluster {
    /// Create an empty cluster
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a target (builder)
    #[must_use]
    pub fn with_target(self, target: Target) -> Self {
        self.inner.lock().targets.insert(target.key(), target);
        self
    }

    /// Add several targets (builder)
    #[must_use]
    pub fn with_targets(self, targets: impl IntoIterator<Item = Target>) -> Self {
        {
            let mut inner = self.inner.lock();
            for target in targets {
                inner.targets.insert(target.key(), target);
            }
        }
        self
    }

    /// Script used for helpers without a per-target script (builder)
    #[must_use]
    pub fn with_default_script(self, script: HelperScript) -> Self {
        self.inner.lock().default_script = script;
        self
    }

    /// Script helpers acting on the target named `target` (builder)
    #[must_use]
    pub fn with_script(self, target: impl Into<String>, script: HelperScript) -> Self {
        self.inner.lock().scripts.insert(target.into(), script);
        self
    }

    /// Keep deleted helpers listed for `lag` (builder)
    #[must_use]
    pub fn with_delete_lag(self, lag: Duration) -> Self {
        self.inner.lock().delete_lag = lag;
        self
    }

    /// Reject helper creation for the target named `target` (builder)
    #[must_use]
    pub fn failing_create_for(self, target: impl Into<String>) -> Self {
        self.inner.lock().create_failures.insert(target.into());
        self
    }

    /// Fail the next `times` state changes of the target named `target` (builder)
    #[must_use]
    pub fn failing_set_state(self, target: impl Into<String>, times: u32) -> Self {
        self.inner
            .lock()
            .set_state_failures
            .insert(target.into(), times);
        self
    }

    /// Current copy of a target
    #[must_use]
    pub fn target(&self, kind: TargetKind, namespace: &str, name: &str) -> Option<Target> {
        let mut inner = self.inner.lock();
        inner.refresh(Instant::now());
        inner
            .targets
            .get(&Target::new(kind, namespace, name, "").key())
            .cloned()
    }

    /// Every helper spec ever created, in creation order
    #[must_use]
    pub fn created_helpers(&self) -> Vec<HelperSpec> {
        self.inner.lock().created.clone()
    }

    /// Helpers not yet deleted
    #[must_use]
    pub fn remaining_helpers(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.refresh(Instant::now());
        inner.helpers.values().filter(|h| !h.is_deleted()).count()
    }

    /// Counter snapshot
    #[must_use]
    pub fn stats(&self) -> SimStats {
        self.inner.lock().stats.clone()
    }
}

#[async_trait::async_trait]
impl ControlApi for SimCluster {
    async fn list_targets(
        &self,
        kind: TargetKind,
        namespace: &str,
        selector: &Selector,
    ) -> Result<Vec<Target>, ChaosError> {
        let mut inner = self.inner.lock();
        inner.refresh(Instant::now());
        Ok(inner
            .targets
            .values()
            .filter(|t| t.kind == kind && t.namespace == namespace)
            .filter(|t| selector.matches(&t.labels))
            .cloned()
            .collect())
    }

    async fn get_target(
        &self,
        kind: TargetKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Target>, ChaosError> {
        Ok(self.target(kind, namespace, name))
    }

    async fn set_target_state(&self, target: &Target, state: &str) -> Result<(), ChaosError> {
        let mut inner = self.inner.lock();
        inner.refresh(Instant::now());
        inner.stats.set_state_calls += 1;

        if let Some(remaining) = inner.set_state_failures.get_mut(&target.name) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ChaosError::control(format!(
                    "simulated state change failure on {}",
                    target.name
                )));
            }
        }

        let current = inner
            .targets
            .get_mut(&target.key())
            .ok_or_else(|| ChaosError::control(format!("target {} not found", target.key())))?;
        current.observed_state = state.to_string();
        Ok(())
    }

    async fn create_helper(&self, spec: &HelperSpec) -> Result<(), ChaosError> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.refresh(now);

        if inner.create_failures.contains(&spec.target.name) {
            return Err(ChaosError::control(format!(
                "simulated create failure for {}",
                spec.name
            )));
        }
        let key = (spec.namespace.clone(), spec.name.clone());
        if inner.helpers.contains_key(&key) {
            return Err(ChaosError::control(format!(
                "helper {} already exists",
                spec.name
            )));
        }

        let script = inner
            .scripts
            .get(&spec.target.name)
            .cloned()
            .unwrap_or_else(|| inner.default_script.clone());
        inner.helpers.insert(
            key,
            SimHelper {
                spec: spec.clone(),
                script,
                created: now,
                deleted_at: None,
                prior_state: None,
                restored: false,
            },
        );
        inner.created.push(spec.clone());
        inner.stats.helpers_created += 1;

        let live = inner.live_on(&spec.target.key(), now);
        inner.stats.max_live_per_target = inner.stats.max_live_per_target.max(live);
        Ok(())
    }

    async fn list_helpers(
        &self,
        namespace: &str,
        selector: &Selector,
    ) -> Result<Vec<HelperStatus>, ChaosError> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.refresh(now);
        Ok(inner
            .helpers
            .iter()
            .filter(|((ns, _), h)| ns == namespace && selector.matches(&h.spec.labels))
            .map(|(_, h)| HelperStatus {
                name: h.spec.name.clone(),
                labels: h.spec.labels.clone(),
                phase: h.phase_at(now),
                message: h.is_deleted().then(|| "terminating".to_string()),
            })
            .collect())
    }

    async fn delete_helper(&self, namespace: &str, name: &str) -> Result<(), ChaosError> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.mark_deleted(&(namespace.to_string(), name.to_string()), now);
        inner.refresh(now);
        Ok(())
    }

    async fn delete_helpers(&self, namespace: &str, selector: &Selector) -> Result<(), ChaosError> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let keys: Vec<_> = inner
            .helpers
            .iter()
            .filter(|((ns, _), h)| ns == namespace && selector.matches(&h.spec.labels))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &keys {
            inner.mark_deleted(key, now);
        }
        inner.refresh(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Payload;
    use crate::labels::Labels;

    fn spec(target: &Target, name: &str, payload: Payload) -> HelperSpec {
        HelperSpec {
            name: name.to_string(),
            namespace: "chaos".to_string(),
            labels: Labels::new().with("name", name),
            target: target.clone(),
            payload,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn helper_phases_follow_script() {
        let node = Target::new(TargetKind::Node, "", "node-1", "Ready");
        let sim = SimCluster::new().with_target(node.clone());
        let payload = Payload::new("stress-ng", ["--cpu", "1"])
            .with_duration(Duration::from_secs(10))
            .with_effect("Stressed", false);
        sim.create_helper(&spec(&node, "h1", payload)).await.unwrap();

        let selector = Selector::all().eq("name", "h1");
        let phase = |list: Vec<HelperStatus>| list[0].phase;
        assert_eq!(phase(sim.list_helpers("chaos", &selector).await.unwrap()), HelperPhase::Pending);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(phase(sim.list_helpers("chaos", &selector).await.unwrap()), HelperPhase::Running);
        assert_eq!(sim.target(TargetKind::Node, "", "node-1").unwrap().observed_state, "Stressed");

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(phase(sim.list_helpers("chaos", &selector).await.unwrap()), HelperPhase::Succeeded);
        assert_eq!(sim.target(TargetKind::Node, "", "node-1").unwrap().observed_state, "Ready");
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_effect_survives_deletion() {
        let node = Target::new(TargetKind::Node, "", "node-1", "Ready");
        let sim = SimCluster::new().with_target(node.clone());
        let payload = Payload::new("taint", ["node-1"]).with_effect("Tainted", true);
        sim.create_helper(&spec(&node, "h1", payload)).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        sim.delete_helper("chaos", "h1").await.unwrap();
        assert_eq!(sim.remaining_helpers(), 0);
        assert_eq!(sim.target(TargetKind::Node, "", "node-1").unwrap().observed_state, "Tainted");

        sim.set_target_state(&node, "Ready").await.unwrap();
        assert_eq!(sim.target(TargetKind::Node, "", "node-1").unwrap().observed_state, "Ready");
    }

    #[tokio::test(start_paused = true)]
    async fn delete_lag_keeps_helper_listed() {
        let pod = Target::new(TargetKind::Pod, "default", "web-0", "Running");
        let sim = SimCluster::new()
            .with_target(pod.clone())
            .with_delete_lag(Duration::from_secs(3));
        sim.create_helper(&spec(&pod, "h1", Payload::new("true", Vec::<String>::new())))
            .await
            .unwrap();
        sim.delete_helper("chaos", "h1").await.unwrap();

        let selector = Selector::all().eq("name", "h1");
        assert_eq!(sim.list_helpers("chaos", &selector).await.unwrap().len(), 1);
        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(sim.list_helpers("chaos", &selector).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn scripted_state_failures() {
        let pod = Target::new(TargetKind::Pod, "default", "web-0", "Running");
        let sim = SimCluster::new()
            .with_target(pod.clone())
            .failing_set_state("web-0", 1);
        assert!(sim.set_target_state(&pod, "Running").await.is_err());
        assert!(sim.set_target_state(&pod, "Running").await.is_ok());
        assert_eq!(sim.stats().set_state_calls, 2);
    }
}
