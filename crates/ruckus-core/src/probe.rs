//! Steady-state probes
//!
//! Probes check the system under test before, during and after chaos. A
//! failing probe fails the session with a stage-specific fail step but never
//! skips revert.

use crate::api::ControlApi;
use crate::error::ChaosError;
use crate::labels::Selector;
use crate::session::ChaosSession;
use crate::types::TargetKind;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// When a probe runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProbeStage {
    /// Before any injection
    PreChaos,
    /// Alongside the first sustain window
    DuringChaos,
    /// After the post-chaos ramp
    PostChaos,
}

/// Runs every probe registered for a stage
#[async_trait::async_trait]
pub trait ProbeRunner: Send + Sync {
    /// Run the probes for `stage`
    async fn run(&self, stage: ProbeStage, session: &ChaosSession) -> Result<(), ChaosError>;
}

/// Runner with no probes
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProbes;

#[async_trait::async_trait]
impl ProbeRunner for NoProbes {
    async fn run(&self, _stage: ProbeStage, _session: &ChaosSession) -> Result<(), ChaosError> {
        Ok(())
    }
}

/// A single probe
#[async_trait::async_trait]
pub trait Probe: Send + Sync {
    /// Probe name for reporting
    fn name(&self) -> &str;

    /// Stages the probe runs in
    fn stages(&self) -> &[ProbeStage];

    /// Perform the check
    async fn check(&self, session: &ChaosSession) -> Result<(), ChaosError>;
}

/// Ordered set of probes; the first failure stops the stage
#[derive(Default)]
pub struct ProbeSet {
    probes: Vec<Arc<dyn Probe>>,
}

impl ProbeSet {
    /// Create an empty set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a probe (builder)
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn Probe>) -> Self {
        self.probes.push(probe);
        self
    }

    /// Number of probes
    #[must_use]
    pub fn len(&self) -> usize {
        self.probes.len()
    }

    /// Check if the set has no probes
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }
}

#[async_trait::async_trait]
impl ProbeRunner for ProbeSet {
    async fn run(&self, stage: ProbeStage, session: &ChaosSession) -> Result<(), ChaosError> {
        for probe in self.probes.iter().filter(|p| p.stages().contains(&stage)) {
            probe.check(session).await.map_err(|e| match e {
                ChaosError::Probe { .. } => e,
                other => ChaosError::Probe {
                    probe: probe.name().to_string(),
                    reason: other.to_string(),
                },
            })?;
            tracing::info!(probe = probe.name(), ?stage, "[Probe]: Passed");
        }
        Ok(())
    }
}

/// Asserts every resource matching a selector reports an expected state
pub struct StateProbe {
    name: String,
    api: Arc<dyn ControlApi>,
    kind: TargetKind,
    namespace: String,
    selector: Selector,
    expected: String,
    stages: Vec<ProbeStage>,
}

impl StateProbe {
    /// Create a probe running at `stages`
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        api: Arc<dyn ControlApi>,
        kind: TargetKind,
        namespace: impl Into<String>,
        selector: Selector,
        expected: impl Into<String>,
        stages: Vec<ProbeStage>,
    ) -> Self {
        Self {
            name: name.into(),
            api,
            kind,
            namespace: namespace.into(),
            selector,
            expected: expected.into(),
            stages,
        }
    }
}

#[async_trait::async_trait]
impl Probe for StateProbe {
    fn name(&self) -> &str {
        &self.name
    }

    fn stages(&self) -> &[ProbeStage] {
        &self.stages
    }

    async fn check(&self, _session: &ChaosSession) -> Result<(), ChaosError> {
        let resources = self
            .api
            .list_targets(self.kind, &self.namespace, &self.selector)
            .await?;
        if resources.is_empty() {
            return Err(ChaosError::Probe {
                probe: self.name.clone(),
                reason: format!("no {} matches {}", self.kind, self.selector),
            });
        }
        if let Some(bad) = resources.iter().find(|r| r.observed_state != self.expected) {
            return Err(ChaosError::Probe {
                probe: self.name.clone(),
                reason: format!(
                    "{} is {:?}, expected {:?}",
                    bad.name, bad.observed_state, self.expected
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::Labels;
    use crate::sim::SimCluster;
    use crate::types::Target;

    fn cluster(state: &str) -> Arc<SimCluster> {
        Arc::new(SimCluster::new().with_target(
            Target::new(TargetKind::Pod, "default", "web-0", state)
                .with_labels(Labels::new().with("app", "web")),
        ))
    }

    fn probe(api: Arc<SimCluster>) -> Arc<dyn Probe> {
        Arc::new(StateProbe::new(
            "web-running",
            api,
            TargetKind::Pod,
            "default",
            Selector::all().eq("app", "web"),
            "Running",
            vec![ProbeStage::PreChaos, ProbeStage::PostChaos],
        ))
    }

    #[tokio::test]
    async fn state_probe_passes_and_fails() {
        let session = ChaosSession::new();
        let ok = ProbeSet::new().with_probe(probe(cluster("Running")));
        assert!(ok.run(ProbeStage::PreChaos, &session).await.is_ok());

        let bad = ProbeSet::new().with_probe(probe(cluster("Pending")));
        let err = bad.run(ProbeStage::PostChaos, &session).await.unwrap_err();
        assert!(matches!(err, ChaosError::Probe { ref probe, .. } if probe == "web-running"));
    }

    #[tokio::test]
    async fn probes_only_run_in_their_stages() {
        let bad = ProbeSet::new().with_probe(probe(cluster("Pending")));
        assert!(bad
            .run(ProbeStage::DuringChaos, &ChaosSession::new())
            .await
            .is_ok());
    }
}
