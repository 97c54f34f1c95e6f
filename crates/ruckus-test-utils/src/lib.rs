//! Testing utilities for Ruckus workspace
//!
//! Shared fixtures: simulated clusters, fast sessions, a fault wrapper that
//! counts reverts and a probe with a fixed answer.

#![allow(missing_docs)]

use parking_lot::Mutex;
use ruckus_core::{
    ChaosError, ChaosSession, ControlApi, Fault, FaultLifetime, Labels, Payload, Probe, ProbeStage,
    RevertAction, SimCluster, Target, TargetKind,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub const APP_LABEL: (&str, &str) = ("app", "nginx");
pub const NAMESPACE: &str = "default";

/// `n` running pods named `nginx-<i>` labeled `app=nginx`
pub fn pods(n: usize) -> Vec<Target> {
    (0..n)
        .map(|i| {
            Target::new(TargetKind::Pod, NAMESPACE, format!("nginx-{i}"), "Running")
                .with_labels(Labels::new().with(APP_LABEL.0, APP_LABEL.1))
        })
        .collect()
}

pub fn pod_cluster(n: usize) -> SimCluster {
    SimCluster::new().with_targets(pods(n))
}

/// `n` ready nodes named `node-<i>`
pub fn node_cluster(n: usize) -> SimCluster {
    SimCluster::new().with_targets((0..n).map(|i| {
        Target::new(TargetKind::Node, "", format!("node-{i}"), "Ready")
            .with_labels(Labels::new().with("role", "worker"))
    }))
}

/// Short windows and a quick status check, for paused-time tests
pub fn fast_session() -> ChaosSession {
    ChaosSession::new()
        .with_chaos_duration(Duration::from_secs(10))
        .with_chaos_interval(Duration::from_secs(10))
        .with_status_check(Duration::from_secs(30), Duration::from_secs(1))
}

/// Wraps a fault and counts `revert` calls per target name
pub struct CountingFault {
    inner: Arc<dyn Fault>,
    reverts: Mutex<HashMap<String, u32>>,
}

impl CountingFault {
    pub fn new(inner: Arc<dyn Fault>) -> Self {
        Self {
            inner,
            reverts: Mutex::new(HashMap::new()),
        }
    }

    pub fn reverts(&self, target: &str) -> u32 {
        self.reverts.lock().get(target).copied().unwrap_or(0)
    }

    pub fn reverted_targets(&self) -> Vec<String> {
        let mut names: Vec<_> = self.reverts.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait::async_trait]
impl Fault for CountingFault {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn target_kind(&self) -> TargetKind {
        self.inner.target_kind()
    }

    fn payload(&self, target: &Target, window: Duration) -> Payload {
        self.inner.payload(target, window)
    }

    fn lifetime(&self) -> FaultLifetime {
        self.inner.lifetime()
    }

    fn self_reverting(&self) -> bool {
        self.inner.self_reverting()
    }

    async fn observe(&self, api: &dyn ControlApi, target: &Target) -> Result<String, ChaosError> {
        self.inner.observe(api, target).await
    }

    async fn revert(
        &self,
        api: &dyn ControlApi,
        target: &Target,
        baseline: &str,
    ) -> Result<RevertAction, ChaosError> {
        *self.reverts.lock().entry(target.name.clone()).or_default() += 1;
        self.inner.revert(api, target, baseline).await
    }
}

/// Probe with a fixed answer
pub struct StaticProbe {
    name: String,
    stages: Vec<ProbeStage>,
    pass: bool,
}

impl StaticProbe {
    pub fn passing(name: &str, stages: &[ProbeStage]) -> Self {
        Self {
            name: name.to_string(),
            stages: stages.to_vec(),
            pass: true,
        }
    }

    pub fn failing(name: &str, stages: &[ProbeStage]) -> Self {
        Self {
            pass: false,
            ..Self::passing(name, stages)
        }
    }
}

#[async_trait::async_trait]
impl Probe for StaticProbe {
    fn name(&self) -> &str {
        &self.name
    }

    fn stages(&self) -> &[ProbeStage] {
        &self.stages
    }

    async fn check(&self, _session: &ChaosSession) -> Result<(), ChaosError> {
        if self.pass {
            Ok(())
        } else {
            Err(ChaosError::Probe {
                probe: self.name.clone(),
                reason: "probe configured to fail".into(),
            })
        }
    }
}
