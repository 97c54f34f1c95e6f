//! Built-in experiments
//!
//! Every experiment is a strategy over the same engine: it names its target
//! kind, the command its helper runs, whether the helper exits by itself and
//! whether the fault undoes itself. [`CatalogFault`] adapts an
//! [`Experiment`] plus its [`FaultParams`] to the [`Fault`] trait.

use crate::api::Payload;
use crate::error::ChaosError;
use crate::fault::{Fault, FaultLifetime};
use crate::types::{Target, TargetKind};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Built-in experiment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Experiment {
    /// Force-delete pods
    PodDelete,
    /// Kill the target container
    ContainerKill,
    /// Burn CPU inside a pod
    PodCpuHog,
    /// Consume memory inside a pod
    PodMemoryHog,
    /// Burn CPU on a node
    NodeCpuHog,
    /// Consume memory on a node
    NodeMemoryHog,
    /// Taint a node
    NodeTaint,
    /// Fill a pod's ephemeral storage
    DiskFill,
    /// Add egress latency to a pod
    PodNetworkLatency,
    /// Stop a VM instance
    VmInstanceStop,
    /// Detach a volume
    DiskLoss,
}

impl Experiment {
    /// Every built-in experiment
    pub const ALL: [Self; 11] = [
        Self::PodDelete,
        Self::ContainerKill,
        Self::PodCpuHog,
        Self::PodMemoryHog,
        Self::NodeCpuHog,
        Self::NodeMemoryHog,
        Self::NodeTaint,
        Self::DiskFill,
        Self::PodNetworkLatency,
        Self::VmInstanceStop,
        Self::DiskLoss,
    ];

    /// Experiment name as used on the command line
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::PodDelete => "pod-delete",
            Self::ContainerKill => "container-kill",
            Self::PodCpuHog => "pod-cpu-hog",
            Self::PodMemoryHog => "pod-memory-hog",
            Self::NodeCpuHog => "node-cpu-hog",
            Self::NodeMemoryHog => "node-memory-hog",
            Self::NodeTaint => "node-taint",
            Self::DiskFill => "disk-fill",
            Self::PodNetworkLatency => "pod-network-latency",
            Self::VmInstanceStop => "vm-instance-stop",
            Self::DiskLoss => "disk-loss",
        }
    }

    /// One-line description
    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::PodDelete => "force-delete selected pods and wait for them to come back",
            Self::ContainerKill => "kill the application container of selected pods",
            Self::PodCpuHog => "consume CPU cores inside selected pods",
            Self::PodMemoryHog => "consume memory inside selected pods",
            Self::NodeCpuHog => "consume CPU cores on selected nodes",
            Self::NodeMemoryHog => "consume memory on selected nodes",
            Self::NodeTaint => "taint selected nodes so workloads are evicted",
            Self::DiskFill => "fill the ephemeral storage of selected pods",
            Self::PodNetworkLatency => "add egress latency to selected pods",
            Self::VmInstanceStop => "stop selected VM instances",
            Self::DiskLoss => "detach selected volumes from their instances",
        }
    }

    /// Kind of target the experiment acts on
    #[must_use]
    pub fn target_kind(self) -> TargetKind {
        match self {
            Self::PodDelete
            | Self::ContainerKill
            | Self::PodCpuHog
            | Self::PodMemoryHog
            | Self::DiskFill
            | Self::PodNetworkLatency => TargetKind::Pod,
            Self::NodeCpuHog | Self::NodeMemoryHog | Self::NodeTaint => TargetKind::Node,
            Self::VmInstanceStop => TargetKind::Instance,
            Self::DiskLoss => TargetKind::Volume,
        }
    }

    /// How the helper's run ends
    #[must_use]
    pub fn lifetime(self) -> FaultLifetime {
        match self {
            Self::NodeTaint | Self::DiskFill | Self::VmInstanceStop | Self::DiskLoss => {
                FaultLifetime::Bounded
            }
            _ => FaultLifetime::SelfTerminating,
        }
    }

    /// Whether the fault undoes itself once the helper is gone
    #[must_use]
    pub fn self_reverting(self) -> bool {
        !matches!(self, Self::NodeTaint | Self::VmInstanceStop | Self::DiskLoss)
    }

    /// Target state while the fault holds
    #[must_use]
    pub fn chaos_state(self) -> &'static str {
        match self {
            Self::PodDelete => "Terminating",
            Self::ContainerKill => "CrashLoopBackOff",
            Self::PodCpuHog | Self::NodeCpuHog => "CPUPressure",
            Self::PodMemoryHog | Self::NodeMemoryHog => "MemoryPressure",
            Self::NodeTaint => "Tainted",
            Self::DiskFill => "DiskPressure",
            Self::PodNetworkLatency => "Degraded",
            Self::VmInstanceStop => "Stopped",
            Self::DiskLoss => "Detached",
        }
    }
}

impl FromStr for Experiment {
    type Err = ChaosError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|e| e.name() == wanted)
            .ok_or_else(|| ChaosError::invalid(format!("unknown experiment {wanted:?}")))
    }
}

impl std::fmt::Display for Experiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Tunables shared by the built-in experiments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultParams {
    /// CPU cores to burn
    pub cpu_cores: u32,
    /// Memory to consume, in MiB
    pub memory_mb: u64,
    /// Share of ephemeral storage to fill
    pub fill_percentage: u8,
    /// Added egress latency, in milliseconds
    pub latency_ms: u64,
    /// Network interface for latency injection
    pub network_interface: String,
    /// Taint applied by node-taint
    pub taint: String,
    /// Container runtime socket for container-kill
    pub container_runtime: String,
}

impl Default for FaultParams {
    fn default() -> Self {
        Self {
            cpu_cores: 1,
            memory_mb: 500,
            fill_percentage: 80,
            latency_ms: 2000,
            network_interface: "eth0".to_string(),
            taint: "ruckus.io/chaos=true:NoExecute".to_string(),
            container_runtime: "containerd".to_string(),
        }
    }
}

/// [`Fault`] implementation backed by the catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogFault {
    experiment: Experiment,
    params: FaultParams,
}

impl CatalogFault {
    /// Create a fault with default parameters
    #[must_use]
    pub fn new(experiment: Experiment) -> Self {
        Self {
            experiment,
            params: FaultParams::default(),
        }
    }

    /// Override parameters (builder)
    #[must_use]
    pub fn with_params(mut self, params: FaultParams) -> Self {
        self.params = params;
        self
    }

    /// Underlying experiment
    #[inline]
    #[must_use]
    pub fn experiment(&self) -> Experiment {
        self.experiment
    }

    fn command(&self, target: &Target, secs: u64) -> Payload {
        let p = &self.params;
        let location = format!("{}/{}", target.namespace, target.name);
        match self.experiment {
            Experiment::PodDelete => Payload::new(
                "kubectl",
                [
                    "delete".to_string(),
                    "pod".to_string(),
                    target.name.clone(),
                    format!("--namespace={}", target.namespace),
                    "--grace-period=0".to_string(),
                    "--wait=false".to_string(),
                ],
            ),
            Experiment::ContainerKill => Payload::new(
                "crictl",
                ["stop".to_string(), "--timeout=0".to_string(), location],
            )
            .with_env("CONTAINER_RUNTIME", &p.container_runtime),
            Experiment::PodCpuHog | Experiment::NodeCpuHog => Payload::new(
                "stress-ng",
                [
                    "--cpu".to_string(),
                    p.cpu_cores.to_string(),
                    "--timeout".to_string(),
                    format!("{secs}s"),
                ],
            ),
            Experiment::PodMemoryHog | Experiment::NodeMemoryHog => Payload::new(
                "stress-ng",
                [
                    "--vm".to_string(),
                    "1".to_string(),
                    "--vm-bytes".to_string(),
                    format!("{}M", p.memory_mb),
                    "--timeout".to_string(),
                    format!("{secs}s"),
                ],
            ),
            Experiment::NodeTaint => Payload::new(
                "kubectl",
                [
                    "taint".to_string(),
                    "nodes".to_string(),
                    target.name.clone(),
                    p.taint.clone(),
                ],
            ),
            Experiment::DiskFill => Payload::new(
                "disk-fill",
                [
                    format!("--target={location}"),
                    format!("--fill-percentage={}", p.fill_percentage),
                ],
            ),
            Experiment::PodNetworkLatency => Payload::new(
                "tc-netem",
                [
                    format!("--target={location}"),
                    format!("--interface={}", p.network_interface),
                    format!("--latency={}ms", p.latency_ms),
                    format!("--duration={secs}s"),
                ],
            ),
            Experiment::VmInstanceStop => Payload::new(
                "cloud-ctl",
                [
                    "instance".to_string(),
                    "stop".to_string(),
                    target.name.clone(),
                    format!("--zone={}", target.namespace),
                ],
            ),
            Experiment::DiskLoss => Payload::new(
                "cloud-ctl",
                [
                    "volume".to_string(),
                    "detach".to_string(),
                    target.name.clone(),
                    format!("--zone={}", target.namespace),
                ],
            ),
        }
    }
}

#[async_trait::async_trait]
impl Fault for CatalogFault {
    fn name(&self) -> &str {
        self.experiment.name()
    }

    fn target_kind(&self) -> TargetKind {
        self.experiment.target_kind()
    }

    fn payload(&self, target: &Target, window: Duration) -> Payload {
        let secs = window.as_secs().max(1);
        let payload = self
            .command(target, secs)
            .with_env("TARGET", &target.name)
            .with_env("TOTAL_CHAOS_DURATION", secs.to_string())
            .with_effect(self.experiment.chaos_state(), !self.self_reverting());
        match self.experiment.lifetime() {
            FaultLifetime::SelfTerminating => payload.with_duration(window),
            FaultLifetime::Bounded => payload,
        }
    }

    fn lifetime(&self) -> FaultLifetime {
        self.experiment.lifetime()
    }

    fn self_reverting(&self) -> bool {
        self.experiment.self_reverting()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_from_str() {
        for experiment in Experiment::ALL {
            assert_eq!(experiment.name().parse::<Experiment>().unwrap(), experiment);
        }
        assert!("pod-explode".parse::<Experiment>().is_err());
    }

    #[test]
    fn cpu_hog_payload_carries_window() {
        let fault = CatalogFault::new(Experiment::NodeCpuHog);
        let node = Target::new(TargetKind::Node, "", "node-1", "Ready");
        let payload = fault.payload(&node, Duration::from_secs(60));
        assert_eq!(payload.command_line(), "stress-ng --cpu 1 --timeout 60s");
        assert_eq!(payload.duration, Some(Duration::from_secs(60)));
        assert_eq!(payload.env.get("TARGET").map(String::as_str), Some("node-1"));
    }

    #[test]
    fn persistent_faults_are_bounded_and_not_self_reverting() {
        for experiment in [Experiment::NodeTaint, Experiment::VmInstanceStop, Experiment::DiskLoss] {
            let fault = CatalogFault::new(experiment);
            assert!(!fault.self_reverting());
            assert_eq!(fault.lifetime(), FaultLifetime::Bounded);
            let target = Target::new(experiment.target_kind(), "zone-a", "x", "Ready");
            let payload = fault.payload(&target, Duration::from_secs(30));
            assert!(payload.duration.is_none());
            assert!(payload.effect.unwrap().persistent);
        }
    }
}
