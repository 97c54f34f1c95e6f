//! Target inventory for the simulated control plane
//!
//! ```json
//! {
//!   "targets": [
//!     { "kind": "pod", "namespace": "default", "name": "nginx-0",
//!       "state": "Running", "labels": { "app": "nginx" } }
//!   ],
//!   "scripts": { "nginx-0": { "ready_after_ms": 3000 } },
//!   "delete_lag_ms": 500
//! }
//! ```

use crate::config::ConfigError;
use ruckus_core::{HelperPhase, HelperScript, Labels, SimCluster, Target, TargetKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// One target in the inventory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryTarget {
    /// Target kind
    pub kind: TargetKind,
    /// Namespace, zone or region; empty for nodes
    #[serde(default)]
    pub namespace: String,
    /// Target name
    pub name: String,
    /// Observed state
    #[serde(default = "default_state")]
    pub state: String,
    /// Labels
    #[serde(default)]
    pub labels: Labels,
}

/// Scripted helper behaviour for one target
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptSpec {
    /// Pending time after creation
    pub ready_after_ms: Option<u64>,
    /// Run time override
    pub run_for_ms: Option<u64>,
    /// Stay pending forever
    pub never_ready: bool,
    /// Exit in the failed phase
    pub fail: bool,
}

impl ScriptSpec {
    fn to_script(&self) -> HelperScript {
        let mut script = if self.never_ready {
            HelperScript::never_ready()
        } else {
            HelperScript::default()
        };
        if let Some(ms) = self.ready_after_ms {
            script = script.with_ready_after(Duration::from_millis(ms));
        }
        if let Some(ms) = self.run_for_ms {
            script = script.with_run_for(Duration::from_millis(ms));
        }
        if self.fail {
            script.exit = HelperPhase::Failed;
        }
        script
    }
}

/// Inventory file contents
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Inventory {
    /// Targets
    pub targets: Vec<InventoryTarget>,
    /// Helper scripts keyed by target name
    pub scripts: BTreeMap<String, ScriptSpec>,
    /// Delay before deleted helpers disappear
    pub delete_lag_ms: u64,
}

fn default_state() -> String {
    "Running".to_string()
}

impl Inventory {
    /// Read a JSON inventory file
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] or [`ConfigError::Json`].
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content)
    }

    /// Parse a JSON inventory
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Json`] for malformed input.
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(content)?)
    }

    /// Inventory used when none is given: ten `app=nginx` pods, three
    /// worker nodes, two instances and two volumes
    #[must_use]
    pub fn demo() -> Self {
        let pods = (0..10).map(|i| InventoryTarget {
            kind: TargetKind::Pod,
            namespace: "default".to_string(),
            name: format!("nginx-{i}"),
            state: "Running".to_string(),
            labels: Labels::new().with("app", "nginx"),
        });
        let nodes = (0..3).map(|i| InventoryTarget {
            kind: TargetKind::Node,
            namespace: String::new(),
            name: format!("worker-{i}"),
            state: "Ready".to_string(),
            labels: Labels::new().with("node-role.kubernetes.io/worker", "true"),
        });
        let instances = (0..2).map(|i| InventoryTarget {
            kind: TargetKind::Instance,
            namespace: "default".to_string(),
            name: format!("vm-{i}"),
            state: "Running".to_string(),
            labels: Labels::new().with("tier", "app"),
        });
        let volumes = (0..2).map(|i| InventoryTarget {
            kind: TargetKind::Volume,
            namespace: "default".to_string(),
            name: format!("vol-{i}"),
            state: "Attached".to_string(),
            labels: Labels::new().with("tier", "app"),
        });
        Self {
            targets: pods.chain(nodes).chain(instances).chain(volumes).collect(),
            ..Self::default()
        }
    }

    /// Build the simulated control plane
    #[must_use]
    pub fn into_cluster(self) -> SimCluster {
        let targets = self.targets.into_iter().map(|t| {
            Target::new(t.kind, t.namespace, t.name, t.state).with_labels(t.labels)
        });
        let cluster = SimCluster::new()
            .with_targets(targets)
            .with_delete_lag(Duration::from_millis(self.delete_lag_ms));
        self.scripts
            .iter()
            .fold(cluster, |cluster, (name, spec)| {
                cluster.with_script(name.clone(), spec.to_script())
            })
    }
}
