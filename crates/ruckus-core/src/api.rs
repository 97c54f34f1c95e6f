//! Control plane interface
//!
//! The engine never talks to a cluster or cloud SDK directly. Everything it
//! needs (listing targets, driving their state, creating and deleting helpers)
//! goes through [`ControlApi`].

use crate::error::ChaosError;
use crate::labels::{Labels, Selector};
use crate::types::{Target, TargetKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Phase of a helper as reported by the control plane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HelperPhase {
    /// Scheduled, not running yet
    Pending,
    /// Running the payload
    Running,
    /// Payload exited cleanly
    Succeeded,
    /// Payload exited with an error
    Failed,
}

impl HelperPhase {
    /// Check if the helper has stopped running
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// State a fault drives its target into while active
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultEffect {
    /// Observable target state while the fault holds
    pub state: String,
    /// Whether the state outlives the helper until explicitly reverted
    pub persistent: bool,
}

/// What a helper runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    /// Executable
    pub command: String,
    /// Arguments
    pub args: Vec<String>,
    /// Environment passed to the helper
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// How long the payload runs on its own; `None` runs until deleted
    #[serde(default)]
    pub duration: Option<Duration>,
    /// Effect on the target
    #[serde(default)]
    pub effect: Option<FaultEffect>,
}

impl Payload {
    /// Create a payload from a command line
    #[must_use]
    pub fn new<I, S>(command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: BTreeMap::new(),
            duration: None,
            effect: None,
        }
    }

    /// Add an environment variable (builder)
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the self-imposed run time (builder)
    #[must_use]
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Set the target effect (builder)
    #[must_use]
    pub fn with_effect(mut self, state: impl Into<String>, persistent: bool) -> Self {
        self.effect = Some(FaultEffect {
            state: state.into(),
            persistent,
        });
        self
    }

    /// Render as a single command line
    #[must_use]
    pub fn command_line(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Helper creation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelperSpec {
    /// Helper name, unique within its namespace
    pub name: String,
    /// Namespace the helper runs in
    pub namespace: String,
    /// Labels for selection and cleanup
    pub labels: Labels,
    /// Target the helper acts on
    pub target: Target,
    /// What the helper runs
    pub payload: Payload,
}

/// Helper as seen by the control plane
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelperStatus {
    /// Helper name
    pub name: String,
    /// Helper labels
    pub labels: Labels,
    /// Current phase
    pub phase: HelperPhase,
    /// Last status message, if any
    pub message: Option<String>,
}

/// Control plane operations used by the engine
#[async_trait::async_trait]
pub trait ControlApi: Send + Sync {
    /// List targets of `kind` in `namespace` matching `selector`
    async fn list_targets(
        &self,
        kind: TargetKind,
        namespace: &str,
        selector: &Selector,
    ) -> Result<Vec<Target>, ChaosError>;

    /// Fetch a single target, `None` if it does not exist
    async fn get_target(
        &self,
        kind: TargetKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Target>, ChaosError>;

    /// Drive a target into `state`
    async fn set_target_state(&self, target: &Target, state: &str) -> Result<(), ChaosError>;

    /// Create a helper
    async fn create_helper(&self, spec: &HelperSpec) -> Result<(), ChaosError>;

    /// List helpers in `namespace` matching `selector`
    async fn list_helpers(
        &self,
        namespace: &str,
        selector: &Selector,
    ) -> Result<Vec<HelperStatus>, ChaosError>;

    /// Delete one helper; deleting a missing helper succeeds
    async fn delete_helper(&self, namespace: &str, name: &str) -> Result<(), ChaosError>;

    /// Delete every helper in `namespace` matching `selector`
    async fn delete_helpers(&self, namespace: &str, selector: &Selector) -> Result<(), ChaosError>;
}
