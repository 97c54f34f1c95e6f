//! Core types for Ruckus
//!
//! Defines the fundamental types shared by every component:
//! - Session and run identifiers
//! - Targets and their kinds
//! - Execution sequence and cleanup policy

use crate::error::ChaosError;
use crate::labels::Labels;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use ulid::Ulid;

/// Unique chaos session identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Ulid);

impl SessionId {
    /// Generate new session ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

const RUN_ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Short run identifier embedded in helper names and batch labels
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(String);

impl RunId {
    /// Length of every generated run id
    pub const LEN: usize = 6;

    /// Generate a run id from the thread rng
    #[must_use]
    pub fn generate() -> Self {
        Self::generate_with(&mut rand::rng())
    }

    /// Generate a run id from the given rng
    #[must_use]
    pub fn generate_with<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let id = (0..Self::LEN)
            .map(|_| char::from(RUN_ID_ALPHABET[rng.random_range(0..RUN_ID_ALPHABET.len())]))
            .collect();
        Self(id)
    }

    /// Borrow as str
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a fault acts on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    /// Workload pod or container
    Pod,
    /// Cluster node
    Node,
    /// Cloud VM instance
    Instance,
    /// Cloud block volume
    Volume,
}

impl std::fmt::Display for TargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Pod => "pod",
            Self::Node => "node",
            Self::Instance => "instance",
            Self::Volume => "volume",
        })
    }
}

/// A resolved target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Identity within its location
    pub name: String,
    /// Namespace, zone or region
    pub namespace: String,
    /// Target kind
    pub kind: TargetKind,
    /// Labels used by selectors
    #[serde(default)]
    pub labels: Labels,
    /// Last observed state
    #[serde(default)]
    pub observed_state: String,
}

impl Target {
    /// Create a target with no labels
    #[must_use]
    pub fn new(
        kind: TargetKind,
        namespace: impl Into<String>,
        name: impl Into<String>,
        observed_state: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            kind,
            labels: Labels::new(),
            observed_state: observed_state.into(),
        }
    }

    /// Attach labels (builder)
    #[must_use]
    pub fn with_labels(mut self, labels: Labels) -> Self {
        self.labels = labels;
        self
    }

    /// Registry key, unique per kind/location/name
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// Bookkeeping status of a target in the result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetStatus {
    /// Selected but never injected
    Targeted,
    /// Helper created at least once
    Injected,
    /// Revert pass finished
    Reverted,
    /// Not started because the duration budget ran out or the session aborted
    Skipped,
}

/// How the executor drives multiple targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sequence {
    /// One target at a time in resolver order
    Serial,
    /// All targets as a batch
    Parallel,
}

impl Sequence {
    /// Parse a sequence, resolving `random` with the given rng
    ///
    /// # Errors
    ///
    /// Returns [`ChaosError::InvalidConfiguration`] for unsupported values.
    pub fn parse_with<R: Rng + ?Sized>(raw: &str, rng: &mut R) -> Result<Self, ChaosError> {
        if raw.trim().eq_ignore_ascii_case("random") {
            return Ok(if rng.random_bool(0.5) {
                Self::Serial
            } else {
                Self::Parallel
            });
        }
        raw.parse()
    }
}

impl FromStr for Sequence {
    type Err = ChaosError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "serial" => Ok(Self::Serial),
            "parallel" => Ok(Self::Parallel),
            other => Err(ChaosError::invalid(format!(
                "sequence is not supported: {other:?}"
            ))),
        }
    }
}

impl std::fmt::Display for Sequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Serial => "serial",
            Self::Parallel => "parallel",
        })
    }
}

/// When helpers are deleted after a target finishes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CleanupPolicy {
    /// Delete unconditionally
    #[default]
    Always,
    /// Delete only when the target failed
    OnFailure,
    /// Delete only when the target passed
    OnSuccess,
    /// Never delete
    Never,
}

impl CleanupPolicy {
    /// Decide deletion for a target outcome
    #[inline]
    #[must_use]
    pub fn should_delete(self, failed: bool) -> bool {
        match self {
            Self::Always => true,
            Self::OnFailure => failed,
            Self::OnSuccess => !failed,
            Self::Never => false,
        }
    }
}

impl FromStr for CleanupPolicy {
    type Err = ChaosError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "always" | "delete" => Ok(Self::Always),
            "on-failure" | "onfailure" => Ok(Self::OnFailure),
            "on-success" | "onsuccess" => Ok(Self::OnSuccess),
            "never" | "retain" => Ok(Self::Never),
            other => Err(ChaosError::invalid(format!(
                "unknown cleanup policy {other:?}"
            ))),
        }
    }
}
