//! Runner configuration
//!
//! Layers, lowest first: built-in defaults, a TOML file, the experiment
//! environment variables, command-line flags. The environment is read through
//! a lookup function so tests never touch the process environment.

use rand::Rng;
use ruckus_core::orchestrator::DEFAULT_CHAOS_NAMESPACE;
use ruckus_core::{
    CatalogFault, ChaosError, ChaosSession, CleanupPolicy, ControlApi, Experiment, FaultParams,
    ProbeSet, ProbeStage, Selector, Sequence, StateProbe, TargetKind, TargetSpec,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Environment variable names
pub mod env {
    /// Total chaos duration, seconds
    pub const TOTAL_CHAOS_DURATION: &str = "TOTAL_CHAOS_DURATION";
    /// Interval between injections, seconds
    pub const CHAOS_INTERVAL: &str = "CHAOS_INTERVAL";
    /// Ramp time before and after chaos, seconds
    pub const RAMP_TIME: &str = "RAMP_TIME";
    /// `serial`, `parallel` or `random`
    pub const SEQUENCE: &str = "SEQUENCE";
    /// Share of matching targets to affect
    pub const PODS_AFFECTED_PERC: &str = "PODS_AFFECTED_PERC";
    /// Status check timeout, seconds
    pub const STATUS_CHECK_TIMEOUT: &str = "STATUS_CHECK_TIMEOUT";
    /// Status check delay, seconds
    pub const STATUS_CHECK_DELAY: &str = "STATUS_CHECK_DELAY";
    /// Helper cleanup policy
    pub const JOB_CLEANUP_POLICY: &str = "JOB_CLEANUP_POLICY";
    /// Comma-separated explicit target names
    pub const TARGET_PODS: &str = "TARGET_PODS";
    /// Label selector for candidate targets
    pub const APP_LABEL: &str = "APP_LABEL";
    /// Namespace of the targets
    pub const APP_NAMESPACE: &str = "APP_NAMESPACE";
    /// Namespace helpers are created in
    pub const CHAOS_NAMESPACE: &str = "CHAOS_NAMESPACE";
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file could not be read
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML file is malformed
    #[error("failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),

    /// The inventory file is malformed
    #[error("failed to parse inventory: {0}")]
    Json(#[from] serde_json::Error),

    /// A value could not be parsed
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    /// No experiment was named anywhere
    #[error("no experiment given; pass --experiment or set `experiment` in the config file")]
    MissingExperiment,

    /// Rejected by the engine
    #[error(transparent)]
    Chaos(#[from] ChaosError),
}

/// Steady-state probe declared in the config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Probe name
    pub name: String,
    /// Kind of resource to check; defaults to the experiment's target kind
    #[serde(default)]
    pub kind: Option<TargetKind>,
    /// Namespace to check; defaults to the target namespace
    #[serde(default)]
    pub namespace: Option<String>,
    /// Label selector, `k=v,...`
    #[serde(default)]
    pub selector: String,
    /// State every matching resource must report
    pub expected: String,
    /// Stages the probe runs in
    #[serde(default = "default_probe_stages")]
    pub stages: Vec<ProbeStage>,
}

/// Fully layered runner configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Experiment name
    pub experiment: Option<String>,
    /// Total chaos duration, seconds
    pub total_chaos_duration: u64,
    /// Interval between injections, seconds
    pub chaos_interval: u64,
    /// Ramp time, seconds
    pub ramp_time: u64,
    /// Sequence as written (`random` is resolved when the session is built)
    pub sequence: String,
    /// Share of matching targets to affect; 100 when unset
    pub pods_affected_perc: Option<u8>,
    /// Status check timeout, seconds
    pub status_check_timeout: u64,
    /// Status check delay, seconds
    pub status_check_delay: u64,
    /// Helper cleanup policy as written
    pub cleanup_policy: String,
    /// Explicit target names
    pub target_names: Vec<String>,
    /// Label selector, `k=v,...`
    pub app_label: Option<String>,
    /// Namespace of the targets
    pub app_namespace: String,
    /// Namespace helpers are created in
    pub chaos_namespace: String,
    /// Experiment tunables
    pub params: FaultParams,
    /// Steady-state probes
    pub probes: Vec<ProbeConfig>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            experiment: None,
            total_chaos_duration: 30,
            chaos_interval: 10,
            ramp_time: 0,
            sequence: "parallel".to_string(),
            pods_affected_perc: None,
            status_check_timeout: 180,
            status_check_delay: 2,
            cleanup_policy: "always".to_string(),
            target_names: Vec::new(),
            app_label: None,
            app_namespace: "default".to_string(),
            chaos_namespace: DEFAULT_CHAOS_NAMESPACE.to_string(),
            params: FaultParams::default(),
            probes: Vec::new(),
        }
    }
}

/// Command-line overrides; `None` keeps the lower layer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    /// Experiment name
    pub experiment: Option<String>,
    /// Explicit target names
    pub targets: Option<Vec<String>>,
    /// Label selector
    pub selector: Option<String>,
    /// Target namespace
    pub namespace: Option<String>,
    /// Sequence
    pub sequence: Option<String>,
    /// Total chaos duration, seconds
    pub duration: Option<u64>,
    /// Interval, seconds
    pub interval: Option<u64>,
    /// Affected percentage
    pub percentage: Option<u8>,
}

fn default_probe_stages() -> Vec<ProbeStage> {
    vec![ProbeStage::PreChaos, ProbeStage::PostChaos]
}

impl RunnerConfig {
    /// Build the configuration from every layer
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or any value is
    /// malformed.
    pub fn layered<F>(
        path: Option<&Path>,
        lookup: F,
        overrides: &Overrides,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(lookup)?;
        config.apply_overrides(overrides);
        Ok(config)
    }

    /// Load a TOML file over the defaults
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] or [`ConfigError::Toml`].
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse TOML over the defaults
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Toml`] for malformed input.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Overlay the experiment environment variables
    ///
    /// Empty values are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for non-numeric durations or
    /// percentages.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(v) = get(env::TOTAL_CHAOS_DURATION) {
            self.total_chaos_duration = parse_value(env::TOTAL_CHAOS_DURATION, &v)?;
        }
        if let Some(v) = get(env::CHAOS_INTERVAL) {
            self.chaos_interval = parse_value(env::CHAOS_INTERVAL, &v)?;
        }
        if let Some(v) = get(env::RAMP_TIME) {
            self.ramp_time = parse_value(env::RAMP_TIME, &v)?;
        }
        if let Some(v) = get(env::SEQUENCE) {
            self.sequence = v;
        }
        if let Some(v) = get(env::PODS_AFFECTED_PERC) {
            self.pods_affected_perc = Some(parse_value(env::PODS_AFFECTED_PERC, &v)?);
        }
        if let Some(v) = get(env::STATUS_CHECK_TIMEOUT) {
            self.status_check_timeout = parse_value(env::STATUS_CHECK_TIMEOUT, &v)?;
        }
        if let Some(v) = get(env::STATUS_CHECK_DELAY) {
            self.status_check_delay = parse_value(env::STATUS_CHECK_DELAY, &v)?;
        }
        if let Some(v) = get(env::JOB_CLEANUP_POLICY) {
            self.cleanup_policy = v;
        }
        if let Some(v) = get(env::TARGET_PODS) {
            self.target_names = split_list(&v);
        }
        if let Some(v) = get(env::APP_LABEL) {
            self.app_label = Some(v);
        }
        if let Some(v) = get(env::APP_NAMESPACE) {
            self.app_namespace = v;
        }
        if let Some(v) = get(env::CHAOS_NAMESPACE) {
            self.chaos_namespace = v;
        }
        Ok(())
    }

    /// Overlay command-line flags
    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(experiment) = &overrides.experiment {
            self.experiment = Some(experiment.clone());
        }
        if let Some(targets) = &overrides.targets {
            self.target_names.clone_from(targets);
        }
        if let Some(selector) = &overrides.selector {
            self.app_label = Some(selector.clone());
        }
        if let Some(namespace) = &overrides.namespace {
            self.app_namespace.clone_from(namespace);
        }
        if let Some(sequence) = &overrides.sequence {
            self.sequence.clone_from(sequence);
        }
        if let Some(duration) = overrides.duration {
            self.total_chaos_duration = duration;
        }
        if let Some(interval) = overrides.interval {
            self.chaos_interval = interval;
        }
        if let Some(percentage) = overrides.percentage {
            self.pods_affected_perc = Some(percentage);
        }
    }

    /// Experiment to run
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingExperiment`] or an unknown-name error.
    pub fn experiment(&self) -> Result<Experiment, ConfigError> {
        let name = self
            .experiment
            .as_deref()
            .ok_or(ConfigError::MissingExperiment)?;
        Ok(Experiment::from_str(name)?)
    }

    /// Fault for the configured experiment
    ///
    /// # Errors
    ///
    /// Same as [`RunnerConfig::experiment`].
    pub fn fault(&self) -> Result<CatalogFault, ConfigError> {
        Ok(CatalogFault::new(self.experiment()?).with_params(self.params.clone()))
    }

    /// Session parameters, resolving a `random` sequence with the thread rng
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Chaos`] for an unsupported sequence or cleanup
    /// policy, or a session that fails validation.
    pub fn session(&self) -> Result<ChaosSession, ConfigError> {
        self.session_with(&mut rand::rng())
    }

    /// Session parameters, resolving a `random` sequence with `rng`
    ///
    /// # Errors
    ///
    /// Same as [`RunnerConfig::session`].
    pub fn session_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<ChaosSession, ConfigError> {
        let sequence = Sequence::parse_with(&self.sequence, rng)?;
        let cleanup_policy = CleanupPolicy::from_str(&self.cleanup_policy)?;
        let session = ChaosSession::new()
            .with_chaos_duration(Duration::from_secs(self.total_chaos_duration))
            .with_chaos_interval(Duration::from_secs(self.chaos_interval))
            .with_ramp_time(Duration::from_secs(self.ramp_time))
            .with_sequence(sequence)
            .with_affected_percentage(self.affected_percentage())
            .with_status_check(
                Duration::from_secs(self.status_check_timeout),
                Duration::from_secs(self.status_check_delay),
            )
            .with_cleanup_policy(cleanup_policy);
        session.validate()?;
        Ok(session)
    }

    /// Affected percentage, 100 when unset
    #[must_use]
    pub fn affected_percentage(&self) -> u8 {
        self.pods_affected_perc.unwrap_or(100)
    }

    /// Namespace targets of `kind` live in; nodes are cluster-scoped
    #[must_use]
    pub fn namespace_for(&self, kind: TargetKind) -> &str {
        match kind {
            TargetKind::Node => "",
            TargetKind::Pod | TargetKind::Instance | TargetKind::Volume => &self.app_namespace,
        }
    }

    /// Target selection for `kind`
    ///
    /// Explicit names win over the label selector.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Chaos`] for a malformed selector.
    pub fn target_spec(&self, kind: TargetKind) -> Result<TargetSpec, ConfigError> {
        let namespace = self.namespace_for(kind);
        if !self.target_names.is_empty() {
            return Ok(TargetSpec::by_names(kind, namespace, self.target_names.clone()));
        }
        let selector = match self.app_label.as_deref() {
            Some(raw) => Selector::parse(raw)?,
            None => Selector::all(),
        };
        Ok(TargetSpec::by_selector(kind, namespace, selector)
            .with_percentage(self.affected_percentage()))
    }

    /// Probes declared in the file, checked through `api`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Chaos`] for a malformed probe selector.
    pub fn probes(
        &self,
        api: &Arc<dyn ControlApi>,
        kind: TargetKind,
    ) -> Result<ProbeSet, ConfigError> {
        self.probes.iter().try_fold(ProbeSet::new(), |set, probe| {
            let kind = probe.kind.unwrap_or(kind);
            let namespace = probe
                .namespace
                .clone()
                .unwrap_or_else(|| self.namespace_for(kind).to_string());
            let state = StateProbe::new(
                probe.name.clone(),
                api.clone(),
                kind,
                namespace,
                Selector::parse(&probe.selector)?,
                probe.expected.clone(),
                probe.stages.clone(),
            );
            Ok(set.with_probe(Arc::new(state)))
        })
    }
}

fn parse_value<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_list_drops_blanks() {
        assert_eq!(split_list(" a, b,,c ,"), vec!["a", "b", "c"]);
    }

    #[test]
    fn parse_value_reports_key() {
        let err = parse_value::<u64>("RAMP_TIME", "ten").unwrap_err();
        assert!(err.to_string().contains("RAMP_TIME"));
    }
}
