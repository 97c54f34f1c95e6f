//! Per-session shared state
//!
//! One [`SessionContext`] is built per run and shared by `Arc` between the
//! executor, every target's lifecycle and the abort watcher. Mutable state is
//! limited to the abort signal, the helper registry and the in-flight
//! registry, whose entries are written only by their own target.

use crate::api::ControlApi;
use crate::fault::Fault;
use crate::helper::HelperManager;
use crate::phase::Phase;
use crate::probe::{NoProbes, ProbeRunner};
use crate::report::{ChaosEvent, EventRecorder, TracingRecorder};
use crate::session::ChaosSession;
use crate::signal::AbortSignal;
use crate::types::{SessionId, Target};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Target currently driven by a lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InFlightEntry {
    /// The target
    pub target: Target,
    /// State captured before injection
    pub baseline: String,
    /// Current phase
    pub phase: Phase,
}

/// Registry of in-flight targets, read by the abort watcher
#[derive(Debug, Default)]
pub struct InFlight {
    entries: DashMap<String, InFlightEntry>,
    injected_any: AtomicBool,
}

impl InFlight {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a target once its baseline is known
    pub fn register(&self, target: &Target, baseline: &str, phase: Phase) {
        self.entries.insert(
            target.key(),
            InFlightEntry {
                target: target.clone(),
                baseline: baseline.to_string(),
                phase,
            },
        );
    }

    /// Record a phase change
    pub fn set_phase(&self, key: &str, phase: Phase) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.phase = phase;
        }
        if phase == Phase::Injecting {
            self.injected_any.store(true, Ordering::SeqCst);
        }
    }

    /// Drop a finished target
    pub fn remove(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Targets whose phase is not terminal
    #[must_use]
    pub fn pending(&self) -> Vec<InFlightEntry> {
        let mut pending: Vec<_> = self
            .entries
            .iter()
            .filter(|e| !e.phase.is_terminal())
            .map(|e| e.value().clone())
            .collect();
        pending.sort_by(|a, b| a.target.name.cmp(&b.target.name));
        pending
    }

    /// Check if any target ever reached injection
    #[must_use]
    pub fn injected_any(&self) -> bool {
        self.injected_any.load(Ordering::SeqCst)
    }

    /// Number of registered targets
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Everything a session's components share
pub struct SessionContext {
    /// Session identifier
    pub id: SessionId,
    /// Immutable session parameters
    pub session: Arc<ChaosSession>,
    /// Control plane
    pub api: Arc<dyn ControlApi>,
    /// Fault being injected
    pub fault: Arc<dyn Fault>,
    /// Helper manager
    pub helpers: HelperManager,
    /// Abort signal
    pub abort: AbortSignal,
    /// In-flight registry
    pub in_flight: InFlight,
    /// Event sink
    pub recorder: Arc<dyn EventRecorder>,
    /// Probe runner
    pub probes: Arc<dyn ProbeRunner>,
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("id", &self.id)
            .field("fault", &self.fault.name())
            .field("session", &self.session)
            .field("helpers", &self.helpers)
            .field("in_flight", &self.in_flight.len())
            .finish_non_exhaustive()
    }
}

impl SessionContext {
    /// Create a context with helpers placed in `namespace`
    #[must_use]
    pub fn new(
        session: ChaosSession,
        api: Arc<dyn ControlApi>,
        fault: Arc<dyn Fault>,
        namespace: &str,
    ) -> Self {
        let id = SessionId::new();
        let helpers = HelperManager::new(api.clone(), namespace, fault.name(), id);
        Self {
            id,
            session: Arc::new(session),
            api,
            fault,
            helpers,
            abort: AbortSignal::new(),
            in_flight: InFlight::new(),
            recorder: Arc::new(TracingRecorder),
            probes: Arc::new(NoProbes),
        }
    }

    /// Replace the event sink (builder)
    #[must_use]
    pub fn with_recorder(mut self, recorder: Arc<dyn EventRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    /// Replace the probe runner (builder)
    #[must_use]
    pub fn with_probes(mut self, probes: Arc<dyn ProbeRunner>) -> Self {
        self.probes = probes;
        self
    }

    /// Emit an event
    pub fn record(&self, event: ChaosEvent) {
        self.recorder.record(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TargetKind;

    #[test]
    fn pending_excludes_terminal_targets() {
        let registry = InFlight::new();
        let a = Target::new(TargetKind::Pod, "default", "a", "Running");
        let b = Target::new(TargetKind::Pod, "default", "b", "Running");
        registry.register(&a, "Running", Phase::RampWait);
        registry.register(&b, "Running", Phase::RampWait);
        assert!(!registry.injected_any());

        registry.set_phase(&a.key(), Phase::Injecting);
        registry.set_phase(&b.key(), Phase::Completed);

        let pending = registry.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].target.name, "a");
        assert!(registry.injected_any());
    }
}
