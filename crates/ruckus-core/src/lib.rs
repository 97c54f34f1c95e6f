//! Ruckus Core - fault injection orchestration
//!
//! The engine behind every built-in experiment:
//! - Resolves targets from names or label selectors
//! - Creates, watches and deletes helper workloads
//! - Moves each target through the fault lifecycle state machine
//! - Runs targets serially or as one parallel batch
//! - Reverts in-flight targets when the session is aborted
//!
//! # Example
//!
//! ```rust,ignore
//! use ruckus_core::{CatalogFault, ChaosSession, Experiment, Orchestrator, Selector, SimCluster, TargetKind, TargetSpec};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let api = Arc::new(SimCluster::new());
//! let fault = Arc::new(CatalogFault::new(Experiment::PodDelete));
//! let orchestrator = Orchestrator::new(api, fault, ChaosSession::new());
//!
//! let spec = TargetSpec::by_selector(TargetKind::Pod, "default", Selector::parse("app=nginx")?);
//! let report = orchestrator.run(&spec, std::future::pending()).await?;
//!
//! println!("{:?}: exit {}", report.result.verdict, report.exit_code());
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

// Core modules
pub mod abort;
pub mod api;
pub mod catalog;
pub mod context;
pub mod error;
pub mod executor;
pub mod fault;
pub mod helper;
pub mod labels;
pub mod lifecycle;
pub mod orchestrator;
pub mod phase;
pub mod probe;
pub mod report;
pub mod resolver;
pub mod retry;
pub mod session;
pub mod signal;
pub mod sim;
pub mod types;

// Re-exports for convenience
pub use abort::{AbortOutcome, AbortWatcher};
pub use api::{ControlApi, FaultEffect, HelperPhase, HelperSpec, HelperStatus, Payload};
pub use catalog::{CatalogFault, Experiment, FaultParams};
pub use context::SessionContext;
pub use error::ChaosError;
pub use executor::{ExecutionReport, Executor};
pub use fault::{revert_with_retry, Fault, FaultLifetime, RevertAction};
pub use helper::{BatchLabel, HelperManager, HelperResource, HelperStats, Release};
pub use labels::{Labels, Selector};
pub use lifecycle::TargetRun;
pub use orchestrator::{Orchestrator, SessionReport};
pub use phase::{allowed_transitions, validate_transition, Phase};
pub use probe::{NoProbes, Probe, ProbeRunner, ProbeSet, ProbeStage, StateProbe};
pub use report::{
    fail_step, ChaosEvent, ChaosResult, EventKind, EventRecorder, MemoryRecorder, TargetReport,
    TracingRecorder, Verdict,
};
pub use resolver::{affected_count, resolve, select_targets, TargetSpec};
pub use retry::{retry, retry_abortable, RetryPolicy};
pub use session::ChaosSession;
pub use signal::AbortSignal;
pub use sim::{HelperScript, SimCluster, SimStats};
pub use types::{CleanupPolicy, RunId, Sequence, SessionId, Target, TargetKind, TargetStatus};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for running a session
    pub use crate::{
        CatalogFault, ChaosError, ChaosSession, CleanupPolicy, ControlApi, Experiment, Fault,
        Orchestrator, Selector, Sequence, SessionReport, TargetKind, TargetSpec, Verdict,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
