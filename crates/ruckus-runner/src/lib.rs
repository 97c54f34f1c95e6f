//! Ruckus Runner - command line entry point
//!
//! Layers configuration, builds the simulated control plane from an
//! inventory, runs one session and maps its outcome to an exit code.

#![warn(unreachable_pub)]

pub mod config;
pub mod inventory;
pub mod logging;
pub mod output;
pub mod signal;

pub use config::{ConfigError, Overrides, ProbeConfig, RunnerConfig};
pub use inventory::Inventory;
pub use logging::LogFormat;
