//! Chaos session parameters
//!
//! A [`ChaosSession`] is immutable once the run starts and shared behind `Arc`.
//! Iteration count, sustain windows and status polling budgets are all derived
//! here so every component agrees on them.

use crate::error::ChaosError;
use crate::retry::RetryPolicy;
use crate::types::{CleanupPolicy, Sequence};
use std::time::Duration;

/// Jitter fraction applied to status polling
const STATUS_POLL_JITTER: f64 = 0.1;

/// Session parameters for one experiment run
#[derive(Debug, Clone, PartialEq)]
pub struct ChaosSession {
    /// Total time chaos is applied to a target
    pub chaos_duration: Duration,
    /// Length of one injection window; zero means a single window
    pub chaos_interval: Duration,
    /// Wait before and after chaos
    pub ramp_time: Duration,
    /// Serial or parallel execution
    pub sequence: Sequence,
    /// Share of matching targets to pick, 1..=100
    pub affected_percentage: u8,
    /// Status check timeout
    pub timeout: Duration,
    /// Delay between status checks
    pub delay: Duration,
    /// Helper deletion policy
    pub cleanup_policy: CleanupPolicy,
}

impl ChaosSession {
    /// Create a session with default parameters
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set chaos duration
    #[must_use]
    pub fn with_chaos_duration(mut self, duration: Duration) -> Self {
        self.chaos_duration = duration;
        self
    }

    /// Set chaos interval
    #[must_use]
    pub fn with_chaos_interval(mut self, interval: Duration) -> Self {
        self.chaos_interval = interval;
        self
    }

    /// Set ramp time
    #[must_use]
    pub fn with_ramp_time(mut self, ramp: Duration) -> Self {
        self.ramp_time = ramp;
        self
    }

    /// Set execution sequence
    #[must_use]
    pub fn with_sequence(mut self, sequence: Sequence) -> Self {
        self.sequence = sequence;
        self
    }

    /// Set affected percentage
    #[must_use]
    pub fn with_affected_percentage(mut self, percentage: u8) -> Self {
        self.affected_percentage = percentage;
        self
    }

    /// Set status check timeout and delay
    #[must_use]
    pub fn with_status_check(mut self, timeout: Duration, delay: Duration) -> Self {
        self.timeout = timeout;
        self.delay = delay;
        self
    }

    /// Set cleanup policy
    #[must_use]
    pub fn with_cleanup_policy(mut self, policy: CleanupPolicy) -> Self {
        self.cleanup_policy = policy;
        self
    }

    /// Validate parameters
    ///
    /// # Errors
    ///
    /// Returns [`ChaosError::InvalidConfiguration`] when the status check
    /// timeout is zero. The affected percentage is checked by the resolver,
    /// since explicit target names ignore it.
    pub fn validate(&self) -> Result<(), ChaosError> {
        if self.timeout.is_zero() {
            return Err(ChaosError::invalid("status check timeout must be positive"));
        }
        Ok(())
    }

    /// Number of injection iterations per target
    #[must_use]
    pub fn iterations(&self) -> u32 {
        if self.chaos_interval.is_zero() {
            return 1;
        }
        let n = self.chaos_duration.as_millis() / self.chaos_interval.as_millis();
        u32::try_from(n).unwrap_or(u32::MAX).max(1)
    }

    /// Length of one sustain window, never longer than the duration
    #[must_use]
    pub fn sustain_window(&self) -> Duration {
        if self.chaos_interval.is_zero() {
            self.chaos_duration
        } else {
            self.chaos_interval.min(self.chaos_duration)
        }
    }

    /// Upper bound on total sustain time for one target
    #[must_use]
    pub fn sustain_budget(&self) -> Duration {
        self.chaos_duration + self.timeout
    }

    /// Interval between status polls (floored at one second)
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.delay.max(Duration::from_secs(1))
    }

    /// Retry policy for readiness and verification polls
    #[must_use]
    pub fn status_policy(&self) -> RetryPolicy {
        RetryPolicy::from_status_check(self.timeout, self.delay).with_jitter(STATUS_POLL_JITTER)
    }
}

impl Default for ChaosSession {
    fn default() -> Self {
        Self {
            chaos_duration: Duration::from_secs(30),
            chaos_interval: Duration::from_secs(10),
            ramp_time: Duration::ZERO,
            sequence: Sequence::Parallel,
            affected_percentage: 100,
            timeout: Duration::from_secs(180),
            delay: Duration::from_secs(2),
            cleanup_policy: CleanupPolicy::Always,
        }
    }
}
