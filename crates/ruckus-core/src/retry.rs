//! Bounded retry with fixed wait
//!
//! Every poll in the engine (helper readiness, helper completion, helper
//! deletion, target verification, revert) goes through [`retry`] or
//! [`retry_abortable`]. Attempts are never interrupted; abort is observed
//! between them.

use crate::error::ChaosError;
use crate::signal::AbortSignal;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Attempt budget and spacing for one call site
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    times: u32,
    wait: Duration,
    jitter: f64,
}

impl RetryPolicy {
    /// Policy with `times` attempts spaced `wait` apart
    #[inline]
    #[must_use]
    pub const fn new(times: u32, wait: Duration) -> Self {
        Self {
            times,
            wait,
            jitter: 0.0,
        }
    }

    /// Derive a policy from a status check timeout and delay
    ///
    /// The delay is floored at one second; the attempt count is
    /// `timeout / delay`, at least one.
    #[must_use]
    pub fn from_status_check(timeout: Duration, delay: Duration) -> Self {
        let wait = delay.max(Duration::from_secs(1));
        let times = u32::try_from(timeout.as_millis() / wait.as_millis())
            .unwrap_or(u32::MAX)
            .max(1);
        Self::new(times, wait)
    }

    /// Fixed budget used for reverts: three attempts, one second apart
    #[inline]
    #[must_use]
    pub const fn revert() -> Self {
        Self::new(3, Duration::from_secs(1))
    }

    /// Add up to `fraction` of `wait` as random extra delay
    #[must_use]
    pub fn with_jitter(mut self, fraction: f64) -> Self {
        self.jitter = fraction.clamp(0.0, 1.0);
        self
    }

    /// Number of attempts (zero is treated as one)
    #[inline]
    #[must_use]
    pub fn times(&self) -> u32 {
        self.times.max(1)
    }

    /// Base wait between attempts
    #[inline]
    #[must_use]
    pub fn wait(&self) -> Duration {
        self.wait
    }

    /// Wait before the next attempt, jitter included
    #[must_use]
    pub fn next_delay(&self) -> Duration {
        if self.jitter <= 0.0 || self.wait.is_zero() {
            return self.wait;
        }
        let factor = 1.0 + rand::rng().random_range(0.0..=self.jitter);
        self.wait.mul_f64(factor)
    }
}

/// Run `attempt` until it succeeds or the policy is exhausted
///
/// Sleeps only between attempts. An attempt returning
/// [`ChaosError::Aborted`] ends the loop immediately.
///
/// # Errors
///
/// Returns the last attempt's error once all attempts fail.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, mut attempt: F) -> Result<T, ChaosError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ChaosError>>,
{
    let times = policy.times();
    let mut last_error = None;

    for n in 0..times {
        match attempt(n).await {
            Ok(value) => return Ok(value),
            Err(ChaosError::Aborted) => return Err(ChaosError::Aborted),
            Err(e) => last_error = Some(e),
        }

        if n + 1 < times {
            let delay = policy.next_delay();
            tracing::debug!(
                attempt = n + 1,
                max_attempts = times,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Retrying after failure"
            );
            sleep(delay).await;
        }
    }

    Err(last_error.unwrap_or_else(|| ChaosError::control("retry exhausted without error")))
}

/// Like [`retry`], but stops between attempts once `abort` is set
///
/// # Errors
///
/// Returns [`ChaosError::Aborted`] if the signal fires, otherwise the last
/// attempt's error once all attempts fail.
pub async fn retry_abortable<T, F, Fut>(
    policy: &RetryPolicy,
    abort: &AbortSignal,
    mut attempt: F,
) -> Result<T, ChaosError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ChaosError>>,
{
    let times = policy.times();
    let mut last_error = None;

    for n in 0..times {
        abort.check()?;
        match attempt(n).await {
            Ok(value) => return Ok(value),
            Err(ChaosError::Aborted) => return Err(ChaosError::Aborted),
            Err(e) => last_error = Some(e),
        }

        if n + 1 < times {
            abort.sleep(policy.next_delay()).await?;
        }
    }

    Err(last_error.unwrap_or_else(|| ChaosError::control("retry exhausted without error")))
}
