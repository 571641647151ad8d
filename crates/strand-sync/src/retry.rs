//! Retry policy with exponential backoff.
//!
//! Only retryable ledger errors (`NotFound`, `Transport`) are retried.
//! Everything else surfaces on the first failure.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::debug;

use strand_core::Address;
use strand_ledger::{Envelope, Ledger, LedgerError};

/// Configuration for retrying ledger calls.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Backoff multiplier (e.g., 2.0 for doubling).
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Retry up to `max_attempts` times without sleeping.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// Try exactly once.
    pub fn no_retry() -> Self {
        Self::immediate(1)
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let nanos = self.base_delay.as_nanos() as f64 * factor;
        if !nanos.is_finite() || nanos >= self.max_delay.as_nanos() as f64 {
            return self.max_delay;
        }
        Duration::from_nanos(nanos.round() as u64)
    }

    /// Start counting attempts.
    pub fn backoff(&self) -> Backoff<'_> {
        Backoff {
            policy: self,
            attempts: 0,
        }
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts run out.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, LedgerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LedgerError>>,
    {
        let mut backoff = self.backoff();
        loop {
            match op().await {
                Err(e) if e.is_retryable() => backoff.wait(e).await?,
                other => return other,
            }
        }
    }
}

/// Attempt counter for one retried call.
#[derive(Debug)]
pub struct Backoff<'a> {
    policy: &'a RetryPolicy,
    attempts: u32,
}

impl Backoff<'_> {
    /// Record a failed attempt. Sleeps and returns `Ok` if another attempt
    /// is allowed, otherwise hands the error back.
    pub async fn wait(&mut self, error: LedgerError) -> Result<(), LedgerError> {
        self.attempts += 1;
        if self.attempts >= self.policy.max_attempts {
            return Err(error);
        }
        let delay = self.policy.delay_for(self.attempts);
        debug!(attempt = self.attempts, ?delay, error = %error, "retrying ledger call");
        if !delay.is_zero() {
            sleep(delay).await;
        }
        Ok(())
    }

    /// Failed attempts so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Fetch an envelope, retrying while it is not yet available.
pub async fn fetch_with_backoff<L: Ledger + ?Sized>(
    ledger: &L,
    address: &Address,
    policy: &RetryPolicy,
) -> Result<Envelope, LedgerError> {
    policy.run(|| ledger.fetch(address)).await
}
