//! Retry policy for oracle calls.
//!
//! Rate limits back off exponentially from `base_delay`, honouring a longer
//! provider hint. Other retryable failures wait a fixed delay. Blocks and
//! rejections are never retried.

use std::time::Duration;

use crate::types::OracleError;

/// Outcome of one attempt, as seen by the retry loop.
#[derive(Debug)]
pub enum Attempt<T> {
    Success(T),
    Retry(OracleError),
    Fail(OracleError),
}

impl<T> Attempt<T> {
    pub fn classify(result: Result<T, OracleError>) -> Self {
        match result {
            Ok(value) => Attempt::Success(value),
            Err(e) if e.is_retryable() => Attempt::Retry(e),
            Err(e) => Attempt::Fail(e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per call, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub fixed_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            base_delay: Duration::from_secs(10),
            fixed_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// A policy that retries immediately. Used by tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            fixed_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Whether attempt number `attempt` (1-based) may be followed by another.
    pub fn can_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Exponential backoff for the `attempt`-th rate limit: `base * 2^(attempt-1)`, capped.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1u32 << exponent);
        delay.min(self.max_delay)
    }

    /// Wait before the attempt following a failed `attempt`.
    pub fn delay_for(&self, error: &OracleError, attempt: u32) -> Duration {
        match error {
            OracleError::RateLimited { retry_after } => {
                let backoff = self.backoff_delay(attempt);
                match retry_after {
                    Some(hint) => backoff.max((*hint).min(self.max_delay)),
                    None => backoff,
                }
            }
            _ => self.fixed_delay,
        }
    }
}
