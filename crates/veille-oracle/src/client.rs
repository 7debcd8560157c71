//! Rate-limited oracle client.
//!
//! Every call holds one permit from a shared FIFO-fair semaphore for its
//! whole retry sequence, so at most `permits` requests are in flight across
//! all items and a backing-off call keeps its slot.

use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, error, warn};

use crate::decode::DecodeError;
use crate::oracle::Oracle;
use crate::retry::{Attempt, RetryPolicy};
use crate::types::OracleError;

pub struct OracleClient<O> {
    oracle: O,
    permits: Semaphore,
    policy: RetryPolicy,
}

impl<O: Oracle> OracleClient<O> {
    pub fn new(oracle: O, permits: usize, policy: RetryPolicy) -> Self {
        Self {
            oracle,
            permits: Semaphore::new(permits.max(1)),
            policy,
        }
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    /// Call the oracle and decode its answer, retrying per policy.
    ///
    /// Decode failures count as retryable and wait the fixed delay. Blocked
    /// and rejected calls fail immediately.
    pub async fn call<T, F>(&self, prompt: &str, decode: F) -> Result<T, OracleError>
    where
        F: Fn(&str) -> Result<T, DecodeError>,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| OracleError::Transient("permit pool closed".into()))?;

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let result = match self.oracle.complete(prompt).await {
                Ok(raw) => decode(&raw).map_err(|e| match e {
                    DecodeError::Empty => OracleError::Empty,
                    other => OracleError::Malformed(other.to_string()),
                }),
                Err(e) => Err(e),
            };

            match Attempt::classify(result) {
                Attempt::Success(value) => {
                    if attempt > 1 {
                        debug!("Oracle call succeeded on attempt {}", attempt);
                    }
                    return Ok(value);
                }
                Attempt::Fail(e) => {
                    warn!("Oracle call failed without retry: {}", e);
                    return Err(e);
                }
                Attempt::Retry(e) => {
                    if !self.policy.can_retry(attempt) {
                        error!("Oracle call gave up after {} attempts: {}", attempt, e);
                        return Err(OracleError::Exhausted {
                            attempts: attempt,
                            last: Box::new(e),
                        });
                    }
                    let delay = self.policy.delay_for(&e, attempt);
                    warn!(
                        "Oracle attempt {}/{} failed ({}), retrying in {:?}",
                        attempt, self.policy.max_attempts, e, delay
                    );
                    if delay > Duration::ZERO {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }
}
