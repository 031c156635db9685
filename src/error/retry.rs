//! Optimistic-concurrency retry for read-modify-write updates
//!
//! Status updates race with the external status-sync collaborator, so a
//! stale write comes back as [`OperatorError::Conflict`]. Only conflicts are
//! retried here; every other error is surfaced to the caller immediately.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{OperatorError, Result};

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Base delay between retries (in milliseconds)
    pub base_delay_ms: u64,
    /// Maximum delay between retries (in milliseconds)
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 10,
            max_delay_ms: 1000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before the given (1-based) retry attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let delay = self.base_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        Duration::from_millis(delay.min(self.max_delay_ms as f64) as u64)
    }
}

/// Run `operation` until it stops returning a conflict or the policy is
/// exhausted. The closure must re-read the object it updates on every call.
pub async fn retry_on_conflict<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(attempt = attempt, "Update succeeded after conflict retry");
                }
                return Ok(result);
            }
            Err(OperatorError::Conflict(reason)) if attempt < policy.max_attempts => {
                let delay = policy.delay_for_attempt(attempt);
                debug!(
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    reason = %reason,
                    "Update conflicted, retrying"
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(error) => {
                if error.is_conflict() {
                    warn!(
                        attempt = attempt,
                        max_attempts = policy.max_attempts,
                        "Maximum conflict retries reached"
                    );
                }
                return Err(error);
            }
        }
    }
}
