//! Bounded exponential backoff
//!
//! Delay before attempt `n + 1` is `min(max_delay, initial_delay * multiplier^n)`,
//! scaled by a uniform factor in `[0.5, 1.0]` when jitter is on.

use crate::error::{MeshError, MeshResult};
use rand::Rng;
use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry classes retried by default
pub const DEFAULT_RETRYABLE_CODES: &[&str] = &[
    "NETWORK_ERROR",
    "TIMEOUT_ERROR",
    "HTTP_408",
    "HTTP_429",
    "HTTP_5XX",
];

/// Immutable retry policy
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter: bool,
    /// Matched against [`MeshError::retry_class`]
    pub retryable_codes: BTreeSet<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(5000),
            backoff_multiplier: 2.0,
            jitter: true,
            retryable_codes: DEFAULT_RETRYABLE_CODES
                .iter()
                .map(|code| code.to_string())
                .collect(),
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Un-jittered delay after `completed` attempts (first retry is `completed = 1`)
    pub fn base_delay(&self, completed: u32) -> Duration {
        let exponent = completed.saturating_sub(1).min(i32::MAX as u32) as i32;
        let initial_ms = self.initial_delay.as_secs_f64() * 1000.0;
        let max_ms = self.max_delay.as_secs_f64() * 1000.0;
        let delay_ms = (initial_ms * self.backoff_multiplier.powi(exponent)).min(max_ms);
        if delay_ms.is_finite() && delay_ms > 0.0 {
            Duration::from_secs_f64(delay_ms / 1000.0)
        } else {
            Duration::ZERO
        }
    }

    /// Delay actually slept, jitter applied
    pub fn delay(&self, completed: u32) -> Duration {
        let base = self.base_delay(completed);
        if self.jitter {
            base.mul_f64(rand::thread_rng().gen_range(0.5..=1.0))
        } else {
            base
        }
    }

    pub fn should_retry(&self, error: &MeshError) -> bool {
        self.retryable_codes.contains(&error.retry_class())
    }
}

/// Result plus the number of attempts it took
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: MeshResult<T>,
    pub attempts: u32,
}

/// Runs an operation under a [`RetryPolicy`]
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn execute<T, F, Fut>(&self, operation: F) -> MeshResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = MeshResult<T>>,
    {
        self.run(operation).await.result
    }

    /// Run `operation` (given the 1-based attempt number) until it succeeds,
    /// fails terminally, or attempts run out.
    ///
    /// Exhaustion wraps the last error in [`MeshError::RetriesExhausted`];
    /// terminal errors are returned unchanged.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = MeshResult<T>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let error = match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "Operation succeeded after retry");
                    }
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                    };
                }
                Err(error) => error,
            };

            if !self.policy.should_retry(&error) {
                debug!(attempt, code = %error.code(), "Terminal error, not retrying");
                return RetryOutcome {
                    result: Err(error),
                    attempts: attempt,
                };
            }

            if attempt >= max_attempts {
                warn!(attempts = attempt, code = %error.code(), "Retries exhausted");
                return RetryOutcome {
                    result: Err(MeshError::RetriesExhausted {
                        attempts: attempt,
                        last_error: Box::new(error),
                    }),
                    attempts: attempt,
                };
            }

            let delay = self.policy.delay(attempt);
            debug!(attempt, delay_ms = delay.as_millis() as u64, code = %error.code(), "Retrying after delay");
            tokio::time::sleep(delay).await;
        }
    }
}
