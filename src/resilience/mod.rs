//! Failure isolation: circuit breakers and retries

pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState};
pub use retry::{RetryExecutor, RetryOutcome, RetryPolicy, DEFAULT_RETRYABLE_CODES};
