//! Per-target circuit breaker
//!
//! A breaker is a small state machine whose transitions take the current time
//! as an argument, so tests can drive it without sleeping. The registry owns
//! one breaker per service id behind its own mutex, created lazily on first
//! use and dropped when the service leaves the catalog.

use crate::events::{EventBus, MeshEvent};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        };
        f.write_str(name)
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Time since the last failure before a trial call is allowed
    pub recovery_timeout: Duration,
    /// Successful trial calls needed to close again
    pub minimum_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            minimum_requests: 3,
        }
    }
}

/// Single breaker state machine
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    trial_count: u32,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure: None,
            trial_count: 0,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    pub fn trial_count(&self) -> u32 {
        self.trial_count
    }

    pub fn can_execute(&mut self) -> bool {
        self.can_execute_at(Instant::now())
    }

    /// Whether a call may proceed at `now`.
    ///
    /// An open breaker whose recovery timeout has elapsed moves to half-open
    /// and admits the call.
    pub fn can_execute_at(&mut self, now: Instant) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let recovered = self
                    .last_failure
                    .map(|at| now.saturating_duration_since(at) >= self.config.recovery_timeout)
                    .unwrap_or(true);
                if recovered {
                    self.state = CircuitState::HalfOpen;
                    self.trial_count = 0;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => self.trial_count < self.config.minimum_requests,
        }
    }

    pub fn record_success(&mut self) {
        self.failure_count = 0;
        if self.state == CircuitState::HalfOpen {
            self.trial_count += 1;
            if self.trial_count >= self.config.minimum_requests {
                self.state = CircuitState::Closed;
                self.trial_count = 0;
            }
        }
    }

    pub fn record_failure(&mut self) {
        self.record_failure_at(Instant::now());
    }

    pub fn record_failure_at(&mut self, now: Instant) {
        self.failure_count = self.failure_count.saturating_add(1);
        self.last_failure = Some(now);
        match self.state {
            CircuitState::Closed => {
                if self.failure_count >= self.config.failure_threshold {
                    self.state = CircuitState::Open;
                }
            }
            CircuitState::HalfOpen => {
                self.state = CircuitState::Open;
                self.trial_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// Force the breaker back to closed with cleared counters
    pub fn reset(&mut self) {
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.trial_count = 0;
        self.last_failure = None;
    }
}

/// Breakers keyed by service id
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<String, Arc<Mutex<CircuitBreaker>>>>,
    events: Option<EventBus>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
            events: None,
        }
    }

    /// Publish state transitions on the given bus
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Breaker for `service_id`, created on first use
    pub fn breaker(&self, service_id: &str) -> Arc<Mutex<CircuitBreaker>> {
        let mut breakers = lock(&self.breakers);
        Arc::clone(
            breakers
                .entry(service_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(CircuitBreaker::new(self.config.clone())))),
        )
    }

    pub fn can_execute(&self, service_id: &str) -> bool {
        self.transition(service_id, |breaker| breaker.can_execute())
    }

    pub fn record_success(&self, service_id: &str) {
        self.transition(service_id, CircuitBreaker::record_success);
    }

    pub fn record_failure(&self, service_id: &str) {
        self.transition(service_id, CircuitBreaker::record_failure);
    }

    /// Current state, `None` when no call has targeted the service yet
    pub fn state(&self, service_id: &str) -> Option<CircuitState> {
        let breaker = lock(&self.breakers).get(service_id).cloned()?;
        let state = lock(&breaker).state();
        Some(state)
    }

    /// Reset an existing breaker; returns false if none exists
    pub fn reset(&self, service_id: &str) -> bool {
        if !lock(&self.breakers).contains_key(service_id) {
            return false;
        }
        self.transition(service_id, CircuitBreaker::reset);
        info!(service_id, "Circuit breaker reset");
        true
    }

    /// Drop the breaker of a service that left the mesh
    pub fn remove(&self, service_id: &str) -> bool {
        lock(&self.breakers).remove(service_id).is_some()
    }

    pub fn tracked_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.breakers).keys().cloned().collect();
        ids.sort();
        ids
    }

    fn transition<R>(&self, service_id: &str, apply: impl FnOnce(&mut CircuitBreaker) -> R) -> R {
        let breaker = self.breaker(service_id);
        let (result, previous, current) = {
            let mut guard = lock(&breaker);
            let previous = guard.state();
            let result = apply(&mut guard);
            (result, previous, guard.state())
        };

        if previous != current {
            if current == CircuitState::Open {
                warn!(service_id, %previous, %current, "Circuit opened");
            } else {
                info!(service_id, %previous, %current, "Circuit state changed");
            }
            if let Some(events) = &self.events {
                events.publish(MeshEvent::CircuitStateChanged {
                    service_id: service_id.to_string(),
                    previous,
                    current,
                });
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;

    fn config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            recovery_timeout: Duration::from_millis(1000),
            minimum_requests: 2,
        }
    }

    #[test]
    fn test_threshold_failures_open_the_circuit() {
        let mut breaker = CircuitBreaker::new(config());
        let now = Instant::now();

        breaker.record_failure_at(now);
        breaker.record_failure_at(now);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.can_execute_at(now));

        breaker.record_failure_at(now);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.can_execute_at(now + Duration::from_millis(999)));
    }

    #[test]
    fn test_recovery_timeout_moves_to_half_open() {
        let mut breaker = CircuitBreaker::new(config());
        let now = Instant::now();
        for _ in 0..3 {
            breaker.record_failure_at(now);
        }

        assert!(breaker.can_execute_at(now + Duration::from_millis(1000)));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert_eq!(breaker.trial_count(), 0);
    }

    #[test]
    fn test_half_open_success_streak_closes() {
        let mut breaker = CircuitBreaker::new(config());
        let now = Instant::now();
        for _ in 0..3 {
            breaker.record_failure_at(now);
        }
        let later = now + Duration::from_secs(2);

        assert!(breaker.can_execute_at(later));
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.can_execute_at(later));
        breaker.record_success();

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let mut breaker = CircuitBreaker::new(config());
        let now = Instant::now();
        for _ in 0..3 {
            breaker.record_failure_at(now);
        }
        let later = now + Duration::from_secs(2);
        assert!(breaker.can_execute_at(later));

        breaker.record_failure_at(later);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.can_execute_at(later + Duration::from_millis(10)));
    }

    #[test]
    fn test_success_while_open_keeps_circuit_open() {
        let mut breaker = CircuitBreaker::new(config());
        let now = Instant::now();
        for _ in 0..3 {
            breaker.record_failure_at(now);
        }
        breaker.record_success();

        // Success while open only clears the counter
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.failure_count(), 0);
        assert!(!breaker.can_execute_at(now));
    }

    #[test]
    fn test_success_resets_failure_count() {
        let mut breaker = CircuitBreaker::new(config());
        let now = Instant::now();
        breaker.record_failure_at(now);
        breaker.record_failure_at(now);
        breaker.record_success();
        breaker.record_failure_at(now);
        breaker.record_failure_at(now);

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 2);
    }

    #[test]
    fn test_registry_creates_lazily_and_removes() {
        let registry = CircuitBreakerRegistry::new(config());
        assert_eq!(registry.state("svc-1"), None);

        assert!(registry.can_execute("svc-1"));
        assert_eq!(registry.state("svc-1"), Some(CircuitState::Closed));
        assert_eq!(registry.tracked_ids(), vec!["svc-1".to_string()]);

        assert!(registry.remove("svc-1"));
        assert_eq!(registry.state("svc-1"), None);
        assert!(!registry.reset("svc-1"));
    }

    #[tokio::test]
    async fn test_registry_publishes_transitions() {
        let bus = EventBus::default();
        let mut receiver = bus.subscribe();
        let registry = CircuitBreakerRegistry::new(config()).with_events(bus);

        for _ in 0..3 {
            registry.record_failure("svc-1");
        }
        assert_eq!(registry.state("svc-1"), Some(CircuitState::Open));
        assert!(!registry.can_execute("svc-1"));

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.kind(), EventKind::CircuitStateChanged);
        assert_eq!(
            event,
            MeshEvent::CircuitStateChanged {
                service_id: "svc-1".to_string(),
                previous: CircuitState::Closed,
                current: CircuitState::Open,
            }
        );

        assert!(registry.reset("svc-1"));
        assert_eq!(registry.state("svc-1"), Some(CircuitState::Closed));
    }
}
