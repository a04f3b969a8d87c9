//! Thread-safe metrics collection
//!
//! Atomic counters for the hot paths (service calls, discovery refreshes,
//! health aggregations, registry churn) and a bounded sample window for call
//! latencies. One collector is constructed by the owner of the mesh and
//! shared by `Arc`.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Latency samples kept for percentile estimation
const MAX_LATENCY_SAMPLES: usize = 1000;

/// Metrics collector using atomics and a mutex-protected sample window
pub struct MetricsCollector {
    // Service calls
    calls_started: AtomicU64,
    calls_succeeded: AtomicU64,
    calls_failed: AtomicU64,
    retries: AtomicU64,
    circuit_rejections: AtomicU64,
    call_latencies: Mutex<Vec<u64>>, // in milliseconds

    // Discovery
    discovery_refreshes: AtomicU64,
    discovery_failures: AtomicU64,
    services_known: AtomicU64,
    last_refresh: AtomicU64,

    // Health
    health_aggregations: AtomicU64,
    fleet_healthy: AtomicBool,
    last_aggregation: AtomicU64,

    // Registry
    agents_registered: AtomicU64,
    agents_unregistered: AtomicU64,
    agents_expired: AtomicU64,

    uptime_start: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            calls_started: AtomicU64::new(0),
            calls_succeeded: AtomicU64::new(0),
            calls_failed: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            circuit_rejections: AtomicU64::new(0),
            call_latencies: Mutex::new(Vec::new()),
            discovery_refreshes: AtomicU64::new(0),
            discovery_failures: AtomicU64::new(0),
            services_known: AtomicU64::new(0),
            last_refresh: AtomicU64::new(0),
            health_aggregations: AtomicU64::new(0),
            fleet_healthy: AtomicBool::new(true),
            last_aggregation: AtomicU64::new(0),
            agents_registered: AtomicU64::new(0),
            agents_unregistered: AtomicU64::new(0),
            agents_expired: AtomicU64::new(0),
            uptime_start: AtomicU64::new(current_timestamp()),
        }
    }

    // Service call metrics
    pub fn call_started(&self) {
        self.calls_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn call_succeeded(&self, duration: Duration) {
        self.calls_succeeded.fetch_add(1, Ordering::Relaxed);
        self.record_latency(duration);
    }

    pub fn call_failed(&self, duration: Duration) {
        self.calls_failed.fetch_add(1, Ordering::Relaxed);
        self.record_latency(duration);
    }

    pub fn retries_performed(&self, count: u32) {
        self.retries.fetch_add(u64::from(count), Ordering::Relaxed);
    }

    pub fn circuit_rejected(&self) {
        self.circuit_rejections.fetch_add(1, Ordering::Relaxed);
    }

    fn record_latency(&self, duration: Duration) {
        if let Ok(mut samples) = self.call_latencies.lock() {
            samples.push(duration.as_millis() as u64);

            if samples.len() > MAX_LATENCY_SAMPLES {
                samples.remove(0);
            }
        }
    }

    // Discovery metrics
    pub fn discovery_refreshed(&self, services: usize) {
        self.discovery_refreshes.fetch_add(1, Ordering::Relaxed);
        self.services_known.store(services as u64, Ordering::Relaxed);
        self.last_refresh.store(current_timestamp(), Ordering::Relaxed);
    }

    pub fn discovery_failed(&self) {
        self.discovery_failures.fetch_add(1, Ordering::Relaxed);
    }

    // Health metrics
    pub fn health_aggregated(&self, healthy: bool) {
        self.health_aggregations.fetch_add(1, Ordering::Relaxed);
        self.fleet_healthy.store(healthy, Ordering::Relaxed);
        self.last_aggregation.store(current_timestamp(), Ordering::Relaxed);
    }

    pub fn is_fleet_healthy(&self) -> bool {
        self.fleet_healthy.load(Ordering::Relaxed)
    }

    // Registry metrics
    pub fn agent_registered(&self) {
        self.agents_registered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn agent_unregistered(&self) {
        self.agents_unregistered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn agent_expired(&self) {
        self.agents_expired.fetch_add(1, Ordering::Relaxed);
    }

    /// Latency statistics (avg, p50, p95, p99)
    fn latency_statistics(&self) -> (f64, f64, f64, f64) {
        let Ok(samples) = self.call_latencies.lock() else {
            return (0.0, 0.0, 0.0, 0.0);
        };
        if samples.is_empty() {
            return (0.0, 0.0, 0.0, 0.0);
        }
        let mut sorted = samples.clone();
        sorted.sort_unstable();

        let avg = sorted.iter().sum::<u64>() as f64 / sorted.len() as f64;
        (
            avg,
            percentile(&sorted, 50.0),
            percentile(&sorted, 95.0),
            percentile(&sorted, 99.0),
        )
    }

    /// Complete metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let (avg_latency_ms, p50, p95, p99) = self.latency_statistics();

        MetricsSnapshot {
            calls: CallMetrics {
                started: self.calls_started.load(Ordering::Relaxed),
                succeeded: self.calls_succeeded.load(Ordering::Relaxed),
                failed: self.calls_failed.load(Ordering::Relaxed),
                retries: self.retries.load(Ordering::Relaxed),
                circuit_rejections: self.circuit_rejections.load(Ordering::Relaxed),
                avg_latency_ms,
                latency_p50_ms: p50,
                latency_p95_ms: p95,
                latency_p99_ms: p99,
            },
            discovery: DiscoveryMetrics {
                refreshes: self.discovery_refreshes.load(Ordering::Relaxed),
                failures: self.discovery_failures.load(Ordering::Relaxed),
                services_known: self.services_known.load(Ordering::Relaxed),
                last_refresh: self.last_refresh.load(Ordering::Relaxed),
            },
            health: HealthMetrics {
                aggregations: self.health_aggregations.load(Ordering::Relaxed),
                fleet_healthy: self.fleet_healthy.load(Ordering::Relaxed),
                last_aggregation: self.last_aggregation.load(Ordering::Relaxed),
            },
            registry: RegistryMetrics {
                registered: self.agents_registered.load(Ordering::Relaxed),
                unregistered: self.agents_unregistered.load(Ordering::Relaxed),
                expired: self.agents_expired.load(Ordering::Relaxed),
            },
            uptime_seconds: now.saturating_sub(self.uptime_start.load(Ordering::Relaxed)),
            timestamp: now,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsCollector").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub calls: CallMetrics,
    pub discovery: DiscoveryMetrics,
    pub health: HealthMetrics,
    pub registry: RegistryMetrics,
    pub uptime_seconds: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallMetrics {
    pub started: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub retries: u64,
    pub circuit_rejections: u64,
    pub avg_latency_ms: f64,
    pub latency_p50_ms: f64,
    pub latency_p95_ms: f64,
    pub latency_p99_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryMetrics {
    pub refreshes: u64,
    pub failures: u64,
    pub services_known: u64,
    pub last_refresh: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthMetrics {
    pub aggregations: u64,
    pub fleet_healthy: bool,
    pub last_aggregation: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistryMetrics {
    pub registered: u64,
    pub unregistered: u64,
    pub expired: u64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn percentile(sorted_data: &[u64], percentile: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }

    let index = (percentile / 100.0 * (sorted_data.len() - 1) as f64).round() as usize;
    sorted_data[index.min(sorted_data.len() - 1)] as f64
}
