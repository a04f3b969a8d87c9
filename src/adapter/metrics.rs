//! Per-service call statistics

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Outcome counts and timing for calls to one service
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ServiceMetrics {
    pub request_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub total_response_time_ms: u64,
    pub last_request: Option<DateTime<Utc>>,
    pub last_error: Option<DateTime<Utc>>,
}

impl ServiceMetrics {
    pub fn record(&mut self, success: bool, elapsed: Duration) {
        let now = Utc::now();
        self.request_count += 1;
        self.total_response_time_ms += elapsed.as_millis() as u64;
        self.last_request = Some(now);
        if success {
            self.success_count += 1;
        } else {
            self.error_count += 1;
            self.last_error = Some(now);
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.request_count == 0 {
            return 0.0;
        }
        self.success_count as f64 / self.request_count as f64
    }

    pub fn error_rate(&self) -> f64 {
        if self.request_count == 0 {
            return 0.0;
        }
        self.error_count as f64 / self.request_count as f64
    }

    pub fn average_response_time_ms(&self) -> f64 {
        if self.request_count == 0 {
            return 0.0;
        }
        self.total_response_time_ms as f64 / self.request_count as f64
    }
}

/// Call statistics for every service called through the adapter
#[derive(Debug, Default)]
pub struct ServiceMetricsTable {
    services: Mutex<HashMap<String, ServiceMetrics>>,
}

impl ServiceMetricsTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, HashMap<String, ServiceMetrics>> {
        self.services
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record(&self, service_id: &str, success: bool, elapsed: Duration) {
        self.guard()
            .entry(service_id.to_string())
            .or_default()
            .record(success, elapsed);
    }

    pub fn get(&self, service_id: &str) -> Option<ServiceMetrics> {
        self.guard().get(service_id).cloned()
    }

    pub fn all(&self) -> BTreeMap<String, ServiceMetrics> {
        self.guard()
            .iter()
            .map(|(id, m)| (id.clone(), m.clone()))
            .collect()
    }
}
