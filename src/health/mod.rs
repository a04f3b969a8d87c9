//! Fleet health checking
//!
//! A [`HealthProbe`] classifies one instance, the [`HealthAggregator`] fans
//! probes out over the whole catalog and summarises them into an immutable
//! [`HealthReport`], and the [`HealthMonitor`] repeats that on an interval.

use crate::config::HealthSection;
use crate::service::HealthStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod aggregator;
pub mod monitor;
pub mod probe;

pub use aggregator::{summarize, HealthAggregator};
pub use monitor::HealthMonitor;
pub use probe::{HealthProbe, HttpHealthProbe};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueCategory {
    Connectivity,
    Performance,
    Availability,
    Configuration,
}

/// Structured problem found by a probe or derived for the fleet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthIssue {
    pub severity: IssueSeverity,
    pub category: IssueCategory,
    pub description: String,
    pub impact: String,
}

impl HealthIssue {
    pub fn new(
        severity: IssueSeverity,
        category: IssueCategory,
        description: impl Into<String>,
        impact: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            category,
            description: description.into(),
            impact: impact.into(),
        }
    }
}

/// Classification of one instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub service_id: String,
    pub status: HealthStatus,
    pub response_time_ms: Option<u64>,
    pub issues: Vec<HealthIssue>,
    pub checked_at: DateTime<Utc>,
}

impl ProbeOutcome {
    pub fn new(service_id: impl Into<String>, status: HealthStatus) -> Self {
        Self {
            service_id: service_id.into(),
            status,
            response_time_ms: None,
            issues: Vec::new(),
            checked_at: Utc::now(),
        }
    }

    pub fn with_response_time(mut self, elapsed: Duration) -> Self {
        self.response_time_ms = Some(elapsed.as_millis() as u64);
        self
    }

    pub fn with_issue(mut self, issue: HealthIssue) -> Self {
        self.issues.push(issue);
        self
    }
}

/// Instance counts per health status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub total: usize,
    pub healthy: usize,
    pub degraded: usize,
    pub unhealthy: usize,
    pub unknown: usize,
}

impl StatusCounts {
    pub fn tally<'a>(statuses: impl IntoIterator<Item = &'a HealthStatus>) -> Self {
        let mut counts = Self::default();
        for status in statuses {
            counts.total += 1;
            match status {
                HealthStatus::Healthy => counts.healthy += 1,
                HealthStatus::Degraded => counts.degraded += 1,
                HealthStatus::Unhealthy => counts.unhealthy += 1,
                HealthStatus::Unknown => counts.unknown += 1,
            }
        }
        counts
    }
}

/// Immutable fleet-wide health snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub timestamp: DateTime<Utc>,
    pub overall: HealthStatus,
    pub details: Vec<ProbeOutcome>,
    pub counts: StatusCounts,
    pub system_issues: Vec<HealthIssue>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.overall == HealthStatus::Healthy
    }

    pub fn detail(&self, service_id: &str) -> Option<&ProbeOutcome> {
        self.details.iter().find(|d| d.service_id == service_id)
    }
}

/// Classification thresholds, all configurable
#[derive(Debug, Clone, PartialEq)]
pub struct HealthThresholds {
    /// Deadline for a single probe
    pub probe_timeout: Duration,
    /// Healthy probes slower than this are degraded
    pub degraded_latency: Duration,
    /// Fraction of unhealthy/unknown instances above which the fleet is unhealthy
    pub unhealthy_ratio: f64,
    /// Fleet average response time that raises a performance issue
    pub slow_fleet_response: Duration,
    /// Observed call error rate that degrades a healthy instance
    pub error_rate_degraded: f64,
    /// Observed call error rate that makes an instance unhealthy
    pub error_rate_unhealthy: f64,
    /// Calls needed before the error rate counts
    pub error_rate_min_requests: u64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self::from(&HealthSection::default())
    }
}

impl From<&HealthSection> for HealthThresholds {
    fn from(section: &HealthSection) -> Self {
        Self {
            probe_timeout: section.probe_timeout(),
            degraded_latency: Duration::from_millis(section.degraded_latency_ms),
            unhealthy_ratio: section.unhealthy_ratio,
            slow_fleet_response: Duration::from_millis(section.slow_fleet_response_ms),
            error_rate_degraded: section.error_rate_degraded,
            error_rate_unhealthy: section.error_rate_unhealthy,
            error_rate_min_requests: section.error_rate_min_requests,
        }
    }
}
