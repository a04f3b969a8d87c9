//! Concurrent fan-out of health probes and fleet classification

use super::{
    HealthIssue, HealthProbe, HealthReport, HealthThresholds, IssueCategory, IssueSeverity,
    ProbeOutcome, StatusCounts,
};
use crate::adapter::ServiceMetricsTable;
use crate::service::{HealthStatus, ServiceInstance};
use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Probes every instance concurrently and summarises the results
pub struct HealthAggregator {
    probe: Arc<dyn HealthProbe>,
    thresholds: HealthThresholds,
    call_metrics: Option<Arc<ServiceMetricsTable>>,
}

impl HealthAggregator {
    pub fn new(probe: Arc<dyn HealthProbe>, thresholds: HealthThresholds) -> Self {
        Self {
            probe,
            thresholds,
            call_metrics: None,
        }
    }

    /// Downgrade instances whose observed calls fail too often
    pub fn with_call_metrics(mut self, call_metrics: Arc<ServiceMetricsTable>) -> Self {
        self.call_metrics = Some(call_metrics);
        self
    }

    pub fn thresholds(&self) -> &HealthThresholds {
        &self.thresholds
    }

    /// Probe one instance under the configured deadline
    pub async fn probe_one(&self, instance: &ServiceInstance) -> ProbeOutcome {
        let outcome =
            bounded_probe(Arc::clone(&self.probe), instance.clone(), self.thresholds.probe_timeout).await;
        self.apply_call_errors(outcome)
    }

    /// Fold the observed call error rate into a probe outcome.
    ///
    /// Below `error_rate_min_requests` calls the probe result stands.
    fn apply_call_errors(&self, mut outcome: ProbeOutcome) -> ProbeOutcome {
        let Some(stats) = self
            .call_metrics
            .as_ref()
            .and_then(|table| table.get(&outcome.service_id))
        else {
            return outcome;
        };
        if stats.request_count < self.thresholds.error_rate_min_requests {
            return outcome;
        }

        let error_rate = stats.error_rate();
        if error_rate > self.thresholds.error_rate_unhealthy {
            if outcome.status != HealthStatus::Unhealthy {
                debug!(service_id = %outcome.service_id, error_rate, "Call error rate marks instance unhealthy");
            }
            outcome.status = HealthStatus::Unhealthy;
            outcome.issues.push(HealthIssue::new(
                IssueSeverity::High,
                IssueCategory::Availability,
                format!("{:.0}% of recent calls failed", error_rate * 100.0),
                "most requests to this instance fail",
            ));
        } else if error_rate > self.thresholds.error_rate_degraded {
            if outcome.status == HealthStatus::Healthy {
                outcome.status = HealthStatus::Degraded;
            }
            outcome.issues.push(HealthIssue::new(
                IssueSeverity::Medium,
                IssueCategory::Availability,
                format!("{:.0}% of recent calls failed", error_rate * 100.0),
                "some requests to this instance fail",
            ));
        }
        outcome
    }

    /// Probe all instances in parallel and build a report
    ///
    /// A probe that overruns its deadline or panics yields `unknown` for that
    /// instance; the others are unaffected.
    pub async fn aggregate(&self, instances: Vec<ServiceInstance>) -> HealthReport {
        let started = std::time::Instant::now();
        let count = instances.len();

        let handles: Vec<_> = instances
            .into_iter()
            .map(|instance| {
                let probe = Arc::clone(&self.probe);
                let deadline = self.thresholds.probe_timeout;
                let id = instance.id.clone();
                (id, tokio::spawn(bounded_probe(probe, instance, deadline)))
            })
            .collect();

        let (ids, tasks): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
        let details = join_all(tasks)
            .await
            .into_iter()
            .zip(ids)
            .map(|(joined, id)| match joined {
                Ok(outcome) => self.apply_call_errors(outcome),
                Err(e) => {
                    error!(service_id = %id, "Health probe task failed: {}", e);
                    ProbeOutcome::new(id, HealthStatus::Unknown).with_issue(HealthIssue::new(
                        IssueSeverity::High,
                        IssueCategory::Connectivity,
                        "health probe task failed",
                        "instance health is unknown",
                    ))
                }
            })
            .collect();

        let report = summarize(details, &self.thresholds);
        info!(
            instances = count,
            overall = %report.overall,
            healthy = report.counts.healthy,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Health aggregation completed"
        );
        report
    }
}

async fn bounded_probe(
    probe: Arc<dyn HealthProbe>,
    instance: ServiceInstance,
    deadline: Duration,
) -> ProbeOutcome {
    match tokio::time::timeout(deadline, probe.probe(&instance)).await {
        Ok(outcome) => outcome,
        Err(_) => {
            debug!(service_id = %instance.id, "Health probe deadline exceeded");
            ProbeOutcome::new(&instance.id, HealthStatus::Unknown)
                .with_response_time(deadline)
                .with_issue(HealthIssue::new(
                    IssueSeverity::High,
                    IssueCategory::Connectivity,
                    format!("health probe exceeded {}ms", deadline.as_millis()),
                    "instance health is unknown",
                ))
        }
    }
}

/// Classify a fleet from per-instance outcomes.
///
/// - no instances: `unknown`
/// - more than `unhealthy_ratio` of instances unhealthy or unknown: `unhealthy`
/// - otherwise any degraded or unhealthy instance: `degraded`
/// - otherwise `healthy`
pub fn summarize(details: Vec<ProbeOutcome>, thresholds: &HealthThresholds) -> HealthReport {
    let counts = StatusCounts::tally(details.iter().map(|d| &d.status));
    let mut system_issues = Vec::new();

    let overall = if counts.total == 0 {
        HealthStatus::Unknown
    } else {
        let failing = counts.unhealthy + counts.unknown;
        let failing_ratio = failing as f64 / counts.total as f64;

        if failing_ratio > thresholds.unhealthy_ratio {
            system_issues.push(HealthIssue::new(
                IssueSeverity::Critical,
                IssueCategory::Connectivity,
                format!(
                    "{failing} of {} instances are unhealthy or unreachable",
                    counts.total
                ),
                "most requests cannot be served",
            ));
            HealthStatus::Unhealthy
        } else if counts.degraded > 0 || counts.unhealthy > 0 {
            if counts.unhealthy > 0 {
                system_issues.push(HealthIssue::new(
                    IssueSeverity::High,
                    IssueCategory::Availability,
                    format!("{} instances are unhealthy", counts.unhealthy),
                    "fleet capacity is reduced",
                ));
            }
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    };

    if counts.degraded > 0 {
        system_issues.push(HealthIssue::new(
            IssueSeverity::Medium,
            IssueCategory::Performance,
            format!("{} instances report degraded performance", counts.degraded),
            "some requests are slower than usual",
        ));
    }

    let timings: Vec<u64> = details.iter().filter_map(|d| d.response_time_ms).collect();
    if !timings.is_empty() {
        let average = timings.iter().sum::<u64>() as f64 / timings.len() as f64;
        if average > thresholds.slow_fleet_response.as_millis() as f64 {
            system_issues.push(HealthIssue::new(
                IssueSeverity::Medium,
                IssueCategory::Performance,
                format!("average health response time is {average:.0}ms"),
                "fleet-wide latency is elevated",
            ));
        }
    }

    HealthReport {
        timestamp: Utc::now(),
        overall,
        details,
        counts,
        system_issues,
    }
}
