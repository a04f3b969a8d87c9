//! Single-instance health probes

use super::{HealthIssue, IssueCategory, IssueSeverity, ProbeOutcome};
use crate::error::MeshError;
use crate::service::{HealthStatus, ServiceInstance};
use crate::transport::{HttpMethod, ServiceTransport, TransportRequest, TransportResponse};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn, Instrument};

/// Checks one instance and classifies it.
///
/// Probes never fail: every problem is expressed in the outcome.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, instance: &ServiceInstance) -> ProbeOutcome;
}

/// `GET {endpoint}/health`, falling back to `GET {endpoint}/ping`
pub struct HttpHealthProbe {
    transport: Arc<dyn ServiceTransport>,
    timeout: Duration,
    degraded_latency: Duration,
}

impl HttpHealthProbe {
    pub fn new(transport: Arc<dyn ServiceTransport>, timeout: Duration, degraded_latency: Duration) -> Self {
        Self {
            transport,
            timeout,
            degraded_latency,
        }
    }

    async fn get(&self, url: String) -> Result<TransportResponse, MeshError> {
        self.transport
            .send(TransportRequest::new(HttpMethod::Get, url, self.timeout))
            .await
    }
}

/// Status reported by a health endpoint body.
///
/// A JSON `status` field or a plain-text body is parsed; a body that says
/// nothing (empty, or JSON without `status`) means healthy.
pub fn parse_health_body(body: &str) -> HealthStatus {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return HealthStatus::Healthy;
    }
    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(serde_json::Value::Object(map)) => match map.get("status") {
            Some(serde_json::Value::String(status)) => HealthStatus::parse(status),
            Some(_) => HealthStatus::Unknown,
            None => HealthStatus::Healthy,
        },
        Ok(serde_json::Value::String(status)) => HealthStatus::parse(&status),
        _ if trimmed.eq_ignore_ascii_case("pong") => HealthStatus::Healthy,
        _ => HealthStatus::parse(trimmed),
    }
}

fn failure_outcome(instance: &ServiceInstance, error: &MeshError, elapsed: Duration) -> ProbeOutcome {
    let (status, description) = match error {
        MeshError::Timeout { timeout_ms, .. } => (
            HealthStatus::Unknown,
            format!("health probe timed out after {timeout_ms}ms"),
        ),
        other => (HealthStatus::Unhealthy, format!("health endpoint unreachable: {other}")),
    };
    ProbeOutcome::new(&instance.id, status)
        .with_response_time(elapsed)
        .with_issue(HealthIssue::new(
            IssueSeverity::High,
            IssueCategory::Connectivity,
            description,
            "instance cannot receive traffic",
        ))
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self, instance: &ServiceInstance) -> ProbeOutcome {
        let span = crate::probe_span!(service_id = %instance.id);
        async move {
            let Some(endpoint) = instance.primary_endpoint() else {
                return ProbeOutcome::new(&instance.id, HealthStatus::Unknown).with_issue(
                    HealthIssue::new(
                        IssueSeverity::Medium,
                        IssueCategory::Configuration,
                        "instance has no endpoint",
                        "instance cannot be probed",
                    ),
                );
            };

            let started = Instant::now();
            let response = match self.get(endpoint.join("/health")).await {
                Ok(response) if response.status != 404 => Ok(response),
                Ok(_) | Err(_) => {
                    debug!("Falling back to /ping");
                    self.get(endpoint.join("/ping")).await
                }
            };
            let elapsed = started.elapsed();

            let response = match response {
                Ok(response) => response,
                Err(error) => {
                    warn!(error = %error, "Health probe failed");
                    return failure_outcome(instance, &error, elapsed);
                }
            };

            if !response.is_success() {
                return ProbeOutcome::new(&instance.id, HealthStatus::Unhealthy)
                    .with_response_time(response.elapsed)
                    .with_issue(HealthIssue::new(
                        IssueSeverity::High,
                        IssueCategory::Availability,
                        format!("health endpoint returned HTTP {}", response.status),
                        "instance reports it cannot serve requests",
                    ));
            }

            let mut outcome = ProbeOutcome::new(&instance.id, parse_health_body(&response.body))
                .with_response_time(response.elapsed);
            if outcome.status == HealthStatus::Healthy && response.elapsed > self.degraded_latency {
                outcome.status = HealthStatus::Degraded;
                outcome.issues.push(HealthIssue::new(
                    IssueSeverity::Medium,
                    IssueCategory::Performance,
                    format!(
                        "health endpoint answered in {}ms (threshold {}ms)",
                        response.elapsed.as_millis(),
                        self.degraded_latency.as_millis()
                    ),
                    "requests to this instance are slow",
                ));
            }
            debug!(status = %outcome.status, "Health probe completed");
            outcome
        }
        .instrument(span)
        .await
    }
}
