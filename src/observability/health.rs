//! Health check HTTP server for container orchestration
//!
//! Exposes the mesh's own status: the latest fleet health report, the
//! metrics snapshot, and readiness/liveness probes.

use crate::health::{HealthMonitor, HealthReport};
use crate::observability::MetricsCollector;
use crate::service::HealthStatus;
use serde::Serialize;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use warp::Filter;
use warp::http::StatusCode;

/// HTTP health check server
pub struct HealthServer {
    mesh_id: String,
    port: u16,
    metrics: Arc<MetricsCollector>,
    monitor: Option<Arc<HealthMonitor>>,
    ready: AtomicBool,
}

impl HealthServer {
    pub fn new(mesh_id: impl Into<String>, port: u16, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            mesh_id: mesh_id.into(),
            port,
            metrics,
            monitor: None,
            ready: AtomicBool::new(false),
        }
    }

    /// Serve fleet health from this monitor's latest report
    pub fn with_monitor(mut self, monitor: Arc<HealthMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Mark the mesh ready (or not) for traffic
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    fn latest_report(&self) -> Option<Arc<HealthReport>> {
        self.monitor.as_ref().and_then(|m| m.latest_report())
    }

    fn health_status(&self) -> MeshHealthResponse {
        let report = self.latest_report();
        MeshHealthResponse {
            status: report.as_ref().map(|r| r.overall).unwrap_or_default(),
            timestamp: current_timestamp(),
            mesh_id: self.mesh_id.clone(),
            uptime_seconds: self.metrics.snapshot().uptime_seconds,
            report: report.map(|r| HealthReport::clone(&r)),
        }
    }

    /// All routes, ready to be served or driven by `warp::test`
    pub fn routes(
        self: &Arc<Self>,
    ) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
        let health_server = Arc::clone(self);
        let metrics_server = Arc::clone(self);
        let ready_server = Arc::clone(self);

        // GET /health - latest fleet report
        let health_route = warp::path("health").and(warp::get()).and_then(move || {
            let server = Arc::clone(&health_server);
            async move {
                let status = server.health_status();
                let code = if status.status == HealthStatus::Unhealthy {
                    StatusCode::SERVICE_UNAVAILABLE
                } else {
                    StatusCode::OK
                };
                Ok::<_, Infallible>(warp::reply::with_status(warp::reply::json(&status), code))
            }
        });

        // GET /metrics - metrics snapshot
        let metrics_route = warp::path("metrics").and(warp::get()).and_then(move || {
            let server = Arc::clone(&metrics_server);
            async move { Ok::<_, Infallible>(warp::reply::json(&server.metrics.snapshot())) }
        });

        // GET /ready - readiness probe
        let ready_route = warp::path("ready").and(warp::get()).and_then(move || {
            let server = Arc::clone(&ready_server);
            async move {
                let ready = server.is_ready();
                let response = ReadinessResponse {
                    ready,
                    timestamp: current_timestamp(),
                };
                let code = if ready {
                    StatusCode::OK
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                };
                Ok::<_, Infallible>(warp::reply::with_status(warp::reply::json(&response), code))
            }
        });

        // GET /live - liveness probe
        let live_route = warp::path("live").and(warp::get()).map(|| {
            warp::reply::json(&LivenessResponse {
                alive: true,
                timestamp: current_timestamp(),
            })
        });

        // GET / - endpoint listing
        let root_route = warp::path::end().and(warp::get()).map(|| {
            let endpoints = BTreeMap::from([
                ("/health", "Fleet health report"),
                ("/metrics", "Call, discovery, health and registry metrics"),
                ("/ready", "Readiness probe"),
                ("/live", "Liveness probe"),
            ]);
            warp::reply::json(&ApiDocumentationResponse { endpoints })
        });

        health_route
            .or(metrics_route)
            .or(ready_route)
            .or(live_route)
            .or(root_route)
            .with(warp::cors().allow_any_origin())
    }

    /// Serve until the task is dropped
    pub async fn start(self: Arc<Self>) {
        let routes = self.routes();
        tracing::info!("Starting health server on port {}", self.port);
        warp::serve(routes).run(([0, 0, 0, 0], self.port)).await;
    }
}

#[derive(Debug, Serialize)]
struct MeshHealthResponse {
    status: HealthStatus,
    timestamp: u64,
    mesh_id: String,
    uptime_seconds: u64,
    report: Option<HealthReport>,
}

#[derive(Debug, Serialize)]
struct ReadinessResponse {
    ready: bool,
    timestamp: u64,
}

#[derive(Debug, Serialize)]
struct LivenessResponse {
    alive: bool,
    timestamp: u64,
}

#[derive(Debug, Serialize)]
struct ApiDocumentationResponse {
    endpoints: BTreeMap<&'static str, &'static str>,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::ServiceCatalog;
    use crate::health::{HealthAggregator, HealthThresholds};
    use crate::service::{Endpoint, ServiceInstance};
    use crate::testing::MockHealthProbe;
    use std::time::Duration;

    fn server() -> Arc<HealthServer> {
        Arc::new(HealthServer::new("mesh-test", 8080, Arc::new(MetricsCollector::new())))
    }

    #[tokio::test]
    async fn test_health_without_report_is_unknown() {
        let routes = server().routes();
        let res = warp::test::request().path("/health").reply(&routes).await;

        assert_eq!(res.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["status"], "unknown");
        assert_eq!(body["mesh_id"], "mesh-test");
        assert!(body["report"].is_null());
    }

    #[tokio::test]
    async fn test_unhealthy_fleet_returns_503() {
        let catalog = Arc::new(ServiceCatalog::new());
        catalog.apply(vec![ServiceInstance::new(
            "a",
            "a",
            "diagnosis",
            Endpoint::http("10.0.0.1", 80, false),
        )]);
        let probe = Arc::new(MockHealthProbe::new());
        probe.set_status("a", HealthStatus::Unhealthy);
        let monitor = Arc::new(HealthMonitor::new(
            HealthAggregator::new(probe, HealthThresholds::default()),
            catalog,
            Duration::from_secs(15),
        ));
        monitor.check_now().await;

        let server = Arc::new(
            HealthServer::new("mesh-test", 8080, Arc::new(MetricsCollector::new()))
                .with_monitor(monitor),
        );
        let res = warp::test::request().path("/health").reply(&server.routes()).await;

        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["report"]["counts"]["unhealthy"], 1);
    }

    #[tokio::test]
    async fn test_readiness_follows_flag() {
        let server = server();
        let routes = server.routes();

        let res = warp::test::request().path("/ready").reply(&routes).await;
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);

        server.set_ready(true);
        let res = warp::test::request().path("/ready").reply(&routes).await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_and_liveness() {
        let routes = server().routes();

        let res = warp::test::request().path("/metrics").reply(&routes).await;
        assert_eq!(res.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
        assert!(body["calls"].is_object());

        let res = warp::test::request().path("/live").reply(&routes).await;
        assert_eq!(res.status(), StatusCode::OK);

        let res = warp::test::request().path("/").reply(&routes).await;
        let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
        assert!(body["endpoints"]["/health"].is_string());
    }
}
