//! Periodic fleet health monitoring

use super::{HealthAggregator, HealthReport};
use crate::discovery::ServiceCatalog;
use crate::lifecycle::{spawn_periodic, TaskSlot};
use crate::observability::MetricsCollector;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

/// Runs the aggregator on an interval and writes instance statuses back
/// into the catalog. The latest report is kept for the health endpoint.
pub struct HealthMonitor {
    aggregator: HealthAggregator,
    catalog: Arc<ServiceCatalog>,
    metrics: Option<Arc<MetricsCollector>>,
    latest: RwLock<Option<Arc<HealthReport>>>,
    interval: Duration,
    task: TaskSlot,
}

impl HealthMonitor {
    pub fn new(aggregator: HealthAggregator, catalog: Arc<ServiceCatalog>, interval: Duration) -> Self {
        Self {
            aggregator,
            catalog,
            metrics: None,
            latest: RwLock::new(None),
            interval,
            task: TaskSlot::new(),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn aggregator(&self) -> &HealthAggregator {
        &self.aggregator
    }

    /// Most recent report, if a check has completed
    pub fn latest_report(&self) -> Option<Arc<HealthReport>> {
        self.latest
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Probe the current catalog once
    pub async fn check_now(&self) -> Arc<HealthReport> {
        let report = Arc::new(self.aggregator.aggregate(self.catalog.instances()).await);

        for detail in &report.details {
            // An instance removed by discovery mid-check is simply skipped
            if !self.catalog.update_status(&detail.service_id, detail.status.into()) {
                debug!(service_id = %detail.service_id, "Instance left the catalog during health check");
            }
        }

        if !report.is_healthy() {
            warn!(
                overall = %report.overall,
                issues = report.system_issues.len(),
                "Fleet is not healthy"
            );
        }
        if let Some(metrics) = &self.metrics {
            metrics.health_aggregated(report.is_healthy());
        }

        *self
            .latest
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Arc::clone(&report));
        report
    }

    /// Start the periodic check; returns false if already running
    pub fn start(self: &Arc<Self>) -> bool {
        let monitor = Arc::clone(self);
        self.task.install(spawn_periodic(self.interval, move || {
            let monitor = Arc::clone(&monitor);
            async move {
                monitor.check_now().await;
            }
        }))
    }

    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }

    pub async fn stop(&self) {
        self.task.stop("health_monitor").await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthThresholds;
    use crate::service::{Endpoint, HealthStatus, ServiceInstance, ServiceStatus};
    use crate::testing::MockHealthProbe;

    fn monitor() -> (Arc<HealthMonitor>, Arc<ServiceCatalog>, Arc<MetricsCollector>) {
        let catalog = Arc::new(ServiceCatalog::new());
        catalog.apply(vec![
            ServiceInstance::new("up", "up", "diagnosis", Endpoint::http("10.0.0.1", 80, false)),
            ServiceInstance::new("down", "down", "diagnosis", Endpoint::http("10.0.0.2", 80, false)),
        ]);
        let metrics = Arc::new(MetricsCollector::new());
        let probe = Arc::new(MockHealthProbe::new());
        probe.set_status("down", HealthStatus::Unhealthy);
        let monitor = HealthMonitor::new(
            HealthAggregator::new(probe, HealthThresholds::default()),
            Arc::clone(&catalog),
            Duration::from_secs(15),
        )
        .with_metrics(Arc::clone(&metrics));
        (Arc::new(monitor), catalog, metrics)
    }

    #[tokio::test]
    async fn test_check_writes_statuses_to_catalog() {
        let (monitor, catalog, metrics) = monitor();
        assert!(monitor.latest_report().is_none());

        let report = monitor.check_now().await;
        assert_eq!(report.overall, HealthStatus::Degraded);
        assert_eq!(catalog.get("up").unwrap().status, ServiceStatus::Healthy);
        assert_eq!(catalog.get("down").unwrap().status, ServiceStatus::Unhealthy);
        assert!(catalog.get("down").unwrap().last_health_check.is_some());
        assert_eq!(monitor.latest_report().unwrap().counts.total, 2);
        assert!(!metrics.is_fleet_healthy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_monitoring() {
        let (monitor, _catalog, metrics) = monitor();
        assert!(monitor.start());
        assert!(!monitor.start());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(metrics.snapshot().health.aggregations, 2);

        monitor.stop().await;
        assert!(!monitor.is_running());
    }
}
