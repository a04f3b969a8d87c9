//! Discovery refresh loop

use super::{CatalogDiff, DiscoveryBackend, ServiceCatalog};
use crate::error::{sanitize_error_message, MeshError, MeshResult};
use crate::events::{EventBus, MeshEvent};
use crate::lifecycle::{spawn_periodic, TaskSlot};
use crate::observability::MetricsCollector;
use crate::resilience::CircuitBreakerRegistry;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn, Instrument};

/// Keeps the catalog in sync with a discovery backend.
///
/// A failed refresh leaves the catalog exactly as it was and publishes a
/// `DiscoveryError` event; the next tick tries again.
pub struct DiscoveryService {
    backend: Arc<dyn DiscoveryBackend>,
    catalog: Arc<ServiceCatalog>,
    events: EventBus,
    breakers: Option<Arc<CircuitBreakerRegistry>>,
    metrics: Option<Arc<MetricsCollector>>,
    refresh_interval: Duration,
    timeout: Duration,
    task: TaskSlot,
}

impl DiscoveryService {
    pub fn new(
        backend: Arc<dyn DiscoveryBackend>,
        catalog: Arc<ServiceCatalog>,
        events: EventBus,
        refresh_interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            backend,
            catalog,
            events,
            breakers: None,
            metrics: None,
            refresh_interval,
            timeout,
            task: TaskSlot::new(),
        }
    }

    /// Drop breaker state for services that disappear
    pub fn with_breakers(mut self, breakers: Arc<CircuitBreakerRegistry>) -> Self {
        self.breakers = Some(breakers);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn catalog(&self) -> &Arc<ServiceCatalog> {
        &self.catalog
    }

    /// Fetch from the backend once and apply the result
    pub async fn refresh_once(&self) -> MeshResult<CatalogDiff> {
        let backend = self.backend.name();
        let span = crate::discovery_span!(backend = backend);
        async move {
            let discovered = match tokio::time::timeout(self.timeout, self.backend.discover()).await
            {
                Ok(Ok(services)) => services,
                Ok(Err(e)) => return Err(self.refresh_failed(e)),
                Err(_) => {
                    let e = MeshError::timeout(
                        format!("{backend} discovery"),
                        self.timeout.as_millis() as u64,
                    );
                    return Err(self.refresh_failed(e));
                }
            };

            let diff = self.catalog.apply(discovered);
            self.publish_diff(&diff);
            if let Some(breakers) = &self.breakers {
                for id in &diff.removed {
                    breakers.remove(id);
                }
            }
            if let Some(metrics) = &self.metrics {
                metrics.discovery_refreshed(self.catalog.len());
            }

            if diff.is_empty() {
                debug!(services = self.catalog.len(), "Discovery refresh found no changes");
            } else {
                info!(
                    services = self.catalog.len(),
                    added = diff.added.len(),
                    updated = diff.updated.len(),
                    removed = diff.removed.len(),
                    "Service catalog updated"
                );
            }
            Ok(diff)
        }
        .instrument(span)
        .await
    }

    fn refresh_failed(&self, error: MeshError) -> MeshError {
        warn!(error = %error, "Discovery refresh failed; keeping previous catalog");
        self.events.publish(MeshEvent::DiscoveryError {
            backend: self.backend.name().to_string(),
            message: sanitize_error_message(&error.to_string()),
        });
        if let Some(metrics) = &self.metrics {
            metrics.discovery_failed();
        }
        error
    }

    fn publish_diff(&self, diff: &CatalogDiff) {
        if !diff.added.is_empty() {
            self.events.publish(MeshEvent::ServicesAdded {
                service_ids: diff.added.clone(),
            });
        }
        if !diff.updated.is_empty() {
            self.events.publish(MeshEvent::ServicesUpdated {
                service_ids: diff.updated.clone(),
            });
        }
        if !diff.removed.is_empty() {
            self.events.publish(MeshEvent::ServicesRemoved {
                service_ids: diff.removed.clone(),
            });
        }
    }

    /// Start periodic refresh. Static backends never change, so nothing is
    /// spawned for them. Returns whether a loop is now running.
    pub fn start(self: &Arc<Self>) -> bool {
        if !self.backend.is_dynamic() {
            debug!(backend = self.backend.name(), "Backend is static; no refresh loop");
            return false;
        }
        let service = Arc::clone(self);
        self.task.install(spawn_periodic(self.refresh_interval, move || {
            let service = Arc::clone(&service);
            async move {
                // Errors are already logged and published
                let _ = service.refresh_once().await;
            }
        }))
    }

    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }

    pub async fn stop(&self) {
        self.task.stop("discovery_refresh").await;
    }
}
