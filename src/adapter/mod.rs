//! Service adapter façade
//!
//! [`ServiceAdapter`] owns every mesh component and is the single entry point
//! for callers: call a service (optionally with retry behind its circuit
//! breaker), select an instance, probe health and push or pull a service's
//! configuration. `start` spawns the background loops and `destroy` stops
//! all of them.

use crate::config::MeshConfig;
use crate::discovery::{BackendFactory, DiscoveryBackend, DiscoveryService, ServiceCatalog};
use crate::error::{MeshError, MeshResult};
use crate::events::EventBus;
use crate::health::{HealthAggregator, HealthMonitor, HealthProbe, HealthThresholds, HttpHealthProbe};
use crate::observability::MetricsCollector;
use crate::registry::AgentRegistry;
use crate::resilience::{CircuitBreakerRegistry, CircuitState, RetryExecutor, RetryPolicy};
use crate::routing::{LoadBalancer, RoutingRule, RoutingTable, SelectionCriteria};
use crate::service::{HealthStatus, ServiceInstance};
use crate::transport::{HttpTransport, ServiceTransport, TransportRequest};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

pub mod metrics;
pub mod request;

pub use metrics::{ServiceMetrics, ServiceMetricsTable};
pub use request::{AgentRequest, AgentResponse};

/// Assembles a [`ServiceAdapter`], optionally with substituted collaborators
pub struct ServiceAdapterBuilder {
    config: MeshConfig,
    backend: Option<Arc<dyn DiscoveryBackend>>,
    transport: Option<Arc<dyn ServiceTransport>>,
    probe: Option<Arc<dyn HealthProbe>>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl ServiceAdapterBuilder {
    pub fn backend(mut self, backend: Arc<dyn DiscoveryBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn ServiceTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> MeshResult<ServiceAdapter> {
        let config = self.config;
        config.validate()?;

        let client = reqwest::Client::builder()
            .timeout(config.transport.request_timeout())
            .build()
            .map_err(|e| MeshError::internal(format!("failed to build HTTP client: {e}")))?;

        let backend = match self.backend {
            Some(backend) => backend,
            None => BackendFactory::create(&config.discovery, client.clone())?,
        };
        let transport: Arc<dyn ServiceTransport> = self
            .transport
            .unwrap_or_else(|| Arc::new(HttpTransport::with_client(client)));
        let thresholds = HealthThresholds::from(&config.health);
        let probe: Arc<dyn HealthProbe> = self.probe.unwrap_or_else(|| {
            Arc::new(HttpHealthProbe::new(
                Arc::clone(&transport),
                thresholds.probe_timeout,
                thresholds.degraded_latency,
            ))
        });
        let metrics = self.metrics.unwrap_or_default();
        let service_metrics = Arc::new(ServiceMetricsTable::new());
        let routing_rules = RoutingTable::with_rules(config.load_balancing.rules.iter().cloned())?;

        let events = EventBus::default();
        let catalog = Arc::new(ServiceCatalog::new());
        let breakers = Arc::new(
            CircuitBreakerRegistry::new(config.circuit_breaker.to_breaker_config())
                .with_events(events.clone()),
        );
        let discovery = Arc::new(
            DiscoveryService::new(
                backend,
                Arc::clone(&catalog),
                events.clone(),
                config.discovery.refresh_interval(),
                config.discovery.timeout(),
            )
            .with_breakers(Arc::clone(&breakers))
            .with_metrics(Arc::clone(&metrics)),
        );
        let health = Arc::new(
            HealthMonitor::new(
                HealthAggregator::new(probe, thresholds).with_call_metrics(Arc::clone(&service_metrics)),
                Arc::clone(&catalog),
                config.health.interval(),
            )
            .with_metrics(Arc::clone(&metrics)),
        );
        let registry = Arc::new(
            AgentRegistry::new(&config.registry, events.clone())
                .with_metrics(Arc::clone(&metrics))
                .with_strategy(config.load_balancing.strategy),
        );

        Ok(ServiceAdapter {
            retry_policy: config.retry.to_policy(),
            config,
            catalog,
            discovery,
            breakers,
            balancer: LoadBalancer::new(),
            routing_rules,
            transport,
            events,
            metrics,
            service_metrics,
            health,
            registry,
        })
    }
}

/// Entry point to the mesh
pub struct ServiceAdapter {
    config: MeshConfig,
    catalog: Arc<ServiceCatalog>,
    discovery: Arc<DiscoveryService>,
    breakers: Arc<CircuitBreakerRegistry>,
    balancer: LoadBalancer,
    routing_rules: RoutingTable,
    transport: Arc<dyn ServiceTransport>,
    events: EventBus,
    metrics: Arc<MetricsCollector>,
    service_metrics: Arc<ServiceMetricsTable>,
    health: Arc<HealthMonitor>,
    registry: Arc<AgentRegistry>,
    retry_policy: RetryPolicy,
}

impl ServiceAdapter {
    /// Adapter with collaborators built from configuration
    pub fn new(config: MeshConfig) -> MeshResult<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: MeshConfig) -> ServiceAdapterBuilder {
        ServiceAdapterBuilder {
            config,
            backend: None,
            transport: None,
            probe: None,
            metrics: None,
        }
    }

    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<ServiceCatalog> {
        &self.catalog
    }

    pub fn discovery(&self) -> &Arc<DiscoveryService> {
        &self.discovery
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn health_monitor(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// Populate the catalog, classify it once and start the background loops.
    ///
    /// A failed first refresh is logged and leaves the catalog empty; the
    /// refresh loop keeps trying. The first health check runs before `start`
    /// returns so discovered instances are routable right away.
    pub async fn start(&self) -> MeshResult<()> {
        info!(
            mesh_id = %self.config.mesh.id,
            backend = self.discovery.backend_name(),
            "Starting service adapter"
        );
        if let Err(e) = self.discovery.refresh_once().await {
            warn!(error = %e, "Initial discovery failed; continuing with an empty catalog");
        }
        self.health.check_now().await;
        self.discovery.start();
        self.health.start();
        self.registry.start_sweeper();
        Ok(())
    }

    /// Stop every background loop; no timer survives this call
    pub async fn destroy(&self) {
        info!(mesh_id = %self.config.mesh.id, "Stopping service adapter");
        self.discovery.stop().await;
        self.health.stop().await;
        self.registry.stop().await;
    }

    fn instance(&self, service_id: &str) -> MeshResult<ServiceInstance> {
        self.catalog
            .get(service_id)
            .ok_or_else(|| MeshError::service_not_found(service_id))
    }

    fn request_id(&self, request: &AgentRequest) -> String {
        request
            .header(&self.config.transport.request_id_header)
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string())
    }

    /// Call a service once, without retry or circuit breaking
    pub async fn call_service(&self, service_id: &str, request: AgentRequest) -> MeshResult<AgentResponse> {
        let instance = self.instance(service_id)?;
        let request_id = self.request_id(&request);
        self.send_once(&instance, &request, &request_id).await
    }

    /// Call a service behind its circuit breaker, retrying transient failures.
    ///
    /// An open circuit fails fast without touching the network. The breaker
    /// records a success on the final success and a failure when the call
    /// ends on a service-side (retryable) error; client errors do not count
    /// against the target.
    pub async fn call_service_with_retry(
        &self,
        service_id: &str,
        request: AgentRequest,
        policy: Option<RetryPolicy>,
    ) -> MeshResult<AgentResponse> {
        let instance = self.instance(service_id)?;

        if !self.breakers.can_execute(service_id) {
            self.metrics.circuit_rejected();
            warn!(service_id, "Circuit open; rejecting call");
            return Err(MeshError::circuit_open(service_id));
        }

        let executor = RetryExecutor::new(policy.unwrap_or_else(|| self.retry_policy.clone()));
        let request_id = self.request_id(&request);
        let outcome = executor
            .run(|attempt| {
                debug!(service_id, attempt, "Calling service");
                self.send_once(&instance, &request, &request_id)
            })
            .await;

        if outcome.attempts > 1 {
            self.metrics.retries_performed(outcome.attempts - 1);
        }
        match &outcome.result {
            Ok(_) => self.breakers.record_success(service_id),
            Err(e) if e.is_retryable() => self.breakers.record_failure(service_id),
            Err(_) => {}
        }
        outcome.result
    }

    async fn send_once(
        &self,
        instance: &ServiceInstance,
        request: &AgentRequest,
        request_id: &str,
    ) -> MeshResult<AgentResponse> {
        let endpoint = instance
            .primary_endpoint()
            .ok_or_else(|| MeshError::validation("endpoints", format!("service '{}' has no endpoint", instance.id)))?;

        let timeout = request
            .timeout
            .unwrap_or_else(|| self.config.transport.request_timeout());
        let mut outbound = TransportRequest::new(request.method, endpoint.join(&request.path), timeout);
        for (name, value) in &request.headers {
            outbound = outbound.with_header(name, value);
        }
        outbound = outbound
            .with_header(&self.config.transport.request_id_header, request_id)
            .with_auth(endpoint.auth.as_ref());
        if let Some(body) = &request.body {
            outbound = outbound.with_body(body.clone());
        }

        let span = crate::call_span!(
            service_id = %instance.id,
            request_id,
            method = %request.method,
            path = %request.path
        );
        async move {
            self.metrics.call_started();
            let started = Instant::now();
            let result = self
                .transport
                .send(outbound)
                .await
                .and_then(|response| response.error_for_status());
            let elapsed = started.elapsed();

            self.service_metrics.record(&instance.id, result.is_ok(), elapsed);

            match result {
                Ok(response) => {
                    self.metrics.call_succeeded(elapsed);
                    debug!(status = response.status, elapsed_ms = elapsed.as_millis() as u64, "Service call succeeded");
                    Ok(AgentResponse::from_transport(response, request_id.to_string()))
                }
                Err(e) => {
                    self.metrics.call_failed(elapsed);
                    debug!(code = %e.code(), "Service call failed");
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Probe one service now and record the result as its status
    pub async fn check_service_health(&self, service_id: &str) -> MeshResult<HealthStatus> {
        let instance = self.instance(service_id)?;
        let outcome = self.health.aggregator().probe_one(&instance).await;
        self.catalog.update_status(service_id, outcome.status.into());
        Ok(outcome.status)
    }

    /// Choose one routable instance matching `criteria`.
    ///
    /// Instances whose circuit is open are skipped, then the first matching
    /// routing rule may narrow the rest to its targets. Observed call latency
    /// and error rate override the discovered figures for scored policies.
    pub fn select_service(&self, criteria: &SelectionCriteria) -> Option<ServiceInstance> {
        let snapshot = self.catalog.snapshot();
        let observed = self.service_metrics.all();

        let candidates: Vec<ServiceInstance> = criteria
            .filter(snapshot.values())
            .into_iter()
            .filter(|instance| self.breakers.state(&instance.id) != Some(CircuitState::Open))
            .map(|instance| {
                let mut candidate = instance.clone();
                if let Some(stats) = observed.get(&instance.id) {
                    candidate.performance.avg_response_time_ms = stats.average_response_time_ms();
                    candidate.performance.error_rate = stats.error_rate();
                }
                candidate
            })
            .collect();
        let candidates = self.routing_rules.apply(candidates, criteria);

        let chosen = self
            .balancer
            .select(self.config.load_balancing.strategy, criteria, &candidates)
            .cloned();
        if chosen.is_none() {
            debug!(%criteria, "No service instance matched");
        }
        chosen
    }

    /// Like [`select_service`](Self::select_service) but failing with `NoCandidates`
    pub fn require_service(&self, criteria: &SelectionCriteria) -> MeshResult<ServiceInstance> {
        self.select_service(criteria)
            .ok_or_else(|| MeshError::NoCandidates {
                criteria: criteria.to_string(),
            })
    }

    /// `PUT {endpoint}/config`
    pub async fn update_service_configuration(
        &self,
        service_id: &str,
        configuration: serde_json::Value,
    ) -> MeshResult<AgentResponse> {
        info!(service_id, "Pushing service configuration");
        self.call_service_with_retry(service_id, AgentRequest::put("/config", configuration), None)
            .await
    }

    /// `GET {endpoint}/config`
    pub async fn get_service_configuration(&self, service_id: &str) -> MeshResult<serde_json::Value> {
        let response = self
            .call_service_with_retry(service_id, AgentRequest::get("/config"), None)
            .await?;
        Ok(response.body)
    }

    pub fn service_metrics(&self, service_id: &str) -> Option<ServiceMetrics> {
        self.service_metrics.get(service_id)
    }

    pub fn all_service_metrics(&self) -> BTreeMap<String, ServiceMetrics> {
        self.service_metrics.all()
    }

    /// Add or replace a routing rule
    pub fn add_routing_rule(&self, rule: RoutingRule) -> MeshResult<()> {
        self.routing_rules.add(rule)
    }

    pub fn remove_routing_rule(&self, rule_id: &str) -> bool {
        self.routing_rules.remove(rule_id)
    }

    /// Routing rules in evaluation order
    pub fn routing_rules(&self) -> Vec<RoutingRule> {
        self.routing_rules.rules()
    }

    /// Breaker state, `None` before the first guarded call
    pub fn circuit_state(&self, service_id: &str) -> Option<CircuitState> {
        self.breakers.state(service_id)
    }

    pub fn reset_circuit_breaker(&self, service_id: &str) -> bool {
        self.breakers.reset(service_id)
    }
}
