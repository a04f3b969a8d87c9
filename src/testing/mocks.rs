//! Mock implementations for testing
//!
//! Provides mock transport, discovery backend and health probe
//! implementations so the mesh can be exercised without live services.

use crate::discovery::DiscoveryBackend;
use crate::error::{MeshError, MeshResult};
use crate::health::{HealthProbe, ProbeOutcome};
use crate::service::{Endpoint, HealthStatus, ServiceInstance, ServiceStatus};
use crate::transport::{ServiceTransport, TransportRequest, TransportResponse};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

enum ScriptedReply {
    Response(TransportResponse),
    Error(MeshError),
}

/// Mock transport that counts calls and replays scripted replies.
///
/// Once the script runs out every call answers `200 {}`.
#[derive(Default)]
pub struct MockTransport {
    calls: AtomicUsize,
    replies: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<TransportRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a JSON response
    pub fn push_json(&self, status: u16, body: Value) {
        self.push_response(status, body.to_string());
    }

    /// Queue a response with an empty body
    pub fn push_status(&self, status: u16) {
        self.push_response(status, String::new());
    }

    pub fn push_response(&self, status: u16, body: impl Into<String>) {
        lock(&self.replies).push_back(ScriptedReply::Response(response(status, body.into())));
    }

    /// Queue a transport-level failure
    pub fn push_error(&self, error: MeshError) {
        lock(&self.replies).push_back(ScriptedReply::Error(error));
    }

    /// Number of `send` calls made so far
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests in the order they were sent
    pub fn requests(&self) -> Vec<TransportRequest> {
        lock(&self.requests).clone()
    }

    pub fn clear_history(&self) {
        lock(&self.requests).clear();
        self.calls.store(0, Ordering::SeqCst);
    }
}

fn response(status: u16, body: String) -> TransportResponse {
    TransportResponse {
        status,
        headers: BTreeMap::new(),
        body,
        elapsed: Duration::from_millis(1),
    }
}

#[async_trait]
impl ServiceTransport for MockTransport {
    async fn send(&self, request: TransportRequest) -> MeshResult<TransportResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.requests).push(request);

        let reply = lock(&self.replies).pop_front();
        match reply {
            Some(ScriptedReply::Response(response)) => Ok(response),
            Some(ScriptedReply::Error(error)) => Err(error),
            None => Ok(response(200, "{}".to_string())),
        }
    }
}

/// Mock discovery backend with a swappable result
pub struct MockDiscoveryBackend {
    services: Mutex<Vec<ServiceInstance>>,
    failure: Mutex<Option<String>>,
    delay: Mutex<Duration>,
    calls: AtomicUsize,
}

impl MockDiscoveryBackend {
    pub fn new(services: Vec<ServiceInstance>) -> Self {
        Self {
            services: Mutex::new(services),
            failure: Mutex::new(None),
            delay: Mutex::new(Duration::ZERO),
            calls: AtomicUsize::new(0),
        }
    }

    /// Sleep this long inside every `discover`
    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = delay;
    }

    /// Replace the service list and clear any scripted failure
    pub fn set_services(&self, services: Vec<ServiceInstance>) {
        *lock(&self.services) = services;
        *lock(&self.failure) = None;
    }

    /// Make every subsequent `discover` fail
    pub fn fail_with(&self, message: impl Into<String>) {
        *lock(&self.failure) = Some(message.into());
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DiscoveryBackend for MockDiscoveryBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn discover(&self) -> MeshResult<Vec<ServiceInstance>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *lock(&self.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = lock(&self.failure).clone() {
            return Err(MeshError::discovery("mock", message));
        }
        Ok(lock(&self.services).clone())
    }
}

/// Mock health probe with per-instance statuses and delays.
///
/// Instances without a scripted status are healthy.
#[derive(Default)]
pub struct MockHealthProbe {
    statuses: Mutex<HashMap<String, HealthStatus>>,
    delays: Mutex<HashMap<String, Duration>>,
    probes: AtomicUsize,
}

impl MockHealthProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_status(&self, service_id: impl Into<String>, status: HealthStatus) {
        lock(&self.statuses).insert(service_id.into(), status);
    }

    pub fn set_delay(&self, service_id: impl Into<String>, delay: Duration) {
        lock(&self.delays).insert(service_id.into(), delay);
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthProbe for MockHealthProbe {
    async fn probe(&self, instance: &ServiceInstance) -> ProbeOutcome {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let delay = lock(&self.delays).get(&instance.id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let status = lock(&self.statuses)
            .get(&instance.id)
            .copied()
            .unwrap_or(HealthStatus::Healthy);
        ProbeOutcome::new(&instance.id, status).with_response_time(delay.unwrap_or_default())
    }
}

/// Healthy HTTP instance on localhost
pub fn healthy_instance(id: &str, service_type: &str, port: u16) -> ServiceInstance {
    ServiceInstance::new(id, id, service_type, Endpoint::http("127.0.0.1", port, false))
        .with_status(ServiceStatus::Healthy)
}

/// Healthy instance pointing at an arbitrary base URL, e.g. a wiremock server
pub fn instance_at(id: &str, service_type: &str, url: &str) -> MeshResult<ServiceInstance> {
    let endpoint = Endpoint::from_url(url)
        .ok_or_else(|| MeshError::validation("url", format!("'{url}' is not a valid endpoint URL")))?;
    Ok(ServiceInstance::new(id, id, service_type, endpoint).with_status(ServiceStatus::Healthy))
}
