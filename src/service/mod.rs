//! Service instance data model
//!
//! Describes the backend agent services known to the mesh: identity, lifecycle
//! status, endpoints and the performance/capacity snapshots used for routing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Metadata key carrying the weighted round-robin weight
pub const WEIGHT_METADATA_KEY: &str = "weight";

/// Lifecycle status of a service instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Starting,
    Healthy,
    Degraded,
    Unhealthy,
    Stopping,
    Stopped,
    #[default]
    Unknown,
}

impl ServiceStatus {
    /// Parse a status string reported by a backend or a health endpoint
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "starting" => ServiceStatus::Starting,
            "healthy" | "ok" | "up" | "pass" | "passing" => ServiceStatus::Healthy,
            "degraded" | "warn" | "warning" => ServiceStatus::Degraded,
            "unhealthy" | "down" | "fail" | "critical" | "error" => ServiceStatus::Unhealthy,
            "stopping" => ServiceStatus::Stopping,
            "stopped" | "out_of_service" => ServiceStatus::Stopped,
            _ => ServiceStatus::Unknown,
        }
    }

    /// Whether the instance may receive traffic
    pub fn is_routable(&self, allow_degraded: bool) -> bool {
        match self {
            ServiceStatus::Healthy => true,
            ServiceStatus::Degraded => allow_degraded,
            _ => false,
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceStatus::Starting => "starting",
            ServiceStatus::Healthy => "healthy",
            ServiceStatus::Degraded => "degraded",
            ServiceStatus::Unhealthy => "unhealthy",
            ServiceStatus::Stopping => "stopping",
            ServiceStatus::Stopped => "stopped",
            ServiceStatus::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Four-valued health classification produced by probes and reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    #[default]
    Unknown,
}

impl HealthStatus {
    /// Parse a health endpoint status string into the four-value enum
    pub fn parse(value: &str) -> Self {
        match ServiceStatus::parse(value) {
            ServiceStatus::Healthy => HealthStatus::Healthy,
            ServiceStatus::Degraded => HealthStatus::Degraded,
            ServiceStatus::Unhealthy | ServiceStatus::Stopped | ServiceStatus::Stopping => {
                HealthStatus::Unhealthy
            }
            ServiceStatus::Starting | ServiceStatus::Unknown => HealthStatus::Unknown,
        }
    }
}

impl From<ServiceStatus> for HealthStatus {
    fn from(status: ServiceStatus) -> Self {
        match status {
            ServiceStatus::Healthy => HealthStatus::Healthy,
            ServiceStatus::Degraded => HealthStatus::Degraded,
            ServiceStatus::Unhealthy | ServiceStatus::Stopping | ServiceStatus::Stopped => {
                HealthStatus::Unhealthy
            }
            ServiceStatus::Starting | ServiceStatus::Unknown => HealthStatus::Unknown,
        }
    }
}

impl From<HealthStatus> for ServiceStatus {
    fn from(status: HealthStatus) -> Self {
        match status {
            HealthStatus::Healthy => ServiceStatus::Healthy,
            HealthStatus::Degraded => ServiceStatus::Degraded,
            HealthStatus::Unhealthy => ServiceStatus::Unhealthy,
            HealthStatus::Unknown => ServiceStatus::Unknown,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        ServiceStatus::from(*self).fmt(f)
    }
}

/// Transport used to reach an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Http,
    Grpc,
    Websocket,
}

/// Authentication descriptor attached to an endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthDescriptor {
    /// Bearer token read from the named environment variable
    Bearer { token_env: String },
    /// Static API key header, value read from the named environment variable
    ApiKey { header: String, value_env: String },
}

/// Network endpoint of a service instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Endpoint {
    #[serde(default)]
    pub kind: TransportKind,
    /// Base URL, e.g. `http://10.0.0.5:8080`
    pub url: String,
    pub port: u16,
    #[serde(default)]
    pub tls: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthDescriptor>,
}

impl Endpoint {
    /// Build an HTTP endpoint from scheme/host/port parts
    pub fn http(host: &str, port: u16, tls: bool) -> Self {
        let scheme = if tls { "https" } else { "http" };
        Self {
            kind: TransportKind::Http,
            url: format!("{scheme}://{host}:{port}"),
            port,
            tls,
            auth: None,
        }
    }

    /// Parse an endpoint from a full URL, inferring port and TLS
    pub fn from_url(raw: &str) -> Option<Self> {
        let parsed = url::Url::parse(raw).ok()?;
        let tls = parsed.scheme() == "https";
        let port = parsed.port_or_known_default()?;
        parsed.host_str()?;
        Some(Self {
            kind: TransportKind::Http,
            url: raw.trim_end_matches('/').to_string(),
            port,
            tls,
            auth: None,
        })
    }

    /// Join a path onto the endpoint base URL
    pub fn join(&self, path: &str) -> String {
        let base = self.url.trim_end_matches('/');
        if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        }
    }
}

/// Observed performance of an instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    pub avg_response_time_ms: f64,
    /// Requests per second
    pub throughput: f64,
    /// 0.0-1.0
    pub error_rate: f64,
    /// 0.0-1.0
    pub availability: f64,
    pub last_updated: DateTime<Utc>,
}

impl Default for PerformanceSnapshot {
    fn default() -> Self {
        Self {
            avg_response_time_ms: 0.0,
            throughput: 0.0,
            error_rate: 0.0,
            availability: 1.0,
            last_updated: Utc::now(),
        }
    }
}

/// Capacity and resource usage of an instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacitySnapshot {
    pub max_concurrent_requests: u32,
    /// Current load fraction 0.0-1.0
    pub current_load: f64,
    pub queue_length: u32,
    pub cpu_usage_percent: f64,
    pub memory_usage_percent: f64,
}

impl Default for CapacitySnapshot {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 100,
            current_load: 0.0,
            queue_length: 0,
            cpu_usage_percent: 0.0,
            memory_usage_percent: 0.0,
        }
    }
}

/// A concrete backend agent service known to the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub id: String,
    pub name: String,
    /// Agent/service type, the mandatory discovery tag
    pub service_type: String,
    pub version: String,
    pub status: ServiceStatus,
    pub endpoints: Vec<Endpoint>,
    #[serde(default)]
    pub performance: PerformanceSnapshot,
    #[serde(default)]
    pub capacity: CapacitySnapshot,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub registered_at: DateTime<Utc>,
    #[serde(default)]
    pub last_heartbeat: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_health_check: Option<DateTime<Utc>>,
}

impl ServiceInstance {
    /// Create an instance with one endpoint and default snapshots
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        service_type: impl Into<String>,
        endpoint: Endpoint,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            service_type: service_type.into(),
            version: "unknown".to_string(),
            status: ServiceStatus::Unknown,
            endpoints: vec![endpoint],
            performance: PerformanceSnapshot::default(),
            capacity: CapacitySnapshot::default(),
            tags: BTreeSet::new(),
            metadata: BTreeMap::new(),
            registered_at: Utc::now(),
            last_heartbeat: None,
            last_health_check: None,
        }
    }

    /// Builder: set version
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Builder: set status
    pub fn with_status(mut self, status: ServiceStatus) -> Self {
        self.status = status;
        self
    }

    /// Builder: add a tag
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Builder: set current load fraction
    pub fn with_load(mut self, load: f64) -> Self {
        self.capacity.current_load = load;
        self
    }

    /// Builder: set average response time
    pub fn with_response_time(mut self, avg_response_time_ms: f64) -> Self {
        self.performance.avg_response_time_ms = avg_response_time_ms;
        self
    }

    /// Builder: add a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// First HTTP endpoint, used for calls, probes and configuration
    pub fn primary_endpoint(&self) -> Option<&Endpoint> {
        self.endpoints
            .iter()
            .find(|e| e.kind == TransportKind::Http)
            .or_else(|| self.endpoints.first())
    }

    /// Weight used by weighted round-robin (defaults to 1)
    pub fn weight(&self) -> u32 {
        self.metadata
            .get(WEIGHT_METADATA_KEY)
            .and_then(|w| w.parse::<u32>().ok())
            .filter(|w| *w > 0)
            .unwrap_or(1)
    }

    /// Whether any discovery-tracked field differs (status, version, endpoint set)
    pub fn differs_in_tracked_fields(&self, other: &ServiceInstance) -> bool {
        if self.status != other.status || self.version != other.version {
            return true;
        }
        let mine: BTreeSet<&Endpoint> = self.endpoints.iter().collect();
        let theirs: BTreeSet<&Endpoint> = other.endpoints.iter().collect();
        mine != theirs
    }
}
