//! Mesh adapter configuration
//!
//! TOML-backed configuration with defaults for every section except `[mesh]`.
//! Secrets are referenced by environment variable name and resolved at runtime.

use crate::resilience::{CircuitBreakerConfig, RetryPolicy};
use crate::routing::{LoadBalancingStrategy, RoutingRule};
use crate::service::{Endpoint, ServiceInstance, ServiceStatus};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default metadata key / tag prefix naming the agent type
pub const DEFAULT_AGENT_TYPE_KEY: &str = "agent-type";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MeshConfig {
    pub mesh: MeshSection,
    #[serde(default)]
    pub discovery: DiscoverySection,
    #[serde(default)]
    pub health: HealthSection,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub load_balancing: LoadBalancingSection,
    #[serde(default)]
    pub registry: RegistrySection,
    #[serde(default)]
    pub transport: TransportSection,
    #[serde(default)]
    pub server: ServerSection,
}

/// Identity of this adapter instance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MeshSection {
    /// Adapter identifier (must match [a-zA-Z0-9._-]+)
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Discovery backend selection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Static,
    Consul,
    Eureka,
    Kubernetes,
}

/// Discovery section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoverySection {
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    /// Deadline for one discovery fetch
    #[serde(default = "default_discovery_timeout")]
    pub timeout_ms: u64,
    /// Metadata key (or `key=value` tag prefix) carrying the agent type
    #[serde(default = "default_agent_type_key")]
    pub agent_type_key: String,
    pub consul: Option<ConsulSection>,
    pub eureka: Option<EurekaSection>,
    pub kubernetes: Option<KubernetesSection>,
    #[serde(default)]
    pub static_services: Vec<StaticServiceConfig>,
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            backend: BackendKind::Static,
            refresh_interval_secs: default_refresh_interval(),
            timeout_ms: default_discovery_timeout(),
            agent_type_key: default_agent_type_key(),
            consul: None,
            eureka: None,
            kubernetes: None,
            static_services: Vec::new(),
        }
    }
}

impl DiscoverySection {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Consul backend settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsulSection {
    /// Consul HTTP address, e.g. `http://127.0.0.1:8500`
    pub address: String,
    pub datacenter: Option<String>,
    /// Environment variable containing the ACL token
    pub token_env: Option<String>,
}

/// Eureka backend settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EurekaSection {
    /// Eureka server base URL (without `/eureka`)
    pub url: String,
}

/// Kubernetes backend settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KubernetesSection {
    /// API server base URL
    pub api_server: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub label_selector: Option<String>,
    /// Environment variable containing the bearer token
    pub token_env: Option<String>,
}

/// Statically configured service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StaticServiceConfig {
    pub id: String,
    pub name: Option<String>,
    pub service_type: String,
    pub url: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl StaticServiceConfig {
    /// Convert into a catalog instance
    pub fn to_instance(&self) -> Result<ServiceInstance, ConfigError> {
        let endpoint = Endpoint::from_url(&self.url).ok_or_else(|| {
            ConfigError::InvalidConfig(format!(
                "static service '{}' has invalid url '{}'",
                self.id, self.url
            ))
        })?;
        let mut instance = ServiceInstance::new(
            self.id.clone(),
            self.name.clone().unwrap_or_else(|| self.id.clone()),
            self.service_type.clone(),
            endpoint,
        )
        .with_version(self.version.clone())
        .with_status(ServiceStatus::Unknown);
        instance.tags = self.tags.iter().cloned().collect::<BTreeSet<_>>();
        instance.metadata = self.metadata.clone();
        Ok(instance)
    }
}

/// Health checking section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthSection {
    #[serde(default = "default_health_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,
    /// Healthy probes slower than this are classified degraded
    #[serde(default = "default_degraded_latency")]
    pub degraded_latency_ms: u64,
    /// Fraction of unhealthy/unknown instances above which the fleet is unhealthy
    #[serde(default = "default_unhealthy_ratio")]
    pub unhealthy_ratio: f64,
    /// Fleet average response time above which a performance issue is raised
    #[serde(default = "default_slow_fleet")]
    pub slow_fleet_response_ms: u64,
    /// Observed call error rate above which a healthy instance is degraded
    #[serde(default = "default_error_rate_degraded")]
    pub error_rate_degraded: f64,
    /// Observed call error rate above which an instance is unhealthy
    #[serde(default = "default_error_rate_unhealthy")]
    pub error_rate_unhealthy: f64,
    /// Calls needed before the error rate affects health
    #[serde(default = "default_error_rate_min_requests")]
    pub error_rate_min_requests: u64,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            interval_secs: default_health_interval(),
            probe_timeout_ms: default_probe_timeout(),
            degraded_latency_ms: default_degraded_latency(),
            unhealthy_ratio: default_unhealthy_ratio(),
            slow_fleet_response_ms: default_slow_fleet(),
            error_rate_degraded: default_error_rate_degraded(),
            error_rate_unhealthy: default_error_rate_unhealthy(),
            error_rate_min_requests: default_error_rate_min_requests(),
        }
    }
}

impl HealthSection {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Circuit breaker section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CircuitBreakerSection {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_recovery_timeout")]
    pub recovery_timeout_ms: u64,
    #[serde(default = "default_minimum_requests")]
    pub minimum_requests: u32,
}

impl Default for CircuitBreakerSection {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_ms: default_recovery_timeout(),
            minimum_requests: default_minimum_requests(),
        }
    }
}

impl CircuitBreakerSection {
    pub fn to_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            recovery_timeout: Duration::from_millis(self.recovery_timeout_ms),
            minimum_requests: self.minimum_requests,
        }
    }
}

/// Retry section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrySection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_jitter")]
    pub jitter: bool,
    /// Retry classes eligible for another attempt; defaults to the transient set
    pub retryable_codes: Option<Vec<String>>,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: default_jitter(),
            retryable_codes: None,
        }
    }
}

impl RetrySection {
    pub fn to_policy(&self) -> RetryPolicy {
        let mut policy = RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff_multiplier: self.backoff_multiplier,
            jitter: self.jitter,
            ..RetryPolicy::default()
        };
        if let Some(codes) = &self.retryable_codes {
            policy.retryable_codes = codes.iter().cloned().collect();
        }
        policy
    }
}

/// Load balancing section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct LoadBalancingSection {
    #[serde(default)]
    pub strategy: LoadBalancingStrategy,
    /// Initial routing rules, `[[load_balancing.rules]]`
    #[serde(default)]
    pub rules: Vec<RoutingRule>,
}

/// Agent registry section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegistrySection {
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_inactive_timeout")]
    pub inactive_agent_timeout_secs: u64,
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

impl Default for RegistrySection {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_interval(),
            inactive_agent_timeout_secs: default_inactive_timeout(),
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

impl RegistrySection {
    pub fn inactive_agent_timeout(&self) -> Duration {
        Duration::from_secs(self.inactive_agent_timeout_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

/// Outbound call transport section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransportSection {
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_request_id_header")]
    pub request_id_header: String,
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout(),
            request_id_header: default_request_id_header(),
        }
    }
}

impl TransportSection {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Health endpoint server section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ServerSection {
    pub health_port: Option<u16>,
}

fn default_refresh_interval() -> u64 {
    30
}

fn default_discovery_timeout() -> u64 {
    5000
}

fn default_agent_type_key() -> String {
    DEFAULT_AGENT_TYPE_KEY.to_string()
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_version() -> String {
    "unknown".to_string()
}

fn default_health_interval() -> u64 {
    15
}

fn default_probe_timeout() -> u64 {
    3000
}

fn default_degraded_latency() -> u64 {
    1000
}

fn default_unhealthy_ratio() -> f64 {
    0.5
}

fn default_slow_fleet() -> u64 {
    2000
}

fn default_error_rate_degraded() -> f64 {
    0.2
}

fn default_error_rate_unhealthy() -> f64 {
    0.5
}

fn default_error_rate_min_requests() -> u64 {
    10
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_recovery_timeout() -> u64 {
    60_000
}

fn default_minimum_requests() -> u32 {
    3
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> u64 {
    100
}

fn default_max_delay() -> u64 {
    5000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> bool {
    true
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_inactive_timeout() -> u64 {
    90
}

fn default_cleanup_interval() -> u64 {
    60
}

fn default_request_timeout() -> u64 {
    10_000
}

fn default_request_id_header() -> String {
    "X-Request-ID".to_string()
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid mesh ID format: {0}")]
    InvalidMeshId(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl MeshConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text and validate it
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: MeshConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_mesh_id(&self.mesh.id)?;

        match self.discovery.backend {
            BackendKind::Consul if self.discovery.consul.is_none() => {
                return Err(ConfigError::InvalidConfig(
                    "consul backend requires [discovery.consul] configuration".to_string(),
                ));
            }
            BackendKind::Eureka if self.discovery.eureka.is_none() => {
                return Err(ConfigError::InvalidConfig(
                    "eureka backend requires [discovery.eureka] configuration".to_string(),
                ));
            }
            BackendKind::Kubernetes if self.discovery.kubernetes.is_none() => {
                return Err(ConfigError::InvalidConfig(
                    "kubernetes backend requires [discovery.kubernetes] configuration".to_string(),
                ));
            }
            _ => {}
        }

        for (name, value) in [
            ("discovery.refresh_interval_secs", self.discovery.refresh_interval_secs),
            ("discovery.timeout_ms", self.discovery.timeout_ms),
            ("health.interval_secs", self.health.interval_secs),
            ("health.probe_timeout_ms", self.health.probe_timeout_ms),
            ("transport.request_timeout_ms", self.transport.request_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidConfig(format!(
                    "{name} must be greater than 0"
                )));
            }
        }

        if self.health.probe_timeout_ms >= self.discovery.refresh_interval_secs.saturating_mul(1000) {
            return Err(ConfigError::InvalidConfig(format!(
                "health.probe_timeout_ms ({}) must be shorter than the discovery refresh interval ({}s)",
                self.health.probe_timeout_ms, self.discovery.refresh_interval_secs
            )));
        }

        if !(self.health.unhealthy_ratio > 0.0 && self.health.unhealthy_ratio <= 1.0) {
            return Err(ConfigError::InvalidConfig(
                "health.unhealthy_ratio must be in (0, 1]".to_string(),
            ));
        }

        let degraded = self.health.error_rate_degraded;
        let unhealthy = self.health.error_rate_unhealthy;
        if !(0.0..=1.0).contains(&degraded) || !(0.0..=1.0).contains(&unhealthy) || degraded > unhealthy {
            return Err(ConfigError::InvalidConfig(
                "health error rates must be in [0, 1] with error_rate_degraded <= error_rate_unhealthy"
                    .to_string(),
            ));
        }

        if self.circuit_breaker.failure_threshold == 0 || self.circuit_breaker.minimum_requests == 0
        {
            return Err(ConfigError::InvalidConfig(
                "circuit_breaker thresholds must be greater than 0".to_string(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidConfig(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }

        if self.retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::InvalidConfig(
                "retry.backoff_multiplier must be >= 1.0".to_string(),
            ));
        }

        if self.registry.inactive_agent_timeout_secs == 0 || self.registry.cleanup_interval_secs == 0
        {
            return Err(ConfigError::InvalidConfig(
                "registry timeouts must be greater than 0".to_string(),
            ));
        }

        for service in &self.discovery.static_services {
            service.to_instance()?;
        }

        let mut rule_ids = BTreeSet::new();
        for rule in &self.load_balancing.rules {
            rule.validate()
                .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;
            if !rule_ids.insert(rule.rule_id.as_str()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "duplicate routing rule id '{}'",
                    rule.rule_id
                )));
            }
        }

        Ok(())
    }

    /// Helper method to get an optional environment variable
    pub fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
        env_var_name.and_then(|name| std::env::var(name).ok())
    }

    /// Helper method to get a required environment variable
    pub fn get_env_var_required(env_var_name: &str) -> Result<String, ConfigError> {
        std::env::var(env_var_name)
            .map_err(|_| ConfigError::EnvVarNotFound(env_var_name.to_string()))
    }

    /// Minimal static configuration for unit tests
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[mesh]
id = "test-mesh"

[discovery]
backend = "static"

[[discovery.static_services]]
id = "diagnosis-1"
service_type = "diagnosis"
url = "http://127.0.0.1:9001"
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

/// Validate mesh ID format
fn validate_mesh_id(mesh_id: &str) -> Result<(), ConfigError> {
    let valid_chars = mesh_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');

    if mesh_id.is_empty() || !valid_chars {
        return Err(ConfigError::InvalidMeshId(mesh_id.to_string()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::RuleCondition;

    #[test]
    fn test_config_defaults() {
        let config = MeshConfig::test_config();

        assert_eq!(config.mesh.id, "test-mesh");
        assert_eq!(config.discovery.backend, BackendKind::Static);
        assert_eq!(config.discovery.refresh_interval_secs, 30);
        assert_eq!(config.discovery.agent_type_key, "agent-type");
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.initial_delay_ms, 100);
        assert_eq!(config.registry.inactive_agent_timeout_secs, 90);
        assert_eq!(config.transport.request_id_header, "X-Request-ID");
        assert_eq!(config.load_balancing.strategy, LoadBalancingStrategy::RoundRobin);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_static_service_conversion() {
        let config = MeshConfig::test_config();
        let instance = config.discovery.static_services[0].to_instance().unwrap();

        assert_eq!(instance.id, "diagnosis-1");
        assert_eq!(instance.name, "diagnosis-1");
        assert_eq!(instance.service_type, "diagnosis");
        assert_eq!(instance.endpoints[0].port, 9001);
    }

    #[test]
    fn test_invalid_mesh_id_rejected() {
        assert!(validate_mesh_id("mesh one").is_err());
        assert!(validate_mesh_id("").is_err());
        assert!(validate_mesh_id("mesh/1").is_err());
        assert!(validate_mesh_id("mesh-1.prod_a").is_ok());
    }

    #[test]
    fn test_remote_backend_requires_section() {
        let mut config = MeshConfig::test_config();
        config.discovery.backend = BackendKind::Consul;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig(msg)) if msg.contains("consul")
        ));

        config.discovery.consul = Some(ConsulSection {
            address: "http://127.0.0.1:8500".to_string(),
            datacenter: None,
            token_env: None,
        });
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_probe_timeout_must_be_shorter_than_refresh() {
        let mut config = MeshConfig::test_config();
        config.discovery.refresh_interval_secs = 2;
        config.health.probe_timeout_ms = 2000;
        assert!(config.validate().is_err());

        config.health.probe_timeout_ms = 1999;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_intervals_and_timeouts_rejected() {
        let zeroed: [fn(&mut MeshConfig); 5] = [
            |c| c.discovery.refresh_interval_secs = 0,
            |c| c.discovery.timeout_ms = 0,
            |c| c.health.interval_secs = 0,
            |c| c.health.probe_timeout_ms = 0,
            |c| c.transport.request_timeout_ms = 0,
        ];
        for zero in zeroed {
            let mut config = MeshConfig::test_config();
            zero(&mut config);
            assert!(matches!(
                config.validate(),
                Err(ConfigError::InvalidConfig(msg)) if msg.contains("greater than 0")
            ));
        }
    }

    #[test]
    fn test_huge_refresh_interval_does_not_overflow() {
        let mut config = MeshConfig::test_config();
        config.discovery.refresh_interval_secs = u64::MAX;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_error_rate_thresholds_validated() {
        let mut config = MeshConfig::test_config();
        assert_eq!(config.health.error_rate_degraded, 0.2);
        assert_eq!(config.health.error_rate_unhealthy, 0.5);

        config.health.error_rate_degraded = 0.6;
        assert!(config.validate().is_err());

        config.health.error_rate_degraded = 0.1;
        config.health.error_rate_unhealthy = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_routing_rules_parse_and_validate() {
        let config = MeshConfig::from_toml_str(
            r#"
[mesh]
id = "rules"

[load_balancing]
strategy = "consistent_hash"

[[load_balancing.rules]]
rule_id = "night-shift"
service_type = "diagnosis"
target_services = ["diagnosis-2"]
priority = 5
conditions = [{ kind = "hour_range", start = 0, end = 6 }]
"#,
        )
        .unwrap();

        assert_eq!(config.load_balancing.strategy, LoadBalancingStrategy::ConsistentHash);
        let rule = &config.load_balancing.rules[0];
        assert_eq!(rule.target_services, vec!["diagnosis-2"]);
        assert!(rule.enabled);

        let mut duplicated = config.clone();
        duplicated.load_balancing.rules.push(rule.clone());
        assert!(duplicated.validate().is_err());

        let mut bad_hours = config;
        bad_hours.load_balancing.rules[0].conditions = vec![RuleCondition::HourRange { start: 9, end: 30 }];
        assert!(bad_hours.validate().is_err());
    }

    #[test]
    fn test_retry_section_to_policy() {
        let section = RetrySection {
            retryable_codes: Some(vec!["NETWORK_ERROR".to_string()]),
            ..RetrySection::default()
        };
        let policy = section.to_policy();

        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_delay, Duration::from_millis(100));
        assert_eq!(policy.retryable_codes.len(), 1);
        assert!(policy.retryable_codes.contains("NETWORK_ERROR"));
    }

    #[test]
    fn test_env_var_required_missing() {
        let result = MeshConfig::get_env_var_required("AGENT_MESH_SURELY_UNSET_VARIABLE");
        assert!(matches!(result, Err(ConfigError::EnvVarNotFound(_))));
    }
}
