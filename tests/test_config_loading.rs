//! Configuration loading and validation tests
//!
//! Tests focus on BEHAVIOR of configuration loading, validation, and error handling.

use agent_mesh::config::{BackendKind, ConfigError, MeshConfig};
use agent_mesh::LoadBalancingStrategy;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "{content}").unwrap();
    temp_file
}

#[test]
fn test_full_config_loads_from_file() {
    let file = write_config(
        r#"
[mesh]
id = "clinic-mesh"
description = "Clinical agents"

[discovery]
backend = "consul"
refresh_interval_secs = 20
timeout_ms = 2500

[discovery.consul]
address = "http://consul.internal:8500"
datacenter = "eu-1"
token_env = "CONSUL_TOKEN"

[health]
interval_secs = 10
probe_timeout_ms = 1500
unhealthy_ratio = 0.3

[circuit_breaker]
failure_threshold = 3
recovery_timeout_ms = 30000

[retry]
max_attempts = 4
retryable_codes = ["NETWORK_ERROR", "HTTP_5XX"]

[load_balancing]
strategy = "least_connections"

[registry]
inactive_agent_timeout_secs = 45

[transport]
request_id_header = "X-Correlation-ID"

[server]
health_port = 8088
"#,
    );

    let config = MeshConfig::load_from_file(file.path()).unwrap();

    assert_eq!(config.mesh.id, "clinic-mesh");
    assert_eq!(config.discovery.backend, BackendKind::Consul);
    assert_eq!(config.discovery.refresh_interval(), Duration::from_secs(20));
    assert_eq!(
        config.discovery.consul.as_ref().unwrap().datacenter.as_deref(),
        Some("eu-1")
    );
    assert_eq!(config.health.probe_timeout(), Duration::from_millis(1500));
    assert_eq!(config.circuit_breaker.to_breaker_config().failure_threshold, 3);
    assert_eq!(config.load_balancing.strategy, LoadBalancingStrategy::LeastConnections);
    assert_eq!(config.registry.inactive_agent_timeout(), Duration::from_secs(45));
    assert_eq!(config.registry.cleanup_interval(), Duration::from_secs(60));
    assert_eq!(config.transport.request_id_header, "X-Correlation-ID");
    assert_eq!(config.server.health_port, Some(8088));

    let policy = config.retry.to_policy();
    assert_eq!(policy.max_attempts, 4);
    assert!(policy.retryable_codes.contains("HTTP_5XX"));
    assert!(!policy.retryable_codes.contains("TIMEOUT_ERROR"));
}

#[test]
fn test_minimal_config_uses_defaults() {
    let file = write_config("[mesh]\nid = \"m1\"\n");
    let config = MeshConfig::load_from_file(file.path()).unwrap();

    assert_eq!(config.discovery.backend, BackendKind::Static);
    assert!(config.discovery.static_services.is_empty());
    assert_eq!(config.health.interval(), Duration::from_secs(15));
    assert_eq!(config.retry.max_attempts, 3);
    assert_eq!(config.transport.request_timeout(), Duration::from_secs(10));
    assert_eq!(config.server.health_port, None);
}

#[test]
fn test_config_round_trips_through_toml() {
    let file = write_config(
        r#"
[mesh]
id = "m1"

[[discovery.static_services]]
id = "diag-1"
service_type = "diagnosis"
url = "https://diag.internal:8443"
tags = ["gpu"]
"#,
    );
    let config = MeshConfig::load_from_file(file.path()).unwrap();

    let rendered = toml::to_string_pretty(&config).unwrap();
    let reparsed = MeshConfig::from_toml_str(&rendered).unwrap();
    assert_eq!(reparsed, config);
}

#[test]
fn test_missing_file_is_read_error() {
    let result = MeshConfig::load_from_file("/definitely/not/here/mesh.toml".as_ref());
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_malformed_toml_is_parse_error() {
    let file = write_config("[mesh\nid = ");
    assert!(matches!(
        MeshConfig::load_from_file(file.path()),
        Err(ConfigError::TomlParse(_))
    ));
}

#[test]
fn test_invalid_values_are_rejected() {
    let cases = [
        ("[mesh]\nid = \"bad id\"\n", "mesh id"),
        ("[mesh]\nid = \"m\"\n[discovery]\nbackend = \"eureka\"\n", "eureka section"),
        ("[mesh]\nid = \"m\"\n[retry]\nmax_attempts = 0\n", "max attempts"),
        ("[mesh]\nid = \"m\"\n[health]\nunhealthy_ratio = 1.5\n", "ratio"),
        (
            "[mesh]\nid = \"m\"\n[discovery]\nrefresh_interval_secs = 2\n[health]\nprobe_timeout_ms = 5000\n",
            "probe timeout",
        ),
        (
            "[mesh]\nid = \"m\"\n[[discovery.static_services]]\nid = \"x\"\nservice_type = \"t\"\nurl = \"not a url\"\n",
            "static url",
        ),
        ("[mesh]\nid = \"m\"\n[health]\ninterval_secs = 0\n", "zero health interval"),
        ("[mesh]\nid = \"m\"\n[health]\nprobe_timeout_ms = 0\n", "zero probe timeout"),
        ("[mesh]\nid = \"m\"\n[transport]\nrequest_timeout_ms = 0\n", "zero request timeout"),
        (
            "[mesh]\nid = \"m\"\n[[load_balancing.rules]]\nrule_id = \"r\"\n[[load_balancing.rules]]\nrule_id = \"r\"\n",
            "duplicate rule id",
        ),
    ];

    for (content, label) in cases {
        let file = write_config(content);
        assert!(
            MeshConfig::load_from_file(file.path()).is_err(),
            "expected rejection for {label}"
        );
    }
}

#[test]
fn test_huge_refresh_interval_is_accepted() {
    let file = write_config("[mesh]\nid = \"m\"\n[discovery]\nrefresh_interval_secs = 9223372036854775807\n");
    let config = MeshConfig::load_from_file(file.path()).unwrap();
    assert_eq!(config.discovery.refresh_interval_secs, i64::MAX as u64);
}
