//! Eureka registry backend (`GET /eureka/apps`, JSON)

use super::{agent_type_from, DiscoveryBackend};
use crate::config::EurekaSection;
use crate::error::{MeshError, MeshResult};
use crate::service::{Endpoint, ServiceInstance, ServiceStatus};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::debug;

const BACKEND: &str = "eureka";

/// Discovery against a Eureka server
#[derive(Debug, Clone)]
pub struct EurekaBackend {
    client: reqwest::Client,
    url: String,
    agent_type_key: String,
    timeout: Duration,
}

/// Eureka serialises single-element lists as bare objects
fn as_list(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

/// Port objects look like `{"$": 8080, "@enabled": "true"}`
fn port_of(value: &Value) -> Option<(u16, bool)> {
    let port = match &value["$"] {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }?;
    let enabled = match &value["@enabled"] {
        Value::Bool(b) => *b,
        Value::String(s) => s == "true",
        _ => false,
    };
    Some((u16::try_from(port).ok()?, enabled))
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value[key].as_str().filter(|s| !s.is_empty())
}

impl EurekaBackend {
    pub fn new(
        client: reqwest::Client,
        config: &EurekaSection,
        agent_type_key: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            agent_type_key: agent_type_key.into(),
            timeout,
        }
    }

    fn to_instance(&self, app_name: &str, raw: &Value) -> Option<ServiceInstance> {
        let metadata: BTreeMap<String, String> = raw["metadata"]
            .as_object()
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        let Some(service_type) = agent_type_from(&metadata, std::iter::empty(), &self.agent_type_key)
        else {
            debug!(app = app_name, "Skipping Eureka instance without agent type");
            return None;
        };

        let host = str_field(raw, "ipAddr").or_else(|| str_field(raw, "hostName"))?;
        let secure = port_of(&raw["securePort"]).filter(|(_, enabled)| *enabled);
        let plain = port_of(&raw["port"]);
        let (port, tls) = match (secure, plain) {
            (Some((port, _)), _) => (port, true),
            (None, Some((port, _))) => (port, false),
            (None, None) => return None,
        };

        let app = str_field(raw, "app").unwrap_or(app_name);
        let id = str_field(raw, "instanceId")
            .map(str::to_string)
            .unwrap_or_else(|| format!("{app}:{host}:{port}"));
        let status = str_field(raw, "status")
            .map(ServiceStatus::parse)
            .unwrap_or_default();
        let version = metadata
            .get("version")
            .cloned()
            .unwrap_or_else(|| "unknown".to_string());

        let mut instance = ServiceInstance::new(
            id,
            app.to_lowercase(),
            service_type,
            Endpoint::http(host, port, tls),
        )
        .with_version(version)
        .with_status(status);
        instance.tags = BTreeSet::new();
        instance.metadata = metadata;
        Some(instance)
    }
}

#[async_trait]
impl DiscoveryBackend for EurekaBackend {
    fn name(&self) -> &'static str {
        BACKEND
    }

    async fn discover(&self) -> MeshResult<Vec<ServiceInstance>> {
        let url = format!("{}/eureka/apps", self.url);
        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| MeshError::discovery(BACKEND, format!("GET /eureka/apps failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(MeshError::discovery(
                BACKEND,
                format!("GET /eureka/apps returned HTTP {}", status.as_u16()),
            ));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| MeshError::discovery(BACKEND, format!("invalid JSON: {e}")))?;

        let mut instances = Vec::new();
        for app in as_list(&body["applications"]["application"]) {
            let app_name = app["name"].as_str().unwrap_or_default();
            for raw in as_list(&app["instance"]) {
                if let Some(instance) = self.to_instance(app_name, raw) {
                    instances.push(instance);
                }
            }
        }

        debug!(count = instances.len(), "Eureka discovery completed");
        Ok(instances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn backend(url: &str) -> EurekaBackend {
        EurekaBackend::new(
            reqwest::Client::new(),
            &EurekaSection {
                url: url.to_string(),
            },
            "agent-type",
            Duration::from_secs(2),
        )
    }

    #[test]
    fn test_port_parsing() {
        assert_eq!(port_of(&json!({"$": 8080, "@enabled": "true"})), Some((8080, true)));
        assert_eq!(port_of(&json!({"$": "443", "@enabled": false})), Some((443, false)));
        assert_eq!(port_of(&json!({"$": 70000})), None);
        assert_eq!(port_of(&Value::Null), None);
    }

    #[tokio::test]
    async fn test_discovers_instances_from_mixed_shapes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/eureka/apps"))
            .and(header("Accept", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "applications": {
                    "application": [
                        {
                            "name": "TRIAGE",
                            "instance": {
                                "instanceId": "triage-a",
                                "app": "TRIAGE",
                                "ipAddr": "10.2.0.1",
                                "status": "UP",
                                "port": {"$": 8080, "@enabled": "true"},
                                "securePort": {"$": 8443, "@enabled": "false"},
                                "metadata": {"agent-type": "triage", "version": "3.0"}
                            }
                        },
                        {
                            "name": "BILLING",
                            "instance": [{
                                "instanceId": "billing-a",
                                "ipAddr": "10.2.0.2",
                                "status": "UP",
                                "port": {"$": 8080, "@enabled": "true"},
                                "metadata": {}
                            }]
                        }
                    ]
                }
            })))
            .mount(&server)
            .await;

        let instances = backend(&server.uri()).discover().await.unwrap();

        assert_eq!(instances.len(), 1);
        let triage = &instances[0];
        assert_eq!(triage.id, "triage-a");
        assert_eq!(triage.name, "triage");
        assert_eq!(triage.status, ServiceStatus::Healthy);
        assert_eq!(triage.version, "3.0");
        assert_eq!(triage.endpoints[0].url, "http://10.2.0.1:8080");
    }

    #[tokio::test]
    async fn test_secure_port_and_status_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/eureka/apps"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "applications": {
                    "application": {
                        "name": "DIAG",
                        "instance": {
                            "hostName": "diag.local",
                            "status": "OUT_OF_SERVICE",
                            "port": {"$": 8080, "@enabled": "false"},
                            "securePort": {"$": 8443, "@enabled": "true"},
                            "metadata": {"agent-type": "diagnosis"}
                        }
                    }
                }
            })))
            .mount(&server)
            .await;

        let instances = backend(&server.uri()).discover().await.unwrap();

        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].id, "DIAG:diag.local:8443");
        assert_eq!(instances[0].status, ServiceStatus::Stopped);
        assert!(instances[0].endpoints[0].tls);
    }

    #[tokio::test]
    async fn test_empty_registry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/eureka/apps"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "applications": {"versions__delta": "1"}
            })))
            .mount(&server)
            .await;

        assert!(backend(&server.uri()).discover().await.unwrap().is_empty());
    }
}
