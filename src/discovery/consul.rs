//! Consul catalog backend
//!
//! Lists service names via `/v1/catalog/services`, then fetches each
//! service's instances via `/v1/catalog/service/{name}`.

use super::{agent_type_from, DiscoveryBackend};
use crate::config::ConsulSection;
use crate::error::{MeshError, MeshResult};
use crate::service::{Endpoint, ServiceInstance, ServiceStatus};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;
use tracing::{debug, warn};

const BACKEND: &str = "consul";

/// One entry of `/v1/catalog/service/{name}`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CatalogEntry {
    #[serde(rename = "ServiceID")]
    service_id: String,
    service_name: String,
    #[serde(default)]
    address: String,
    #[serde(default)]
    service_address: String,
    service_port: u16,
    #[serde(default)]
    service_tags: Option<Vec<String>>,
    #[serde(default)]
    service_meta: Option<BTreeMap<String, String>>,
}

/// Discovery against a Consul agent's catalog API
#[derive(Debug, Clone)]
pub struct ConsulBackend {
    client: reqwest::Client,
    address: String,
    datacenter: Option<String>,
    token: Option<String>,
    agent_type_key: String,
    timeout: Duration,
}

impl ConsulBackend {
    pub fn new(
        client: reqwest::Client,
        config: &ConsulSection,
        agent_type_key: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let token = config
            .token_env
            .as_ref()
            .and_then(|name| std::env::var(name).ok());
        Self {
            client,
            address: config.address.trim_end_matches('/').to_string(),
            datacenter: config.datacenter.clone(),
            token,
            agent_type_key: agent_type_key.into(),
            timeout,
        }
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> MeshResult<T> {
        let url = format!("{}{}", self.address, path);
        let mut request = self.client.get(&url).timeout(self.timeout);
        if let Some(dc) = &self.datacenter {
            request = request.query(&[("dc", dc)]);
        }
        if let Some(token) = &self.token {
            request = request.header("X-Consul-Token", token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| MeshError::discovery(BACKEND, format!("GET {path} failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(MeshError::discovery(
                BACKEND,
                format!("GET {path} returned HTTP {}", status.as_u16()),
            ));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| MeshError::discovery(BACKEND, format!("GET {path} returned invalid JSON: {e}")))
    }

    fn to_instance(&self, entry: CatalogEntry) -> Option<ServiceInstance> {
        let tags = entry.service_tags.unwrap_or_default();
        let metadata = entry.service_meta.unwrap_or_default();

        let Some(service_type) = agent_type_from(&metadata, &tags, &self.agent_type_key) else {
            debug!(service_id = %entry.service_id, "Skipping Consul entry without agent type");
            return None;
        };

        let host = if entry.service_address.is_empty() {
            entry.address
        } else {
            entry.service_address
        };
        if host.is_empty() {
            warn!(service_id = %entry.service_id, "Skipping Consul entry without address");
            return None;
        }

        let tls = metadata.get("tls").map(|v| v == "true").unwrap_or(false)
            || tags.iter().any(|t| t == "https");
        let version = metadata
            .get("version")
            .cloned()
            .unwrap_or_else(|| "unknown".to_string());
        let status = metadata
            .get("status")
            .map(|s| ServiceStatus::parse(s))
            .unwrap_or_default();

        let mut instance = ServiceInstance::new(
            entry.service_id,
            entry.service_name,
            service_type,
            Endpoint::http(&host, entry.service_port, tls),
        )
        .with_version(version)
        .with_status(status);
        instance.tags = tags.into_iter().collect::<BTreeSet<_>>();
        instance.metadata = metadata;
        Some(instance)
    }
}

#[async_trait]
impl DiscoveryBackend for ConsulBackend {
    fn name(&self) -> &'static str {
        BACKEND
    }

    async fn discover(&self) -> MeshResult<Vec<ServiceInstance>> {
        let names: HashMap<String, Vec<String>> = self.get("/v1/catalog/services").await?;
        let mut names: Vec<String> = names.into_keys().collect();
        names.sort();

        let mut instances = Vec::new();
        for name in names {
            let entries: Vec<CatalogEntry> =
                self.get(&format!("/v1/catalog/service/{name}")).await?;
            instances.extend(entries.into_iter().filter_map(|e| self.to_instance(e)));
        }

        debug!(count = instances.len(), "Consul discovery completed");
        Ok(instances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn backend(address: &str) -> ConsulBackend {
        ConsulBackend::new(
            reqwest::Client::new(),
            &ConsulSection {
                address: address.to_string(),
                datacenter: None,
                token_env: None,
            },
            "agent-type",
            Duration::from_secs(2),
        )
    }

    #[tokio::test]
    async fn test_discovers_tagged_entries_and_skips_untyped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/catalog/services"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "diagnosis": ["agent-type=diagnosis"],
                "consul": []
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/catalog/service/diagnosis"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {
                    "ServiceID": "diagnosis-1",
                    "ServiceName": "diagnosis",
                    "Address": "10.0.0.1",
                    "ServiceAddress": "10.1.0.1",
                    "ServicePort": 9000,
                    "ServiceTags": ["agent-type=diagnosis"],
                    "ServiceMeta": {"version": "2.1.0"}
                },
                {
                    "ServiceID": "diagnosis-2",
                    "ServiceName": "diagnosis",
                    "Address": "10.0.0.2",
                    "ServiceAddress": "",
                    "ServicePort": 9000,
                    "ServiceTags": [],
                    "ServiceMeta": {"agent-type": "diagnosis", "tls": "true"}
                }
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/catalog/service/consul"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {
                    "ServiceID": "consul",
                    "ServiceName": "consul",
                    "Address": "10.0.0.9",
                    "ServicePort": 8300
                }
            ])))
            .mount(&server)
            .await;

        let instances = backend(&server.uri()).discover().await.unwrap();

        assert_eq!(instances.len(), 2);
        assert_eq!(instances[0].id, "diagnosis-1");
        assert_eq!(instances[0].version, "2.1.0");
        assert_eq!(instances[0].endpoints[0].url, "http://10.1.0.1:9000");
        assert_eq!(instances[1].endpoints[0].url, "https://10.0.0.2:9000");
        assert!(instances.iter().all(|i| i.service_type == "diagnosis"));
    }

    #[tokio::test]
    async fn test_sends_acl_token() {
        std::env::set_var("AGENT_MESH_TEST_CONSUL_TOKEN", "secret-token");
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/catalog/services"))
            .and(header("X-Consul-Token", "secret-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let backend = ConsulBackend::new(
            reqwest::Client::new(),
            &ConsulSection {
                address: server.uri(),
                datacenter: None,
                token_env: Some("AGENT_MESH_TEST_CONSUL_TOKEN".to_string()),
            },
            "agent-type",
            Duration::from_secs(2),
        );

        assert!(backend.discover().await.unwrap().is_empty());
        std::env::remove_var("AGENT_MESH_TEST_CONSUL_TOKEN");
    }

    #[tokio::test]
    async fn test_server_error_is_discovery_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/catalog/services"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let error = backend(&server.uri()).discover().await.unwrap_err();
        assert_eq!(error.code(), "DISCOVERY_ERROR");
        assert!(error.to_string().contains("HTTP 500"));
    }
}
