//! Kubernetes Service backend
//!
//! Lists `Service` objects in one namespace through the core API and turns
//! each port into an endpoint on the cluster DNS name.

use super::{agent_type_from, DiscoveryBackend};
use crate::config::KubernetesSection;
use crate::error::{MeshError, MeshResult};
use crate::service::{Endpoint, ServiceInstance, ServiceStatus};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

const BACKEND: &str = "kubernetes";

#[derive(Debug, Deserialize)]
struct ServiceList {
    #[serde(default)]
    items: Vec<KubeService>,
}

#[derive(Debug, Deserialize)]
struct KubeService {
    metadata: ObjectMeta,
    #[serde(default)]
    spec: ServiceSpec,
}

#[derive(Debug, Deserialize)]
struct ObjectMeta {
    name: String,
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    labels: BTreeMap<String, String>,
    #[serde(default)]
    annotations: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServiceSpec {
    #[serde(default)]
    ports: Vec<ServicePort>,
}

#[derive(Debug, Deserialize)]
struct ServicePort {
    #[serde(default)]
    name: Option<String>,
    port: u16,
}

/// Discovery against the Kubernetes API server
#[derive(Debug, Clone)]
pub struct KubernetesBackend {
    client: reqwest::Client,
    api_server: String,
    namespace: String,
    label_selector: Option<String>,
    token: Option<String>,
    agent_type_key: String,
    timeout: Duration,
}

impl KubernetesBackend {
    pub fn new(
        client: reqwest::Client,
        config: &KubernetesSection,
        agent_type_key: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let token = config
            .token_env
            .as_ref()
            .and_then(|name| std::env::var(name).ok());
        Self {
            client,
            api_server: config.api_server.trim_end_matches('/').to_string(),
            namespace: config.namespace.clone(),
            label_selector: config.label_selector.clone(),
            token,
            agent_type_key: agent_type_key.into(),
            timeout,
        }
    }

    fn to_instance(&self, service: KubeService) -> Option<ServiceInstance> {
        let meta = service.metadata;
        let mut metadata = meta.annotations;
        metadata.extend(meta.labels);

        let Some(service_type) = agent_type_from(&metadata, std::iter::empty(), &self.agent_type_key)
        else {
            debug!(service = %meta.name, "Skipping Kubernetes service without agent type");
            return None;
        };

        let namespace = meta.namespace.unwrap_or_else(|| self.namespace.clone());
        let host = format!("{}.{}.svc.cluster.local", meta.name, namespace);
        let endpoints: Vec<Endpoint> = service
            .spec
            .ports
            .iter()
            .map(|p| {
                let tls = p.name.as_deref() == Some("https") || p.port == 443;
                Endpoint::http(&host, p.port, tls)
            })
            .collect();
        if endpoints.is_empty() {
            debug!(service = %meta.name, "Skipping Kubernetes service without ports");
            return None;
        }

        let version = metadata
            .get("app.kubernetes.io/version")
            .or_else(|| metadata.get("version"))
            .cloned()
            .unwrap_or_else(|| "unknown".to_string());

        let mut instance = ServiceInstance::new(
            format!("{}.{}", meta.name, namespace),
            meta.name,
            service_type,
            endpoints[0].clone(),
        )
        .with_version(version)
        .with_status(ServiceStatus::Unknown);
        instance.endpoints = endpoints;
        instance.metadata = metadata;
        Some(instance)
    }
}

#[async_trait]
impl DiscoveryBackend for KubernetesBackend {
    fn name(&self) -> &'static str {
        BACKEND
    }

    async fn discover(&self) -> MeshResult<Vec<ServiceInstance>> {
        let url = format!(
            "{}/api/v1/namespaces/{}/services",
            self.api_server, self.namespace
        );
        let mut request = self.client.get(&url).timeout(self.timeout);
        if let Some(selector) = &self.label_selector {
            request = request.query(&[("labelSelector", selector)]);
        }
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| MeshError::discovery(BACKEND, format!("service list failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(MeshError::discovery(
                BACKEND,
                format!("service list returned HTTP {}", status.as_u16()),
            ));
        }
        let list: ServiceList = response
            .json()
            .await
            .map_err(|e| MeshError::discovery(BACKEND, format!("invalid service list: {e}")))?;

        let instances: Vec<ServiceInstance> = list
            .items
            .into_iter()
            .filter_map(|s| self.to_instance(s))
            .collect();
        debug!(count = instances.len(), namespace = %self.namespace, "Kubernetes discovery completed");
        Ok(instances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_lists_services_with_selector_and_token() {
        std::env::set_var("AGENT_MESH_TEST_KUBE_TOKEN", "kube-token");
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/agents/services"))
            .and(query_param("labelSelector", "mesh=enabled"))
            .and(header("Authorization", "Bearer kube-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "kind": "ServiceList",
                "items": [
                    {
                        "metadata": {
                            "name": "diagnosis",
                            "namespace": "agents",
                            "labels": {"agent-type": "diagnosis", "app.kubernetes.io/version": "1.4"}
                        },
                        "spec": {"ports": [
                            {"name": "https", "port": 8443},
                            {"name": "metrics", "port": 9090}
                        ]}
                    },
                    {
                        "metadata": {
                            "name": "triage",
                            "annotations": {"agent-type": "triage"}
                        },
                        "spec": {"ports": [{"port": 8080}]}
                    },
                    {
                        "metadata": {"name": "kube-dns"},
                        "spec": {"ports": [{"port": 53}]}
                    }
                ]
            })))
            .mount(&server)
            .await;

        let backend = KubernetesBackend::new(
            reqwest::Client::new(),
            &KubernetesSection {
                api_server: server.uri(),
                namespace: "agents".to_string(),
                label_selector: Some("mesh=enabled".to_string()),
                token_env: Some("AGENT_MESH_TEST_KUBE_TOKEN".to_string()),
            },
            "agent-type",
            Duration::from_secs(2),
        );

        let instances = backend.discover().await.unwrap();
        std::env::remove_var("AGENT_MESH_TEST_KUBE_TOKEN");

        assert_eq!(instances.len(), 2);
        let diagnosis = &instances[0];
        assert_eq!(diagnosis.id, "diagnosis.agents");
        assert_eq!(diagnosis.version, "1.4");
        assert_eq!(diagnosis.endpoints.len(), 2);
        assert_eq!(
            diagnosis.endpoints[0].url,
            "https://diagnosis.agents.svc.cluster.local:8443"
        );
        assert_eq!(instances[1].service_type, "triage");
        assert_eq!(instances[1].id, "triage.agents");
    }

    #[tokio::test]
    async fn test_forbidden_is_discovery_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let backend = KubernetesBackend::new(
            reqwest::Client::new(),
            &KubernetesSection {
                api_server: server.uri(),
                namespace: "default".to_string(),
                label_selector: None,
                token_env: None,
            },
            "agent-type",
            Duration::from_secs(2),
        );

        let error = backend.discover().await.unwrap_err();
        assert!(error.to_string().contains("HTTP 403"));
    }
}
