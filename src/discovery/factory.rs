//! Backend selection from configuration

use super::{ConsulBackend, DiscoveryBackend, EurekaBackend, KubernetesBackend, StaticBackend};
use crate::config::{BackendKind, ConfigError, DiscoverySection};
use crate::error::MeshResult;
use std::sync::Arc;

/// Builds the configured discovery backend
pub struct BackendFactory;

impl BackendFactory {
    pub fn create(
        config: &DiscoverySection,
        client: reqwest::Client,
    ) -> MeshResult<Arc<dyn DiscoveryBackend>> {
        let key = config.agent_type_key.clone();
        let timeout = config.timeout();
        let backend: Arc<dyn DiscoveryBackend> = match config.backend {
            BackendKind::Static => Arc::new(StaticBackend::from_config(&config.static_services)?),
            BackendKind::Consul => {
                let section = config.consul.as_ref().ok_or_else(|| missing("consul"))?;
                Arc::new(ConsulBackend::new(client, section, key, timeout))
            }
            BackendKind::Eureka => {
                let section = config.eureka.as_ref().ok_or_else(|| missing("eureka"))?;
                Arc::new(EurekaBackend::new(client, section, key, timeout))
            }
            BackendKind::Kubernetes => {
                let section = config
                    .kubernetes
                    .as_ref()
                    .ok_or_else(|| missing("kubernetes"))?;
                Arc::new(KubernetesBackend::new(client, section, key, timeout))
            }
        };
        Ok(backend)
    }
}

fn missing(backend: &str) -> ConfigError {
    ConfigError::InvalidConfig(format!(
        "{backend} backend requires [discovery.{backend}] configuration"
    ))
}
