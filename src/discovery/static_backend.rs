//! Fixed service list from configuration

use super::DiscoveryBackend;
use crate::config::StaticServiceConfig;
use crate::error::{MeshError, MeshResult};
use crate::service::ServiceInstance;
use async_trait::async_trait;

/// Backend returning the same configured instances on every call
#[derive(Debug, Clone, Default)]
pub struct StaticBackend {
    services: Vec<ServiceInstance>,
}

impl StaticBackend {
    pub fn new(services: Vec<ServiceInstance>) -> Self {
        Self { services }
    }

    pub fn from_config(services: &[StaticServiceConfig]) -> MeshResult<Self> {
        let services = services
            .iter()
            .map(|s| s.to_instance().map_err(MeshError::from))
            .collect::<MeshResult<Vec<_>>>()?;
        Ok(Self::new(services))
    }
}

#[async_trait]
impl DiscoveryBackend for StaticBackend {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn discover(&self) -> MeshResult<Vec<ServiceInstance>> {
        Ok(self.services.clone())
    }

    fn is_dynamic(&self) -> bool {
        false
    }
}
