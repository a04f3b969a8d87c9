//! Service discovery
//!
//! Backends produce a fresh list of instances; the [`ServiceCatalog`] diffs
//! it against what it holds and [`DiscoveryService`] drives the refresh loop
//! and publishes the resulting events.

use crate::error::MeshResult;
use crate::service::ServiceInstance;
use async_trait::async_trait;
use std::collections::BTreeMap;

pub mod catalog;
pub mod consul;
pub mod eureka;
pub mod factory;
pub mod kubernetes;
pub mod service;
pub mod static_backend;

pub use catalog::{CatalogDiff, ServiceCatalog};
pub use consul::ConsulBackend;
pub use eureka::EurekaBackend;
pub use factory::BackendFactory;
pub use kubernetes::KubernetesBackend;
pub use service::DiscoveryService;
pub use static_backend::StaticBackend;

/// Source of truth for which services exist and where
#[async_trait]
pub trait DiscoveryBackend: Send + Sync {
    /// Short backend name used in logs and events
    fn name(&self) -> &'static str;

    /// Fetch the current service list.
    ///
    /// Must not touch the catalog. Entries without an agent type are skipped.
    async fn discover(&self) -> MeshResult<Vec<ServiceInstance>>;

    /// Whether the result can change between calls
    fn is_dynamic(&self) -> bool {
        true
    }
}

/// Agent type from a metadata map, falling back to a `key=value` tag
pub(crate) fn agent_type_from<'a>(
    metadata: &BTreeMap<String, String>,
    tags: impl IntoIterator<Item = &'a String>,
    key: &str,
) -> Option<String> {
    if let Some(value) = metadata.get(key) {
        let value = value.trim();
        if !value.is_empty() {
            return Some(value.to_string());
        }
    }
    let prefix = format!("{key}=");
    tags.into_iter()
        .filter_map(|tag| tag.strip_prefix(&prefix))
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_type_prefers_metadata() {
        let mut metadata = BTreeMap::new();
        metadata.insert("agent-type".to_string(), "diagnosis".to_string());
        let tags = vec!["agent-type=triage".to_string()];

        assert_eq!(
            agent_type_from(&metadata, &tags, "agent-type").as_deref(),
            Some("diagnosis")
        );
    }

    #[test]
    fn test_agent_type_from_tag() {
        let tags = vec!["web".to_string(), "agent-type=triage".to_string()];
        assert_eq!(
            agent_type_from(&BTreeMap::new(), &tags, "agent-type").as_deref(),
            Some("triage")
        );
    }

    #[test]
    fn test_blank_agent_type_is_missing() {
        let mut metadata = BTreeMap::new();
        metadata.insert("agent-type".to_string(), "  ".to_string());
        let tags = vec!["agent-type=".to_string()];

        assert_eq!(agent_type_from(&metadata, &tags, "agent-type"), None);
    }
}
