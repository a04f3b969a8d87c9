//! Copy-on-write service catalog
//!
//! Readers clone an `Arc` of the current map and never observe a partially
//! applied refresh. Writers build a new map and swap it in under the lock.

use crate::service::{ServiceInstance, ServiceStatus};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

type CatalogMap = BTreeMap<String, ServiceInstance>;

/// Ids affected by one catalog refresh, each list sorted
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogDiff {
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub removed: Vec<String>,
}

impl CatalogDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// In-memory catalog of service instances keyed by id
#[derive(Debug, Default)]
pub struct ServiceCatalog {
    services: RwLock<Arc<CatalogMap>>,
}

impl ServiceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn current(&self) -> Arc<CatalogMap> {
        let guard = self
            .services
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }

    /// Immutable view of the whole catalog
    pub fn snapshot(&self) -> Arc<BTreeMap<String, ServiceInstance>> {
        self.current()
    }

    /// Instances in id order
    pub fn instances(&self) -> Vec<ServiceInstance> {
        self.current().values().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<ServiceInstance> {
        self.current().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.current().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.current().len()
    }

    pub fn is_empty(&self) -> bool {
        self.current().is_empty()
    }

    /// Replace the catalog with a discovery result and report the diff.
    ///
    /// For ids already known, a discovered `unknown` status keeps the status
    /// the health checker last wrote, and runtime fields (performance, last
    /// health check, registration time) carry over. Duplicate ids in the
    /// input resolve to the last occurrence.
    pub fn apply(&self, discovered: Vec<ServiceInstance>) -> CatalogDiff {
        let mut guard = self
            .services
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let previous = Arc::clone(&guard);

        let mut next = CatalogMap::new();
        for mut instance in discovered {
            if let Some(old) = previous.get(&instance.id) {
                if instance.status == ServiceStatus::Unknown {
                    instance.status = old.status;
                }
                instance.performance = old.performance.clone();
                instance.last_health_check = old.last_health_check;
                instance.registered_at = old.registered_at;
            }
            next.insert(instance.id.clone(), instance);
        }

        let mut diff = CatalogDiff::default();
        for (id, instance) in &next {
            match previous.get(id) {
                None => diff.added.push(id.clone()),
                Some(old) if old.differs_in_tracked_fields(instance) => {
                    diff.updated.push(id.clone())
                }
                Some(_) => {}
            }
        }
        diff.removed = previous
            .keys()
            .filter(|id| !next.contains_key(*id))
            .cloned()
            .collect();

        *guard = Arc::new(next);
        diff
    }

    /// Copy-on-write update of a single instance; returns false if unknown
    pub fn update<F>(&self, id: &str, change: F) -> bool
    where
        F: FnOnce(&mut ServiceInstance),
    {
        let mut guard = self
            .services
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(existing) = guard.get(id) else {
            return false;
        };
        let mut instance = existing.clone();
        change(&mut instance);

        let mut next = CatalogMap::clone(&guard);
        next.insert(id.to_string(), instance);
        *guard = Arc::new(next);
        true
    }

    /// Record a health-check result as the instance status
    pub fn update_status(&self, id: &str, status: ServiceStatus) -> bool {
        self.update(id, |instance| {
            instance.status = status;
            instance.last_health_check = Some(Utc::now());
        })
    }
}
