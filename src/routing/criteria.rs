//! Candidate filtering shared by service and agent selection

use crate::service::{ServiceInstance, ServiceStatus};
use std::collections::BTreeSet;
use std::fmt;

/// Metadata key listing comma-separated capabilities of a service instance
pub const CAPABILITIES_METADATA_KEY: &str = "capabilities";

/// Anything the load balancer can choose between
pub trait MeshMember {
    fn member_id(&self) -> &str;
    fn member_type(&self) -> &str;
    fn member_status(&self) -> ServiceStatus;
    fn member_tags(&self) -> &BTreeSet<String>;
    fn has_capability(&self, capability: &str) -> bool;
    /// Current load fraction 0.0-1.0
    fn load(&self) -> f64;
    fn avg_response_time_ms(&self) -> f64;
    fn weight(&self) -> u32 {
        1
    }
    /// Fraction of calls that succeed, 0.0-1.0
    fn success_rate(&self) -> f64 {
        1.0
    }
}

impl<T: MeshMember + ?Sized> MeshMember for &T {
    fn member_id(&self) -> &str {
        (**self).member_id()
    }
    fn member_type(&self) -> &str {
        (**self).member_type()
    }
    fn member_status(&self) -> ServiceStatus {
        (**self).member_status()
    }
    fn member_tags(&self) -> &BTreeSet<String> {
        (**self).member_tags()
    }
    fn has_capability(&self, capability: &str) -> bool {
        (**self).has_capability(capability)
    }
    fn load(&self) -> f64 {
        (**self).load()
    }
    fn avg_response_time_ms(&self) -> f64 {
        (**self).avg_response_time_ms()
    }
    fn weight(&self) -> u32 {
        (**self).weight()
    }
    fn success_rate(&self) -> f64 {
        (**self).success_rate()
    }
}

impl MeshMember for ServiceInstance {
    fn member_id(&self) -> &str {
        &self.id
    }

    fn member_type(&self) -> &str {
        &self.service_type
    }

    fn member_status(&self) -> ServiceStatus {
        self.status
    }

    fn member_tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    fn has_capability(&self, capability: &str) -> bool {
        let wanted = capability.to_lowercase();
        self.tags.iter().any(|t| t.to_lowercase() == wanted)
            || self
                .metadata
                .get(CAPABILITIES_METADATA_KEY)
                .map(|list| list.split(',').any(|c| c.trim().to_lowercase() == wanted))
                .unwrap_or(false)
    }

    fn load(&self) -> f64 {
        self.capacity.current_load
    }

    fn avg_response_time_ms(&self) -> f64 {
        self.performance.avg_response_time_ms
    }

    fn weight(&self) -> u32 {
        ServiceInstance::weight(self)
    }

    fn success_rate(&self) -> f64 {
        (1.0 - self.performance.error_rate).clamp(0.0, 1.0)
    }
}

/// Filter applied before load balancing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionCriteria {
    pub service_type: Option<String>,
    pub required_tags: BTreeSet<String>,
    pub capabilities: Vec<String>,
    /// Upper bound (inclusive) on current load
    pub max_load: Option<f64>,
    pub exclude_ids: BTreeSet<String>,
    pub allow_degraded: bool,
    /// Round-robin counter key; defaults to the service type
    pub consumer_key: Option<String>,
    /// Capabilities that raise a candidate's score without being required
    pub preferred_capabilities: Vec<String>,
    /// Calling service, matched by routing rule source patterns
    pub source_service: Option<String>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub request_id: Option<String>,
}

impl SelectionCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_type(service_type: impl Into<String>) -> Self {
        Self {
            service_type: Some(service_type.into()),
            ..Self::default()
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.required_tags.insert(tag.into());
        self
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.push(capability.into());
        self
    }

    pub fn with_max_load(mut self, max_load: f64) -> Self {
        self.max_load = Some(max_load);
        self
    }

    pub fn excluding(mut self, id: impl Into<String>) -> Self {
        self.exclude_ids.insert(id.into());
        self
    }

    pub fn allowing_degraded(mut self) -> Self {
        self.allow_degraded = true;
        self
    }

    pub fn with_consumer_key(mut self, key: impl Into<String>) -> Self {
        self.consumer_key = Some(key.into());
        self
    }

    pub fn preferring_capability(mut self, capability: impl Into<String>) -> Self {
        self.preferred_capabilities.push(capability.into());
        self
    }

    pub fn from_source(mut self, source_service: impl Into<String>) -> Self {
        self.source_service = Some(source_service.into());
        self
    }

    pub fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn in_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Key for consistent hashing: user, then session, then request id
    pub fn affinity_key(&self) -> &str {
        self.user_id
            .as_deref()
            .or(self.session_id.as_deref())
            .or(self.request_id.as_deref())
            .unwrap_or_else(|| self.balancing_key())
    }

    /// Share of preferred capabilities `member` offers; 1.0 when none are preferred
    pub fn capability_coverage<T: MeshMember + ?Sized>(&self, member: &T) -> f64 {
        if self.preferred_capabilities.is_empty() {
            return 1.0;
        }
        let offered = self
            .preferred_capabilities
            .iter()
            .filter(|c| member.has_capability(c))
            .count();
        offered as f64 / self.preferred_capabilities.len() as f64
    }

    /// Counter key used by round-robin policies
    pub fn balancing_key(&self) -> &str {
        self.consumer_key
            .as_deref()
            .or(self.service_type.as_deref())
            .unwrap_or("*")
    }

    pub fn matches<T: MeshMember + ?Sized>(&self, member: &T) -> bool {
        if !member.member_status().is_routable(self.allow_degraded) {
            return false;
        }
        if self.exclude_ids.contains(member.member_id()) {
            return false;
        }
        if let Some(service_type) = &self.service_type {
            if member.member_type() != service_type {
                return false;
            }
        }
        if let Some(max_load) = self.max_load {
            if member.load() > max_load {
                return false;
            }
        }
        if !self.required_tags.is_subset(member.member_tags()) {
            return false;
        }
        self.capabilities.iter().all(|c| member.has_capability(c))
    }

    /// Matching members, in input order
    pub fn filter<'a, T: MeshMember>(&self, members: impl IntoIterator<Item = &'a T>) -> Vec<&'a T>
    where
        T: 'a,
    {
        members.into_iter().filter(|m| self.matches(*m)).collect()
    }
}

impl fmt::Display for SelectionCriteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "type={}", self.service_type.as_deref().unwrap_or("*"))?;
        if !self.required_tags.is_empty() {
            let tags: Vec<&str> = self.required_tags.iter().map(String::as_str).collect();
            write!(f, " tags=[{}]", tags.join(","))?;
        }
        if !self.capabilities.is_empty() {
            write!(f, " capabilities=[{}]", self.capabilities.join(","))?;
        }
        if let Some(max_load) = self.max_load {
            write!(f, " max_load={max_load}")?;
        }
        if !self.exclude_ids.is_empty() {
            write!(f, " excluded={}", self.exclude_ids.len())?;
        }
        Ok(())
    }
}
