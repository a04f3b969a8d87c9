//! Agent registry
//!
//! Tracks logical agents that register directly with the mesh rather than
//! through a discovery backend. Agents must heartbeat; a background sweep
//! unregisters any agent silent for longer than the inactivity timeout.

use crate::config::RegistrySection;
use crate::error::MeshError;
use crate::events::{EventBus, MeshEvent, UnregisterReason};
use crate::health::{summarize, HealthReport, HealthThresholds, ProbeOutcome};
use crate::lifecycle::{spawn_periodic, TaskSlot};
use crate::observability::MetricsCollector;
use crate::routing::{LoadBalancer, LoadBalancingStrategy, MeshMember, SelectionCriteria};
use crate::service::{CapacitySnapshot, PerformanceSnapshot, ServiceStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Registration validation and lookup failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("Agent '{agent_id}' is already registered")]
    DuplicateId { agent_id: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    #[error("Agent '{agent_id}' is not registered")]
    UnknownAgent { agent_id: String },
}

impl From<RegistrationError> for MeshError {
    fn from(error: RegistrationError) -> Self {
        match error {
            RegistrationError::UnknownAgent { agent_id } => MeshError::service_not_found(agent_id),
            RegistrationError::DuplicateId { agent_id } => {
                MeshError::validation("id", format!("agent '{agent_id}' is already registered"))
            }
            RegistrationError::MissingField { field } => MeshError::validation(field, "field is required"),
            RegistrationError::InvalidField { field, reason } => MeshError::validation(field, reason),
        }
    }
}

/// Where an agent is in its registry lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentLifecycleState {
    #[default]
    Registering,
    Registered,
    Deregistering,
}

/// A logical agent known to the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRegistration {
    pub id: String,
    pub agent_type: String,
    pub name: String,
    pub version: String,
    pub status: ServiceStatus,
    pub lifecycle: AgentLifecycleState,
    #[serde(default)]
    pub configuration: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub performance: PerformanceSnapshot,
    #[serde(default)]
    pub capacity: CapacitySnapshot,
    pub weight: u32,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    #[serde(skip, default = "Instant::now")]
    heartbeat_at: Instant,
}

impl AgentRegistration {
    pub fn new(id: impl Into<String>, agent_type: impl Into<String>) -> Self {
        let id = id.into();
        let now = Utc::now();
        Self {
            name: id.clone(),
            id,
            agent_type: agent_type.into(),
            version: "unknown".to_string(),
            status: ServiceStatus::Healthy,
            lifecycle: AgentLifecycleState::Registering,
            configuration: BTreeMap::new(),
            capabilities: BTreeSet::new(),
            tags: BTreeSet::new(),
            performance: PerformanceSnapshot::default(),
            capacity: CapacitySnapshot::default(),
            weight: 1,
            registered_at: now,
            last_heartbeat: now,
            heartbeat_at: Instant::now(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_status(mut self, status: ServiceStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.insert(capability.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_configuration(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.configuration.insert(key.into(), value);
        self
    }

    pub fn with_load(mut self, load: f64) -> Self {
        self.capacity.current_load = load;
        self
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    /// Time since the last heartbeat, measured on the runtime clock
    pub fn silent_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.heartbeat_at)
    }

    fn touch(&mut self) {
        self.heartbeat_at = Instant::now();
        self.last_heartbeat = Utc::now();
    }

    fn validate(&self) -> Result<(), RegistrationError> {
        if self.id.trim().is_empty() {
            return Err(RegistrationError::MissingField {
                field: "id".to_string(),
            });
        }
        if self.id.chars().any(char::is_whitespace) {
            return Err(RegistrationError::InvalidField {
                field: "id".to_string(),
                reason: "must not contain whitespace".to_string(),
            });
        }
        if self.agent_type.trim().is_empty() {
            return Err(RegistrationError::MissingField {
                field: "agent_type".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.capacity.current_load) {
            return Err(RegistrationError::InvalidField {
                field: "capacity.current_load".to_string(),
                reason: format!("{} is outside 0.0-1.0", self.capacity.current_load),
            });
        }
        if self.weight == 0 {
            return Err(RegistrationError::InvalidField {
                field: "weight".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

impl MeshMember for AgentRegistration {
    fn member_id(&self) -> &str {
        &self.id
    }

    fn member_type(&self) -> &str {
        &self.agent_type
    }

    fn member_status(&self) -> ServiceStatus {
        self.status
    }

    fn member_tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    fn has_capability(&self, capability: &str) -> bool {
        self.capabilities
            .iter()
            .any(|c| c.eq_ignore_ascii_case(capability))
    }

    fn load(&self) -> f64 {
        self.capacity.current_load
    }

    fn avg_response_time_ms(&self) -> f64 {
        self.performance.avg_response_time_ms
    }

    fn weight(&self) -> u32 {
        self.weight
    }

    fn success_rate(&self) -> f64 {
        (1.0 - self.performance.error_rate).clamp(0.0, 1.0)
    }
}

/// Thread-safe registry of directly registered agents
pub struct AgentRegistry {
    agents: RwLock<BTreeMap<String, AgentRegistration>>,
    events: EventBus,
    metrics: Option<Arc<MetricsCollector>>,
    balancer: LoadBalancer,
    strategy: LoadBalancingStrategy,
    inactive_timeout: Duration,
    cleanup_interval: Duration,
    sweeper: TaskSlot,
}

impl AgentRegistry {
    pub fn new(config: &RegistrySection, events: EventBus) -> Self {
        Self {
            agents: RwLock::new(BTreeMap::new()),
            events,
            metrics: None,
            balancer: LoadBalancer::new(),
            strategy: LoadBalancingStrategy::default(),
            inactive_timeout: config.inactive_agent_timeout(),
            cleanup_interval: config.cleanup_interval(),
            sweeper: TaskSlot::new(),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_strategy(mut self, strategy: LoadBalancingStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, AgentRegistration>> {
        self.agents.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, AgentRegistration>> {
        self.agents.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Validate and add an agent; duplicate ids are rejected
    pub fn register(&self, mut agent: AgentRegistration) -> Result<AgentRegistration, RegistrationError> {
        let _span = crate::registry_span!(operation = "register", agent_id = %agent.id).entered();
        agent.validate()?;

        {
            let mut agents = self.write();
            if agents.contains_key(&agent.id) {
                return Err(RegistrationError::DuplicateId { agent_id: agent.id });
            }
            agent.lifecycle = AgentLifecycleState::Registered;
            agent.registered_at = Utc::now();
            agent.touch();
            agents.insert(agent.id.clone(), agent.clone());
        }

        info!(agent_type = %agent.agent_type, "Registered agent");
        self.events.publish(MeshEvent::Registered {
            agent_id: agent.id.clone(),
            agent_type: agent.agent_type.clone(),
        });
        if let Some(metrics) = &self.metrics {
            metrics.agent_registered();
        }
        Ok(agent)
    }

    /// Remove an agent on request; returns its final registration
    pub fn unregister(&self, agent_id: &str) -> Result<AgentRegistration, RegistrationError> {
        let mut agent = self.write().remove(agent_id).ok_or_else(|| unknown(agent_id))?;
        agent.lifecycle = AgentLifecycleState::Deregistering;

        info!(agent_id, "Unregistered agent");
        self.events.publish(MeshEvent::Unregistered {
            agent_id: agent_id.to_string(),
            reason: UnregisterReason::Requested,
        });
        if let Some(metrics) = &self.metrics {
            metrics.agent_unregistered();
        }
        Ok(agent)
    }

    pub fn heartbeat(&self, agent_id: &str) -> Result<(), RegistrationError> {
        let mut agents = self.write();
        let agent = agents.get_mut(agent_id).ok_or_else(|| unknown(agent_id))?;
        agent.touch();
        debug!(agent_id, "Heartbeat received");
        Ok(())
    }

    /// Set an agent's status, publishing `StatusChanged` when it differs
    pub fn update_status(&self, agent_id: &str, status: ServiceStatus) -> Result<ServiceStatus, RegistrationError> {
        let previous = {
            let mut agents = self.write();
            let agent = agents.get_mut(agent_id).ok_or_else(|| unknown(agent_id))?;
            std::mem::replace(&mut agent.status, status)
        };

        if previous != status {
            info!(agent_id, %previous, current = %status, "Agent status changed");
            self.events.publish(MeshEvent::StatusChanged {
                agent_id: agent_id.to_string(),
                previous,
                current: status,
            });
        }
        Ok(previous)
    }

    pub fn update_performance(
        &self,
        agent_id: &str,
        performance: PerformanceSnapshot,
    ) -> Result<(), RegistrationError> {
        let mut agents = self.write();
        let agent = agents.get_mut(agent_id).ok_or_else(|| unknown(agent_id))?;
        agent.performance = performance;
        Ok(())
    }

    pub fn update_capacity(&self, agent_id: &str, capacity: CapacitySnapshot) -> Result<(), RegistrationError> {
        if !(0.0..=1.0).contains(&capacity.current_load) {
            return Err(RegistrationError::InvalidField {
                field: "capacity.current_load".to_string(),
                reason: format!("{} is outside 0.0-1.0", capacity.current_load),
            });
        }
        let mut agents = self.write();
        let agent = agents.get_mut(agent_id).ok_or_else(|| unknown(agent_id))?;
        agent.capacity = capacity;
        Ok(())
    }

    pub fn get_agent(&self, agent_id: &str) -> Option<AgentRegistration> {
        self.read().get(agent_id).cloned()
    }

    /// All agents, ordered by id
    pub fn list_agents(&self) -> Vec<AgentRegistration> {
        self.read().values().cloned().collect()
    }

    pub fn agents_by_type(&self, agent_type: &str) -> Vec<AgentRegistration> {
        self.read()
            .values()
            .filter(|a| a.agent_type == agent_type)
            .cloned()
            .collect()
    }

    pub fn agent_count(&self) -> usize {
        self.read().len()
    }

    /// Pick one agent matching `criteria` with the registry's strategy
    pub fn select_agent(&self, criteria: &SelectionCriteria) -> Option<AgentRegistration> {
        let agents = self.read();
        let candidates = criteria.filter(agents.values());
        let chosen = self
            .balancer
            .select(self.strategy, criteria, &candidates)
            .map(|agent| (*agent).clone());
        if chosen.is_none() {
            debug!(%criteria, "No registered agent matched");
        }
        chosen
    }

    /// Agent statuses as health outcomes
    pub fn health_details(&self) -> Vec<ProbeOutcome> {
        self.read()
            .values()
            .map(|agent| {
                let mut outcome = ProbeOutcome::new(&agent.id, agent.status.into());
                outcome.checked_at = agent.last_heartbeat;
                if agent.performance.avg_response_time_ms > 0.0 {
                    outcome.response_time_ms = Some(agent.performance.avg_response_time_ms as u64);
                }
                outcome
            })
            .collect()
    }

    /// Fleet report over registered agents
    pub fn health_summary(&self, thresholds: &HealthThresholds) -> HealthReport {
        summarize(self.health_details(), thresholds)
    }

    /// Unregister every agent silent for longer than the inactivity timeout.
    ///
    /// Expired agents are removed under a single write lock, so concurrent
    /// sweeps cannot report the same agent twice.
    pub fn sweep_inactive_at(&self, now: Instant) -> Vec<String> {
        let expired: Vec<String> = {
            let mut agents = self.write();
            let ids: Vec<String> = agents
                .values()
                .filter(|a| a.silent_for(now) > self.inactive_timeout)
                .map(|a| a.id.clone())
                .collect();
            for id in &ids {
                agents.remove(id);
            }
            ids
        };

        for agent_id in &expired {
            warn!(
                agent_id,
                timeout_secs = self.inactive_timeout.as_secs(),
                "Agent missed heartbeats; unregistering"
            );
            self.events.publish(MeshEvent::Unregistered {
                agent_id: agent_id.clone(),
                reason: UnregisterReason::HeartbeatTimeout,
            });
            if let Some(metrics) = &self.metrics {
                metrics.agent_expired();
            }
        }
        expired
    }

    pub fn sweep_inactive(&self) -> Vec<String> {
        self.sweep_inactive_at(Instant::now())
    }

    /// Start the background sweep; returns false if already running
    pub fn start_sweeper(self: &Arc<Self>) -> bool {
        let registry = Arc::clone(self);
        self.sweeper.install(spawn_periodic(self.cleanup_interval, move || {
            let registry = Arc::clone(&registry);
            async move {
                registry.sweep_inactive();
            }
        }))
    }

    pub fn is_sweeping(&self) -> bool {
        self.sweeper.is_running()
    }

    pub async fn stop(&self) {
        self.sweeper.stop("registry_sweeper").await;
    }
}

fn unknown(agent_id: &str) -> RegistrationError {
    RegistrationError::UnknownAgent {
        agent_id: agent_id.to_string(),
    }
}
