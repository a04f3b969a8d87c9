//! Agent Mesh - service-mesh adapter for backend agent services
//!
//! Sits between an orchestrating application and a fleet of specialised
//! agent services reachable over HTTP.
//!
//! # Overview
//!
//! - Service discovery from static config, Consul, Eureka or Kubernetes
//! - Capability/type based instance selection, routing rules and load balancing
//! - Per-service circuit breakers and retry with exponential backoff
//! - Periodic health probing with fleet-level aggregation
//! - An in-process registry of self-registered agents with heartbeat expiry
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use agent_mesh::adapter::{AgentRequest, ServiceAdapter};
//! use agent_mesh::config::MeshConfig;
//! use agent_mesh::routing::SelectionCriteria;
//! use serde_json::json;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MeshConfig::load_from_file("mesh.toml".as_ref())?;
//! let adapter = ServiceAdapter::new(config)?;
//! adapter.start().await?;
//!
//! let target = adapter.require_service(&SelectionCriteria::for_type("diagnosis"))?;
//! let response = adapter
//!     .call_service_with_retry(&target.id, AgentRequest::post("/analyze", json!({"case": 42})), None)
//!     .await?;
//! println!("{}", response.body);
//!
//! adapter.destroy().await;
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod config;
pub mod discovery;
pub mod error;
pub mod events;
pub mod health;
pub mod lifecycle;
pub mod observability;
pub mod registry;
pub mod resilience;
pub mod routing;
pub mod service;
pub mod testing;
pub mod transport;

pub use adapter::{AgentRequest, AgentResponse, ServiceAdapter, ServiceAdapterBuilder, ServiceMetrics};
pub use config::{ConfigError, MeshConfig};
pub use error::{MeshError, MeshResult};
pub use events::{EventBus, MeshEvent};
pub use health::{HealthReport, HealthThresholds};
pub use registry::{AgentRegistration, AgentRegistry, RegistrationError};
pub use resilience::{CircuitState, RetryPolicy};
pub use routing::{LoadBalancingStrategy, RoutingRule, SelectionCriteria};
pub use service::{Endpoint, HealthStatus, ServiceInstance, ServiceStatus};
