//! Observability for the mesh adapter
//!
//! Structured logging, in-process metrics and the HTTP health endpoints.

pub mod health;
pub mod logging;
pub mod metrics;

// Re-export for convenience
pub use health::HealthServer;
pub use logging::{LogFormat, init_default_logging, init_logging_with_overrides};
pub use metrics::{MetricsCollector, MetricsSnapshot};

// Span macros for structured logging
pub use logging::{call_span, discovery_span, probe_span, registry_span};
