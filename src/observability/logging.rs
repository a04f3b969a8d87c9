//! Structured logging system using tracing crate
//!
//! Provides contextual, machine-readable logging with span macros for service
//! calls, discovery refreshes, health probes and registry operations.
//!
//! ## Log Format Options
//!
//! The logging system supports three output formats controlled by the `LOG_FORMAT` environment variable:
//!
//! - `json` - Structured JSON format for production and log aggregation systems
//! - `pretty` - Human-readable format with colors and indentation for development
//! - `compact` - Terminal-friendly format with colors but minimal spacing
//!
//! ## Environment Variables
//!
//! - `LOG_LEVEL`: Log level (ERROR, WARN, INFO, DEBUG, TRACE) - defaults to INFO
//! - `LOG_FORMAT`: Output format (json, pretty, compact) - defaults to json
//! - `LOG_SPANS`: Include span events (true/false) - defaults to false
//! - `RUST_LOG`: Override log filtering (follows env_logger format)
//!
//! ## Examples
//!
//! ```bash
//! # Production JSON logging
//! LOG_FORMAT=json LOG_LEVEL=INFO ./agent-mesh run
//!
//! # Development with colors
//! LOG_FORMAT=pretty LOG_LEVEL=DEBUG ./agent-mesh run
//!
//! # Compact terminal output
//! LOG_FORMAT=compact LOG_LEVEL=INFO ./agent-mesh run
//! ```

use std::env;
use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log output format options
#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    /// JSON format for structured logging (machine-readable)
    Json,
    /// Pretty format with colors and indentation (human-readable)
    Pretty,
    /// Compact format with colors but minimal spacing (terminal-friendly)
    Compact,
}

impl LogFormat {
    /// Parse log format from string
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "pretty" => LogFormat::Pretty,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Json, // Default to JSON for production
        }
    }
}

/// Dependencies whose logs are capped at `warn`
const QUIET_DEPENDENCIES: &[&str] = &["hyper=warn", "reqwest=warn", "warp=warn", "tokio=warn"];

/// Initialize logging with manual configuration
pub fn init_logging(level: Level, format: LogFormat, include_spans: bool) {
    let mut filter = EnvFilter::new(level.to_string());
    for directive in QUIET_DEPENDENCIES {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    // Allow RUST_LOG to override
    if let Ok(rust_log) = env::var("RUST_LOG") {
        filter = EnvFilter::new(rust_log);
    }

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => {
            let fmt_layer = fmt::layer().json().with_span_events(if include_spans {
                fmt::format::FmtSpan::NEW | fmt::format::FmtSpan::CLOSE
            } else {
                fmt::format::FmtSpan::NONE
            });
            let _ = subscriber.with(fmt_layer).try_init();
        }
        LogFormat::Pretty => {
            let fmt_layer =
                fmt::layer()
                    .pretty()
                    .with_ansi(true)
                    .with_span_events(if include_spans {
                        fmt::format::FmtSpan::NEW | fmt::format::FmtSpan::CLOSE
                    } else {
                        fmt::format::FmtSpan::NONE
                    });
            let _ = subscriber.with(fmt_layer).try_init();
        }
        LogFormat::Compact => {
            let fmt_layer = fmt::layer()
                .compact()
                .with_ansi(true)
                .with_target(false)
                .with_span_events(if include_spans {
                    fmt::format::FmtSpan::NEW | fmt::format::FmtSpan::CLOSE
                } else {
                    fmt::format::FmtSpan::NONE
                });
            let _ = subscriber.with(fmt_layer).try_init();
        }
    }
}

/// Parse a `LOG_LEVEL` value, defaulting to INFO
pub fn parse_level(value: &str) -> Level {
    match value.to_uppercase().as_str() {
        "ERROR" => Level::ERROR,
        "WARN" => Level::WARN,
        "INFO" => Level::INFO,
        "DEBUG" => Level::DEBUG,
        "TRACE" => Level::TRACE,
        _ => Level::INFO,
    }
}

/// Initialize logging from environment variables, with optional overrides from the CLI
pub fn init_default_logging() {
    init_logging_with_overrides(None, None);
}

pub fn init_logging_with_overrides(level: Option<&str>, format: Option<&str>) {
    let level = level
        .map(str::to_string)
        .or_else(|| env::var("LOG_LEVEL").ok())
        .unwrap_or_else(|| "INFO".to_string());
    let format = format
        .map(str::to_string)
        .or_else(|| env::var("LOG_FORMAT").ok())
        .unwrap_or_else(|| "json".to_string());

    let include_spans = env::var("LOG_SPANS")
        .unwrap_or_else(|_| "false".to_string())
        .to_lowercase()
        == "true";

    init_logging(parse_level(&level), LogFormat::parse(&format), include_spans);
}

/// Create a span for one outbound service call
#[macro_export]
macro_rules! call_span {
    ($($field:tt)*) => {
        tracing::info_span!("service_call", $($field)*)
    };
}

/// Create a discovery refresh span
#[macro_export]
macro_rules! discovery_span {
    ($($field:tt)*) => {
        tracing::info_span!("discovery_refresh", $($field)*)
    };
}

/// Create a health probe span
#[macro_export]
macro_rules! probe_span {
    ($($field:tt)*) => {
        tracing::debug_span!("health_probe", $($field)*)
    };
}

/// Create a registry operation span
#[macro_export]
macro_rules! registry_span {
    ($($field:tt)*) => {
        tracing::info_span!("registry_operation", $($field)*)
    };
}

// Re-export macros for convenience
pub use {call_span, discovery_span, probe_span, registry_span};
