//! Error taxonomy for the agent service mesh
//!
//! Every failure surfaced to callers carries a stable code, a sanitised message
//! and a retryable flag so that callers can decide on further action without
//! parsing free text.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum length of a sanitised error message
const MAX_MESSAGE_LEN: usize = 500;

static SECRET_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+").ok());

static SENSITIVE_PATH_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.aws|\.config|serviceaccount)/[a-zA-Z0-9._/-]+")
        .ok()
});

/// Main error type for mesh operations
#[derive(Debug, Error)]
pub enum MeshError {
    #[error("Validation failed for '{field}': {reason}")]
    Validation { field: String, reason: String },

    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Timed out after {timeout_ms}ms: {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Circuit open for service '{service_id}'; check the service health before retrying")]
    CircuitOpen { service_id: String },

    #[error("Configuration error: {0}")]
    Configuration(#[from] crate::config::ConfigError),

    #[error("Service not found: {service_id}")]
    ServiceNotFound { service_id: String },

    #[error("No candidates matched {criteria}")]
    NoCandidates { criteria: String },

    #[error("Discovery via {backend} failed: {message}")]
    Discovery { backend: String, message: String },

    #[error("Gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        attempts: u32,
        last_error: Box<MeshError>,
    },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl MeshError {
    /// Create validation error
    pub fn validation<F: Into<String>, R: Into<String>>(field: F, reason: R) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create network error
    pub fn network<S: Into<String>>(message: S) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create timeout error
    pub fn timeout<S: Into<String>>(operation: S, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create HTTP status error
    pub fn http<S: Into<String>>(status: u16, message: S) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    /// Create circuit open error
    pub fn circuit_open<S: Into<String>>(service_id: S) -> Self {
        Self::CircuitOpen {
            service_id: service_id.into(),
        }
    }

    /// Create service not found error
    pub fn service_not_found<S: Into<String>>(service_id: S) -> Self {
        Self::ServiceNotFound {
            service_id: service_id.into(),
        }
    }

    /// Create discovery error
    pub fn discovery<B: Into<String>, S: Into<String>>(backend: B, message: S) -> Self {
        Self::Discovery {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Create internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> String {
        match self {
            MeshError::Validation { .. } => "VALIDATION_ERROR".to_string(),
            MeshError::Network { .. } => "NETWORK_ERROR".to_string(),
            MeshError::Timeout { .. } => "TIMEOUT_ERROR".to_string(),
            MeshError::Http { status, .. } => format!("HTTP_{status}"),
            MeshError::CircuitOpen { .. } => "CIRCUIT_OPEN".to_string(),
            MeshError::Configuration(_) => "CONFIGURATION_ERROR".to_string(),
            MeshError::ServiceNotFound { .. } => "SERVICE_NOT_FOUND".to_string(),
            MeshError::NoCandidates { .. } => "NO_CANDIDATES".to_string(),
            MeshError::Discovery { .. } => "DISCOVERY_ERROR".to_string(),
            MeshError::RetriesExhausted { .. } => "RETRIES_EXHAUSTED".to_string(),
            MeshError::Internal { .. } => "INTERNAL_ERROR".to_string(),
        }
    }

    /// Key matched against a retry policy's retryable code set.
    ///
    /// HTTP statuses collapse into classes except for the individually
    /// retryable 408 and 429.
    pub fn retry_class(&self) -> String {
        match self {
            MeshError::Http { status, .. } => match *status {
                408 | 429 => format!("HTTP_{status}"),
                500..=599 => "HTTP_5XX".to_string(),
                400..=499 => "HTTP_4XX".to_string(),
                _ => format!("HTTP_{status}"),
            },
            MeshError::RetriesExhausted { last_error, .. } => last_error.retry_class(),
            other => other.code(),
        }
    }

    /// Whether the failure is transient
    pub fn is_retryable(&self) -> bool {
        match self {
            MeshError::Network { .. } | MeshError::Timeout { .. } => true,
            MeshError::Http { status, .. } => is_retryable_status(*status),
            MeshError::RetriesExhausted { last_error, .. } => last_error.is_retryable(),
            _ => false,
        }
    }

    /// Structured outcome handed to callers
    pub fn to_info(&self) -> ErrorInfo {
        ErrorInfo {
            code: self.code(),
            message: sanitize_error_message(&self.to_string()),
            retryable: self.is_retryable(),
        }
    }
}

/// HTTP statuses that are worth another attempt
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500..=599)
}

/// Structured error outcome: code, message and retryable flag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

/// Redact secrets and sensitive paths, then cap the length
pub fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = message.to_string();

    if let Some(pattern) = SECRET_PATTERN.as_ref() {
        sanitized = pattern.replace_all(&sanitized, "${1}=***").to_string();
    }

    if let Some(pattern) = SENSITIVE_PATH_PATTERN.as_ref() {
        sanitized = pattern
            .replace_all(&sanitized, "/***REDACTED***/")
            .to_string();
    }

    if sanitized.len() > MAX_MESSAGE_LEN {
        let truncate_suffix = "...[truncated]";
        let mut cut = MAX_MESSAGE_LEN - truncate_suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized = format!("{}{}", &sanitized[..cut], truncate_suffix);
    }

    sanitized
}

/// Result type for mesh operations
pub type MeshResult<T> = Result<T, MeshError>;
