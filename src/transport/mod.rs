//! Outbound call transport
//!
//! The adapter talks to agent services through [`ServiceTransport`] so tests
//! can substitute a counting mock for the reqwest-backed implementation.

use crate::error::{MeshError, MeshResult};
use crate::service::AuthDescriptor;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

pub mod http;

pub use http::HttpTransport;

/// HTTP method of an outbound call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// Fully resolved outbound request
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<serde_json::Value>,
    pub timeout: Duration,
}

impl TransportRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
            timeout,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Add the credentials an endpoint's auth descriptor points to.
    ///
    /// A missing environment variable leaves the request unauthenticated;
    /// the service answers 401 and the caller sees a terminal error.
    pub fn with_auth(mut self, auth: Option<&AuthDescriptor>) -> Self {
        match auth {
            Some(AuthDescriptor::Bearer { token_env }) => {
                if let Ok(token) = std::env::var(token_env) {
                    self.headers
                        .insert("Authorization".to_string(), format!("Bearer {token}"));
                }
            }
            Some(AuthDescriptor::ApiKey { header, value_env }) => {
                if let Ok(value) = std::env::var(value_env) {
                    self.headers.insert(header.clone(), value);
                }
            }
            None => {}
        }
        self
    }
}

/// Response of an outbound call, regardless of status
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
    pub elapsed: Duration,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body parsed as JSON, `Null` for an empty body
    pub fn json_value(&self) -> MeshResult<serde_json::Value> {
        if self.body.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&self.body)
            .map_err(|e| MeshError::validation("response.body", format!("invalid JSON: {e}")))
    }

    pub fn json<T: DeserializeOwned>(&self) -> MeshResult<T> {
        serde_json::from_str(&self.body)
            .map_err(|e| MeshError::validation("response.body", format!("invalid JSON: {e}")))
    }

    /// Convert a non-2xx response into an HTTP error
    pub fn error_for_status(self) -> MeshResult<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            let mut message = self.body.trim().to_string();
            if message.is_empty() {
                message = "empty response body".to_string();
            }
            Err(MeshError::http(self.status, message))
        }
    }
}

/// Capability to perform one outbound HTTP call
///
/// Implementations return non-2xx responses as `Ok`; only network failures
/// and timeouts are errors at this layer.
#[async_trait::async_trait]
pub trait ServiceTransport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> MeshResult<TransportResponse>;
}
