//! Caller-facing request and response types

use crate::transport::{HttpMethod, TransportResponse};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// A call to one agent service, relative to its endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct AgentRequest {
    pub method: HttpMethod,
    /// Path appended to the endpoint URL, e.g. `/analyze`
    pub path: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<serde_json::Value>,
    /// Overrides the configured transport timeout
    pub timeout: Option<Duration>,
}

impl AgentRequest {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: BTreeMap::new(),
            body: None,
            timeout: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(HttpMethod::Post, path).with_body(body)
    }

    pub fn put(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(HttpMethod::Put, path).with_body(body)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Caller-supplied value of `header`, matched case-insensitively
    pub fn header(&self, header: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(header))
            .map(|(_, value)| value.as_str())
    }
}

/// Successful response of an agent service
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    /// Parsed JSON, a string for non-JSON bodies, `null` when empty
    pub body: serde_json::Value,
    #[serde(rename = "elapsed_ms", serialize_with = "as_millis")]
    pub elapsed: Duration,
    pub request_id: String,
}

impl AgentResponse {
    pub(crate) fn from_transport(response: TransportResponse, request_id: String) -> Self {
        let body = response
            .json_value()
            .unwrap_or_else(|_| serde_json::Value::String(response.body.clone()));
        Self {
            status: response.status,
            headers: response.headers,
            body,
            elapsed: response.elapsed,
            request_id,
        }
    }
}

fn as_millis<S: serde::Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}
