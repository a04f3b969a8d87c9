//! reqwest-backed transport

use super::{HttpMethod, ServiceTransport, TransportRequest, TransportResponse};
use crate::error::{MeshError, MeshResult};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::debug;

/// HTTP transport sharing one connection pool across calls
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Delete => reqwest::Method::DELETE,
    }
}

/// Map a reqwest failure onto the retryable network/timeout classes
pub(crate) fn classify_reqwest_error(error: reqwest::Error, operation: &str, timeout_ms: u64) -> MeshError {
    if error.is_timeout() {
        MeshError::timeout(operation, timeout_ms)
    } else {
        MeshError::network(format!("{operation}: {error}"))
    }
}

#[async_trait]
impl ServiceTransport for HttpTransport {
    async fn send(&self, request: TransportRequest) -> MeshResult<TransportResponse> {
        let timeout_ms = request.timeout.as_millis() as u64;
        let operation = format!("{} {}", request.method, request.url);

        let mut builder = self
            .client
            .request(method(request.method), &request.url)
            .timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let started = Instant::now();
        let response = builder
            .send()
            .await
            .map_err(|e| classify_reqwest_error(e, &operation, timeout_ms))?;

        let status = response.status().as_u16();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .text()
            .await
            .map_err(|e| classify_reqwest_error(e, &operation, timeout_ms))?;
        let elapsed = started.elapsed();

        debug!(%operation, status, elapsed_ms = elapsed.as_millis() as u64, "Transport call completed");

        Ok(TransportResponse {
            status,
            headers,
            body,
            elapsed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{header, method as http_method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_send_passes_headers_and_returns_status() {
        let server = MockServer::start().await;
        Mock::given(http_method("POST"))
            .and(path("/invoke"))
            .and(header("X-Request-ID", "req-1"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;

        let transport = HttpTransport::new();
        let request = TransportRequest::new(
            HttpMethod::Post,
            format!("{}/invoke", server.uri()),
            Duration::from_secs(2),
        )
        .with_header("X-Request-ID", "req-1")
        .with_body(serde_json::json!({"q": 1}));

        let response = transport.send(request).await.unwrap();
        assert_eq!(response.status, 503);
        assert_eq!(response.body, "busy");
    }

    #[tokio::test]
    async fn test_slow_response_becomes_timeout() {
        let server = MockServer::start().await;
        Mock::given(http_method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let transport = HttpTransport::new();
        let request = TransportRequest::new(HttpMethod::Get, server.uri(), Duration::from_millis(50));

        let error = transport.send(request).await.unwrap_err();
        assert_eq!(error.code(), "TIMEOUT_ERROR");
        assert!(error.is_retryable());
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        let transport = HttpTransport::new();
        let request = TransportRequest::new(
            HttpMethod::Get,
            "http://127.0.0.1:1/unreachable",
            Duration::from_secs(1),
        );

        let error = transport.send(request).await.unwrap_err();
        assert_eq!(error.code(), "NETWORK_ERROR");
    }
}
