//! HTTP transport seam and its reqwest implementation.
//!
//! A transport sends one request and reports the status and body it got
//! back. It does not judge the status; the audited client decides what
//! counts as success. Only network failures and timeouts are errors here.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use callaudit_core::HttpMethod;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{error::TransportError, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_READ_TIMEOUT_MS};

/// Status and body returned by the endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status_code: u16,
    /// Response body decoded as UTF-8 (lossy).
    pub body: String,
}

impl TransportResponse {
    /// Creates a response.
    pub fn new(status_code: u16, body: impl Into<String>) -> Self {
        Self { status_code, body: body.into() }
    }

    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// Capability to send one HTTP request.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Sends `body` (if any) to `endpoint` with `method`.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Network` or `TransportError::Timeout` when
    /// no response was received, `TransportError::Configuration` when the
    /// request could not be built.
    async fn send(
        &self,
        method: HttpMethod,
        endpoint: &str,
        body: Option<&str>,
    ) -> Result<TransportResponse, TransportError>;
}

/// Configuration for the reqwest-backed transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Prefix for endpoints that are not absolute URLs.
    pub base_url: Option<String>,
    /// Time allowed to establish a connection.
    pub connect_timeout: Duration,
    /// Time allowed for the whole request once connected.
    pub read_timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
    /// Maximum number of redirects to follow.
    pub max_redirects: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
            user_agent: concat!("callaudit/", env!("CARGO_PKG_VERSION")).to_string(),
            max_redirects: 5,
        }
    }
}

/// Transport built on a pooled `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    config: ClientConfig,
}

impl ReqwestTransport {
    /// Builds the underlying HTTP client.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Configuration` if the client cannot be built.
    pub fn new(config: ClientConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.read_timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects as usize))
            .build()
            .map_err(|e| {
                TransportError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config })
    }

    /// Creates a transport with default configuration.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Configuration` if the client cannot be built.
    pub fn with_defaults() -> Result<Self, TransportError> {
        Self::new(ClientConfig::default())
    }

    /// Resolves `endpoint` against the configured base URL.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Configuration` for a relative endpoint when
    /// no base URL is configured.
    pub fn resolve(&self, endpoint: &str) -> Result<String, TransportError> {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return Ok(endpoint.to_string());
        }

        let Some(base) = self.config.base_url.as_deref() else {
            return Err(TransportError::configuration(format!(
                "relative endpoint {endpoint} requires a base URL"
            )));
        };

        let base = base.trim_end_matches('/');
        let path = endpoint.trim_start_matches('/');
        Ok(format!("{base}/{path}"))
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        method: HttpMethod,
        endpoint: &str,
        body: Option<&str>,
    ) -> Result<TransportResponse, TransportError> {
        let url = self.resolve(endpoint)?;
        let started = Instant::now();

        let mut request = match method {
            HttpMethod::Get => self.client.get(&url),
            HttpMethod::Post => self.client.post(&url),
        };
        request = request.header(reqwest::header::ACCEPT, "application/json");
        if let Some(body) = body {
            request = request
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body.to_string());
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(duration_ms = started.elapsed().as_millis(), "request failed: {}", e);

                if e.is_timeout() {
                    let timeout_ms =
                        u64::try_from(self.config.read_timeout.as_millis()).unwrap_or(u64::MAX);
                    return Err(TransportError::timeout(timeout_ms));
                }
                if e.is_connect() {
                    return Err(TransportError::network(format!("connection failed: {e}")));
                }
                if e.is_builder() {
                    return Err(TransportError::configuration(e.to_string()));
                }
                return Err(TransportError::network(e.to_string()));
            },
        };

        let status_code = response.status().as_u16();
        let body = match response.bytes().await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) if e.is_timeout() => {
                let timeout_ms =
                    u64::try_from(self.config.read_timeout.as_millis()).unwrap_or(u64::MAX);
                return Err(TransportError::timeout(timeout_ms));
            },
            Err(e) => return Err(TransportError::network(format!("failed to read body: {e}"))),
        };

        debug!(
            status = status_code,
            duration_ms = started.elapsed().as_millis(),
            "received response"
        );

        Ok(TransportResponse { status_code, body })
    }
}

#[cfg(test)]
mod tests {
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    use super::*;

    fn transport_for(server: &MockServer) -> ReqwestTransport {
        let config = ClientConfig { base_url: Some(server.uri()), ..Default::default() };
        ReqwestTransport::new(config).unwrap()
    }

    #[tokio::test]
    async fn post_sends_json_body() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/orders"))
            .and(matchers::header("content-type", "application/json"))
            .and(matchers::body_string(r#"{"item":"x"}"#))
            .respond_with(ResponseTemplate::new(201).set_body_string(r#"{"id":1}"#))
            .mount(&server)
            .await;

        let response = transport_for(&server)
            .send(HttpMethod::Post, "/orders", Some(r#"{"item":"x"}"#))
            .await
            .unwrap();

        assert_eq!(response, TransportResponse::new(201, r#"{"id":1}"#));
        assert!(response.is_success());
    }

    #[tokio::test]
    async fn error_statuses_are_returned_not_raised() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let response = transport_for(&server).send(HttpMethod::Get, "status", None).await.unwrap();

        assert_eq!(response.status_code, 503);
        assert_eq!(response.body, "maintenance");
        assert!(!response.is_success());
    }

    #[tokio::test]
    async fn slow_endpoint_times_out() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let config = ClientConfig {
            base_url: Some(server.uri()),
            read_timeout: Duration::from_millis(100),
            ..Default::default()
        };
        let transport = ReqwestTransport::new(config).unwrap();

        let err = transport.send(HttpMethod::Get, "/slow", None).await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout { timeout_ms: 100 }));
    }

    #[tokio::test]
    async fn unreachable_host_is_a_network_error() {
        let transport = ReqwestTransport::with_defaults().unwrap();

        let err = transport.send(HttpMethod::Get, "http://127.0.0.1:1/nothing", None).await;
        assert!(matches!(err, Err(TransportError::Network { .. })));
    }

    #[test]
    fn relative_endpoint_needs_base_url() {
        let transport = ReqwestTransport::with_defaults().unwrap();

        assert!(matches!(
            transport.resolve("/orders"),
            Err(TransportError::Configuration { .. })
        ));
        assert_eq!(transport.resolve("https://a.test/x").unwrap(), "https://a.test/x");
    }

    #[test]
    fn base_url_joins_without_double_slash() {
        let base_url = Some("https://api.test/v1/".to_string());
        let config = ClientConfig { base_url, ..Default::default() };
        let transport = ReqwestTransport::new(config).unwrap();

        assert_eq!(transport.resolve("/orders").unwrap(), "https://api.test/v1/orders");
        assert_eq!(transport.resolve("orders").unwrap(), "https://api.test/v1/orders");
    }
}
