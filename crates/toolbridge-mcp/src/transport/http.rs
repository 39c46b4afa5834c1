//! HTTP transport: each request is one POST whose body is the response.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::Value;

use super::{Transport, TransportKind, response_into_result};
use crate::codec;
use crate::correlator::Correlator;
use crate::error::{McpError, Result};
use crate::protocol::{JsonRpcNotification, JsonRpcRequest, Message};

/// Path appended to the base URL when none is configured.
pub const DEFAULT_HTTP_PATH: &str = "/mcp";

/// Notifications get a short fixed deadline; nothing waits on them.
const NOTIFICATION_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP endpoint settings.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpConfig {
    /// Base URL (`http://` or `https://`).
    pub url: String,
    /// Path for JSON-RPC posts.
    pub path: String,
    /// Extra request headers.
    pub headers: Vec<(String, String)>,
}

impl HttpConfig {
    /// Settings for `url` with the default path.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            path: DEFAULT_HTTP_PATH.to_string(),
            headers: Vec::new(),
        }
    }

    /// Set the request path.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Add a request header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// The full URL requests are posted to.
    pub fn endpoint(&self) -> Result<url::Url> {
        let base = self.url.trim_end_matches('/');
        let path = self.path.trim_start_matches('/');
        let joined = if path.is_empty() {
            base.to_string()
        } else {
            format!("{}/{}", base, path)
        };
        url::Url::parse(&joined)
            .map_err(|e| McpError::transport(format!("invalid HTTP endpoint '{}': {}", joined, e)))
    }
}

struct HttpConnection {
    client: reqwest::Client,
    endpoint: url::Url,
}

/// Transport that posts each message to an HTTP endpoint.
///
/// There is no persistent channel: the response arrives as the POST body.
/// Requests are not retried.
pub struct HttpTransport {
    config: HttpConfig,
    correlator: Arc<Correlator>,
    conn: Option<HttpConnection>,
}

impl HttpTransport {
    /// Create an unconnected transport.
    pub fn new(config: HttpConfig) -> Self {
        Self {
            config,
            correlator: Arc::new(Correlator::new()),
            conn: None,
        }
    }

    /// The endpoint settings.
    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    fn connection(&self) -> Result<&HttpConnection> {
        self.conn
            .as_ref()
            .ok_or_else(|| McpError::transport("http transport is not connected"))
    }

    async fn post(&self, conn: &HttpConnection, body: Vec<u8>) -> Result<reqwest::Response> {
        let mut request = conn
            .client
            .post(conn.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .body(body);
        for (name, value) in &self.config.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| McpError::transport(format!("POST {} failed: {}", conn.endpoint, e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(McpError::transport(format!(
                "POST {} returned {}: {}",
                conn.endpoint,
                status,
                text.trim()
            )));
        }
        Ok(response)
    }

    async fn exchange(&self, conn: &HttpConnection, id: u64, body: Vec<u8>) -> Result<()> {
        let response = self.post(conn, body).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| McpError::transport(format!("failed to read response body: {}", e)))?;

        let Message::Response(response) = codec::decode_body(&bytes)? else {
            return Err(McpError::malformed("HTTP body is not a JSON-RPC response"));
        };

        let got = response.id;
        if !self.correlator.deliver(response) {
            return Err(McpError::malformed(format!(
                "response id {} does not match request id {}",
                got, id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    async fn connect(&mut self) -> Result<()> {
        if self.conn.is_some() {
            return Ok(());
        }

        let endpoint = self.config.endpoint()?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| McpError::transport(format!("failed to build HTTP client: {}", e)))?;

        self.correlator.reopen();
        tracing::info!(endpoint = %endpoint, "http transport ready");
        self.conn = Some(HttpConnection { client, endpoint });
        Ok(())
    }

    async fn send_request(&self, method: &str, params: Value, timeout: Duration) -> Result<Value> {
        let conn = self.connection()?;

        let id = self.correlator.next_id();
        let body = codec::encode_body(&Message::from(JsonRpcRequest::new(id, method, params)))?;
        let pending = self.correlator.register(id, method)?;

        tracing::debug!(id, method, "posting request");
        match tokio::time::timeout(timeout, self.exchange(conn, id, body)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.correlator.discard(id);
                return Err(e);
            }
            Err(_) => {
                self.correlator.discard(id);
                tracing::warn!(id, method, timeout_ms = timeout.as_millis() as u64, "request timed out");
                return Err(McpError::Timeout {
                    method: method.to_string(),
                    timeout,
                });
            }
        }

        // The exchange already delivered; this resolves immediately.
        let response = self.correlator.await_response(pending, timeout).await?;
        response_into_result(response)
    }

    async fn send_notification(&self, method: &str, params: Value) -> Result<()> {
        let conn = self.connection()?;
        let body = codec::encode_body(&Message::from(JsonRpcNotification::new(method, params)))?;

        tracing::debug!(method, "posting notification");
        match tokio::time::timeout(NOTIFICATION_TIMEOUT, self.post(conn, body)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::debug!(method, error = %e, "notification post failed"),
            Err(_) => tracing::debug!(method, "notification post timed out"),
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.conn.take().is_some() {
            self.correlator.shutdown();
            tracing::info!(url = %self.config.url, "http transport closed");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.conn.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_path() {
        let config = HttpConfig::new("http://localhost:8080/");
        assert_eq!(config.endpoint().unwrap().as_str(), "http://localhost:8080/mcp");

        let config = HttpConfig::new("http://localhost:8080/api").with_path("rpc");
        assert_eq!(config.endpoint().unwrap().as_str(), "http://localhost:8080/api/rpc");

        let config = HttpConfig::new("http://localhost:8080/jsonrpc").with_path("");
        assert_eq!(config.endpoint().unwrap().as_str(), "http://localhost:8080/jsonrpc");
    }

    #[test]
    fn test_endpoint_rejects_garbage() {
        let config = HttpConfig::new("://nowhere");
        assert!(matches!(config.endpoint(), Err(McpError::Transport(_))));
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_url() {
        let mut transport = HttpTransport::new(HttpConfig::new("not a url"));
        assert!(transport.connect().await.is_err());
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut transport = HttpTransport::new(HttpConfig::new(format!("http://{addr}")));
        transport.connect().await.unwrap();
        let err = transport
            .send_request("tools/list", Value::Null, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Transport(_)));
        assert_eq!(transport.correlator.pending_count(), 0);
    }
}
