//! WebSocket transport: one JSON-RPC message per text frame.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::{Transport, TransportKind, dispatch_incoming, response_into_result};
use crate::codec;
use crate::correlator::Correlator;
use crate::error::{McpError, Result};
use crate::protocol::{JsonRpcNotification, JsonRpcRequest, Message};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Default pause after the socket opens, giving a relay time to start its
/// subprocess before the first request.
pub const DEFAULT_CONNECT_GRACE: Duration = Duration::from_millis(500);

/// Default bound on establishing the socket.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// WebSocket endpoint settings.
#[derive(Debug, Clone, PartialEq)]
pub struct WebSocketConfig {
    /// `ws://` or `wss://` URL.
    pub url: String,
    /// Pause after connecting, before `connect()` returns.
    pub connect_grace: Duration,
    /// Bound on the opening handshake.
    pub connect_timeout: Duration,
}

impl WebSocketConfig {
    /// Settings for `url` with default timings.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_grace: DEFAULT_CONNECT_GRACE,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Set the post-connect grace period.
    pub fn with_connect_grace(mut self, grace: Duration) -> Self {
        self.connect_grace = grace;
        self
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

struct WsConnection {
    sink: Mutex<SplitSink<WsStream, WsMessage>>,
    reader: JoinHandle<()>,
}

/// Transport over a WebSocket connection.
pub struct WebSocketTransport {
    config: WebSocketConfig,
    correlator: Arc<Correlator>,
    conn: Option<WsConnection>,
}

impl WebSocketTransport {
    /// Create an unconnected transport.
    pub fn new(config: WebSocketConfig) -> Self {
        Self {
            config,
            correlator: Arc::new(Correlator::new()),
            conn: None,
        }
    }

    /// The endpoint settings.
    pub fn config(&self) -> &WebSocketConfig {
        &self.config
    }

    async fn send_text(&self, text: String) -> Result<()> {
        let conn = self
            .conn
            .as_ref()
            .ok_or_else(|| McpError::transport("websocket transport is not connected"))?;
        conn.sink
            .lock()
            .await
            .send(WsMessage::Text(text.into()))
            .await
            .map_err(|e| McpError::transport(format!("websocket send failed: {}", e)))
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }

    async fn connect(&mut self) -> Result<()> {
        if self.conn.is_some() {
            return Ok(());
        }

        let url = self.config.url.as_str();
        let (stream, _response) =
            match tokio::time::timeout(self.config.connect_timeout, connect_async(url)).await {
                Ok(Ok(connected)) => connected,
                Ok(Err(e)) => {
                    return Err(McpError::transport(format!(
                        "failed to connect to {}: {}",
                        url, e
                    )));
                }
                Err(_) => {
                    return Err(McpError::transport(format!(
                        "timed out connecting to {} after {}ms",
                        url,
                        self.config.connect_timeout.as_millis()
                    )));
                }
            };

        self.correlator.reopen();
        let (sink, stream) = stream.split();
        let reader = tokio::spawn(read_frames(stream, Arc::clone(&self.correlator)));

        tracing::info!(url = %url, "websocket connected");
        self.conn = Some(WsConnection {
            sink: Mutex::new(sink),
            reader,
        });

        if !self.config.connect_grace.is_zero() {
            tokio::time::sleep(self.config.connect_grace).await;
        }
        Ok(())
    }

    async fn send_request(&self, method: &str, params: Value, timeout: Duration) -> Result<Value> {
        if self.correlator.is_closed() && self.conn.is_some() {
            return Err(McpError::transport("websocket connection closed"));
        }

        let id = self.correlator.next_id();
        let frame = codec::encode_frame(&Message::from(JsonRpcRequest::new(id, method, params)))?;
        let pending = self.correlator.register(id, method)?;

        tracing::debug!(id, method, "sending request");
        if let Err(e) = self.send_text(frame).await {
            self.correlator.discard(id);
            return Err(e);
        }

        let response = self.correlator.await_response(pending, timeout).await?;
        response_into_result(response)
    }

    async fn send_notification(&self, method: &str, params: Value) -> Result<()> {
        let frame = codec::encode_frame(&Message::from(JsonRpcNotification::new(method, params)))?;
        tracing::debug!(method, "sending notification");
        self.send_text(frame).await
    }

    async fn close(&mut self) -> Result<()> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };

        self.correlator.shutdown();
        let mut sink = conn.sink.into_inner();
        if let Err(e) = sink.send(WsMessage::Close(None)).await {
            tracing::debug!(error = %e, "websocket close frame not sent");
        }
        let _ = sink.close().await;
        conn.reader.abort();

        tracing::info!(url = %self.config.url, "websocket transport closed");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.conn.is_some() && !self.correlator.is_closed()
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.correlator.shutdown();
            conn.reader.abort();
        }
    }
}

async fn read_frames(mut stream: SplitStream<WsStream>, correlator: Arc<Correlator>) {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => {
                dispatch_incoming(text.as_str(), &correlator, TransportKind::WebSocket);
            }
            Ok(WsMessage::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                Ok(text) => dispatch_incoming(text, &correlator, TransportKind::WebSocket),
                Err(_) => tracing::warn!(len = bytes.len(), "discarding non-UTF-8 binary frame"),
            },
            Ok(WsMessage::Close(frame)) => {
                tracing::debug!(?frame, "server closed websocket");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "websocket read failed");
                break;
            }
        }
    }

    // Peer is gone; fail in-flight calls now.
    correlator.shutdown();
}
