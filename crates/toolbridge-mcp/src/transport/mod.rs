//! Transport layer for tool-server communication.
//!
//! Three interchangeable implementations share the [`Transport`] contract:
//!
//! - [`StdioTransport`]: spawn a child process, newline-delimited JSON on stdio
//! - [`WebSocketTransport`]: one JSON message per text frame, usually to a
//!   `toolbridge-relay` instance
//! - [`HttpTransport`]: one JSON message per POST body
//!
//! Every transport owns one [`Correlator`](crate::correlator::Correlator); the
//! handshake semantics live in [`Session`](crate::session::Session).

mod http;
mod stdio;
mod websocket;

pub use http::{DEFAULT_HTTP_PATH, HttpConfig, HttpTransport};
pub use stdio::{ServerExit, StdioCommand, StdioTransport};
pub use websocket::{WebSocketConfig, WebSocketTransport};

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::codec;
use crate::correlator::Correlator;
use crate::error::{McpError, Result};
use crate::protocol::{JsonRpcResponse, Message};

/// Which concrete channel a transport uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Child process stdio.
    Stdio,
    /// WebSocket connection.
    WebSocket,
    /// HTTP POST per message.
    Http,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdio => write!(f, "stdio"),
            Self::WebSocket => write!(f, "websocket"),
            Self::Http => write!(f, "http"),
        }
    }
}

/// Request/response mechanics over one channel.
///
/// Transports know nothing about the handshake; they encode, write, and
/// correlate.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Which channel this is.
    fn kind(&self) -> TransportKind;

    /// Acquire the underlying channel. Calling it on a connected transport is a no-op.
    async fn connect(&mut self) -> Result<()>;

    /// Send a request with a fresh id and wait at most `timeout` for its response.
    ///
    /// Returns the `result` member, or [`McpError::ServerError`] when the
    /// response carries `error`.
    async fn send_request(&self, method: &str, params: Value, timeout: Duration)
    -> Result<Value>;

    /// Send a notification. Returns once the write completes.
    async fn send_notification(&self, method: &str, params: Value) -> Result<()>;

    /// Release the channel and cancel in-flight requests. Idempotent.
    async fn close(&mut self) -> Result<()>;

    /// Whether the channel is currently usable.
    fn is_connected(&self) -> bool;
}

/// Map a response onto the request's outcome.
pub(crate) fn response_into_result(response: JsonRpcResponse) -> Result<Value> {
    response
        .into_result()
        .map_err(|e| McpError::server_error(e.code, e.message, e.data))
}

/// Handle one inbound line or frame from a streaming transport.
///
/// Responses go to the correlator; anything else is logged and dropped.
/// Malformed input never tears the transport down.
pub(crate) fn dispatch_incoming(text: &str, correlator: &Correlator, kind: TransportKind) {
    if text.trim().is_empty() {
        return;
    }

    match codec::decode_line(text) {
        Ok(Message::Response(response)) => {
            correlator.deliver(response);
        }
        Ok(Message::Notification(note)) => {
            tracing::debug!(transport = %kind, method = %note.method, "ignoring server notification");
        }
        Ok(Message::Request(req)) => {
            tracing::debug!(
                transport = %kind,
                id = req.id,
                method = %req.method,
                "ignoring server-initiated request"
            );
        }
        Err(e) => {
            tracing::warn!(transport = %kind, error = %e, line = %truncate(text, 200), "discarding malformed message");
        }
    }
}

fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Where the tool server lives.
#[derive(Debug, Clone, PartialEq)]
pub enum Endpoint {
    /// Spawn a local process.
    Stdio(StdioCommand),
    /// Connect to a WebSocket relay.
    WebSocket(WebSocketConfig),
    /// POST to an HTTP endpoint.
    Http(HttpConfig),
}

impl Endpoint {
    /// Interpret a configured target.
    ///
    /// `ws://` / `wss://` URLs select the WebSocket transport, `http://` /
    /// `https://` URLs the HTTP transport; anything else is a local command
    /// or script path (see [`StdioCommand::from_target`]).
    pub fn parse(target: &str) -> Result<Self> {
        let target = target.trim();
        if target.is_empty() {
            return Err(McpError::transport("empty endpoint"));
        }

        let lower = target.to_ascii_lowercase();
        if lower.starts_with("ws://") || lower.starts_with("wss://") {
            Ok(Self::WebSocket(WebSocketConfig::new(target)))
        } else if lower.starts_with("http://") || lower.starts_with("https://") {
            Ok(Self::Http(HttpConfig::new(target)))
        } else {
            Ok(Self::Stdio(StdioCommand::from_target(target)))
        }
    }

    /// Which transport this endpoint needs.
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Stdio(_) => TransportKind::Stdio,
            Self::WebSocket(_) => TransportKind::WebSocket,
            Self::Http(_) => TransportKind::Http,
        }
    }

    /// Build an unconnected transport for this endpoint.
    pub fn into_transport(self) -> Box<dyn Transport> {
        match self {
            Self::Stdio(command) => Box::new(StdioTransport::new(command)),
            Self::WebSocket(config) => Box::new(WebSocketTransport::new(config)),
            Self::Http(config) => Box::new(HttpTransport::new(config)),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdio(command) => write!(f, "{}", command),
            Self::WebSocket(config) => write!(f, "{}", config.url),
            Self::Http(config) => write!(f, "{}", config.url),
        }
    }
}
