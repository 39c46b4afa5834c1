//! Error types for tool-server operations.

use std::time::Duration;

use thiserror::Error;

/// Result type for tool-server operations.
pub type Result<T> = std::result::Result<T, McpError>;

/// Error type for tool-server operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// Failed to spawn the server process.
    #[error("failed to spawn tool server: {0}")]
    SpawnFailed(String),

    /// The underlying channel failed: refused connection, closed socket,
    /// non-2xx HTTP status, broken pipe.
    #[error("transport error: {0}")]
    Transport(String),

    /// No response arrived before the deadline.
    #[error("timeout after {}ms waiting for response to '{method}'", .timeout.as_millis())]
    Timeout {
        /// Method of the request that timed out.
        method: String,
        /// The deadline that elapsed.
        timeout: Duration,
    },

    /// A line or body that does not decode into a JSON-RPC message.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// A well-formed response carrying an `error` object.
    #[error("server error {code}: {message}")]
    ServerError {
        /// Error code from the server.
        code: i64,
        /// Error message from the server.
        message: String,
        /// Optional additional data.
        data: Option<serde_json::Value>,
    },

    /// The session handshake failed at `step`.
    #[error("initialization failed during '{step}': {source}")]
    InitializationFailed {
        /// Handshake step that failed (`connect`, `initialize`, ...).
        step: &'static str,
        /// The underlying failure.
        #[source]
        source: Box<McpError>,
    },

    /// The server process is gone.
    #[error("server unavailable: {message}{}", stderr_suffix(.stderr))]
    ServerUnavailable {
        /// What happened to the server.
        message: String,
        /// Tail of the server's stderr output.
        stderr: String,
    },

    /// The pending call was cancelled because the transport was closed.
    #[error("request '{method}' cancelled: transport closed")]
    Cancelled {
        /// Method of the cancelled request.
        method: String,
    },

    /// Operation requires a session in the `Ready` state.
    #[error("session not ready (state: {state})")]
    NotReady {
        /// Current session state.
        state: String,
    },

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("; stderr: {}", trimmed)
    }
}

impl McpError {
    /// Create a spawn failed error.
    pub fn spawn_failed(msg: impl Into<String>) -> Self {
        Self::SpawnFailed(msg.into())
    }

    /// Create a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a malformed-message error.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedMessage(msg.into())
    }

    /// Create a server error from an error response.
    pub fn server_error(
        code: i64,
        message: impl Into<String>,
        data: Option<serde_json::Value>,
    ) -> Self {
        Self::ServerError {
            code,
            message: message.into(),
            data,
        }
    }

    /// Create a server-unavailable error with captured stderr.
    pub fn server_unavailable(message: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::ServerUnavailable {
            message: message.into(),
            stderr: stderr.into(),
        }
    }

    /// Wrap an error as a handshake failure at `step`.
    pub fn initialization(step: &'static str, source: McpError) -> Self {
        Self::InitializationFailed {
            step,
            source: Box::new(source),
        }
    }

    /// Captured stderr, if this error (or its handshake source) carries any.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Self::ServerUnavailable { stderr, .. } => Some(stderr),
            Self::InitializationFailed { source, .. } => source.stderr(),
            _ => None,
        }
    }

    /// Whether this error is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
