//! Error types for the relay.

use std::net::SocketAddr;

use thiserror::Error;

/// Result type for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Relay error type.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The listen socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: SocketAddr,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },

    /// The per-connection child process could not be started.
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        /// Command line that failed.
        command: String,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },

    /// Any other IO failure while serving.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RelayError::Spawn {
            command: "uv run main.py".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        assert!(err.to_string().contains("uv run main.py"));

        let err = RelayError::Bind {
            addr: "0.0.0.0:8765".parse().unwrap(),
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        };
        assert!(err.to_string().contains("0.0.0.0:8765"));
    }
}
