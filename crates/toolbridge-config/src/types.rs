//! Configuration types mapping to the TOML schema.
//!
//! ```toml
//! [client]
//! endpoint = "server/main.py"      # script path, ws://, or http(s):// URL
//! timeout_secs = 30
//!
//! [relay]
//! port = 8765
//! command = ["uv", "run", "main.py"]
//!
//! [logging]
//! file = true
//! ```
//!
//! Every field is optional so partial layers (a project-local override, a
//! single env var) merge cleanly. Accessors supply the defaults.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default per-call timeout.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
/// Default relay listen port.
pub const DEFAULT_RELAY_PORT: u16 = 8765;
/// Default relay listen host.
pub const DEFAULT_RELAY_HOST: &str = "0.0.0.0";
/// Default relay child command.
pub const DEFAULT_RELAY_COMMAND: &[&str] = &["uv", "run", "main.py"];
/// Default name reported in `clientInfo`.
pub const DEFAULT_CLIENT_NAME: &str = "toolbridge";

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolbridgeConfig {
    /// Client session settings (`[client]`).
    pub client: ClientConfig,
    /// Bridge relay settings (`[relay]`).
    pub relay: RelaySettings,
    /// Log output settings (`[logging]`).
    pub logging: LoggingConfig,
}

impl ToolbridgeConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> crate::Result<Self> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Merge another config on top of this one (other takes priority).
    pub fn merge(&mut self, other: ToolbridgeConfig) {
        self.client.merge(other.client);
        self.relay.merge(other.relay);
        self.logging.merge(other.logging);
    }

    /// Reject values that parse but can never work.
    pub fn validate(&self) -> crate::Result<()> {
        if self.client.timeout_secs == Some(0) {
            return Err(crate::ConfigError::invalid(
                "client.timeout_secs",
                "0",
                "timeout must be at least one second",
            ));
        }
        if let Some(command) = &self.relay.command
            && command.iter().all(|part| part.trim().is_empty())
        {
            return Err(crate::ConfigError::invalid(
                "relay.command",
                format!("{command:?}"),
                "command must not be empty",
            ));
        }
        Ok(())
    }
}

/// Replace `base` when `other` carries a value.
fn overlay<T>(base: &mut Option<T>, other: Option<T>) {
    if other.is_some() {
        *base = other;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────────────────────────

/// Client-side session settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// Local script path, command line, `ws://` or `http(s)://` URL.
    pub endpoint: Option<String>,
    /// Per-call response timeout in seconds.
    pub timeout_secs: Option<u64>,
    /// Pause after a WebSocket connect before the handshake, in milliseconds.
    pub connect_grace_ms: Option<u64>,
    /// Early-exit check window after spawning a local server, in milliseconds.
    pub startup_grace_ms: Option<u64>,
    /// Path appended to an `http(s)://` endpoint.
    pub http_path: Option<String>,
    /// Name reported in `clientInfo`.
    pub client_name: Option<String>,
    /// Version reported in `clientInfo`.
    pub client_version: Option<String>,
}

impl ClientConfig {
    fn merge(&mut self, other: ClientConfig) {
        overlay(&mut self.endpoint, other.endpoint);
        overlay(&mut self.timeout_secs, other.timeout_secs);
        overlay(&mut self.connect_grace_ms, other.connect_grace_ms);
        overlay(&mut self.startup_grace_ms, other.startup_grace_ms);
        overlay(&mut self.http_path, other.http_path);
        overlay(&mut self.client_name, other.client_name);
        overlay(&mut self.client_version, other.client_version);
    }

    /// Per-call timeout, defaulting to 30 seconds.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS))
    }

    pub fn connect_grace(&self) -> Option<Duration> {
        self.connect_grace_ms.map(Duration::from_millis)
    }

    pub fn startup_grace(&self) -> Option<Duration> {
        self.startup_grace_ms.map(Duration::from_millis)
    }

    pub fn client_name(&self) -> &str {
        self.client_name.as_deref().unwrap_or(DEFAULT_CLIENT_NAME)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Relay
// ─────────────────────────────────────────────────────────────────────────────

/// Bridge relay settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelaySettings {
    /// Listen host.
    pub host: Option<String>,
    /// Listen port.
    pub port: Option<u16>,
    /// Child command line, program first.
    pub command: Option<Vec<String>>,
    /// Working directory for each child.
    pub cwd: Option<PathBuf>,
    /// Seconds a child gets to exit after its stdin closes before it is killed.
    pub shutdown_grace_secs: Option<u64>,
    /// Largest accepted WebSocket message, in bytes.
    pub max_message_size: Option<usize>,
}

impl RelaySettings {
    fn merge(&mut self, other: RelaySettings) {
        overlay(&mut self.host, other.host);
        overlay(&mut self.port, other.port);
        overlay(&mut self.command, other.command);
        overlay(&mut self.cwd, other.cwd);
        overlay(&mut self.shutdown_grace_secs, other.shutdown_grace_secs);
        overlay(&mut self.max_message_size, other.max_message_size);
    }

    pub fn host(&self) -> &str {
        self.host.as_deref().unwrap_or(DEFAULT_RELAY_HOST)
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_RELAY_PORT)
    }

    /// Child command line, defaulting to `uv run main.py`.
    pub fn command(&self) -> Vec<String> {
        match &self.command {
            Some(command) => command.clone(),
            None => DEFAULT_RELAY_COMMAND.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn shutdown_grace(&self) -> Option<Duration> {
        self.shutdown_grace_secs.map(Duration::from_secs)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging
// ─────────────────────────────────────────────────────────────────────────────

/// Log output settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Write a daily-rolling JSON log file. On by default.
    pub file: Option<bool>,
    /// Directory for log files. Defaults to `logs/` under the config dir.
    pub dir: Option<PathBuf>,
}

impl LoggingConfig {
    fn merge(&mut self, other: LoggingConfig) {
        overlay(&mut self.file, other.file);
        overlay(&mut self.dir, other.dir);
    }

    pub fn file_enabled(&self) -> bool {
        self.file.unwrap_or(true)
    }
}
