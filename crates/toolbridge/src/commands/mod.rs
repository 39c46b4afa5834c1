//! CLI command handlers.

pub mod call;
pub mod health;
pub mod relay;
pub mod tools;

use anyhow::{Context as _, Result, bail};
use toolbridge_config::ToolbridgeConfig;
use toolbridge_mcp::{ClientInfo, Endpoint, Session, SessionConfig};

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Merged configuration with flag overrides applied.
    pub config: ToolbridgeConfig,
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
}

impl Context {
    /// Resolve the configured endpoint, applying client options.
    pub fn endpoint(&self) -> Result<Endpoint> {
        let client = &self.config.client;
        let Some(target) = client.endpoint.as_deref() else {
            bail!("no tool server configured; pass --endpoint or set TOOLBRIDGE_ENDPOINT");
        };

        let endpoint = Endpoint::parse(target)?;
        Ok(match endpoint {
            Endpoint::Stdio(mut command) => {
                if let Some(grace) = client.startup_grace() {
                    command = command.with_startup_grace(grace);
                }
                Endpoint::Stdio(command)
            }
            Endpoint::WebSocket(mut ws) => {
                if let Some(grace) = client.connect_grace() {
                    ws = ws.with_connect_grace(grace);
                }
                Endpoint::WebSocket(ws)
            }
            Endpoint::Http(mut http) => {
                if let Some(path) = &client.http_path {
                    http = http.with_path(path.clone());
                }
                Endpoint::Http(http)
            }
        })
    }

    /// Session settings from the client config.
    pub fn session_config(&self) -> SessionConfig {
        let client = &self.config.client;
        let version = client
            .client_version
            .clone()
            .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string());
        SessionConfig::default()
            .with_timeout(client.timeout())
            .with_client_info(ClientInfo::new(client.client_name(), version))
    }

    /// Connect and run the handshake.
    pub async fn connect(&self) -> Result<Session> {
        let endpoint = self.endpoint()?;
        let target = endpoint.to_string();
        tracing::debug!(endpoint = %target, transport = %endpoint.kind(), "connecting");

        Session::connect(endpoint.into_transport(), self.session_config())
            .await
            .with_context(|| format!("failed to connect to {target}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use toolbridge_mcp::TransportKind;

    fn ctx(endpoint: Option<&str>) -> Context {
        let mut config = ToolbridgeConfig::new();
        config.client.endpoint = endpoint.map(str::to_string);
        Context {
            config,
            json_output: false,
            verbose: false,
        }
    }

    #[test]
    fn test_missing_endpoint() {
        let err = ctx(None).endpoint().unwrap_err();
        assert!(err.to_string().contains("--endpoint"));
    }

    #[test]
    fn test_client_options_applied() {
        let mut c = ctx(Some("ws://localhost:8765"));
        c.config.client.connect_grace_ms = Some(10);
        let Endpoint::WebSocket(ws) = c.endpoint().unwrap() else {
            panic!("expected websocket endpoint");
        };
        assert_eq!(ws.connect_grace, Duration::from_millis(10));

        let mut c = ctx(Some("http://localhost:8080"));
        c.config.client.http_path = Some("/rpc".to_string());
        let Endpoint::Http(http) = c.endpoint().unwrap() else {
            panic!("expected http endpoint");
        };
        assert_eq!(http.path, "/rpc");

        let mut c = ctx(Some("server/main.py"));
        c.config.client.startup_grace_ms = Some(200);
        let endpoint = c.endpoint().unwrap();
        assert_eq!(endpoint.kind(), TransportKind::Stdio);
        let Endpoint::Stdio(command) = endpoint else {
            panic!("expected stdio endpoint");
        };
        assert_eq!(command.startup_grace, Duration::from_millis(200));
    }

    #[test]
    fn test_session_config_from_client() {
        let mut c = ctx(None);
        c.config.client.timeout_secs = Some(7);
        c.config.client.client_name = Some("table-agent".to_string());
        let session = c.session_config();
        assert_eq!(session.timeout, Duration::from_secs(7));
        assert_eq!(session.client_info.name, "table-agent");
        assert_eq!(session.client_info.version, env!("CARGO_PKG_VERSION"));
    }
}
