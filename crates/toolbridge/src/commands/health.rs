//! Health command - checks that a relay accepts WebSocket connections.
//!
//! Opens a connection and closes it again. Suitable as a container health
//! check: exit status is zero only if the handshake succeeded.

use std::time::Duration;

use anyhow::{Context as _, Result, anyhow};
use clap::Args;
use console::Style;
use serde::Serialize;
use tokio_tungstenite::connect_async;

use super::Context;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Arguments for the health command.
#[derive(Args, Debug)]
pub struct HealthArgs {
    /// Relay URL (default: ws://127.0.0.1:<relay port>)
    pub url: Option<String>,
}

#[derive(Debug, Serialize)]
struct HealthOutput {
    healthy: bool,
    url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn relay_url(args: &HealthArgs, ctx: &Context) -> String {
    args.url
        .clone()
        .unwrap_or_else(|| format!("ws://127.0.0.1:{}/", ctx.config.relay.port()))
}

async fn probe(url: &str) -> Result<()> {
    let (mut ws, _) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url))
        .await
        .map_err(|_| anyhow!("timed out after {}s", CONNECT_TIMEOUT.as_secs()))?
        .with_context(|| format!("cannot connect to {url}"))?;
    // Best effort; the open already proved the relay is up.
    let _ = ws.close(None).await;
    Ok(())
}

/// Run the health command.
pub async fn run(args: HealthArgs, ctx: &Context) -> Result<()> {
    let url = relay_url(&args, ctx);
    let result = probe(&url).await;

    if ctx.json_output {
        let output = HealthOutput {
            healthy: result.is_ok(),
            url: url.clone(),
            error: result.as_ref().err().map(|e| format!("{e:#}")),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        match &result {
            Ok(()) => println!("{} {}", Style::new().green().apply_to("● healthy"), url),
            Err(e) => eprintln!("{} {}: {:#}", Style::new().red().apply_to("● unhealthy"), url, e),
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolbridge_config::ToolbridgeConfig;

    #[test]
    fn test_default_url_uses_relay_port() {
        let mut config = ToolbridgeConfig::new();
        config.relay.port = Some(9100);
        let ctx = Context {
            config,
            json_output: false,
            verbose: false,
        };

        let url = relay_url(&HealthArgs { url: None }, &ctx);
        assert_eq!(url, "ws://127.0.0.1:9100/");

        let url = relay_url(
            &HealthArgs {
                url: Some("ws://relay:8765".to_string()),
            },
            &ctx,
        );
        assert_eq!(url, "ws://relay:8765");
    }
}
