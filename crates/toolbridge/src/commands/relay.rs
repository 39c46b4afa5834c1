//! Relay command - serves a stdio tool server over WebSocket.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::Args;
use toolbridge_config::RelaySettings;
use toolbridge_relay::{Relay, RelayConfig};

use super::Context;

/// Arguments for the relay command.
#[derive(Args, Debug)]
pub struct RelayArgs {
    /// Port to listen on (default: 8765)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Address to bind (default: 0.0.0.0)
    #[arg(long)]
    pub host: Option<String>,

    /// Seconds a child gets to exit after disconnect before it is killed
    #[arg(long, value_name = "SECS")]
    pub grace_secs: Option<u64>,

    /// Command to run per connection (default: uv run main.py)
    #[arg(last = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

/// Build the relay configuration from settings and flags.
fn relay_config(args: RelayArgs, settings: &RelaySettings) -> Result<RelayConfig> {
    let host = args.host.as_deref().unwrap_or_else(|| settings.host());
    let ip: IpAddr = host
        .parse()
        .with_context(|| format!("invalid bind host '{host}', expected an IP address"))?;
    let port = args.port.unwrap_or_else(|| settings.port());

    let command = if args.command.is_empty() {
        settings.command()
    } else {
        args.command
    };

    let mut config = RelayConfig::default()
        .with_bind_address(SocketAddr::new(ip, port))
        .with_command(command);
    if let Some(cwd) = &settings.cwd {
        config = config.with_cwd(cwd.clone());
    }
    if let Some(grace) = args
        .grace_secs
        .map(Duration::from_secs)
        .or_else(|| settings.shutdown_grace())
    {
        config = config.with_shutdown_grace(grace);
    }
    if let Some(size) = settings.max_message_size {
        config = config.with_max_message_size(size);
    }
    Ok(config)
}

/// Run the relay command until Ctrl-C.
pub async fn run(args: RelayArgs, ctx: &Context) -> Result<()> {
    let config = relay_config(args, &ctx.config.relay)?;
    let addr = config.bind_address;
    let command = config.command_line();

    if !ctx.json_output {
        eprintln!("Relaying ws://{} to `{}`", addr, command);
    }

    Relay::new(config)
        .run_with_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .with_context(|| format!("relay on {addr} failed"))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> RelayArgs {
        RelayArgs {
            port: None,
            host: None,
            grace_secs: None,
            command: Vec::new(),
        }
    }

    #[test]
    fn test_defaults() {
        let config = relay_config(args(), &RelaySettings::default()).unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:8765".parse::<SocketAddr>().unwrap());
        assert_eq!(config.command_line(), "uv run main.py");
    }

    #[test]
    fn test_flags_override_settings() {
        let settings = RelaySettings {
            port: Some(9000),
            command: Some(vec!["python".into(), "server.py".into()]),
            shutdown_grace_secs: Some(10),
            ..RelaySettings::default()
        };
        let config = relay_config(
            RelayArgs {
                port: Some(9100),
                host: Some("127.0.0.1".into()),
                grace_secs: Some(1),
                command: vec!["cat".into()],
            },
            &settings,
        )
        .unwrap();

        assert_eq!(config.bind_address, "127.0.0.1:9100".parse::<SocketAddr>().unwrap());
        assert_eq!(config.command_line(), "cat");
        assert_eq!(config.shutdown_grace, Duration::from_secs(1));
    }

    #[test]
    fn test_settings_used_without_flags() {
        let settings = RelaySettings {
            port: Some(9000),
            command: Some(vec!["python".into(), "server.py".into()]),
            cwd: Some("/srv/tools".into()),
            max_message_size: Some(4096),
            ..RelaySettings::default()
        };
        let config = relay_config(args(), &settings).unwrap();
        assert_eq!(config.bind_address.port(), 9000);
        assert_eq!(config.command_line(), "python server.py");
        assert_eq!(config.cwd, Some(std::path::PathBuf::from("/srv/tools")));
        assert_eq!(config.max_message_size, 4096);
    }

    #[test]
    fn test_hostname_rejected() {
        let mut a = args();
        a.host = Some("localhost".into());
        assert!(relay_config(a, &RelaySettings::default()).is_err());
    }
}
