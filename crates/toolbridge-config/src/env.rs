//! Environment variable overrides.
//!
//! | variable | field |
//! |---|---|
//! | `TOOLBRIDGE_ENDPOINT`, `MCP_SERVER_PATH` | `client.endpoint` |
//! | `TOOLBRIDGE_TIMEOUT_SECS` | `client.timeout_secs` |
//! | `TOOLBRIDGE_RELAY_PORT`, `MCP_WS_PORT` | `relay.port` |
//! | `TOOLBRIDGE_RELAY_COMMAND` | `relay.command` (split on whitespace) |
//!
//! The first name in each row wins over its alias. Empty values are ignored.

use crate::error::{ConfigError, Result};
use crate::types::ToolbridgeConfig;

pub const ENDPOINT_ENV: &str = "TOOLBRIDGE_ENDPOINT";
pub const ENDPOINT_ALIAS_ENV: &str = "MCP_SERVER_PATH";
pub const TIMEOUT_ENV: &str = "TOOLBRIDGE_TIMEOUT_SECS";
pub const RELAY_PORT_ENV: &str = "TOOLBRIDGE_RELAY_PORT";
pub const RELAY_PORT_ALIAS_ENV: &str = "MCP_WS_PORT";
pub const RELAY_COMMAND_ENV: &str = "TOOLBRIDGE_RELAY_COMMAND";

/// Apply overrides from the process environment.
pub fn apply_env(config: &mut ToolbridgeConfig) -> Result<()> {
    apply_env_with(config, |key| std::env::var(key).ok())
}

/// Apply overrides using `lookup` to read variables.
pub fn apply_env_with<F>(config: &mut ToolbridgeConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |names: &[&str]| -> Option<(String, String)> {
        names.iter().find_map(|name| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .map(|v| (name.to_string(), v))
        })
    };

    if let Some((_, endpoint)) = get(&[ENDPOINT_ENV, ENDPOINT_ALIAS_ENV]) {
        config.client.endpoint = Some(endpoint);
    }

    if let Some((key, raw)) = get(&[TIMEOUT_ENV]) {
        let secs: u64 = raw
            .parse()
            .map_err(|_| ConfigError::invalid(&key, &raw, "expected whole seconds"))?;
        if secs == 0 {
            return Err(ConfigError::invalid(
                key,
                raw,
                "timeout must be at least one second",
            ));
        }
        config.client.timeout_secs = Some(secs);
    }

    if let Some((key, raw)) = get(&[RELAY_PORT_ENV, RELAY_PORT_ALIAS_ENV]) {
        let port: u16 = raw
            .parse()
            .map_err(|_| ConfigError::invalid(&key, &raw, "expected a port number"))?;
        config.relay.port = Some(port);
    }

    if let Some((_, raw)) = get(&[RELAY_COMMAND_ENV]) {
        config.relay.command = Some(raw.split_whitespace().map(str::to_string).collect());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn apply(vars: &[(&str, &str)]) -> Result<ToolbridgeConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut config = ToolbridgeConfig::new();
        apply_env_with(&mut config, |key| vars.get(key).cloned())?;
        Ok(config)
    }

    #[test]
    fn test_no_vars_changes_nothing() {
        assert_eq!(apply(&[]).unwrap(), ToolbridgeConfig::new());
    }

    #[test]
    fn test_endpoint_alias() {
        let config = apply(&[("MCP_SERVER_PATH", "server/main.py")]).unwrap();
        assert_eq!(config.client.endpoint.as_deref(), Some("server/main.py"));
    }

    #[test]
    fn test_primary_name_beats_alias() {
        let config = apply(&[
            ("TOOLBRIDGE_RELAY_PORT", "9000"),
            ("MCP_WS_PORT", "9100"),
            ("TOOLBRIDGE_ENDPOINT", "ws://relay:9000"),
            ("MCP_SERVER_PATH", "server/main.py"),
        ])
        .unwrap();
        assert_eq!(config.relay.port(), 9000);
        assert_eq!(config.client.endpoint.as_deref(), Some("ws://relay:9000"));
    }

    #[test]
    fn test_empty_value_falls_through_to_alias() {
        let config = apply(&[("TOOLBRIDGE_RELAY_PORT", ""), ("MCP_WS_PORT", "9100")]).unwrap();
        assert_eq!(config.relay.port(), 9100);
    }

    #[test]
    fn test_timeout_and_command() {
        let config = apply(&[
            ("TOOLBRIDGE_TIMEOUT_SECS", "45"),
            ("TOOLBRIDGE_RELAY_COMMAND", "python  -u server.py"),
        ])
        .unwrap();
        assert_eq!(config.client.timeout_secs, Some(45));
        assert_eq!(config.relay.command(), vec!["python", "-u", "server.py"]);
    }

    #[test]
    fn test_invalid_port() {
        let err = apply(&[("MCP_WS_PORT", "70000")]).unwrap_err();
        match err {
            ConfigError::InvalidValue { key, value, .. } => {
                assert_eq!(key, "MCP_WS_PORT");
                assert_eq!(value, "70000");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_invalid_timeout() {
        assert!(apply(&[("TOOLBRIDGE_TIMEOUT_SECS", "soon")]).is_err());
        assert!(apply(&[("TOOLBRIDGE_TIMEOUT_SECS", "0")]).is_err());
    }
}
