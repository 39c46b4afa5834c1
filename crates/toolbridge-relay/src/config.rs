//! Relay configuration.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Default listen port.
pub const DEFAULT_PORT: u16 = 8765;

/// Default time a child gets to exit after its peer leaves (5 seconds).
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Default max WebSocket message size (1 MB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Relay configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    /// Address to listen on.
    pub bind_address: SocketAddr,

    /// Program started for every connection.
    pub program: String,

    /// Arguments for the program.
    pub args: Vec<String>,

    /// Working directory for the child.
    pub cwd: Option<PathBuf>,

    /// Extra environment for the child.
    pub env: Vec<(String, String)>,

    /// Time the child gets to exit after stdin closes before it is killed.
    pub shutdown_grace: Duration,

    /// Maximum WebSocket message size in bytes; also bounds one stdout line.
    pub max_message_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            program: "uv".to_string(),
            args: vec!["run".to_string(), "main.py".to_string()],
            cwd: None,
            env: Vec::new(),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl RelayConfig {
    /// Config that runs `program` for every connection.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            ..Default::default()
        }
    }

    /// Set program and arguments from a command vector. An empty vector keeps
    /// the current command.
    pub fn with_command(mut self, command: Vec<String>) -> Self {
        let mut parts = command.into_iter();
        if let Some(program) = parts.next() {
            self.program = program;
            self.args = parts.collect();
        }
        self
    }

    /// Add an argument.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Set the bind address.
    pub fn with_bind_address(mut self, addr: SocketAddr) -> Self {
        self.bind_address = addr;
        self
    }

    /// Set the listen port, keeping the host.
    pub fn with_port(mut self, port: u16) -> Self {
        self.bind_address.set_port(port);
        self
    }

    /// Set the child's working directory.
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Add an environment variable for the child.
    pub fn with_env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Set the shutdown grace period.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Set the maximum WebSocket message size.
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Program and arguments joined for display.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}
