//! Subprocess transport: newline-delimited JSON over a child's stdio.
//!
//! Three background tasks per connection: a read loop on stdout, a drain on
//! stderr (so the child never blocks on a full pipe), and a supervisor that
//! owns the [`Child`] and reports its exit.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;

use super::{Transport, TransportKind, dispatch_incoming, response_into_result};
use crate::codec;
use crate::correlator::Correlator;
use crate::error::{McpError, Result};
use crate::protocol::{JsonRpcNotification, JsonRpcRequest, Message};

/// Longest stdout line accepted from the server (16 MiB).
const MAX_LINE_LENGTH: usize = 16 * 1024 * 1024;

/// How much trailing stderr output is kept for error reports.
const STDERR_TAIL_BYTES: usize = 8 * 1024;

/// How long to wait for the stderr drain to finish after the child exits.
const STDERR_FLUSH_TIMEOUT: Duration = Duration::from_millis(500);

/// How long a failed write waits for the supervisor to report an exit.
const EXIT_REPORT_WAIT: Duration = Duration::from_millis(500);

/// Default time `close()` waits for the child to exit before killing it.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// How to launch the server process.
#[derive(Debug, Clone, PartialEq)]
pub struct StdioCommand {
    /// Program to execute.
    pub program: String,
    /// Arguments to pass to the program.
    pub args: Vec<String>,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
    /// Working directory for the child.
    pub cwd: Option<PathBuf>,
    /// Time `connect()` waits to see whether the child dies on startup.
    pub startup_grace: Duration,
    /// Time `close()` waits for exit before killing.
    pub shutdown_grace: Duration,
}

impl StdioCommand {
    /// Create a command for `program` with no arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
            startup_grace: Duration::ZERO,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    /// Launch a Python server script the way it is deployed: `uv run <file>`
    /// from the script's directory.
    pub fn from_script(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());

        let mut command = Self::new("uv").with_arg("run").with_arg(file_name);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            command = command.with_cwd(parent);
        }
        command
    }

    /// Interpret a target string: a `.py` script path, or a whitespace
    /// separated command line.
    pub fn from_target(target: &str) -> Self {
        let target = target.trim();
        if target.ends_with(".py") && !target.contains(char::is_whitespace) {
            return Self::from_script(target);
        }

        let mut parts = target.split_whitespace();
        let program = parts.next().unwrap_or_default();
        Self::new(program).with_args(parts.map(str::to_string).collect())
    }

    /// Add an argument.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Replace the arguments.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Add an environment variable.
    pub fn with_env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Set the working directory.
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Set the startup grace period.
    pub fn with_startup_grace(mut self, grace: Duration) -> Self {
        self.startup_grace = grace;
        self
    }

    /// Set the shutdown grace period.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}

impl fmt::Display for StdioCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// How the server process ended.
#[derive(Debug, Clone)]
pub struct ServerExit {
    /// Exit status, if it could be collected.
    pub status: Option<ExitStatus>,
    /// Tail of the server's stderr output.
    pub stderr: String,
    /// Whether the exit followed a `close()`.
    pub requested: bool,
}

impl ServerExit {
    /// Exit code, if the process exited normally.
    pub fn code(&self) -> Option<i32> {
        self.status.and_then(|s| s.code())
    }

    fn describe(&self) -> String {
        match self.status {
            Some(status) => format!("server process exited ({})", status),
            None => "server process exited (status unknown)".to_string(),
        }
    }

    fn to_error(&self) -> McpError {
        McpError::server_unavailable(self.describe(), self.stderr.clone())
    }
}

#[derive(Default)]
struct StderrTail {
    buf: String,
}

impl StderrTail {
    fn push(&mut self, line: &str) {
        self.buf.push_str(line);
        if !line.ends_with('\n') {
            self.buf.push('\n');
        }
        if self.buf.len() > STDERR_TAIL_BYTES {
            let mut cut = self.buf.len() - STDERR_TAIL_BYTES;
            while !self.buf.is_char_boundary(cut) {
                cut += 1;
            }
            self.buf.drain(..cut);
        }
    }

    fn contents(&self) -> String {
        self.buf.clone()
    }
}

struct StdioConnection {
    pid: Option<u32>,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    exit_rx: watch::Receiver<Option<ServerExit>>,
    shutdown: CancellationToken,
    supervisor: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl StdioConnection {
    fn exit(&self) -> Option<ServerExit> {
        self.exit_rx.borrow().clone()
    }

    async fn wait_for_exit(&self, within: Duration) -> Option<ServerExit> {
        let mut rx = self.exit_rx.clone();
        match tokio::time::timeout(within, rx.wait_for(Option::is_some)).await {
            Ok(Ok(exit)) => (*exit).clone(),
            _ => None,
        }
    }

    async fn write_line(&self, line: &str) -> std::io::Result<()> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "server stdin already closed")
        })?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await
    }

    /// A cancellation caused by the child dying reports the exit instead.
    fn explain_cancel(&self, err: McpError) -> McpError {
        match (&err, self.exit()) {
            (McpError::Cancelled { .. }, Some(exit)) if !exit.requested => exit.to_error(),
            _ => err,
        }
    }

    /// Error for a failed write: the exit report if the child died, else the IO error.
    async fn write_error(&self, err: std::io::Error) -> McpError {
        match self.wait_for_exit(EXIT_REPORT_WAIT).await {
            Some(exit) => exit.to_error(),
            None => McpError::transport(format!("failed to write to server stdin: {}", err)),
        }
    }
}

/// Transport that talks to a locally spawned server over stdio.
pub struct StdioTransport {
    command: StdioCommand,
    correlator: Arc<Correlator>,
    conn: Option<StdioConnection>,
}

impl StdioTransport {
    /// Create an unconnected transport; `connect()` spawns the process.
    pub fn new(command: StdioCommand) -> Self {
        Self {
            command,
            correlator: Arc::new(Correlator::new()),
            conn: None,
        }
    }

    /// The command this transport launches.
    pub fn command(&self) -> &StdioCommand {
        &self.command
    }

    /// OS process id of the running server.
    pub fn pid(&self) -> Option<u32> {
        self.conn.as_ref().and_then(|c| c.pid)
    }

    /// Exit report, once the server process has ended.
    pub fn exit(&self) -> Option<ServerExit> {
        self.conn.as_ref().and_then(StdioConnection::exit)
    }

    fn connection(&self) -> Result<&StdioConnection> {
        self.conn
            .as_ref()
            .ok_or_else(|| McpError::transport("stdio transport is not connected"))
    }

    fn spawn_child(&self) -> Result<Child> {
        let mut cmd = Command::new(&self.command.program);
        cmd.args(&self.command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for (key, value) in &self.command.env {
            cmd.env(key, value);
        }
        if let Some(cwd) = &self.command.cwd {
            cmd.current_dir(cwd);
        }

        cmd.spawn().map_err(|e| {
            McpError::spawn_failed(format!("failed to spawn '{}': {}", self.command, e))
        })
    }
}

#[async_trait]
impl Transport for StdioTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    async fn connect(&mut self) -> Result<()> {
        if self.conn.is_some() {
            return Ok(());
        }

        let mut child = self.spawn_child()?;
        let pid = child.id();

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::spawn_failed("failed to capture stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::spawn_failed("failed to capture stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| McpError::spawn_failed("failed to capture stderr"))?;

        self.correlator.reopen();

        let tail = Arc::new(Mutex::new(StderrTail::default()));
        let shutdown = CancellationToken::new();
        let (exit_tx, exit_rx) = watch::channel(None);

        let stderr_task = tokio::spawn(drain_stderr(stderr, Arc::clone(&tail), pid));
        let reader = tokio::spawn(read_stdout(stdout, Arc::clone(&self.correlator), pid));
        let supervisor = tokio::spawn(supervise(Supervision {
            child,
            pid,
            grace: self.command.shutdown_grace,
            shutdown: shutdown.clone(),
            stderr_task,
            tail,
            correlator: Arc::clone(&self.correlator),
            exit_tx,
        }));

        tracing::info!(command = %self.command, pid = ?pid, "spawned tool server");

        self.conn = Some(StdioConnection {
            pid,
            stdin: tokio::sync::Mutex::new(Some(stdin)),
            exit_rx,
            shutdown,
            supervisor,
            reader,
        });

        let grace = self.command.startup_grace;
        if !grace.is_zero() {
            let died = match &self.conn {
                Some(conn) => conn.wait_for_exit(grace).await,
                None => None,
            };
            if let Some(exit) = died {
                self.close().await?;
                return Err(exit.to_error());
            }
        }

        Ok(())
    }

    async fn send_request(&self, method: &str, params: Value, timeout: Duration) -> Result<Value> {
        let conn = self.connection()?;
        if let Some(exit) = conn.exit() {
            return Err(exit.to_error());
        }

        let id = self.correlator.next_id();
        let line = codec::encode_line(&Message::from(JsonRpcRequest::new(id, method, params)))?;
        let pending = self
            .correlator
            .register(id, method)
            .map_err(|e| conn.explain_cancel(e))?;

        tracing::debug!(id, method, "sending request");
        if let Err(e) = conn.write_line(&line).await {
            self.correlator.discard(id);
            return Err(conn.write_error(e).await);
        }

        let response = self
            .correlator
            .await_response(pending, timeout)
            .await
            .map_err(|e| conn.explain_cancel(e))?;
        response_into_result(response)
    }

    async fn send_notification(&self, method: &str, params: Value) -> Result<()> {
        let conn = self.connection()?;
        if let Some(exit) = conn.exit() {
            return Err(exit.to_error());
        }

        let line = codec::encode_line(&Message::from(JsonRpcNotification::new(method, params)))?;
        tracing::debug!(method, "sending notification");
        match conn.write_line(&line).await {
            Ok(()) => Ok(()),
            Err(e) => Err(conn.write_error(e).await),
        }
    }

    async fn close(&mut self) -> Result<()> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };

        self.correlator.shutdown();
        // Closing stdin is the polite shutdown signal.
        conn.stdin.lock().await.take();
        conn.shutdown.cancel();

        if let Err(e) = conn.supervisor.await {
            tracing::warn!(pid = ?conn.pid, error = %e, "supervisor task failed");
        }
        conn.reader.abort();

        tracing::info!(pid = ?conn.pid, "stdio transport closed");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.conn.as_ref().is_some_and(|c| c.exit().is_none())
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.correlator.shutdown();
            // The supervisor finishes the grace/kill sequence in the background;
            // if the runtime is gone, kill_on_drop reaps the child.
            conn.shutdown.cancel();
            conn.reader.abort();
        }
    }
}

async fn read_stdout(stdout: ChildStdout, correlator: Arc<Correlator>, pid: Option<u32>) {
    let mut lines = FramedRead::new(stdout, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));

    while let Some(line) = lines.next().await {
        match line {
            Ok(line) => dispatch_incoming(&line, &correlator, TransportKind::Stdio),
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                tracing::warn!(pid = ?pid, max = MAX_LINE_LENGTH, "discarding oversized line from server");
            }
            Err(LinesCodecError::Io(e)) => {
                tracing::warn!(pid = ?pid, error = %e, "error reading server stdout");
                break;
            }
        }
    }

    tracing::debug!(pid = ?pid, "server stdout closed");
}

async fn drain_stderr(stderr: ChildStderr, tail: Arc<Mutex<StderrTail>>, pid: Option<u32>) {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                tracing::debug!(pid = ?pid, line = %line.trim_end(), "server stderr");
                tail.lock().push(&line);
            }
            Err(e) => {
                tracing::debug!(pid = ?pid, error = %e, "error reading server stderr");
                break;
            }
        }
    }
}

struct Supervision {
    child: Child,
    pid: Option<u32>,
    grace: Duration,
    shutdown: CancellationToken,
    stderr_task: JoinHandle<()>,
    tail: Arc<Mutex<StderrTail>>,
    correlator: Arc<Correlator>,
    exit_tx: watch::Sender<Option<ServerExit>>,
}

async fn supervise(sup: Supervision) {
    let Supervision {
        mut child,
        pid,
        grace,
        shutdown,
        stderr_task,
        tail,
        correlator,
        exit_tx,
    } = sup;

    let exited = tokio::select! {
        status = child.wait() => Some(status),
        _ = shutdown.cancelled() => None,
    };

    let requested = exited.is_none();
    let status = match exited {
        Some(status) => status,
        None => terminate(&mut child, grace, pid).await,
    };

    // Collect whatever the child wrote to stderr before it went away.
    if tokio::time::timeout(STDERR_FLUSH_TIMEOUT, stderr_task)
        .await
        .is_err()
    {
        tracing::debug!(pid = ?pid, "stderr drain did not finish");
    }

    let exit = ServerExit {
        status: status.ok(),
        stderr: tail.lock().contents(),
        requested,
    };

    if requested {
        tracing::debug!(pid = ?pid, status = ?exit.status, "tool server stopped");
    } else {
        tracing::warn!(
            pid = ?pid,
            status = ?exit.status,
            stderr = %exit.stderr.trim_end(),
            "tool server exited unexpectedly"
        );
    }

    exit_tx.send_replace(Some(exit));
    // Fail in-flight calls now instead of at their deadline.
    correlator.shutdown();
}

async fn terminate(child: &mut Child, grace: Duration, pid: Option<u32>) -> std::io::Result<ExitStatus> {
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            tracing::warn!(pid = ?pid, grace_ms = grace.as_millis() as u64, "tool server did not exit in time, killing");
            child.kill().await?;
            child.wait().await
        }
    }
}
