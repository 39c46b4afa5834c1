//! The per-connection bridge between a socket and a child process.
//!
//! Three pumps run concurrently and share one [`CancellationToken`]:
//!
//! - inbound: socket frames → child stdin, one line per frame
//! - outbound: child stdout lines → socket, one text frame per line
//! - stderr: child stderr → log
//!
//! Whichever pump finishes first cancels the token; the others are dropped
//! at their next suspension point. The child then gets `grace` to exit on
//! its own before it is killed.

use std::fmt;
use std::future::Future;
use std::pin::pin;
use std::process::ExitStatus;
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Unique identifier for a bridged connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Create a new unique connection ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One inbound frame from the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Text frame; forwarded as one line.
    Text(String),
    /// Binary frame; forwarded unchanged.
    Binary(Vec<u8>),
}

/// Identifies a pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pump {
    /// Socket → child stdin.
    Inbound,
    /// Child stdout → socket.
    Outbound,
    /// Child stderr → log.
    Stderr,
    /// The relay is shutting down.
    Shutdown,
}

impl fmt::Display for Pump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
            Self::Stderr => "stderr",
            Self::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

/// How a bridge ended.
#[derive(Debug)]
pub struct BridgeReport {
    /// Connection this bridge served.
    pub connection_id: ConnectionId,
    /// Pump that finished first.
    pub first: Pump,
    /// Child exit status, if collected.
    pub exit: Option<ExitStatus>,
    /// Whether the child had to be killed after the grace period.
    pub killed: bool,
}

/// Bridge settings.
#[derive(Debug, Clone, Copy)]
pub struct BridgeOptions {
    /// Time the child gets to exit after stdin closes.
    pub grace: Duration,
    /// Longest stdout line forwarded.
    pub max_line_length: usize,
}

/// Run the three pumps until one finishes, then stop the child.
///
/// `token` is cancelled when the bridge ends; cancelling it from outside
/// (relay shutdown) ends the bridge too.
pub async fn run_bridge<I, O>(
    connection_id: ConnectionId,
    inbound: I,
    outbound: O,
    mut child: Child,
    token: CancellationToken,
    options: BridgeOptions,
) -> BridgeReport
where
    I: Stream<Item = Frame>,
    O: Sink<String>,
    O::Error: fmt::Display,
{
    let pid = child.id();
    let first = Mutex::new(None);

    match (child.stdin.take(), child.stdout.take(), child.stderr.take()) {
        (Some(stdin), Some(stdout), Some(stderr)) => {
            tokio::join!(
                guarded(Pump::Inbound, &first, &token, pump_inbound(connection_id, inbound, stdin)),
                guarded(
                    Pump::Outbound,
                    &first,
                    &token,
                    pump_outbound(connection_id, stdout, outbound, options.max_line_length),
                ),
                guarded(Pump::Stderr, &first, &token, drain_stderr(connection_id, stderr)),
            );
        }
        _ => {
            tracing::error!(%connection_id, "child process is missing a piped stdio handle");
            token.cancel();
        }
    }

    // Pumps are gone, so stdin is closed; the child may now exit by itself.
    let first = first.into_inner().unwrap_or(Pump::Shutdown);
    let (exit, killed) = stop_child(&mut child, options.grace, connection_id).await;

    tracing::info!(
        %connection_id,
        pid = ?pid,
        first = %first,
        exit = ?exit,
        killed,
        "bridge closed"
    );

    BridgeReport {
        connection_id,
        first,
        exit,
        killed,
    }
}

async fn guarded<F>(kind: Pump, first: &Mutex<Option<Pump>>, token: &CancellationToken, pump: F)
where
    F: Future<Output = ()>,
{
    tokio::select! {
        _ = token.cancelled() => {}
        _ = pump => {
            first.lock().get_or_insert(kind);
            token.cancel();
        }
    }
}

/// Ensure a text frame ends in exactly one newline.
pub fn normalize_line(text: &str) -> String {
    let mut line = text.trim_end_matches(['\n', '\r']).to_string();
    line.push('\n');
    line
}

async fn pump_inbound<I>(connection_id: ConnectionId, inbound: I, mut stdin: ChildStdin)
where
    I: Stream<Item = Frame>,
{
    let mut inbound = pin!(inbound);

    while let Some(frame) = inbound.next().await {
        let bytes = match frame {
            Frame::Text(text) => normalize_line(&text).into_bytes(),
            Frame::Binary(data) => data,
        };
        let written = async {
            stdin.write_all(&bytes).await?;
            stdin.flush().await
        };
        if let Err(e) = written.await {
            tracing::warn!(%connection_id, error = %e, "failed to write to child stdin");
            return;
        }
    }

    tracing::debug!(%connection_id, "peer disconnected");
}

async fn pump_outbound<O>(
    connection_id: ConnectionId,
    stdout: ChildStdout,
    outbound: O,
    max_line_length: usize,
) where
    O: Sink<String>,
    O::Error: fmt::Display,
{
    let mut outbound = pin!(outbound);
    let mut lines = FramedRead::new(stdout, LinesCodec::new_with_max_length(max_line_length));

    while let Some(line) = lines.next().await {
        match line {
            Ok(line) => {
                if let Err(e) = outbound.send(line).await {
                    tracing::debug!(%connection_id, error = %e, "failed to send frame to peer");
                    return;
                }
            }
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                tracing::warn!(%connection_id, max = max_line_length, "dropping oversized line from child");
            }
            Err(LinesCodecError::Io(e)) => {
                tracing::warn!(%connection_id, error = %e, "error reading child stdout");
                break;
            }
        }
    }

    tracing::debug!(%connection_id, "child stdout closed");
    if let Err(e) = outbound.close().await {
        tracing::debug!(%connection_id, error = %e, "failed to close socket");
    }
}

async fn drain_stderr(connection_id: ConnectionId, stderr: ChildStderr) {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                tracing::debug!(%connection_id, line = %line.trim_end(), "child stderr");
            }
            Err(e) => {
                tracing::debug!(%connection_id, error = %e, "error reading child stderr");
                break;
            }
        }
    }
}

async fn stop_child(
    child: &mut Child,
    grace: Duration,
    connection_id: ConnectionId,
) -> (Option<ExitStatus>, bool) {
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => (Some(status), false),
        Ok(Err(e)) => {
            tracing::warn!(%connection_id, error = %e, "failed to wait for child");
            (None, false)
        }
        Err(_) => {
            tracing::warn!(
                %connection_id,
                grace_ms = grace.as_millis() as u64,
                "child did not exit in time, killing"
            );
            if let Err(e) = child.kill().await {
                tracing::warn!(%connection_id, error = %e, "failed to kill child");
                return (None, true);
            }
            (child.wait().await.ok(), true)
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Stdio;
    use std::time::Instant;

    use futures::channel::mpsc;
    use tokio::process::Command;

    fn spawn(program: &str, args: &[&str]) -> Child {
        Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .unwrap()
    }

    fn options(grace: Duration) -> BridgeOptions {
        BridgeOptions {
            grace,
            max_line_length: 1024 * 1024,
        }
    }

    #[test]
    fn test_normalize_line() {
        assert_eq!(normalize_line("{}"), "{}\n");
        assert_eq!(normalize_line("{}\n"), "{}\n");
        assert_eq!(normalize_line("{}\r\n\n"), "{}\n");
        assert_eq!(normalize_line(""), "\n");
    }

    #[tokio::test]
    async fn test_frames_round_trip_through_cat() {
        let (in_tx, in_rx) = mpsc::unbounded::<Frame>();
        let (out_tx, mut out_rx) = mpsc::unbounded::<String>();
        let token = CancellationToken::new();

        let bridge = tokio::spawn(run_bridge(
            ConnectionId::new(),
            in_rx,
            out_tx,
            spawn("cat", &[]),
            token.clone(),
            options(Duration::from_secs(5)),
        ));

        in_tx.unbounded_send(Frame::Text(r#"{"id":1}"#.to_string())).unwrap();
        in_tx.unbounded_send(Frame::Text("{\"id\":2}\n".to_string())).unwrap();
        in_tx.unbounded_send(Frame::Binary(b"{\"id\":3}\n".to_vec())).unwrap();

        assert_eq!(out_rx.next().await.unwrap(), r#"{"id":1}"#);
        assert_eq!(out_rx.next().await.unwrap(), r#"{"id":2}"#);
        assert_eq!(out_rx.next().await.unwrap(), r#"{"id":3}"#);

        // Peer goes away: cat sees EOF and exits on its own.
        drop(in_tx);
        let report = bridge.await.unwrap();
        assert_eq!(report.first, Pump::Inbound);
        assert!(!report.killed);
        assert!(report.exit.unwrap().success());
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_child_ignoring_eof_is_killed_after_grace() {
        let (in_tx, in_rx) = mpsc::unbounded::<Frame>();
        let (out_tx, _out_rx) = mpsc::unbounded::<String>();

        let bridge = tokio::spawn(run_bridge(
            ConnectionId::new(),
            in_rx,
            out_tx,
            spawn("sh", &["-c", "trap '' TERM; sleep 30"]),
            CancellationToken::new(),
            options(Duration::from_millis(200)),
        ));

        let started = Instant::now();
        drop(in_tx);
        let report = tokio::time::timeout(Duration::from_secs(10), bridge)
            .await
            .expect("bridge did not finish")
            .unwrap();

        assert_eq!(report.first, Pump::Inbound);
        assert!(report.killed);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_child_exit_ends_bridge() {
        let (_in_tx, in_rx) = mpsc::unbounded::<Frame>();
        let (out_tx, mut out_rx) = mpsc::unbounded::<String>();

        let report = tokio::time::timeout(
            Duration::from_secs(10),
            run_bridge(
                ConnectionId::new(),
                in_rx,
                out_tx,
                spawn("sh", &["-c", "echo ready; echo oops >&2; exit 4"]),
                CancellationToken::new(),
                options(Duration::from_secs(5)),
            ),
        )
        .await
        .expect("bridge did not finish");

        assert!(matches!(report.first, Pump::Outbound | Pump::Stderr));
        assert_eq!(report.exit.and_then(|s| s.code()), Some(4));
        assert!(!report.killed);
        assert_eq!(out_rx.next().await.as_deref(), Some("ready"));
    }

    #[tokio::test]
    async fn test_external_cancel_stops_bridge() {
        let (_in_tx, in_rx) = mpsc::unbounded::<Frame>();
        let (out_tx, _out_rx) = mpsc::unbounded::<String>();
        let token = CancellationToken::new();

        let bridge = tokio::spawn(run_bridge(
            ConnectionId::new(),
            in_rx,
            out_tx,
            spawn("cat", &[]),
            token.clone(),
            options(Duration::from_secs(5)),
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();

        let report = tokio::time::timeout(Duration::from_secs(10), bridge)
            .await
            .expect("bridge did not finish")
            .unwrap();
        assert_eq!(report.first, Pump::Shutdown);
        assert!(!report.killed);
    }
}
