//! WebSocket upgrade handler: one fresh child process per connection.

use std::net::SocketAddr;
use std::process::Stdio;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade, close_code};
use axum::extract::{ConnectInfo, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt, future};
use tokio::process::{Child, Command};

use crate::bridge::{BridgeOptions, ConnectionId, Frame, run_bridge};
use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use crate::state::RelayState;

/// GET / - WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<RelayState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    let max = state.config().max_message_size;
    ws.max_message_size(max)
        .max_frame_size(max)
        .on_upgrade(move |socket| handle_socket(socket, state, addr))
}

/// Start the configured tool server with piped stdio.
pub fn spawn_child(config: &RelayConfig) -> Result<Child> {
    let mut cmd = Command::new(&config.program);
    cmd.args(&config.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (key, value) in &config.env {
        cmd.env(key, value);
    }
    if let Some(cwd) = &config.cwd {
        cmd.current_dir(cwd);
    }

    cmd.spawn().map_err(|source| RelayError::Spawn {
        command: config.command_line(),
        source,
    })
}

async fn handle_socket(mut socket: WebSocket, state: RelayState, addr: SocketAddr) {
    let connection_id = ConnectionId::new();
    let _active = state.track_connection();

    let child = match spawn_child(state.config()) {
        Ok(child) => child,
        Err(e) => {
            tracing::error!(%connection_id, remote_addr = %addr, error = %e, "failed to start tool server");
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: close_code::ERROR,
                    reason: Utf8Bytes::from_static("tool server unavailable"),
                })))
                .await;
            return;
        }
    };

    tracing::info!(
        %connection_id,
        remote_addr = %addr,
        pid = ?child.id(),
        command = %state.config().command_line(),
        "connection bridged to new tool server"
    );

    let (sender, receiver) = socket.split();

    let inbound = receiver
        .take_while(move |msg| {
            let open = match msg {
                Ok(Message::Close(_)) => false,
                Ok(_) => true,
                Err(e) => {
                    tracing::debug!(%connection_id, error = %e, "websocket read failed");
                    false
                }
            };
            future::ready(open)
        })
        .filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Frame::Text(text.as_str().to_owned())),
                Ok(Message::Binary(data)) => Some(Frame::Binary(data.to_vec())),
                _ => None,
            })
        });

    let outbound = sender.with(|line: String| future::ready(Ok::<_, axum::Error>(Message::Text(line.into()))));

    let options = BridgeOptions {
        grace: state.config().shutdown_grace,
        max_line_length: state.config().max_message_size,
    };
    run_bridge(
        connection_id,
        inbound,
        outbound,
        child,
        state.shutdown_token().child_token(),
        options,
    )
    .await;
}
