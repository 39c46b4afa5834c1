//! Session over WebSocket through a live relay that spawns the mock server.

use std::net::SocketAddr;
use std::time::Duration;

use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use toolbridge_mcp::{
    FailureKind, Session, SessionConfig, SessionState, TransportKind, WebSocketConfig,
    WebSocketTransport,
};
use toolbridge_relay::{Relay, RelayConfig, RelayState};

async fn start_relay(args: &[&str]) -> (SocketAddr, RelayState, oneshot::Sender<()>) {
    let mut config = RelayConfig::new(env!("CARGO_BIN_EXE_mock-tool-server"))
        .with_shutdown_grace(Duration::from_secs(2));
    for arg in args {
        config = config.with_arg(*arg);
    }

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let relay = Relay::new(config);
    let state = relay.state();
    let (stop, stopped) = oneshot::channel::<()>();

    tokio::spawn(async move {
        let _ = relay
            .serve(listener, async {
                let _ = stopped.await;
            })
            .await;
    });

    (addr, state, stop)
}

fn transport(addr: SocketAddr) -> Box<WebSocketTransport> {
    Box::new(WebSocketTransport::new(
        WebSocketConfig::new(format!("ws://{addr}")).with_connect_grace(Duration::from_millis(50)),
    ))
}

#[tokio::test]
async fn test_session_through_relay() {
    let (addr, _state, stop) = start_relay(&["--single-tool"]).await;

    let mut session = Session::connect(
        transport(addr),
        SessionConfig::default().with_timeout(Duration::from_secs(10)),
    )
    .await
    .unwrap();
    assert_eq!(session.transport_kind(), TransportKind::WebSocket);
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.tools().len(), 1);
    assert_eq!(session.tools()[0].name, "search_tables_by_name");

    let output = session
        .call_tool("search_tables_by_name", json!({"name_pattern": "ORD%"}))
        .await
        .into_result()
        .unwrap();
    assert_eq!(
        output.content,
        json!("Tables matching 'ORD%':\nORDERS\nORDER_ITEMS")
    );

    session.close().await.unwrap();
    let _ = stop.send(());
}

#[tokio::test]
async fn test_noise_through_relay_is_ignored() {
    let (addr, _state, stop) = start_relay(&["--notify", "--stray-response", "--garbage"]).await;

    let mut session = Session::connect(transport(addr), SessionConfig::default())
        .await
        .unwrap();
    let output = session
        .call_tool("echo", json!({"message": "through the relay"}))
        .await
        .into_result()
        .unwrap();
    assert_eq!(output.text().as_deref(), Some("through the relay"));

    session.close().await.unwrap();
    let _ = stop.send(());
}

#[tokio::test]
async fn test_server_crash_behind_relay_fails_call_promptly() {
    let (addr, _state, stop) = start_relay(&[]).await;

    let mut session = Session::connect(
        transport(addr),
        SessionConfig::default().with_timeout(Duration::from_secs(20)),
    )
    .await
    .unwrap();

    let started = std::time::Instant::now();
    let failure = session
        .call_tool("crash", json!({}))
        .await
        .into_result()
        .unwrap_err();
    // The relay closes the socket when the child exits.
    assert_eq!(failure.kind, FailureKind::Unavailable);
    assert!(started.elapsed() < Duration::from_secs(10));

    session.close().await.unwrap();
    let _ = stop.send(());
}

#[tokio::test]
async fn test_closing_session_releases_relay_child() {
    let (addr, state, stop) = start_relay(&[]).await;

    let mut session = Session::connect(transport(addr), SessionConfig::default())
        .await
        .unwrap();
    assert_eq!(state.active_connections(), 1);

    session.close().await.unwrap();

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while state.active_connections() > 0 && std::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(state.active_connections(), 0);
    let _ = stop.send(());
}
