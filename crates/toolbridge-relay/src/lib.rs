//! Bridge relay: exposes a stdio tool server over WebSocket.
//!
//! Every accepted WebSocket connection gets its own freshly spawned child
//! process; nothing is shared between connections. Text frames from the
//! peer become lines on the child's stdin, and lines from the child's
//! stdout become text frames. When either side goes away the other is shut
//! down.
//!
//! # Example
//!
//! ```ignore
//! use toolbridge_relay::{Relay, RelayConfig};
//!
//! let config = RelayConfig::default()
//!     .with_command(vec!["uv".into(), "run".into(), "main.py".into()])
//!     .with_cwd("server");
//!
//! Relay::new(config).run_with_shutdown(async {
//!     let _ = tokio::signal::ctrl_c().await;
//! }).await?;
//! ```

pub mod bridge;
pub mod config;
pub mod error;
pub mod health;
pub mod state;
pub mod ws;

pub use bridge::{BridgeOptions, BridgeReport, ConnectionId, Frame, Pump, run_bridge};
pub use config::RelayConfig;
pub use error::{RelayError, Result};
pub use health::HealthResponse;
pub use state::RelayState;

use std::future::Future;
use std::net::SocketAddr;

use axum::Router;
use axum::routing::get;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

/// The WebSocket relay server.
pub struct Relay {
    state: RelayState,
}

impl Relay {
    /// Create a relay with the given configuration.
    pub fn new(config: RelayConfig) -> Self {
        Self {
            state: RelayState::new(config),
        }
    }

    /// Build the router: WebSocket upgrade at `/`, health probe at `/health`.
    pub fn router(&self) -> Router {
        Router::new()
            .merge(health::health_routes())
            .route("/", get(ws::ws_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Number of live bridged connections.
    pub fn active_connections(&self) -> usize {
        self.state.active_connections()
    }

    /// Handle on the shared state, for observing a relay after `serve` takes it.
    pub fn state(&self) -> RelayState {
        self.state.clone()
    }

    /// Get the configured bind address.
    pub fn bind_address(&self) -> SocketAddr {
        self.state.config().bind_address
    }

    /// Run until the process is killed.
    pub async fn run(self) -> Result<()> {
        self.run_with_shutdown(std::future::pending()).await
    }

    /// Bind the configured address and run until `signal` resolves.
    pub async fn run_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.bind_address();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| RelayError::Bind { addr, source })?;
        self.serve(listener, signal).await
    }

    /// Serve on an already-bound listener until `signal` resolves.
    ///
    /// On shutdown every live bridge is cancelled, which stops its child.
    pub async fn serve<F>(self, listener: TcpListener, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local = listener.local_addr()?;
        let shutdown = self.state.shutdown_token().clone();
        let router = self.router();

        info!(
            addr = %local,
            command = %self.state.config().command_line(),
            "relay listening"
        );

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            signal.await;
            info!("relay shutting down");
            shutdown.cancel();
        })
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_router_serves_health() {
        let relay = Relay::new(RelayConfig::new("cat"));
        let response = relay
            .router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_plain_get_on_ws_route_is_rejected() {
        let relay = Relay::new(RelayConfig::new("cat"));
        let response = relay
            .router()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status().is_client_error());
        assert_eq!(relay.active_connections(), 0);
    }

    #[tokio::test]
    async fn test_bind_error() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();

        let err = Relay::new(RelayConfig::new("cat").with_bind_address(addr))
            .run_with_shutdown(async {})
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Bind { .. }));
    }
}
