//! Shared relay state.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio_util::sync::CancellationToken;

use crate::config::RelayConfig;

/// State shared by all handlers. Cheap to clone.
#[derive(Clone)]
pub struct RelayState {
    inner: Arc<RelayStateInner>,
}

struct RelayStateInner {
    config: RelayConfig,
    active: AtomicUsize,
    shutdown: CancellationToken,
}

impl RelayState {
    /// Create state for `config`.
    pub fn new(config: RelayConfig) -> Self {
        Self {
            inner: Arc::new(RelayStateInner {
                config,
                active: AtomicUsize::new(0),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Relay configuration.
    pub fn config(&self) -> &RelayConfig {
        &self.inner.config
    }

    /// Number of live bridges.
    pub fn active_connections(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Parent of every bridge's cancellation token.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.inner.shutdown
    }

    /// Count a connection until the returned guard is dropped.
    pub fn track_connection(&self) -> ActiveGuard {
        self.inner.active.fetch_add(1, Ordering::SeqCst);
        ActiveGuard {
            state: self.clone(),
        }
    }
}

/// Decrements the active-connection count on drop.
pub struct ActiveGuard {
    state: RelayState,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.state.inner.active.fetch_sub(1, Ordering::SeqCst);
    }
}
