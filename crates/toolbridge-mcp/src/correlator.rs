//! Request/response correlation by id.
//!
//! Each transport owns one [`Correlator`]. A pending entry is registered
//! before the request is written, so a fast response can never arrive ahead
//! of its slot. Entries leave the table when the response is delivered, when
//! the deadline passes, or when the correlator is shut down.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{McpError, Result};
use crate::protocol::JsonRpcResponse;

struct PendingEntry {
    method: String,
    tx: oneshot::Sender<JsonRpcResponse>,
}

/// Handle for one registered request, consumed by [`Correlator::await_response`].
#[derive(Debug)]
pub struct PendingResponse {
    id: u64,
    method: String,
    rx: oneshot::Receiver<JsonRpcResponse>,
}

impl PendingResponse {
    /// Id of the request this handle waits for.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Method of the request this handle waits for.
    pub fn method(&self) -> &str {
        &self.method
    }
}

/// Pairs outgoing requests with their responses.
pub struct Correlator {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, PendingEntry>>,
    closed: AtomicBool,
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

impl Correlator {
    /// Create an empty correlator; the first id issued is 1.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Issue a fresh id, strictly greater than every id issued before.
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Create the pending entry for `id`.
    pub fn register(&self, id: u64, method: &str) -> Result<PendingResponse> {
        if self.is_closed() {
            return Err(McpError::Cancelled {
                method: method.to_string(),
            });
        }

        let (tx, rx) = oneshot::channel();
        let previous = self.pending.lock().insert(
            id,
            PendingEntry {
                method: method.to_string(),
                tx,
            },
        );
        if previous.is_some() {
            tracing::warn!(id, method, "request id registered twice, replacing stale entry");
        }

        Ok(PendingResponse {
            id,
            method: method.to_string(),
            rx,
        })
    }

    /// Wait for the response to `pending`, at most `deadline`.
    ///
    /// On timeout the entry is removed, so a late response is discarded by
    /// [`deliver`](Self::deliver) instead of leaking into a later call.
    pub async fn await_response(
        &self,
        pending: PendingResponse,
        deadline: Duration,
    ) -> Result<JsonRpcResponse> {
        let PendingResponse { id, method, rx } = pending;

        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(McpError::Cancelled { method }),
            Err(_) => {
                self.pending.lock().remove(&id);
                tracing::warn!(id, method = %method, timeout_ms = deadline.as_millis() as u64, "request timed out");
                Err(McpError::Timeout {
                    method,
                    timeout: deadline,
                })
            }
        }
    }

    /// Remove the entry for a request that never made it onto the wire.
    pub fn discard(&self, id: u64) {
        self.pending.lock().remove(&id);
    }

    /// Route a decoded response to its waiting caller.
    ///
    /// Returns `false` when no entry matches (unknown, timed-out, or already
    /// resolved id); the response is logged and dropped.
    pub fn deliver(&self, response: JsonRpcResponse) -> bool {
        let entry = self.pending.lock().remove(&response.id);
        match entry {
            Some(entry) => {
                let id = response.id;
                if entry.tx.send(response).is_err() {
                    // Receiver was dropped between timeout and removal.
                    tracing::debug!(id, method = %entry.method, "caller stopped waiting for response");
                    return false;
                }
                tracing::trace!(id, method = %entry.method, "response delivered");
                true
            }
            None => {
                tracing::warn!(
                    id = response.id,
                    is_error = response.is_error(),
                    "discarding response with no pending request"
                );
                false
            }
        }
    }

    /// Close the correlator and cancel every in-flight wait.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let drained: Vec<(u64, PendingEntry)> = self.pending.lock().drain().collect();
        for (id, entry) in drained {
            tracing::debug!(id, method = %entry.method, "cancelling pending request");
        }
    }

    /// Reopen after [`shutdown`](Self::shutdown), for transports that reconnect.
    /// Ids keep increasing across reopen.
    pub fn reopen(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of requests currently waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}
