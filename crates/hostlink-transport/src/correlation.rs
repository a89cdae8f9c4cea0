//! Request/response correlation.
//!
//! Flow:
//! 1. [`Correlator::issue`] registers a fresh id with a oneshot slot
//! 2. The request frame is written to the transport
//! 3. The caller awaits [`PendingRequest::wait`]
//! 4. The inbound pump calls [`Correlator::fulfill`] with the response
//! 5. The slot is removed under the lock before it is written, so each
//!    request is resolved exactly once
//!
//! A caller that times out or is dropped removes its own slot; a response
//! arriving afterwards finds no slot and is counted as late.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::{
    error::{ClientError, RpcError},
    protocol::RpcRequest,
    stats::ClientStats,
    transport::Transport,
};

type Slot = oneshot::Sender<Result<Value, RpcError>>;
type SlotMap = Arc<Mutex<HashMap<String, Slot>>>;

/// Tracks outstanding requests across the lifetime of the client.
pub struct Correlator {
    pending: SlotMap,
    stats: Arc<ClientStats>,
}

impl Correlator {
    #[must_use]
    pub fn new(stats: Arc<ClientStats>) -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            stats,
        }
    }

    /// Register a new request id without sending anything.
    #[must_use]
    pub fn register(&self, method: &str) -> PendingRequest {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id.clone(), tx);
        PendingRequest {
            id: id.clone(),
            method: method.to_string(),
            created: Instant::now(),
            rx,
            guard: SlotGuard {
                id,
                pending: Arc::clone(&self.pending),
            },
        }
    }

    /// Register a request and write it to `transport`.
    ///
    /// # Errors
    /// Returns error if the frame cannot be sent; the slot is released.
    pub async fn issue(
        &self,
        transport: &dyn Transport,
        method: &str,
        params: Value,
    ) -> Result<PendingRequest, ClientError> {
        let pending = self.register(method);
        let request = RpcRequest::new(pending.id(), method, params);
        let frame = serde_json::to_value(&request).map_err(crate::error::TransportError::from)?;
        tracing::debug!(id = %pending.id(), method, "Sending request");
        transport.send(&frame).await?;
        Ok(pending)
    }

    /// Deliver a response. Returns false when nobody was waiting for `id`.
    pub fn fulfill(&self, id: &str, outcome: Result<Value, RpcError>) -> bool {
        let slot = self.pending.lock().remove(id);
        let delivered = slot.is_some_and(|tx| tx.send(outcome).is_ok());
        if !delivered {
            self.stats.record_late_response();
            tracing::warn!(id, "Dropping response with no waiting request");
        }
        delivered
    }

    /// Fail every outstanding request with `ConnectionLost`.
    pub fn fail_all(&self) -> usize {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), "Failing outstanding requests");
        }
        // Dropping the senders wakes every waiter with a closed channel.
        drained.len()
    }

    /// Number of requests still waiting.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.pending.lock().len()
    }
}

/// Removes the slot when the pending request goes away unfulfilled.
struct SlotGuard {
    id: String,
    pending: SlotMap,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if self.pending.lock().remove(&self.id).is_some() {
            tracing::debug!(id = %self.id, "Removed abandoned request slot");
        }
    }
}

/// Handle on one outstanding request.
pub struct PendingRequest {
    id: String,
    method: String,
    created: Instant,
    rx: oneshot::Receiver<Result<Value, RpcError>>,
    guard: SlotGuard,
}

impl PendingRequest {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Time since the request was registered.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.created.elapsed()
    }

    /// Wait for the response.
    ///
    /// # Errors
    /// `Timeout` if nothing arrives within `timeout`, `ConnectionLost` if
    /// the connection died first, `Rpc` if the server answered with an error.
    pub async fn wait(self, timeout: Duration) -> Result<Value, ClientError> {
        let Self {
            method, rx, guard, ..
        } = self;
        let result = tokio::time::timeout(timeout, rx).await;
        drop(guard);
        match result {
            Ok(Ok(outcome)) => Ok(outcome?),
            Ok(Err(_)) => Err(ClientError::ConnectionLost),
            Err(_) => {
                tracing::warn!(%method, ?timeout, "Request timed out");
                Err(ClientError::Timeout {
                    method,
                    after: timeout,
                })
            }
        }
    }
}
