//! In-memory connector for tests and embedding.
//!
//! Every successful connection attempt hands the server side of
//! the new connection to whoever holds the accept receiver, which can then
//! read outbound frames, push inbound frames and kill the connection.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    discovery::Endpoint,
    error::TransportError,
    protocol::Inbound,
    stats::ClientStats,
    transport::{Connector, Opened, Transport},
};

/// Connector producing in-process connections.
pub struct ChannelConnector {
    accepted: mpsc::UnboundedSender<ServerEnd>,
    refuse: AtomicUsize,
    sessions: AtomicU64,
}

impl ChannelConnector {
    /// Create a connector and the receiver of accepted connections.
    #[must_use]
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<ServerEnd>) {
        let (accepted, rx) = mpsc::unbounded_channel();
        let connector = Self {
            accepted,
            refuse: AtomicUsize::new(0),
            sessions: AtomicU64::new(0),
        };
        (connector, rx)
    }

    /// Fail the next `n` connection attempts.
    pub fn refuse_next(&self, n: usize) {
        self.refuse.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for ChannelConnector {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        stats: Arc<ClientStats>,
    ) -> Result<Opened, TransportError> {
        if self
            .refuse
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(TransportError::Status {
                status: 503,
                body: "connection refused".into(),
            });
        }

        let n = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        let session_id = format!("mem-{n}");
        let post_url = format!("{}/messages?session_id={session_id}", endpoint.base_url);

        let alive = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (server_tx, mut server_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let reader_alive = Arc::clone(&alive);
        let reader_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                let text = tokio::select! {
                    () = reader_cancel.cancelled() => break,
                    text = server_rx.recv() => match text {
                        Some(text) => text,
                        None => break,
                    },
                };
                match Inbound::parse(&text) {
                    Ok(frame) => {
                        let _ = inbound_tx.send(frame);
                    }
                    Err(e) => {
                        stats.record_malformed_frame();
                        tracing::warn!(error = %e, "Skipping malformed frame");
                    }
                }
            }
            reader_alive.store(false, Ordering::SeqCst);
        });

        let server = ServerEnd {
            session_id: session_id.clone(),
            outbound: outbound_rx,
            inbound: Some(server_tx),
            alive: Arc::clone(&alive),
        };
        self.accepted
            .send(server)
            .map_err(|_| TransportError::Closed)?;

        Ok(Opened {
            transport: Arc::new(ChannelTransport {
                outbound: outbound_tx,
                alive,
                cancel,
            }),
            inbound: inbound_rx,
            session_id: Some(session_id),
            post_url,
        })
    }
}

struct ChannelTransport {
    outbound: mpsc::UnboundedSender<Value>,
    alive: Arc<AtomicBool>,
    cancel: CancellationToken,
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, frame: &Value) -> Result<(), TransportError> {
        if !self.is_alive() {
            return Err(TransportError::Closed);
        }
        self.outbound
            .send(frame.clone())
            .map_err(|_| TransportError::Closed)
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && !self.cancel.is_cancelled()
    }

    async fn close(&self) {
        self.cancel.cancel();
        self.alive.store(false, Ordering::SeqCst);
    }
}

/// Server side of an in-memory connection.
pub struct ServerEnd {
    pub session_id: String,
    outbound: mpsc::UnboundedReceiver<Value>,
    inbound: Option<mpsc::UnboundedSender<String>>,
    alive: Arc<AtomicBool>,
}

impl ServerEnd {
    /// Next frame the client sent, `None` once the client side is gone.
    pub async fn recv(&mut self) -> Option<Value> {
        self.outbound.recv().await
    }

    /// Push raw event data to the client. Returns false if the connection
    /// is gone.
    pub fn send_raw(&self, data: impl Into<String>) -> bool {
        self.inbound
            .as_ref()
            .is_some_and(|tx| tx.send(data.into()).is_ok())
    }

    /// Answer request `id` with `result`.
    pub fn respond(&self, id: &str, result: Value) -> bool {
        self.send_raw(json!({"jsonrpc": "2.0", "id": id, "result": result}).to_string())
    }

    /// Answer request `id` with a JSON-RPC error.
    pub fn respond_error(&self, id: &str, code: i64, message: &str) -> bool {
        self.send_raw(
            json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}})
                .to_string(),
        )
    }

    /// Issue a reverse call to the client.
    pub fn reverse_call(&self, call_id: &str, tool: &str, input: Value) -> bool {
        self.send_raw(json!({"call_id": call_id, "tool": tool, "input": input}).to_string())
    }

    /// Drop the connection as if the network went away.
    pub fn kill(&mut self) {
        self.inbound = None;
        self.alive.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}
