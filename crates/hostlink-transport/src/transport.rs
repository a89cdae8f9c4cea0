//! Transport seam and the SSE implementation.
//!
//! A [`Connector`] opens one connection per attempt. The opened
//! [`Transport`] sends outbound frames; inbound frames are classified by a
//! background reader and delivered on an unbounded channel. The channel
//! closing is the end-of-connection signal; no final error frame is emitted.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::{Url, header::ACCEPT};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::{
    discovery::Endpoint,
    error::TransportError,
    protocol::Inbound,
    sse::{SseEvent, SseParser},
    stats::ClientStats,
};

/// Outbound half of an open connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Write one outbound frame.
    ///
    /// # Errors
    /// Returns error if the frame could not be delivered.
    async fn send(&self, frame: &Value) -> Result<(), TransportError>;

    /// Whether the background reader is still running.
    fn is_alive(&self) -> bool;

    /// Stop the reader and release the connection. Best-effort.
    async fn close(&self);
}

/// A freshly opened connection.
pub struct Opened {
    pub transport: Arc<dyn Transport>,
    /// Classified inbound frames; closes when the connection ends.
    pub inbound: mpsc::UnboundedReceiver<Inbound>,
    /// Server-assigned session, taken from the announced endpoint.
    pub session_id: Option<String>,
    /// Where outbound frames are written.
    pub post_url: String,
}

/// Opens connections.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open one connection to `endpoint`. Malformed inbound frames are
    /// skipped and counted in `stats`.
    ///
    /// # Errors
    /// Returns error if the connection cannot be established.
    async fn connect(
        &self,
        endpoint: &Endpoint,
        stats: Arc<ClientStats>,
    ) -> Result<Opened, TransportError>;
}

/// Connector speaking MCP-style SSE: `GET {base}/sse` for inbound events,
/// `POST` to the announced endpoint for outbound frames.
#[derive(Clone)]
pub struct SseConnector {
    http: reqwest::Client,
    endpoint_timeout: Duration,
}

impl SseConnector {
    #[must_use]
    pub fn new(endpoint_timeout: Duration) -> Self {
        Self::with_client(reqwest::Client::new(), endpoint_timeout)
    }

    #[must_use]
    pub const fn with_client(http: reqwest::Client, endpoint_timeout: Duration) -> Self {
        Self {
            http,
            endpoint_timeout,
        }
    }
}

#[async_trait]
impl Connector for SseConnector {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        stats: Arc<ClientStats>,
    ) -> Result<Opened, TransportError> {
        let base = endpoint.base_url.trim_end_matches('/');
        let base_url = Url::parse(&format!("{base}/"))
            .map_err(|e| TransportError::InvalidEndpoint(format!("{base}: {e}")))?;

        let mut request = self
            .http
            .get(format!("{base}/sse"))
            .header(ACCEPT, "text/event-stream");
        if let Some(token) = &endpoint.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let alive = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();
        let (announce_tx, announce_rx) = oneshot::channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let reader = SseReader {
            base_url,
            announce: Some(announce_tx),
            inbound: inbound_tx,
            stats,
            alive: Arc::clone(&alive),
        };
        tokio::spawn(reader.run(response.bytes_stream(), cancel.clone()));

        let post_url = match tokio::time::timeout(self.endpoint_timeout, announce_rx).await {
            Ok(Ok(url)) => url,
            Ok(Err(_)) => {
                cancel.cancel();
                return Err(TransportError::Closed);
            }
            Err(_) => {
                cancel.cancel();
                return Err(TransportError::NoEndpoint(self.endpoint_timeout));
            }
        };

        let session_id = post_url
            .query_pairs()
            .find(|(key, _)| key == "session_id")
            .map(|(_, value)| value.into_owned());
        tracing::info!(%post_url, ?session_id, "Event stream connected");

        let transport = SseTransport {
            http: self.http.clone(),
            post_url: post_url.to_string(),
            token: endpoint.token.clone(),
            alive,
            cancel,
        };
        Ok(Opened {
            transport: Arc::new(transport),
            inbound: inbound_rx,
            session_id,
            post_url: post_url.to_string(),
        })
    }
}

struct SseReader {
    base_url: Url,
    announce: Option<oneshot::Sender<Url>>,
    inbound: mpsc::UnboundedSender<Inbound>,
    stats: Arc<ClientStats>,
    alive: Arc<AtomicBool>,
}

impl SseReader {
    async fn run<S>(mut self, stream: S, cancel: CancellationToken)
    where
        S: Stream<Item = Result<Bytes, reqwest::Error>> + Send,
    {
        let mut stream = std::pin::pin!(stream);
        let mut parser = SseParser::new();
        let mut pending = Vec::new();

        loop {
            let chunk = tokio::select! {
                () = cancel.cancelled() => break,
                chunk = stream.next() => chunk,
            };
            match chunk {
                Some(Ok(bytes)) => {
                    pending.extend_from_slice(&bytes);
                    let text = take_utf8(&mut pending);
                    for event in parser.feed(&text) {
                        self.handle(event);
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Event stream read failed");
                    break;
                }
                None => {
                    tracing::debug!("Event stream ended");
                    if let Some(event) = parser.flush() {
                        self.handle(event);
                    }
                    break;
                }
            }
        }

        self.alive.store(false, Ordering::SeqCst);
    }

    fn handle(&mut self, event: SseEvent) {
        match event.event.as_str() {
            "endpoint" => match self.base_url.join(event.data.trim()) {
                Ok(url) => {
                    if let Some(announce) = self.announce.take() {
                        let _ = announce.send(url);
                    } else {
                        tracing::debug!(%url, "Ignoring repeated endpoint announcement");
                    }
                }
                Err(e) => {
                    self.stats.record_malformed_frame();
                    tracing::warn!(data = %event.data, error = %e, "Bad endpoint announcement");
                }
            },
            "message" => match Inbound::parse(&event.data) {
                Ok(frame) => {
                    let _ = self.inbound.send(frame);
                }
                Err(e) => {
                    self.stats.record_malformed_frame();
                    tracing::warn!(error = %e, "Skipping malformed frame");
                }
            },
            other => tracing::debug!(event = other, "Ignoring SSE event"),
        }
    }
}

/// Take the longest valid UTF-8 prefix out of `pending`, leaving a split
/// multi-byte sequence behind for the next chunk.
fn take_utf8(pending: &mut Vec<u8>) -> String {
    match std::str::from_utf8(pending) {
        Ok(text) => {
            let text = text.to_owned();
            pending.clear();
            text
        }
        Err(e) if e.error_len().is_none() => {
            let rest = pending.split_off(e.valid_up_to());
            let text = String::from_utf8_lossy(pending).into_owned();
            *pending = rest;
            text
        }
        Err(_) => {
            let text = String::from_utf8_lossy(pending).into_owned();
            pending.clear();
            text
        }
    }
}

struct SseTransport {
    http: reqwest::Client,
    post_url: String,
    token: Option<String>,
    alive: Arc<AtomicBool>,
    cancel: CancellationToken,
}

#[async_trait]
impl Transport for SseTransport {
    async fn send(&self, frame: &Value) -> Result<(), TransportError> {
        if !self.is_alive() {
            return Err(TransportError::Closed);
        }
        let mut request = self.http.post(&self.post_url).json(frame);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && !self.cancel.is_cancelled()
    }

    async fn close(&self) {
        self.cancel.cancel();
        self.alive.store(false, Ordering::SeqCst);
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_utf8_keeps_split_sequence() {
        let bytes = "héllo".as_bytes();
        // Split inside the two-byte 'é'
        let mut pending = bytes[..2].to_vec();
        assert_eq!(take_utf8(&mut pending), "h");
        assert_eq!(pending.len(), 1);

        pending.extend_from_slice(&bytes[2..]);
        assert_eq!(take_utf8(&mut pending), "éllo");
        assert!(pending.is_empty());
    }

    #[test]
    fn test_take_utf8_replaces_invalid_bytes() {
        let mut pending = vec![b'a', 0xFF, b'b'];
        assert_eq!(take_utf8(&mut pending), "a\u{FFFD}b");
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_reader_announces_endpoint_and_classifies_frames() {
        let stats = Arc::new(ClientStats::new());
        let alive = Arc::new(AtomicBool::new(true));
        let (announce_tx, announce_rx) = oneshot::channel();
        let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel();
        let reader = SseReader {
            base_url: Url::parse("http://localhost:3000/").unwrap(),
            announce: Some(announce_tx),
            inbound: inbound_tx,
            stats: Arc::clone(&stats),
            alive: Arc::clone(&alive),
        };

        let body = concat!(
            "event: endpoint\ndata: /messages?session_id=s-1\n\n",
            "data: {\"id\":\"r1\",\"result\":{}}\n\n",
            "data: garbage\n\n",
            "data: {\"call_id\":\"c1\",\"tool\":\"host\",\"input\":{}}\n\n",
        );
        let chunks: Vec<Result<Bytes, reqwest::Error>> = body
            .as_bytes()
            .chunks(7)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        reader
            .run(futures::stream::iter(chunks), CancellationToken::new())
            .await;

        let url = announce_rx.await.unwrap();
        assert_eq!(url.as_str(), "http://localhost:3000/messages?session_id=s-1");
        assert!(matches!(inbound_rx.recv().await, Some(Inbound::Response { .. })));
        assert!(matches!(inbound_rx.recv().await, Some(Inbound::ReverseCall(_))));
        assert!(inbound_rx.recv().await.is_none());
        assert_eq!(stats.snapshot().malformed_frames, 1);
        assert!(!alive.load(Ordering::SeqCst));
    }
}
