//! Connection lifecycle.
//!
//! ```text
//! Disconnected -> Connecting -> Registering -> Connected
//!                     ^                            |
//!                     +---------- Backoff <--------+  (any failure)
//! ```
//!
//! The supervisor is the only owner of the live [`Connection`]. It
//! publishes each new connection through a watch channel and never mutates
//! one in place; a reconnect replaces it.

use std::{sync::Arc, time::Duration};

use serde_json::Value;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::{ClientConfig, ToolRegistration},
    correlation::Correlator,
    discovery::{Discovery, Endpoint},
    error::{ClientError, TransportError},
    protocol::{Inbound, ReverseCall, is_error_result, registration_params},
    stats::ClientStats,
    transport::{Connector, Transport},
};

/// Supervisor state, published on every transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorState {
    Disconnected,
    Connecting,
    Registering,
    Connected,
    /// Waiting before the next attempt.
    Backoff { delay: Duration },
    /// Shut down; terminal.
    Stopped,
}

/// Doubling reconnect delay with a ceiling.
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    next: Duration,
}

impl Backoff {
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        let max = max.max(min);
        Self { min, max, next: min }
    }

    /// Delay to wait now; doubles the following one up to the ceiling.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = self.next.saturating_mul(2).min(self.max);
        delay
    }

    /// Back to the minimum, on a successful connection.
    pub const fn reset(&mut self) {
        self.next = self.min;
    }
}

/// One live connection. Replaced, never mutated, on reconnect.
pub struct Connection {
    generation: u64,
    transport: Arc<dyn Transport>,
    session_id: Option<String>,
    post_url: String,
    endpoint: Endpoint,
}

impl Connection {
    /// Monotonic connection counter, starting at 1.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    #[must_use]
    pub fn post_url(&self) -> &str {
        &self.post_url
    }

    #[must_use]
    pub const fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.transport.is_alive()
    }

    #[must_use]
    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Write one frame.
    ///
    /// # Errors
    /// Returns error if the transport rejects the frame.
    pub async fn send(&self, frame: &Value) -> Result<(), TransportError> {
        self.transport.send(frame).await
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("generation", &self.generation)
            .field("session_id", &self.session_id)
            .field("post_url", &self.post_url)
            .finish_non_exhaustive()
    }
}

/// Reverse call tagged with the connection it arrived on.
#[derive(Debug)]
pub(crate) struct QueuedCall {
    pub call: ReverseCall,
    pub generation: u64,
}

/// State shared between the supervisor, the dispatcher and client handles.
pub(crate) struct Shared {
    pub config: ClientConfig,
    pub registration: ToolRegistration,
    pub correlator: Correlator,
    pub stats: Arc<ClientStats>,
    pub connection: watch::Sender<Option<Arc<Connection>>>,
    pub state: watch::Sender<SupervisorState>,
}

struct Live {
    connection: Arc<Connection>,
    pump: JoinHandle<()>,
}

pub(crate) struct Supervisor {
    shared: Arc<Shared>,
    connector: Arc<dyn Connector>,
    discovery: Arc<dyn Discovery>,
    calls: mpsc::UnboundedSender<QueuedCall>,
    backoff: Backoff,
    generation: u64,
}

impl Supervisor {
    pub fn new(
        shared: Arc<Shared>,
        connector: Arc<dyn Connector>,
        discovery: Arc<dyn Discovery>,
        calls: mpsc::UnboundedSender<QueuedCall>,
    ) -> Self {
        let backoff = Backoff::new(shared.config.backoff_min(), shared.config.backoff_max());
        Self {
            shared,
            connector,
            discovery,
            calls,
            backoff,
            generation: 0,
        }
    }

    fn set_state(&self, state: SupervisorState) {
        tracing::debug!(?state, "Supervisor transition");
        self.shared.state.send_replace(state);
    }

    /// Drive the state machine until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            match self.connect_once(&cancel).await {
                Ok(Some(live)) => {
                    self.backoff.reset();
                    let lost = self.monitor(&live, &cancel).await;
                    self.teardown(live).await;
                    if !lost {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => tracing::warn!(error = %e, "Connection attempt failed"),
            }

            let delay = self.backoff.next_delay();
            self.set_state(SupervisorState::Backoff { delay });
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.set_state(SupervisorState::Stopped);
        tracing::info!("Supervisor stopped");
    }

    /// One pass through Connecting and Registering. `Ok(None)` means the
    /// stop signal fired.
    async fn connect_once(&mut self, cancel: &CancellationToken) -> Result<Option<Live>, ClientError> {
        self.set_state(SupervisorState::Connecting);

        let endpoint = tokio::select! {
            () = cancel.cancelled() => return Ok(None),
            endpoint = self.discovery.discover() => endpoint?,
        };
        let opened = tokio::select! {
            () = cancel.cancelled() => return Ok(None),
            opened = self.connector.connect(&endpoint, Arc::clone(&self.shared.stats)) => opened?,
        };

        self.generation += 1;
        let generation = self.generation;
        let connection = Arc::new(Connection {
            generation,
            transport: opened.transport,
            session_id: opened.session_id,
            post_url: opened.post_url,
            endpoint,
        });
        let pump = tokio::spawn(pump(
            opened.inbound,
            Arc::clone(&self.shared),
            self.calls.clone(),
            generation,
        ));
        let live = Live { connection, pump };
        self.shared
            .connection
            .send_replace(Some(Arc::clone(&live.connection)));

        self.set_state(SupervisorState::Registering);
        let registered = tokio::select! {
            () = cancel.cancelled() => None,
            result = self.register(&live.connection) => Some(result),
        };
        match registered {
            None => {
                self.teardown(live).await;
                Ok(None)
            }
            Some(Err(e)) => {
                self.teardown(live).await;
                Err(e)
            }
            Some(Ok(())) => {
                if generation > 1 {
                    self.shared.stats.record_reconnect();
                }
                self.set_state(SupervisorState::Connected);
                Ok(Some(live))
            }
        }
    }

    async fn register(&self, connection: &Connection) -> Result<(), ClientError> {
        let registration = &self.shared.registration;
        let params = registration_params(
            &registration.name,
            &registration.description,
            &registration.readme,
        );
        let result = async {
            let pending = self
                .shared
                .correlator
                .issue(connection.transport(), "tools/call", params)
                .await?;
            pending.wait(self.shared.config.registration_timeout()).await
        }
        .await
        .map_err(|e| ClientError::RegistrationFailed(e.to_string()))?;

        if is_error_result(&result) {
            return Err(ClientError::RegistrationFailed(result.to_string()));
        }
        tracing::info!(
            tool = %registration.name,
            session_id = ?connection.session_id(),
            generation = connection.generation(),
            "Registered remote tool"
        );
        Ok(())
    }

    /// Poll liveness while connected. Returns true if the connection was
    /// lost, false if the stop signal fired.
    async fn monitor(&self, live: &Live, cancel: &CancellationToken) -> bool {
        let mut interval = tokio::time::interval(self.shared.config.liveness_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                () = cancel.cancelled() => return false,
                _ = interval.tick() => {
                    if !live.connection.is_alive() || live.pump.is_finished() {
                        tracing::warn!(
                            generation = live.connection.generation(),
                            "Connection lost"
                        );
                        return true;
                    }
                }
            }
        }
    }

    async fn teardown(&self, live: Live) {
        let generation = live.connection.generation();
        self.shared.connection.send_if_modified(|current| {
            if current.as_ref().is_some_and(|c| c.generation == generation) {
                *current = None;
                true
            } else {
                false
            }
        });
        live.connection.transport.close().await;
        live.pump.abort();
        let failed = self.shared.correlator.fail_all();
        tracing::debug!(generation, failed, "Connection torn down");
    }
}

/// Route inbound frames: responses to the correlator, reverse calls to the
/// dispatcher queue.
async fn pump(
    mut inbound: mpsc::UnboundedReceiver<Inbound>,
    shared: Arc<Shared>,
    calls: mpsc::UnboundedSender<QueuedCall>,
    generation: u64,
) {
    while let Some(frame) = inbound.recv().await {
        match frame {
            Inbound::Response { id, outcome } => {
                shared.correlator.fulfill(&id, outcome);
            }
            Inbound::ReverseCall(call) => {
                tracing::debug!(call_id = %call.call_id, tool = %call.tool, "Queueing reverse call");
                if calls.send(QueuedCall { call, generation }).is_err() {
                    tracing::warn!("Dispatcher gone, dropping reverse call");
                }
            }
        }
    }
    tracing::debug!(generation, "Inbound stream closed");
}
