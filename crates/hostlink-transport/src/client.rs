//! Client facade: supervisor, dispatcher and request API in one handle.

use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::{ClientConfig, ToolRegistration},
    correlation::Correlator,
    discovery::Discovery,
    dispatch::{ToolHandler, run_dispatcher},
    error::ClientError,
    protocol::{ToolReply, tool_call_params},
    stats::{ClientStats, StatsSnapshot},
    supervisor::{Connection, Shared, Supervisor, SupervisorState},
    transport::Connector,
};

/// Handle on a running client. Cheap to clone.
///
/// Call [`Client::shutdown`] to stop the background tasks.
#[derive(Clone)]
pub struct Client {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Client {
    /// Start the supervisor and the reverse-call dispatcher.
    #[must_use]
    pub fn spawn(
        config: ClientConfig,
        registration: ToolRegistration,
        discovery: Arc<dyn Discovery>,
        connector: Arc<dyn Connector>,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        let stats = Arc::new(ClientStats::new());
        let shared = Arc::new(Shared {
            config,
            registration,
            correlator: Correlator::new(Arc::clone(&stats)),
            stats,
            connection: watch::Sender::new(None),
            state: watch::Sender::new(SupervisorState::Disconnected),
        });
        let cancel = CancellationToken::new();
        let client = Self {
            shared: Arc::clone(&shared),
            cancel: cancel.clone(),
            tasks: Arc::new(Mutex::new(Vec::new())),
        };

        let (calls_tx, calls_rx) = mpsc::unbounded_channel();
        let supervisor = Supervisor::new(shared, connector, discovery, calls_tx);
        let supervisor = tokio::spawn(supervisor.run(cancel.clone()));
        let dispatcher = tokio::spawn(run_dispatcher(
            calls_rx,
            handler,
            client.clone(),
            cancel,
        ));
        client.tasks.lock().extend([supervisor, dispatcher]);

        tracing::info!(tool = %client.shared.registration.name, "Client started");
        client
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    #[must_use]
    pub fn registration(&self) -> &ToolRegistration {
        &self.shared.registration
    }

    #[must_use]
    pub fn state(&self) -> SupervisorState {
        self.shared.state.borrow().clone()
    }

    /// Watch supervisor transitions.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<SupervisorState> {
        self.shared.state.subscribe()
    }

    /// Wait until the supervisor reaches `Connected`.
    ///
    /// # Errors
    /// Returns `Timeout` if it does not get there within `timeout`.
    pub async fn wait_connected(&self, timeout: Duration) -> Result<(), ClientError> {
        let mut states = self.subscribe_state();
        match tokio::time::timeout(
            timeout,
            states.wait_for(|s| *s == SupervisorState::Connected),
        )
        .await
        {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(ClientError::NotConnected),
            Err(_) => Err(ClientError::Timeout {
                method: "connect".into(),
                after: timeout,
            }),
        }
    }

    /// The live connection, if any.
    #[must_use]
    pub fn connection(&self) -> Option<Arc<Connection>> {
        self.shared.connection.borrow().clone()
    }

    /// Counters for dropped frames and reconnects.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub(crate) fn record_unknown_tool_call(&self) {
        self.shared.stats.record_unknown_tool_call();
    }

    /// Issue a correlated request with the default timeout.
    ///
    /// # Errors
    /// Returns error if not connected, on timeout, connection loss or an
    /// RPC error response.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, ClientError> {
        self.request_with_timeout(method, params, self.shared.config.request_timeout())
            .await
    }

    /// Issue a correlated request with an explicit timeout.
    ///
    /// # Errors
    /// Returns error if not connected, on timeout, connection loss or an
    /// RPC error response.
    pub async fn request_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, ClientError> {
        let connection = self.connection().ok_or(ClientError::NotConnected)?;
        let pending = self
            .shared
            .correlator
            .issue(connection.transport(), method, params)
            .await?;
        pending.wait(timeout).await
    }

    /// Call another tool on the server with the cross-tool timeout.
    ///
    /// # Errors
    /// Returns error under the same conditions as [`Client::request`].
    pub async fn call_tool(&self, tool_name: &str, arguments: Value) -> Result<Value, ClientError> {
        tracing::debug!(tool = tool_name, "Calling tool");
        self.request_with_timeout(
            "tools/call",
            tool_call_params(tool_name, arguments),
            self.shared.config.tool_call_timeout(),
        )
        .await
    }

    /// Send a reverse-call reply on the connection the call arrived on.
    /// Undeliverable replies are logged and dropped.
    pub(crate) async fn send_reply(&self, call_id: &str, generation: u64, reply: ToolReply) {
        let Some(connection) = self.connection() else {
            tracing::warn!(call_id, "No connection, dropping reply");
            return;
        };
        if connection.generation() != generation {
            tracing::warn!(
                call_id,
                generation,
                current = connection.generation(),
                "Connection replaced, dropping reply"
            );
            return;
        }
        let is_error = reply.is_error;
        match connection.send(&reply.into_frame(call_id)).await {
            Ok(()) => tracing::debug!(call_id, is_error, "Reply sent"),
            Err(e) => tracing::warn!(call_id, error = %e, "Failed to send reply"),
        }
    }

    /// Stop the supervisor and dispatcher and wait for them to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::debug!(error = %e, "Client task ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;
    use crate::{
        discovery::StaticDiscovery,
        dispatch::CallContext,
        memory::{ChannelConnector, ServerEnd},
    };

    struct Echo;

    #[async_trait]
    impl ToolHandler for Echo {
        async fn handle(&self, input: Value, ctx: CallContext) -> ToolReply {
            assert!(input.get("panic").is_none(), "handler asked to panic");
            ToolReply::json(&json!({"echo": input, "call_id": ctx.call_id}))
        }
    }

    fn start(connector: Arc<ChannelConnector>) -> Client {
        Client::spawn(
            ClientConfig::default(),
            ToolRegistration::default(),
            Arc::new(StaticDiscovery::new("mem://server", Some("token".into()))),
            connector,
            Arc::new(Echo),
        )
    }

    async fn accept_and_register(accepted: &mut UnboundedReceiver<ServerEnd>) -> ServerEnd {
        let mut server = accepted.recv().await.unwrap();
        let frame = server.recv().await.unwrap();
        assert_eq!(frame["method"], "tools/call");
        assert_eq!(frame["params"]["arguments"]["input"]["operation"], "register");
        assert_eq!(frame["params"]["arguments"]["input"]["tool_name"], "hostlink");
        server.respond(frame["id"].as_str().unwrap(), json!({"content": []}));
        server
    }

    fn reply_text(frame: &Value) -> Value {
        serde_json::from_str(frame["params"]["content"][0]["text"].as_str().unwrap()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_registers_and_answers_reverse_calls_in_order() {
        let (connector, mut accepted) = ChannelConnector::pair();
        let client = start(Arc::new(connector));
        let mut server = accept_and_register(&mut accepted).await;
        client.wait_connected(Duration::from_secs(5)).await.unwrap();
        assert_eq!(client.connection().unwrap().session_id(), Some("mem-1"));

        for n in 0..3 {
            server.reverse_call(&format!("c{n}"), "hostlink", json!({"n": n}));
        }
        for n in 0..3 {
            let reply = server.recv().await.unwrap();
            assert_eq!(reply["method"], "tools/reply");
            assert_eq!(reply["params"]["call_id"], format!("c{n}"));
            assert_eq!(reply["params"]["isError"], false);
            assert_eq!(reply_text(&reply)["echo"]["n"], n);
        }

        client.shutdown().await;
        assert_eq!(client.state(), SupervisorState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_handler_still_replies() {
        let (connector, mut accepted) = ChannelConnector::pair();
        let client = start(Arc::new(connector));
        let mut server = accept_and_register(&mut accepted).await;

        server.reverse_call("boom", "hostlink", json!({"panic": true}));
        let reply = server.recv().await.unwrap();
        assert_eq!(reply["params"]["call_id"], "boom");
        assert_eq!(reply["params"]["isError"], true);

        server.reverse_call("after", "hostlink", json!({}));
        let reply = server.recv().await.unwrap();
        assert_eq!(reply["params"]["call_id"], "after");
        assert_eq!(reply["params"]["isError"], false);

        client.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_frames_are_counted() {
        let (connector, mut accepted) = ChannelConnector::pair();
        let client = start(Arc::new(connector));
        let mut server = accept_and_register(&mut accepted).await;

        server.send_raw("not json");
        server.respond("no-such-request", json!({}));
        server.reverse_call("c1", "someone-else", json!({}));

        let reply = server.recv().await.unwrap();
        assert_eq!(reply["params"]["call_id"], "c1");
        assert_eq!(reply["params"]["isError"], true);

        let stats = client.stats();
        assert_eq!(stats.malformed_frames, 1);
        assert_eq!(stats.late_responses, 1);
        assert_eq!(stats.unknown_tool_calls, 1);

        client.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_tool_roundtrip() {
        let (connector, mut accepted) = ChannelConnector::pair();
        let client = start(Arc::new(connector));
        let mut server = accept_and_register(&mut accepted).await;
        client.wait_connected(Duration::from_secs(5)).await.unwrap();

        let caller = client.clone();
        let call = tokio::spawn(async move { caller.call_tool("sqlite", json!({"sql": "select 1"})).await });

        let frame = server.recv().await.unwrap();
        assert_eq!(frame["params"]["name"], "sqlite");
        assert_eq!(frame["params"]["arguments"]["sql"], "select 1");
        server.respond(frame["id"].as_str().unwrap(), json!({"rows": [[1]]}));

        assert_eq!(call.await.unwrap().unwrap(), json!({"rows": [[1]]}));
        client.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_request_fails_when_connection_dies() {
        let (connector, mut accepted) = ChannelConnector::pair();
        let client = start(Arc::new(connector));
        let mut server = accept_and_register(&mut accepted).await;
        client.wait_connected(Duration::from_secs(5)).await.unwrap();

        let caller = client.clone();
        let call = tokio::spawn(async move { caller.call_tool("slow", json!({})).await });
        let _ = server.recv().await.unwrap();
        server.kill();

        assert!(matches!(
            call.await.unwrap(),
            Err(ClientError::ConnectionLost)
        ));
        client.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_and_registers_exactly_once_per_connection() {
        let (connector, mut accepted) = ChannelConnector::pair();
        let client = start(Arc::new(connector));
        let mut first = accept_and_register(&mut accepted).await;
        client.wait_connected(Duration::from_secs(5)).await.unwrap();

        first.kill();
        let mut second = accept_and_register(&mut accepted).await;
        client.wait_connected(Duration::from_secs(120)).await.unwrap();

        assert_eq!(client.connection().unwrap().generation(), 2);
        assert_eq!(client.stats().reconnects, 1);
        assert!(accepted.try_recv().is_err());

        second.reverse_call("c2", "hostlink", json!({}));
        let reply = second.recv().await.unwrap();
        assert_eq!(reply["params"]["call_id"], "c2");
        client.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_between_refused_attempts() {
        let (connector, mut accepted) = ChannelConnector::pair();
        let connector = Arc::new(connector);
        connector.refuse_next(2);
        let started = tokio::time::Instant::now();
        let client = start(Arc::clone(&connector));

        let _server = accept_and_register(&mut accepted).await;
        client.wait_connected(Duration::from_secs(120)).await.unwrap();

        // 2s + 4s of backoff before the third attempt
        assert!(started.elapsed() >= Duration::from_secs(6));
        assert!(started.elapsed() < Duration::from_secs(8));
        assert_eq!(client.stats().reconnects, 0);
        client.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_registration_failure_retries() {
        let (connector, mut accepted) = ChannelConnector::pair();
        let client = start(Arc::new(connector));

        let mut rejected = accepted.recv().await.unwrap();
        let frame = rejected.recv().await.unwrap();
        rejected.respond_error(frame["id"].as_str().unwrap(), -32000, "denied");

        let _server = accept_and_register(&mut accepted).await;
        client.wait_connected(Duration::from_secs(120)).await.unwrap();
        assert_eq!(client.connection().unwrap().generation(), 2);
        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_request_without_connection() {
        let (connector, _accepted) = ChannelConnector::pair();
        let connector = Arc::new(connector);
        connector.refuse_next(usize::MAX);
        let client = start(connector);
        assert!(matches!(
            client.request("ping", json!({})).await,
            Err(ClientError::NotConnected)
        ));
        client.shutdown().await;
    }
}
