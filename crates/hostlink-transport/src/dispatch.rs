//! Reverse-call dispatcher.
//!
//! A single task drains the reverse-call queue in arrival order and sends
//! exactly one reply per call, including when the handler panics or the
//! call targets a tool we did not register.

use std::{any::Any, panic::AssertUnwindSafe};

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{client::Client, protocol::ToolReply, supervisor::QueuedCall};

/// Everything a handler knows about the call it is serving.
#[derive(Clone)]
pub struct CallContext {
    pub call_id: String,
    pub tool: String,
    /// Client handle for nested requests (cross-tool calls).
    pub client: Client,
}

/// Executes reverse calls addressed to the registered tool.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Handle one call. Failures are reported through the reply, never
    /// raised.
    async fn handle(&self, input: Value, ctx: CallContext) -> ToolReply;
}

pub(crate) async fn run_dispatcher(
    mut calls: mpsc::UnboundedReceiver<QueuedCall>,
    handler: std::sync::Arc<dyn ToolHandler>,
    client: Client,
    cancel: CancellationToken,
) {
    loop {
        let queued = tokio::select! {
            () = cancel.cancelled() => break,
            queued = calls.recv() => match queued {
                Some(queued) => queued,
                None => break,
            },
        };
        let QueuedCall { call, generation } = queued;
        let tool_name = client.registration().name.clone();

        let reply = if call.tool == tool_name {
            let ctx = CallContext {
                call_id: call.call_id.clone(),
                tool: call.tool.clone(),
                client: client.clone(),
            };
            match AssertUnwindSafe(handler.handle(call.input, ctx))
                .catch_unwind()
                .await
            {
                Ok(reply) => reply,
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    tracing::error!(call_id = %call.call_id, %message, "Tool handler panicked");
                    ToolReply::error(format!("Tool handler panicked: {message}"))
                }
            }
        } else {
            client.record_unknown_tool_call();
            tracing::warn!(
                call_id = %call.call_id,
                tool = %call.tool,
                registered = %tool_name,
                "Reverse call for unknown tool"
            );
            ToolReply::error(format!("Unknown tool '{}'", call.tool))
        };

        client.send_reply(&call.call_id, generation, reply).await;
    }
    tracing::debug!("Dispatcher stopped");
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
