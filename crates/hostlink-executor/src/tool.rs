//! Reverse-call router: the tool this client registers.
//!
//! Every operation that touches host state is marshaled onto the host
//! thread; listing and process info are answered in place.

use std::sync::Arc;

use async_trait::async_trait;
use hostlink_core::{ContextStore, Host};
use hostlink_session::SessionManager;
use hostlink_transport::{CallContext, Client, ClientError, ToolHandler, ToolReply};
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::runtime::Handle;

use crate::{
    invoke::{InvokeRequest, Invoker, report},
    marshal::{HostThread, MarshalError, Marshaler},
    script::{EngineError, ScriptConfig, ScriptEngine, ToolBridge},
};

/// Globals injected into the script environment.
const INJECTED: [&str; 4] = ["host", "mcp", "print", "console"];

/// State owned by the host thread.
pub struct HostState {
    pub invoker: Invoker,
    pub scripts: ScriptEngine,
}

impl HostState {
    /// Build the state. Must run on the host thread.
    ///
    /// # Errors
    /// Returns error if the script engine cannot start.
    pub fn new(
        host: Arc<dyn Host>,
        context: Arc<ContextStore>,
        sessions: Arc<SessionManager>,
        config: ScriptConfig,
    ) -> Result<Self, EngineError> {
        let invoker = Invoker::new(host, context);
        let scripts = ScriptEngine::new(config, invoker.clone(), sessions)?;
        Ok(Self { invoker, scripts })
    }
}

#[derive(Debug, Error)]
enum ToolError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("Unknown operation '{0}'")]
    UnknownOperation(String),
    #[error(transparent)]
    Marshal(#[from] MarshalError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Client(#[from] ClientError),
}

impl ToolError {
    const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "InvalidRequest",
            Self::UnknownOperation(_) => "UnknownOperation",
            Self::Marshal(_) => "HostUnavailable",
            Self::Engine(_) => "EngineError",
            Self::Client(_) => "ToolCallFailed",
        }
    }

    fn into_reply(self) -> ToolReply {
        ToolReply::error(
            json!({
                "success": false,
                "error": {"kind": self.kind(), "message": self.to_string()},
            })
            .to_string(),
        )
    }
}

#[derive(Deserialize)]
struct ExecuteInput {
    code: Option<String>,
    session_id: Option<String>,
    #[serde(default = "persistent_default")]
    persistent: bool,
}

const fn persistent_default() -> bool {
    true
}

/// Blocking cross-tool calls from the host thread through the client.
pub struct ClientBridge {
    client: Client,
    runtime: Handle,
}

impl ClientBridge {
    /// Must be created inside the tokio runtime the client runs on.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            runtime: Handle::current(),
        }
    }
}

impl ToolBridge for ClientBridge {
    fn call(&self, tool: &str, arguments: Value) -> Result<Value, String> {
        self.runtime
            .block_on(self.client.call_tool(tool, arguments))
            .map_err(|e| e.to_string())
    }
}

/// The registered tool: routes reverse calls by `operation`.
pub struct HostTool {
    marshaler: Marshaler<HostState>,
    context: Arc<ContextStore>,
    sessions: Arc<SessionManager>,
    default_session: String,
}

impl HostTool {
    #[must_use]
    pub fn new(
        marshaler: Marshaler<HostState>,
        context: Arc<ContextStore>,
        sessions: Arc<SessionManager>,
        default_session: impl Into<String>,
    ) -> Self {
        Self {
            marshaler,
            context,
            sessions,
            default_session: default_session.into(),
        }
    }

    /// Spawn a dedicated host thread for `host` and the tool routing to it.
    ///
    /// # Errors
    /// Returns error if the thread or the script engine fails to start.
    pub fn start(host: Arc<dyn Host>, config: ScriptConfig) -> Result<(Self, HostThread<HostState>), MarshalError> {
        let context = Arc::new(ContextStore::new());
        let sessions = Arc::new(SessionManager::default().with_exclusions(INJECTED));
        let default_session = config.default_session.clone();

        let thread = HostThread::spawn("hostlink-host", {
            let context = Arc::clone(&context);
            let sessions = Arc::clone(&sessions);
            move || HostState::new(host, context, sessions, config)
        })?;
        let tool = Self::new(thread.marshaler(), context, sessions, default_session);
        Ok((tool, thread))
    }

    async fn invoke(&self, input: Value) -> Result<ToolReply, ToolError> {
        let request: InvokeRequest =
            serde_json::from_value(input).map_err(|e| ToolError::InvalidInput(format!("Invalid invocation: {e}")))?;

        match request.api_path.as_str() {
            "get_pid" => {
                return Ok(ToolReply::json(&json!({
                    "success": true,
                    "api_path": "get_pid",
                    "value": std::process::id(),
                    "type": "int",
                })));
            }
            "clear_context" => {
                let cleared = self.marshaler.submit(|state| state.invoker.context().clear()).await?;
                tracing::info!(cleared, "Cleared context");
                return Ok(ToolReply::json(&json!({
                    "success": true,
                    "api_path": "clear_context",
                    "value": format!("Cleared {cleared} stored objects"),
                    "cleared": cleared,
                    "context": [],
                })));
            }
            _ => {}
        }

        let (ok, body) = self
            .marshaler
            .submit(move |state| {
                let labels = || state.invoker.context().labels();
                match state.invoker.invoke(&request) {
                    Ok(outcome) => (true, report::success(&request, &outcome, labels())),
                    Err(failure) => {
                        tracing::warn!(api_path = %request.api_path, error = %failure.error, "Invocation failed");
                        (false, report::failure(&request, &failure, labels()))
                    }
                }
            })
            .await?;

        Ok(if ok {
            ToolReply::json(&body)
        } else {
            ToolReply::error(body.to_string())
        })
    }

    async fn execute(&self, input: Value, ctx: &CallContext) -> Result<ToolReply, ToolError> {
        let input: ExecuteInput =
            serde_json::from_value(input).map_err(|e| ToolError::InvalidInput(format!("Invalid script request: {e}")))?;
        let code = input
            .code
            .ok_or_else(|| ToolError::InvalidInput("'code' is required".into()))?;
        let session_id = input.session_id.unwrap_or_else(|| self.default_session.clone());
        let persistent = input.persistent;
        let bridge: Arc<dyn ToolBridge> = Arc::new(ClientBridge::new(ctx.client.clone()));

        tracing::debug!(%session_id, persistent, bytes = code.len(), "Running script");
        let outcome = self
            .marshaler
            .submit(move |state| state.scripts.run(&code, &session_id, persistent, Some(bridge)))
            .await??;

        let body = serde_json::to_value(&outcome).unwrap_or_else(|e| json!({"success": false, "error": e.to_string()}));
        Ok(if outcome.success {
            ToolReply::json(&body)
        } else {
            ToolReply::error(body.to_string())
        })
    }

    async fn call_tool(&self, input: &Value, ctx: &CallContext) -> Result<ToolReply, ToolError> {
        let tool = input
            .get("tool_name")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ToolError::InvalidInput("'tool_name' is required".into()))?;
        let arguments = input.get("arguments").cloned().unwrap_or_else(|| json!({}));

        let result = ctx.client.call_tool(tool, arguments).await?;
        Ok(ToolReply::json(&json!({
            "success": true,
            "tool_name": tool,
            "result": result,
        })))
    }

    async fn reset_session(&self, input: &Value) -> Result<ToolReply, ToolError> {
        let session_id = input.get("session_id").and_then(Value::as_str).map(str::to_owned);
        let target = session_id.clone();
        let reset = self
            .marshaler
            .submit(move |state| state.scripts.reset(target.as_deref()))
            .await??;
        Ok(ToolReply::json(&json!({
            "success": true,
            "session_id": session_id,
            "reset": reset,
        })))
    }

    fn list_context(&self) -> Result<ToolReply, ToolError> {
        let sessions = self
            .sessions
            .list()
            .map_err(|e| ToolError::Engine(EngineError::Session(e)))?;
        Ok(ToolReply::json(&json!({
            "success": true,
            "context": self.context.labels(),
            "sessions": sessions,
        })))
    }
}

/// Strip the `{"input": ...}` and `{"params": {"arguments": ...}}` wrappers.
fn unwrap_input(mut input: Value) -> Value {
    loop {
        let inner = match &mut input {
            Value::Object(map) if map.len() == 1 && map.contains_key("input") => map.remove("input"),
            Value::Object(map) if map.len() == 1 && map.contains_key("params") => map
                .get_mut("params")
                .and_then(|params| params.get_mut("arguments"))
                .map(Value::take),
            _ => None,
        };
        match inner {
            Some(inner) => input = inner,
            None => return input,
        }
    }
}

#[async_trait]
impl ToolHandler for HostTool {
    async fn handle(&self, input: Value, ctx: CallContext) -> ToolReply {
        let input = unwrap_input(input);
        let operation = input.get("operation").and_then(Value::as_str).map(str::to_owned);

        let result = match operation.as_deref() {
            None => self.invoke(input).await,
            Some("execute_script" | "execute_python") => self.execute(input, &ctx).await,
            Some("call_tool") => self.call_tool(&input, &ctx).await,
            Some("reset_session") => self.reset_session(&input).await,
            Some("list_context") => self.list_context(),
            Some(other) => Err(ToolError::UnknownOperation(other.to_string())),
        };

        result.unwrap_or_else(|e| {
            tracing::error!(call_id = %ctx.call_id, ?operation, error = %e, "Reverse call failed");
            e.into_reply()
        })
    }
}
