//! Wire protocol between the client and the tool server.
//!
//! Outbound frames are JSON-RPC 2.0 requests and `tools/reply`
//! notifications. Inbound frames arrive as SSE message events and are
//! classified into correlated responses and reverse calls.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{FrameError, RpcError};

/// JSON-RPC version tag carried by every outbound frame.
pub const JSONRPC_VERSION: &str = "2.0";

/// Method name of a reverse call wrapped in a JSON-RPC envelope.
pub const REVERSE_CALL_METHOD: &str = "tools/reverse_call";

/// Method name of a reverse-call reply.
pub const REPLY_METHOD: &str = "tools/reply";

/// Outbound correlated request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: String,
    pub method: String,
    pub params: Value,
}

impl RpcRequest {
    #[must_use]
    pub fn new(id: impl Into<String>, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// A request initiated by the server and executed locally.
#[derive(Debug, Clone, PartialEq)]
pub struct ReverseCall {
    pub call_id: String,
    pub tool: String,
    pub input: Value,
}

/// One item of a tool reply's `content` array.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolContent {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

/// Result of handling a reverse call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolReply {
    pub content: Vec<ToolContent>,
    #[serde(rename = "isError")]
    pub is_error: bool,
}

impl ToolReply {
    /// Successful reply carrying one text item.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent {
                kind: "text".into(),
                text: text.into(),
            }],
            is_error: false,
        }
    }

    /// Failed reply carrying one text item.
    #[must_use]
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::text(text)
        }
    }

    /// Successful reply whose text is the JSON rendering of `value`.
    #[must_use]
    pub fn json(value: &Value) -> Self {
        Self::text(value.to_string())
    }

    /// Concatenated text content.
    #[must_use]
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Build the `tools/reply` frame answering `call_id`.
    #[must_use]
    pub fn into_frame(self, call_id: &str) -> Value {
        json!({
            "jsonrpc": JSONRPC_VERSION,
            "method": REPLY_METHOD,
            "params": {
                "call_id": call_id,
                "content": self.content,
                "isError": self.is_error,
            }
        })
    }
}

/// Classified inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Response to a request we issued.
    Response {
        id: String,
        outcome: Result<Value, RpcError>,
    },
    /// Request the server wants us to execute.
    ReverseCall(ReverseCall),
}

impl Inbound {
    /// Parse and classify the data of one SSE message event.
    ///
    /// # Errors
    /// Returns error if the text is not JSON or matches no known shape.
    pub fn parse(data: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(data)?;
        Self::classify(value)
    }

    /// Classify an already-decoded frame.
    ///
    /// # Errors
    /// Returns error if the frame matches no known shape.
    pub fn classify(value: Value) -> Result<Self, FrameError> {
        let Value::Object(mut map) = value else {
            return Err(FrameError::Shape("frame is not an object".into()));
        };

        if map.contains_key("result") || map.contains_key("error") {
            if let Some(id) = map.get("id").and_then(id_string) {
                let outcome = match map.remove("error") {
                    Some(error) if !error.is_null() => Err(RpcError::from_value(error)),
                    _ => Ok(map.remove("result").unwrap_or(Value::Null)),
                };
                return Ok(Self::Response { id, outcome });
            }
        }

        // Reverse calls come either bare or wrapped in a JSON-RPC envelope.
        let body = match map.get("method").and_then(Value::as_str) {
            Some(REVERSE_CALL_METHOD) => match map.remove("params") {
                Some(Value::Object(params)) => params,
                _ => return Err(FrameError::Shape("reverse call without params".into())),
            },
            _ => map,
        };
        let call_id = body.get("call_id").and_then(id_string);
        let tool = body.get("tool").and_then(Value::as_str);
        match (call_id, tool) {
            (Some(call_id), Some(tool)) => Ok(Self::ReverseCall(ReverseCall {
                call_id,
                tool: tool.to_string(),
                input: body.get("input").cloned().unwrap_or(Value::Null),
            })),
            _ => Err(FrameError::Shape(
                "neither a response nor a reverse call".into(),
            )),
        }
    }
}

/// Ids may be strings or numbers on the wire; they are correlated as strings.
fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// `tools/call` parameters registering this client as a remote tool.
#[must_use]
pub fn registration_params(tool_name: &str, description: &str, readme: &str) -> Value {
    json!({
        "name": "remote",
        "arguments": {
            "input": {
                "operation": "register",
                "tool_name": tool_name,
                "description": description,
                "readme": readme,
            }
        }
    })
}

/// `tools/call` parameters invoking another tool on the server.
#[must_use]
pub fn tool_call_params(tool_name: &str, arguments: Value) -> Value {
    json!({ "name": tool_name, "arguments": arguments })
}

/// Whether a `tools/call` result reports failure.
#[must_use]
pub fn is_error_result(result: &Value) -> bool {
    result
        .get("isError")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_response() {
        let frame = Inbound::parse(r#"{"jsonrpc":"2.0","id":"a1","result":{"ok":true}}"#).unwrap();
        assert_eq!(
            frame,
            Inbound::Response {
                id: "a1".into(),
                outcome: Ok(json!({"ok": true})),
            }
        );
    }

    #[test]
    fn test_classify_error_response_with_numeric_id() {
        let frame =
            Inbound::parse(r#"{"id":7,"error":{"code":-32601,"message":"no such method"}}"#).unwrap();
        let Inbound::Response { id, outcome } = frame else {
            panic!("expected response");
        };
        assert_eq!(id, "7");
        let err = outcome.unwrap_err();
        assert_eq!(err.code, -32601);
        assert_eq!(err.message, "no such method");
    }

    #[test]
    fn test_classify_reverse_call_bare_and_wrapped() {
        let bare = Inbound::parse(r#"{"call_id":"c1","tool":"host","input":{"api_path":"app.version"}}"#)
            .unwrap();
        let wrapped = Inbound::parse(
            r#"{"jsonrpc":"2.0","method":"tools/reverse_call","params":{"call_id":"c1","tool":"host","input":{"api_path":"app.version"}}}"#,
        )
        .unwrap();
        assert_eq!(bare, wrapped);
        let Inbound::ReverseCall(call) = bare else {
            panic!("expected reverse call");
        };
        assert_eq!(call.tool, "host");
        assert_eq!(call.input["api_path"], "app.version");
    }

    #[test]
    fn test_malformed_frames_are_rejected() {
        assert!(Inbound::parse("not json").is_err());
        assert!(Inbound::parse("[1,2]").is_err());
        assert!(Inbound::parse(r#"{"id":"x"}"#).is_err());
        assert!(Inbound::parse(r#"{"call_id":"c1"}"#).is_err());
    }

    #[test]
    fn test_reply_frame_shape() {
        let frame = ToolReply::error("boom").into_frame("c9");
        assert_eq!(frame["method"], REPLY_METHOD);
        assert_eq!(frame["params"]["call_id"], "c9");
        assert_eq!(frame["params"]["isError"], true);
        assert_eq!(frame["params"]["content"][0]["type"], "text");
        assert_eq!(frame["params"]["content"][0]["text"], "boom");
    }

    #[test]
    fn test_registration_params() {
        let params = registration_params("host", "Host bridge", "docs");
        assert_eq!(params["name"], "remote");
        assert_eq!(params["arguments"]["input"]["operation"], "register");
        assert_eq!(params["arguments"]["input"]["tool_name"], "host");
        assert!(is_error_result(&json!({"isError": true})));
        assert!(!is_error_result(&json!({"content": []})));
    }
}
