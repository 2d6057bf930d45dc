//! Wire types: the JSON-RPC 2.0 envelope plus the `initialize`, `tools/list`,
//! `tools/call` and `ping` messages. Inbound traffic is classified by
//! [`Incoming::parse`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// Protocol revision offered in `initialize`.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

// ─────────────────────────────────────────────────────────────────────────────
// JSON-RPC Base Types
// ─────────────────────────────────────────────────────────────────────────────

/// Outbound request. Ids are always integers on our side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// Outbound message without an id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// Reply in either direction.
///
/// The id stays a raw value since servers may pick string ids for their own
/// requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Split into the result value (null when absent) or the error object.
    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or_default()),
        }
    }
}

/// The `error` member of a failed response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;

    /// A `-32601` error for `method`.
    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: Self::METHOD_NOT_FOUND,
            message: format!("Method not found: {method}"),
            data: None,
        }
    }
}

/// A classified inbound message.
#[derive(Debug, Clone)]
pub enum Incoming {
    /// Reply to one of our requests.
    Response(JsonRpcResponse),
    /// Server-initiated request expecting a reply.
    Request {
        id: Value,
        method: String,
        params: Option<Value>,
    },
    /// Server-initiated notification.
    Notification {
        method: String,
        params: Option<Value>,
    },
}

impl Incoming {
    /// Parse and classify one frame. Anything that is not a JSON-RPC
    /// object with either a `method` or an `id` plus `result`/`error` is
    /// rejected.
    pub fn parse(frame: &str) -> Result<Self, String> {
        let value: Value =
            serde_json::from_str(frame).map_err(|e| format!("invalid JSON: {e}"))?;
        let Value::Object(mut obj) = value else {
            return Err("message is not a JSON object".to_string());
        };

        if let Some(method) = obj.get("method").and_then(Value::as_str).map(String::from) {
            let params = obj.remove("params");
            return Ok(match obj.remove("id") {
                Some(id) if !id.is_null() => Self::Request { id, method, params },
                _ => Self::Notification { method, params },
            });
        }

        if obj.contains_key("id") && (obj.contains_key("result") || obj.contains_key("error")) {
            let response: JsonRpcResponse = serde_json::from_value(Value::Object(obj))
                .map_err(|e| format!("invalid response: {e}"))?;
            return Ok(Self::Response(response));
        }

        Err("message is neither a request, a notification nor a response".to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MCP Protocol Types
// ─────────────────────────────────────────────────────────────────────────────

/// Capabilities we advertise. The harness only consumes tools, so this is
/// empty unless a test sets `experimental`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: "mcp-harness".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// `initialize` params, identifying the client as `mcp-harness`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    pub capabilities: ClientCapabilities,
    pub client_info: ClientInfo,
}

impl Default for InitializeParams {
    fn default() -> Self {
        Self {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: Default::default(),
            client_info: Default::default(),
        }
    }
}

/// `serverInfo` from the handshake. Some servers omit the version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    /// Kept raw; only `tools` matters to the harness.
    #[serde(default)]
    pub capabilities: Value,
    pub server_info: ServerInfo,
}

/// One entry of a `tools/list` reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Schema of the `arguments` object, passed through untouched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListToolsResult {
    pub tools: Vec<ToolInfo>,
}

/// `tools/call` params. Arguments are always sent, `{}` when empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolParams {
    pub name: String,
    pub arguments: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_shape() {
        let req = JsonRpcRequest::new(7, "tools/list", None);
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({"jsonrpc": "2.0", "id": 7, "method": "tools/list"})
        );
    }

    #[test]
    fn test_initialize_params_wire_shape() {
        let value = serde_json::to_value(InitializeParams::default()).unwrap();
        assert_eq!(value["protocolVersion"], MCP_PROTOCOL_VERSION);
        assert_eq!(value["clientInfo"]["name"], "mcp-harness");
        assert_eq!(value["capabilities"], json!({}));
    }

    #[test]
    fn test_parse_response() {
        let msg = Incoming::parse(r#"{"jsonrpc":"2.0","id":1,"result":{"value":42}}"#).unwrap();
        let Incoming::Response(resp) = msg else {
            panic!("expected response");
        };
        assert_eq!(resp.id.as_u64(), Some(1));
        assert_eq!(resp.into_result().unwrap()["value"], 42);
    }

    #[test]
    fn test_parse_error_response() {
        let msg = Incoming::parse(
            r#"{"jsonrpc":"2.0","id":3,"error":{"code":-32600,"message":"Invalid Request"}}"#,
        )
        .unwrap();
        let Incoming::Response(resp) = msg else {
            panic!("expected response");
        };
        assert!(resp.is_error());
        assert_eq!(
            resp.into_result().unwrap_err().code,
            JsonRpcError::INVALID_REQUEST
        );
    }

    #[test]
    fn test_parse_server_request_and_notification() {
        let msg = Incoming::parse(r#"{"jsonrpc":"2.0","id":"s-1","method":"ping"}"#).unwrap();
        assert!(matches!(msg, Incoming::Request { ref method, .. } if method == "ping"));

        let msg = Incoming::parse(
            r#"{"jsonrpc":"2.0","method":"notifications/message","params":{"level":"info"}}"#,
        )
        .unwrap();
        assert!(
            matches!(msg, Incoming::Notification { ref method, params: Some(_) } if method == "notifications/message")
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(Incoming::parse("{not json").is_err());
        assert!(Incoming::parse("[1, 2]").is_err());
        assert!(Incoming::parse(r#"{"jsonrpc":"2.0","id":1}"#).is_err());
    }

    #[test]
    fn test_tools_list_with_optional_fields() {
        let result: ListToolsResult = serde_json::from_value(json!({
            "tools": [
                {
                    "name": "search",
                    "description": "Full-text search",
                    "inputSchema": {"type": "object", "required": ["query"]}
                },
                {"name": "bare"}
            ]
        }))
        .unwrap();
        assert_eq!(result.tools.len(), 2);
        assert_eq!(result.tools[0].input_schema.as_ref().unwrap()["required"][0], "query");
        assert!(result.tools[1].description.is_none());
        assert!(result.tools[1].input_schema.is_none());
    }

    #[test]
    fn test_method_not_found_reply() {
        let reply = JsonRpcResponse::failure(
            json!("s-2"),
            JsonRpcError::method_not_found("sampling/createMessage"),
        );
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["id"], "s-2");
        assert_eq!(json["error"]["code"], -32601);
        assert!(json.get("result").is_none());
    }
}
