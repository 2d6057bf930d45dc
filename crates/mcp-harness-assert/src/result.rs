//! The outcome of a single tool invocation.

use std::fmt;
use std::time::Duration;

use serde::{Serialize, Serializer};
use serde_json::Value;

/// Classification of a failed tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The tool ran and reported `isError: true`.
    Tool,
    /// The server answered with a JSON-RPC error object.
    Rpc,
    /// No response arrived before the deadline.
    Timeout,
    /// The call was cancelled by session teardown.
    Cancelled,
    /// The session failed on a malformed frame.
    Protocol,
    /// The connection or process went away.
    Transport,
    /// The target server is unknown or not running.
    NotFound,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Tool => "tool",
            Self::Rpc => "rpc",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Protocol => "protocol",
            Self::Transport => "transport",
            Self::NotFound => "not_found",
        };
        f.write_str(s)
    }
}

/// Structured detail attached to a failed call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorDetail {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorDetail {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
            data: None,
        }
    }

    /// Detail for a JSON-RPC error response.
    pub fn rpc(code: i64, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            kind: ErrorKind::Rpc,
            message: message.into(),
            code: Some(code),
            data,
        }
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} error {}: {}", self.kind, code, self.message),
            None => write!(f, "{} error: {}", self.kind, self.message),
        }
    }
}

/// Success or failure of a call. Error detail exists only on failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum CallStatus {
    Success,
    Failure(ErrorDetail),
}

/// Immutable record of one tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResult {
    tool: String,
    arguments: Value,
    content: Value,
    text: String,
    #[serde(flatten)]
    status: CallStatus,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    duration: Duration,
}

fn serialize_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64() * 1000.0)
}

impl ToolResult {
    /// Build from the raw `tools/call` result payload.
    ///
    /// A payload flagged `isError: true` becomes a [`ErrorKind::Tool`] failure
    /// whose message is the text content.
    pub fn from_payload(
        tool: impl Into<String>,
        arguments: Value,
        payload: Value,
        duration: Duration,
    ) -> Self {
        let text = extract_text(&payload);
        let is_error = payload
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let status = if is_error {
            CallStatus::Failure(ErrorDetail::new(ErrorKind::Tool, text.clone()))
        } else {
            CallStatus::Success
        };
        Self {
            tool: tool.into(),
            arguments,
            content: payload,
            text,
            status,
            duration,
        }
    }

    /// Build a failed result that never produced a payload.
    pub fn failure(
        tool: impl Into<String>,
        arguments: Value,
        detail: ErrorDetail,
        duration: Duration,
    ) -> Self {
        Self {
            tool: tool.into(),
            arguments,
            content: Value::Null,
            text: String::new(),
            status: CallStatus::Failure(detail),
            duration,
        }
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    pub fn arguments(&self) -> &Value {
        &self.arguments
    }

    /// Raw result payload (`Null` when the call never produced one).
    pub fn content(&self) -> &Value {
        &self.content
    }

    /// Text items of the payload joined with newlines.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn status(&self) -> &CallStatus {
        &self.status
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, CallStatus::Success)
    }

    pub fn error(&self) -> Option<&ErrorDetail> {
        match &self.status {
            CallStatus::Success => None,
            CallStatus::Failure(detail) => Some(detail),
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error().map(|e| e.kind)
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Compact JSON serialisation of the raw payload.
    pub fn content_json(&self) -> String {
        self.content.to_string()
    }
}

fn extract_text(payload: &Value) -> String {
    payload
        .get("content")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter(|item| item.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|item| item.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
}
