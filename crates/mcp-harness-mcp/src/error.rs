//! Errors raised while driving an MCP server.

use mcp_harness_assert::{ErrorDetail, ErrorKind};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, McpError>;

/// Session, supervisor and transport failures.
///
/// `Clone` so that one session failure can resolve every outstanding call.
#[derive(Debug, Clone, Error)]
pub enum McpError {
    /// The process could not be started.
    #[error("failed to spawn MCP server '{server}': {reason}")]
    SpawnFailed { server: String, reason: String },

    /// The server did not complete the handshake in time.
    #[error("MCP server '{server}' did not start within {timeout_ms}ms")]
    StartupTimeout { server: String, timeout_ms: u64 },

    /// Malformed frame or message; the session is no longer usable.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// No response arrived before the deadline.
    #[error("'{method}' timed out after {timeout_ms}ms")]
    Timeout { method: String, timeout_ms: u64 },

    /// The call was abandoned by session teardown.
    #[error("call cancelled by session teardown")]
    Cancelled,

    /// The server's stdout reached end of stream.
    #[error("connection closed")]
    ConnectionClosed,

    /// A JSON-RPC error response.
    #[error("server error {code}: {message}")]
    ServerError {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// No running server with this name.
    #[error("MCP server not found: {0}")]
    NotFound(String),

    /// Two servers share a name.
    #[error("MCP server '{0}' is configured more than once")]
    DuplicateServer(String),

    /// A tool method was used before the handshake.
    #[error("session used before the initialize handshake")]
    NotInitialized,

    #[error("IO error: {0}")]
    Io(String),

    #[error("JSON error: {0}")]
    Json(String),
}

impl McpError {
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol(reason.into())
    }

    pub fn spawn_failed(server: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SpawnFailed {
            server: server.into(),
            reason: reason.into(),
        }
    }

    pub fn server_error(
        code: i64,
        message: impl Into<String>,
        data: Option<serde_json::Value>,
    ) -> Self {
        Self::ServerError {
            code,
            message: message.into(),
            data,
        }
    }

    /// True for [`McpError::Timeout`] and [`McpError::StartupTimeout`].
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::StartupTimeout { .. })
    }

    /// Classify this error for a tool result.
    pub fn to_detail(&self) -> ErrorDetail {
        match self {
            Self::ServerError {
                code,
                message,
                data,
            } => ErrorDetail::rpc(*code, message.clone(), data.clone()),
            other => {
                let kind = match other {
                    Self::Timeout { .. } | Self::StartupTimeout { .. } => ErrorKind::Timeout,
                    Self::Cancelled => ErrorKind::Cancelled,
                    Self::Protocol(_) | Self::Json(_) | Self::NotInitialized => {
                        ErrorKind::Protocol
                    }
                    Self::NotFound(_) => ErrorKind::NotFound,
                    _ => ErrorKind::Transport,
                };
                ErrorDetail::new(kind, other.to_string())
            }
        }
    }
}

impl From<std::io::Error> for McpError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<serde_json::Error> for McpError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e.to_string())
    }
}
