//! MCP sessions, server supervision and protocol transcripts.
//!
//! This crate drives MCP servers under test over stdio: it spawns them,
//! performs the `initialize` handshake, multiplexes concurrent tool calls and
//! records every frame that crosses the wire.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Supervisor                                                 │
//! │  - Concurrent startup with per-server timeouts              │
//! │  - Name lookup, restart, idempotent teardown                │
//! └─────────────────────────────────────────────────────────────┘
//!                           │ Arc<Session>
//!                           ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Session                                                    │
//! │  - Request/response correlation by id                       │
//! │  - Per-call timeouts, late responses logged as anomalies    │
//! └─────────────────────────────────────────────────────────────┘
//!                           │
//!                           ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  FrameReader / write_frame                                  │
//! │  - Newline-delimited or Content-Length framed JSON-RPC 2.0  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! All sessions of a run share one [`Transcript`].
//!
//! # Usage
//!
//! ```rust,ignore
//! use mcp_harness_assert::Assertion;
//! use mcp_harness_mcp::{ServerConfig, Supervisor, ToolCaller, Transcript};
//!
//! let supervisor = Supervisor::new(Transcript::new());
//! supervisor
//!     .start(vec![ServerConfig::new("echo", "my-echo-server")])
//!     .await?;
//!
//! let caller = ToolCaller::new(supervisor.get("echo")?, Duration::from_secs(30));
//! caller
//!     .call_and_assert("echo", json!({"text": "hi"}), &[Assertion::contains("hi")], None)
//!     .await?;
//!
//! supervisor.stop_all().await;
//! ```

pub mod caller;
pub mod config;
pub mod error;
pub mod framing;
pub mod protocol;
pub mod session;
pub mod supervisor;
pub mod transcript;

// Re-export main types
pub use caller::ToolCaller;
pub use config::{ServerConfig, StderrMode};
pub use error::{McpError, Result};
pub use framing::{FrameReader, Framing, MAX_FRAME_LEN, write_frame};
pub use protocol::{
    CallToolParams, Incoming, InitializeParams, InitializeResult, JsonRpcError,
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ListToolsResult, ServerInfo, ToolInfo,
};
pub use session::{Session, SessionState};
pub use supervisor::{StartReport, StartupFailure, Supervisor, TeardownReport};
pub use transcript::{Direction, EntryKind, Event, LogEntry, Transcript};
