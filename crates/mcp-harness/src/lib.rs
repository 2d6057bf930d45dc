//! MCP Harness - process-level test harness for Model Context Protocol
//! servers.
//!
//! Launches the configured servers, drives tool calls through them with
//! per-call timeouts, evaluates assertions on the results, cleans up files
//! the servers created and records every protocol message.
//!
//! ```rust,ignore
//! use mcp_harness::{Harness, TestScope};
//! use mcp_harness_assert::Assertion;
//! use mcp_harness_config::load_config;
//!
//! let loaded = load_config(None, &std::env::current_dir()?)?;
//! let harness = Harness::start(loaded.config).await?;
//!
//! let scope = TestScope::new("echo_roundtrip").with_server("echo");
//! harness
//!     .call(&scope, "echo", json!({"text": "hi"}), &[Assertion::contains("hi")])
//!     .await?;
//!
//! let summary = harness.finish().await;
//! assert!(summary.passed());
//! ```

pub mod error;
pub mod harness;
pub mod logging;
pub mod scope;

pub use error::{HarnessError, Result};
pub use harness::{CleanupFailure, Harness, RunSummary, ServerFailure, server_config};
pub use logging::init_tracing;
pub use scope::TestScope;
