//! Tool invocation with assertions and call history.

use std::sync::Arc;
use std::time::{Duration, Instant};

use mcp_harness_assert::{Assertion, AssertionFailure, CallReport, ToolResult};
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::{McpError, Result};
use crate::protocol::ToolInfo;
use crate::session::Session;

/// Invokes tools on one session and keeps a history of results.
///
/// Call-level faults (timeout, cancellation, protocol and RPC errors) never
/// surface as `Err`; they are captured in the returned [`ToolResult`].
pub struct ToolCaller {
    session: Arc<Session>,
    default_timeout: Duration,
    history: Mutex<Vec<ToolResult>>,
}

impl ToolCaller {
    pub fn new(session: Arc<Session>, default_timeout: Duration) -> Self {
        Self {
            session,
            default_timeout,
            history: Mutex::new(Vec::new()),
        }
    }

    /// Name of the server this caller talks to.
    pub fn server(&self) -> &str {
        self.session.name()
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Invoke a tool. `timeout` falls back to the caller default.
    ///
    /// Duration runs from hand-off to the session until a result; a timed-out
    /// call records exactly the timeout.
    pub async fn call(&self, tool: &str, arguments: Value, timeout: Option<Duration>) -> ToolResult {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let started = Instant::now();
        let outcome = self
            .session
            .call_tool(tool, arguments.clone(), timeout)
            .await;

        let result = match outcome {
            Ok(payload) => ToolResult::from_payload(tool, arguments, payload, started.elapsed()),
            Err(err) => {
                let duration = if matches!(err, McpError::Timeout { .. }) {
                    timeout
                } else {
                    started.elapsed()
                };
                ToolResult::failure(tool, arguments, err.to_detail(), duration)
            }
        };

        tracing::debug!(
            server = %self.server(),
            tool,
            success = result.is_success(),
            duration_ms = result.duration().as_millis() as u64,
            "tool call finished"
        );
        self.history.lock().push(result.clone());
        result
    }

    /// Invoke a tool and evaluate every assertion, never short-circuiting.
    pub async fn check(
        &self,
        tool: &str,
        arguments: Value,
        assertions: &[Assertion],
        timeout: Option<Duration>,
    ) -> CallReport {
        let result = self.call(tool, arguments, timeout).await;
        CallReport::evaluate(result, assertions)
    }

    /// Like [`ToolCaller::check`] but fails when any assertion fails.
    pub async fn call_and_assert(
        &self,
        tool: &str,
        arguments: Value,
        assertions: &[Assertion],
        timeout: Option<Duration>,
    ) -> std::result::Result<CallReport, AssertionFailure> {
        let report = self.check(tool, arguments, assertions, timeout).await;
        if !report.passed() {
            tracing::debug!(
                server = %self.server(),
                tool,
                failed = report.failed_outcomes().count(),
                "assertions failed"
            );
        }
        report.into_result()
    }

    /// Invoke a tool that is expected to fail, optionally with a message
    /// containing `message` (case-insensitive).
    pub async fn call_expect_error(
        &self,
        tool: &str,
        arguments: Value,
        message: Option<&str>,
        timeout: Option<Duration>,
    ) -> std::result::Result<CallReport, AssertionFailure> {
        let assertion = match message {
            Some(text) => Assertion::error_containing(text),
            None => Assertion::error(),
        };
        self.call_and_assert(tool, arguments, &[assertion], timeout)
            .await
    }

    /// List the server's tools.
    pub async fn list_tools(&self, timeout: Option<Duration>) -> Result<Vec<ToolInfo>> {
        self.session
            .list_tools(timeout.unwrap_or(self.default_timeout))
            .await
    }

    /// Call a tool repeatedly until `condition` holds for a result.
    ///
    /// Returns the first satisfying result, or [`McpError::Timeout`] once
    /// `timeout` has passed.
    pub async fn wait_for<F>(
        &self,
        tool: &str,
        arguments: Value,
        condition: F,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<ToolResult>
    where
        F: Fn(&ToolResult) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let result = self
                .call(tool, arguments.clone(), Some(remaining.min(self.default_timeout)))
                .await;
            if condition(&result) {
                return Ok(result);
            }
            if Instant::now() + poll_interval >= deadline {
                return Err(McpError::Timeout {
                    method: format!("wait_for:{tool}"),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Every result produced by this caller, oldest first.
    pub fn history(&self) -> Vec<ToolResult> {
        self.history.lock().clone()
    }

    pub fn last_call(&self) -> Option<ToolResult> {
        self.history.lock().last().cloned()
    }

    /// Results for one tool.
    pub fn calls_for(&self, tool: &str) -> Vec<ToolResult> {
        self.history
            .lock()
            .iter()
            .filter(|r| r.tool() == tool)
            .cloned()
            .collect()
    }

    pub fn clear_history(&self) {
        self.history.lock().clear();
    }
}

impl std::fmt::Debug for ToolCaller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolCaller")
            .field("server", &self.server())
            .field("default_timeout", &self.default_timeout)
            .field("calls", &self.history.lock().len())
            .finish()
    }
}
