//! A protocol session with one MCP server.
//!
//! Requests are correlated to responses by id. Any number of calls may be in
//! flight at once; a background reader task parses inbound frames and hands
//! each response to the caller waiting on that id.
//!
//! ```text
//!  send() ──► pending[id] = oneshot ──► write frame ──► await (timeout)
//!                                                          ▲
//!  reader task ◄── frame ◄── server stdout                 │
//!       └── response{id} ──► pending.remove(id).send ──────┘
//! ```

use std::collections::{BTreeSet, HashMap};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::{Mutex as AsyncMutex, oneshot};
use tokio::task::JoinHandle;

use crate::config::{ServerConfig, StderrMode};
use crate::error::{McpError, Result};
use crate::framing::{FrameReader, Framing, write_frame};
use crate::protocol::{
    CallToolParams, Incoming, InitializeParams, InitializeResult, JsonRpcError,
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ListToolsResult, ServerInfo, ToolInfo,
};
use crate::transcript::{Direction, EntryKind, Event, Transcript};

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type Reply = Result<Value>;

/// Default grace period for sessions built over plain streams.
const STREAM_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Expired ids remembered for late-response detection; the oldest are
/// forgotten first.
const MAX_EXPIRED_IDS: usize = 1024;

/// Lifecycle state of a session.
#[derive(Debug, Clone)]
pub enum SessionState {
    /// Accepting calls.
    Ready,
    /// The stream failed; every call returns this error.
    Failed(McpError),
    /// Torn down by [`Session::close`].
    Closed,
}

/// How far a request got before its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteProgress {
    /// Waiting for the writer.
    Queued,
    /// Part of the frame may be on the wire.
    Writing,
    Sent,
}

/// An in-flight request.
struct PendingCall {
    method: String,
    sent_at: Instant,
    deadline: Instant,
    tx: oneshot::Sender<Reply>,
}

/// State guarded by one lock so that state checks, registration and
/// resolution never interleave.
struct Calls {
    state: SessionState,
    pending: HashMap<u64, PendingCall>,
    expired: BTreeSet<u64>,
}

impl Calls {
    fn ensure_ready(&self) -> Result<()> {
        match &self.state {
            SessionState::Ready => Ok(()),
            SessionState::Failed(err) => Err(err.clone()),
            SessionState::Closed => Err(McpError::ConnectionClosed),
        }
    }

    /// Move a ready session to `Failed`, resolving every pending call with
    /// `err`. Returns false if the session was not ready.
    fn fail(&mut self, err: &McpError) -> bool {
        if !matches!(self.state, SessionState::Ready) {
            return false;
        }
        self.state = SessionState::Failed(err.clone());
        for (_, call) in self.pending.drain() {
            let _ = call.tx.send(Err(err.clone()));
        }
        true
    }

    fn expire(&mut self, id: u64) {
        self.expired.insert(id);
        while self.expired.len() > MAX_EXPIRED_IDS {
            self.expired.pop_first();
        }
    }
}

/// State shared between the session handle and its reader task.
struct Shared {
    name: String,
    framing: Framing,
    calls: Mutex<Calls>,
    writer: AsyncMutex<Option<BoxedWriter>>,
    transcript: Transcript,
}

impl Shared {
    fn event(&self, direction: Direction, kind: EntryKind) -> Event {
        Event::new(self.name.clone(), direction, kind)
    }

    async fn write(&self, body: &str) -> Result<()> {
        let mut progress = WriteProgress::Queued;
        self.write_tracked(body, &mut progress).await
    }

    async fn write_tracked(&self, body: &str, progress: &mut WriteProgress) -> Result<()> {
        let mut guard = self.writer.lock().await;
        // A failure may have happened while this write was queued.
        self.calls.lock().ensure_ready()?;
        let writer = guard.as_mut().ok_or(McpError::ConnectionClosed)?;
        *progress = WriteProgress::Writing;
        write_frame(writer, self.framing, body).await?;
        *progress = WriteProgress::Sent;
        Ok(())
    }

    fn fail(&self, err: McpError) {
        if self.calls.lock().fail(&err) {
            tracing::warn!(server = %self.name, error = %err, "MCP session failed");
            self.transcript.record(
                self.event(Direction::Internal, EntryKind::Lifecycle)
                    .summary(format!("session failed: {err}")),
            );
        }
    }

    /// Handle one inbound frame. An error fails the session.
    async fn dispatch(self: &Arc<Self>, frame: &str) -> Result<()> {
        let message = match Incoming::parse(frame) {
            Ok(message) => message,
            Err(reason) => {
                self.transcript.record(
                    self.event(Direction::Inbound, EntryKind::Anomaly)
                        .summary(frame.to_string()),
                );
                return Err(McpError::protocol(format!(
                    "malformed frame from '{}': {reason}",
                    self.name
                )));
            }
        };

        match message {
            Incoming::Response(response) => self.resolve(response, frame),
            Incoming::Request { id, method, .. } => {
                self.transcript.record(
                    self.event(Direction::Inbound, EntryKind::Request)
                        .method(method.as_str())
                        .summary(frame.to_string()),
                );
                let reply = if method == "ping" {
                    JsonRpcResponse::success(id, json!({}))
                } else {
                    JsonRpcResponse::failure(id, JsonRpcError::method_not_found(&method))
                };
                let body = serde_json::to_string(&reply)?;
                self.transcript.record(
                    self.event(Direction::Outbound, EntryKind::Response)
                        .method(method.as_str())
                        .summary(body.clone()),
                );
                // Reply off the read path so a blocked stdin never stalls stdout.
                let shared = Arc::clone(self);
                tokio::spawn(async move {
                    if let Err(err) = shared.write(&body).await {
                        tracing::debug!(server = %shared.name, error = %err, "failed to answer server request");
                    }
                });
            }
            Incoming::Notification { method, .. } => {
                self.transcript.record(
                    self.event(Direction::Inbound, EntryKind::Notification)
                        .method(method)
                        .summary(frame.to_string()),
                );
            }
        }
        Ok(())
    }

    fn resolve(&self, response: JsonRpcResponse, frame: &str) {
        let id = response.id.as_u64();
        let mut calls = self.calls.lock();

        match id.and_then(|id| calls.pending.remove(&id)) {
            Some(call) => {
                let elapsed = call.sent_at.elapsed();
                if Instant::now() > call.deadline {
                    tracing::debug!(server = %self.name, id, "response arrived at the deadline");
                }
                let mut event = self
                    .event(Direction::Inbound, EntryKind::Response)
                    .method(call.method.as_str())
                    .summary(frame.to_string())
                    .elapsed(elapsed);
                if let Some(id) = id {
                    event = event.request_id(id);
                }
                self.transcript.record(event);

                let reply = response
                    .into_result()
                    .map_err(|e| McpError::server_error(e.code, e.message, e.data));
                let _ = call.tx.send(reply);
            }
            None => {
                let late = id.is_some_and(|id| calls.expired.remove(&id));
                let reason = if late {
                    "late response for expired request"
                } else {
                    "response with no pending request"
                };
                tracing::warn!(server = %self.name, id = %response.id, "{reason}");
                let mut event = self
                    .event(Direction::Inbound, EntryKind::Anomaly)
                    .summary(format!("{reason}: {frame}"));
                if let Some(id) = id {
                    event = event.request_id(id);
                }
                self.transcript.record(event);
            }
        }
    }
}

async fn read_loop(shared: Arc<Shared>, mut frames: FrameReader<BufReader<BoxedReader>>) {
    loop {
        let frame = match frames.next_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                shared.fail(McpError::ConnectionClosed);
                return;
            }
            Err(err) => {
                shared.fail(err);
                return;
            }
        };
        if let Err(err) = shared.dispatch(&frame).await {
            shared.fail(err);
            return;
        }
    }
}

fn forward_stderr(server: String, stderr: ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(server = %server, "stderr: {line}");
        }
    });
}

/// A session with one MCP server process or stream pair.
pub struct Session {
    shared: Arc<Shared>,
    next_id: AtomicU64,
    child: Mutex<Option<Child>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    server_info: Mutex<Option<ServerInfo>>,
    shutdown_timeout: Duration,
}

impl Session {
    /// Spawn the server process and start reading its stdout.
    ///
    /// Does NOT initialize; call [`Session::initialize`] next.
    pub fn spawn(config: &ServerConfig, transcript: Transcript) -> Result<Self> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(config.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(match config.stderr {
                StderrMode::Log => Stdio::piped(),
                StderrMode::Inherit => Stdio::inherit(),
                StderrMode::Discard => Stdio::null(),
            })
            .kill_on_drop(true);
        if let Some(cwd) = &config.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| McpError::spawn_failed(&config.name, format!("{}: {e}", config.command)))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::spawn_failed(&config.name, "stdin not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::spawn_failed(&config.name, "stdout not captured"))?;
        if let Some(stderr) = child.stderr.take() {
            forward_stderr(config.name.clone(), stderr);
        }

        let pid = child.id();
        tracing::info!(
            server = %config.name,
            command = %config.command,
            pid,
            "spawned MCP server"
        );

        let session = Self::build(
            &config.name,
            config.framing,
            Box::new(stdout),
            Box::new(stdin),
            transcript,
            Some(child),
            config.shutdown_timeout,
        );
        session.shared.transcript.record(
            session
                .shared
                .event(Direction::Internal, EntryKind::Lifecycle)
                .summary(format!(
                    "spawned '{}' (pid {})",
                    config.command,
                    pid.map(|p| p.to_string()).unwrap_or_else(|| "?".into())
                )),
        );
        Ok(session)
    }

    /// Build a session over an arbitrary stream pair.
    pub fn from_streams<R, W>(
        name: impl Into<String>,
        framing: Framing,
        reader: R,
        writer: W,
        transcript: Transcript,
    ) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::build(
            &name.into(),
            framing,
            Box::new(reader),
            Box::new(writer),
            transcript,
            None,
            STREAM_SHUTDOWN_TIMEOUT,
        )
    }

    fn build(
        name: &str,
        framing: Framing,
        reader: BoxedReader,
        writer: BoxedWriter,
        transcript: Transcript,
        child: Option<Child>,
        shutdown_timeout: Duration,
    ) -> Self {
        let shared = Arc::new(Shared {
            name: name.to_string(),
            framing,
            calls: Mutex::new(Calls {
                state: SessionState::Ready,
                pending: HashMap::new(),
                expired: BTreeSet::new(),
            }),
            writer: AsyncMutex::new(Some(writer)),
            transcript,
        });
        let frames = FrameReader::new(BufReader::new(reader), framing);
        let handle = tokio::spawn(read_loop(Arc::clone(&shared), frames));

        Self {
            shared,
            next_id: AtomicU64::new(1),
            child: Mutex::new(child),
            reader: Mutex::new(Some(handle)),
            server_info: Mutex::new(None),
            shutdown_timeout,
        }
    }

    /// Server name.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn state(&self) -> SessionState {
        self.shared.calls.lock().state.clone()
    }

    /// True while the session accepts calls.
    pub fn is_usable(&self) -> bool {
        matches!(self.shared.calls.lock().state, SessionState::Ready)
    }

    /// Number of requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.shared.calls.lock().pending.len()
    }

    pub fn transcript(&self) -> &Transcript {
        &self.shared.transcript
    }

    /// Send a request and wait for its response.
    ///
    /// `timeout` covers both writing the request and waiting for the reply.
    /// On timeout the id is remembered as expired; a response arriving later
    /// is logged as an anomaly and discarded. A request cut off halfway
    /// through its frame leaves the stream unusable, so that fails the
    /// session.
    pub async fn send(&self, method: &str, params: Option<Value>, timeout: Duration) -> Reply {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;
        let (tx, mut rx) = oneshot::channel();
        let sent_at = Instant::now();

        {
            let mut calls = self.shared.calls.lock();
            calls.ensure_ready()?;
            calls.pending.insert(
                id,
                PendingCall {
                    method: method.to_string(),
                    sent_at,
                    deadline: sent_at + timeout,
                    tx,
                },
            );
        }

        self.shared.transcript.record(
            self.shared
                .event(Direction::Outbound, EntryKind::Request)
                .method(method)
                .request_id(id)
                .summary(body.clone()),
        );

        let mut progress = WriteProgress::Queued;
        let exchange = async {
            // Close or a session failure resolves the call while the write
            // may still be stuck.
            tokio::select! {
                written = self.shared.write_tracked(&body, &mut progress) => {
                    if let Err(err) = written {
                        self.shared.calls.lock().pending.remove(&id);
                        return Err(err);
                    }
                }
                early = &mut rx => return early.unwrap_or(Err(McpError::Cancelled)),
            }
            match (&mut rx).await {
                Ok(reply) => reply,
                Err(_) => Err(McpError::Cancelled),
            }
        };

        let outcome = tokio::time::timeout(timeout, exchange).await;
        match outcome {
            Ok(reply) => reply,
            Err(_) => {
                let removed = {
                    let mut calls = self.shared.calls.lock();
                    let removed = calls.pending.remove(&id).is_some();
                    if removed {
                        calls.expire(id);
                    }
                    removed
                };
                // Resolved between the deadline and the removal.
                if !removed && let Ok(reply) = rx.try_recv() {
                    return reply;
                }

                let timeout_ms = timeout.as_millis() as u64;
                tracing::warn!(
                    server = %self.shared.name,
                    method,
                    id,
                    timeout_ms,
                    progress = ?progress,
                    "request timed out"
                );
                if progress == WriteProgress::Writing {
                    self.shared.fail(McpError::Io(format!(
                        "write of '{method}' stalled past its {timeout_ms}ms deadline"
                    )));
                }
                self.shared.transcript.record(
                    self.shared
                        .event(Direction::Internal, EntryKind::Timeout)
                        .method(method)
                        .request_id(id)
                        .summary(format!("no response within {timeout_ms}ms"))
                        .elapsed(sent_at.elapsed()),
                );
                Err(McpError::Timeout {
                    method: method.to_string(),
                    timeout_ms,
                })
            }
        }
    }

    /// Send a notification (no response expected).
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        self.shared.calls.lock().ensure_ready()?;
        let body = serde_json::to_string(&JsonRpcNotification::new(method, params))?;
        self.shared.transcript.record(
            self.shared
                .event(Direction::Outbound, EntryKind::Notification)
                .method(method)
                .summary(body.clone()),
        );
        self.shared.write(&body).await
    }

    /// Perform the `initialize` handshake.
    pub async fn initialize(&self, timeout: Duration) -> Result<InitializeResult> {
        let params = serde_json::to_value(InitializeParams::default())?;
        let value = self.send("initialize", Some(params), timeout).await?;
        let result: InitializeResult = serde_json::from_value(value)
            .map_err(|e| McpError::protocol(format!("invalid initialize result: {e}")))?;

        self.notify("notifications/initialized", None).await?;

        tracing::info!(
            server = %self.shared.name,
            server_name = %result.server_info.name,
            server_version = %result.server_info.version,
            "initialized MCP session"
        );
        *self.server_info.lock() = Some(result.server_info.clone());
        Ok(result)
    }

    /// Server info from the handshake.
    pub fn server_info(&self) -> Option<ServerInfo> {
        self.server_info.lock().clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.server_info.lock().is_some()
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(McpError::NotInitialized)
        }
    }

    /// List the tools offered by the server.
    pub async fn list_tools(&self, timeout: Duration) -> Result<Vec<ToolInfo>> {
        self.ensure_initialized()?;
        let value = self.send("tools/list", None, timeout).await?;
        let result: ListToolsResult = serde_json::from_value(value)
            .map_err(|e| McpError::protocol(format!("invalid tools/list result: {e}")))?;
        Ok(result.tools)
    }

    /// Invoke a tool, returning the raw result payload.
    pub async fn call_tool(&self, name: &str, arguments: Value, timeout: Duration) -> Reply {
        self.ensure_initialized()?;
        let arguments = if arguments.is_null() {
            json!({})
        } else {
            arguments
        };
        let params = serde_json::to_value(CallToolParams {
            name: name.to_string(),
            arguments,
        })?;
        self.send("tools/call", Some(params), timeout).await
    }

    /// Tear down the session.
    ///
    /// Pending calls resolve with [`McpError::Cancelled`]. The server's stdin
    /// is closed, then the process gets `shutdown_timeout` to exit before it
    /// is killed. If stdin cannot be closed within `shutdown_timeout` (a
    /// write is stuck on a server that stopped reading) the process is
    /// killed straight away. Idempotent.
    pub async fn close(&self) -> Result<()> {
        {
            let mut calls = self.shared.calls.lock();
            if matches!(calls.state, SessionState::Closed) {
                return Ok(());
            }
            calls.state = SessionState::Closed;
            let now = Instant::now();
            for (id, call) in calls.pending.drain() {
                tracing::debug!(
                    server = %self.shared.name,
                    id,
                    method = %call.method,
                    overdue = now > call.deadline,
                    "cancelling pending call"
                );
                let _ = call.tx.send(Err(McpError::Cancelled));
            }
        }

        let stdin_closed = tokio::time::timeout(self.shutdown_timeout, async {
            let writer = self.shared.writer.lock().await.take();
            if let Some(mut writer) = writer {
                let _ = writer.shutdown().await;
            }
        })
        .await
        .is_ok();
        if !stdin_closed {
            tracing::warn!(server = %self.shared.name, "stdin blocked by a stalled write");
        }

        let mut result = Ok(());
        let child = self.child.lock().take();
        if let Some(mut child) = child {
            let exited = if stdin_closed {
                tokio::time::timeout(self.shutdown_timeout, child.wait())
                    .await
                    .ok()
            } else {
                None
            };
            match exited {
                Some(Ok(status)) => {
                    tracing::debug!(server = %self.shared.name, %status, "MCP server exited");
                }
                Some(Err(e)) => result = Err(e.into()),
                None => {
                    tracing::warn!(
                        server = %self.shared.name,
                        timeout_ms = self.shutdown_timeout.as_millis() as u64,
                        "MCP server did not exit in time, killing"
                    );
                    if let Err(e) = child.kill().await {
                        result = Err(e.into());
                    }
                }
            }
        }

        if let Some(handle) = self.reader.lock().take() {
            handle.abort();
        }

        self.shared.transcript.record(
            self.shared
                .event(Direction::Internal, EntryKind::Lifecycle)
                .summary("session closed"),
        );
        tracing::info!(server = %self.shared.name, "closed MCP session");
        result
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(handle) = self.reader.lock().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .field("pending", &self.pending_count())
            .finish()
    }
}
