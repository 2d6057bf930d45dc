//! The run context tying servers, callers, file tracking and the transcript
//! together.
//!
//! ```text
//! Harness::start(config)
//!   ├── Supervisor::start   (all enabled servers, concurrently)
//!   ├── call(scope, ...)    (per test; hang policy applied here)
//!   ├── watch(scope, ...)   (snapshot directories under the scope name)
//!   └── finish()            (stop servers, clean up, export transcript)
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use mcp_harness_assert::{Assertion, CallReport, ErrorKind};
use mcp_harness_config::{FramingKind, HangPolicy, HarnessConfig, ServerEntry, StderrMode};
use mcp_harness_fs::{CleanupMode, CleanupReport, FileTracker};
use mcp_harness_mcp::{
    Framing, ServerConfig, Session, StartReport, Supervisor, ToolCaller, Transcript,
    config::StderrMode as SessionStderr,
};

use crate::error::Result;
use crate::scope::TestScope;

// ─────────────────────────────────────────────────────────────────────────────
// Run Summary
// ─────────────────────────────────────────────────────────────────────────────

/// A server and what went wrong with it.
#[derive(Debug, Clone, Serialize)]
pub struct ServerFailure {
    pub name: String,
    pub error: String,
}

/// A cleanup label whose diff or removal failed outright.
#[derive(Debug, Clone, Serialize)]
pub struct CleanupFailure {
    pub label: String,
    pub error: String,
}

/// Outcome of a whole run, returned by [`Harness::finish`].
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started: Vec<String>,
    pub failed_to_start: Vec<ServerFailure>,
    /// Tool calls made through any caller.
    pub calls: usize,
    /// Calls whose result was not a success.
    pub failed_calls: usize,
    /// Scopes with at least one failed assertion.
    pub failed_scopes: Vec<String>,
    pub teardown_errors: Vec<ServerFailure>,
    pub cleanups: Vec<CleanupReport>,
    pub cleanup_errors: Vec<CleanupFailure>,
    pub transcript_entries: usize,
    pub transcript_path: Option<PathBuf>,
    /// Set when the transcript could not be written to `transcript_path`.
    pub transcript_error: Option<String>,
    pub duration_ms: u64,
}

impl RunSummary {
    /// True when every server started and every scope passed, with a clean
    /// teardown and cleanup and the transcript written.
    pub fn passed(&self) -> bool {
        self.failed_to_start.is_empty()
            && self.failed_scopes.is_empty()
            && self.teardown_errors.is_empty()
            && self.cleanup_errors.is_empty()
            && self.transcript_error.is_none()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Harness
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct CallCounts {
    calls: usize,
    failed: usize,
}

impl CallCounts {
    fn add(&mut self, caller: &ToolCaller) {
        let history = caller.history();
        self.calls += history.len();
        self.failed += history.iter().filter(|r| !r.is_success()).count();
    }
}

/// One harness run. Create with [`Harness::start`], end with
/// [`Harness::finish`].
pub struct Harness {
    config: HarnessConfig,
    supervisor: Supervisor,
    tracker: FileTracker,
    start_report: StartReport,
    callers: Mutex<HashMap<String, Arc<ToolCaller>>>,
    /// Counts from callers replaced after a restart.
    retired: Mutex<CallCounts>,
    scopes: Mutex<BTreeMap<String, TestScope>>,
    started_at: Instant,
}

impl Harness {
    /// Validate `config` and launch every enabled server.
    ///
    /// Servers that fail to start are logged and listed in
    /// [`Harness::start_report`]; they do not fail the run.
    pub async fn start(mut config: HarnessConfig) -> Result<Self> {
        config.validate()?;
        let transcript = Transcript::new().with_echo(config.log_mcp_messages);
        let supervisor = Supervisor::new(transcript);

        let servers: Vec<ServerConfig> = config
            .enabled_servers()
            .map(|entry| server_config(entry, config.default_timeout))
            .collect();
        let skipped = config.servers.len() - servers.len();
        if skipped > 0 {
            tracing::info!(skipped, "skipping disabled MCP servers");
        }

        let start_report = supervisor.start(servers).await?;
        for failure in &start_report.failed {
            tracing::error!(server = %failure.name, error = %failure.error, "MCP server unavailable");
        }

        Ok(Self {
            config,
            supervisor,
            tracker: FileTracker::new(),
            start_report,
            callers: Mutex::new(HashMap::new()),
            retired: Mutex::new(CallCounts::default()),
            scopes: Mutex::new(BTreeMap::new()),
            started_at: Instant::now(),
        })
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn start_report(&self) -> &StartReport {
        &self.start_report
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub fn transcript(&self) -> &Transcript {
        self.supervisor.transcript()
    }

    pub fn tracker(&self) -> &FileTracker {
        &self.tracker
    }

    /// Caller for a running server.
    ///
    /// After a restart a fresh caller (with empty history) is returned.
    pub fn caller(&self, name: &str) -> Result<Arc<ToolCaller>> {
        let session = self.supervisor.get(name)?;
        let mut callers = self.callers.lock();
        if let Some(caller) = callers.get(name)
            && Arc::ptr_eq(caller.session(), &session)
        {
            return Ok(Arc::clone(caller));
        }

        let caller = Arc::new(ToolCaller::new(session, self.call_timeout(name)));
        if let Some(old) = callers.insert(name.to_string(), Arc::clone(&caller)) {
            self.retired.lock().add(&old);
        }
        Ok(caller)
    }

    /// Caller for the first configured server that is running.
    pub fn default_caller(&self) -> Result<Arc<ToolCaller>> {
        let session = self.supervisor.default_session()?;
        self.caller(session.name())
    }

    fn call_timeout(&self, name: &str) -> Duration {
        match self.config.get_server(name) {
            Some(entry) => entry.call_duration(self.config.default_timeout),
            None => self.config.default_call_timeout(),
        }
    }

    fn register(&self, scope: &TestScope) -> Result<()> {
        self.scopes
            .lock()
            .entry(scope.name.clone())
            .or_insert_with(|| scope.clone());
        for path in &scope.cleanup_paths {
            self.tracker.track(&scope.name, path)?;
        }
        Ok(())
    }

    /// Call a tool within `scope` and evaluate `assertions`.
    ///
    /// Every assertion is evaluated; on failure the scope is marked failed
    /// and the error carries the whole report. A timed-out call on a server
    /// with [`HangPolicy::Restart`] restarts that server.
    pub async fn call(
        &self,
        scope: &TestScope,
        tool: &str,
        arguments: Value,
        assertions: &[Assertion],
    ) -> Result<CallReport> {
        self.register(scope)?;
        let caller = match &scope.server {
            Some(name) => self.caller(name),
            None => self.default_caller(),
        }
        .inspect_err(|_| scope.mark_failed())?;

        let report = caller
            .check(tool, arguments, assertions, scope.timeout)
            .await;

        if report.result.error_kind() == Some(ErrorKind::Timeout) {
            self.apply_hang_policy(caller.server()).await;
        }
        if !report.passed() {
            tracing::info!(scope = %scope.name, tool, "assertions failed");
            scope.mark_failed();
        }
        Ok(report.into_result()?)
    }

    async fn apply_hang_policy(&self, name: &str) {
        let policy = self
            .config
            .get_server(name)
            .map(|entry| entry.on_timeout)
            .unwrap_or_default();
        if policy != HangPolicy::Restart {
            return;
        }
        tracing::warn!(server = %name, "call timed out, restarting server");
        if let Err(e) = self.restart(name).await {
            tracing::error!(server = %name, error = %e, "restart after timeout failed");
        }
    }

    /// Restart a server from its config.
    pub async fn restart(&self, name: &str) -> Result<Arc<Session>> {
        Ok(self.supervisor.restart(name).await?)
    }

    /// Snapshot `roots` under the scope's name for later cleanup.
    pub fn watch<P: AsRef<Path>>(&self, scope: &TestScope, roots: &[P]) -> Result<()> {
        self.register(scope)?;
        for root in roots {
            self.tracker.start_watching(root, &scope.name)?;
        }
        Ok(())
    }

    fn cleanup_mode(&self, scope: &TestScope) -> CleanupMode {
        if scope.skip_cleanup || (scope.failed() && !self.config.cleanup_on_failure) {
            CleanupMode::Skip
        } else {
            CleanupMode::Delete
        }
    }

    /// Clean up a scope now instead of at [`Harness::finish`].
    pub fn end_scope(&self, scope: &TestScope) -> Result<CleanupReport> {
        Ok(self
            .tracker
            .cleanup_with(&scope.name, self.cleanup_mode(scope))?)
    }

    /// Stop every server, clean up remaining scopes and export the
    /// transcript.
    ///
    /// Always produces a summary; cleanup and export failures are recorded
    /// in it rather than returned.
    pub async fn finish(self) -> RunSummary {
        let teardown = self.supervisor.stop_all().await;

        let scopes = self.scopes.lock().clone();
        let mut cleanups = Vec::new();
        let mut cleanup_errors = Vec::new();
        for label in self.tracker.labels() {
            let mode = scopes
                .get(&label)
                .map_or(CleanupMode::Delete, |scope| self.cleanup_mode(scope));
            match self.tracker.cleanup_with(&label, mode) {
                Ok(report) => cleanups.push(report),
                Err(e) => {
                    tracing::warn!(label = %label, error = %e, "cleanup failed");
                    cleanup_errors.push(CleanupFailure {
                        label,
                        error: e.to_string(),
                    });
                }
            }
        }

        let mut counts = std::mem::take(&mut *self.retired.lock());
        for caller in self.callers.lock().values() {
            counts.add(caller);
        }

        let transcript = self.supervisor.transcript();
        let transcript_path = self.config.transcript_path.clone();
        let (transcript_entries, transcript_error) =
            match transcript.finalize(transcript_path.as_deref()) {
                Ok(count) => (count, None),
                Err(e) => {
                    tracing::error!(error = %e, "failed to write transcript");
                    (transcript.len(), Some(e.to_string()))
                }
            };

        let summary = RunSummary {
            started: self.start_report.started.clone(),
            failed_to_start: self
                .start_report
                .failed
                .iter()
                .map(|f| ServerFailure {
                    name: f.name.clone(),
                    error: f.error.to_string(),
                })
                .collect(),
            calls: counts.calls,
            failed_calls: counts.failed,
            failed_scopes: scopes
                .values()
                .filter(|s| s.failed())
                .map(|s| s.name.clone())
                .collect(),
            teardown_errors: teardown
                .errors
                .iter()
                .map(|(name, error)| ServerFailure {
                    name: name.clone(),
                    error: error.to_string(),
                })
                .collect(),
            cleanups,
            cleanup_errors,
            transcript_entries,
            transcript_path,
            transcript_error,
            duration_ms: self.started_at.elapsed().as_millis() as u64,
        };

        tracing::info!(
            calls = summary.calls,
            failed_calls = summary.failed_calls,
            failed_scopes = summary.failed_scopes.len(),
            transcript_entries,
            "harness run finished"
        );
        summary
    }
}

impl std::fmt::Debug for Harness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Harness")
            .field("supervisor", &self.supervisor)
            .field("scopes", &self.scopes.lock().len())
            .finish()
    }
}

/// Launch settings for one configured server.
pub fn server_config(entry: &ServerEntry, default_timeout: f64) -> ServerConfig {
    let framing = match entry.framing {
        FramingKind::Lines => Framing::Lines,
        FramingKind::ContentLength => Framing::ContentLength,
    };
    let stderr = match entry.stderr {
        StderrMode::Log => SessionStderr::Log,
        StderrMode::Inherit => SessionStderr::Inherit,
        StderrMode::Discard => SessionStderr::Discard,
    };

    let mut config = ServerConfig::new(&entry.name, &entry.command)
        .with_args(entry.args.clone())
        .with_env(entry.env_tuples())
        .with_startup_timeout(entry.startup_duration())
        .with_shutdown_timeout(entry.shutdown_duration())
        .with_call_timeout(entry.call_duration(default_timeout))
        .with_framing(framing)
        .with_stderr(stderr);
    if let Some(cwd) = &entry.cwd {
        config = config.with_cwd(cwd);
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HarnessError;

    #[test]
    fn test_server_config_conversion() {
        let entry = ServerEntry::new("files", "mcp-server-filesystem")
            .with_arg("/tmp")
            .with_env("DEBUG", "1")
            .with_startup_timeout(2.5)
            .with_framing(FramingKind::ContentLength)
            .with_stderr(StderrMode::Discard)
            .with_cwd("/srv");

        let config = server_config(&entry, 30.0);
        assert_eq!(config.name, "files");
        assert_eq!(config.command, "mcp-server-filesystem");
        assert_eq!(config.args, vec!["/tmp"]);
        assert_eq!(config.env, vec![("DEBUG".to_string(), "1".to_string())]);
        assert_eq!(config.startup_timeout, Duration::from_millis(2500));
        assert_eq!(config.call_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.framing, Framing::ContentLength);
        assert_eq!(config.stderr, SessionStderr::Discard);
        assert_eq!(config.cwd, Some(PathBuf::from("/srv")));
    }

    #[test]
    fn test_call_timeout_override() {
        let entry = ServerEntry::new("slow", "srv").with_call_timeout(90.0);
        let config = server_config(&entry, 30.0);
        assert_eq!(config.call_timeout, Some(Duration::from_secs(90)));
    }

    #[tokio::test]
    async fn test_start_with_no_servers() {
        let harness = Harness::start(HarnessConfig::new()).await.unwrap();
        assert!(harness.start_report().all_started());
        assert!(harness.default_caller().is_err());

        let scope = TestScope::new("t");
        let err = harness
            .call(&scope, "echo", Value::Null, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::Mcp(_)));
        assert!(scope.failed());

        let summary = harness.finish().await;
        assert_eq!(summary.calls, 0);
        assert_eq!(summary.failed_scopes, vec!["t"]);
        assert!(!summary.passed());
    }

    #[tokio::test]
    async fn test_unwritable_transcript_still_summarizes() {
        let dir = tempfile::TempDir::new().unwrap();
        // A regular file where the parent directory should be.
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();
        let mut config = HarnessConfig::new();
        config.transcript_path = Some(blocker.join("run.json"));

        let harness = Harness::start(config).await.unwrap();
        let summary = harness.finish().await;
        assert!(summary.transcript_error.is_some());
        assert_eq!(summary.transcript_path, Some(blocker.join("run.json")));
        assert!(summary.failed_scopes.is_empty());
        assert!(!summary.passed());
    }

    #[tokio::test]
    async fn test_start_reports_spawn_failure() {
        let mut config = HarnessConfig::new();
        config
            .servers
            .push(ServerEntry::new("missing", "nonexistent-command-12345"));
        config
            .servers
            .push(ServerEntry::new("off", "also-missing").with_enabled(false));

        let harness = Harness::start(config).await.unwrap();
        assert_eq!(harness.start_report().failed.len(), 1);
        assert_eq!(harness.start_report().failed[0].name, "missing");

        let summary = harness.finish().await;
        assert_eq!(summary.failed_to_start.len(), 1);
        assert!(summary.failed_to_start[0].error.contains("missing"));
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = HarnessConfig::new();
        config.servers.push(ServerEntry::new("dup", "a"));
        config.servers.push(ServerEntry::new("dup", "b"));
        assert!(matches!(
            Harness::start(config).await,
            Err(HarnessError::Config(_))
        ));
    }
}
