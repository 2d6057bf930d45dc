//! Multi-server lifecycle management.
//!
//! The [`Supervisor`] launches every configured server concurrently, each
//! bounded by its own startup timeout, and holds one [`Session`] per server
//! name. A failing server never aborts its siblings; failures are collected
//! in the [`StartReport`].
//!
//! # Example
//!
//! ```rust,ignore
//! use mcp_harness_mcp::{ServerConfig, Supervisor, Transcript};
//!
//! let supervisor = Supervisor::new(Transcript::new());
//! let report = supervisor
//!     .start(vec![ServerConfig::new("files", "mcp-server-filesystem").with_arg("/tmp")])
//!     .await?;
//! for failure in &report.failed {
//!     eprintln!("{}: {}", failure.name, failure.error);
//! }
//!
//! let session = supervisor.get("files")?;
//! let tools = session.list_tools(Duration::from_secs(5)).await?;
//!
//! supervisor.stop_all().await;
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;

use crate::config::ServerConfig;
use crate::error::{McpError, Result};
use crate::session::Session;
use crate::transcript::Transcript;

/// A server that failed to start.
#[derive(Debug, Clone)]
pub struct StartupFailure {
    pub name: String,
    pub error: McpError,
}

/// Outcome of [`Supervisor::start`].
#[derive(Debug, Clone, Default)]
pub struct StartReport {
    /// Servers that started, in configuration order.
    pub started: Vec<String>,
    /// Servers that failed, in configuration order.
    pub failed: Vec<StartupFailure>,
}

impl StartReport {
    /// True when every server started.
    pub fn all_started(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Outcome of [`Supervisor::stop_all`].
#[derive(Debug, Clone, Default)]
pub struct TeardownReport {
    pub stopped: Vec<String>,
    /// Servers whose shutdown reported an error. They are still removed.
    pub errors: Vec<(String, McpError)>,
}

/// Holds the sessions of every running server.
pub struct Supervisor {
    transcript: Transcript,
    /// Every config ever started, in order.
    configs: Mutex<Vec<ServerConfig>>,
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    failures: Mutex<Vec<StartupFailure>>,
}

impl Supervisor {
    pub fn new(transcript: Transcript) -> Self {
        Self {
            transcript,
            configs: Mutex::new(Vec::new()),
            sessions: Mutex::new(HashMap::new()),
            failures: Mutex::new(Vec::new()),
        }
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Launch all servers concurrently.
    ///
    /// Fails up front with [`McpError::DuplicateServer`] if two configs (or a
    /// config and an already known server) share a name; otherwise always
    /// returns a report.
    pub async fn start(&self, configs: Vec<ServerConfig>) -> Result<StartReport> {
        {
            let known = self.configs.lock();
            let mut seen: HashSet<&str> = known.iter().map(|c| c.name.as_str()).collect();
            for config in &configs {
                if !seen.insert(config.name.as_str()) {
                    return Err(McpError::DuplicateServer(config.name.clone()));
                }
            }
        }
        self.configs.lock().extend(configs.iter().cloned());

        tracing::info!(server_count = configs.len(), "starting MCP servers");

        let launches = configs
            .iter()
            .map(|config| launch(config, self.transcript.clone()));
        let outcomes = join_all(launches).await;

        let mut report = StartReport::default();
        for (config, outcome) in configs.iter().zip(outcomes) {
            match outcome {
                Ok(session) => {
                    self.sessions
                        .lock()
                        .insert(config.name.clone(), Arc::new(session));
                    report.started.push(config.name.clone());
                }
                Err(error) => {
                    tracing::error!(server = %config.name, error = %error, "failed to start MCP server");
                    report.failed.push(StartupFailure {
                        name: config.name.clone(),
                        error,
                    });
                }
            }
        }
        self.failures.lock().extend(report.failed.iter().cloned());

        tracing::info!(
            started = report.started.len(),
            failed = report.failed.len(),
            "MCP server startup complete"
        );
        Ok(report)
    }

    /// Session for a running server.
    pub fn get(&self, name: &str) -> Result<Arc<Session>> {
        self.sessions
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| McpError::NotFound(name.to_string()))
    }

    /// Session of the first configured server that is running.
    pub fn default_session(&self) -> Result<Arc<Session>> {
        let configs = self.configs.lock();
        let sessions = self.sessions.lock();
        configs
            .iter()
            .find_map(|c| sessions.get(&c.name).cloned())
            .ok_or_else(|| McpError::NotFound("no MCP server is running".to_string()))
    }

    /// Config a server was started with.
    pub fn config(&self, name: &str) -> Option<ServerConfig> {
        self.configs.lock().iter().find(|c| c.name == name).cloned()
    }

    /// Names of all configured servers, in order.
    pub fn server_names(&self) -> Vec<String> {
        self.configs.lock().iter().map(|c| c.name.clone()).collect()
    }

    /// Names of running servers, in configuration order.
    pub fn started_names(&self) -> Vec<String> {
        let configs = self.configs.lock();
        let sessions = self.sessions.lock();
        configs
            .iter()
            .filter(|c| sessions.contains_key(&c.name))
            .map(|c| c.name.clone())
            .collect()
    }

    /// Every startup failure so far.
    pub fn failures(&self) -> Vec<StartupFailure> {
        self.failures.lock().clone()
    }

    /// True if the server has a usable session.
    pub fn is_running(&self, name: &str) -> bool {
        self.sessions
            .lock()
            .get(name)
            .is_some_and(|s| s.is_usable())
    }

    /// Close a server's session and launch it again from its config.
    pub async fn restart(&self, name: &str) -> Result<Arc<Session>> {
        let config = self
            .config(name)
            .ok_or_else(|| McpError::NotFound(name.to_string()))?;

        let old = self.sessions.lock().remove(name);
        if let Some(old) = old
            && let Err(e) = old.close().await
        {
            tracing::warn!(server = %name, error = %e, "error closing MCP server before restart");
        }

        tracing::info!(server = %name, "restarting MCP server");
        match launch(&config, self.transcript.clone()).await {
            Ok(session) => {
                let session = Arc::new(session);
                self.sessions
                    .lock()
                    .insert(name.to_string(), Arc::clone(&session));
                Ok(session)
            }
            Err(error) => {
                tracing::error!(server = %name, error = %error, "failed to restart MCP server");
                self.failures.lock().push(StartupFailure {
                    name: name.to_string(),
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }

    /// Close one server's session and forget it. Its config is kept, so
    /// [`Supervisor::restart`] can bring it back.
    pub async fn stop(&self, name: &str) -> Result<()> {
        let session = self
            .sessions
            .lock()
            .remove(name)
            .ok_or_else(|| McpError::NotFound(name.to_string()))?;
        tracing::info!(server = %name, "stopping MCP server");
        session.close().await
    }

    /// Close every session. Unconditional and idempotent.
    pub async fn stop_all(&self) -> TeardownReport {
        let sessions: Vec<(String, Arc<Session>)> = self.sessions.lock().drain().collect();
        if sessions.is_empty() {
            return TeardownReport::default();
        }
        tracing::info!(server_count = sessions.len(), "shutting down all MCP servers");

        let closes = sessions.iter().map(|(_, session)| session.close());
        let outcomes = join_all(closes).await;

        let mut report = TeardownReport::default();
        for ((name, _), outcome) in sessions.into_iter().zip(outcomes) {
            if let Err(e) = outcome {
                tracing::warn!(server = %name, error = %e, "error during MCP server shutdown");
                report.errors.push((name.clone(), e));
            }
            report.stopped.push(name);
        }
        report
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("configured", &self.server_names())
            .field("running", &self.started_names())
            .finish()
    }
}

/// Spawn one server and complete its handshake within the startup timeout.
async fn launch(config: &ServerConfig, transcript: Transcript) -> Result<Session> {
    let session = Session::spawn(config, transcript)?;
    let timeout_ms = config.startup_timeout.as_millis() as u64;
    let startup_timeout = || McpError::StartupTimeout {
        server: config.name.clone(),
        timeout_ms,
    };

    let outcome = tokio::time::timeout(
        config.startup_timeout,
        session.initialize(config.startup_timeout),
    )
    .await;
    let error = match outcome {
        Ok(Ok(_)) => return Ok(session),
        Ok(Err(e)) if e.is_timeout() => startup_timeout(),
        Ok(Err(e)) => e,
        Err(_) => startup_timeout(),
    };

    if let Err(e) = session.close().await {
        tracing::debug!(server = %config.name, error = %e, "error closing failed MCP server");
    }
    Err(error)
}
