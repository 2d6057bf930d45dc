//! Launch settings for a single MCP server.

use std::path::PathBuf;
use std::time::Duration;

use crate::framing::Framing;

/// Where a server's stderr goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StderrMode {
    /// Forward each line to `tracing` at debug level.
    #[default]
    Log,
    Inherit,
    Discard,
}

/// How to launch and talk to one server under test.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Key used by the supervisor and in the transcript.
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    /// Added on top of the inherited environment.
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
    /// Deadline for spawn plus handshake.
    pub startup_timeout: Duration,
    /// Grace period between closing stdin and killing the process.
    pub shutdown_timeout: Duration,
    /// Per-call timeout override.
    pub call_timeout: Option<Duration>,
    pub framing: Framing,
    pub stderr: StderrMode,
}

impl ServerConfig {
    /// Defaults: 30s startup, 10s shutdown grace, line framing, stderr to the log.
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
            startup_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(10),
            call_timeout: None,
            framing: Framing::Lines,
            stderr: StderrMode::Log,
        }
    }

    /// Replace the argument list.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Replace the extra environment.
    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    pub fn with_env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    pub fn with_stderr(mut self, stderr: StderrMode) -> Self {
        self.stderr = stderr;
        self
    }
}
