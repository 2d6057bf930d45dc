//! Configuration types mapping to the config file schema.
//!
//! ```toml
//! default_timeout = 30.0      # default per-call timeout (seconds)
//! log_level = "INFO"
//! log_mcp_messages = true     # echo protocol traffic through tracing
//! cleanup_on_failure = true   # clean tracked files even when a test failed
//! transcript_path = "mcp-transcript.json"
//!
//! [[servers]]
//! name = "echo"
//! command = "python"
//! args = ["-m", "echo_server"]
//! env = { DEBUG = "1" }
//! startup_timeout = 30.0
//! framing = "lines"           # or "content-length"
//! on_timeout = "keep"         # or "restart"
//! stderr = "log"              # or "inherit", "discard"
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, Result};

/// Default per-call timeout in seconds.
pub const DEFAULT_CALL_TIMEOUT_SECS: f64 = 30.0;

/// Default server startup timeout in seconds.
pub const DEFAULT_STARTUP_TIMEOUT_SECS: f64 = 30.0;

/// Default server shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: f64 = 10.0;

/// Accepted log level names.
pub const VALID_LOG_LEVELS: &[&str] = &["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL"];

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Fully resolved harness configuration.
///
/// Built by applying one or more [`ConfigLayer`]s on top of the defaults.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HarnessConfig {
    /// Servers to launch, in configuration order.
    pub servers: Vec<ServerEntry>,
    /// Default timeout for tool calls, in seconds.
    pub default_timeout: f64,
    /// Log level (DEBUG, INFO, WARNING, ERROR, CRITICAL).
    pub log_level: String,
    /// Whether protocol messages are echoed through the log output.
    pub log_mcp_messages: bool,
    /// Whether tracked files are cleaned up even when a test failed.
    pub cleanup_on_failure: bool,
    /// Where the transcript is exported when the run finishes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript_path: Option<PathBuf>,
    /// Optional JSON log file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            default_timeout: DEFAULT_CALL_TIMEOUT_SECS,
            log_level: "INFO".to_string(),
            log_mcp_messages: true,
            cleanup_on_failure: true,
            transcript_path: None,
            log_file: None,
        }
    }
}

impl HarnessConfig {
    /// Create a config with default settings and no servers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string (not validated).
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let layer: ConfigLayer = toml::from_str(toml_str)?;
        let mut config = Self::default();
        config.merge(layer);
        Ok(config)
    }

    /// Parse from a YAML string (not validated).
    pub fn from_yaml(yaml_str: &str) -> Result<Self> {
        // An empty YAML document deserializes to unit, not a map.
        if yaml_str.trim().is_empty() {
            return Ok(Self::default());
        }
        let layer: ConfigLayer = serde_yaml::from_str(yaml_str)?;
        let mut config = Self::default();
        config.merge(layer);
        Ok(config)
    }

    /// Render as TOML, e.g. to write a starter `mcp_servers.toml`.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Overlay a layer on top of this config.
    ///
    /// Scalars set in the layer win. Servers are merged by name: a server in
    /// the layer replaces the one with the same name in place, new names are
    /// appended in layer order.
    pub fn merge(&mut self, layer: ConfigLayer) {
        for server in layer.servers {
            match self.servers.iter_mut().find(|s| s.name == server.name) {
                Some(existing) => *existing = server,
                None => self.servers.push(server),
            }
        }

        if let Some(timeout) = layer.default_timeout {
            self.default_timeout = timeout;
        }
        if let Some(level) = layer.log_level {
            self.log_level = level;
        }
        if let Some(log) = layer.log_mcp_messages {
            self.log_mcp_messages = log;
        }
        if let Some(cleanup) = layer.cleanup_on_failure {
            self.cleanup_on_failure = cleanup;
        }
        if layer.transcript_path.is_some() {
            self.transcript_path = layer.transcript_path;
        }
        if layer.log_file.is_some() {
            self.log_file = layer.log_file;
        }
    }

    /// Validate the config, normalising the log level to upper case.
    pub fn validate(&mut self) -> Result<()> {
        check_timeout("default_timeout", self.default_timeout)?;

        let level = self.log_level.trim().to_uppercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::invalid(
                "log_level",
                format!(
                    "'{}' is not one of {}",
                    self.log_level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            ));
        }
        self.log_level = level;

        let mut seen = std::collections::HashSet::new();
        for server in &self.servers {
            server.validate()?;
            if !seen.insert(server.name.as_str()) {
                return Err(ConfigError::DuplicateServer(server.name.clone()));
            }
        }

        Ok(())
    }

    /// Get a server entry by name.
    pub fn get_server(&self, name: &str) -> Option<&ServerEntry> {
        self.servers.iter().find(|s| s.name == name)
    }

    /// Names of all configured servers, in order.
    pub fn server_names(&self) -> Vec<&str> {
        self.servers.iter().map(|s| s.name.as_str()).collect()
    }

    /// Servers that are enabled.
    pub fn enabled_servers(&self) -> impl Iterator<Item = &ServerEntry> {
        self.servers.iter().filter(|s| s.enabled)
    }

    /// Default call timeout as a [`Duration`].
    pub fn default_call_timeout(&self) -> Duration {
        secs_to_duration(self.default_timeout, DEFAULT_CALL_TIMEOUT_SECS)
    }

    /// Map the configured log level to a `tracing` filter directive.
    pub fn log_filter(&self) -> &'static str {
        match self.log_level.to_uppercase().as_str() {
            "DEBUG" => "debug",
            "WARNING" => "warn",
            "ERROR" | "CRITICAL" => "error",
            _ => "info",
        }
    }
}

/// One config file's worth of settings. Every scalar is optional so that
/// partial files can be layered.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigLayer {
    pub servers: Vec<ServerEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_timeout: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_mcp_messages: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleanup_on_failure: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Server Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Wire framing used by a server on stdio.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FramingKind {
    /// One JSON message per line.
    #[default]
    Lines,
    /// `Content-Length` header followed by the JSON body.
    ContentLength,
}

/// What the harness does with a server after one of its calls times out.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum HangPolicy {
    /// Leave the process running.
    #[default]
    Keep,
    /// Stop and relaunch the server.
    Restart,
}

/// Where a server's stderr goes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StderrMode {
    /// Forward each line to the log at debug level.
    #[default]
    Log,
    /// Share the harness's stderr.
    Inherit,
    /// Drop it.
    Discard,
}

/// One `[[servers]]` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerEntry {
    /// Unique server identifier.
    pub name: String,
    /// Command to start the server.
    pub command: String,
    /// Command arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment overrides.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Working directory for the server process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    /// Seconds to wait for the initialize handshake.
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout: f64,
    /// Seconds to wait for a graceful exit before killing.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: f64,
    /// Per-call timeout override in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_timeout: Option<f64>,
    /// Wire framing.
    #[serde(default)]
    pub framing: FramingKind,
    /// Behaviour after a call timeout.
    #[serde(default)]
    pub on_timeout: HangPolicy,
    /// Handling of the server's stderr.
    #[serde(default)]
    pub stderr: StderrMode,
    /// Whether this server is launched. Defaults to true.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_startup_timeout() -> f64 {
    DEFAULT_STARTUP_TIMEOUT_SECS
}

fn default_shutdown_timeout() -> f64 {
    DEFAULT_SHUTDOWN_TIMEOUT_SECS
}

fn default_enabled() -> bool {
    true
}

impl ServerEntry {
    /// Create a new server entry.
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT_SECS,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            call_timeout: None,
            framing: FramingKind::Lines,
            on_timeout: HangPolicy::Keep,
            stderr: StderrMode::Log,
            enabled: true,
        }
    }

    /// Add an argument.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Replace the argument list.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Relative paths resolve against the harness working directory.
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Set the startup timeout in seconds.
    pub fn with_startup_timeout(mut self, secs: f64) -> Self {
        self.startup_timeout = secs;
        self
    }

    /// Set the per-call timeout in seconds.
    pub fn with_call_timeout(mut self, secs: f64) -> Self {
        self.call_timeout = Some(secs);
        self
    }

    /// Set the wire framing.
    pub fn with_framing(mut self, framing: FramingKind) -> Self {
        self.framing = framing;
        self
    }

    /// Set the hang policy.
    pub fn with_on_timeout(mut self, policy: HangPolicy) -> Self {
        self.on_timeout = policy;
        self
    }

    /// Set stderr handling.
    pub fn with_stderr(mut self, stderr: StderrMode) -> Self {
        self.stderr = stderr;
        self
    }

    /// Set enabled state.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Environment overrides as key/value tuples.
    pub fn env_tuples(&self) -> Vec<(String, String)> {
        self.env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Startup timeout as a [`Duration`].
    pub fn startup_duration(&self) -> Duration {
        secs_to_duration(self.startup_timeout, DEFAULT_STARTUP_TIMEOUT_SECS)
    }

    /// Shutdown timeout as a [`Duration`].
    pub fn shutdown_duration(&self) -> Duration {
        secs_to_duration(self.shutdown_timeout, DEFAULT_SHUTDOWN_TIMEOUT_SECS)
    }

    /// Per-call timeout, falling back to `default_secs`.
    pub fn call_duration(&self, default_secs: f64) -> Duration {
        secs_to_duration(self.call_timeout.unwrap_or(default_secs), default_secs)
    }

    fn validate(&self) -> Result<()> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(ConfigError::invalid("servers.name", "server name cannot be empty"));
        }
        if !name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ConfigError::invalid(
                "servers.name",
                format!(
                    "'{}' must be alphanumeric (with dashes/underscores allowed)",
                    self.name
                ),
            ));
        }
        if self.command.trim().is_empty() {
            return Err(ConfigError::invalid(
                format!("servers.{}.command", self.name),
                "command cannot be empty",
            ));
        }
        check_timeout(
            &format!("servers.{}.startup_timeout", self.name),
            self.startup_timeout,
        )?;
        check_timeout(
            &format!("servers.{}.shutdown_timeout", self.name),
            self.shutdown_timeout,
        )?;
        if let Some(call) = self.call_timeout {
            check_timeout(&format!("servers.{}.call_timeout", self.name), call)?;
        }
        Ok(())
    }
}

fn check_timeout(field: &str, secs: f64) -> Result<()> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(ConfigError::invalid(field, "timeout must be positive"));
    }
    Ok(())
}

fn secs_to_duration(secs: f64, fallback: f64) -> Duration {
    Duration::try_from_secs_f64(secs)
        .or_else(|_| Duration::try_from_secs_f64(fallback))
        .unwrap_or(Duration::from_secs(30))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
