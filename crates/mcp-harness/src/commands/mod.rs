//! CLI command handlers.

pub mod call;
pub mod check;
pub mod tools;

use std::path::PathBuf;

use anyhow::{Result, bail};

use mcp_harness::{Harness, RunSummary};
use mcp_harness_config::HarnessConfig;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Loaded and validated configuration.
    pub config: HarnessConfig,
    /// File the configuration came from, if any.
    pub config_source: Option<PathBuf>,
    /// Verbose output enabled.
    pub verbose: bool,
}

impl Context {
    /// Config reduced to a single server, which is enabled even if the file
    /// disables it.
    pub fn only_server(&self, name: &str) -> Result<HarnessConfig> {
        let mut config = self.config.clone();
        let Some(mut entry) = config.get_server(name).cloned() else {
            bail!(
                "unknown server '{name}' (configured: {})",
                self.config.server_names().join(", ")
            );
        };
        entry.enabled = true;
        config.servers = vec![entry];
        Ok(config)
    }
}

/// Print where the transcript went, then fail on a non-passing run.
pub fn report_summary(summary: &RunSummary, ctx: &Context) -> Result<()> {
    if let Some(path) = &summary.transcript_path {
        println!(
            "Transcript: {} ({} entries)",
            path.display(),
            summary.transcript_entries
        );
    }
    if ctx.verbose {
        println!(
            "{} call(s), {} failed, {}ms",
            summary.calls, summary.failed_calls, summary.duration_ms
        );
    }
    for error in &summary.teardown_errors {
        eprintln!("warning: {} did not shut down cleanly: {}", error.name, error.error);
    }
    for error in &summary.cleanup_errors {
        eprintln!("warning: cleanup of '{}' failed: {}", error.label, error.error);
    }
    if let Some(error) = &summary.transcript_error {
        bail!("failed to write transcript: {error}");
    }
    Ok(())
}

/// Start a harness, failing when the named server did not come up.
pub async fn start_with(config: HarnessConfig, server: &str) -> Result<Harness> {
    let harness = Harness::start(config).await?;
    if let Some(failure) = harness
        .start_report()
        .failed
        .iter()
        .find(|f| f.name == server)
    {
        let message = failure.error.to_string();
        harness.finish().await;
        bail!("server '{server}' failed to start: {message}");
    }
    Ok(harness)
}
