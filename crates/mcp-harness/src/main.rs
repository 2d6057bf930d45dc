//! MCP Harness - process-level test harness for MCP servers
//!
//! Main entry point for the `mcp-harness` CLI.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use mcp_harness::init_tracing;
use mcp_harness_config::load_config;

mod commands;

use commands::{call, check, tools};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// MCP Harness - launch, exercise and verify MCP servers
#[derive(Parser)]
#[command(name = "mcp-harness")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Config file (default: discover mcp_servers.toml/.yaml upwards)
    #[arg(short, long, global = true, env = "MCP_HARNESS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Write the protocol transcript to this file
    #[arg(long, global = true)]
    pub transcript: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start every configured server and report readiness
    Check(check::CheckArgs),

    /// List the tools offered by running servers
    Tools(tools::ToolsArgs),

    /// Call one tool and check the result
    Call(call::CallArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let cwd = std::env::current_dir()?;
    let loaded = load_config(cli.config.as_deref(), &cwd)?;
    let mut config = loaded.config;
    if let Some(path) = cli.transcript {
        config.transcript_path = Some(path);
    }

    let _guard = init_tracing(&config, cli.verbose);
    match &loaded.source {
        Some(path) => tracing::debug!(path = %path.display(), "loaded config"),
        None => tracing::debug!("no config file found, using defaults"),
    }

    let ctx = commands::Context {
        config,
        config_source: loaded.source,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Check(args) => check::run(args, &ctx).await,
        Commands::Tools(args) => tools::run(args, &ctx).await,
        Commands::Call(args) => call::run(args, &ctx).await,
    }
}
