//! `mcp-harness tools` - list tools offered by servers.

use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::Args;

use mcp_harness::Harness;

use super::{Context, report_summary, start_with};

/// Arguments for `mcp-harness tools`.
#[derive(Args, Debug)]
pub struct ToolsArgs {
    /// Only list tools of this server
    pub server: Option<String>,

    /// Show full input schemas
    #[arg(long)]
    pub full: bool,
}

/// Run the tools command.
pub async fn run(args: ToolsArgs, ctx: &Context) -> Result<()> {
    let harness = match &args.server {
        Some(name) => start_with(ctx.only_server(name)?, name).await?,
        None => Harness::start(ctx.config.clone()).await?,
    };

    for failure in &harness.start_report().failed {
        eprintln!("✗ {}: {}", failure.name, failure.error);
    }

    let listed = print_tools(&harness, args.full, ctx.config.default_call_timeout()).await;
    let summary = harness.finish().await;
    report_summary(&summary, ctx)?;
    listed
}

async fn print_tools(harness: &Harness, full: bool, timeout: Duration) -> Result<()> {
    for name in harness.supervisor().started_names() {
        let caller = harness.caller(&name)?;
        let tools = caller
            .list_tools(Some(timeout))
            .await
            .with_context(|| format!("failed to list tools of '{name}'"))?;
        println!("{name} ({} tools)", tools.len());
        for tool in &tools {
            match &tool.description {
                Some(description) => println!("  {} - {description}", tool.name),
                None => println!("  {}", tool.name),
            }
            if full && let Some(schema) = &tool.input_schema {
                for line in serde_json::to_string_pretty(schema)?.lines() {
                    println!("      {line}");
                }
            }
        }
    }
    Ok(())
}
