//! `mcp-harness check` - start every server and report readiness.

use anyhow::{Result, bail};
use clap::Args;

use mcp_harness::Harness;

use super::{Context, report_summary};

/// Arguments for `mcp-harness check`.
#[derive(Args, Debug)]
pub struct CheckArgs {}

/// Run the check command.
pub async fn run(_args: CheckArgs, ctx: &Context) -> Result<()> {
    if ctx.config.servers.is_empty() {
        println!("No MCP servers configured.");
        println!();
        println!("Create mcp_servers.toml with:");
        println!("  [[servers]]");
        println!("  name = \"my-server\"");
        println!("  command = \"my-mcp-server\"");
        return Ok(());
    }
    if let Some(path) = &ctx.config_source {
        println!("Config: {}", path.display());
    }

    let harness = Harness::start(ctx.config.clone()).await?;
    for entry in &ctx.config.servers {
        if !entry.enabled {
            println!("  - {} (disabled)", entry.name);
            continue;
        }
        match harness.supervisor().get(&entry.name) {
            Ok(session) => {
                let info = session
                    .server_info()
                    .map(|i| format!("{} {}", i.name, i.version))
                    .unwrap_or_default();
                println!("  ✓ {} ({info})", entry.name);
            }
            Err(_) => {
                let error = harness
                    .start_report()
                    .failed
                    .iter()
                    .find(|f| f.name == entry.name)
                    .map(|f| f.error.to_string())
                    .unwrap_or_else(|| "not running".to_string());
                println!("  ✗ {}: {error}", entry.name);
            }
        }
    }

    let summary = harness.finish().await;
    report_summary(&summary, ctx)?;
    if !summary.failed_to_start.is_empty() {
        bail!(
            "{} of {} server(s) failed to start",
            summary.failed_to_start.len(),
            summary.started.len() + summary.failed_to_start.len()
        );
    }
    println!("All servers ready.");
    Ok(())
}
