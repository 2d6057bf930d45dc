//! Tracing setup: human-readable stderr plus an optional JSON log file.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use mcp_harness_config::HarnessConfig;

/// Crates whose events follow the configured level; everything else is
/// held at `warn`.
const CRATES: &[&str] = &[
    "mcp_harness",
    "mcp_harness_config",
    "mcp_harness_mcp",
    "mcp_harness_assert",
    "mcp_harness_fs",
];

/// Filter directives for a level such as `"info"`.
pub fn filter_directives(level: &str) -> String {
    let mut directives: Vec<String> = CRATES.iter().map(|c| format!("{c}={level}")).collect();
    directives.push("warn".to_string());
    directives.join(",")
}

/// Install the global subscriber.
///
/// `RUST_LOG` overrides the configured level; `verbose` forces debug. The
/// returned guard must be held until exit so the file writer flushes.
/// Returns `None` when no log file is configured.
pub fn init_tracing(config: &HarnessConfig, verbose: bool) -> Option<WorkerGuard> {
    let level = if verbose { "debug" } else { config.log_filter() };
    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(level)));

    let console = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr)
        .with_filter(console_filter);

    let (file_layer, guard) = match config.log_file.as_deref().and_then(file_writer) {
        Some((writer, guard)) => {
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_filter(EnvFilter::new(filter_directives("trace")));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    // A subscriber may already be installed (e.g. by a test runner).
    let _ = tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .try_init();
    guard
}

fn file_writer(
    path: &Path,
) -> Option<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    let file_name = path.file_name()?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    if let Err(e) = std::fs::create_dir_all(dir) {
        eprintln!("cannot create log directory {}: {e}", dir.display());
        return None;
    }
    let appender = tracing_appender::rolling::never(dir, file_name);
    Some(tracing_appender::non_blocking(appender))
}
