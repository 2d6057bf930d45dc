//! `mcp-harness call` - call one tool and check the result.

use std::time::Duration;

use anyhow::{Context as _, Result, bail};
use clap::Args;
use serde_json::Value;

use mcp_harness::{HarnessError, TestScope};
use mcp_harness_assert::{Assertion, CallReport};

use super::{Context, report_summary, start_with};

/// Arguments for `mcp-harness call`.
#[derive(Args, Debug)]
pub struct CallArgs {
    /// Server to call
    pub server: String,

    /// Tool name
    pub tool: String,

    /// Tool arguments as a JSON object
    #[arg(long, default_value = "{}")]
    pub args: String,

    /// Call timeout in seconds (default: from config)
    #[arg(long)]
    pub timeout: Option<f64>,

    /// Expect the call to fail, optionally with a message matching PATTERN
    #[arg(long, value_name = "PATTERN", num_args = 0..=1)]
    pub expect_error: Option<Option<String>>,

    /// Require the text content to contain TEXT (repeatable)
    #[arg(long, value_name = "TEXT")]
    pub contains: Vec<String>,

    /// Require the text content to match REGEX (repeatable)
    #[arg(long = "matches", value_name = "REGEX")]
    pub matches: Vec<String>,

    /// Print the raw result payload as JSON
    #[arg(long)]
    pub raw: bool,
}

impl CallArgs {
    fn arguments(&self) -> Result<Value> {
        let value: Value = serde_json::from_str(&self.args)
            .with_context(|| format!("--args is not valid JSON: {}", self.args))?;
        if !value.is_object() {
            bail!("--args must be a JSON object, got: {}", self.args);
        }
        Ok(value)
    }

    fn timeout(&self) -> Result<Option<Duration>> {
        match self.timeout {
            Some(secs) if !secs.is_finite() || secs <= 0.0 => {
                bail!("--timeout must be a positive number of seconds, got {secs}")
            }
            Some(secs) => Ok(Some(Duration::from_secs_f64(secs))),
            None => Ok(None),
        }
    }

    fn assertions(&self) -> Result<Vec<Assertion>> {
        let mut assertions = match &self.expect_error {
            Some(Some(pattern)) => vec![
                Assertion::error_matching(pattern)
                    .with_context(|| format!("invalid --expect-error pattern: {pattern}"))?,
            ],
            Some(None) => vec![Assertion::error()],
            None => vec![Assertion::success()],
        };
        assertions.extend(self.contains.iter().map(Assertion::contains));
        for pattern in &self.matches {
            assertions.push(
                Assertion::matches(pattern)
                    .with_context(|| format!("invalid --matches pattern: {pattern}"))?,
            );
        }
        Ok(assertions)
    }
}

/// Run the call command.
pub async fn run(args: CallArgs, ctx: &Context) -> Result<()> {
    let arguments = args.arguments()?;
    let timeout = args.timeout()?;
    let assertions = args.assertions()?;

    let harness = start_with(ctx.only_server(&args.server)?, &args.server).await?;
    let mut scope = TestScope::new(format!("cli-{}", args.tool)).with_server(&args.server);
    scope.timeout = timeout;

    let outcome = harness
        .call(&scope, &args.tool, arguments, &assertions)
        .await;
    let report = match &outcome {
        Ok(report) => Some(report),
        Err(HarnessError::Assertion(failure)) => Some(&failure.report),
        Err(_) => None,
    };
    let printed = report.map_or(Ok(()), |report| print_report(report, args.raw));

    let summary = harness.finish().await;
    report_summary(&summary, ctx)?;
    printed?;

    match outcome {
        Ok(_) => Ok(()),
        Err(HarnessError::Assertion(failure)) => bail!(
            "{} of {} assertion(s) failed",
            failure.report.failed_outcomes().count(),
            failure.outcomes().len()
        ),
        Err(e) => Err(e.into()),
    }
}

fn print_report(report: &CallReport, raw: bool) -> Result<()> {
    let result = &report.result;
    let duration_ms = result.duration().as_secs_f64() * 1000.0;
    match result.error() {
        None => println!("{} succeeded in {duration_ms:.1}ms", result.tool()),
        Some(error) => println!(
            "{} failed in {duration_ms:.1}ms ({}): {}",
            result.tool(),
            error.kind,
            error.message
        ),
    }
    if raw {
        println!("{}", serde_json::to_string_pretty(result.content())?);
    } else if !result.text().is_empty() {
        println!("{}", result.text());
    }
    println!();
    for outcome in &report.outcomes {
        println!("{outcome}");
    }
    Ok(())
}
