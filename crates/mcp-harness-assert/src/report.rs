//! A call together with every assertion evaluated against it.

use std::fmt;

use serde::Serialize;

use crate::assertion::{Assertion, AssertionOutcome, evaluate_all};
use crate::result::ToolResult;

/// Tool result plus the ordered outcome of each assertion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallReport {
    pub result: ToolResult,
    pub outcomes: Vec<AssertionOutcome>,
}

impl CallReport {
    /// Evaluate every assertion against `result`.
    pub fn evaluate(result: ToolResult, assertions: &[Assertion]) -> Self {
        let outcomes = evaluate_all(assertions, &result);
        Self { result, outcomes }
    }

    /// True when every outcome passed (vacuously true for none).
    pub fn passed(&self) -> bool {
        self.outcomes.iter().all(|o| o.passed)
    }

    pub fn failed_outcomes(&self) -> impl Iterator<Item = &AssertionOutcome> {
        self.outcomes.iter().filter(|o| !o.passed)
    }

    /// Convert into `Err(AssertionFailure)` when anything failed.
    pub fn into_result(self) -> Result<CallReport, AssertionFailure> {
        if self.passed() {
            Ok(self)
        } else {
            Err(AssertionFailure { report: self })
        }
    }
}

impl fmt::Display for CallReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({:.3}s)",
            self.result.tool(),
            self.result.duration().as_secs_f64()
        )?;
        for outcome in &self.outcomes {
            write!(f, "\n  {outcome}")?;
            for leaf in outcome.failures() {
                if !std::ptr::eq(leaf, outcome) {
                    write!(f, "\n    {leaf}")?;
                }
            }
        }
        Ok(())
    }
}

/// One or more assertions failed. Carries the full report.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{} of {} assertions failed for tool '{}'\n{report}",
    .report.failed_outcomes().count(),
    .report.outcomes.len(),
    .report.result.tool())]
pub struct AssertionFailure {
    pub report: CallReport,
}

impl AssertionFailure {
    pub fn outcomes(&self) -> &[AssertionOutcome] {
        &self.report.outcomes
    }

    pub fn result(&self) -> &ToolResult {
        &self.report.result
    }
}
