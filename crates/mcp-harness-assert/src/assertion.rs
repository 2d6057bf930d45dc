//! Composable predicates over a [`ToolResult`].
//!
//! Every assertion is a pure function of the result. Composite assertions
//! ([`Assertion::Not`], [`Assertion::AllOf`], [`Assertion::AnyOf`]) keep the
//! outcome of each child so a failure report shows exactly which leaf failed.
//!
//! Text matching is case-sensitive unless built with
//! [`Assertion::case_insensitive`], and targets the concatenated text content
//! unless switched to the raw JSON payload with [`Assertion::on_json`].
//! The error-message pattern of [`Assertion::Error`] is always matched
//! case-insensitively.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use regex::{Regex, RegexBuilder};
use serde::Serialize;

use crate::result::ToolResult;

/// Longest snippet of content quoted in a failure detail.
const SNIPPET_LEN: usize = 200;

/// Predicate signature for [`Assertion::Custom`].
pub type Predicate = Arc<dyn Fn(&ToolResult) -> bool + Send + Sync>;

/// What a text assertion looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchTarget {
    /// Text items of the payload joined with newlines.
    #[default]
    Text,
    /// Compact JSON serialisation of the raw payload.
    Json,
}

/// A reusable check against a tool result.
#[derive(Clone)]
pub enum Assertion {
    /// The call succeeded.
    Success,
    /// The call failed, optionally with a message matching `pattern`.
    Error { pattern: Option<Regex> },
    /// The target contains `needle`.
    Contains {
        needle: String,
        case_sensitive: bool,
        target: MatchTarget,
    },
    /// The target matches `regex` somewhere.
    Matches { regex: Regex, target: MatchTarget },
    /// The target equals `expected`.
    Equals {
        expected: String,
        trim: bool,
        case_sensitive: bool,
        target: MatchTarget,
    },
    /// The measured duration does not exceed the limit.
    DurationUnder(Duration),
    /// An arbitrary predicate. A panicking predicate fails.
    Custom {
        description: String,
        predicate: Predicate,
    },
    Not(Box<Assertion>),
    AllOf(Vec<Assertion>),
    AnyOf(Vec<Assertion>),
}

impl Assertion {
    pub fn success() -> Self {
        Self::Success
    }

    /// Any failure.
    pub fn error() -> Self {
        Self::Error { pattern: None }
    }

    /// A failure whose message matches `pattern` (case-insensitive).
    pub fn error_matching(pattern: &str) -> Result<Self, regex::Error> {
        let regex = RegexBuilder::new(pattern).case_insensitive(true).build()?;
        Ok(Self::Error {
            pattern: Some(regex),
        })
    }

    /// A failure whose message contains `text` literally (case-insensitive).
    pub fn error_containing(text: &str) -> Self {
        Self::Error {
            pattern: RegexBuilder::new(&regex::escape(text))
                .case_insensitive(true)
                .build()
                .ok(),
        }
    }

    pub fn contains(needle: impl Into<String>) -> Self {
        Self::Contains {
            needle: needle.into(),
            case_sensitive: true,
            target: MatchTarget::Text,
        }
    }

    pub fn matches(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self::Matches {
            regex: Regex::new(pattern)?,
            target: MatchTarget::Text,
        })
    }

    /// Equality after trimming surrounding whitespace; see [`Assertion::exact`].
    pub fn equals(expected: impl Into<String>) -> Self {
        Self::Equals {
            expected: expected.into(),
            trim: true,
            case_sensitive: true,
            target: MatchTarget::Text,
        }
    }

    pub fn duration_under(limit: Duration) -> Self {
        Self::DurationUnder(limit)
    }

    pub fn custom<F>(description: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&ToolResult) -> bool + Send + Sync + 'static,
    {
        Self::Custom {
            description: description.into(),
            predicate: Arc::new(predicate),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(inner: Assertion) -> Self {
        Self::Not(Box::new(inner))
    }

    pub fn all_of(children: Vec<Assertion>) -> Self {
        Self::AllOf(children)
    }

    pub fn any_of(children: Vec<Assertion>) -> Self {
        Self::AnyOf(children)
    }

    /// Ignore case for `Contains`, `Matches` and `Equals`. No effect elsewhere.
    pub fn case_insensitive(self) -> Self {
        match self {
            Self::Contains { needle, target, .. } => Self::Contains {
                needle,
                case_sensitive: false,
                target,
            },
            Self::Matches { regex, target } => {
                let regex = RegexBuilder::new(regex.as_str())
                    .case_insensitive(true)
                    .build()
                    .unwrap_or(regex);
                Self::Matches { regex, target }
            }
            Self::Equals {
                expected,
                trim,
                target,
                ..
            } => Self::Equals {
                expected,
                trim,
                case_sensitive: false,
                target,
            },
            other => other,
        }
    }

    /// Match against the raw JSON payload instead of the text content.
    pub fn on_json(self) -> Self {
        match self {
            Self::Contains {
                needle,
                case_sensitive,
                ..
            } => Self::Contains {
                needle,
                case_sensitive,
                target: MatchTarget::Json,
            },
            Self::Matches { regex, .. } => Self::Matches {
                regex,
                target: MatchTarget::Json,
            },
            Self::Equals {
                expected,
                trim,
                case_sensitive,
                ..
            } => Self::Equals {
                expected,
                trim,
                case_sensitive,
                target: MatchTarget::Json,
            },
            other => other,
        }
    }

    /// Disable whitespace trimming for `Equals`.
    pub fn exact(self) -> Self {
        match self {
            Self::Equals {
                expected,
                case_sensitive,
                target,
                ..
            } => Self::Equals {
                expected,
                trim: false,
                case_sensitive,
                target,
            },
            other => other,
        }
    }

    /// Human-readable description of what is being checked.
    pub fn describe(&self) -> String {
        match self {
            Self::Success => "tool call succeeded".to_string(),
            Self::Error { pattern: None } => "tool call failed".to_string(),
            Self::Error {
                pattern: Some(regex),
            } => format!("tool call failed with error matching '{}'", regex.as_str()),
            Self::Contains {
                needle,
                case_sensitive,
                target,
            } => format!(
                "{} contains '{}'{}",
                target_label(*target),
                needle,
                case_suffix(*case_sensitive)
            ),
            Self::Matches { regex, target } => {
                format!("{} matches /{}/", target_label(*target), regex.as_str())
            }
            Self::Equals {
                expected,
                case_sensitive,
                target,
                ..
            } => format!(
                "{} equals '{}'{}",
                target_label(*target),
                expected,
                case_suffix(*case_sensitive)
            ),
            Self::DurationUnder(limit) => {
                format!("completed within {:.3}s", limit.as_secs_f64())
            }
            Self::Custom { description, .. } => description.clone(),
            Self::Not(inner) => format!("not ({})", inner.describe()),
            Self::AllOf(children) => format!("all of {} assertions", children.len()),
            Self::AnyOf(children) => format!("any of {} assertions", children.len()),
        }
    }

    /// Evaluate against a result.
    pub fn evaluate(&self, result: &ToolResult) -> AssertionOutcome {
        let description = self.describe();
        match self {
            Self::Success => match result.error() {
                None => AssertionOutcome::pass(description),
                Some(err) => AssertionOutcome::fail(description, format!("call failed: {err}")),
            },
            Self::Error { pattern } => match (result.error(), pattern) {
                (None, _) => AssertionOutcome::fail(
                    description,
                    format!("call succeeded: {}", snippet(result.text())),
                ),
                (Some(_), None) => AssertionOutcome::pass(description),
                (Some(err), Some(regex)) => {
                    if regex.is_match(&err.message) {
                        AssertionOutcome::pass(description)
                    } else {
                        AssertionOutcome::fail(
                            description,
                            format!("error message was: {}", snippet(&err.message)),
                        )
                    }
                }
            },
            Self::Contains {
                needle,
                case_sensitive,
                target,
            } => {
                let subject = subject(result, *target);
                let found = if *case_sensitive {
                    subject.contains(needle.as_str())
                } else {
                    subject.to_lowercase().contains(&needle.to_lowercase())
                };
                if found {
                    AssertionOutcome::pass(description)
                } else {
                    AssertionOutcome::fail(description, format!("actual: {}", snippet(&subject)))
                }
            }
            Self::Matches { regex, target } => {
                let subject = subject(result, *target);
                if regex.is_match(&subject) {
                    AssertionOutcome::pass(description)
                } else {
                    AssertionOutcome::fail(description, format!("actual: {}", snippet(&subject)))
                }
            }
            Self::Equals {
                expected,
                trim,
                case_sensitive,
                target,
            } => {
                let subject = subject(result, *target);
                let (actual, wanted) = if *trim {
                    (subject.trim(), expected.trim())
                } else {
                    (subject.as_str(), expected.as_str())
                };
                let equal = if *case_sensitive {
                    actual == wanted
                } else {
                    actual.to_lowercase() == wanted.to_lowercase()
                };
                if equal {
                    AssertionOutcome::pass(description)
                } else {
                    AssertionOutcome::fail(description, format!("actual: {}", snippet(actual)))
                }
            }
            Self::DurationUnder(limit) => {
                let duration = result.duration();
                if duration <= *limit {
                    AssertionOutcome::pass(description)
                } else {
                    AssertionOutcome::fail(
                        description,
                        format!("took {:.3}s", duration.as_secs_f64()),
                    )
                }
            }
            Self::Custom { predicate, .. } => {
                match catch_unwind(AssertUnwindSafe(|| predicate(result))) {
                    Ok(true) => AssertionOutcome::pass(description),
                    Ok(false) => AssertionOutcome::fail(description, "predicate returned false"),
                    Err(panic) => AssertionOutcome::fail(
                        description,
                        format!("predicate panicked: {}", panic_message(panic.as_ref())),
                    ),
                }
            }
            Self::Not(inner) => {
                let child = inner.evaluate(result);
                let passed = !child.passed;
                AssertionOutcome {
                    description,
                    passed,
                    detail: (!passed).then(|| "inner assertion passed".to_string()),
                    children: vec![child],
                }
            }
            Self::AllOf(children) => {
                let children: Vec<_> = children.iter().map(|a| a.evaluate(result)).collect();
                let failed = children.iter().filter(|c| !c.passed).count();
                AssertionOutcome {
                    description,
                    passed: failed == 0,
                    detail: (failed > 0)
                        .then(|| format!("{failed} of {} failed", children.len())),
                    children,
                }
            }
            Self::AnyOf(children) => {
                let children: Vec<_> = children.iter().map(|a| a.evaluate(result)).collect();
                let passed = children.iter().any(|c| c.passed);
                AssertionOutcome {
                    description,
                    passed,
                    detail: (!passed).then(|| "no assertion passed".to_string()),
                    children,
                }
            }
        }
    }
}

impl fmt::Debug for Assertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Not(inner) => f.debug_tuple("Not").field(inner).finish(),
            Self::AllOf(children) => f.debug_tuple("AllOf").field(children).finish(),
            Self::AnyOf(children) => f.debug_tuple("AnyOf").field(children).finish(),
            other => f.write_str(&other.describe()),
        }
    }
}

fn target_label(target: MatchTarget) -> &'static str {
    match target {
        MatchTarget::Text => "text",
        MatchTarget::Json => "json",
    }
}

fn case_suffix(case_sensitive: bool) -> &'static str {
    if case_sensitive {
        ""
    } else {
        " (ignoring case)"
    }
}

fn subject(result: &ToolResult, target: MatchTarget) -> String {
    match target {
        MatchTarget::Text => result.text().to_string(),
        MatchTarget::Json => result.content_json(),
    }
}

fn snippet(s: &str) -> String {
    if s.is_empty() {
        return "(empty)".to_string();
    }
    match s.char_indices().nth(SNIPPET_LEN) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Result of evaluating one assertion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssertionOutcome {
    pub description: String,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<AssertionOutcome>,
}

impl AssertionOutcome {
    pub fn pass(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            passed: true,
            detail: None,
            children: Vec::new(),
        }
    }

    pub fn fail(description: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            passed: false,
            detail: Some(detail.into()),
            children: Vec::new(),
        }
    }

    /// Failing leaves, depth first.
    pub fn failures(&self) -> Vec<&AssertionOutcome> {
        let mut out = Vec::new();
        self.collect_failures(&mut out);
        out
    }

    fn collect_failures<'a>(&'a self, out: &mut Vec<&'a AssertionOutcome>) {
        if self.passed {
            return;
        }
        let failing_children: Vec<_> = self.children.iter().filter(|c| !c.passed).collect();
        if failing_children.is_empty() {
            out.push(self);
        } else {
            for child in failing_children {
                child.collect_failures(out);
            }
        }
    }
}

impl fmt::Display for AssertionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = if self.passed { "PASS" } else { "FAIL" };
        write!(f, "[{mark}] {}", self.description)?;
        if let Some(detail) = &self.detail {
            write!(f, ": {detail}")?;
        }
        Ok(())
    }
}

/// Evaluate every assertion in order. Never short-circuits.
pub fn evaluate_all(assertions: &[Assertion], result: &ToolResult) -> Vec<AssertionOutcome> {
    assertions.iter().map(|a| a.evaluate(result)).collect()
}
