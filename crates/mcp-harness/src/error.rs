//! Error type for harness runs.

use thiserror::Error;

use mcp_harness_assert::AssertionFailure;
use mcp_harness_config::ConfigError;
use mcp_harness_fs::FsError;
use mcp_harness_mcp::McpError;

/// Result type for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Mcp(#[from] McpError),

    #[error(transparent)]
    Fs(#[from] FsError),

    /// One or more assertions failed; carries the full report.
    #[error(transparent)]
    Assertion(Box<AssertionFailure>),
}

impl From<AssertionFailure> for HarnessError {
    fn from(failure: AssertionFailure) -> Self {
        Self::Assertion(Box::new(failure))
    }
}

impl HarnessError {
    /// The assertion report, when this is an assertion failure.
    pub fn assertion_failure(&self) -> Option<&AssertionFailure> {
        match self {
            Self::Assertion(failure) => Some(failure),
            _ => None,
        }
    }
}
