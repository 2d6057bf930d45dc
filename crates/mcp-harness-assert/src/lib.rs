//! Tool-call results and the assertion engine.
//!
//! ```rust,ignore
//! use mcp_harness_assert::{Assertion, CallReport};
//!
//! let report = CallReport::evaluate(result, &[
//!     Assertion::success(),
//!     Assertion::contains("ok").case_insensitive(),
//! ]);
//! report.into_result()?;
//! ```

pub mod assertion;
pub mod report;
pub mod result;

pub use assertion::{Assertion, AssertionOutcome, MatchTarget, Predicate, evaluate_all};
pub use report::{AssertionFailure, CallReport};
pub use result::{CallStatus, ErrorDetail, ErrorKind, ToolResult};
