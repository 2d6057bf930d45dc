//! Tracking and cleanup of files created while testing MCP servers.
//!
//! ```rust,ignore
//! use mcp_harness_fs::FileTracker;
//!
//! let tracker = FileTracker::new();
//! let guard = tracker.watch("/tmp/sandbox", "writes_report")?;
//! // ... call tools that write under /tmp/sandbox ...
//! println!("{:?}", guard.diff()?.created);
//! // Dropping the guard deletes what was created.
//! ```

pub mod cleaner;
pub mod error;
pub mod tracker;

pub use cleaner::{CleanupReport, FileCleaner};
pub use error::{FsError, Result};
pub use tracker::{CleanupMode, FileDelta, FileTracker, Fingerprint, WatchGuard};
