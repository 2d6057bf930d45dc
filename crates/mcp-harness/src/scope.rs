//! Per-test settings passed to [`crate::Harness::call`].

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Settings for one test.
///
/// The scope name doubles as the file-tracking label, so everything a test
/// watches or tracks is cleaned up together. Clones share the failure flag.
#[derive(Debug, Clone)]
pub struct TestScope {
    /// Test name; also the cleanup label.
    pub name: String,
    /// Server to call. `None` selects the first running server.
    pub server: Option<String>,
    /// Overrides the server's call timeout.
    pub timeout: Option<Duration>,
    /// Extra paths deleted when the scope is cleaned up.
    pub cleanup_paths: Vec<PathBuf>,
    /// Keep every created file.
    pub skip_cleanup: bool,
    failed: Arc<AtomicBool>,
}

impl TestScope {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            server: None,
            timeout: None,
            cleanup_paths: Vec::new(),
            skip_cleanup: false,
            failed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cleanup_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cleanup_paths.push(path.into());
        self
    }

    pub fn with_skip_cleanup(mut self, skip: bool) -> Self {
        self.skip_cleanup = skip;
        self
    }

    /// Record that an assertion in this scope failed.
    pub fn mark_failed(&self) {
        self.failed.store(true, Ordering::Relaxed);
    }

    pub fn failed(&self) -> bool {
        self.failed.load(Ordering::Relaxed)
    }
}
