//! Deletion of tracked files.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::Result;
use crate::tracker::FileTracker;

/// What a cleanup did for one label.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    pub label: String,
    /// Created paths that were removed (or would be, in a dry run),
    /// deepest first.
    pub removed: Vec<PathBuf>,
    /// Pre-existing files that changed. Reported, never restored.
    pub modified: Vec<PathBuf>,
    /// Pre-existing files that disappeared. Reported, never restored.
    pub deleted: Vec<PathBuf>,
    pub errors: Vec<(PathBuf, String)>,
    pub dry_run: bool,
    pub skipped: bool,
}

impl CleanupReport {
    pub(crate) fn skipped(label: &str) -> Self {
        Self {
            label: label.to_string(),
            skipped: true,
            ..Self::default()
        }
    }

    /// True when every removal succeeded.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Removes files recorded by a [`FileTracker`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FileCleaner {
    dry_run: bool,
}

impl FileCleaner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report what would be removed without touching the filesystem or the
    /// tracked set.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Remove everything created under `label` and forget the label.
    ///
    /// Unknown labels yield an empty report.
    pub fn cleanup(&self, tracker: &FileTracker, label: &str) -> Result<CleanupReport> {
        let Some(set) = tracker.snapshot_of(label) else {
            tracing::debug!(label, "nothing to clean up");
            return Ok(CleanupReport {
                label: label.to_string(),
                dry_run: self.dry_run,
                ..CleanupReport::default()
            });
        };

        // The label is only forgotten once the diff succeeded.
        let delta = set.delta()?;
        if !self.dry_run {
            tracker.take(label);
        }
        if !delta.modified.is_empty() || !delta.deleted.is_empty() {
            tracing::warn!(
                label,
                modified = delta.modified.len(),
                deleted = delta.deleted.len(),
                "pre-existing files changed and were not restored"
            );
        }

        let mut report = self.remove_paths(delta.created);
        report.label = label.to_string();
        report.modified = delta.modified;
        report.deleted = delta.deleted;

        tracing::info!(
            label,
            removed = report.removed.len(),
            errors = report.errors.len(),
            dry_run = self.dry_run,
            "cleaned up tracked files"
        );
        Ok(report)
    }

    /// Clean up every label. Labels are processed in sorted order.
    pub fn cleanup_all(&self, tracker: &FileTracker) -> Result<Vec<CleanupReport>> {
        tracker
            .labels()
            .iter()
            .map(|label| self.cleanup(tracker, label))
            .collect()
    }

    /// Remove arbitrary paths, deepest first. Missing paths are ignored.
    pub fn remove_paths(&self, mut paths: Vec<PathBuf>) -> CleanupReport {
        paths.sort_by(|a, b| {
            b.components()
                .count()
                .cmp(&a.components().count())
                .then_with(|| a.cmp(b))
        });
        paths.dedup();

        let mut report = CleanupReport {
            dry_run: self.dry_run,
            ..CleanupReport::default()
        };
        for path in paths {
            if self.dry_run {
                tracing::info!(path = %path.display(), "[dry run] would delete");
                report.removed.push(path);
                continue;
            }
            match remove(&path) {
                Ok(()) => report.removed.push(path),
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "failed to delete");
                    report.errors.push((path, e.to_string()));
                }
            }
        }
        report
    }
}

fn remove(path: &Path) -> std::io::Result<()> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    let result = if metadata.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    match result {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "removed");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
