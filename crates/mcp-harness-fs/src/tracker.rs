//! Snapshot-and-diff tracking of directories touched by tool calls.
//!
//! Each label owns a set of watch roots and the snapshot taken when each root
//! was first watched. [`FileTracker::diff`] compares the current tree against
//! that original snapshot, so repeated diffs are stable.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use serde::Serialize;
use walkdir::WalkDir;

use crate::cleaner::{CleanupReport, FileCleaner};
use crate::error::{FsError, Result};

/// What is recorded per path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint {
    pub size: u64,
    pub modified: Option<SystemTime>,
    pub is_dir: bool,
}

impl Fingerprint {
    fn of(metadata: &std::fs::Metadata) -> Self {
        Self {
            size: metadata.len(),
            modified: metadata.modified().ok(),
            is_dir: metadata.is_dir(),
        }
    }

    /// Directories only change by gaining or losing entries, which the diff
    /// reports per entry.
    fn differs_from(&self, other: &Fingerprint) -> bool {
        if self.is_dir != other.is_dir {
            return true;
        }
        !self.is_dir && (self.size != other.size || self.modified != other.modified)
    }
}

/// Changes under a label's roots since they were first watched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileDelta {
    pub created: Vec<PathBuf>,
    pub modified: Vec<PathBuf>,
    pub deleted: Vec<PathBuf>,
}

impl FileDelta {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}

/// Whether cleanup actually deletes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CleanupMode {
    #[default]
    Delete,
    /// Keep created files and the tracked set.
    Skip,
}

/// Roots, snapshot and explicit paths for one label.
#[derive(Debug, Clone, Default)]
pub(crate) struct TrackedSet {
    roots: Vec<PathBuf>,
    snapshot: BTreeMap<PathBuf, Fingerprint>,
    explicit: BTreeSet<PathBuf>,
}

impl TrackedSet {
    pub(crate) fn delta(&self) -> Result<FileDelta> {
        let mut current = BTreeMap::new();
        for root in &self.roots {
            if root.is_dir() {
                current.extend(snapshot(root)?);
            }
        }

        let mut delta = FileDelta::default();
        for (path, now) in &current {
            match self.snapshot.get(path) {
                None => delta.created.push(path.clone()),
                Some(before) if now.differs_from(before) => delta.modified.push(path.clone()),
                Some(_) => {}
            }
        }
        for path in self.snapshot.keys() {
            if !current.contains_key(path) {
                delta.deleted.push(path.clone());
            }
        }
        for path in &self.explicit {
            if path.exists() && !current.contains_key(path) && !self.snapshot.contains_key(path) {
                delta.created.push(path.clone());
            }
        }
        delta.created.sort();
        Ok(delta)
    }

    fn file_count(&self) -> usize {
        self.snapshot.len() + self.explicit.len()
    }
}

/// Walk `root` recursively (the root itself excluded).
fn snapshot(root: &Path) -> Result<BTreeMap<PathBuf, Fingerprint>> {
    let mut entries = BTreeMap::new();
    for entry in WalkDir::new(root).min_depth(1).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            // Entries may vanish while the server is still writing.
            Err(e) if e.io_error().map(|io| io.kind()) == Some(std::io::ErrorKind::NotFound) => {
                continue;
            }
            Err(source) => {
                return Err(FsError::Walk {
                    path: root.to_path_buf(),
                    source,
                });
            }
        };
        match entry.metadata() {
            Ok(metadata) => {
                entries.insert(entry.into_path(), Fingerprint::of(&metadata));
            }
            Err(e) => {
                tracing::debug!(path = %entry.path().display(), error = %e, "skipping unreadable entry");
            }
        }
    }
    Ok(entries)
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).map_err(|e| FsError::io(path, e))
}

/// Tracks files created under watched directories, grouped by label.
///
/// Cheap to clone; clones share state.
#[derive(Debug, Clone, Default)]
pub struct FileTracker {
    sets: Arc<Mutex<BTreeMap<String, TrackedSet>>>,
}

impl FileTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot `root` recursively under `label`.
    ///
    /// Watching a root the label already watches keeps the original snapshot.
    pub fn start_watching(&self, root: impl AsRef<Path>, label: &str) -> Result<()> {
        let root = absolute(root.as_ref())?;
        if !root.is_dir() {
            return Err(FsError::NotADirectory { path: root });
        }
        if self
            .sets
            .lock()
            .get(label)
            .is_some_and(|set| set.roots.contains(&root))
        {
            return Ok(());
        }

        let entries = snapshot(&root)?;
        tracing::debug!(label, root = %root.display(), entries = entries.len(), "started watching");

        let mut sets = self.sets.lock();
        let set = sets.entry(label.to_string()).or_default();
        if !set.roots.contains(&root) {
            set.roots.push(root);
            for (path, fingerprint) in entries {
                set.snapshot.entry(path).or_insert(fingerprint);
            }
        }
        Ok(())
    }

    /// Track an explicit path for deletion on cleanup.
    pub fn track(&self, label: &str, path: impl AsRef<Path>) -> Result<()> {
        let path = absolute(path.as_ref())?;
        tracing::debug!(label, path = %path.display(), "tracking path");
        self.sets
            .lock()
            .entry(label.to_string())
            .or_default()
            .explicit
            .insert(path);
        Ok(())
    }

    /// Changes since each root was first watched.
    pub fn diff(&self, label: &str) -> Result<FileDelta> {
        let set = self
            .sets
            .lock()
            .get(label)
            .cloned()
            .ok_or_else(|| FsError::UnknownLabel(label.to_string()))?;
        set.delta()
    }

    /// Delete every path created under `label`. A second call is a no-op.
    pub fn cleanup(&self, label: &str) -> Result<CleanupReport> {
        self.cleanup_with(label, CleanupMode::Delete)
    }

    pub fn cleanup_with(&self, label: &str, mode: CleanupMode) -> Result<CleanupReport> {
        match mode {
            CleanupMode::Delete => FileCleaner::new().cleanup(self, label),
            CleanupMode::Skip => {
                tracing::info!(label, "cleanup skipped, keeping created files");
                Ok(CleanupReport::skipped(label))
            }
        }
    }

    /// Snapshot `root` and return a guard that cleans up when dropped.
    pub fn watch(&self, root: impl AsRef<Path>, label: &str) -> Result<WatchGuard> {
        self.start_watching(root, label)?;
        Ok(WatchGuard {
            tracker: self.clone(),
            label: label.to_string(),
            mode: CleanupMode::Delete,
            finished: false,
        })
    }

    /// Labels with a tracked set, sorted.
    pub fn labels(&self) -> Vec<String> {
        self.sets.lock().keys().cloned().collect()
    }

    pub fn is_tracking(&self, label: &str) -> bool {
        self.sets.lock().contains_key(label)
    }

    /// Number of recorded paths for `label`, or across all labels.
    pub fn file_count(&self, label: Option<&str>) -> usize {
        let sets = self.sets.lock();
        match label {
            Some(label) => sets.get(label).map_or(0, TrackedSet::file_count),
            None => sets.values().map(TrackedSet::file_count).sum(),
        }
    }

    /// Watch roots of `label`.
    pub fn roots(&self, label: &str) -> Vec<PathBuf> {
        self.sets
            .lock()
            .get(label)
            .map(|set| set.roots.clone())
            .unwrap_or_default()
    }

    pub(crate) fn snapshot_of(&self, label: &str) -> Option<TrackedSet> {
        self.sets.lock().get(label).cloned()
    }

    pub(crate) fn take(&self, label: &str) -> Option<TrackedSet> {
        self.sets.lock().remove(label)
    }
}

/// Cleans up its label when dropped unless [`WatchGuard::skip`] was called.
#[derive(Debug)]
pub struct WatchGuard {
    tracker: FileTracker,
    label: String,
    mode: CleanupMode,
    finished: bool,
}

impl WatchGuard {
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Keep created files when the guard goes away.
    pub fn skip(&mut self) {
        self.mode = CleanupMode::Skip;
    }

    pub fn diff(&self) -> Result<FileDelta> {
        self.tracker.diff(&self.label)
    }

    /// Clean up now and return the report.
    pub fn finish(mut self) -> Result<CleanupReport> {
        self.finished = true;
        self.tracker.cleanup_with(&self.label, self.mode)
    }
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(e) = self.tracker.cleanup_with(&self.label, self.mode) {
            tracing::warn!(label = %self.label, error = %e, "cleanup on drop failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> (TempDir, FileTracker) {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("existing.txt"), "keep").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/old.txt"), "old").unwrap();
        (dir, FileTracker::new())
    }

    #[test]
    fn test_diff_reports_created_modified_deleted() {
        let (dir, tracker) = setup();
        tracker.start_watching(dir.path(), "t").unwrap();
        assert!(tracker.diff("t").unwrap().is_empty());

        fs::write(dir.path().join("new.txt"), "new").unwrap();
        fs::write(dir.path().join("existing.txt"), "changed contents").unwrap();
        fs::remove_file(dir.path().join("sub/old.txt")).unwrap();

        let delta = tracker.diff("t").unwrap();
        let root = std::path::absolute(dir.path()).unwrap();
        assert_eq!(delta.created, vec![root.join("new.txt")]);
        assert_eq!(delta.modified, vec![root.join("existing.txt")]);
        assert_eq!(delta.deleted, vec![root.join("sub/old.txt")]);

        // Diff is relative to the original snapshot.
        assert_eq!(tracker.diff("t").unwrap(), delta);
    }

    #[test]
    fn test_rewatch_keeps_original_snapshot() {
        let (dir, tracker) = setup();
        tracker.start_watching(dir.path(), "t").unwrap();
        fs::write(dir.path().join("new.txt"), "new").unwrap();
        tracker.start_watching(dir.path(), "t").unwrap();
        assert_eq!(tracker.diff("t").unwrap().created.len(), 1);
    }

    #[test]
    fn test_cleanup_removes_created_only() {
        let (dir, tracker) = setup();
        tracker.start_watching(dir.path(), "t").unwrap();

        fs::create_dir_all(dir.path().join("out/nested")).unwrap();
        fs::write(dir.path().join("out/nested/a.txt"), "a").unwrap();
        fs::write(dir.path().join("sub/b.txt"), "b").unwrap();
        fs::write(dir.path().join("existing.txt"), "modified").unwrap();

        let report = tracker.cleanup("t").unwrap();
        assert_eq!(report.removed.len(), 4);
        assert_eq!(report.modified.len(), 1);
        assert!(report.errors.is_empty());

        assert!(!dir.path().join("out").exists());
        assert!(!dir.path().join("sub/b.txt").exists());
        assert!(dir.path().join("sub/old.txt").exists());
        // Modified files are reported, not restored.
        assert_eq!(
            fs::read_to_string(dir.path().join("existing.txt")).unwrap(),
            "modified"
        );

        let again = tracker.cleanup("t").unwrap();
        assert!(again.removed.is_empty());
        assert!(!tracker.is_tracking("t"));
    }

    #[test]
    fn test_cleanup_deletes_deepest_first() {
        let (dir, tracker) = setup();
        tracker.start_watching(dir.path(), "t").unwrap();
        fs::create_dir_all(dir.path().join("a/b/c")).unwrap();
        fs::write(dir.path().join("a/b/c/file"), "x").unwrap();

        let report = tracker.cleanup("t").unwrap();
        let depths: Vec<usize> = report
            .removed
            .iter()
            .map(|p| p.components().count())
            .collect();
        assert!(depths.windows(2).all(|w| w[0] >= w[1]));
        assert!(!dir.path().join("a").exists());
    }

    #[test]
    fn test_skip_retains_files_and_set() {
        let (dir, tracker) = setup();
        tracker.start_watching(dir.path(), "t").unwrap();
        fs::write(dir.path().join("new.txt"), "new").unwrap();

        let report = tracker.cleanup_with("t", CleanupMode::Skip).unwrap();
        assert!(report.skipped);
        assert!(dir.path().join("new.txt").exists());
        assert!(tracker.is_tracking("t"));
    }

    #[test]
    fn test_multiple_roots_per_label() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        let tracker = FileTracker::new();
        tracker.start_watching(a.path(), "t").unwrap();
        tracker.start_watching(b.path(), "t").unwrap();
        assert_eq!(tracker.roots("t").len(), 2);

        fs::write(a.path().join("x"), "1").unwrap();
        fs::write(b.path().join("y"), "2").unwrap();
        assert_eq!(tracker.diff("t").unwrap().created.len(), 2);

        tracker.cleanup("t").unwrap();
        assert!(!a.path().join("x").exists());
        assert!(!b.path().join("y").exists());
    }

    #[test]
    fn test_track_explicit_path() {
        let dir = TempDir::new().unwrap();
        let outside = dir.path().join("report.json");
        fs::write(&outside, "{}").unwrap();

        let tracker = FileTracker::new();
        tracker.track("t", &outside).unwrap();
        assert_eq!(tracker.file_count(Some("t")), 1);
        assert_eq!(tracker.labels(), vec!["t"]);

        tracker.cleanup("t").unwrap();
        assert!(!outside.exists());
    }

    #[test]
    fn test_watch_guard_cleans_on_drop() {
        let (dir, tracker) = setup();
        {
            let _guard = tracker.watch(dir.path(), "t").unwrap();
            fs::write(dir.path().join("tmp.txt"), "x").unwrap();
        }
        assert!(!dir.path().join("tmp.txt").exists());
        assert!(dir.path().join("existing.txt").exists());
    }

    #[test]
    fn test_watch_guard_skip() {
        let (dir, tracker) = setup();
        {
            let mut guard = tracker.watch(dir.path(), "t").unwrap();
            fs::write(dir.path().join("tmp.txt"), "x").unwrap();
            guard.skip();
        }
        assert!(dir.path().join("tmp.txt").exists());
    }

    #[test]
    fn test_errors() {
        let tracker = FileTracker::new();
        assert!(matches!(
            tracker.diff("missing"),
            Err(FsError::UnknownLabel(_))
        ));
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("f");
        fs::write(&file, "x").unwrap();
        assert!(matches!(
            tracker.start_watching(&file, "t"),
            Err(FsError::NotADirectory { .. })
        ));
    }
}
