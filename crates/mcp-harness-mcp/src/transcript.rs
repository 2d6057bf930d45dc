//! Append-only record of all protocol traffic across sessions.
//!
//! A [`Transcript`] is a cheap cloneable handle; every session of a run
//! writes into the same entry vector. Sequence numbers are assigned under
//! the lock, so entry order is arrival order.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Payload summaries longer than this are truncated.
pub const SUMMARY_LEN: usize = 2000;

/// Which way a message travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Harness to server.
    Outbound,
    /// Server to harness.
    Inbound,
    /// Harness bookkeeping (timeouts, lifecycle).
    Internal,
}

/// What an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Request,
    Response,
    Notification,
    /// Unmatched, duplicate, late or malformed inbound traffic.
    Anomaly,
    Timeout,
    Lifecycle,
}

/// One transcript line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub server: String,
    pub direction: Direction,
    pub kind: EntryKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<f64>,
}

/// An entry before it is stamped with a sequence number and time.
#[derive(Debug, Clone)]
pub struct Event {
    server: String,
    direction: Direction,
    kind: EntryKind,
    method: Option<String>,
    request_id: Option<u64>,
    summary: String,
    elapsed: Option<Duration>,
}

impl Event {
    pub fn new(server: impl Into<String>, direction: Direction, kind: EntryKind) -> Self {
        Self {
            server: server.into(),
            direction,
            kind,
            method: None,
            request_id: None,
            summary: String::new(),
            elapsed: None,
        }
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn request_id(mut self, id: u64) -> Self {
        self.request_id = Some(id);
        self
    }

    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = Some(elapsed);
        self
    }
}

#[derive(Default)]
struct Inner {
    entries: Vec<LogEntry>,
    next_seq: u64,
    closed: bool,
}

/// Shared, append-only protocol log.
#[derive(Clone, Default)]
pub struct Transcript {
    inner: Arc<Mutex<Inner>>,
    echo: bool,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also emit every entry as a `tracing` debug event.
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Append an entry. Returns its sequence number, or `None` once finalized.
    pub fn record(&self, event: Event) -> Option<u64> {
        let mut inner = self.inner.lock();
        if inner.closed {
            tracing::debug!(
                server = %event.server,
                kind = ?event.kind,
                "transcript finalized, dropping entry"
            );
            return None;
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        let entry = LogEntry {
            seq,
            timestamp: Utc::now(),
            server: event.server,
            direction: event.direction,
            kind: event.kind,
            method: event.method,
            request_id: event.request_id,
            summary: truncate(event.summary),
            elapsed_ms: event.elapsed.map(|d| d.as_secs_f64() * 1000.0),
        };

        if self.echo {
            tracing::debug!(
                server = %entry.server,
                direction = ?entry.direction,
                kind = ?entry.kind,
                method = entry.method.as_deref().unwrap_or(""),
                request_id = entry.request_id,
                elapsed_ms = entry.elapsed_ms,
                "{}",
                entry.summary
            );
        }

        inner.entries.push(entry);
        Some(seq)
    }

    /// Snapshot of all entries in order.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.inner.lock().entries.clone()
    }

    /// Entries for one server.
    pub fn entries_for(&self, server: &str) -> Vec<LogEntry> {
        self.filtered(|e| e.server == server)
    }

    /// Entries travelling in one direction.
    pub fn with_direction(&self, direction: Direction) -> Vec<LogEntry> {
        self.filtered(|e| e.direction == direction)
    }

    /// Entries of one kind.
    pub fn with_kind(&self, kind: EntryKind) -> Vec<LogEntry> {
        self.filtered(|e| e.kind == kind)
    }

    fn filtered(&self, pred: impl Fn(&LogEntry) -> bool) -> Vec<LogEntry> {
        self.inner
            .lock()
            .entries
            .iter()
            .filter(|e| pred(e))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all entries. Sequence numbers keep increasing.
    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Entries as a pretty JSON array.
    pub fn to_json(&self) -> serde_json::Result<String> {
        let entries = self.entries();
        serde_json::to_string_pretty(&entries)
    }

    /// Write all entries to `path` as a pretty JSON array. Repeatable; does
    /// not clear the transcript.
    pub fn export_json(&self, path: &Path) -> std::io::Result<usize> {
        let entries = self.entries();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::File::create(path)?;
        let mut writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &entries)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        tracing::debug!(path = %path.display(), entries = entries.len(), "exported transcript");
        Ok(entries.len())
    }

    /// Export (when `path` is given) and close the transcript.
    ///
    /// Later appends are dropped, even when the export fails. Returns the
    /// entry count.
    pub fn finalize(&self, path: Option<&Path>) -> std::io::Result<usize> {
        let exported = path.map(|path| self.export_json(path));
        self.inner.lock().closed = true;
        exported.unwrap_or_else(|| Ok(self.len()))
    }
}

impl std::fmt::Debug for Transcript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transcript")
            .field("entries", &self.len())
            .field("echo", &self.echo)
            .finish()
    }
}

fn truncate(summary: String) -> String {
    match summary.char_indices().nth(SUMMARY_LEN) {
        Some((idx, _)) => format!("{}...", &summary[..idx]),
        None => summary,
    }
}
