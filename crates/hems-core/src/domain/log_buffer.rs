//! Bounded, ordered history of human-readable trace lines.
//!
//! The protocol engine is chatty: every SHIP handshake step and every SPINE
//! datagram produces a trace line.  Observers that attach late still want to
//! see what happened before they arrived, so the last `capacity` lines are
//! kept in memory and handed to every new observer as part of its snapshot.
//!
//! # Sequence numbers
//!
//! Each appended entry gets a sequence number, assigned under the same lock
//! as the append itself, so sequence order is insertion order.  A new
//! observer receives the snapshot together with the highest sequence number
//! it contains (the *watermark*); any streamed line at or below the watermark
//! is already in the snapshot and can be skipped.
//!
//! # Thread safety
//!
//! All methods take `&self`.  The deque and the counter sit behind one
//! `std::sync::Mutex`; no method does anything slow while holding it.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, TimeZone};
use serde::{Deserialize, Serialize};

use super::peer::PeerId;

/// Capacity used when none (or zero) is configured.
pub const DEFAULT_LOG_CAPACITY: usize = 1000;

/// Severity tag embedded in every log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Severity {
    pub fn tag(self) -> &'static str {
        match self {
            Severity::Trace => "TRACE",
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// One immutable line of history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub seq: u64,
    pub severity: Severity,
    pub line: String,
    /// Peer this line is believed to concern (best effort, may be wrong).
    pub ski: Option<PeerId>,
}

impl LogEntry {
    /// Formats `"<timestamp> <SEVERITY> <text>"` with trailing newlines removed.
    ///
    /// ```rust
    /// use chrono::{TimeZone, Utc};
    /// use hems_core::{LogEntry, Severity};
    ///
    /// let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    /// let line = LogEntry::compose(&ts, Severity::Info, "paired\n");
    /// assert_eq!(line, "2024-05-01 12:00:00 INFO paired");
    /// ```
    pub fn compose<Tz: TimeZone>(at: &DateTime<Tz>, severity: Severity, text: &str) -> String
    where
        Tz::Offset: fmt::Display,
    {
        format!(
            "{} {} {}",
            at.format("%Y-%m-%d %H:%M:%S"),
            severity.tag(),
            text.trim_end_matches(['\n', '\r'])
        )
    }
}

#[derive(Debug)]
struct Inner {
    entries: VecDeque<LogEntry>,
    next_seq: u64,
}

/// Fixed-capacity ring of [`LogEntry`] values, oldest evicted first.
#[derive(Debug)]
pub struct LogRingBuffer {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl LogRingBuffer {
    /// Creates an empty buffer.  A capacity of zero falls back to
    /// [`DEFAULT_LOG_CAPACITY`].
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 {
            DEFAULT_LOG_CAPACITY
        } else {
            capacity
        };
        Self {
            inner: Mutex::new(Inner {
                entries: VecDeque::with_capacity(capacity.min(256)),
                next_seq: 1,
            }),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends `line` at the tail, evicting the oldest entry first if the
    /// buffer is full.  Returns a copy of the stored entry.
    pub fn append(&self, severity: Severity, line: String, ski: Option<PeerId>) -> LogEntry {
        let mut inner = self.lock();
        if inner.entries.len() >= self.capacity {
            inner.entries.pop_front();
        }
        let entry = LogEntry {
            seq: inner.next_seq,
            severity,
            line,
            ski,
        };
        inner.next_seq = inner.next_seq.wrapping_add(1);
        inner.entries.push_back(entry.clone());
        entry
    }

    /// Copy of all retained entries in insertion order.
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.lock().entries.iter().cloned().collect()
    }

    /// Copy of all retained entries plus the highest sequence number handed
    /// out so far (0 when nothing was ever appended).
    pub fn snapshot_with_watermark(&self) -> (Vec<LogEntry>, u64) {
        let inner = self.lock();
        let entries = inner.entries.iter().cloned().collect();
        (entries, inner.next_seq.wrapping_sub(1))
    }

    /// Just the text of every retained line, oldest first.
    pub fn lines(&self) -> Vec<String> {
        self.lock().entries.iter().map(|e| e.line.clone()).collect()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for LogRingBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Arc;
    use std::thread;

    fn push(buf: &LogRingBuffer, text: &str) -> LogEntry {
        buf.append(Severity::Info, text.to_string(), None)
    }

    #[test]
    fn test_zero_capacity_falls_back_to_default() {
        let buf = LogRingBuffer::new(0);
        assert_eq!(buf.capacity(), DEFAULT_LOG_CAPACITY);
    }

    #[test]
    fn test_append_then_snapshot_returns_line_last_and_verbatim() {
        // Arrange
        let buf = LogRingBuffer::new(8);
        push(&buf, "first");
        let text = "2024-05-01 12:00:00 TRACE  spaces   and ünïcode kept  ";

        // Act
        push(&buf, text);
        let lines = buf.lines();

        // Assert
        assert_eq!(lines.last().map(String::as_str), Some(text));
    }

    #[test]
    fn test_overflow_drops_exactly_the_oldest_k_lines() {
        // Arrange
        let capacity = 5;
        let k = 3;
        let buf = LogRingBuffer::new(capacity);

        // Act
        for i in 0..capacity + k {
            push(&buf, &format!("line {i}"));
        }

        // Assert
        let lines = buf.lines();
        assert_eq!(lines.len(), capacity);
        for i in 0..k {
            assert!(!lines.contains(&format!("line {i}")), "line {i} must be evicted");
        }
        assert_eq!(lines.first().unwrap(), &format!("line {k}"));
        assert_eq!(lines.last().unwrap(), &format!("line {}", capacity + k - 1));
    }

    #[test]
    fn test_sequence_numbers_start_at_one_and_increase() {
        let buf = LogRingBuffer::new(4);
        assert_eq!(push(&buf, "a").seq, 1);
        assert_eq!(push(&buf, "b").seq, 2);
    }

    #[test]
    fn test_watermark_is_zero_when_empty() {
        let buf = LogRingBuffer::new(4);
        let (entries, mark) = buf.snapshot_with_watermark();
        assert!(entries.is_empty());
        assert_eq!(mark, 0);
    }

    #[test]
    fn test_watermark_tracks_last_sequence_after_eviction() {
        let buf = LogRingBuffer::new(2);
        for i in 0..5 {
            push(&buf, &format!("{i}"));
        }
        let (entries, mark) = buf.snapshot_with_watermark();
        assert_eq!(mark, 5);
        assert_eq!(entries.last().unwrap().seq, 5);
    }

    #[test]
    fn test_concurrent_appends_never_exceed_capacity() {
        // Arrange
        let buf = Arc::new(LogRingBuffer::new(50));

        // Act: 8 threads × 100 appends each
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let b = Arc::clone(&buf);
                thread::spawn(move || {
                    for i in 0..100 {
                        b.append(Severity::Trace, format!("t{t}-{i}"), None);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        // Assert
        let snap = buf.snapshot();
        assert_eq!(snap.len(), 50);
        assert!(snap.windows(2).all(|w| w[0].seq < w[1].seq));
        assert_eq!(snap.last().unwrap().seq, 800);
    }

    #[test]
    fn test_compose_strips_trailing_newline_and_tags_severity() {
        let ts = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        let line = LogEntry::compose(&ts, Severity::Error, "boom\r\n");
        assert_eq!(line, "2025-01-02 03:04:05 ERROR boom");
    }
}
