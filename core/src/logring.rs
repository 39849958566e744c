//! Bounded in-memory log ring with filtering snapshot APIs
//!
//! The ring is the single shared structure that both the supervisor and every
//! process runtime write into. It holds the most recent `capacity` entries,
//! evicting strictly FIFO when full, and hands out copies on read so callers
//! never alias the internal buffer.

use crate::{current_timestamp, LogEntry, LogLevel};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

/// Default ring capacity when the configuration does not override it
pub const DEFAULT_LOG_CAPACITY: usize = 1000;

#[derive(Debug)]
struct RingInner {
    capacity: usize,
    total_dropped: u64,
    entries: VecDeque<LogEntry>,
}

/// A cloneable handle to the bounded log ring.
///
/// All operations are safe under concurrent readers and writers; appends are
/// bounded work and the lock is never held across an await point.
#[derive(Debug, Clone)]
pub struct LogRing {
    inner: Arc<Mutex<RingInner>>,
}

impl LogRing {
    /// Create a new ring with the given capacity (must be > 0)
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "LogRing capacity must be > 0");
        Self {
            inner: Arc::new(Mutex::new(RingInner {
                capacity,
                total_dropped: 0,
                entries: VecDeque::with_capacity(capacity),
            })),
        }
    }

    /// Append an entry, evicting the oldest when full
    pub fn append(&self, entry: LogEntry) {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if inner.entries.len() == inner.capacity {
            inner.entries.pop_front();
            inner.total_dropped = inner.total_dropped.saturating_add(1);
        }
        inner.entries.push_back(entry);
    }

    /// Append a captured child output line
    pub fn worker_line(&self, worker: &str, level: LogLevel, message: String) {
        self.append(LogEntry {
            timestamp: current_timestamp(),
            level,
            worker: worker.to_string(),
            message,
        });
    }

    /// Append supervisor narration at Info, mirrored to tracing
    pub fn info(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{message}");
        self.system(LogLevel::Info, message);
    }

    /// Append supervisor narration at Warn, mirrored to tracing
    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        warn!("{message}");
        self.system(LogLevel::Warn, message);
    }

    /// Append supervisor narration at Error, mirrored to tracing
    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        error!("{message}");
        self.system(LogLevel::Error, message);
    }

    fn system(&self, level: LogLevel, message: String) {
        self.append(LogEntry {
            timestamp: current_timestamp(),
            level,
            worker: String::new(),
            message,
        });
    }

    /// The most recent `limit` entries in chronological order (oldest first)
    pub fn snapshot(&self, limit: usize) -> Vec<LogEntry> {
        self.snapshot_filtered(|_| true, limit)
    }

    /// The most recent `limit` entries for one process, chronological
    pub fn snapshot_by_process(&self, name: &str, limit: usize) -> Vec<LogEntry> {
        self.snapshot_filtered(|e| e.worker == name, limit)
    }

    /// The most recent `limit` entries matching `predicate`, chronological.
    ///
    /// Reads copy out; the internal buffer is never exposed.
    pub fn snapshot_filtered<F>(&self, predicate: F, limit: usize) -> Vec<LogEntry>
    where
        F: Fn(&LogEntry) -> bool,
    {
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut picked: Vec<LogEntry> = inner
            .entries
            .iter()
            .rev()
            .filter(|e| predicate(e))
            .take(limit)
            .cloned()
            .collect();
        picked.reverse();
        picked
    }

    /// The most recent `limit` captured-output entries, chronological
    pub fn snapshot_worker_output(&self, limit: usize) -> Vec<LogEntry> {
        self.snapshot_filtered(LogEntry::is_worker_output, limit)
    }

    /// The most recent `limit` system-event entries, chronological
    pub fn snapshot_system_events(&self, limit: usize) -> Vec<LogEntry> {
        self.snapshot_filtered(LogEntry::is_system_event, limit)
    }

    /// Current number of retained entries
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner).entries.len()
    }

    /// Whether the ring is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of entries ever evicted due to capacity
    pub fn total_dropped(&self) -> u64 {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner).total_dropped
    }
}

impl Default for LogRing {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stdout_entry(worker: &str, line: &str) -> LogEntry {
        LogEntry {
            timestamp: current_timestamp(),
            level: LogLevel::Stdout,
            worker: worker.to_string(),
            message: format!("[{worker}] {line}"),
        }
    }

    #[test]
    fn fifo_eviction_and_drop_count() {
        let ring = LogRing::new(3);
        for line in ["a", "b", "c", "d", "e"] {
            ring.append(stdout_entry("w", line));
        }

        assert_eq!(ring.len(), 3);
        assert_eq!(ring.total_dropped(), 2);

        let messages: Vec<_> = ring
            .snapshot(10)
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert_eq!(messages, vec!["[w] c", "[w] d", "[w] e"]);
    }

    #[test]
    fn snapshot_limit_returns_most_recent_chronologically() {
        let ring = LogRing::new(10);
        for line in ["1", "2", "3", "4"] {
            ring.append(stdout_entry("w", line));
        }

        let messages: Vec<_> = ring.snapshot(2).into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["[w] 3", "[w] 4"]);
    }

    #[test]
    fn snapshot_by_process_filters_on_worker() {
        let ring = LogRing::new(10);
        ring.append(stdout_entry("a", "from a"));
        ring.append(stdout_entry("b", "from b"));
        ring.info("starting a");

        let a_logs = ring.snapshot_by_process("a", 10);
        assert_eq!(a_logs.len(), 1);
        assert_eq!(a_logs[0].message, "[a] from a");
    }

    #[test]
    fn worker_and_system_filters_partition_entries() {
        let ring = LogRing::new(10);
        ring.append(stdout_entry("x", "hello"));
        ring.info("starting x");

        let worker = ring.snapshot_worker_output(10);
        assert_eq!(worker.len(), 1);
        assert_eq!(worker[0].message, "[x] hello");

        let system = ring.snapshot_system_events(10);
        assert_eq!(system.len(), 1);
        assert_eq!(system[0].message, "starting x");
    }

    #[test]
    fn concurrent_writers_never_exceed_capacity() {
        let ring = LogRing::new(50);
        let mut handles = Vec::new();
        for t in 0..4 {
            let ring = ring.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..100 {
                    ring.append(stdout_entry("w", &format!("{t}-{i}")));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(ring.len(), 50);
        assert_eq!(ring.total_dropped(), 350);
    }
}
