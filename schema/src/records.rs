//! Log, crash, and settings records
//!
//! These are the shapes that flow out of the supervision engine: entries in
//! the in-memory log ring, crash forensics persisted by the sink, error
//! events, and key/value settings.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

/// Severity or stream of a log ring entry
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum LogLevel {
    /// Supervisor narration
    Info,
    /// Supervisor warning
    Warn,
    /// Supervisor error
    Error,
    /// Captured child stdout line
    Stdout,
    /// Captured child stderr line
    Stderr,
}

/// A single entry in the in-memory log ring
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// When the entry was appended, RFC3339
    pub timestamp: String,
    /// Severity or stream
    pub level: LogLevel,
    /// Originating process name; empty for supervisor-originated entries
    pub worker: String,
    /// Entry text; captured child lines are prefixed with `"[name] "`
    pub message: String,
}

impl LogEntry {
    /// Whether this entry is captured child output.
    ///
    /// The runtime prefixes every captured line with `"[name] "`, so worker
    /// output is any entry with a non-empty worker whose message begins
    /// with `[`. Everything else counts as a system event.
    pub fn is_worker_output(&self) -> bool {
        !self.worker.is_empty() && self.message.starts_with('[')
    }

    /// Whether this entry is supervisor narration rather than child output
    pub fn is_system_event(&self) -> bool {
        !self.is_worker_output()
    }
}

/// Persisted forensics for one crash
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CrashRecord {
    /// Sink-assigned identity; 0 until persisted
    #[serde(default)]
    pub id: i64,
    /// Name of the crashed process
    pub process_name: String,
    /// Exit code; spawn failures synthesize -1
    pub exit_code: i32,
    /// Signal name, if the child was killed by a signal
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<String>,
    /// Error message, present when the spawn itself failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Last 4 KiB of captured stdout
    pub stdout_tail: String,
    /// Last 4 KiB of captured stderr
    pub stderr_tail: String,
    /// When the child was spawned, RFC3339
    pub started_at: String,
    /// When the crash was observed, RFC3339
    pub crashed_at: String,
    /// Human-readable uptime between the two
    pub uptime: String,
}

/// Crash count for one process, for the stats surface
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CrashStat {
    /// Process name
    pub process_name: String,
    /// Number of recorded crashes
    pub count: u64,
}

/// Persisted error event from the supervisor or its collaborators
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    /// Sink-assigned identity
    #[serde(default)]
    pub id: i64,
    /// Severity label
    pub level: String,
    /// Component that raised the error
    pub source: String,
    /// Error text
    pub message: String,
    /// When the error was recorded, RFC3339
    pub created_at: String,
}

/// A single key/value setting with its last update time
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Setting {
    /// Unique key
    pub key: String,
    /// Stored value
    pub value: String,
    /// When the value was last written, RFC3339
    pub updated_at: String,
}

/// Current time as an RFC3339 string with second precision
#[must_use]
pub fn current_timestamp() -> String {
    timestamp_for(SystemTime::now())
}

/// RFC3339 string with second precision for an arbitrary instant
#[must_use]
pub fn timestamp_for(at: SystemTime) -> String {
    humantime::format_rfc3339_seconds(at).to_string()
}

/// Human-readable uptime between spawn and crash, truncated to seconds
#[must_use]
pub fn format_uptime(uptime: Duration) -> String {
    humantime::format_duration(Duration::from_secs(uptime.as_secs())).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(worker: &str, level: LogLevel, message: &str) -> LogEntry {
        LogEntry {
            timestamp: current_timestamp(),
            level,
            worker: worker.to_string(),
            message: message.to_string(),
        }
    }

    #[test]
    fn worker_output_predicate() {
        assert!(entry("web", LogLevel::Stdout, "[web] hello").is_worker_output());
        assert!(entry("web", LogLevel::Stderr, "[web] oops").is_worker_output());

        // Supervisor narration has no worker
        assert!(entry("", LogLevel::Info, "starting web").is_system_event());
        // A worker-attributed entry that is not prefixed output is a system event
        assert!(entry("web", LogLevel::Error, "persist failed").is_system_event());
    }

    #[test]
    fn uptime_formatting() {
        assert_eq!(format_uptime(Duration::from_secs(0)), "0s");
        assert_eq!(format_uptime(Duration::from_millis(90_500)), "1m 30s");
        assert_eq!(format_uptime(Duration::from_secs(3661)), "1h 1m 1s");
    }
}
