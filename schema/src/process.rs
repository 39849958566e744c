//! Process specification and state types for the Procyon supervisor
//!
//! This module contains the core data structures for declaring and observing
//! supervised processes.
//!
//! ## Process lifecycle
//!
//! Processes progress through the following states:
//! - `Idle`: never started or fully stopped
//! - `Starting`: spawn in progress
//! - `Running`: child alive, PID known
//! - `Stopping`: graceful termination requested, awaiting exit
//! - `Backoff`: awaiting the restart delay after a crash
//! - `Crashed`: child exited without a stop request and will not restart
//!
//! ## Restart budget
//!
//! When `autoRestart` is enabled, crashes within the sliding
//! `restartWindowSecs` window count against `maxRestarts`; once the budget is
//! spent the process parks in `Crashed` until a manual start clears the
//! window. `maxRestarts = 0` means unlimited.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Complete specification for a supervised process
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSpec {
    /// Unique identifier for this process
    pub name: String,

    /// Executable to launch
    pub command: String,

    /// Command-line arguments
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment variables merged over the inherited environment
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Working directory for the child
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,

    /// Whether to restart the process automatically after a crash
    #[serde(default)]
    pub auto_restart: bool,

    /// Maximum restarts allowed within the window; 0 means unlimited
    #[serde(default)]
    pub max_restarts: u32,

    /// Sliding window within which restarts are counted
    #[serde(default = "default_restart_window_secs")]
    pub restart_window_secs: u64,

    /// Minimum pause before a restart attempt
    #[serde(default = "default_restart_delay_ms")]
    pub restart_delay_ms: u64,

    /// Graceful-stop budget before escalating to SIGKILL
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
}

impl ProcessSpec {
    /// Get the restart window as a Duration
    pub fn restart_window(&self) -> Duration {
        Duration::from_secs(self.restart_window_secs)
    }

    /// Get the restart delay as a Duration
    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    /// Get the graceful-stop budget as a Duration
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

const fn default_restart_window_secs() -> u64 {
    60
}

const fn default_restart_delay_ms() -> u64 {
    1000
}

const fn default_stop_timeout_ms() -> u64 {
    5000
}

/// Current state of a supervised process
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum ProcessState {
    /// Never started or fully stopped
    Idle,
    /// Spawn in progress
    Starting,
    /// Child alive, PID known
    Running,
    /// Graceful termination requested, awaiting exit
    Stopping,
    /// Awaiting the restart delay after a crash
    Backoff,
    /// Exited without a stop request; not restarting
    Crashed,
}

impl ProcessState {
    /// Whether a start command must be rejected in this state
    pub fn is_active(&self) -> bool {
        matches!(self, ProcessState::Starting | ProcessState::Running)
    }

    /// Whether a child process exists in this state
    pub fn has_child(&self) -> bool {
        matches!(self, ProcessState::Running | ProcessState::Stopping)
    }
}

/// Terminal status of the most recent child, as observed by the supervisor
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LastExit {
    /// Exit code, if the child exited normally
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,

    /// Signal name, if the child was killed by a signal
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<String>,

    /// When the exit was observed, RFC3339
    pub ended_at: String,
}

/// Snapshot of one supervised process for external observers
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSummary {
    /// Process name
    pub name: String,

    /// Current lifecycle state
    pub state: ProcessState,

    /// PID of the live child, present iff one exists
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,

    /// When the current child was spawned, RFC3339
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,

    /// Crashes counted inside the current restart window
    pub restarts_in_window: u32,

    /// Most recent terminal status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_exit: Option<LastExit>,
}

impl ProcessSummary {
    /// Baseline snapshot for a process that has never run
    pub fn idle(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: ProcessState::Idle,
            pid: None,
            started_at: None,
            restarts_in_window: 0,
            last_exit: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_duration_accessors() {
        let spec = ProcessSpec {
            name: "web".to_string(),
            command: "/bin/true".to_string(),
            args: vec![],
            env: HashMap::new(),
            cwd: None,
            auto_restart: true,
            max_restarts: 3,
            restart_window_secs: 60,
            restart_delay_ms: 10,
            stop_timeout_ms: 500,
        };
        assert_eq!(spec.restart_window(), Duration::from_secs(60));
        assert_eq!(spec.restart_delay(), Duration::from_millis(10));
        assert_eq!(spec.stop_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn state_predicates() {
        assert!(ProcessState::Starting.is_active());
        assert!(ProcessState::Running.is_active());
        assert!(!ProcessState::Backoff.is_active());
        assert!(!ProcessState::Crashed.is_active());

        assert!(ProcessState::Running.has_child());
        assert!(ProcessState::Stopping.has_child());
        assert!(!ProcessState::Starting.has_child());
        assert!(!ProcessState::Idle.has_child());
    }
}
