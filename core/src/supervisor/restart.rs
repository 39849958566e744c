//! Windowed restart accounting
//!
//! Tracks crash moments inside a sliding window so the per-process task can
//! enforce its restart budget. Entries older than the window are trimmed on
//! every record, keeping the timestamp list bounded by the budget itself.

use std::time::Duration;
use tokio::time::Instant;

/// Tracks crashes within a sliding window for budget enforcement
#[derive(Debug, Clone)]
pub struct RestartTracker {
    window: Duration,
    timestamps: Vec<Instant>,
}

impl RestartTracker {
    /// Create a tracker over the given window
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            timestamps: Vec::new(),
        }
    }

    /// Record a crash moment and trim entries outside the window
    pub fn record(&mut self, at: Instant) {
        self.timestamps.push(at);
        self.trim(at);
    }

    /// Number of crashes inside the window ending at `now`
    pub fn count(&self, now: Instant) -> u32 {
        self.timestamps
            .iter()
            .filter(|t| now.saturating_duration_since(**t) <= self.window)
            .count() as u32
    }

    /// Forget all recorded crashes; called on manual start
    pub fn clear(&mut self) {
        self.timestamps.clear();
    }

    fn trim(&mut self, now: Instant) {
        let window = self.window;
        self.timestamps
            .retain(|t| now.saturating_duration_since(*t) <= window);
    }
}
