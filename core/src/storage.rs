//! Persistence capability for crash forensics, settings, and error events
//!
//! The supervisor only sees the [`CrashStore`] capability; the concrete sink
//! (SQLite in the daemon, memory here for tests) is injected at construction.
//! Writes are fire-and-forget from the supervision loop's perspective: a
//! failed persist is logged and the loop continues.

use crate::Result;
use async_trait::async_trait;
use schema::{current_timestamp, CrashRecord, CrashStat, ErrorRecord, Setting};
use std::collections::HashMap;
use std::sync::Mutex;

/// Abstract persistence sink for crash records, settings, and error events
#[async_trait]
pub trait CrashStore: Send + Sync {
    /// Append a crash record, returning the assigned identity
    async fn save_crash(&self, crash: CrashRecord) -> Result<i64>;

    /// Most recent crashes, newest first
    async fn get_crashes(&self, limit: usize) -> Result<Vec<CrashRecord>>;

    /// Most recent crashes for one process, newest first
    async fn get_crashes_by_process(&self, name: &str, limit: usize) -> Result<Vec<CrashRecord>>;

    /// Crash counts per process, sorted by count descending
    async fn get_crash_stats(&self) -> Result<Vec<CrashStat>>;

    /// Read one setting; None when the key has never been written
    async fn get_setting(&self, key: &str) -> Result<Option<String>>;

    /// Upsert one setting, refreshing its timestamp
    async fn set_setting(&self, key: &str, value: &str) -> Result<()>;

    /// All settings
    async fn get_all_settings(&self) -> Result<Vec<Setting>>;

    /// Append an error event
    async fn save_error(&self, level: &str, source: &str, message: &str) -> Result<()>;

    /// Most recent error events, newest first
    async fn get_errors(&self, limit: usize) -> Result<Vec<ErrorRecord>>;

    /// Most recent error events at one level, newest first
    async fn get_errors_by_level(&self, level: &str, limit: usize) -> Result<Vec<ErrorRecord>>;

    /// Delete crashes and errors older than `days`; returns (crashes, errors) deleted
    async fn purge_older_than(&self, days: u32) -> Result<(u64, u64)>;
}

#[derive(Debug, Default)]
struct MemoryInner {
    crashes: Vec<CrashRecord>,
    next_crash_id: i64,
    settings: HashMap<String, Setting>,
    errors: Vec<ErrorRecord>,
    next_error_id: i64,
}

/// In-memory sink used by unit tests and as a fallback when no database is
/// available
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    /// Create an empty in-memory store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CrashStore for MemoryStore {
    async fn save_crash(&self, mut crash: CrashRecord) -> Result<i64> {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.next_crash_id += 1;
        crash.id = inner.next_crash_id;
        let id = crash.id;
        inner.crashes.push(crash);
        Ok(id)
    }

    async fn get_crashes(&self, limit: usize) -> Result<Vec<CrashRecord>> {
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(inner.crashes.iter().rev().take(limit).cloned().collect())
    }

    async fn get_crashes_by_process(&self, name: &str, limit: usize) -> Result<Vec<CrashRecord>> {
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(inner
            .crashes
            .iter()
            .rev()
            .filter(|c| c.process_name == name)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get_crash_stats(&self) -> Result<Vec<CrashStat>> {
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut counts: HashMap<String, u64> = HashMap::new();
        for crash in &inner.crashes {
            *counts.entry(crash.process_name.clone()).or_default() += 1;
        }
        let mut stats: Vec<CrashStat> = counts
            .into_iter()
            .map(|(process_name, count)| CrashStat { process_name, count })
            .collect();
        stats.sort_by(|a, b| b.count.cmp(&a.count).then(a.process_name.cmp(&b.process_name)));
        Ok(stats)
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(inner.settings.get(key).map(|s| s.value.clone()))
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.settings.insert(
            key.to_string(),
            Setting {
                key: key.to_string(),
                value: value.to_string(),
                updated_at: current_timestamp(),
            },
        );
        Ok(())
    }

    async fn get_all_settings(&self) -> Result<Vec<Setting>> {
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut settings: Vec<Setting> = inner.settings.values().cloned().collect();
        settings.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(settings)
    }

    async fn save_error(&self, level: &str, source: &str, message: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.next_error_id += 1;
        let id = inner.next_error_id;
        inner.errors.push(ErrorRecord {
            id,
            level: level.to_string(),
            source: source.to_string(),
            message: message.to_string(),
            created_at: current_timestamp(),
        });
        Ok(())
    }

    async fn get_errors(&self, limit: usize) -> Result<Vec<ErrorRecord>> {
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(inner.errors.iter().rev().take(limit).cloned().collect())
    }

    async fn get_errors_by_level(&self, level: &str, limit: usize) -> Result<Vec<ErrorRecord>> {
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(inner
            .errors
            .iter()
            .rev()
            .filter(|e| e.level == level)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn purge_older_than(&self, _days: u32) -> Result<(u64, u64)> {
        // The memory store holds a single run's worth of records; age-based
        // purging only applies to the persistent sink.
        Ok((0, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crash(name: &str, exit_code: i32) -> CrashRecord {
        CrashRecord {
            id: 0,
            process_name: name.to_string(),
            exit_code,
            signal: None,
            error_message: None,
            stdout_tail: String::new(),
            stderr_tail: String::new(),
            started_at: current_timestamp(),
            crashed_at: current_timestamp(),
            uptime: "0s".to_string(),
        }
    }

    #[tokio::test]
    async fn crashes_are_returned_newest_first() {
        let store = MemoryStore::new();
        store.save_crash(crash("a", 1)).await.unwrap();
        store.save_crash(crash("b", 2)).await.unwrap();
        store.save_crash(crash("a", 3)).await.unwrap();

        let all = store.get_crashes(10).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].exit_code, 3);
        assert_eq!(all[2].exit_code, 1);

        let only_a = store.get_crashes_by_process("a", 10).await.unwrap();
        assert_eq!(only_a.len(), 2);
        assert_eq!(only_a[0].exit_code, 3);
    }

    #[tokio::test]
    async fn stats_sorted_by_count_descending() {
        let store = MemoryStore::new();
        for _ in 0..3 {
            store.save_crash(crash("busy", 1)).await.unwrap();
        }
        store.save_crash(crash("quiet", 1)).await.unwrap();

        let stats = store.get_crash_stats().await.unwrap();
        assert_eq!(stats[0].process_name, "busy");
        assert_eq!(stats[0].count, 3);
        assert_eq!(stats[1].process_name, "quiet");
        assert_eq!(stats[1].count, 1);
    }

    #[tokio::test]
    async fn settings_upsert() {
        let store = MemoryStore::new();
        assert_eq!(store.get_setting("theme").await.unwrap(), None);

        store.set_setting("theme", "dark").await.unwrap();
        assert_eq!(
            store.get_setting("theme").await.unwrap(),
            Some("dark".to_string())
        );

        store.set_setting("theme", "light").await.unwrap();
        assert_eq!(
            store.get_setting("theme").await.unwrap(),
            Some("light".to_string())
        );
        assert_eq!(store.get_all_settings().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn errors_filter_by_level() {
        let store = MemoryStore::new();
        store.save_error("error", "supervisor", "boom").await.unwrap();
        store.save_error("warn", "runtime", "odd").await.unwrap();
        store.save_error("error", "storage", "disk").await.unwrap();

        let errors = store.get_errors_by_level("error", 10).await.unwrap();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].source, "storage");
    }
}
