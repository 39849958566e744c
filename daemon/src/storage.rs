//! `SQLite` crash sink
//!
//! Persists crash forensics, settings, and error events. The connection is
//! shared behind a mutex and every query runs on the blocking pool, so the
//! supervision loop never stalls on disk I/O. WAL journal mode keeps
//! concurrent readers cheap.

use async_trait::async_trait;
use procyon_core::{CoreError, CrashStore};
use rusqlite::{params, Connection, OptionalExtension, Row};
use schema::{current_timestamp, timestamp_for, CrashRecord, CrashStat, ErrorRecord, Setting};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// SQLite-backed implementation of the [`CrashStore`] capability
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish()
    }
}

impl SqliteStore {
    /// Open or create the database at `path` and ensure the schema exists.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;

        // WAL tolerates concurrent readers while the sink serialises writes
        if let Err(e) = conn.pragma_update(None, "journal_mode", "WAL") {
            warn!(
                "Failed to enable WAL journal mode: {}. Using default rollback journal.",
                e
            );
        }

        conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS crashes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                process_name TEXT NOT NULL,
                exit_code INTEGER,
                signal TEXT,
                error_message TEXT,
                stdout TEXT,
                stderr TEXT,
                started_at TEXT,
                crashed_at TEXT,
                uptime TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_crashes_process ON crashes(process_name);
            CREATE INDEX IF NOT EXISTS idx_crashes_time ON crashes(crashed_at DESC);

            CREATE TABLE IF NOT EXISTS settings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                key TEXT UNIQUE NOT NULL,
                value TEXT,
                updated_at TEXT
            );

            CREATE TABLE IF NOT EXISTS error_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                level TEXT NOT NULL,
                source TEXT,
                message TEXT NOT NULL,
                created_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_errors_time ON error_logs(created_at DESC);
            CREATE INDEX IF NOT EXISTS idx_errors_level ON error_logs(level);
            ",
        )?;

        debug!("crash sink ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> procyon_core::Result<T>
    where
        F: FnOnce(&Connection) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            f(&conn)
        })
        .await
        .map_err(|e| CoreError::Storage(e.to_string()))?
        .map_err(|e| CoreError::Storage(e.to_string()))
    }
}

fn crash_from_row(row: &Row<'_>) -> rusqlite::Result<CrashRecord> {
    // NULL text columns coerce to empty strings; empty optionals read as None
    let signal: Option<String> = row.get(3)?;
    let error_message: Option<String> = row.get(4)?;
    Ok(CrashRecord {
        id: row.get(0)?,
        process_name: row.get(1)?,
        exit_code: row.get::<_, Option<i32>>(2)?.unwrap_or(-1),
        signal: signal.filter(|s| !s.is_empty()),
        error_message: error_message.filter(|s| !s.is_empty()),
        stdout_tail: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
        stderr_tail: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
        started_at: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
        crashed_at: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
        uptime: row.get::<_, Option<String>>(9)?.unwrap_or_default(),
    })
}

fn error_from_row(row: &Row<'_>) -> rusqlite::Result<ErrorRecord> {
    Ok(ErrorRecord {
        id: row.get(0)?,
        level: row.get(1)?,
        source: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        message: row.get(3)?,
        created_at: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
    })
}

const CRASH_COLUMNS: &str =
    "id, process_name, exit_code, signal, error_message, stdout, stderr, started_at, crashed_at, uptime";

fn cutoff_for(days: u32) -> String {
    let cutoff = SystemTime::now() - Duration::from_secs(u64::from(days) * 86_400);
    timestamp_for(cutoff)
}

#[async_trait]
impl CrashStore for SqliteStore {
    async fn save_crash(&self, crash: CrashRecord) -> procyon_core::Result<i64> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO crashes (process_name, exit_code, signal, error_message, stdout, stderr, started_at, crashed_at, uptime)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    crash.process_name,
                    crash.exit_code,
                    crash.signal,
                    crash.error_message,
                    crash.stdout_tail,
                    crash.stderr_tail,
                    crash.started_at,
                    crash.crashed_at,
                    crash.uptime,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn get_crashes(&self, limit: usize) -> procyon_core::Result<Vec<CrashRecord>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CRASH_COLUMNS} FROM crashes ORDER BY crashed_at DESC, id DESC LIMIT ?1"
            ))?;
            let rows = stmt.query_map(params![limit as i64], crash_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn get_crashes_by_process(
        &self,
        name: &str,
        limit: usize,
    ) -> procyon_core::Result<Vec<CrashRecord>> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CRASH_COLUMNS} FROM crashes WHERE process_name = ?1
                 ORDER BY crashed_at DESC, id DESC LIMIT ?2"
            ))?;
            let rows = stmt.query_map(params![name, limit as i64], crash_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn get_crash_stats(&self) -> procyon_core::Result<Vec<CrashStat>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT process_name, COUNT(*) AS count FROM crashes
                 GROUP BY process_name ORDER BY count DESC, process_name ASC",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(CrashStat {
                    process_name: row.get(0)?,
                    count: row.get::<_, i64>(1)? as u64,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn get_setting(&self, key: &str) -> procyon_core::Result<Option<String>> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let value: Option<Option<String>> = conn
                .query_row(
                    "SELECT value FROM settings WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(value.map(Option::unwrap_or_default))
        })
        .await
    }

    async fn set_setting(&self, key: &str, value: &str) -> procyon_core::Result<()> {
        let key = key.to_string();
        let value = value.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, value, current_timestamp()],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_all_settings(&self) -> procyon_core::Result<Vec<Setting>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT key, value, updated_at FROM settings ORDER BY key ASC")?;
            let rows = stmt.query_map([], |row| {
                Ok(Setting {
                    key: row.get(0)?,
                    value: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    updated_at: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn save_error(
        &self,
        level: &str,
        source: &str,
        message: &str,
    ) -> procyon_core::Result<()> {
        let level = level.to_string();
        let source = source.to_string();
        let message = message.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO error_logs (level, source, message, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![level, source, message, current_timestamp()],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_errors(&self, limit: usize) -> procyon_core::Result<Vec<ErrorRecord>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, level, source, message, created_at FROM error_logs
                 ORDER BY created_at DESC, id DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit as i64], error_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn get_errors_by_level(
        &self,
        level: &str,
        limit: usize,
    ) -> procyon_core::Result<Vec<ErrorRecord>> {
        let level = level.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, level, source, message, created_at FROM error_logs
                 WHERE level = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![level, limit as i64], error_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn purge_older_than(&self, days: u32) -> procyon_core::Result<(u64, u64)> {
        let cutoff = cutoff_for(days);
        self.with_conn(move |conn| {
            let crashes =
                conn.execute("DELETE FROM crashes WHERE crashed_at < ?1", params![cutoff])?;
            let errors = conn.execute(
                "DELETE FROM error_logs WHERE created_at < ?1",
                params![cutoff],
            )?;
            Ok((crashes as u64, errors as u64))
        })
        .await
    }
}
