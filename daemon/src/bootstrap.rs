//! Daemon bootstrap: configuration, storage, supervisor wiring
//!
//! Loads the TOML configuration, opens the SQLite sink, spawns the
//! supervisor, and launches every configured process. A process that fails
//! to start at boot is logged and recorded; it does not abort the daemon.

use crate::storage::SqliteStore;
use crate::{DaemonError, Result};
use procyon_core::config::load_config_from_toml_path;
use procyon_core::{CrashStore, LogRing, ProcessAdapter, Supervisor, UnixProcessAdapter};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Handle to the running daemon components
#[derive(Debug, Clone)]
pub struct BootstrapHandle {
    /// The supervision engine, shared with the HTTP surface
    pub supervisor: Arc<Supervisor>,
}

impl BootstrapHandle {
    /// Gracefully stop every process and close down the supervisor
    pub async fn shutdown(&self) {
        self.supervisor.shutdown().await;
        info!("bootstrap shutdown complete");
    }
}

/// Wire up the daemon from a configuration file.
///
/// `db_override` replaces the configured database path when given (the
/// `--db-path` flag).
pub async fn bootstrap(
    config_path: &Path,
    db_override: Option<&Path>,
) -> Result<BootstrapHandle> {
    let config = load_config_from_toml_path(config_path)?;

    let ring = LogRing::new(config.log_capacity);
    let db_path = db_override
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.db_path.clone().into());
    let store = SqliteStore::open(&db_path)
        .map_err(|e| DaemonError::Storage(format!("failed to open {}: {e}", db_path.display())))?;
    let store: Arc<dyn CrashStore> = Arc::new(store);

    // Retention sweep, driven by the persisted retentionDays setting
    if let Ok(Some(days)) = store.get_setting("retentionDays").await {
        if let Ok(days) = days.parse::<u32>() {
            match store.purge_older_than(days).await {
                Ok((crashes, errors)) => info!(
                    "purged {crashes} crash records and {errors} error events older than {days} days"
                ),
                Err(e) => warn!("retention purge failed: {e}"),
            }
        }
    }

    let adapter: Arc<dyn ProcessAdapter> = Arc::new(UnixProcessAdapter::new());
    let names: Vec<String> = config.processes.iter().map(|p| p.name.clone()).collect();
    let supervisor = Arc::new(Supervisor::new(config.processes, ring, store, adapter));

    info!("supervising {} processes", names.len());
    for name in &names {
        if let Err(e) = supervisor.start(name).await {
            supervisor
                .ring()
                .error(format!("failed to start {name} at boot: {e}"));
            let _ = supervisor
                .storage()
                .save_error("error", "bootstrap", &e.to_string())
                .await;
        }
    }

    Ok(BootstrapHandle { supervisor })
}
