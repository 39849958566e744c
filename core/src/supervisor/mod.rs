//! Supervisor facade
//!
//! The [`Supervisor`] owns one handle per configured process and fans
//! commands out to the per-process tasks. Each task serialises the commands
//! for its own name, so `start`/`stop`/`restart` are atomic per process while
//! commands for different names proceed in parallel. Observers read watch
//! channels and the log ring and never block commands.

use crate::logring::LogRing;
use crate::runtime::ProcessAdapter;
use crate::storage::CrashStore;
use crate::{CoreError, Result};
use schema::{LogEntry, ProcessSpec, ProcessSummary};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::info;

mod process_task;
pub mod restart;


use process_task::{spawn_process_task, Command, TaskHandle};

/// The orchestrator owning every supervised process
pub struct Supervisor {
    ring: LogRing,
    store: Arc<dyn CrashStore>,
    handles: HashMap<String, TaskHandle>,
    order: Vec<String>,
    shutting_down: AtomicBool,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("processes", &self.order)
            .finish()
    }
}

impl Supervisor {
    /// Create a supervisor for the given specifications.
    ///
    /// One task is spawned per process; nothing is started until `start` is
    /// called (the daemon bootstrap starts everything it configured).
    pub fn new(
        specs: Vec<ProcessSpec>,
        ring: LogRing,
        store: Arc<dyn CrashStore>,
        adapter: Arc<dyn ProcessAdapter>,
    ) -> Self {
        let mut handles = HashMap::new();
        let mut order = Vec::with_capacity(specs.len());

        for spec in specs {
            let name = spec.name.clone();
            let handle =
                spawn_process_task(spec, ring.clone(), store.clone(), adapter.clone());
            handles.insert(name.clone(), handle);
            order.push(name);
        }

        Self {
            ring,
            store,
            handles,
            order,
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Start a process. Errors: `NotFound`, `AlreadyRunning`, `SpawnFailed`.
    pub async fn start(&self, name: &str) -> Result<()> {
        self.command(name, |reply| Command::Start { reply }).await
    }

    /// Stop a process gracefully, escalating after its stop timeout.
    /// Errors: `NotFound`, `NotRunning`.
    pub async fn stop(&self, name: &str) -> Result<()> {
        self.command(name, |reply| Command::Stop { reply }).await
    }

    /// Stop (if running) then start a process, atomically with respect to
    /// other commands on the same name. Errors: `NotFound`, `SpawnFailed`.
    pub async fn restart(&self, name: &str) -> Result<()> {
        self.command(name, |reply| Command::Restart { reply }).await
    }

    /// Restart every configured process; returns (restarted, failed) counts
    pub async fn restart_all(&self) -> (usize, usize) {
        let names: Vec<String> = self.order.clone();
        self.restart_names(&names).await
    }

    /// Restart the listed processes; unknown names count as failed
    pub async fn restart_selected(&self, names: &[String]) -> (usize, usize) {
        self.restart_names(names).await
    }

    async fn restart_names(&self, names: &[String]) -> (usize, usize) {
        let mut restarted = 0;
        let mut failed = 0;
        for name in names {
            match self.restart(name).await {
                Ok(()) => restarted += 1,
                Err(_) => failed += 1,
            }
        }
        (restarted, failed)
    }

    /// Snapshot of every process in configuration order; never blocks
    pub fn processes(&self) -> Vec<ProcessSummary> {
        self.order
            .iter()
            .filter_map(|name| self.handles.get(name))
            .map(|h| h.status_rx.borrow().clone())
            .collect()
    }

    /// The most recent `limit` log entries
    pub fn logs(&self, limit: usize) -> Vec<LogEntry> {
        self.ring.snapshot(limit)
    }

    /// The most recent `limit` entries for one process
    pub fn logs_by_process(&self, name: &str, limit: usize) -> Vec<LogEntry> {
        self.ring.snapshot_by_process(name, limit)
    }

    /// The most recent `limit` captured-output entries
    pub fn worker_logs(&self, limit: usize) -> Vec<LogEntry> {
        self.ring.snapshot_worker_output(limit)
    }

    /// The most recent `limit` supervisor-narration entries
    pub fn system_logs(&self, limit: usize) -> Vec<LogEntry> {
        self.ring.snapshot_system_events(limit)
    }

    /// Handle to the shared log ring
    pub fn ring(&self) -> &LogRing {
        &self.ring
    }

    /// Handle to the persistence sink
    pub fn storage(&self) -> Arc<dyn CrashStore> {
        self.store.clone()
    }

    /// Stop every running process and refuse further commands. Idempotent.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("supervisor shutting down");

        let mut pending = Vec::new();
        for name in &self.order {
            if let Some(handle) = self.handles.get(name) {
                let (reply, rx) = oneshot::channel();
                if handle.ctl_tx.send(Command::Shutdown { reply }).is_ok() {
                    pending.push(rx);
                }
            }
        }
        for rx in pending {
            let _ = rx.await;
        }
        self.ring.info("supervisor stopped");
    }

    async fn command<F>(&self, name: &str, make: F) -> Result<()>
    where
        F: FnOnce(oneshot::Sender<Result<()>>) -> Command,
    {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(CoreError::ShuttingDown);
        }
        let handle = self.handles.get(name).ok_or_else(|| CoreError::NotFound {
            name: name.to_string(),
        })?;

        let (reply, rx) = oneshot::channel();
        handle
            .ctl_tx
            .send(make(reply))
            .map_err(|_| CoreError::ShuttingDown)?;
        rx.await.map_err(|_| CoreError::ShuttingDown)?
    }
}
