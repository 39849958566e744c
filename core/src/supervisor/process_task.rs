//! Per-process supervisor task
//!
//! Each supervised process is driven by one tokio task that owns its
//! [`ProcessState`] machine. The task serialises all commands for its name,
//! observes exit reports from the runtime, applies the restart policy, and
//! publishes snapshots through a watch channel.
//!
//! Ordering guarantees kept here:
//! - an exit report is only handled after both pipe readers drained (the
//!   runtime joins them before sending), so crash tails are complete;
//! - crash persistence is awaited before any later Starting transition;
//! - reports whose generation does not match the live generation are dropped,
//!   which makes concurrent restarts safe against late exit delivery.

use super::restart::RestartTracker;
use crate::logring::LogRing;
use crate::runtime::{spawn_runtime, ExitReport, ProcessAdapter, RunningHandle};
use crate::storage::CrashStore;
use crate::{CoreError, Result};
use schema::{
    format_uptime, timestamp_for, CrashRecord, LastExit, ProcessSpec, ProcessState,
    ProcessSummary,
};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, timeout, Instant};
use tracing::debug;

/// Commands accepted by a process task; each carries its reply channel
#[derive(Debug)]
pub(crate) enum Command {
    Start { reply: oneshot::Sender<Result<()>> },
    Stop { reply: oneshot::Sender<Result<()>> },
    Restart { reply: oneshot::Sender<Result<()>> },
    Shutdown { reply: oneshot::Sender<()> },
}

/// Channel ends the supervisor facade keeps per process
#[derive(Debug, Clone)]
pub(crate) struct TaskHandle {
    pub(crate) ctl_tx: mpsc::UnboundedSender<Command>,
    pub(crate) status_rx: watch::Receiver<ProcessSummary>,
}

/// Spawn the supervisor task for one process specification
pub(crate) fn spawn_process_task(
    spec: ProcessSpec,
    ring: LogRing,
    store: Arc<dyn CrashStore>,
    adapter: Arc<dyn ProcessAdapter>,
) -> TaskHandle {
    let (ctl_tx, ctl_rx) = mpsc::unbounded_channel();
    let (status_tx, status_rx) = watch::channel(ProcessSummary::idle(&spec.name));
    let (exit_tx, exit_rx) = mpsc::unbounded_channel();
    let restarts = RestartTracker::new(spec.restart_window());

    let task = ProcessTask {
        spec,
        state: ProcessState::Idle,
        generation: 0,
        pid: None,
        ring,
        store,
        adapter,
        status_tx,
        current: None,
        exit_tx,
        exit_rx,
        restarts,
        backoff_until: None,
        started_at: None,
        last_exit: None,
    };

    tokio::spawn(task.run(ctl_rx));

    TaskHandle { ctl_tx, status_rx }
}

struct ProcessTask {
    spec: ProcessSpec,
    state: ProcessState,
    generation: u64,
    pid: Option<u32>,
    ring: LogRing,
    store: Arc<dyn CrashStore>,
    adapter: Arc<dyn ProcessAdapter>,
    status_tx: watch::Sender<ProcessSummary>,
    current: Option<RunningHandle>,
    exit_tx: mpsc::UnboundedSender<ExitReport>,
    exit_rx: mpsc::UnboundedReceiver<ExitReport>,
    restarts: RestartTracker,
    backoff_until: Option<Instant>,
    started_at: Option<SystemTime>,
    last_exit: Option<LastExit>,
}

impl ProcessTask {
    async fn run(mut self, mut ctl_rx: mpsc::UnboundedReceiver<Command>) {
        debug!("supervising '{}'", self.spec.name);

        loop {
            let backoff_deadline = self
                .backoff_until
                .unwrap_or_else(|| Instant::now() + Duration::from_secs(86_400));

            tokio::select! {
                cmd = ctl_rx.recv() => match cmd {
                    None => {
                        self.shutdown_process().await;
                        break;
                    }
                    Some(Command::Shutdown { reply }) => {
                        self.shutdown_process().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(cmd) => self.handle_command(cmd).await,
                },
                Some(report) = self.exit_rx.recv() => {
                    self.handle_exit(report).await;
                }
                _ = sleep_until(backoff_deadline), if self.backoff_until.is_some() => {
                    self.backoff_until = None;
                    self.backoff_fired().await;
                }
            }
        }

        debug!("supervisor task for '{}' terminated", self.spec.name);
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Start { reply } => {
                let _ = reply.send(self.cmd_start().await);
            }
            Command::Stop { reply } => {
                let _ = reply.send(self.cmd_stop().await);
            }
            Command::Restart { reply } => {
                let _ = reply.send(self.cmd_restart().await);
            }
            // Shutdown is intercepted by the run loop
            Command::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    async fn cmd_start(&mut self) -> Result<()> {
        if self.state.is_active() {
            return Err(CoreError::AlreadyRunning {
                name: self.spec.name.clone(),
            });
        }

        // Manual start out of Crashed opens a fresh budget window; a start
        // during Backoff cancels the pending timer.
        if self.state == ProcessState::Crashed {
            self.restarts.clear();
        }
        self.backoff_until = None;

        self.ring.info(format!("starting {}", self.spec.name));
        self.do_start().await
    }

    async fn cmd_stop(&mut self) -> Result<()> {
        if !self.state.is_active() {
            return Err(CoreError::NotRunning {
                name: self.spec.name.clone(),
            });
        }

        self.ring.info(format!("stopping {}", self.spec.name));
        self.do_stop().await;
        Ok(())
    }

    async fn cmd_restart(&mut self) -> Result<()> {
        if self.state.is_active() {
            self.ring.info(format!("stopping {}", self.spec.name));
            self.do_stop().await;
        }
        self.cmd_start().await
    }

    /// Transition into Starting, bump the generation, and spawn the runtime
    async fn do_start(&mut self) -> Result<()> {
        self.set_state(ProcessState::Starting);
        self.generation += 1;

        match spawn_runtime(
            &self.spec,
            self.generation,
            &self.ring,
            self.exit_tx.clone(),
            &self.adapter,
        )
        .await
        {
            Ok(handle) => {
                self.pid = Some(handle.pid());
                self.started_at = Some(SystemTime::now());
                self.current = Some(handle);
                self.set_state(ProcessState::Running);
                Ok(())
            }
            Err(err) => {
                // Spawn failures flow through the common crash path with a
                // synthesized report, then surface to the caller.
                let reason = err.to_string();
                let now = SystemTime::now();
                let report = ExitReport {
                    generation: self.generation,
                    exit_code: Some(-1),
                    signal: None,
                    error_message: Some(reason),
                    stdout_tail: String::new(),
                    stderr_tail: String::new(),
                    started_at: now,
                    ended_at: now,
                };
                self.handle_crash(report).await;
                Err(err)
            }
        }
    }

    /// Graceful-then-forceful stop; consumes the exit report inline so a
    /// user-requested stop never records a crash or schedules a restart
    async fn do_stop(&mut self) {
        let Some(handle) = self.current.take() else {
            self.pid = None;
            self.started_at = None;
            self.set_state(ProcessState::Idle);
            return;
        };

        self.set_state(ProcessState::Stopping);
        handle.signal_graceful();

        let report = match timeout(self.spec.stop_timeout(), self.recv_current_exit()).await {
            Ok(report) => report,
            Err(_) => {
                self.ring.warn(format!(
                    "{} did not stop within {}ms, killing",
                    self.spec.name, self.spec.stop_timeout_ms
                ));
                handle.signal_forceful();
                self.recv_current_exit().await
            }
        };

        if let Some(report) = report {
            self.last_exit = Some(last_exit_of(&report));
        }
        self.pid = None;
        self.started_at = None;
        self.set_state(ProcessState::Idle);
    }

    /// Await the exit report for the live generation, dropping stale ones
    async fn recv_current_exit(&mut self) -> Option<ExitReport> {
        while let Some(report) = self.exit_rx.recv().await {
            if report.generation == self.generation {
                return Some(report);
            }
            debug!(
                "dropping stale exit report for {} (generation {} != {})",
                self.spec.name, report.generation, self.generation
            );
        }
        None
    }

    async fn handle_exit(&mut self, report: ExitReport) {
        if report.generation != self.generation {
            debug!(
                "dropping stale exit report for {} (generation {} != {})",
                self.spec.name, report.generation, self.generation
            );
            return;
        }
        if !matches!(self.state, ProcessState::Running | ProcessState::Starting) {
            // A stop consumed its report inline; anything else arriving in a
            // non-live state is a leftover and carries no new information.
            return;
        }

        self.current = None;
        self.handle_crash(report).await;
    }

    /// Classify an unrequested exit: record forensics, then apply policy
    async fn handle_crash(&mut self, report: ExitReport) {
        self.restarts.record(Instant::now());
        self.last_exit = Some(last_exit_of(&report));
        self.pid = None;
        self.started_at = None;
        self.current = None;

        let signal = report.signal.map(signal_name);
        let summary = match (&report.error_message, report.exit_code, &signal) {
            (Some(msg), _, _) => msg.clone(),
            (None, _, Some(sig)) => format!("killed by {sig}"),
            (None, Some(code), None) => format!("exit code {code}"),
            (None, None, None) => "unknown exit status".to_string(),
        };
        self.ring
            .error(format!("{} crashed ({summary})", self.spec.name));

        let uptime = report
            .ended_at
            .duration_since(report.started_at)
            .unwrap_or_default();
        let record = CrashRecord {
            id: 0,
            process_name: self.spec.name.clone(),
            exit_code: report.exit_code.unwrap_or(-1),
            signal,
            error_message: report.error_message.clone(),
            stdout_tail: report.stdout_tail.clone(),
            stderr_tail: report.stderr_tail.clone(),
            started_at: timestamp_for(report.started_at),
            crashed_at: timestamp_for(report.ended_at),
            uptime: format_uptime(uptime),
        };

        // Persistence is awaited so crash history stays causally ordered
        // with restarts; a failed persist is contained here.
        if let Err(e) = self.store.save_crash(record).await {
            self.ring.error(format!(
                "failed to persist crash record for {}: {e}",
                self.spec.name
            ));
        }

        if !self.spec.auto_restart {
            self.set_state(ProcessState::Crashed);
            return;
        }

        let count = self.restarts.count(Instant::now());
        if self.spec.max_restarts > 0 && count >= self.spec.max_restarts {
            self.ring.error(format!(
                "restart budget exhausted for {} ({count} crashes in {}s)",
                self.spec.name, self.spec.restart_window_secs
            ));
            self.set_state(ProcessState::Crashed);
            return;
        }

        self.backoff_until = Some(Instant::now() + self.spec.restart_delay());
        self.set_state(ProcessState::Backoff);
    }

    async fn backoff_fired(&mut self) {
        if self.state != ProcessState::Backoff {
            return;
        }
        self.ring.info(format!("starting {}", self.spec.name));
        if let Err(e) = self.do_start().await {
            debug!("automatic restart of {} failed: {e}", self.spec.name);
        }
    }

    async fn shutdown_process(&mut self) {
        self.backoff_until = None;
        if self.state.is_active() {
            self.ring.info(format!("stopping {}", self.spec.name));
            self.do_stop().await;
        }
    }

    fn set_state(&mut self, state: ProcessState) {
        if self.state != state {
            debug!("{}: {:?} -> {:?}", self.spec.name, self.state, state);
        }
        self.state = state;
        let _ = self.status_tx.send(self.summary());
    }

    fn summary(&self) -> ProcessSummary {
        ProcessSummary {
            name: self.spec.name.clone(),
            state: self.state,
            pid: if self.state.has_child() { self.pid } else { None },
            started_at: if self.state.has_child() {
                self.started_at.map(timestamp_for)
            } else {
                None
            },
            restarts_in_window: self.restarts.count(Instant::now()),
            last_exit: self.last_exit.clone(),
        }
    }
}

fn last_exit_of(report: &ExitReport) -> LastExit {
    LastExit {
        exit_code: report.exit_code,
        signal: report.signal.map(signal_name),
        ended_at: timestamp_for(report.ended_at),
    }
}

/// Symbolic name for a raw signal number, e.g. 15 -> "SIGTERM"
fn signal_name(raw: i32) -> String {
    #[cfg(unix)]
    {
        if let Ok(sig) = nix::sys::signal::Signal::try_from(raw) {
            return sig.to_string();
        }
    }
    format!("signal {raw}")
}
