//! Per-spawn process runtime: child ownership, output capture, exit reporting
//!
//! One runtime instance represents one spawn attempt. It owns the child and
//! its two pipe readers; the supervisor only keeps a [`RunningHandle`] for
//! signalling. When the child terminates, the runtime joins both readers and
//! delivers exactly one generation-stamped [`ExitReport`] on the exit
//! channel, so the report always carries the complete output tails.
//!
//! Process management is abstracted behind [`ProcessAdapter`] /
//! [`ManagedProcess`] so the supervisor can be driven by a mock in tests.

use crate::logring::LogRing;
use crate::{CoreError, Result};
use async_trait::async_trait;
use schema::{LogLevel, ProcessSpec};
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::Instant;
use tracing::debug;

/// Maximum captured line length; longer lines are cut with a marker
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Bytes of stdout/stderr retained for crash forensics
pub const TAIL_BYTES: usize = 4096;

const TRUNCATION_MARKER: &str = " [truncated]";

/// Boxed pipe handle for a child's stdout or stderr
pub type OutputPipe = Pin<Box<dyn AsyncRead + Send + Unpin>>;

/// Decomposed exit status of a child process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code, if the child exited normally
    pub exit_code: Option<i32>,
    /// Raw signal number, if the child was killed by a signal
    pub signal: Option<i32>,
}

/// Terminal report for one spawn attempt, delivered exactly once
#[derive(Debug, Clone)]
pub struct ExitReport {
    /// Generation captured at spawn; stale reports are fenced out
    pub generation: u64,
    /// Exit code; -1 is synthesized when the status could not be collected
    pub exit_code: Option<i32>,
    /// Raw signal number, if killed by a signal
    pub signal: Option<i32>,
    /// Populated when the runtime itself failed rather than the child
    pub error_message: Option<String>,
    /// Last [`TAIL_BYTES`] of captured stdout
    pub stdout_tail: String,
    /// Last [`TAIL_BYTES`] of captured stderr
    pub stderr_tail: String,
    /// When the child was spawned
    pub started_at: SystemTime,
    /// When the exit was observed
    pub ended_at: SystemTime,
}

/// Trait for spawning managed processes in a platform-agnostic way
#[async_trait]
pub trait ProcessAdapter: Send + Sync {
    /// Spawn a new managed process according to the specification
    async fn spawn(&self, spec: &ProcessSpec) -> Result<Box<dyn ManagedProcess>>;
}

/// A spawned child that can be signalled and awaited
#[async_trait]
pub trait ManagedProcess: Send + Sync {
    /// Get the process ID
    fn pid(&self) -> u32;

    /// Wait for the process to exit.
    ///
    /// Must be cancel safe: the runtime polls this inside a `select!` that
    /// also services stop signals.
    async fn wait(&mut self) -> Result<ProcessExit>;

    /// Request graceful termination (SIGTERM to the process group)
    async fn terminate(&mut self) -> Result<()>;

    /// Force termination (SIGKILL to the process group)
    async fn kill(&mut self) -> Result<()>;

    /// Take the stdout pipe, if piped and not already taken
    fn take_stdout(&mut self) -> Option<OutputPipe>;

    /// Take the stderr pipe, if piped and not already taken
    fn take_stderr(&mut self) -> Option<OutputPipe>;
}

/// Signals the supervisor can send to a live runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopSignal {
    Graceful,
    Forceful,
}

/// Handle to one live spawn attempt.
///
/// Dropping the handle does not affect the child; the runtime keeps driving
/// it until exit and still delivers its report.
#[derive(Debug, Clone)]
pub struct RunningHandle {
    pid: u32,
    ctl_tx: mpsc::UnboundedSender<StopSignal>,
    done_rx: watch::Receiver<bool>,
}

impl RunningHandle {
    /// PID of the child
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Request graceful termination; a no-op if the child already exited
    pub fn signal_graceful(&self) {
        let _ = self.ctl_tx.send(StopSignal::Graceful);
    }

    /// Force termination; a no-op if the child already exited
    pub fn signal_forceful(&self) {
        let _ = self.ctl_tx.send(StopSignal::Forceful);
    }

    /// Wait until the child has exited or the deadline passes.
    ///
    /// Returns true if the exit was observed in time. The exit report is
    /// always delivered on the exit channel regardless.
    pub async fn wait_until(&self, deadline: Instant) -> bool {
        let mut rx = self.done_rx.clone();
        if *rx.borrow() {
            return true;
        }
        tokio::time::timeout_at(deadline, async {
            while rx.changed().await.is_ok() {
                if *rx.borrow() {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap_or(false)
    }
}

/// Launch one spawn attempt.
///
/// Connects the child's stdout/stderr to the log ring (each line published
/// as `"[name] " + line`), retains rolling output tails, and arranges for a
/// single [`ExitReport`] carrying `generation` to be sent on `exit_tx` after
/// the child terminates and both readers have drained.
pub async fn spawn_runtime(
    spec: &ProcessSpec,
    generation: u64,
    ring: &LogRing,
    exit_tx: mpsc::UnboundedSender<ExitReport>,
    adapter: &Arc<dyn ProcessAdapter>,
) -> Result<RunningHandle> {
    let mut process = adapter.spawn(spec).await.map_err(|e| match e {
        CoreError::SpawnFailed { reason, .. } => CoreError::SpawnFailed {
            name: spec.name.clone(),
            reason,
        },
        other => other,
    })?;

    let pid = process.pid();
    let started_at = SystemTime::now();

    let stdout = process.take_stdout();
    let stderr = process.take_stderr();
    let out_task = tokio::spawn(pump_output(
        stdout,
        ring.clone(),
        spec.name.clone(),
        LogLevel::Stdout,
    ));
    let err_task = tokio::spawn(pump_output(
        stderr,
        ring.clone(),
        spec.name.clone(),
        LogLevel::Stderr,
    ));

    let (ctl_tx, mut ctl_rx) = mpsc::unbounded_channel();
    let (done_tx, done_rx) = watch::channel(false);
    let name = spec.name.clone();
    let waiter_ring = ring.clone();

    tokio::spawn(async move {
        let mut ctl_open = true;
        let exit = loop {
            tokio::select! {
                res = process.wait() => break res,
                sig = ctl_rx.recv(), if ctl_open => match sig {
                    Some(StopSignal::Graceful) => {
                        if let Err(e) = process.terminate().await {
                            waiter_ring.warn(format!(
                                "failed to terminate '{name}' (pid {pid}): {e}"
                            ));
                        }
                    }
                    Some(StopSignal::Forceful) => {
                        if let Err(e) = process.kill().await {
                            waiter_ring.warn(format!(
                                "failed to kill '{name}' (pid {pid}): {e}"
                            ));
                        }
                    }
                    None => ctl_open = false,
                },
            }
        };

        // Join both readers so the tails are complete before the report
        let stdout_tail = out_task.await.unwrap_or_default();
        let stderr_tail = err_task.await.unwrap_or_default();

        let (exit_code, signal, error_message) = match exit {
            Ok(px) => (px.exit_code, px.signal, None),
            Err(e) => (Some(-1), None, Some(e.to_string())),
        };

        let _ = done_tx.send(true);
        let _ = exit_tx.send(ExitReport {
            generation,
            exit_code,
            signal,
            error_message,
            stdout_tail,
            stderr_tail,
            started_at,
            ended_at: SystemTime::now(),
        });
        debug!("runtime for '{name}' generation {generation} finished");
    });

    Ok(RunningHandle {
        pid,
        ctl_tx,
        done_rx,
    })
}

/// Drain one pipe into the ring line-by-line, returning the rolling tail
async fn pump_output(
    stream: Option<OutputPipe>,
    ring: LogRing,
    name: String,
    level: LogLevel,
) -> String {
    let Some(stream) = stream else {
        return String::new();
    };

    let mut lines = BufReader::new(stream).lines();
    let mut tail: Vec<u8> = Vec::new();

    loop {
        match lines.next_line().await {
            Ok(Some(mut line)) => {
                if line.len() > MAX_LINE_BYTES {
                    let mut cut = MAX_LINE_BYTES;
                    while !line.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    line.truncate(cut);
                    line.push_str(TRUNCATION_MARKER);
                }
                push_tail(&mut tail, &line);
                ring.worker_line(&name, level, format!("[{name}] {line}"));
            }
            Ok(None) => break,
            Err(e) => {
                ring.warn(format!("output reader for '{name}' failed: {e}"));
                break;
            }
        }
    }

    String::from_utf8_lossy(&tail).into_owned()
}

fn push_tail(tail: &mut Vec<u8>, line: &str) {
    tail.extend_from_slice(line.as_bytes());
    tail.push(b'\n');
    if tail.len() > TAIL_BYTES {
        let excess = tail.len() - TAIL_BYTES;
        tail.drain(..excess);
    }
}

/// Unix process adapter spawning children in their own process groups
#[cfg(unix)]
#[derive(Copy, Clone, Debug, Default)]
pub struct UnixProcessAdapter;

#[cfg(unix)]
impl UnixProcessAdapter {
    /// Create a new Unix process adapter
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[cfg(unix)]
#[async_trait]
impl ProcessAdapter for UnixProcessAdapter {
    async fn spawn(&self, spec: &ProcessSpec) -> Result<Box<dyn ManagedProcess>> {
        use crate::process::unix;

        debug!("Spawning Unix process: {} {:?}", spec.command, spec.args);

        let args: Vec<&str> = spec.args.iter().map(String::as_str).collect();
        let child = unix::spawn_with(&spec.command, &args, &spec.env, spec.cwd.as_deref())?;

        Ok(Box::new(UnixManagedProcess { child }))
    }
}

#[cfg(unix)]
struct UnixManagedProcess {
    child: crate::process::unix::ChildProcess,
}

#[cfg(unix)]
#[async_trait]
impl ManagedProcess for UnixManagedProcess {
    fn pid(&self) -> u32 {
        self.child.pid()
    }

    async fn wait(&mut self) -> Result<ProcessExit> {
        let status = self.child.wait().await?;
        let (exit_code, signal) = status.code().map_or_else(
            || {
                use std::os::unix::process::ExitStatusExt;
                (None, status.signal())
            },
            |code| (Some(code), None),
        );
        Ok(ProcessExit { exit_code, signal })
    }

    async fn terminate(&mut self) -> Result<()> {
        crate::process::unix::signal_term_group(&self.child)
    }

    async fn kill(&mut self) -> Result<()> {
        crate::process::unix::signal_kill_group(&self.child)
    }

    fn take_stdout(&mut self) -> Option<OutputPipe> {
        self.child.take_stdout().map(|s| {
            let pipe: OutputPipe = Box::pin(s);
            pipe
        })
    }

    fn take_stderr(&mut self) -> Option<OutputPipe> {
        self.child.take_stderr().map(|s| {
            let pipe: OutputPipe = Box::pin(s);
            pipe
        })
    }
}

/// Behavior of the next mock process spawned by [`MockProcessAdapter`]
#[derive(Debug, Clone)]
pub struct MockInstruction {
    /// How long the process "runs" before exiting on its own
    pub exit_delay: Duration,
    /// Exit code when exiting on its own
    pub exit_code: Option<i32>,
    /// Signal when exiting on its own
    pub signal: Option<i32>,
    /// Whether graceful termination works; forceful always does
    pub responds_to_signals: bool,
    /// Lines emitted on stdout before the process idles
    pub stdout_lines: Vec<String>,
    /// Lines emitted on stderr before the process idles
    pub stderr_lines: Vec<String>,
    /// When set, the spawn itself fails with this message
    pub spawn_error: Option<String>,
}

impl Default for MockInstruction {
    fn default() -> Self {
        Self {
            exit_delay: Duration::from_millis(100),
            exit_code: Some(0),
            signal: None,
            responds_to_signals: true,
            stdout_lines: vec![],
            stderr_lines: vec![],
            spawn_error: None,
        }
    }
}

impl MockInstruction {
    /// A process that exits with the given code after `delay`
    pub fn exits_with(code: i32, delay: Duration) -> Self {
        Self {
            exit_delay: delay,
            exit_code: Some(code),
            ..Self::default()
        }
    }

    /// A long-lived process that responds to signals
    pub fn long_running() -> Self {
        Self {
            exit_delay: Duration::from_secs(3600),
            ..Self::default()
        }
    }

    /// A long-lived process that ignores graceful termination
    pub fn ignores_sigterm() -> Self {
        Self {
            exit_delay: Duration::from_secs(3600),
            responds_to_signals: false,
            ..Self::default()
        }
    }
}

/// Mock process adapter for deterministic supervisor tests
#[derive(Debug, Clone)]
pub struct MockProcessAdapter {
    instructions: Arc<Mutex<Vec<MockInstruction>>>,
    default_instruction: Arc<Mutex<MockInstruction>>,
}

impl MockProcessAdapter {
    /// Create a new mock adapter; spawns use the default instruction until
    /// queued instructions are added
    #[must_use]
    pub fn new() -> Self {
        Self {
            instructions: Arc::new(Mutex::new(vec![])),
            default_instruction: Arc::new(Mutex::new(MockInstruction::default())),
        }
    }

    /// Queue an instruction for the next spawned process
    pub async fn add_instruction(&self, instruction: MockInstruction) {
        self.instructions.lock().await.push(instruction);
    }

    /// Replace the behavior used when the instruction queue is empty
    pub async fn set_default(&self, instruction: MockInstruction) {
        *self.default_instruction.lock().await = instruction;
    }
}

impl Default for MockProcessAdapter {
    fn default() -> Self {
        Self::new()
    }
}

static NEXT_MOCK_PID: AtomicU32 = AtomicU32::new(10_000);

#[async_trait]
impl ProcessAdapter for MockProcessAdapter {
    async fn spawn(&self, spec: &ProcessSpec) -> Result<Box<dyn ManagedProcess>> {
        debug!("Spawning mock process for: {} {:?}", spec.command, spec.args);

        let mut instructions = self.instructions.lock().await;
        let mut instruction = if instructions.is_empty() {
            self.default_instruction.lock().await.clone()
        } else {
            instructions.remove(0)
        };

        if let Some(reason) = instruction.spawn_error.take() {
            return Err(CoreError::SpawnFailed {
                name: spec.name.clone(),
                reason,
            });
        }

        let pid = NEXT_MOCK_PID.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(MockManagedProcess::new(pid, instruction)))
    }
}

struct MockManagedProcess {
    pid: u32,
    instruction: MockInstruction,
    started_at: std::time::Instant,
    terminated: bool,
    killed: bool,
}

impl MockManagedProcess {
    fn new(pid: u32, instruction: MockInstruction) -> Self {
        Self {
            pid,
            instruction,
            started_at: std::time::Instant::now(),
            terminated: false,
            killed: false,
        }
    }

    fn should_exit(&self) -> bool {
        if self.killed {
            return true;
        }
        if self.terminated && self.instruction.responds_to_signals {
            return true;
        }
        self.started_at.elapsed() >= self.instruction.exit_delay
    }

    fn create_exit(&self) -> ProcessExit {
        if self.killed {
            ProcessExit {
                exit_code: None,
                signal: Some(9),
            }
        } else if self.terminated && self.instruction.responds_to_signals {
            ProcessExit {
                exit_code: None,
                signal: Some(15),
            }
        } else {
            ProcessExit {
                exit_code: self.instruction.exit_code,
                signal: self.instruction.signal,
            }
        }
    }

    fn lines_pipe(lines: &[String]) -> Option<OutputPipe> {
        if lines.is_empty() {
            return None;
        }
        let (mut writer, reader) = tokio::io::duplex(MAX_LINE_BYTES);
        let payload: String = lines.iter().map(|l| format!("{l}\n")).collect();
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            let _ = writer.write_all(payload.as_bytes()).await;
            // writer drops here, readers observe EOF
        });
        Some(Box::pin(reader))
    }
}

#[async_trait]
impl ManagedProcess for MockManagedProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    async fn wait(&mut self) -> Result<ProcessExit> {
        while !self.should_exit() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Ok(self.create_exit())
    }

    async fn terminate(&mut self) -> Result<()> {
        debug!("Terminating mock process {}", self.pid);
        self.terminated = true;
        Ok(())
    }

    async fn kill(&mut self) -> Result<()> {
        debug!("Killing mock process {}", self.pid);
        self.killed = true;
        Ok(())
    }

    fn take_stdout(&mut self) -> Option<OutputPipe> {
        Self::lines_pipe(&self.instruction.stdout_lines)
    }

    fn take_stderr(&mut self) -> Option<OutputPipe> {
        Self::lines_pipe(&self.instruction.stderr_lines)
    }
}
