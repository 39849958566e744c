//! Unix process management with safe spawn/kill using process groups
//!
//! Spawned children are placed in their own process group via `setsid()`, so
//! termination signals reach the entire process tree: a supervised shell
//! script cannot leak grandchildren past a stop. SIGTERM is used for graceful
//! termination and SIGKILL for forceful termination; both target the group.

// Process management requires libc::setsid() in pre_exec
#![allow(unsafe_code)]

use crate::{CoreError, Result};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::{debug, error};

/// A child process managed with Unix process groups.
///
/// The process is guaranteed to be its own process group leader, allowing
/// reliable cleanup of the entire process tree.
#[derive(Debug)]
pub struct ChildProcess {
    pid: Pid,
    child: Child,
}

impl ChildProcess {
    /// Get the process ID
    pub fn pid(&self) -> u32 {
        self.pid.as_raw() as u32
    }

    /// Get the process group ID (same as PID for session leaders)
    pub fn pgid(&self) -> u32 {
        self.pid.as_raw() as u32
    }

    /// Wait for the process to exit and return its exit status
    pub async fn wait(&mut self) -> Result<std::process::ExitStatus> {
        self.child.wait().await.map_err(|e| {
            CoreError::Process(format!("failed to wait for process {}: {e}", self.pid))
        })
    }

    /// Try to collect the exit status without blocking
    pub fn try_wait(&mut self) -> Result<Option<std::process::ExitStatus>> {
        self.child.try_wait().map_err(|e| {
            CoreError::Process(format!("failed to try_wait for process {}: {e}", self.pid))
        })
    }

    /// Take the stdout handle for async reading, if not already taken
    pub fn take_stdout(&mut self) -> Option<tokio::process::ChildStdout> {
        self.child.stdout.take()
    }

    /// Take the stderr handle for async reading, if not already taken
    pub fn take_stderr(&mut self) -> Option<tokio::process::ChildStderr> {
        self.child.stderr.take()
    }
}

/// Spawn a process in its own process group with the given environment and
/// working directory.
///
/// The environment entries are merged over the inherited environment. The
/// child's stdout and stderr are piped for capture.
pub fn spawn_with(
    cmd: &str,
    args: &[&str],
    env: &HashMap<String, String>,
    cwd: Option<&str>,
) -> Result<ChildProcess> {
    debug!("Spawning process: {} {:?}", cmd, args);

    let mut command = Command::new(cmd);
    command.args(args);
    command.envs(env);
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());
    command.stdin(Stdio::null());

    // Safety: setsid() is async-signal-safe and appropriate for pre_exec
    unsafe {
        command.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let child = command.spawn().map_err(|e| {
        debug!("Failed to spawn process '{}': {}", cmd, e);
        CoreError::SpawnFailed {
            name: cmd.to_string(),
            reason: e.to_string(),
        }
    })?;

    let raw_pid = child.id().ok_or_else(|| CoreError::SpawnFailed {
        name: cmd.to_string(),
        reason: "spawned child did not have a PID".to_string(),
    })?;
    let pid = Pid::from_raw(raw_pid as i32);
    debug!("Spawned process {} in new process group", pid);

    Ok(ChildProcess { pid, child })
}

/// Send SIGTERM to the process group for graceful termination.
///
/// ESRCH and EPERM are treated as success: the group has already exited (or
/// exited and been replaced), which is the outcome we wanted.
pub fn signal_term_group(child: &ChildProcess) -> Result<()> {
    signal_group(child, Signal::SIGTERM)
}

/// Send SIGKILL to the process group for forceful termination
pub fn signal_kill_group(child: &ChildProcess) -> Result<()> {
    signal_group(child, Signal::SIGKILL)
}

fn signal_group(child: &ChildProcess, signal: Signal) -> Result<()> {
    debug!("Sending {} to process group {}", signal, child.pid);

    match killpg(child.pid, signal) {
        Ok(()) => Ok(()),
        Err(nix::errno::Errno::ESRCH) => {
            debug!("Process group {} already exited", child.pid);
            Ok(())
        }
        Err(nix::errno::Errno::EPERM) => {
            debug!(
                "Permission denied signaling process group {} (likely already exited)",
                child.pid
            );
            Ok(())
        }
        Err(e) => {
            error!("Failed to send {} to process group {}: {}", signal, child.pid, e);
            Err(CoreError::Process(format!(
                "failed to send {signal} to process group {}: {e}",
                child.pid
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawn_simple_command() {
        let child = spawn_with("echo", &["hello"], &HashMap::new(), None)
            .expect("failed to spawn echo");
        assert!(child.pid() > 0);
        // Process should be its own group leader
        assert_eq!(child.pid(), child.pgid());
    }

    #[tokio::test]
    async fn spawn_and_wait() {
        let mut child =
            spawn_with("true", &[], &HashMap::new(), None).expect("failed to spawn true");
        let status = child.wait().await.expect("failed to wait");
        assert!(status.success());
    }

    #[tokio::test]
    async fn spawn_nonexistent_command() {
        let result = spawn_with("nonexistent_command_12345", &[], &HashMap::new(), None);
        match result {
            Err(CoreError::SpawnFailed { .. }) => {}
            other => panic!("expected SpawnFailed, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn spawn_with_env_and_cwd() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut env = HashMap::new();
        env.insert("PROCYON_TEST_VAR".to_string(), "set".to_string());

        let mut child = spawn_with(
            "sh",
            &["-c", "test \"$PROCYON_TEST_VAR\" = set && test \"$(pwd)\" = \"$EXPECTED\""],
            &{
                env.insert(
                    "EXPECTED".to_string(),
                    dir.path().to_string_lossy().to_string(),
                );
                env
            },
            Some(dir.path().to_str().unwrap()),
        )
        .expect("failed to spawn sh");

        let status = child.wait().await.expect("failed to wait");
        assert!(status.success(), "env or cwd not applied: {status:?}");
    }

    #[tokio::test]
    async fn sigterm_terminates_group() {
        let mut child = spawn_with("sleep", &["10"], &HashMap::new(), None)
            .expect("failed to spawn sleep");

        signal_term_group(&child).expect("failed to send SIGTERM");
        let status = child.wait().await.expect("failed to wait");
        assert!(!status.success());
    }

    #[tokio::test]
    async fn signals_to_dead_group_are_ok() {
        let mut child =
            spawn_with("true", &[], &HashMap::new(), None).expect("failed to spawn true");
        child.wait().await.expect("failed to wait");

        // The group is gone; ESRCH must be swallowed
        assert!(signal_term_group(&child).is_ok());
        assert!(signal_kill_group(&child).is_ok());
    }
}
