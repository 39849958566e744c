//! Integration tests for Unix process-group management
//!
//! These verify that spawned children really live in their own process
//! group and that group-wide signals reach descendants the child forked
//! itself, so nothing leaks past a stop.

#![cfg(unix)]
#![allow(unsafe_code)] // Required for libc::kill probes in tests

use procyon_core::process::unix::{signal_kill_group, signal_term_group, spawn_with};
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Signal-0 existence probe
fn pid_alive(pid: i32) -> bool {
    unsafe { libc::kill(pid, 0) == 0 }
}

/// Poll until the PID disappears; returns false if it survives the deadline
async fn wait_for_gone(pid: i32) -> bool {
    for _ in 0..50 {
        if !pid_alive(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
async fn spawned_process_is_its_own_group_leader() {
    let child = spawn_with("sleep", &["1"], &HashMap::new(), None).expect("failed to spawn sleep");

    // Group leader: PGID equals PID
    assert_eq!(child.pid(), child.pgid());

    // And the group is distinct from ours
    let parent_pgid = unsafe { libc::getpgrp() };
    assert_ne!(child.pgid() as i32, parent_pgid);

    let _ = signal_kill_group(&child);
}

#[tokio::test]
async fn group_kill_reaps_forked_children() {
    // Shell script that forks two background sleepers and reports their PIDs
    let script = "sleep 30 & echo $!; sleep 30 & echo $!; sleep 30";
    let mut child =
        spawn_with("sh", &["-c", script], &HashMap::new(), None).expect("failed to spawn sh");

    let stdout = child.take_stdout().expect("stdout should be piped");
    let mut lines = BufReader::new(stdout).lines();
    let mut forked = Vec::new();
    for _ in 0..2 {
        let line = lines
            .next_line()
            .await
            .expect("read pid line")
            .expect("script should print two pids");
        forked.push(line.trim().parse::<i32>().expect("numeric pid"));
    }

    for pid in &forked {
        assert!(pid_alive(*pid), "forked child {pid} should be running");
    }

    signal_kill_group(&child).expect("failed to send SIGKILL to group");
    let _ = child.wait().await;

    // The whole tree dies with the group, not just the shell
    for pid in forked {
        assert!(
            wait_for_gone(pid).await,
            "descendant {pid} survived group kill"
        );
    }
}

#[tokio::test]
async fn group_term_reaches_forked_children() {
    let script = "sleep 30 & echo $!; sleep 30";
    let mut child =
        spawn_with("sh", &["-c", script], &HashMap::new(), None).expect("failed to spawn sh");

    let stdout = child.take_stdout().expect("stdout should be piped");
    let mut lines = BufReader::new(stdout).lines();
    let forked: i32 = lines
        .next_line()
        .await
        .expect("read pid line")
        .expect("script should print a pid")
        .trim()
        .parse()
        .expect("numeric pid");
    assert!(pid_alive(forked));

    signal_term_group(&child).expect("failed to send SIGTERM to group");
    let _ = child.wait().await;

    assert!(
        wait_for_gone(forked).await,
        "descendant {forked} survived group SIGTERM"
    );
}
