//! JSON shape tests for the wire-visible types
//!
//! These pin the field names and defaults the HTTP surface depends on.

use crate::*;
use std::collections::HashMap;

#[test]
fn process_spec_minimal_deserialization() {
    let json = r#"{"name": "web", "command": "/usr/bin/python3"}"#;
    let spec: ProcessSpec = serde_json::from_str(json).expect("minimal spec should parse");

    assert_eq!(spec.name, "web");
    assert_eq!(spec.command, "/usr/bin/python3");
    assert!(spec.args.is_empty());
    assert!(spec.env.is_empty());
    assert!(!spec.auto_restart);
    assert_eq!(spec.max_restarts, 0);
    assert_eq!(spec.restart_window_secs, 60);
    assert_eq!(spec.restart_delay_ms, 1000);
    assert_eq!(spec.stop_timeout_ms, 5000);
}

#[test]
fn process_spec_camel_case_fields() {
    let json = r#"{
        "name": "worker",
        "command": "node",
        "args": ["server.js"],
        "env": {"PORT": "3000"},
        "cwd": "/srv/worker",
        "autoRestart": true,
        "maxRestarts": 3,
        "restartWindowSecs": 120,
        "restartDelayMs": 250,
        "stopTimeoutMs": 2000
    }"#;
    let spec: ProcessSpec = serde_json::from_str(json).expect("full spec should parse");

    assert!(spec.auto_restart);
    assert_eq!(spec.max_restarts, 3);
    assert_eq!(spec.restart_window_secs, 120);
    assert_eq!(spec.restart_delay_ms, 250);
    assert_eq!(spec.stop_timeout_ms, 2000);
    assert_eq!(spec.cwd.as_deref(), Some("/srv/worker"));
    assert_eq!(spec.env.get("PORT").map(String::as_str), Some("3000"));
}

#[test]
fn process_state_serializes_camel_case() {
    assert_eq!(serde_json::to_string(&ProcessState::Idle).unwrap(), "\"idle\"");
    assert_eq!(
        serde_json::to_string(&ProcessState::Backoff).unwrap(),
        "\"backoff\""
    );
    assert_eq!(
        serde_json::to_string(&ProcessState::Crashed).unwrap(),
        "\"crashed\""
    );
}

#[test]
fn process_summary_omits_absent_fields() {
    let summary = ProcessSummary::idle("web");
    let value = serde_json::to_value(&summary).unwrap();

    assert_eq!(value["name"], "web");
    assert_eq!(value["state"], "idle");
    assert_eq!(value["restartsInWindow"], 0);
    assert!(value.get("pid").is_none());
    assert!(value.get("startedAt").is_none());
    assert!(value.get("lastExit").is_none());
}

#[test]
fn crash_record_roundtrip() {
    let record = CrashRecord {
        id: 7,
        process_name: "web".to_string(),
        exit_code: 1,
        signal: Some("SIGKILL".to_string()),
        error_message: None,
        stdout_tail: "last line\n".to_string(),
        stderr_tail: String::new(),
        started_at: "2026-01-01T00:00:00Z".to_string(),
        crashed_at: "2026-01-01T00:01:30Z".to_string(),
        uptime: "1m 30s".to_string(),
    };

    let json = serde_json::to_string(&record).unwrap();
    assert!(json.contains("\"processName\":\"web\""));
    assert!(json.contains("\"exitCode\":1"));
    assert!(!json.contains("errorMessage"));

    let back: CrashRecord = serde_json::from_str(&json).unwrap();
    assert_eq!(back, record);
}

#[test]
fn log_entry_roundtrip() {
    let entry = LogEntry {
        timestamp: current_timestamp(),
        level: LogLevel::Stdout,
        worker: "web".to_string(),
        message: "[web] listening".to_string(),
    };

    let json = serde_json::to_string(&entry).unwrap();
    assert!(json.contains("\"level\":\"stdout\""));

    let back: LogEntry = serde_json::from_str(&json).unwrap();
    assert_eq!(back, entry);
    assert!(back.is_worker_output());
}

#[test]
fn spec_env_defaults_to_empty_map() {
    let spec = ProcessSpec {
        name: "n".to_string(),
        command: "c".to_string(),
        args: vec![],
        env: HashMap::new(),
        cwd: None,
        auto_restart: false,
        max_restarts: 0,
        restart_window_secs: 60,
        restart_delay_ms: 1000,
        stop_timeout_ms: 5000,
    };
    let value = serde_json::to_value(&spec).unwrap();
    assert_eq!(value["env"], serde_json::json!({}));
    assert!(value.get("cwd").is_none());
}
