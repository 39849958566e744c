//! Configuration loading and validation
//!
//! Parses a TOML configuration into `schema::ProcessSpec` values plus the
//! daemon-level knobs (ring capacity, database path), applies serde defaults,
//! and performs strict validation with field-path error messages.

use crate::{CoreError, Result};
use schema::ProcessSpec;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Top-level TOML structure for the supervisor configuration
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Processes to supervise
    pub processes: Vec<ProcessSpec>,

    /// Capacity of the in-memory log ring
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,

    /// Path of the SQLite database used for crash forensics and settings
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_log_capacity() -> usize {
    crate::logring::DEFAULT_LOG_CAPACITY
}

fn default_db_path() -> String {
    "procyon.db".to_string()
}

impl Config {
    /// Validate the configuration, reporting the first offending field path
    pub fn validate(&self) -> Result<()> {
        if self.processes.is_empty() {
            return Err(CoreError::Validation(
                "processes: must contain at least one process".to_string(),
            ));
        }
        if self.log_capacity == 0 {
            return Err(CoreError::Validation(
                "logCapacity: must be > 0".to_string(),
            ));
        }
        if self.db_path.trim().is_empty() {
            return Err(CoreError::Validation("dbPath: cannot be empty".to_string()));
        }

        let mut seen = HashSet::new();
        for (i, proc) in self.processes.iter().enumerate() {
            if proc.name.trim().is_empty() {
                return Err(CoreError::Validation(format!(
                    "processes[{i}].name: cannot be empty"
                )));
            }
            if !seen.insert(proc.name.clone()) {
                return Err(CoreError::Validation(format!(
                    "processes[{i}].name: duplicate name '{}'",
                    proc.name
                )));
            }
            if proc.command.trim().is_empty() {
                return Err(CoreError::Validation(format!(
                    "processes[{i}].command: cannot be empty"
                )));
            }
            for key in proc.env.keys() {
                if key.trim().is_empty() {
                    return Err(CoreError::Validation(format!(
                        "processes[{i}].env: keys cannot be empty"
                    )));
                }
            }
            if let Some(cwd) = &proc.cwd {
                if cwd.trim().is_empty() {
                    return Err(CoreError::Validation(format!(
                        "processes[{i}].cwd: cannot be empty when present"
                    )));
                }
            }
            if proc.restart_window_secs == 0 {
                return Err(CoreError::Validation(format!(
                    "processes[{i}].restartWindowSecs: must be > 0"
                )));
            }
            if proc.stop_timeout_ms == 0 {
                return Err(CoreError::Validation(format!(
                    "processes[{i}].stopTimeoutMs: must be > 0"
                )));
            }
        }
        Ok(())
    }
}

/// Load and validate the configuration from a TOML file path
pub fn load_config_from_toml_path(path: impl AsRef<Path>) -> Result<Config> {
    let data = fs::read_to_string(&path).map_err(|e| {
        CoreError::Configuration(format!("failed to read config {:?}: {e}", path.as_ref()))
    })?;
    load_config_from_toml_str(&data)
}

/// Load and validate the configuration from a TOML string
pub fn load_config_from_toml_str(input: &str) -> Result<Config> {
    let cfg: Config = toml::from_str(input)
        .map_err(|e| CoreError::Configuration(format!("TOML parse error: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> &'static str {
        r#"
        logCapacity = 500
        dbPath = "test.db"

        [[processes]]
        name = "web"
        command = "python3"
        args = ["-m", "http.server"]
        autoRestart = true
        maxRestarts = 3

        [[processes]]
        name = "worker"
        command = "sh"
        args = ["-c", "sleep 1"]
        "#
    }

    #[test]
    fn parses_and_validates_valid_config() {
        let cfg = load_config_from_toml_str(valid_config()).expect("should parse");
        assert_eq!(cfg.processes.len(), 2);
        assert_eq!(cfg.processes[0].name, "web");
        assert!(cfg.processes[0].auto_restart);
        assert_eq!(cfg.processes[0].max_restarts, 3);
        assert_eq!(cfg.log_capacity, 500);
        assert_eq!(cfg.db_path, "test.db");
    }

    #[test]
    fn defaults_apply_when_omitted() {
        let input = r#"
        [[processes]]
        name = "only"
        command = "true"
        "#;
        let cfg = load_config_from_toml_str(input).expect("should parse");
        assert_eq!(cfg.log_capacity, 1000);
        assert_eq!(cfg.db_path, "procyon.db");
        assert_eq!(cfg.processes[0].stop_timeout_ms, 5000);
    }

    #[test]
    fn errors_on_empty_processes() {
        let err = load_config_from_toml_str("processes = []").unwrap_err();
        assert!(err.to_string().contains("at least one process"));
    }

    #[test]
    fn errors_on_duplicate_names() {
        let input = r#"
        [[processes]]
        name = "dup"
        command = "true"
        [[processes]]
        name = "dup"
        command = "false"
        "#;
        let err = load_config_from_toml_str(input).unwrap_err();
        assert!(err.to_string().contains("duplicate name"));
    }

    #[test]
    fn errors_on_empty_command() {
        let input = r#"
        [[processes]]
        name = "bad"
        command = "  "
        "#;
        let err = load_config_from_toml_str(input).unwrap_err();
        assert!(err.to_string().contains("processes[0].command"));
    }

    #[test]
    fn errors_on_zero_stop_timeout() {
        let input = r#"
        [[processes]]
        name = "bad"
        command = "true"
        stopTimeoutMs = 0
        "#;
        let err = load_config_from_toml_str(input).unwrap_err();
        assert!(err.to_string().contains("stopTimeoutMs"));
    }
}
